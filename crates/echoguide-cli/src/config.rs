//! Config file – reads/writes `~/.echoguide/config.toml`.
//!
//! ```toml
//! log_format = "json"
//!
//! [guidance]
//! safe_zone_distance = 1.2
//! guidance_style = "beep"
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use echoguide_runtime::{GuidanceConfig, GuidanceStyle, LogFormat, TelemetryConfig};
use echoguide_types::GuideError;
use serde::{Deserialize, Serialize};

/// Persisted user configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub log_format: LogFormat,

    /// OTLP collector; `OTEL_EXPORTER_OTLP_ENDPOINT` wins when both are set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub otlp_endpoint: Option<String>,

    #[serde(default)]
    pub guidance: GuidanceConfig,
}

impl Config {
    pub fn telemetry(&self, service_name: &str) -> TelemetryConfig {
        let mut t = TelemetryConfig::from_env(service_name);
        t.log_format = self.log_format;
        if t.otlp_endpoint.is_none() {
            t.otlp_endpoint = self.otlp_endpoint.clone();
        }
        t
    }
}

/// Where the effective configuration came from.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigSource {
    File(PathBuf),
    /// No file existed; defaults were written to this path.
    Created(PathBuf),
    /// The file could not be used; running on defaults.
    Defaults(GuideError),
}

/// Return the path to `~/.echoguide/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".echoguide").join("config.toml")
}

/// Load `path` with environment overrides applied.  `Ok(None)` if the file
/// does not exist.
///
/// # Errors
///
/// [`GuideError::Config`] when the file cannot be read or parsed, or when
/// the resulting guidance values fail validation.
pub fn load_from(path: &Path) -> Result<Option<Config>, GuideError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| GuideError::Config(format!("failed to read {}: {e}", path.display())))?;
    let mut cfg: Config = toml::from_str(&raw)
        .map_err(|e| GuideError::Config(format!("failed to parse {}: {e}", path.display())))?;
    apply_env_overrides(&mut cfg);
    cfg.guidance.validate()?;
    Ok(Some(cfg))
}

/// Load the config, creating a default file on first run.  Any problem
/// falls back to defaults (still with environment overrides) and is
/// reported through [`ConfigSource::Defaults`].
pub fn resolve(path: &Path) -> (Config, ConfigSource) {
    match load_from(path) {
        Ok(Some(cfg)) => (cfg, ConfigSource::File(path.to_path_buf())),
        Ok(None) => {
            let source = match save_to(&Config::default(), path) {
                Ok(()) => ConfigSource::Created(path.to_path_buf()),
                Err(e) => ConfigSource::Defaults(e),
            };
            (env_defaults(), source)
        }
        Err(e) => (env_defaults(), ConfigSource::Defaults(e)),
    }
}

fn env_defaults() -> Config {
    let mut cfg = Config::default();
    apply_env_overrides(&mut cfg);
    if cfg.guidance.validate().is_err() {
        // Overrides produced something unusable; ignore them.
        cfg.guidance = GuidanceConfig::default();
    }
    cfg
}

/// Apply `ECHOGUIDE_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `ECHOGUIDE_SAFE_ZONE` | `guidance.safe_zone_distance` |
/// | `ECHOGUIDE_SCAN_INTERVAL_MS` | `guidance.scan_interval_ms` |
/// | `ECHOGUIDE_STYLE` | `guidance.guidance_style` (`tone` / `beep`) |
/// | `ECHOGUIDE_LOG_FORMAT` | `log_format` (`compact` / `json`) |
///
/// Values that do not parse are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    apply_overrides(cfg, |key| std::env::var(key).ok());
}

pub(crate) fn apply_overrides<F>(cfg: &mut Config, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(v) = lookup("ECHOGUIDE_SAFE_ZONE")
        && let Ok(d) = v.trim().parse::<f32>()
    {
        cfg.guidance.safe_zone_distance = d;
    }
    if let Some(v) = lookup("ECHOGUIDE_SCAN_INTERVAL_MS")
        && let Ok(ms) = v.trim().parse::<u64>()
    {
        cfg.guidance.scan_interval_ms = ms;
    }
    if let Some(v) = lookup("ECHOGUIDE_STYLE") {
        match v.trim().to_ascii_lowercase().as_str() {
            "tone" => cfg.guidance.guidance_style = GuidanceStyle::Tone,
            "beep" => cfg.guidance.guidance_style = GuidanceStyle::Beep,
            _ => {}
        }
    }
    if let Some(v) = lookup("ECHOGUIDE_LOG_FORMAT")
        && let Ok(format) = v.parse::<LogFormat>()
    {
        cfg.log_format = format;
    }
}

/// Write `cfg` to `path`, creating the parent directory.  Owner-only
/// permissions on Unix.
pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), GuideError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| GuideError::Config(format!("failed to create config directory: {e}")))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700)).map_err(|e| {
                GuideError::Config(format!("failed to set config directory permissions: {e}"))
            })?;
        }
    }
    let raw = toml::to_string_pretty(cfg)
        .map_err(|e| GuideError::Config(format!("failed to serialize config: {e}")))?;
    let write_err =
        |e: std::io::Error| GuideError::Config(format!("failed to write {}: {e}", path.display()));
    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| f.write_all(raw.as_bytes()))
            .map_err(write_err)?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw).map_err(write_err)?;
    Ok(())
}
