//! Command-line arguments for the echoguide demo.

use clap::{Parser, ValueEnum};
use echoguide_runtime::GuidanceStyle;

use crate::scenario::TARGET_LABEL;

#[derive(Debug, Parser, Clone)]
#[command(version, about = "Audio guidance toward a target, with obstacle alerts")]
pub struct CliArgs {
    /// Object label to search for.  The demo scene only contains a chair.
    #[arg(short, long, default_value = TARGET_LABEL, value_parser = scene_label)]
    pub label: String,

    /// Guidance sound; overrides the config file
    #[arg(short, long, value_enum)]
    pub style: Option<StyleArg>,

    /// Give up after this many seconds
    #[arg(short = 't', long = "seconds", default_value_t = 30)]
    pub seconds: u64,

    /// Disable obstacle alerts
    #[arg(long)]
    pub no_alerts: bool,

    /// Print audio frames as JSON lines
    #[arg(long)]
    pub json: bool,
}

/// Labels nobody placed in the scene could never be found; refuse them up
/// front instead of searching until the timeout.
fn scene_label(raw: &str) -> Result<String, String> {
    let label = raw.trim();
    if label == TARGET_LABEL {
        Ok(label.to_string())
    } else {
        Err(format!("the demo scene has no '{label}'; try '{TARGET_LABEL}'"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StyleArg {
    Tone,
    Beep,
}

impl From<StyleArg> for GuidanceStyle {
    fn from(s: StyleArg) -> Self {
        match s {
            StyleArg::Tone => GuidanceStyle::Tone,
            StyleArg::Beep => GuidanceStyle::Beep,
        }
    }
}
