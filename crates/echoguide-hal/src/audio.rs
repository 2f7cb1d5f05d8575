//! The `AudioSink` trait: the two-node signal path the core drives.
//!
//! Node one is the guidance tone (continuous, or beeping in the beep
//! style); node two is the obstacle alert.  Mixing, decoding and device
//! routing are the implementor's business.

use echoguide_types::{AudioControl, GuideError};

/// Output device for guidance audio.
pub trait AudioSink: Send + Sync {
    /// Set the guidance tone's volume (`[0, 1]`) and pan (`[-1, 1]`).
    ///
    /// # Errors
    ///
    /// Returns [`GuideError::AudioSink`] if the device rejects the write.
    fn set_continuous(&self, volume: f32, pan: f32) -> Result<(), GuideError>;

    /// Start, update or stop the obstacle alert tone.
    fn set_alert(&self, active: bool, volume: f32, pan: f32) -> Result<(), GuideError>;

    /// Beep cadence for the beep guidance style; `None` means a continuous
    /// tone.  Sinks without a beep scheduler may ignore it.
    fn set_cadence(&self, _interval_ms: Option<u32>) -> Result<(), GuideError> {
        Ok(())
    }
}

/// Push every field of `control` to `sink`.  All three writes are attempted;
/// the first error is returned.
pub fn apply(sink: &dyn AudioSink, control: &AudioControl) -> Result<(), GuideError> {
    let continuous = sink.set_continuous(control.continuous_volume, control.continuous_pan);
    let alert = sink.set_alert(control.alert_active, control.alert_volume, control.alert_pan);
    let cadence = sink.set_cadence(control.beep_interval_ms);
    continuous.and(alert).and(cadence)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MockSink {
        writes: Mutex<Vec<String>>,
        fail_alert: bool,
    }

    impl AudioSink for MockSink {
        fn set_continuous(&self, volume: f32, pan: f32) -> Result<(), GuideError> {
            self.writes.lock().unwrap().push(format!("tone {volume:.2} {pan:.2}"));
            Ok(())
        }

        fn set_alert(&self, active: bool, volume: f32, pan: f32) -> Result<(), GuideError> {
            if self.fail_alert {
                return Err(GuideError::AudioSink {
                    details: "alert node offline".to_string(),
                });
            }
            self.writes
                .lock()
                .unwrap()
                .push(format!("alert {active} {volume:.2} {pan:.2}"));
            Ok(())
        }
    }

    #[test]
    fn apply_writes_both_channels() {
        let sink = MockSink::default();
        let control = AudioControl {
            continuous_volume: 0.5,
            continuous_pan: -0.25,
            alert_volume: 1.0,
            alert_pan: 0.0,
            alert_active: true,
            beep_interval_ms: None,
        };
        apply(&sink, &control).unwrap();
        let writes = sink.writes.lock().unwrap();
        assert_eq!(writes.as_slice(), ["tone 0.50 -0.25", "alert true 1.00 0.00"]);
    }

    #[test]
    fn apply_still_writes_tone_when_alert_fails() {
        let sink = MockSink {
            fail_alert: true,
            ..Default::default()
        };
        let err = apply(&sink, &AudioControl::silent()).unwrap_err();
        assert!(matches!(err, GuideError::AudioSink { .. }));
        assert_eq!(sink.writes.lock().unwrap().len(), 1);
    }
}
