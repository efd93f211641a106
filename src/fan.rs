//! CO2 threshold fan control.

use crate::channel::{FanLatch, FanState};
use crate::publish::{split_action, Publisher};
use crate::settings::Settings;

#[derive(Debug, Clone, Copy)]
pub struct FanController {
    threshold: f32,
    on: &'static str,
    off: &'static str,
}

impl FanController {
    pub fn new(threshold: u32, on: &'static str, off: &'static str) -> Self {
        Self { threshold: threshold as f32, on, off }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.fan_co2, settings.fan_on, settings.fan_off)
    }

    /// Compare `co2` against the threshold and switch the fan on a change of
    /// side. Returns the new state when the latch moved. A reading exactly at
    /// the threshold leaves the fan as it is.
    pub fn evaluate<P: Publisher>(&self, co2: Option<f32>, latch: &FanLatch, publisher: &P) -> Option<FanState> {
        let co2 = co2?;
        let state = latch.get();
        let (next, action) = if co2 > self.threshold && state != FanState::On {
            (FanState::On, self.on)
        } else if co2 < self.threshold && state != FanState::Off {
            (FanState::Off, self.off)
        } else {
            return None;
        };

        latch.set(next);
        info!("fan {} at {} ppm", next, co2);
        // An empty action still moves the latch
        if !action.is_empty() {
            let (topic, payload) = split_action(action);
            publisher.emit(topic, payload.as_bytes());
        }
        Some(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publish::testing::Recorder;
    use std::vec::Vec;

    #[test]
    fn test_switches_once_per_crossing() {
        let fan = FanController::new(1000, "cmnd/fan/POWER ON", "cmnd/fan/POWER OFF");
        let latch = FanLatch::new();
        let recorder = Recorder::default();

        let states: Vec<_> = [1200.0, 1200.0, 800.0, 1300.0]
            .into_iter()
            .map(|co2| fan.evaluate(Some(co2), &latch, &recorder))
            .collect();
        assert_eq!(states, [Some(FanState::On), None, Some(FanState::Off), Some(FanState::On)]);

        let emits = recorder.emits();
        assert_eq!(emits.len(), 3);
        assert_eq!(emits[0], (String::from("cmnd/fan/POWER"), b"ON".to_vec()));
        assert_eq!(emits[1], (String::from("cmnd/fan/POWER"), b"OFF".to_vec()));
    }

    #[test]
    fn test_at_threshold_and_without_reading() {
        let fan = FanController::new(1000, "on", "off");
        let latch = FanLatch::new();
        let recorder = Recorder::default();
        assert_eq!(fan.evaluate(Some(1000.0), &latch, &recorder), None);
        assert_eq!(fan.evaluate(None, &latch, &recorder), None);
        assert_eq!(latch.get(), FanState::Unknown);
        assert!(recorder.emits().is_empty());
    }

    #[test]
    fn test_empty_action_moves_latch_silently() {
        let fan = FanController::from_settings(&Settings::DEFAULT);
        let latch = FanLatch::new();
        let recorder = Recorder::default();
        assert_eq!(fan.evaluate(Some(1500.0), &latch, &recorder), Some(FanState::On));
        assert_eq!(latch.get(), FanState::On);
        assert!(recorder.emits().is_empty());
    }

    #[test]
    fn test_reset_latch_reemits() {
        let fan = FanController::new(1000, "fan", "fan off");
        let latch = FanLatch::new();
        let recorder = Recorder::default();
        fan.evaluate(Some(500.0), &latch, &recorder);
        assert_eq!(fan.evaluate(Some(500.0), &latch, &recorder), None);
        latch.reset();
        assert_eq!(fan.evaluate(Some(500.0), &latch, &recorder), Some(FanState::Off));
        assert_eq!(recorder.emits(), [(String::from("fan"), b"off".to_vec()), (String::from("fan"), b"off".to_vec())]);
    }
}
