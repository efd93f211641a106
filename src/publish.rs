//! Outbound reports, faults and fan actions.
//!
//! The transport behind this (telemetry link, log sink) is supplied by the
//! firmware. Calls are fire-and-forget; nothing here queues or retries.

pub trait Publisher {
    /// A new externally visible value for `tag`.
    fn report(&self, tag: &str, value: &str);

    /// A fault worth surfacing outside the device.
    fn error(&self, tag: &str, message: &str);

    /// Raw action to `topic` with an optional payload.
    fn emit(&self, topic: &str, payload: &[u8]);
}

impl<P: Publisher + ?Sized> Publisher for &P {
    fn report(&self, tag: &str, value: &str) {
        (**self).report(tag, value)
    }

    fn error(&self, tag: &str, message: &str) {
        (**self).error(tag, message)
    }

    fn emit(&self, topic: &str, payload: &[u8]) {
        (**self).emit(topic, payload)
    }
}

/// Split a configured action into topic and payload at the first space.
pub fn split_action(action: &str) -> (&str, &str) {
    match action.split_once(' ') {
        Some((topic, payload)) => (topic, payload),
        None => (action, ""),
    }
}
