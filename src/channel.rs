//! Shared measurement state.
//!
//! Each [`Channel`] has exactly one writer, the acquisition task that owns the
//! sensor behind it. Everyone else reads through the atomic accessors. The
//! only cross-task write is a resend request, which is a flag the writer
//! consumes on its next sample rather than a direct store into `last`.

use portable_atomic::{AtomicBool, AtomicF32, AtomicU8, Ordering};

/// Initial `last`/`current`, far below any real reading.
pub const SENTINEL: f32 = -10000.0;

/// Conditioning parameters of one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelConfig {
    /// Decimal places reported; zero or negative rounds to tens, hundreds...
    pub places: i8,
    /// Damping window, `None` passes samples straight through.
    pub window: Option<u32>,
}

impl ChannelConfig {
    pub const fn damped(places: i8, window: u32) -> Self {
        Self { places, window: Some(window) }
    }

    pub const fn raw(places: i8) -> Self {
        Self { places, window: None }
    }
}

pub struct Channel {
    tag: &'static str,
    current: AtomicF32,
    last: AtomicF32,
    resend: AtomicBool,
}

impl Channel {
    pub const fn new(tag: &'static str) -> Self {
        Self {
            tag,
            current: AtomicF32::new(SENTINEL),
            last: AtomicF32::new(SENTINEL),
            resend: AtomicBool::new(false),
        }
    }

    pub fn tag(&self) -> &'static str {
        self.tag
    }

    /// Latest conditioned value, `None` until the first sample.
    pub fn current(&self) -> Option<f32> {
        valid(self.current.load(Ordering::Relaxed))
    }

    /// Last reported value, `None` if nothing was reported since start or
    /// since the last resend.
    pub fn last(&self) -> Option<f32> {
        if self.resend.load(Ordering::Relaxed) {
            return None;
        }
        valid(self.last.load(Ordering::Relaxed))
    }

    /// Forget the last report so the next sample is reported whatever it is.
    pub fn request_resend(&self) {
        self.resend.store(true, Ordering::Relaxed);
    }

    pub(crate) fn store_current(&self, value: f32) {
        self.current.store(value, Ordering::Relaxed);
    }

    /// Writer side: last reported value with any pending resend applied.
    pub(crate) fn take_last(&self) -> f32 {
        if self.resend.swap(false, Ordering::Relaxed) {
            self.last.store(SENTINEL, Ordering::Relaxed);
        }
        self.last.load(Ordering::Relaxed)
    }

    pub(crate) fn store_last(&self, value: f32) {
        self.last.store(value, Ordering::Relaxed);
    }
}

fn valid(value: f32) -> Option<f32> {
    (value > SENTINEL).then_some(value)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(target_arch = "arm", derive(defmt::Format))]
pub enum FanState {
    Unknown,
    On,
    Off,
}

/// Last commanded fan action.
pub struct FanLatch {
    state: AtomicU8,
}

impl FanLatch {
    pub const fn new() -> Self {
        Self { state: AtomicU8::new(0) }
    }

    pub fn get(&self) -> FanState {
        match self.state.load(Ordering::Relaxed) {
            1 => FanState::On,
            2 => FanState::Off,
            _ => FanState::Unknown,
        }
    }

    pub fn set(&self, state: FanState) {
        let raw = match state {
            FanState::Unknown => 0,
            FanState::On => 1,
            FanState::Off => 2,
        };
        self.state.store(raw, Ordering::Relaxed);
    }

    pub fn reset(&self) {
        self.set(FanState::Unknown);
    }
}

impl Default for FanLatch {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything the tasks share.
pub struct Monitor {
    pub co2: Channel,
    pub rh: Channel,
    pub temp: Channel,
    pub otemp: Channel,
    pub fan: FanLatch,
    probe_present: AtomicBool,
}

impl Monitor {
    pub const fn new() -> Self {
        Self {
            co2: Channel::new("co2"),
            rh: Channel::new("rh"),
            temp: Channel::new("temp"),
            otemp: Channel::new("otemp"),
            fan: FanLatch::new(),
            probe_present: AtomicBool::new(false),
        }
    }

    pub fn channels(&self) -> [&Channel; 4] {
        [&self.co2, &self.rh, &self.temp, &self.otemp]
    }

    /// Re-emit every report on the next sample and forget the fan state.
    /// Used on reconnect and on the hourly refresh.
    pub fn send_all(&self) {
        for channel in self.channels() {
            channel.request_resend();
        }
        self.fan.reset();
    }

    /// Whether a one-wire probe owns the primary temperature channel. Fixed
    /// once discovery has run, before the gas sensor task starts.
    pub fn probe_present(&self) -> bool {
        self.probe_present.load(Ordering::Relaxed)
    }

    pub fn set_probe_present(&self, present: bool) {
        self.probe_present.store(present, Ordering::Relaxed);
    }
}

impl Default for Monitor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_starts_empty() {
        let channel = Channel::new("co2");
        assert_eq!(channel.current(), None);
        assert_eq!(channel.last(), None);
        assert_eq!(channel.take_last(), SENTINEL);
    }

    #[test]
    fn test_resend_clears_last_once() {
        let channel = Channel::new("rh");
        channel.store_last(45.0);
        assert_eq!(channel.last(), Some(45.0));
        channel.request_resend();
        assert_eq!(channel.last(), None);
        assert_eq!(channel.take_last(), SENTINEL);
        channel.store_last(46.0);
        assert_eq!(channel.take_last(), 46.0);
    }

    #[test]
    fn test_send_all_resets_everything() {
        let monitor = Monitor::new();
        for channel in monitor.channels() {
            channel.store_last(1.0);
        }
        monitor.fan.set(FanState::On);
        monitor.send_all();
        assert!(monitor.channels().iter().all(|c| c.last().is_none()));
        assert_eq!(monitor.fan.get(), FanState::Unknown);
    }
}
