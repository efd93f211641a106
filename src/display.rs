//! OLED refresh task.
//!
//! The framebuffer is snapshotted under its own lock, which is released
//! before the bus lock is taken for the transfer. Neither lock is ever held
//! while waiting for the other.

use display_interface::{DataFormat, DisplayError};
use embassy_sync::blocking_mutex::raw::RawMutex;
use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::i2c::I2c;

use crate::bus::{transaction_timeout, BusArbiter};
use crate::font::draw_text;
use crate::framebuffer::{SharedFramebuffer, BUFFER_SIZE};
use crate::publish::Publisher;
use crate::retry::{Attempt, BoundedRetry, BRING_UP_BACKOFF_MS};
use crate::ssd1327::Ssd1327;

/// Dirty flag polling period
pub const POLL_INTERVAL_MS: u32 = 100;

/// Longest command write, address and control byte included
const COMMAND_BYTES: usize = 10;

/// Which setup goes ahead of the next frame transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(target_arch = "arm", derive(defmt::Format))]
pub enum RefreshPhase {
    /// First transfer after bring-up: window setup, panel still all-on.
    Initial,
    /// Window setup with normal display mode.
    Reconfigure,
    /// Data only.
    Streaming,
}

impl RefreshPhase {
    /// Window setup to send first, `Some(normal)` or `None` for data only.
    pub fn window(self) -> Option<bool> {
        match self {
            RefreshPhase::Initial => Some(false),
            RefreshPhase::Reconfigure => Some(true),
            RefreshPhase::Streaming => None,
        }
    }

    /// Phase after a transfer, and whether the frame must be sent again.
    pub fn next(self, succeeded: bool) -> (RefreshPhase, bool) {
        match (self, succeeded) {
            (RefreshPhase::Initial, true) => (RefreshPhase::Reconfigure, true),
            (_, true) => (RefreshPhase::Streaming, false),
            (_, false) => (RefreshPhase::Reconfigure, true),
        }
    }
}

pub struct Display<'a> {
    panel: Ssd1327,
    phase: RefreshPhase,
    frame: &'a mut [u8; BUFFER_SIZE],
}

impl<'a> Display<'a> {
    /// `frame` holds the snapshot being transferred.
    pub fn new(panel: Ssd1327, frame: &'a mut [u8; BUFFER_SIZE]) -> Self {
        Self { panel, phase: RefreshPhase::Initial, frame }
    }

    pub fn phase(&self) -> RefreshPhase {
        self.phase
    }

    /// Bring the panel up, retrying with back-off.
    pub async fn bring_up<M, I, D>(&mut self, arbiter: &BusArbiter<M, I>, delay: &mut D) -> Result<(), DisplayError>
    where
        M: RawMutex,
        I: I2c,
        D: DelayNs,
    {
        let panel = self.panel;
        let mut retry = BoundedRetry::bring_up();
        loop {
            let result = arbiter
                .with_bus(transaction_timeout(COMMAND_BYTES), async |bus: &mut I| panel.bring_up(bus).await)
                .await
                .unwrap_or(Err(DisplayError::BusWriteError));
            match result {
                Ok(()) => {
                    info!("OLED up");
                    self.phase = RefreshPhase::Initial;
                    return Ok(());
                }
                Err(e) => match retry.failed() {
                    Attempt::Retry { remaining } => {
                        info!("OLED bring-up failed, {} attempts left", remaining);
                        delay.delay_ms(BRING_UP_BACKOFF_MS).await;
                    }
                    Attempt::Exhausted => return Err(e),
                },
            }
        }
    }

    /// Transfer the framebuffer if it is dirty. `Ok(true)` when a frame went
    /// out. A failed transfer leaves the framebuffer dirty.
    pub async fn refresh_once<M, F, I, P>(
        &mut self,
        arbiter: &BusArbiter<M, I>,
        framebuffer: &SharedFramebuffer<F>,
        publisher: &P,
    ) -> Result<bool, DisplayError>
    where
        M: RawMutex,
        F: RawMutex,
        I: I2c,
        P: Publisher,
    {
        {
            let mut fb = framebuffer.lock().await;
            if !fb.is_dirty() {
                return Ok(false);
            }
            self.frame.copy_from_slice(fb.as_bytes());
            fb.clear_dirty();
        }

        let panel = self.panel;
        let phase = self.phase;
        let frame: &[u8] = &self.frame[..];
        let result = arbiter
            .with_bus(transaction_timeout(COMMAND_BYTES + 2 + BUFFER_SIZE), async |bus: &mut I| {
                if let Some(normal) = phase.window() {
                    panel.set_window(bus, normal).await?;
                }
                panel.send_data(bus, DataFormat::U8(frame)).await
            })
            .await
            .unwrap_or(Err(DisplayError::BusWriteError));

        let (next, again) = phase.next(result.is_ok());
        self.phase = next;
        if again {
            framebuffer.lock().await.mark_dirty();
        }
        match result {
            Ok(()) => Ok(true),
            Err(e) => {
                warn!("OLED data failed in {}", phase);
                publisher.error("OLED", "Data failed");
                Err(e)
            }
        }
    }
}

/// Start-up screen: blank with the device tag at the origin.
pub async fn show_tag<F: RawMutex>(framebuffer: &SharedFramebuffer<F>, tag: &str) {
    let mut fb = framebuffer.lock().await;
    fb.clear();
    draw_text(&mut fb, 1, 0, 0, tag);
    fb.mark_dirty();
}

/// Display task body. Returns only if bring-up fails.
pub async fn run<M, F, I, D, P>(
    mut display: Display<'_>,
    arbiter: &BusArbiter<M, I>,
    framebuffer: &SharedFramebuffer<F>,
    mut delay: D,
    tag: &str,
    publisher: &P,
) where
    M: RawMutex,
    F: RawMutex,
    I: I2c,
    D: DelayNs,
    P: Publisher,
{
    if display.bring_up(arbiter, &mut delay).await.is_err() {
        error!("OLED configuration failed");
        publisher.error("OLED", "Configuration failed");
        return;
    }
    show_tag(framebuffer, tag).await;

    loop {
        match display.refresh_once(arbiter, framebuffer, publisher).await {
            // Something may have been drawn during the transfer
            Ok(true) => {}
            Ok(false) | Err(_) => delay.delay_ms(POLL_INTERVAL_MS).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framebuffer::{self, Framebuffer};
    use crate::publish::testing::Recorder;
    use crate::testing::Delay;
    use crate::ssd1327::testing::FakePanel;
    use embassy_futures::block_on;
    use embassy_sync::blocking_mutex::raw::NoopRawMutex;
    use std::vec::Vec;

    const WINDOW: [u8; 7] = [0x00, 0x15, 0x00, 0x7F, 0x75, 0x00, 0x7F];
    const NORMAL_WINDOW: [u8; 8] = [0x00, 0xA4, 0x15, 0x00, 0x7F, 0x75, 0x00, 0x7F];

    fn take_writes(arbiter: &BusArbiter<NoopRawMutex, FakePanel>) -> Vec<Vec<u8>> {
        core::mem::take(&mut block_on(arbiter.acquire()).writes)
    }

    #[test]
    fn test_phase_transitions() {
        use RefreshPhase::*;
        assert_eq!(Initial.next(true), (Reconfigure, true));
        assert_eq!(Reconfigure.next(true), (Streaming, false));
        assert_eq!(Streaming.next(true), (Streaming, false));
        for phase in [Initial, Reconfigure, Streaming] {
            assert_eq!(phase.next(false), (Reconfigure, true));
        }
    }

    #[test]
    fn test_refresh_sequence_after_bring_up() {
        let arbiter: BusArbiter<NoopRawMutex, _> = BusArbiter::new(FakePanel::default());
        let fb = framebuffer::shared::<NoopRawMutex>();
        let recorder = Recorder::default();
        let mut frame = [0u8; BUFFER_SIZE];
        let mut display = Display::new(Ssd1327::new(0x3D, false), &mut frame);

        block_on(display.bring_up(&arbiter, &mut Delay::default())).unwrap();
        assert_eq!(take_writes(&arbiter), [[0x00, 0xA5, 0xAF, 0xA0, 0x52]]);

        // First frame: plain window, then the same frame again in normal mode
        assert!(matches!(block_on(display.refresh_once(&arbiter, &fb, &recorder)), Ok(true)));
        let writes = take_writes(&arbiter);
        assert_eq!(writes[0], WINDOW);
        assert_eq!(writes[1].len(), 1 + BUFFER_SIZE);
        assert!(block_on(fb.lock()).is_dirty());

        assert!(matches!(block_on(display.refresh_once(&arbiter, &fb, &recorder)), Ok(true)));
        let writes = take_writes(&arbiter);
        assert_eq!(writes[0], NORMAL_WINDOW);
        assert_eq!(writes.len(), 2);
        assert!(!block_on(fb.lock()).is_dirty());
        assert_eq!(display.phase(), RefreshPhase::Streaming);

        // Clean framebuffer: nothing on the bus
        assert!(matches!(block_on(display.refresh_once(&arbiter, &fb, &recorder)), Ok(false)));
        assert!(take_writes(&arbiter).is_empty());

        // Steady state: data only
        block_on(fb.lock()).set_pixel_block(0, 0, 9);
        assert!(matches!(block_on(display.refresh_once(&arbiter, &fb, &recorder)), Ok(true)));
        let writes = take_writes(&arbiter);
        assert_eq!(writes.len(), 1);
        assert_eq!(&writes[0][..2], &[0x40, 0x90]);
        assert!(recorder.errors().is_empty());
    }

    #[test]
    fn test_failed_transfer_remarks_dirty_and_reconfigures() {
        let arbiter: BusArbiter<NoopRawMutex, _> = BusArbiter::new(FakePanel::default());
        let fb = framebuffer::shared::<NoopRawMutex>();
        let recorder = Recorder::default();
        let mut frame = [0u8; BUFFER_SIZE];
        let mut display = Display::new(Ssd1327::new(0x3D, false), &mut frame);
        display.phase = RefreshPhase::Streaming;

        block_on(arbiter.acquire()).failures = 1;
        assert!(matches!(
            block_on(display.refresh_once(&arbiter, &fb, &recorder)),
            Err(DisplayError::BusWriteError)
        ));
        assert!(block_on(fb.lock()).is_dirty());
        assert_eq!(display.phase(), RefreshPhase::Reconfigure);
        assert_eq!(recorder.errors(), [(String::from("OLED"), String::from("Data failed"))]);

        assert!(matches!(block_on(display.refresh_once(&arbiter, &fb, &recorder)), Ok(true)));
        assert_eq!(take_writes(&arbiter)[0], NORMAL_WINDOW);
    }

    #[test]
    fn test_stuck_panel_times_out() {
        let arbiter: BusArbiter<NoopRawMutex, _> = BusArbiter::new(FakePanel { stuck: true, ..Default::default() });
        let fb = framebuffer::shared::<NoopRawMutex>();
        let recorder = Recorder::default();
        let mut frame = [0u8; BUFFER_SIZE];
        let mut display = Display::new(Ssd1327::new(0x3D, false), &mut frame);
        display.phase = RefreshPhase::Streaming;

        assert!(matches!(
            block_on(display.refresh_once(&arbiter, &fb, &recorder)),
            Err(DisplayError::BusWriteError)
        ));
        assert!(block_on(fb.lock()).is_dirty());
        assert_eq!(display.phase(), RefreshPhase::Reconfigure);
        assert_eq!(recorder.errors(), [(String::from("OLED"), String::from("Data failed"))]);
    }

    #[test]
    fn test_snapshot_matches_framebuffer() {
        let arbiter: BusArbiter<NoopRawMutex, _> = BusArbiter::new(FakePanel::default());
        let fb = framebuffer::shared::<NoopRawMutex>();
        let mut frame = [0u8; BUFFER_SIZE];
        let mut display = Display::new(Ssd1327::new(0x3D, false), &mut frame);
        display.phase = RefreshPhase::Streaming;

        let mut expected = Framebuffer::new();
        draw_text(&mut expected, 1, 0, 0, "envmon");
        block_on(show_tag(&fb, "envmon"));
        block_on(display.refresh_once(&arbiter, &fb, &Recorder::default())).unwrap();
        let frames = block_on(arbiter.acquire()).frames();
        assert_eq!(frames[0].as_slice(), &expected.as_bytes()[..]);
        assert!(expected.as_bytes().iter().any(|&b| b != 0));
    }

    #[test]
    fn test_dead_panel_disables_display() {
        let arbiter: BusArbiter<NoopRawMutex, _> = BusArbiter::new(FakePanel { dead: true, ..Default::default() });
        let fb = framebuffer::shared::<NoopRawMutex>();
        let recorder = Recorder::default();
        let mut frame = [0u8; BUFFER_SIZE];
        let mut delay = Delay::default();
        let display = Display::new(Ssd1327::new(0x3D, false), &mut frame);

        block_on(run(display, &arbiter, &fb, &mut delay, "envmon", &recorder));
        assert_eq!(delay.waited_ms, 9 * BRING_UP_BACKOFF_MS);
        assert_eq!(recorder.errors(), [(String::from("OLED"), String::from("Configuration failed"))]);
    }
}
