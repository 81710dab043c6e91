//! Frame counters for the capture and classification stages.
//!
use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use tokio::{
    task::JoinHandle,
    time::{interval, Instant, MissedTickBehavior},
};

pub static METER: Meter = Meter::new();

#[derive(Default)]
pub struct Meter {
    captured: AtomicU64,
    classified: AtomicU64,
}

/// Counts taken from the meter over one logging window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameCounts {
    pub captured: u64,
    pub classified: u64,
}

impl FrameCounts {
    /// Rates in frames per second as `(captured, classified)`.
    pub fn rates(&self, window: Duration) -> (f32, f32) {
        let secs = window.as_secs_f32();
        if secs == 0.0 {
            return (0.0, 0.0);
        }
        (self.captured as f32 / secs, self.classified as f32 / secs)
    }
}

impl Meter {
    pub const fn new() -> Meter {
        Meter {
            captured: AtomicU64::new(0),
            classified: AtomicU64::new(0),
        }
    }

    pub fn tick_captured(&self) {
        self.captured.fetch_add(1, Ordering::Relaxed);
    }

    pub fn tick_classified(&self) {
        self.classified.fetch_add(1, Ordering::Relaxed);
    }

    /// Read both counters and start a new window.
    pub fn take(&self) -> FrameCounts {
        FrameCounts {
            captured: self.captured.swap(0, Ordering::Relaxed),
            classified: self.classified.swap(0, Ordering::Relaxed),
        }
    }
}

/// Log the frame rates of both stages every `period`. Silent while no frames arrive.
pub fn spawn_meter_logger(period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;
        METER.take();

        let mut window_start = Instant::now();
        loop {
            ticker.tick().await;
            let counts = METER.take();
            let (fps_captured, fps_classified) = counts.rates(window_start.elapsed());
            window_start = Instant::now();

            if counts.captured > 0 {
                log::info!(
                    "Frames per second: {fps_captured:.2} captured, {fps_classified:.2} classified"
                );
            }
        }
    })
}
