use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use crate::types::VisualFrame;

pub const DEFAULT_LIVE_INTERVAL: Duration = Duration::from_millis(450);

/// Decides when the next detection should be dispatched.
///
/// Live frames are analyzed every `interval`, measured from the moment the
/// previous detection settled. A still image is analyzed once.
#[derive(Debug, Clone)]
pub struct DetectionCadence {
    interval: Duration,
    last_settled: Option<Instant>,
    analyzed_still: Option<usize>,
}

fn frame_id(frame: &VisualFrame) -> usize {
    Arc::as_ptr(frame.frame()) as usize
}

impl DetectionCadence {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_settled: None,
            analyzed_still: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_due(&self, now: Instant, frame: &VisualFrame) -> bool {
        match frame {
            VisualFrame::LiveCamera(_) => self
                .last_settled
                .is_none_or(|at| now.saturating_duration_since(at) >= self.interval),
            VisualFrame::StillImage(_) => self.analyzed_still != Some(frame_id(frame)),
        }
    }

    /// Records that a detection for `frame` was accepted by the engine.
    pub fn dispatched(&mut self, frame: &VisualFrame) {
        if !frame.is_live() {
            self.analyzed_still = Some(frame_id(frame));
        }
    }

    pub fn settled(&mut self, now: Instant) {
        self.last_settled = Some(now);
    }

    /// Forgets all history, e.g. after the capture source changed.
    pub fn reset(&mut self) {
        self.last_settled = None;
        self.analyzed_still = None;
    }
}

impl Default for DetectionCadence {
    fn default() -> Self {
        Self::new(DEFAULT_LIVE_INTERVAL)
    }
}
