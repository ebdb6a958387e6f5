//! Frame-counted poll throttle for the session controller.

use std::time::Duration;

/// Frame-counted refresh throttle.
///
/// Fires on every `interval`-th call to [`tick`](Self::tick).  It knows
/// nothing about wall-clock time; the real period is `interval / fps` of
/// whoever calls it.
#[derive(Debug, Clone)]
pub struct PollScheduler {
    interval: u32,
    frame: u32,
}

impl PollScheduler {
    pub fn new(interval: u32) -> Self {
        Self {
            interval: interval.max(1),
            frame: 0,
        }
    }

    pub fn interval(&self) -> u32 {
        self.interval
    }

    /// Frames counted since the last trigger.
    pub fn frame(&self) -> u32 {
        self.frame
    }

    /// Count one frame.  Returns true when a refresh is due.
    pub fn tick(&mut self) -> bool {
        self.frame += 1;
        if self.frame >= self.interval {
            self.frame = 0;
            return true;
        }
        false
    }

    pub fn effective_period(&self, fps: u32) -> Duration {
        Duration::from_secs(u64::from(self.interval)) / fps.max(1)
    }
}
