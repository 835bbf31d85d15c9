//! # Frame rate limiting
//!
//! [`FrameLimiter`] caps a render loop at an upper frame rate by sleeping
//! away whatever is left of the frame budget, and reports the rate of the
//! previous frame.
//!
//! ```no_run
//! use pbr_kit::gfx::rendering::FrameLimiter;
//!
//! let mut limiter = FrameLimiter::new(Some(60.0));
//! loop {
//!     limiter.begin_frame();
//!     // ... render ...
//!     let fps = limiter.finish_frame();
//!     log::trace!("{fps:.0} FPS");
//! #   break;
//! }
//! ```

use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct FrameLimiter {
    /// Upper bound in frames per second, `None` for unlimited
    fps_limit: Option<f64>,
    frame_start: Instant,
    last_fps: f64,
}

impl FrameLimiter {
    /// Limits that are zero, negative or not finite mean "no limit".
    pub fn new(fps_limit: Option<f64>) -> Self {
        let fps_limit = fps_limit.filter(|fps| fps.is_finite() && *fps > 0.0);
        Self {
            fps_limit,
            frame_start: Instant::now(),
            last_fps: 0.0,
        }
    }

    pub fn fps_limit(&self) -> Option<f64> {
        self.fps_limit
    }

    pub fn set_fps_limit(&mut self, fps_limit: Option<f64>) {
        self.fps_limit = fps_limit.filter(|fps| fps.is_finite() && *fps > 0.0);
    }

    /// Mark the beginning of a frame
    pub fn begin_frame(&mut self) {
        self.frame_start = Instant::now();
    }

    /// Sleeps out the rest of the frame budget and returns the resulting
    /// frame rate.
    pub fn finish_frame(&mut self) -> f64 {
        let mut elapsed = self.frame_start.elapsed();
        if let Some(wait) = remaining_budget(elapsed, self.fps_limit) {
            thread::sleep(wait);
            elapsed += wait;
        }
        self.last_fps = frame_rate(elapsed);
        self.frame_start = Instant::now();
        self.last_fps
    }

    /// Frame rate of the previous frame
    pub fn last_fps(&self) -> f64 {
        self.last_fps
    }

    /// e.g. `"60FPS"`
    pub fn fps_formatted(&self) -> String {
        format!("{:.0}FPS", self.last_fps)
    }
}

impl Default for FrameLimiter {
    fn default() -> Self {
        Self::new(None)
    }
}

/// Time left in a frame of `1 / fps_limit` seconds after `elapsed` has passed.
fn remaining_budget(elapsed: Duration, fps_limit: Option<f64>) -> Option<Duration> {
    let budget = Duration::from_secs_f64(1.0 / fps_limit?);
    budget.checked_sub(elapsed).filter(|wait| !wait.is_zero())
}

fn frame_rate(elapsed: Duration) -> f64 {
    let seconds = elapsed.as_secs_f64();
    if seconds > 0.0 {
        1.0 / seconds
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remaining_budget() {
        let fast = remaining_budget(Duration::from_millis(4), Some(100.0));
        assert_eq!(fast, Some(Duration::from_millis(6)));

        assert_eq!(remaining_budget(Duration::from_millis(20), Some(100.0)), None);
        assert_eq!(remaining_budget(Duration::from_millis(10), Some(100.0)), None);
        assert_eq!(remaining_budget(Duration::from_millis(1), None), None);
    }

    #[test]
    fn test_invalid_limits_mean_unlimited() {
        assert_eq!(FrameLimiter::new(Some(0.0)).fps_limit(), None);
        assert_eq!(FrameLimiter::new(Some(-30.0)).fps_limit(), None);
        assert_eq!(FrameLimiter::new(Some(f64::INFINITY)).fps_limit(), None);
        assert_eq!(FrameLimiter::new(Some(60.0)).fps_limit(), Some(60.0));
    }

    #[test]
    fn test_finish_frame_respects_limit() {
        let mut limiter = FrameLimiter::new(Some(200.0));
        limiter.begin_frame();
        let start = Instant::now();
        let fps = limiter.finish_frame();

        assert!(start.elapsed() >= Duration::from_millis(4));
        assert!(fps > 0.0 && fps <= 200.0 + 1e-6);
        assert_eq!(limiter.last_fps(), fps);
        assert!(limiter.fps_formatted().ends_with("FPS"));
    }

    #[test]
    fn test_frame_rate() {
        assert_eq!(frame_rate(Duration::ZERO), 0.0);
        assert!((frame_rate(Duration::from_millis(20)) - 50.0).abs() < 1e-9);
    }
}
