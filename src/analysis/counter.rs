//! Frame rate estimation.

use std::time::{Duration, Instant};

/// Counts frames and turns them into rates over fixed windows.
///
/// `add_frame` is cheap and may be called every frame; rates are only
/// recomputed by `update` once the window has elapsed.
#[derive(Debug, Clone)]
pub struct FrameCounter {
    interval: Duration,
    window_start: Option<Instant>,
    window_frames: u32,
    first: Option<Instant>,
    total_frames: u64,
    last_fps: f32,
    cumulative_fps: f32,
}

impl FrameCounter {
    /// Creates a counter with a one second window.
    pub fn new() -> Self {
        Self::with_interval(Duration::from_secs(1))
    }

    /// Creates a counter with the given window length.
    pub fn with_interval(interval: Duration) -> Self {
        Self {
            interval,
            window_start: None,
            window_frames: 0,
            first: None,
            total_frames: 0,
            last_fps: 0.0,
            cumulative_fps: 0.0,
        }
    }

    /// Forgets all frames and rates.
    pub fn reset(&mut self) {
        *self = Self::with_interval(self.interval);
    }

    pub fn set_interval(&mut self, interval: Duration) {
        self.interval = interval;
    }

    pub fn add_frame(&mut self) {
        self.add_frame_at(Instant::now());
    }

    /// Counts one frame seen at `now`.
    pub fn add_frame_at(&mut self, now: Instant) {
        self.window_start.get_or_insert(now);
        self.first.get_or_insert(now);
        self.window_frames += 1;
        self.total_frames += 1;
    }

    pub fn update(&mut self) -> bool {
        self.update_at(Instant::now())
    }

    /// Closes the window if it has elapsed; returns true if rates changed.
    pub fn update_at(&mut self, now: Instant) -> bool {
        let Some(start) = self.window_start else {
            return false;
        };
        let elapsed = now.saturating_duration_since(start);
        if elapsed < self.interval || elapsed.is_zero() {
            return false;
        }

        self.last_fps = self.window_frames as f32 / elapsed.as_secs_f32();
        if let Some(first) = self.first {
            let total = now.saturating_duration_since(first).as_secs_f32();
            if total > 0.0 {
                self.cumulative_fps = self.total_frames as f32 / total;
            }
        }
        self.window_start = Some(now);
        self.window_frames = 0;
        true
    }

    /// Rate over the last completed window.
    pub fn fps(&self) -> f32 {
        self.last_fps
    }

    /// Rate over the window still in progress.
    pub fn current_fps_at(&self, now: Instant) -> f32 {
        match self.window_start {
            Some(start) => {
                let elapsed = now.saturating_duration_since(start).as_secs_f32();
                if elapsed > 0.0 {
                    self.window_frames as f32 / elapsed
                } else {
                    0.0
                }
            }
            None => 0.0,
        }
    }

    /// Rate since the first frame, as of the last completed window.
    pub fn cumulative_fps(&self) -> f32 {
        self.cumulative_fps
    }

    pub fn total_frames(&self) -> u64 {
        self.total_frames
    }
}

impl Default for FrameCounter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_over_window() {
        let start = Instant::now();
        let mut counter = FrameCounter::with_interval(Duration::from_millis(500));

        for i in 0..15 {
            counter.add_frame_at(start + Duration::from_millis(i * 33));
        }
        assert!(!counter.update_at(start + Duration::from_millis(400)));
        assert!(counter.update_at(start + Duration::from_millis(500)));
        assert!((counter.fps() - 30.0).abs() < 0.01);
        assert!((counter.cumulative_fps() - 30.0).abs() < 0.01);
    }

    #[test]
    fn test_current_fps_in_progress() {
        let start = Instant::now();
        let mut counter = FrameCounter::new();
        counter.add_frame_at(start);
        counter.add_frame_at(start + Duration::from_millis(100));
        let fps = counter.current_fps_at(start + Duration::from_millis(200));
        assert!((fps - 10.0).abs() < 0.01);
    }

    #[test]
    fn test_no_frames_no_rate() {
        let mut counter = FrameCounter::new();
        assert!(!counter.update());
        assert_eq!(counter.fps(), 0.0);
        counter.reset();
        assert_eq!(counter.total_frames(), 0);
    }
}
