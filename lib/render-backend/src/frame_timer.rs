use std::collections::VecDeque;
use std::time::Instant;

use log::{info, warn};
use parking_lot::Mutex;

/// Tracks throughput and latency of frame rendering. `mark_frame` is called
/// from the render loop only; the stats snapshot is safe from any thread.
pub struct FrameTimer {
    frame_periods: VecDeque<f64>,
    track_late_frames: bool,
    period_sum: f64,
    start_time: Instant,
    last_frame_time: Instant,
    last_report_time: Instant,
    late_frames: usize,

    target_frame_rate: i32,
    stats: Mutex<FrameTimerStats>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FrameTimerStats {
    pub target_frame_rate: i32,
    pub mean_frame_rate: f64,
    pub total_late_frames: usize,
}

impl FrameTimer {
    pub fn new(target_frame_rate: i32) -> FrameTimer {
        let now = Instant::now();
        FrameTimer {
            frame_periods: VecDeque::new(),
            track_late_frames: target_frame_rate > 0,
            period_sum: 0.0,
            start_time: now,
            last_frame_time: now,
            last_report_time: now,
            late_frames: 0,
            target_frame_rate,
            stats: Mutex::new(FrameTimerStats {
                target_frame_rate,
                ..Default::default()
            }),
        }
    }

    pub fn start(&mut self) {
        let now = Instant::now();
        self.start_time = now;
        self.last_frame_time = now;
        self.last_report_time = now;
    }

    pub fn mark_frame(&mut self) {
        let now = Instant::now();
        let period = now.duration_since(self.last_frame_time).as_secs_f64();
        self.last_frame_time = now;
        self.period_sum += period;
        self.frame_periods.push_back(period);

        if self.track_late_frames {
            let late_threshold = 1.5 / self.target_frame_rate as f64;
            if period >= late_threshold {
                self.late_frames += 1;
            }
            // Keep roughly two seconds of frame times in the window.
            while self.period_sum > 2.0 && self.frame_periods.len() > 1 {
                self.period_sum -= self.frame_periods.pop_front().unwrap();
            }
        }

        let mean_period = self.period_sum / self.frame_periods.len() as f64;
        let report_interval = now.duration_since(self.last_report_time).as_secs_f64();
        if self.track_late_frames && report_interval >= 10.0 {
            if self.late_frames > 0 {
                warn!(
                    "{} late frames in the last {:.1} seconds, mean frame rate {:.1} fps",
                    self.late_frames,
                    report_interval,
                    1.0 / mean_period
                );
            } else {
                info!("mean frame rate {:.1} fps", 1.0 / mean_period);
            }
            self.last_report_time = now;
            let mut stats = self.stats.lock();
            stats.total_late_frames += self.late_frames;
            self.late_frames = 0;
        }
        self.stats.lock().mean_frame_rate = 1.0 / mean_period;
    }

    pub fn elapsed_time(&self) -> f64 {
        self.last_frame_time
            .duration_since(self.start_time)
            .as_secs_f64()
    }

    pub fn stats(&self) -> FrameTimerStats {
        *self.stats.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_elapsed_time_across_marks() {
        let mut timer = FrameTimer::new(0);
        timer.start();
        std::thread::sleep(std::time::Duration::from_millis(20));
        timer.mark_frame();
        assert!(timer.elapsed_time() >= 0.02);
    }

    #[test]
    fn mean_frame_rate_reflects_period() {
        let mut timer = FrameTimer::new(60);
        timer.start();
        for _ in 0..5 {
            std::thread::sleep(std::time::Duration::from_millis(10));
            timer.mark_frame();
        }
        let stats = timer.stats();
        assert_eq!(60, stats.target_frame_rate);
        assert!(stats.mean_frame_rate > 0.0);
        assert!(stats.mean_frame_rate < 200.0);
    }
}
