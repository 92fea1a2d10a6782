//! 帧统计
//!
//! FrameMetrics 跟踪帧率、CPU 在 `begin_frame` 中等待 GPU 的时间以及停滞次数。

use std::time::{Duration, Instant};

/// 一个统计窗口（约一秒）的结果
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricsSnapshot {
    pub fps: f32,
    pub frame_time_ms: f32,
    /// 窗口内平均每帧等待 GPU 的时间
    pub avg_wait_ms: f32,
}

/// 帧统计
pub struct FrameMetrics {
    frame_count: u32,
    window_wait: Duration,
    last_update: Instant,
    fps: f32,
    frame_time_ms: f32,
    total_frames: u64,
    total_wait: Duration,
    stalls: u64,
}

impl FrameMetrics {
    pub fn new() -> Self {
        Self::starting_at(Instant::now())
    }

    /// 以给定时刻作为第一个统计窗口的起点
    pub fn starting_at(start: Instant) -> Self {
        Self {
            frame_count: 0,
            window_wait: Duration::ZERO,
            last_update: start,
            fps: 0.0,
            frame_time_ms: 0.0,
            total_frames: 0,
            total_wait: Duration::ZERO,
            stalls: 0,
        }
    }

    /// 记录 `begin_frame` 中等待 GPU 的时间
    pub fn record_wait(&mut self, waited: Duration) {
        self.window_wait += waited;
        self.total_wait += waited;
    }

    /// 记录一次 GPU 停滞
    pub fn record_stall(&mut self) {
        self.stalls += 1;
    }

    /// 记录一帧
    pub fn record_frame(&mut self) -> Option<MetricsSnapshot> {
        self.record_frame_at(Instant::now())
    }

    /// 在给定时刻记录一帧；每过一秒返回一次窗口统计
    pub fn record_frame_at(&mut self, now: Instant) -> Option<MetricsSnapshot> {
        self.frame_count += 1;
        self.total_frames += 1;

        let elapsed = now.saturating_duration_since(self.last_update);
        if elapsed < Duration::from_secs(1) {
            return None;
        }

        self.fps = self.frame_count as f32 / elapsed.as_secs_f32();
        self.frame_time_ms = 1000.0 / self.fps;
        let snapshot = MetricsSnapshot {
            fps: self.fps,
            frame_time_ms: self.frame_time_ms,
            avg_wait_ms: self.window_wait.as_secs_f32() * 1000.0 / self.frame_count as f32,
        };

        self.frame_count = 0;
        self.window_wait = Duration::ZERO;
        self.last_update = now;
        Some(snapshot)
    }

    pub fn fps(&self) -> f32 {
        self.fps
    }

    pub fn frame_time_ms(&self) -> f32 {
        self.frame_time_ms
    }

    /// 呈现过的总帧数
    pub fn total_frames(&self) -> u64 {
        self.total_frames
    }

    /// 累计等待 GPU 的时间
    pub fn total_wait(&self) -> Duration {
        self.total_wait
    }

    pub fn stalls(&self) -> u64 {
        self.stalls
    }
}

impl Default for FrameMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fps_window() {
        let start = Instant::now();
        let mut metrics = FrameMetrics::starting_at(start);

        for i in 1..60 {
            metrics.record_wait(Duration::from_millis(2));
            assert!(metrics.record_frame_at(start + Duration::from_millis(i * 16)).is_none());
        }
        metrics.record_wait(Duration::from_millis(2));
        let snapshot = metrics.record_frame_at(start + Duration::from_secs(1)).unwrap();

        assert!((snapshot.fps - 60.0).abs() < 0.01);
        assert!((snapshot.frame_time_ms - 16.666).abs() < 0.01);
        assert!((snapshot.avg_wait_ms - 2.0).abs() < 0.01);
        assert_eq!(metrics.total_frames(), 60);
        assert_eq!(metrics.total_wait(), Duration::from_millis(120));
    }

    #[test]
    fn test_stall_counter() {
        let mut metrics = FrameMetrics::new();
        metrics.record_stall();
        metrics.record_stall();
        assert_eq!(metrics.stalls(), 2);
        assert_eq!(metrics.fps(), 0.0);
    }
}
