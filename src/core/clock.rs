use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// 墙上时钟来源
///
/// 播放器所有"现在几点"的问题都问它，测试里可以换成手动推进的时钟。
pub trait WallClock: Send + Sync {
    fn now(&self) -> Instant;
}

/// 系统单调时钟
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl WallClock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// 手动推进的时钟（测试 / 离线渲染用）
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<Instant>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Arc::new(Mutex::new(Instant::now())),
        }
    }

    /// 向前推进
    pub fn advance(&self, delta: Duration) {
        let mut now = self.now.lock();
        *now += delta;
    }

    pub fn advance_secs(&self, secs: f64) {
        self.advance(Duration::try_from_secs_f64(secs).unwrap_or_default());
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl WallClock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock()
    }
}

/// 时钟锚点：(墙上时刻, 媒体时间)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClockAnchor {
    pub wall: Instant,
    pub media_time: f64,
}

impl ClockAnchor {
    pub fn new(wall: Instant, media_time: f64) -> Self {
        Self { wall, media_time }
    }

    /// 锚点之后经过的墙上时间（秒），早于锚点按 0 处理
    fn elapsed_secs(&self, now: Instant) -> f64 {
        now.saturating_duration_since(self.wall).as_secs_f64()
    }

    /// 媒体时间对应的墙上时刻
    pub fn wall_for(&self, media_time: f64) -> Instant {
        let offset = media_time - self.media_time;
        if offset >= 0.0 {
            self.wall + Duration::try_from_secs_f64(offset).unwrap_or_default()
        } else {
            let back = Duration::try_from_secs_f64(-offset).unwrap_or_default();
            self.wall.checked_sub(back).unwrap_or(self.wall)
        }
    }
}

/// 时钟校正器 - 从离散的帧到达推导连续前进的播放时间
///
/// 只在开始播放、暂停后恢复、seek 完成时重新锚定，
/// 锚定之间播放时间随墙上时间线性增长，不会跨越暂停 / seek 累积漂移。
#[derive(Debug, Default, Clone)]
pub struct ClockCorrector {
    anchor: Option<ClockAnchor>,
}

impl ClockCorrector {
    pub fn new() -> Self {
        Self { anchor: None }
    }

    /// 重新锚定
    pub fn reanchor(&mut self, wall: Instant, media_time: f64) {
        self.anchor = Some(ClockAnchor::new(wall, media_time));
    }

    /// 丢弃锚点（暂停、缓冲、seek 期间）
    pub fn clear(&mut self) {
        self.anchor = None;
    }

    pub fn anchor(&self) -> Option<ClockAnchor> {
        self.anchor
    }

    pub fn is_anchored(&self) -> bool {
        self.anchor.is_some()
    }

    /// 估算当前媒体时间：anchorMedia + (now - anchorWall)
    pub fn estimate(&self, now: Instant) -> Option<f64> {
        self.anchor
            .map(|anchor| anchor.media_time + anchor.elapsed_secs(now))
    }

    /// 校正间隔：已呈现的媒体时长 - 实际经过的墙上时长
    ///
    /// 为正表示画面跑在墙上时钟前面，下一次渲染应该推迟。
    pub fn correction_interval(&self, presented_media_time: f64, now: Instant) -> f64 {
        match self.anchor {
            Some(anchor) => {
                let played = presented_media_time - anchor.media_time;
                played - anchor.elapsed_secs(now)
            }
            None => 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_is_linear_in_wall_time() {
        let clock = ManualClock::new();
        let mut corrector = ClockCorrector::new();
        let anchor_wall = clock.now();
        corrector.reanchor(anchor_wall, 12.5);

        for millis in [0u64, 1, 40, 999, 5_000] {
            let delta = Duration::from_millis(millis);
            let expected = 12.5 + delta.as_secs_f64();
            assert_eq!(corrector.estimate(anchor_wall + delta), Some(expected));
        }
    }

    #[test]
    fn test_reanchor_returns_new_media_time_immediately() {
        let clock = ManualClock::new();
        let mut corrector = ClockCorrector::new();
        corrector.reanchor(clock.now(), 1.0);
        clock.advance_secs(3.0);

        let now = clock.now();
        corrector.reanchor(now, 42.0);
        assert_eq!(corrector.estimate(now), Some(42.0));
    }

    #[test]
    fn test_unanchored_has_no_estimate() {
        let corrector = ClockCorrector::new();
        assert_eq!(corrector.estimate(Instant::now()), None);
        assert_eq!(corrector.correction_interval(1.0, Instant::now()), 0.0);
    }

    #[test]
    fn test_now_before_anchor_clamps_to_zero() {
        let clock = ManualClock::new();
        let earlier = clock.now();
        clock.advance_secs(1.0);
        let mut corrector = ClockCorrector::new();
        corrector.reanchor(clock.now(), 5.0);
        assert_eq!(corrector.estimate(earlier), Some(5.0));
    }

    #[test]
    fn test_correction_interval_sign() {
        let clock = ManualClock::new();
        let mut corrector = ClockCorrector::new();
        corrector.reanchor(clock.now(), 0.0);
        clock.advance(Duration::from_millis(100));

        // 画面已经呈现到 0.2s，但只过了 0.1s：超前
        assert!(corrector.correction_interval(0.2, clock.now()) > 0.0);
        // 画面只呈现到 0.05s：落后
        assert!(corrector.correction_interval(0.05, clock.now()) < 0.0);
    }

    #[test]
    fn test_wall_for_maps_media_time_back() {
        let clock = ManualClock::new();
        let anchor = ClockAnchor::new(clock.now(), 10.0);
        assert_eq!(anchor.wall_for(10.5), anchor.wall + Duration::from_millis(500));
        assert_eq!(anchor.wall_for(10.0), anchor.wall);
    }
}
