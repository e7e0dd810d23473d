use crate::core::error::{PlayerError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// 播放时间的来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncSource {
    /// 墙上时钟外推（默认）
    Wall,
    /// 以音频实际消费的位置为主时钟
    Audio,
}

/// 渲染调度器由谁驱动
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerDriver {
    /// 独立线程按调度时刻触发
    Thread,
    /// 宿主（UI 循环 / 测试）调用 `Player::pump` 触发
    Manual,
}

/// 播放器配置
///
/// 时间单位统一为秒。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// 低水位：任一活动类型低于它时生产者恢复解码
    pub low_watermark: f64,
    /// 高水位：所有活动类型都达到它时生产者暂停，播放也在此时开始
    pub high_watermark: f64,
    /// 单一类型缓冲上限，防止稀疏的流让其它流无限增长
    pub buffer_ceiling: f64,
    /// 无帧可呈现时的调度间隔
    pub idle_tick_interval: f64,
    /// 播放中周期性上报当前时间的间隔
    pub time_observing_interval: f64,
    /// 源未给出帧率时，零时长视频帧使用的时长
    pub default_video_frame_duration: f64,
    pub sync_source: SyncSource,
    pub scheduler_driver: SchedulerDriver,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            low_watermark: 0.5,
            high_watermark: 2.0,
            buffer_ceiling: 8.0,
            idle_tick_interval: 0.01,
            time_observing_interval: 1.0,
            default_video_frame_duration: 0.04,
            sync_source: SyncSource::Wall,
            scheduler_driver: SchedulerDriver::Thread,
        }
    }
}

impl PlayerConfig {
    /// 从 JSON 字符串解析（缺省字段取默认值）
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: PlayerConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// 从 JSON 文件加载
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            PlayerError::Config(format!("无法读取配置文件 {}: {}", path.as_ref().display(), e))
        })?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        let finite_positive = |name: &str, value: f64| {
            if value.is_finite() && value > 0.0 {
                Ok(())
            } else {
                Err(PlayerError::Config(format!("{} 必须为正数，当前为 {}", name, value)))
            }
        };

        finite_positive("low_watermark", self.low_watermark)?;
        finite_positive("high_watermark", self.high_watermark)?;
        finite_positive("buffer_ceiling", self.buffer_ceiling)?;
        finite_positive("idle_tick_interval", self.idle_tick_interval)?;
        finite_positive("time_observing_interval", self.time_observing_interval)?;
        finite_positive("default_video_frame_duration", self.default_video_frame_duration)?;

        if self.low_watermark >= self.high_watermark {
            return Err(PlayerError::Config(format!(
                "low_watermark ({}) 必须小于 high_watermark ({})",
                self.low_watermark, self.high_watermark
            )));
        }
        if self.high_watermark > self.buffer_ceiling {
            return Err(PlayerError::Config(format!(
                "high_watermark ({}) 不能超过 buffer_ceiling ({})",
                self.high_watermark, self.buffer_ceiling
            )));
        }
        Ok(())
    }

    pub fn low(&self) -> Duration {
        secs(self.low_watermark)
    }

    pub fn high(&self) -> Duration {
        secs(self.high_watermark)
    }

    pub fn ceiling(&self) -> Duration {
        secs(self.buffer_ceiling)
    }

    pub fn idle_interval(&self) -> Duration {
        secs(self.idle_tick_interval)
    }

    pub fn time_observing(&self) -> Duration {
        secs(self.time_observing_interval)
    }
}

/// 秒 -> Duration，负数 / NaN 按 0 处理
pub fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or_default()
}
