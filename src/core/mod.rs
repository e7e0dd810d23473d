// 核心类型：帧、会话、时钟、配置与错误

pub mod clock;
pub mod config;
pub mod error;
pub mod types;

pub use clock::{ClockAnchor, ClockCorrector, ManualClock, SystemClock, WallClock};
pub use config::{secs, PlayerConfig, SchedulerDriver, SyncSource};
pub use error::{PlayerError, Result};
pub use types::*;
