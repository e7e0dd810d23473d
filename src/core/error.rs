use serde::Serialize;
use thiserror::Error;

/// 播放核心错误
///
/// 携带在 `PlaybackState::Failed` 与事件中，所以必须可克隆、可比较。
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
pub enum PlayerError {
    #[error("无法打开输入: {0}")]
    OpenFailure(String),

    #[error("无法读取流信息: {0}")]
    StreamInfoMissing(String),

    #[error("找不到媒体流: {0}")]
    StreamNotFound(String),

    #[error("找不到解码器: {0}")]
    CodecNotFound(String),

    #[error("无法打开解码器: {0}")]
    CodecOpenFailure(String),

    #[error("IO 错误: {0}")]
    Io(String),

    #[error("解码错误: {0}")]
    Decode(String),

    #[error("不支持的格式或功能: {0}")]
    Unsupported(String),

    #[error("音频设备错误: {0}")]
    AudioDevice(String),

    #[error("配置错误: {0}")]
    Config(String),

    #[error("当前状态不允许该操作: {0}")]
    InvalidState(String),
}

impl PlayerError {
    /// 打开输入阶段产生的错误（会话不会进入 Playing）
    pub fn is_open_time(&self) -> bool {
        matches!(
            self,
            PlayerError::OpenFailure(_)
                | PlayerError::StreamInfoMissing(_)
                | PlayerError::StreamNotFound(_)
                | PlayerError::CodecNotFound(_)
                | PlayerError::CodecOpenFailure(_)
                | PlayerError::Unsupported(_)
        )
    }

    /// 播放过程中由生产者上报的错误
    pub fn is_mid_stream(&self) -> bool {
        matches!(self, PlayerError::Io(_) | PlayerError::Decode(_))
    }
}

impl From<std::io::Error> for PlayerError {
    fn from(err: std::io::Error) -> Self {
        PlayerError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for PlayerError {
    fn from(err: serde_json::Error) -> Self {
        PlayerError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PlayerError>;
