use crate::core::{PlaybackState, StreamInfo};
use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::Serialize;

/// 播放器事件
///
/// 按发生顺序投递，每次发生恰好一次。
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "value", rename_all = "snake_case")]
pub enum PlayerEvent {
    /// 输入已打开，可以开始播放
    PreparedToPlay(StreamInfo),
    StateChanged(PlaybackState),
    BufferingChanged(bool),
    SeekingChanged(bool),
    /// 当前时间（秒）
    TimeUpdated(f64),
    /// 正常播放到末尾
    FinishedPlaying,
}

/// 事件分发：每个订阅者一个无界通道
#[derive(Default)]
pub struct EventHub {
    subscribers: Vec<Sender<PlayerEvent>>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self) -> Receiver<PlayerEvent> {
        let (tx, rx) = unbounded();
        self.subscribers.push(tx);
        rx
    }

    /// 发送给所有订阅者，顺便清理已断开的接收端
    pub fn emit(&mut self, event: PlayerEvent) {
        log::debug!("📣 事件: {:?}", event);
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}
