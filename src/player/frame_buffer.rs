//! 帧缓冲：每种媒体类型一个独立加锁的有序队列，外加单槽封面图。
//!
//! 音频队列会在实时音频线程上被访问，所以每个临界区只做队列增删，
//! 不做解码、IO 或任何阻塞调用。

use crate::core::{secs, ArtworkFrame, AudioFrame, Frame, FrameKind, SubtitleFrame, TimedFrame, VideoFrame};
use crossbeam_channel::{bounded, Receiver, Sender};
use log::debug;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

/// 单一类型的帧队列
///
/// 缓冲时长计数在 push/pop 时增量维护，用整数纳秒的 `Duration` 累加，不会漂移。
#[derive(Debug)]
pub struct FrameQueue<T> {
    frames: VecDeque<T>,
    buffered: Duration,
    epoch: u64,
}

impl<T: TimedFrame> FrameQueue<T> {
    fn new() -> Self {
        Self {
            frames: VecDeque::new(),
            buffered: Duration::ZERO,
            epoch: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// 剩余帧时长之和
    pub fn buffered_duration(&self) -> Duration {
        self.buffered
    }

    pub fn front(&self) -> Option<&T> {
        self.frames.front()
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        self.frames.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.frames.iter()
    }

    /// 取出最早的一帧
    pub fn pop(&mut self) -> Option<T> {
        let frame = self.frames.pop_front()?;
        self.buffered = self.buffered.saturating_sub(frame_span(&frame));
        Some(frame)
    }

    fn push(&mut self, frame: T) {
        self.buffered += frame_span(&frame);
        self.frames.push_back(frame);
    }

    fn clear(&mut self) -> usize {
        let count = self.frames.len();
        self.frames.clear();
        self.buffered = Duration::ZERO;
        self.epoch = self.epoch.wrapping_add(1);
        count
    }
}

fn frame_span<T: TimedFrame>(frame: &T) -> Duration {
    secs(frame.duration())
}

/// 各类型队列的清空代数
///
/// 生产者用它标记自己的 push；清空之后旧代数的帧会被丢弃。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BufferEpochs {
    pub video: u64,
    pub audio: u64,
    pub subtitle: u64,
}

/// 参与水位判断的类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ActiveKinds {
    pub video: bool,
    pub audio: bool,
}

impl ActiveKinds {
    pub fn any(&self) -> bool {
        self.video || self.audio
    }
}

/// 帧缓冲
pub struct FrameBuffer {
    video: Mutex<FrameQueue<VideoFrame>>,
    audio: Mutex<FrameQueue<AudioFrame>>,
    subtitle: Mutex<FrameQueue<SubtitleFrame>>,
    artwork: Mutex<Option<Arc<ArtworkFrame>>>,
    exhausted: Mutex<Option<BufferEpochs>>,
    low_watermark: Duration,
    drain_tx: Sender<()>,
    drain_rx: Receiver<()>,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::with_low_watermark(Duration::from_millis(500))
    }

    /// `low_watermark`：视频 / 音频降到它以下时发出排空信号
    pub fn with_low_watermark(low_watermark: Duration) -> Self {
        // 容量 1：信号只表达"有人降到低水位以下了"，多次合并成一次
        let (drain_tx, drain_rx) = bounded(1);
        Self {
            video: Mutex::new(FrameQueue::new()),
            audio: Mutex::new(FrameQueue::new()),
            subtitle: Mutex::new(FrameQueue::new()),
            artwork: Mutex::new(None),
            exhausted: Mutex::new(None),
            low_watermark,
            drain_tx,
            drain_rx,
        }
    }

    /// 排空信号接收端（生产者在背压挂起时等待它）
    pub fn drain_signal(&self) -> Receiver<()> {
        self.drain_rx.clone()
    }

    // ========== push ==========

    /// 按类型拆分一批帧并追加到各自队列
    pub fn push_frames(&self, batch: Vec<Frame>) {
        let epochs = self.epochs();
        self.push_frames_for(batch, &epochs);
    }

    /// 带代数的 push：某类型的代数与当前不一致时，该类型的帧被丢弃
    ///
    /// 返回实际入队的帧数。
    pub fn push_frames_for(&self, batch: Vec<Frame>, epochs: &BufferEpochs) -> usize {
        let mut videos = Vec::new();
        let mut audios = Vec::new();
        let mut subtitles = Vec::new();
        let mut artwork = None;

        for frame in batch {
            match frame {
                Frame::Video(f) => videos.push(f),
                Frame::Audio(f) => audios.push(f),
                Frame::Subtitle(f) => subtitles.push(f),
                Frame::Artwork(f) => artwork = Some(f),
            }
        }

        let mut accepted = 0;
        accepted += Self::append(&self.video, videos, epochs.video);
        accepted += Self::append(&self.audio, audios, epochs.audio);
        accepted += Self::append(&self.subtitle, subtitles, epochs.subtitle);

        if let Some(artwork) = artwork {
            *self.artwork.lock() = Some(Arc::new(artwork));
            accepted += 1;
        }

        accepted
    }

    fn append<T: TimedFrame>(queue: &Mutex<FrameQueue<T>>, frames: Vec<T>, epoch: u64) -> usize {
        if frames.is_empty() {
            return 0;
        }
        let mut queue = queue.lock();
        if queue.epoch != epoch {
            debug!("丢弃 {} 帧过期数据（代数 {} != {}）", frames.len(), epoch, queue.epoch);
            return 0;
        }
        let count = frames.len();
        for frame in frames {
            queue.push(frame);
        }
        count
    }

    // ========== pop ==========

    pub fn pop_video_frame(&self) -> Option<VideoFrame> {
        let mut queue = self.video.lock();
        let frame = queue.pop()?;
        let level = queue.buffered;
        drop(queue);
        self.signal_if_low(level);
        Some(frame)
    }

    /// 实时线程调用：只持有音频锁做一次出队
    pub fn pop_audio_frame(&self) -> Option<AudioFrame> {
        let mut queue = self.audio.lock();
        let frame = queue.pop()?;
        let level = queue.buffered;
        drop(queue);
        self.signal_if_low(level);
        Some(frame)
    }

    pub fn pop_subtitle_frame(&self) -> Option<SubtitleFrame> {
        self.subtitle.lock().pop()
    }

    fn signal_if_low(&self, level: Duration) {
        if level < self.low_watermark {
            // 满了说明已有未处理的信号，直接丢弃
            let _ = self.drain_tx.try_send(());
        }
    }

    // ========== 作用域访问 ==========

    /// 在视频锁内执行复合的"先看再取"逻辑
    pub fn with_video<R>(&self, action: impl FnOnce(&mut FrameQueue<VideoFrame>) -> R) -> R {
        let mut queue = self.video.lock();
        let result = action(&mut queue);
        let level = queue.buffered;
        drop(queue);
        self.signal_if_low(level);
        result
    }

    pub fn with_audio<R>(&self, action: impl FnOnce(&mut FrameQueue<AudioFrame>) -> R) -> R {
        let mut queue = self.audio.lock();
        let result = action(&mut queue);
        let level = queue.buffered;
        drop(queue);
        self.signal_if_low(level);
        result
    }

    pub fn with_subtitles<R>(&self, action: impl FnOnce(&mut FrameQueue<SubtitleFrame>) -> R) -> R {
        action(&mut self.subtitle.lock())
    }

    // ========== 查询 ==========

    pub fn buffered_video_duration(&self) -> Duration {
        self.video.lock().buffered
    }

    pub fn buffered_audio_duration(&self) -> Duration {
        self.audio.lock().buffered
    }

    pub fn buffered_subtitle_duration(&self) -> Duration {
        self.subtitle.lock().buffered
    }

    /// 某类型的缓冲时长（封面图恒为 0）
    pub fn buffered_duration(&self, kind: FrameKind) -> Duration {
        match kind {
            FrameKind::Video => self.buffered_video_duration(),
            FrameKind::Audio => self.buffered_audio_duration(),
            FrameKind::Subtitle => self.buffered_subtitle_duration(),
            FrameKind::Artwork => Duration::ZERO,
        }
    }

    pub fn frame_count(&self, kind: FrameKind) -> usize {
        match kind {
            FrameKind::Video => self.video.lock().len(),
            FrameKind::Audio => self.audio.lock().len(),
            FrameKind::Subtitle => self.subtitle.lock().len(),
            FrameKind::Artwork => usize::from(self.artwork.lock().is_some()),
        }
    }

    /// 队首帧的媒体时间
    pub fn next_position(&self, kind: FrameKind) -> Option<f64> {
        match kind {
            FrameKind::Video => self.video.lock().front().map(|f| f.position()),
            FrameKind::Audio => self.audio.lock().front().map(|f| f.position()),
            FrameKind::Subtitle => self.subtitle.lock().front().map(|f| f.position()),
            FrameKind::Artwork => None,
        }
    }

    pub fn artwork(&self) -> Option<Arc<ArtworkFrame>> {
        self.artwork.lock().clone()
    }

    /// 所有活动类型的缓冲时长都不低于 `threshold`
    pub fn all_at_least(&self, kinds: ActiveKinds, threshold: Duration) -> bool {
        (!kinds.video || self.buffered_video_duration() >= threshold)
            && (!kinds.audio || self.buffered_audio_duration() >= threshold)
    }

    /// 任一活动类型的缓冲时长达到 `threshold`
    pub fn any_at_least(&self, kinds: ActiveKinds, threshold: Duration) -> bool {
        (kinds.video && self.buffered_video_duration() >= threshold)
            || (kinds.audio && self.buffered_audio_duration() >= threshold)
    }

    // ========== 清空 ==========

    pub fn purge(&self) {
        self.purge_video();
        self.purge_audio();
        self.purge_subtitle();
        self.purge_artwork();
    }

    pub fn purge_video(&self) {
        let count = self.video.lock().clear();
        if count > 0 {
            debug!("🗑️  清空视频帧队列: {} 帧", count);
        }
    }

    pub fn purge_audio(&self) {
        let count = self.audio.lock().clear();
        if count > 0 {
            debug!("🗑️  清空音频帧队列: {} 帧", count);
        }
    }

    pub fn purge_subtitle(&self) {
        let count = self.subtitle.lock().clear();
        if count > 0 {
            debug!("🗑️  清空字幕帧队列: {} 帧", count);
        }
    }

    pub fn purge_artwork(&self) {
        self.artwork.lock().take();
    }

    // ========== 代数与源耗尽 ==========

    pub fn epochs(&self) -> BufferEpochs {
        BufferEpochs {
            video: self.video.lock().epoch,
            audio: self.audio.lock().epoch,
            subtitle: self.subtitle.lock().epoch,
        }
    }

    /// 标记源已耗尽（当前代数）
    pub fn mark_source_exhausted(&self) {
        let epochs = self.epochs();
        self.mark_source_exhausted_for(&epochs);
    }

    /// 标记源已耗尽；之后任何清空都会让这个标记失效
    pub fn mark_source_exhausted_for(&self, epochs: &BufferEpochs) {
        *self.exhausted.lock() = Some(*epochs);
    }

    pub fn is_source_exhausted(&self) -> bool {
        let marked = *self.exhausted.lock();
        marked.is_some_and(|epochs| epochs == self.epochs())
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}
