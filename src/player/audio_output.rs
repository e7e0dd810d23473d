use crate::core::{AudioFrame, ClockAnchor, Result, TimedFrame, WallClock};
use crate::player::audio_device::AudioDevice;
use crate::player::frame_buffer::FrameBuffer;
use crossbeam::atomic::AtomicCell;
use log::info;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// 音频与墙上时钟允许的偏差（秒）
const AUDIO_SYNC_TOLERANCE: f64 = 0.1;

const SAMPLE_BYTES: usize = std::mem::size_of::<f32>();

/// 正在被消费的音频帧 + 已消费的字节偏移
///
/// 一帧可以跨多次回调被消费完，不需要重新拷贝或丢弃剩余部分。
#[derive(Debug)]
pub struct RawAudioConsumptionState {
    frame: AudioFrame,
    offset: usize,
    /// 按整样本截断后的可用长度
    usable: usize,
}

impl RawAudioConsumptionState {
    pub fn new(frame: AudioFrame) -> Self {
        let len = frame.byte_len();
        Self {
            frame,
            offset: 0,
            usable: len - len % SAMPLE_BYTES,
        }
    }

    pub fn remaining(&self) -> &[u8] {
        &self.frame.samples()[self.offset..self.usable]
    }

    pub fn is_exhausted(&self) -> bool {
        self.offset >= self.usable
    }

    /// 还没有被消费过
    pub fn is_fresh(&self) -> bool {
        self.offset == 0
    }

    fn advance(&mut self, bytes: usize) {
        self.offset = (self.offset + bytes).min(self.usable);
    }

    /// 已消费部分对应的媒体时间
    pub fn position(&self) -> f64 {
        if self.usable == 0 {
            return self.frame.position();
        }
        self.frame.position() + self.frame.duration() * (self.offset as f64 / self.usable as f64)
    }

    pub fn frame(&self) -> &AudioFrame {
        &self.frame
    }
}

/// 播放器与实时回调之间共享的状态（全部无锁）
#[derive(Debug)]
struct AudioShared {
    /// seek / 缓冲期间输出静音且不出队
    hold: AtomicBool,
    /// 每次 flush 加一，回调看到变化后丢弃未消费完的帧
    flush_epoch: AtomicU64,
    played_position: AtomicCell<f64>,
    consumed: AtomicCell<f64>,
    flowing: AtomicBool,
    /// 墙上时钟锚点；为 None 时不做漂移校正
    anchor: AtomicCell<Option<ClockAnchor>>,
}

/// 实时拉取逻辑
///
/// 不加锁（除了帧缓冲的音频临界区）、不分配、不记日志。
pub struct AudioPull {
    buffer: Arc<FrameBuffer>,
    shared: Arc<AudioShared>,
    clock: Arc<dyn WallClock>,
    pending: Option<RawAudioConsumptionState>,
    seen_flush_epoch: u64,
}

impl AudioPull {
    fn new(buffer: Arc<FrameBuffer>, shared: Arc<AudioShared>, clock: Arc<dyn WallClock>) -> Self {
        let seen_flush_epoch = shared.flush_epoch.load(Ordering::SeqCst);
        Self {
            buffer,
            shared,
            clock,
            pending: None,
            seen_flush_epoch,
        }
    }

    /// 填满交错 f32 缓冲，样本不够时补零
    pub fn fill(&mut self, out: &mut [f32]) {
        let flush_epoch = self.shared.flush_epoch.load(Ordering::SeqCst);
        if flush_epoch != self.seen_flush_epoch {
            self.seen_flush_epoch = flush_epoch;
            self.pending = None;
        }

        if self.shared.hold.load(Ordering::SeqCst) {
            out.fill(0.0);
            self.shared.flowing.store(false, Ordering::SeqCst);
            return;
        }

        let media_now = self.media_now();
        let out_bytes: &mut [u8] = bytemuck::cast_slice_mut(out);
        let mut written = 0;

        while written < out_bytes.len() {
            if self.pending.is_none() && !self.next_frame(media_now) {
                break;
            }
            let Some(state) = self.pending.as_mut() else {
                break;
            };
            // 超前墙上时钟太多：本次输出静音，帧留到之后
            if state.is_fresh() && media_now.is_some_and(|now| state.frame().position() > now + AUDIO_SYNC_TOLERANCE) {
                break;
            }

            let chunk = state.remaining();
            let count = chunk.len().min(out_bytes.len() - written);
            out_bytes[written..written + count].copy_from_slice(&chunk[..count]);
            state.advance(count);
            written += count;
            self.shared.played_position.store(state.position());

            if state.is_exhausted() {
                let duration = state.frame().duration();
                self.shared.consumed.store(self.shared.consumed.load() + duration);
                self.pending = None;
            }
        }

        // 欠载：补零，不是错误
        out_bytes[written..].fill(0);
        self.shared.flowing.store(written > 0, Ordering::SeqCst);
    }

    /// 由墙上时钟锚点估算的当前媒体时间
    fn media_now(&self) -> Option<f64> {
        self.shared
            .anchor
            .load()
            .map(|anchor| anchor.media_time + self.clock.now().saturating_duration_since(anchor.wall).as_secs_f64())
    }

    /// 取下一帧；落后墙上时钟太多的帧直接丢弃
    fn next_frame(&mut self, media_now: Option<f64>) -> bool {
        while let Some(frame) = self.buffer.pop_audio_frame() {
            let late = media_now.is_some_and(|now| frame.position() + frame.duration() < now - AUDIO_SYNC_TOLERANCE);
            if late {
                self.shared.consumed.store(self.shared.consumed.load() + frame.duration());
                continue;
            }
            self.pending = Some(RawAudioConsumptionState::new(frame));
            return true;
        }
        false
    }
}

/// 音频输出 - 把帧缓冲里的音频交给平台设备
pub struct AudioOutput {
    device: Box<dyn AudioDevice>,
    buffer: Arc<FrameBuffer>,
    clock: Arc<dyn WallClock>,
    shared: Arc<AudioShared>,
}

impl AudioOutput {
    pub fn new(device: Box<dyn AudioDevice>, buffer: Arc<FrameBuffer>, clock: Arc<dyn WallClock>) -> Self {
        info!("初始化音频输出: {} Hz, {} 声道", device.sample_rate(), device.channels());
        Self {
            device,
            buffer,
            clock,
            shared: Arc::new(AudioShared {
                hold: AtomicBool::new(false),
                flush_epoch: AtomicU64::new(0),
                played_position: AtomicCell::new(0.0),
                consumed: AtomicCell::new(0.0),
                flowing: AtomicBool::new(false),
                anchor: AtomicCell::new(None),
            }),
        }
    }

    /// 开始播放（每次启动都建立新的拉取状态）
    pub fn start(&mut self) -> Result<()> {
        if self.device.is_running() {
            return Ok(());
        }

        let mut pull = AudioPull::new(self.buffer.clone(), self.shared.clone(), self.clock.clone());
        self.device.start(Box::new(move |data: &mut [f32]| pull.fill(data)))?;
        info!("音频输出已启动");
        Ok(())
    }

    /// 停止播放
    pub fn stop(&mut self) {
        if self.device.is_running() {
            self.device.stop();
            self.shared.flowing.store(false, Ordering::SeqCst);
            info!("音频输出已停止");
        }
    }

    pub fn is_running(&self) -> bool {
        self.device.is_running()
    }

    /// 保持静音且不消费（seek / 缓冲期间）
    pub fn set_hold(&self, hold: bool) {
        self.shared.hold.store(hold, Ordering::SeqCst);
    }

    pub fn is_held(&self) -> bool {
        self.shared.hold.load(Ordering::SeqCst)
    }

    /// 丢弃回调里尚未消费完的帧，并把播放位置重置到 `position`
    pub fn flush(&self, position: f64) {
        self.shared.flush_epoch.fetch_add(1, Ordering::SeqCst);
        self.shared.played_position.store(position);
        self.shared.flowing.store(false, Ordering::SeqCst);
    }

    /// 设置漂移校正使用的墙上时钟锚点
    pub fn set_anchor(&self, anchor: Option<ClockAnchor>) {
        self.shared.anchor.store(anchor);
    }

    /// 最近交给设备的样本对应的媒体时间
    pub fn played_position(&self) -> f64 {
        self.shared.played_position.load()
    }

    /// 累计消费的音频媒体时长
    pub fn consumed_time(&self) -> f64 {
        self.shared.consumed.load()
    }

    /// 最近一次回调是否拿到了样本
    pub fn is_flowing(&self) -> bool {
        self.shared.flowing.load(Ordering::SeqCst)
    }

    pub fn sample_rate(&self) -> u32 {
        self.device.sample_rate()
    }

    pub fn channels(&self) -> u16 {
        self.device.channels()
    }
}

impl Drop for AudioOutput {
    fn drop(&mut self) {
        self.stop();
    }
}
