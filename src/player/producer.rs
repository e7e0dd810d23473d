use crate::core::{Frame, PlayerConfig, PlayerError, Result, StreamInfo, TimedFrame};
use crate::player::frame_buffer::{ActiveKinds, BufferEpochs, FrameBuffer};
use crate::player::frame_source::{DecodeOutcome, FrameSource, InterruptFlag};
use crate::player::input_set::{ExternalInput, InputSet};
use crate::player::log_ctx;
use crossbeam_channel::{select, unbounded, Receiver, Sender};
use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// 背压挂起 / 源耗尽时等待命令的轮询间隔
const COMMAND_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// 生产者线程命令
///
/// 带 `epochs` 的命令会让之后的 push 使用播放器清空后的代数。
#[derive(Debug)]
pub enum ProducerCommand {
    Seek { position: f64, epochs: BufferEpochs },
    ActivateAudio { index: Option<usize>, epochs: BufferEpochs },
    ActivateSubtitle { index: Option<usize>, epochs: BufferEpochs },
    SetDeinterlacing(bool),
    /// 挂载已打开的外挂输入
    AttachExternal(ExternalInput),
    Stop,
}

/// 生产者向播放器上报致命错误
pub trait ProducerObserver: Send + Sync {
    fn on_failure(&self, error: PlayerError);
}

/// 生产者线程的共享状态
#[derive(Debug, Default)]
pub struct ProducerStatus {
    suspended: AtomicBool,
    running: AtomicBool,
}

impl ProducerStatus {
    /// 因背压挂起（缓冲已满）
    pub fn is_suspended(&self) -> bool {
        self.suspended.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn set_suspended(&self, value: bool) {
        self.suspended.store(value, Ordering::SeqCst);
    }
}

/// 生产者参数
#[derive(Debug, Clone)]
pub struct ProducerSettings {
    pub low_watermark: Duration,
    pub high_watermark: Duration,
    pub buffer_ceiling: Duration,
    pub active: ActiveKinds,
    /// 零时长视频帧使用的时长
    pub nominal_video_duration: f64,
}

impl ProducerSettings {
    pub fn new(config: &PlayerConfig, info: &StreamInfo, active: ActiveKinds) -> Self {
        Self {
            low_watermark: config.low(),
            high_watermark: config.high(),
            buffer_ceiling: config.ceiling(),
            active,
            nominal_video_duration: info
                .nominal_frame_duration()
                .unwrap_or(config.default_video_frame_duration),
        }
    }
}

/// 生产者线程依赖的共享对象
#[derive(Clone)]
pub struct ProducerContext {
    pub buffer: Arc<FrameBuffer>,
    pub interrupt: InterruptFlag,
    pub status: Arc<ProducerStatus>,
    pub observer: Arc<dyn ProducerObserver>,
}

/// 生产者线程管理器
///
/// 线程从输入集合拉取帧批次写入 FrameBuffer，按水位挂起 / 恢复。
/// 线程结束时把输入集合交还给 `stop()` 的调用方。
pub struct Producer {
    thread_handle: Option<JoinHandle<InputSet>>,
    command_tx: Sender<ProducerCommand>,
    interrupt: InterruptFlag,
}

impl Producer {
    /// 启动生产者线程
    ///
    /// `start_position` 不为空时，线程在第一次解码前先定位到该位置。
    pub fn start(
        source: InputSet,
        context: ProducerContext,
        settings: ProducerSettings,
        epochs: BufferEpochs,
        start_position: Option<f64>,
    ) -> Result<Self> {
        let (command_tx, command_rx) = unbounded::<ProducerCommand>();
        let interrupt = context.interrupt.clone();

        context.interrupt.clear();
        context.status.running.store(true, Ordering::SeqCst);

        let thread_handle = thread::Builder::new()
            .name("frame-producer".to_string())
            .spawn(move || {
                let mut worker = ProducerWorker::new(source, context, settings, epochs, command_rx);
                worker.run(start_position);
                worker.finish()
            })
            .map_err(|e| PlayerError::Io(format!("无法启动生产者线程: {}", e)))?;

        Ok(Self {
            thread_handle: Some(thread_handle),
            command_tx,
            interrupt,
        })
    }

    /// 发送命令（线程已退出时静默忽略）
    pub fn send(&self, command: ProducerCommand) {
        if self.command_tx.send(command).is_err() {
            debug!("生产者线程已退出，命令被忽略");
        }
    }

    pub fn seek(&self, position: f64, epochs: BufferEpochs) {
        self.send(ProducerCommand::Seek { position, epochs });
    }

    pub fn is_finished(&self) -> bool {
        self.thread_handle.as_ref().map_or(true, |h| h.is_finished())
    }

    /// 停止线程并取回输入集合
    ///
    /// - 置位中断标志，打断正在进行的解码
    /// - 发送 Stop 命令
    /// - join 线程
    pub fn stop(&mut self) -> Option<InputSet> {
        info!("{} 🛑 Producer::stop() called", log_ctx());
        self.interrupt.raise();
        let _ = self.command_tx.send(ProducerCommand::Stop);

        let handle = self.thread_handle.take()?;
        match handle.join() {
            Ok(source) => Some(source),
            Err(_) => {
                error!("{} ❌ 生产者线程 panic，输入已丢失", log_ctx());
                None
            }
        }
    }
}

impl Drop for Producer {
    fn drop(&mut self) {
        if self.thread_handle.is_some() {
            warn!("{} ⚠ Producer 被 drop，但未调用 stop()，正在尝试优雅停止", log_ctx());
            if let Some(mut source) = self.stop() {
                source.close();
            }
        }
    }
}

/// 线程内部状态
struct ProducerWorker {
    source: InputSet,
    context: ProducerContext,
    settings: ProducerSettings,
    epochs: BufferEpochs,
    command_rx: Receiver<ProducerCommand>,
    drain_rx: Receiver<()>,
    normaliser: FrameNormaliser,
    exhausted: bool,
    batch_count: usize,
}

impl ProducerWorker {
    fn new(
        source: InputSet,
        context: ProducerContext,
        settings: ProducerSettings,
        epochs: BufferEpochs,
        command_rx: Receiver<ProducerCommand>,
    ) -> Self {
        let drain_rx = context.buffer.drain_signal();
        let normaliser = FrameNormaliser::new(settings.nominal_video_duration);
        Self {
            source,
            context,
            settings,
            epochs,
            command_rx,
            drain_rx,
            normaliser,
            exhausted: false,
            batch_count: 0,
        }
    }

    fn run(&mut self, start_position: Option<f64>) {
        info!("{} 🎬 生产者线程启动: {}", log_ctx(), self.source.description());

        if let Some(position) = start_position {
            let epochs = self.epochs;
            if !self.handle_command(ProducerCommand::Seek { position, epochs }) {
                return;
            }
        }

        loop {
            // 优先处理所有命令（非阻塞）
            while let Ok(command) = self.command_rx.try_recv() {
                if !self.handle_command(command) {
                    return;
                }
            }

            if self.exhausted {
                // 到达末尾：不忙等，等待 Seek / 切换流 / Stop
                if !self.wait_for_command() {
                    return;
                }
                continue;
            }

            if self.should_suspend() {
                if !self.suspend() {
                    return;
                }
                continue;
            }

            match self.source.decode_next(&self.context.interrupt) {
                Ok(DecodeOutcome::Frames(mut batch)) => {
                    self.batch_count += 1;
                    for frame in batch.iter_mut() {
                        self.normaliser.normalise(frame);
                    }
                    let accepted = self.context.buffer.push_frames_for(batch, &self.epochs);
                    if self.batch_count <= 3 || self.batch_count % 100 == 0 {
                        debug!("{} 📦 生产者写入批次 #{}（{} 帧）", log_ctx(), self.batch_count, accepted);
                    }
                }
                Ok(DecodeOutcome::EndOfStream) => {
                    info!("{} 📄 FrameSource 到达末尾，等待命令（Seek/Stop）...", log_ctx());
                    self.context.buffer.mark_source_exhausted_for(&self.epochs);
                    self.exhausted = true;
                }
                Ok(DecodeOutcome::Interrupted) => {
                    debug!("{} ⏸ 解码被中断，等待命令", log_ctx());
                    if !self.wait_for_command() {
                        return;
                    }
                }
                Err(e) if self.context.interrupt.is_raised() => {
                    debug!("{} ⏸ 中断期间的解码错误被忽略: {}", log_ctx(), e);
                    if !self.wait_for_command() {
                        return;
                    }
                }
                Err(e) => {
                    error!("{} ❌ 解码失败: {}", log_ctx(), e);
                    self.context.observer.on_failure(e);
                    return;
                }
            }
        }
    }

    /// 返回 false 表示线程应退出
    fn handle_command(&mut self, command: ProducerCommand) -> bool {
        match command {
            ProducerCommand::Seek { position, epochs } => {
                info!("{} ⏩ 生产者收到 Seek 命令: {:.3}s", log_ctx(), position);
                self.epochs = epochs;
                self.exhausted = false;
                self.normaliser.reset();
                self.context.interrupt.clear();

                if let Err(e) = self.source.reposition(position, &self.context.interrupt) {
                    if self.context.interrupt.is_raised() {
                        debug!("{} Seek 被新的请求打断: {}", log_ctx(), e);
                    } else {
                        error!("{} ❌ Seek 失败: {}", log_ctx(), e);
                        self.context.observer.on_failure(e);
                        return false;
                    }
                }
            }
            ProducerCommand::ActivateAudio { index, epochs } => {
                info!("{} 🔊 切换音频流: {:?}", log_ctx(), index);
                self.epochs = epochs;
                self.exhausted = false;
                self.settings.active.audio = index.is_some();
                self.normaliser.last_audio = None;
                if let Err(e) = self.source.activate_audio_stream(index) {
                    warn!("{} ⚠️  切换音频流失败: {}", log_ctx(), e);
                }
            }
            ProducerCommand::ActivateSubtitle { index, epochs } => {
                info!("{} 📝 切换字幕流: {:?}", log_ctx(), index);
                self.epochs = epochs;
                self.exhausted = false;
                self.normaliser.last_subtitle = None;
                if let Err(e) = self.source.activate_subtitle_stream(index) {
                    warn!("{} ⚠️  切换字幕流失败: {}", log_ctx(), e);
                }
            }
            ProducerCommand::SetDeinterlacing(enabled) => {
                self.source.set_deinterlacing_enabled(enabled);
            }
            ProducerCommand::AttachExternal(input) => {
                self.source.add_external(input);
            }
            ProducerCommand::Stop => {
                info!("{} ⏹ 生产者收到停止命令", log_ctx());
                return false;
            }
        }
        true
    }

    /// 阻塞等待一条命令（带超时）；返回 false 表示线程应退出
    fn wait_for_command(&mut self) -> bool {
        match self.command_rx.recv_timeout(COMMAND_POLL_INTERVAL) {
            Ok(command) => self.handle_command(command),
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => true,
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => false,
        }
    }

    /// 所有活动类型都达到高水位，或任一类型达到上限
    fn should_suspend(&self) -> bool {
        let active = self.settings.active;
        let buffer = &self.context.buffer;
        active.any()
            && (buffer.all_at_least(active, self.settings.high_watermark)
                || buffer.any_at_least(active, self.settings.buffer_ceiling))
    }

    /// 任一活动类型降到低水位以下，且没有类型处于上限
    fn should_resume(&self) -> bool {
        let active = self.settings.active;
        let buffer = &self.context.buffer;
        !buffer.any_at_least(active, self.settings.buffer_ceiling)
            && !buffer.all_at_least(active, self.settings.low_watermark)
    }

    /// 背压挂起，直到排空信号 / 命令到来；返回 false 表示线程应退出
    fn suspend(&mut self) -> bool {
        debug!("{} 💤 缓冲已满，生产者挂起", log_ctx());
        self.context.status.set_suspended(true);

        let command_rx = self.command_rx.clone();
        let drain_rx = self.drain_rx.clone();

        let keep_running = loop {
            let command = select! {
                recv(command_rx) -> command => Some(command),
                recv(drain_rx) -> _ => None,
                default(COMMAND_POLL_INTERVAL) => None,
            };
            match command {
                Some(Ok(command)) => break self.handle_command(command),
                Some(Err(_)) => break false,
                None => {}
            }
            if self.should_resume() {
                break true;
            }
        };

        self.context.status.set_suspended(false);
        debug!("{} ▶️  生产者恢复", log_ctx());
        keep_running
    }

    fn finish(self) -> InputSet {
        self.context.status.set_suspended(false);
        self.context.status.running.store(false, Ordering::SeqCst);
        info!("{} 🛑 生产者线程退出（共写入 {} 个批次）", log_ctx(), self.batch_count);
        self.source
    }
}

/// 帧时间规整
///
/// 负值归零，零时长视频帧补上名义时长，同类型位置不回退。
#[derive(Debug)]
struct FrameNormaliser {
    nominal_video_duration: f64,
    last_video: Option<f64>,
    last_audio: Option<f64>,
    last_subtitle: Option<f64>,
}

impl FrameNormaliser {
    fn new(nominal_video_duration: f64) -> Self {
        Self {
            nominal_video_duration,
            last_video: None,
            last_audio: None,
            last_subtitle: None,
        }
    }

    fn reset(&mut self) {
        self.last_video = None;
        self.last_audio = None;
        self.last_subtitle = None;
    }

    fn normalise(&mut self, frame: &mut Frame) {
        match frame {
            Frame::Video(f) => {
                let (position, mut duration) = adjust(f.position(), f.duration(), &mut self.last_video);
                if duration == 0.0 {
                    duration = self.nominal_video_duration;
                }
                f.set_position(position);
                f.set_duration(duration);
            }
            Frame::Audio(f) => {
                let (position, duration) = adjust(f.position(), f.duration(), &mut self.last_audio);
                f.set_position(position);
                f.set_duration(duration);
            }
            Frame::Subtitle(f) => {
                let (position, duration) = adjust(f.position(), f.duration(), &mut self.last_subtitle);
                f.set_position(position);
                f.set_duration(duration);
            }
            Frame::Artwork(_) => {}
        }
    }
}

fn non_negative(value: f64) -> f64 {
    if value.is_finite() && value > 0.0 {
        value
    } else {
        0.0
    }
}

fn adjust(position: f64, duration: f64, last: &mut Option<f64>) -> (f64, f64) {
    let mut position = non_negative(position);
    if let Some(previous) = *last {
        position = position.max(previous);
    }
    *last = Some(position);
    (position, non_negative(duration))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{AudioFrame, FrameKind, VideoFrame};
    use parking_lot::Mutex;
    use std::time::Instant;

    /// 按脚本输出帧的数据源：每批 0.1s 的视频 + 音频
    struct ScriptedSource {
        next_index: usize,
        frame_count: usize,
        fail_at: Option<usize>,
        repositions: Arc<Mutex<Vec<f64>>>,
    }

    impl ScriptedSource {
        fn new(frame_count: usize) -> Self {
            Self {
                next_index: 0,
                frame_count,
                fail_at: None,
                repositions: Arc::new(Mutex::new(Vec::new())),
            }
        }
    }

    impl FrameSource for ScriptedSource {
        fn open(&mut self) -> Result<StreamInfo> {
            Ok(StreamInfo::default())
        }

        fn decode_next(&mut self, interrupt: &InterruptFlag) -> Result<DecodeOutcome> {
            if interrupt.is_raised() {
                return Ok(DecodeOutcome::Interrupted);
            }
            if self.fail_at.is_some_and(|at| self.next_index >= at) {
                return Err(PlayerError::Decode("corrupt packet".into()));
            }
            if self.next_index >= self.frame_count {
                return Ok(DecodeOutcome::EndOfStream);
            }
            let position = self.next_index as f64 / 10.0;
            self.next_index += 1;
            Ok(DecodeOutcome::Frames(vec![
                VideoFrame::rgba(position, 0.1, 1, 1, vec![0; 4], 4).into(),
                AudioFrame::from_f32(position, 0.1, &[0.0; 8]).into(),
            ]))
        }

        fn reposition(&mut self, position: f64, _interrupt: &InterruptFlag) -> Result<()> {
            self.repositions.lock().push(position);
            self.next_index = (position * 10.0).round() as usize;
            Ok(())
        }

        fn close(&mut self) {}

        fn description(&self) -> String {
            "scripted".into()
        }
    }

    /// 解码调用一直阻塞，直到被中断后以 IO 错误返回
    struct BlockingSource;

    impl FrameSource for BlockingSource {
        fn open(&mut self) -> Result<StreamInfo> {
            Ok(StreamInfo::default())
        }

        fn decode_next(&mut self, interrupt: &InterruptFlag) -> Result<DecodeOutcome> {
            while !interrupt.is_raised() {
                thread::sleep(Duration::from_millis(1));
            }
            Err(PlayerError::Io("read aborted".into()))
        }

        fn reposition(&mut self, _position: f64, _interrupt: &InterruptFlag) -> Result<()> {
            Ok(())
        }

        fn close(&mut self) {}

        fn description(&self) -> String {
            "blocking".into()
        }
    }

    #[derive(Default)]
    struct RecordingObserver {
        failures: Mutex<Vec<PlayerError>>,
    }

    impl ProducerObserver for RecordingObserver {
        fn on_failure(&self, error: PlayerError) {
            self.failures.lock().push(error);
        }
    }

    fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        false
    }

    fn inputs(source: impl FrameSource + 'static) -> InputSet {
        InputSet::new(Box::new(source))
    }

    fn settings() -> ProducerSettings {
        ProducerSettings {
            low_watermark: Duration::from_millis(500),
            high_watermark: Duration::from_secs(2),
            buffer_ceiling: Duration::from_secs(8),
            active: ActiveKinds { video: true, audio: true },
            nominal_video_duration: 0.04,
        }
    }

    fn context(buffer: &Arc<FrameBuffer>, observer: &Arc<RecordingObserver>) -> ProducerContext {
        ProducerContext {
            buffer: buffer.clone(),
            interrupt: InterruptFlag::new(),
            status: Arc::new(ProducerStatus::default()),
            observer: observer.clone(),
        }
    }

    #[test]
    fn test_producer_suspends_at_high_watermark() {
        let buffer = Arc::new(FrameBuffer::new());
        let observer = Arc::new(RecordingObserver::default());
        let ctx = context(&buffer, &observer);
        let status = ctx.status.clone();

        let mut producer =
            Producer::start(inputs(ScriptedSource::new(600)), ctx, settings(), buffer.epochs(), None).unwrap();

        assert!(wait_until(|| status.is_suspended()));
        let high = Duration::from_secs(2);
        assert!(buffer.all_at_least(ActiveKinds { video: true, audio: true }, high));
        assert!(buffer.buffered_video_duration() < Duration::from_secs(3));

        // 消费到低水位以下后恢复
        while buffer.buffered_audio_duration() >= Duration::from_millis(400) {
            buffer.pop_audio_frame();
            buffer.pop_video_frame();
        }
        assert!(wait_until(|| buffer.buffered_audio_duration() >= high));

        assert!(producer.stop().is_some());
        assert!(observer.failures.lock().is_empty());
        assert!(!status.is_running());
    }

    #[test]
    fn test_end_of_stream_marks_exhausted() {
        let buffer = Arc::new(FrameBuffer::new());
        let observer = Arc::new(RecordingObserver::default());
        let mut producer = Producer::start(
            inputs(ScriptedSource::new(10)),
            context(&buffer, &observer),
            settings(),
            buffer.epochs(),
            None,
        )
        .unwrap();

        assert!(wait_until(|| buffer.is_source_exhausted()));
        assert_eq!(buffer.frame_count(FrameKind::Video), 10);
        producer.stop();
    }

    #[test]
    fn test_seek_repositions_and_rejects_stale_epoch() {
        let buffer = Arc::new(FrameBuffer::new());
        let observer = Arc::new(RecordingObserver::default());
        let source = ScriptedSource::new(10);
        let repositions = source.repositions.clone();
        let mut producer =
            Producer::start(inputs(source), context(&buffer, &observer), settings(), buffer.epochs(), None).unwrap();

        assert!(wait_until(|| buffer.is_source_exhausted()));

        buffer.purge();
        producer.seek(0.5, buffer.epochs());

        assert!(wait_until(|| buffer.is_source_exhausted()));
        assert_eq!(*repositions.lock(), vec![0.5]);
        assert_eq!(buffer.next_position(FrameKind::Video), Some(0.5));
        producer.stop();
    }

    #[test]
    fn test_decode_error_reported_once() {
        let buffer = Arc::new(FrameBuffer::new());
        let observer = Arc::new(RecordingObserver::default());
        let mut source = ScriptedSource::new(100);
        source.fail_at = Some(3);
        let mut producer =
            Producer::start(inputs(source), context(&buffer, &observer), settings(), buffer.epochs(), None).unwrap();

        assert!(wait_until(|| !observer.failures.lock().is_empty()));
        assert!(wait_until(|| producer.is_finished()));
        assert!(producer.stop().is_some());
        assert_eq!(observer.failures.lock().len(), 1);
        assert!(matches!(observer.failures.lock()[0], PlayerError::Decode(_)));
    }

    #[test]
    fn test_interrupt_is_not_failure() {
        let buffer = Arc::new(FrameBuffer::new());
        let observer = Arc::new(RecordingObserver::default());
        let ctx = context(&buffer, &observer);
        let status = ctx.status.clone();

        let mut producer = Producer::start(inputs(BlockingSource), ctx, settings(), buffer.epochs(), None).unwrap();
        assert!(wait_until(|| status.is_running()));

        // stop() 置位中断标志，被打断的读取返回的错误不算失败
        assert!(producer.stop().is_some());
        assert!(observer.failures.lock().is_empty());
    }

    #[test]
    fn test_normaliser_fills_and_clamps() {
        let mut normaliser = FrameNormaliser::new(0.04);

        let mut first: Frame = VideoFrame::rgba(1.0, 0.0, 1, 1, vec![0; 4], 4).into();
        normaliser.normalise(&mut first);
        assert_eq!(first.duration(), 0.04);

        let mut backwards: Frame = VideoFrame::rgba(0.5, 0.04, 1, 1, vec![0; 4], 4).into();
        normaliser.normalise(&mut backwards);
        assert_eq!(backwards.position(), 1.0);

        let mut negative: Frame = AudioFrame::new(-0.2, -1.0, vec![]).into();
        normaliser.normalise(&mut negative);
        assert_eq!((negative.position(), negative.duration()), (0.0, 0.0));

        normaliser.reset();
        let mut after_seek: Frame = VideoFrame::rgba(0.2, 0.04, 1, 1, vec![0; 4], 4).into();
        normaliser.normalise(&mut after_seek);
        assert_eq!(after_seek.position(), 0.2);
    }
}
