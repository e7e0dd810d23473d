use crate::core::{
    ClockAnchor, ClockCorrector, FrameKind, PlaybackState, PlayerConfig, PlayerError, PlayerSession, Result,
    StreamInfo, SyncSource, SystemClock, TimedFrame, WallClock,
};
use crate::player::audio_device::AudioDevice;
use crate::player::audio_output::AudioOutput;
use crate::player::events::{EventHub, PlayerEvent};
use crate::player::frame_buffer::{ActiveKinds, FrameBuffer};
use crate::player::frame_source::{FrameSource, InterruptFlag};
use crate::player::input_set::{ExternalInput, InputSet};
use crate::player::log_ctx;
use crate::player::producer::{
    Producer, ProducerCommand, ProducerContext, ProducerObserver, ProducerSettings, ProducerStatus,
};
use crate::player::render_scheduler::{RenderCallback, RenderScheduler};
use crate::player::subtitle_track::SubtitleTrack;
use crate::renderer::Renderer;
use crossbeam_channel::Receiver;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// 两次渲染回调之间的最大间隔（字幕、时间上报需要持续推进）
const MAX_TICK_GAP: Duration = Duration::from_millis(250);

/// 呈现偏差超过它（且超过一帧）时记录日志
const DRIFT_LOG_THRESHOLD: f64 = 0.1;

/// 判断帧是否到期时容忍的浮点误差
const DUE_EPSILON: f64 = 1e-6;

/// 一次渲染回调的结论
enum TickOutcome {
    Continue(Instant),
    Underrun,
    Finished,
}

/// 会话和时钟等需要在控制线程与渲染回调之间共享的状态
struct Core {
    session: Option<PlayerSession>,
    corrector: ClockCorrector,
    events: EventHub,
    /// 最近一次发出的状态，跨会话去重
    last_state: Option<PlaybackState>,
    active: ActiveKinds,
    /// 已调用 play，等待缓冲达到水位
    pending_play: bool,
    /// 上一次播放正常结束，下一次 play 从头开始
    finished: bool,
    last_presented_end: Option<f64>,
    subtitles: SubtitleTrack,
    artwork_shown: bool,
    last_time_report: Option<Instant>,
}

impl Core {
    fn new() -> Self {
        Self {
            session: None,
            corrector: ClockCorrector::new(),
            events: EventHub::new(),
            last_state: None,
            active: ActiveKinds::default(),
            pending_play: false,
            finished: false,
            last_presented_end: None,
            subtitles: SubtitleTrack::new(),
            artwork_shown: false,
            last_time_report: None,
        }
    }

    fn session(&self) -> Result<&PlayerSession> {
        self.session
            .as_ref()
            .ok_or_else(|| PlayerError::InvalidState("尚未打开输入".to_string()))
    }

    /// 会话存在且没有失败
    fn usable_session(&self) -> Result<&PlayerSession> {
        let session = self.session()?;
        if let PlaybackState::Failed(error) = &session.state {
            return Err(PlayerError::InvalidState(format!("播放已失败，需要重新打开输入: {}", error)));
        }
        Ok(session)
    }

    fn state(&self) -> PlaybackState {
        self.session
            .as_ref()
            .map(|s| s.state.clone())
            .unwrap_or(PlaybackState::Stopped)
    }

    fn is_playing(&self) -> bool {
        self.session.as_ref().is_some_and(|s| s.state == PlaybackState::Playing)
    }

    fn is_seeking(&self) -> bool {
        self.session.as_ref().is_some_and(|s| s.seeking)
    }

    fn is_buffering(&self) -> bool {
        self.session.as_ref().is_some_and(|s| s.buffering)
    }

    fn current_time(&self) -> f64 {
        self.session.as_ref().map_or(0.0, |s| s.current_time)
    }

    fn duration(&self) -> f64 {
        self.session.as_ref().map_or(0.0, |s| s.duration)
    }

    /// 时长未知（<= 0）时只限制下界
    fn clamp_time(&self, time: f64) -> f64 {
        let duration = self.duration();
        if duration > 0.0 {
            time.clamp(0.0, duration)
        } else {
            time.max(0.0)
        }
    }

    fn emit(&mut self, event: PlayerEvent) {
        self.events.emit(event);
    }

    fn set_state(&mut self, state: PlaybackState) {
        if let Some(session) = self.session.as_mut() {
            session.state = state.clone();
        }
        if self.last_state.as_ref() != Some(&state) {
            info!("{} 🔄 状态: {:?} -> {:?}", log_ctx(), self.last_state, state);
            self.last_state = Some(state.clone());
            self.events.emit(PlayerEvent::StateChanged(state));
        }
    }

    fn set_buffering(&mut self, buffering: bool) {
        if let Some(session) = self.session.as_mut() {
            if session.buffering != buffering {
                session.buffering = buffering;
                self.events.emit(PlayerEvent::BufferingChanged(buffering));
            }
        }
    }

    fn set_seeking(&mut self, seeking: bool) {
        if let Some(session) = self.session.as_mut() {
            if session.seeking != seeking {
                session.seeking = seeking;
                self.events.emit(PlayerEvent::SeekingChanged(seeking));
            }
        }
    }

    fn set_time(&mut self, time: f64) {
        if let Some(session) = self.session.as_mut() {
            session.current_time = time;
        }
    }

    /// 停表：把外推时间写回会话并解除锚点
    fn freeze_time(&mut self, now: Instant) {
        if let Some(estimate) = self.corrector.estimate(now) {
            let time = self.clamp_time(estimate);
            self.set_time(time);
        }
        self.corrector.clear();
    }

    fn reset_playback(&mut self) {
        self.corrector.clear();
        self.pending_play = false;
        self.finished = false;
        self.last_presented_end = None;
        self.subtitles.clear();
        self.artwork_shown = false;
        self.last_time_report = None;
    }
}

/// 播放器内部共享对象（控制线程、渲染回调、生产者线程）
///
/// 锁顺序：core -> audio -> renderer。持有 core 时不能调用 `scheduler.stop()`。
struct PlayerShared {
    core: Mutex<Core>,
    buffer: Arc<FrameBuffer>,
    scheduler: RenderScheduler,
    audio: Mutex<AudioOutput>,
    renderer: Mutex<Box<dyn Renderer>>,
    clock: Arc<dyn WallClock>,
    config: PlayerConfig,
    producer_status: Arc<ProducerStatus>,
    interrupt: InterruptFlag,
}

impl PlayerShared {
    /// 缓冲是否足以开始 / 恢复播放
    ///
    /// 生产者被某一类型顶到上限时无法再前进，此时不等其它类型。
    fn is_ready(&self, core: &Core) -> bool {
        self.buffer.all_at_least(core.active, self.config.high())
            || self.buffer.is_source_exhausted()
            || (self.producer_status.is_suspended() && self.buffer.any_at_least(core.active, self.config.ceiling()))
    }

    /// 视频队列空了之后不会很快有新的视频帧：源已耗尽，或者音频已经远远领先
    fn video_drained(&self, core: &Core) -> bool {
        self.buffer.is_source_exhausted()
            || (core.active.audio
                && (self.producer_status.is_suspended()
                    || self.buffer.buffered_audio_duration() >= self.config.high()))
    }

    /// 缓冲就绪：锚定时钟、放开音频、进入 Playing
    fn engage(&self, core: &mut Core, now: Instant) -> Result<()> {
        core.pending_play = false;
        core.set_buffering(false);

        let start = core.current_time();
        core.corrector.reanchor(now, start);
        core.last_time_report = Some(now);

        if core.active.audio {
            let mut audio = self.audio.lock();
            audio.set_anchor(match self.config.sync_source {
                SyncSource::Wall => core.corrector.anchor(),
                SyncSource::Audio => None,
            });
            audio.set_hold(false);
            audio.start()?;
        }

        info!("{} ▶️  开始播放 @ {:.3}s", log_ctx(), start);
        core.set_state(PlaybackState::Playing);
        Ok(())
    }

    /// 停表等数据：音频输出静音，锚点解除
    fn rebuffer(&self, core: &mut Core) {
        core.corrector.clear();
        core.set_buffering(true);
        let audio = self.audio.lock();
        audio.set_hold(true);
        audio.set_anchor(None);
    }

    /// 进入 Failed（调度器由调用方在释放 core 后停止）
    fn fail(&self, core: &mut Core, error: PlayerError) {
        error!("{} ❌ 播放失败: {}", log_ctx(), error);
        core.freeze_time(self.clock.now());
        core.pending_play = false;
        core.set_buffering(false);
        core.set_state(PlaybackState::Failed(error));
        self.audio.lock().stop();
    }

    fn finish(&self, core: &mut Core) {
        info!("{} 🏁 播放结束", log_ctx());
        self.audio.lock().stop();

        let end = match core.duration() {
            duration if duration > 0.0 => duration,
            _ => core.last_presented_end.unwrap_or_else(|| core.current_time()).max(core.current_time()),
        };
        core.reset_playback();
        core.finished = true;
        self.renderer.lock().show_subtitle(None);

        core.set_buffering(false);
        core.set_state(PlaybackState::Stopped);
        core.set_time(end);
        core.emit(PlayerEvent::TimeUpdated(end));
        core.emit(PlayerEvent::FinishedPlaying);
    }

    /// 渲染回调：返回下一次触发时刻，`None` 表示停止调度
    fn tick(&self, now: Instant) -> Option<Instant> {
        let mut core = self.core.lock();
        let idle = now + self.config.idle_interval();

        let session = core.session.as_ref()?;
        if session.state.is_failed() {
            return None;
        }
        if session.seeking {
            return Some(idle);
        }

        if core.pending_play || session.buffering {
            if !self.is_ready(&core) {
                return Some(idle);
            }
            if let Err(e) = self.engage(&mut core, now) {
                self.fail(&mut core, e);
                return None;
            }
        }
        if !core.is_playing() {
            return None;
        }

        if !core.artwork_shown {
            if let Some(artwork) = self.buffer.artwork() {
                self.renderer.lock().show_artwork(&artwork);
                core.artwork_shown = true;
            }
        }

        if self.config.sync_source == SyncSource::Audio && core.active.audio {
            let audio = self.audio.lock();
            if audio.is_flowing() {
                core.corrector.reanchor(now, audio.played_position());
            }
        }

        let Some(anchor) = core.corrector.anchor() else {
            return Some(idle);
        };
        let media_now = core.corrector.estimate(now).unwrap_or(anchor.media_time);

        let outcome = if core.active.video {
            self.present_video(&mut core, anchor, media_now, now, idle)
        } else {
            self.follow_audio(&core, media_now, idle)
        };

        match outcome {
            TickOutcome::Continue(next) => {
                let time = core.clamp_time(media_now);
                core.set_time(time);
                self.update_subtitles(&mut core, media_now);
                self.observe_time(&mut core, now, time);
                Some(next.max(now).min(now + MAX_TICK_GAP))
            }
            TickOutcome::Underrun => {
                info!("{} ⏳ 缓冲耗尽 @ {:.3}s，等待数据", log_ctx(), media_now);
                core.freeze_time(now);
                self.rebuffer(&mut core);
                Some(idle)
            }
            TickOutcome::Finished => {
                self.finish(&mut core);
                None
            }
        }
    }

    /// 丢弃已过期的帧，呈现到期的一帧，算出下一帧的触发时刻
    fn present_video(
        &self,
        core: &mut Core,
        anchor: ClockAnchor,
        media_now: f64,
        now: Instant,
        idle: Instant,
    ) -> TickOutcome {
        let (frame, dropped, next_position) = self.buffer.with_video(|queue| {
            let mut dropped = 0;
            while queue.get(1).is_some_and(|next| next.position() <= media_now) {
                queue.pop();
                dropped += 1;
            }
            let due = queue
                .front()
                .is_some_and(|front| front.position() <= media_now + DUE_EPSILON);
            let frame = if due { queue.pop() } else { None };
            (frame, dropped, queue.front().map(|next| next.position()))
        });

        if dropped > 0 {
            debug!("⏭️  丢弃 {} 个过期视频帧 @ {:.3}s", dropped, media_now);
        }

        if let Some(frame) = &frame {
            let drift = core.corrector.correction_interval(frame.position(), now);
            if drift.abs() > frame.duration().max(DRIFT_LOG_THRESHOLD) {
                debug!("⚠️  画面与时钟偏差 {:+.3}s @ {:.3}s", drift, frame.position());
            }
            if let Err(e) = self.renderer.lock().render(frame) {
                warn!("{} ⚠️  渲染失败 @ {:.3}s: {}", log_ctx(), frame.position(), e);
            }
            core.last_presented_end = Some(frame.end());
        }

        if let Some(position) = next_position {
            return TickOutcome::Continue(anchor.wall_for(position));
        }

        // 队列空：当前帧还没放完就等它放完；视频放完了但音频还有，就跟着音频走
        match core.last_presented_end {
            Some(end) if end > media_now + DUE_EPSILON => TickOutcome::Continue(anchor.wall_for(end)),
            _ if core.active.audio && self.video_drained(core) => self.follow_audio(core, media_now, idle),
            _ if self.buffer.is_source_exhausted() => TickOutcome::Finished,
            _ => TickOutcome::Underrun,
        }
    }

    /// 以音频队列和输出状态判断结束 / 欠载（纯音频，或视频已放完）
    ///
    /// 只有队列空且设备不再拿到样本才算结束，已排队的音频都会播完。
    fn follow_audio(&self, core: &Core, media_now: f64, idle: Instant) -> TickOutcome {
        if !core.active.audio {
            let duration = core.duration();
            return if duration > 0.0 && media_now >= duration {
                TickOutcome::Finished
            } else {
                TickOutcome::Continue(idle)
            };
        }

        if self.buffer.frame_count(FrameKind::Audio) > 0 || self.audio.lock().is_flowing() {
            TickOutcome::Continue(idle)
        } else if self.buffer.is_source_exhausted() {
            TickOutcome::Finished
        } else {
            TickOutcome::Underrun
        }
    }

    fn update_subtitles(&self, core: &mut Core, media_now: f64) {
        if core.subtitles.update(&self.buffer, media_now) {
            let text = core.subtitles.text();
            debug!("💬 字幕: {:?}", text);
            self.renderer.lock().show_subtitle(text);
        }
    }

    fn observe_time(&self, core: &mut Core, now: Instant, time: f64) {
        let interval = self.config.time_observing();
        let due = core
            .last_time_report
            .map_or(true, |last| now.saturating_duration_since(last) >= interval);
        if due {
            core.last_time_report = Some(now);
            core.emit(PlayerEvent::TimeUpdated(time));
        }
    }

    fn clear_subtitles(&self, core: &mut Core) {
        if core.subtitles.clear() {
            self.renderer.lock().show_subtitle(None);
        }
    }
}

impl ProducerObserver for PlayerShared {
    fn on_failure(&self, error: PlayerError) {
        self.scheduler.stop();
        let mut core = self.core.lock();
        if core.session.is_some() {
            self.fail(&mut core, error);
        }
    }
}

/// 播放器 - 整体控制播放流程
///
/// 控制方法要求 `&mut self`：所有控制调用来自同一个宿主线程。
/// 渲染回调在调度器线程（或 `pump` 的调用方）上运行，生产者在自己的线程上解码。
pub struct Player {
    shared: Arc<PlayerShared>,
    producer: Option<Producer>,
    /// 生产者未运行时由播放器持有的输入
    source: Option<InputSet>,
    /// 生产者启动前记下的定位请求
    pending_reposition: Option<f64>,
}

impl Player {
    /// 使用系统时钟创建播放器
    pub fn new(config: PlayerConfig, audio_device: Box<dyn AudioDevice>, renderer: Box<dyn Renderer>) -> Result<Self> {
        Self::with_clock(config, audio_device, renderer, Arc::new(SystemClock))
    }

    /// 使用指定时钟创建播放器（测试中配合 `ManualClock`）
    pub fn with_clock(
        config: PlayerConfig,
        audio_device: Box<dyn AudioDevice>,
        renderer: Box<dyn Renderer>,
        clock: Arc<dyn WallClock>,
    ) -> Result<Self> {
        info!("{} 🎮 创建播放器...", log_ctx());
        config.validate()?;

        let buffer = Arc::new(FrameBuffer::with_low_watermark(config.low()));
        let scheduler = RenderScheduler::new(config.scheduler_driver, clock.clone())?;
        let audio = AudioOutput::new(audio_device, buffer.clone(), clock.clone());

        let shared = Arc::new(PlayerShared {
            core: Mutex::new(Core::new()),
            buffer,
            scheduler,
            audio: Mutex::new(audio),
            renderer: Mutex::new(renderer),
            clock,
            config,
            producer_status: Arc::new(ProducerStatus::default()),
            interrupt: InterruptFlag::new(),
        });

        info!("{} ✅ 播放器创建完成", log_ctx());
        Ok(Self {
            shared,
            producer: None,
            source: None,
            pending_reposition: None,
        })
    }

    /// 订阅播放器事件
    pub fn subscribe(&self) -> Receiver<PlayerEvent> {
        self.shared.core.lock().events.subscribe()
    }

    /// 打开新的输入，替换当前会话
    ///
    /// 打开失败时会话进入 Failed，错误同时作为返回值。
    pub fn attach_input(&mut self, source: Box<dyn FrameSource>) -> Result<StreamInfo> {
        self.detach();
        info!("{} 📂 打开输入: {}", log_ctx(), source.description());

        let mut source = InputSet::new(source);
        let opened = source.open().and_then(|info| {
            if info.has_video || info.has_audio() {
                Ok(info)
            } else {
                Err(PlayerError::StreamNotFound("输入中没有音频或视频流".to_string()))
            }
        });

        let mut core = self.shared.core.lock();
        core.reset_playback();

        let mut info = match opened {
            Ok(info) => info,
            Err(e) => {
                error!("{} ❌ 打开输入失败: {}", log_ctx(), e);
                source.close();
                core.session = Some(PlayerSession::default());
                core.active = ActiveKinds::default();
                core.set_state(PlaybackState::Failed(e.clone()));
                return Err(e);
            }
        };

        // 越界的默认流当作未选择
        if info.active_audio_stream.is_some_and(|i| i >= info.audio_streams.len()) {
            warn!("默认音频流越界，忽略");
            info.active_audio_stream = None;
        }
        if info.active_subtitle_stream.is_some_and(|i| i >= info.subtitle_streams.len()) {
            warn!("默认字幕流越界，忽略");
            info.active_subtitle_stream = None;
        }

        let session = PlayerSession::from_stream_info(info.clone(), false);
        core.active = ActiveKinds {
            video: info.has_video,
            audio: session.active_audio_stream_index.is_some(),
        };
        info!(
            "{} 媒体信息: 时长 {:.2}s, 视频 {}, 音频流 {}, 字幕流 {}",
            log_ctx(),
            info.duration,
            info.has_video,
            info.audio_streams.len(),
            info.subtitle_streams.len()
        );
        core.session = Some(session);
        core.set_state(PlaybackState::Stopped);
        core.emit(PlayerEvent::PreparedToPlay(info.clone()));
        drop(core);

        self.source = Some(source);
        self.pending_reposition = None;
        Ok(info)
    }

    /// 挂载外挂输入（外挂音轨 / 字幕文件）
    ///
    /// 只有带视频的会话才能挂载。外挂输入的音频 / 字幕流追加到流列表末尾，
    /// 之后可以像主输入的流一样选择；更新后的流信息通过 `PreparedToPlay` 再次发出。
    pub fn attach_external_input(&mut self, source: Box<dyn FrameSource>) -> Result<StreamInfo> {
        {
            let core = self.shared.core.lock();
            if !core.usable_session()?.has_video() {
                warn!("{} ⚠️  没有视频流，忽略外挂输入: {}", log_ctx(), source.description());
                return Err(PlayerError::InvalidState("只有视频会话可以挂载外挂输入".to_string()));
            }
        }

        info!("{} 📎 打开外挂输入: {}", log_ctx(), source.description());
        let mut input = ExternalInput::open(source)?;
        let audio_streams = input.audio_streams();
        let subtitle_streams = input.subtitle_streams();

        match (&self.producer, self.source.as_mut()) {
            (Some(producer), _) => producer.send(ProducerCommand::AttachExternal(input)),
            (None, Some(source)) => source.add_external(input),
            (None, None) => {
                input.close();
                return Err(PlayerError::InvalidState("没有可用的数据源".to_string()));
            }
        }

        let mut core = self.shared.core.lock();
        let Some(info) = core.session.as_mut().and_then(|s| s.stream_info.as_mut()) else {
            return Err(PlayerError::InvalidState("会话已关闭".to_string()));
        };
        info.audio_streams.extend(audio_streams);
        info.subtitle_streams.extend(subtitle_streams);
        let info = info.clone();
        core.emit(PlayerEvent::PreparedToPlay(info.clone()));
        Ok(info)
    }

    /// 开始 / 继续播放
    ///
    /// 缓冲未达到水位时先进入 buffering，由渲染回调在就绪后切换到 Playing。
    pub fn play(&mut self) -> Result<()> {
        self.reap_producer();

        let restart = {
            let core = self.shared.core.lock();
            let session = core.usable_session()?;
            if session.state == PlaybackState::Playing || core.pending_play {
                return Ok(());
            }
            core.finished
        };

        if restart {
            info!("{} 🔁 从头重新播放", log_ctx());
            self.reposition(0.0);
            let mut core = self.shared.core.lock();
            core.finished = false;
            core.set_time(0.0);
        }

        if let Err(e) = self.ensure_producer() {
            let mut core = self.shared.core.lock();
            self.shared.fail(&mut core, e.clone());
            return Err(e);
        }

        let now = self.shared.clock.now();
        {
            let mut core = self.shared.core.lock();
            core.pending_play = true;
            if !core.is_seeking() {
                if self.shared.is_ready(&core) {
                    if let Err(e) = self.shared.engage(&mut core, now) {
                        self.shared.fail(&mut core, e.clone());
                        return Err(e);
                    }
                } else {
                    info!("{} ⏳ 预缓冲中...", log_ctx());
                    core.set_buffering(true);
                }
            }
        }

        self.shared.scheduler.start(self.render_callback(), now)
    }

    /// 暂停：停表并停止音频拉取
    pub fn pause(&mut self) -> Result<()> {
        self.shared.scheduler.stop();

        let now = self.shared.clock.now();
        let mut core = self.shared.core.lock();
        let state = core.usable_session()?.state.clone();

        if state == PlaybackState::Playing {
            info!("{} ⏸️  暂停 @ {:.3}s", log_ctx(), core.corrector.estimate(now).unwrap_or(0.0));
            core.freeze_time(now);
            core.set_buffering(false);
            core.set_state(PlaybackState::Paused);
            let mut audio = self.shared.audio.lock();
            audio.stop();
            audio.set_anchor(None);
        } else if core.pending_play {
            debug!("取消预缓冲");
            core.pending_play = false;
            core.set_buffering(false);
        }
        Ok(())
    }

    /// 停止播放：停止生产者、清空缓冲、回到开头
    pub fn stop(&mut self) {
        info!("{} ⏹️  停止播放", log_ctx());

        self.shared.scheduler.stop();
        self.shutdown_producer();

        {
            let mut core = self.shared.core.lock();
            core.reset_playback();
            if core.session.is_some() {
                core.set_seeking(false);
                core.set_buffering(false);
                core.set_time(0.0);
                if !core.state().is_failed() {
                    core.set_state(PlaybackState::Stopped);
                }
            }

            let mut audio = self.shared.audio.lock();
            audio.stop();
            audio.set_anchor(None);
            audio.set_hold(false);
            audio.flush(0.0);
        }

        debug!(
            "🗑️  清空缓冲: 视频 {} 帧, 音频 {} 帧, 字幕 {} 帧",
            self.shared.buffer.frame_count(FrameKind::Video),
            self.shared.buffer.frame_count(FrameKind::Audio),
            self.shared.buffer.frame_count(FrameKind::Subtitle)
        );
        self.shared.buffer.purge();
        self.shared.renderer.lock().clear();

        if self.source.is_some() {
            self.pending_reposition = Some(0.0);
        }
        info!("{} ✅ 停止播放完成", log_ctx());
    }

    /// 开始拖动：时钟停止，音频静音，直到 `end_seeking`
    pub fn begin_seeking(&mut self) -> Result<()> {
        let now = self.shared.clock.now();
        let mut core = self.shared.core.lock();
        core.usable_session()?;
        if core.is_seeking() {
            return Ok(());
        }

        debug!("{} 🎯 开始拖动", log_ctx());
        core.set_seeking(true);
        if core.is_playing() {
            core.freeze_time(now);
            let audio = self.shared.audio.lock();
            audio.set_hold(true);
            audio.set_anchor(None);
        }
        Ok(())
    }

    /// 定位到指定时间（秒），超出范围的值被限制在 [0, duration]
    pub fn seek_to_time(&mut self, time: f64) -> Result<()> {
        let target = {
            let core = self.shared.core.lock();
            core.usable_session()?;
            core.clamp_time(time)
        };

        info!("{} 🎯 Seek 到: {:.3}s", log_ctx(), target);

        // ========== 步骤1: 打断生产者并清空旧数据 ==========
        self.reposition(target);

        // ========== 步骤2: 更新会话时间 ==========
        let mut core = self.shared.core.lock();
        core.finished = false;
        core.last_presented_end = None;
        core.set_time(target);
        self.shared.clear_subtitles(&mut core);
        core.emit(PlayerEvent::TimeUpdated(target));

        // ========== 步骤3: 播放中直接 seek 需要重新缓冲 ==========
        if core.is_playing() && !core.is_seeking() {
            self.shared.rebuffer(&mut core);
        }
        Ok(())
    }

    /// 结束拖动：恢复拖动前的播放 / 暂停状态
    pub fn end_seeking(&mut self) -> Result<()> {
        let now = self.shared.clock.now();
        let needs_scheduler = {
            let mut core = self.shared.core.lock();
            core.usable_session()?;
            if !core.is_seeking() {
                return Ok(());
            }

            debug!("{} 🎯 结束拖动 @ {:.3}s", log_ctx(), core.current_time());
            core.set_seeking(false);

            let resume = core.is_playing() || core.pending_play;
            if resume {
                if self.shared.is_ready(&core) {
                    if let Err(e) = self.shared.engage(&mut core, now) {
                        self.shared.fail(&mut core, e.clone());
                        drop(core);
                        self.shared.scheduler.stop();
                        return Err(e);
                    }
                } else {
                    self.shared.rebuffer(&mut core);
                }
            }
            resume
        };

        if needs_scheduler && !self.shared.scheduler.is_scheduling() {
            self.shared.scheduler.start(self.render_callback(), now)?;
        }
        Ok(())
    }

    /// 切换音频流（`None` 关闭音频）
    pub fn activate_audio_stream_at_index(&mut self, index: Option<usize>) -> Result<()> {
        {
            let core = self.shared.core.lock();
            let session = core.usable_session()?;
            let count = session.stream_info.as_ref().map_or(0, |i| i.audio_streams.len());
            if let Some(i) = index.filter(|i| *i >= count) {
                return Err(PlayerError::StreamNotFound(format!("音频流 #{} (共 {} 个)", i, count)));
            }
            if session.active_audio_stream_index == index {
                return Ok(());
            }
        }

        info!("{} 🔊 切换音频流: {:?}", log_ctx(), index);
        self.shared.buffer.purge_audio();
        let epochs = self.shared.buffer.epochs();
        match &self.producer {
            Some(producer) => producer.send(ProducerCommand::ActivateAudio { index, epochs }),
            None => {
                if let Some(source) = self.source.as_mut() {
                    source.activate_audio_stream(index)?;
                }
            }
        }

        let mut core = self.shared.core.lock();
        let position = core.current_time();
        if let Some(session) = core.session.as_mut() {
            session.active_audio_stream_index = index;
        }
        core.active.audio = index.is_some();

        let mut audio = self.shared.audio.lock();
        audio.flush(position);
        if core.is_playing() {
            if index.is_some() {
                audio.set_anchor(match self.shared.config.sync_source {
                    SyncSource::Wall => core.corrector.anchor(),
                    SyncSource::Audio => None,
                });
                audio.start()?;
            } else {
                audio.stop();
            }
        }
        Ok(())
    }

    /// 切换字幕流（`None` 关闭字幕）
    pub fn activate_subtitle_stream_at_index(&mut self, index: Option<usize>) -> Result<()> {
        {
            let core = self.shared.core.lock();
            let session = core.usable_session()?;
            let count = session.stream_info.as_ref().map_or(0, |i| i.subtitle_streams.len());
            if let Some(i) = index.filter(|i| *i >= count) {
                return Err(PlayerError::StreamNotFound(format!("字幕流 #{} (共 {} 个)", i, count)));
            }
            if session.active_subtitle_stream_index == index {
                return Ok(());
            }
        }

        info!("{} 💬 切换字幕流: {:?}", log_ctx(), index);
        self.shared.buffer.purge_subtitle();
        let epochs = self.shared.buffer.epochs();
        match &self.producer {
            Some(producer) => producer.send(ProducerCommand::ActivateSubtitle { index, epochs }),
            None => {
                if let Some(source) = self.source.as_mut() {
                    source.activate_subtitle_stream(index)?;
                }
            }
        }

        let mut core = self.shared.core.lock();
        self.shared.clear_subtitles(&mut core);
        if let Some(session) = core.session.as_mut() {
            session.active_subtitle_stream_index = index;
        }
        Ok(())
    }

    pub fn set_deinterlacing_enabled(&mut self, enabled: bool) -> Result<()> {
        {
            let mut core = self.shared.core.lock();
            core.usable_session()?;
            if let Some(session) = core.session.as_mut() {
                session.deinterlacing_enabled = enabled;
            }
        }

        match &self.producer {
            Some(producer) => producer.send(ProducerCommand::SetDeinterlacing(enabled)),
            None => {
                if let Some(source) = self.source.as_mut() {
                    source.set_deinterlacing_enabled(enabled);
                }
            }
        }
        Ok(())
    }

    /// 当前播放位置（秒）
    ///
    /// 播放中由时钟外推，其它状态返回最后记录的时间。
    pub fn current_time(&self) -> f64 {
        let now = self.shared.clock.now();
        let core = self.shared.core.lock();
        let Some(session) = core.session.as_ref() else {
            return 0.0;
        };
        if session.state == PlaybackState::Playing && !session.buffering && !session.seeking {
            if let Some(estimate) = core.corrector.estimate(now) {
                return core.clamp_time(estimate);
            }
        }
        session.current_time
    }

    /// 会话快照（`current_time` 已更新到此刻）
    pub fn session(&self) -> Option<PlayerSession> {
        let time = self.current_time();
        let core = self.shared.core.lock();
        core.session.clone().map(|mut session| {
            session.current_time = time;
            session
        })
    }

    pub fn state(&self) -> PlaybackState {
        self.shared.core.lock().state()
    }

    pub fn is_buffering(&self) -> bool {
        self.shared.core.lock().is_buffering()
    }

    pub fn is_seeking(&self) -> bool {
        self.shared.core.lock().is_seeking()
    }

    pub fn duration(&self) -> f64 {
        self.shared.core.lock().duration()
    }

    pub fn stream_info(&self) -> Option<StreamInfo> {
        self.shared
            .core
            .lock()
            .session
            .as_ref()
            .and_then(|s| s.stream_info.clone())
    }

    pub fn config(&self) -> &PlayerConfig {
        &self.shared.config
    }

    pub fn frame_buffer(&self) -> Arc<FrameBuffer> {
        self.shared.buffer.clone()
    }

    /// 下一次渲染回调的时刻
    pub fn next_render_time(&self) -> Option<Instant> {
        self.shared.scheduler.next_fire()
    }

    /// 手动驱动：到期则执行一次渲染回调
    pub fn pump(&self) -> bool {
        self.shared.scheduler.fire_if_due(self.shared.clock.now())
    }

    /// 关闭当前输入，会话清空
    pub fn detach(&mut self) {
        self.stop();
        if let Some(mut source) = self.source.take() {
            info!("{} 📕 关闭输入: {}", log_ctx(), source.description());
            source.close();
        }
        self.pending_reposition = None;

        let mut core = self.shared.core.lock();
        core.session = None;
        core.active = ActiveKinds::default();
    }

    fn render_callback(&self) -> RenderCallback {
        let shared = self.shared.clone();
        Box::new(move |now| shared.tick(now))
    }

    /// 打断生产者、清空旧帧，让之后的数据从 `position` 开始
    fn reposition(&mut self, position: f64) {
        if self.producer.is_some() {
            self.shared.interrupt.raise();
        }
        self.shared.buffer.purge_video();
        self.shared.buffer.purge_audio();
        self.shared.buffer.purge_subtitle();
        self.shared.audio.lock().flush(position);

        let epochs = self.shared.buffer.epochs();
        match &self.producer {
            Some(producer) => producer.seek(position, epochs),
            None => self.pending_reposition = Some(position),
        }
    }

    fn ensure_producer(&mut self) -> Result<()> {
        if self.producer.is_some() {
            return Ok(());
        }
        let source = self
            .source
            .take()
            .ok_or_else(|| PlayerError::InvalidState("没有可用的数据源".to_string()))?;

        let settings = {
            let core = self.shared.core.lock();
            let info = core
                .session
                .as_ref()
                .and_then(|s| s.stream_info.clone())
                .unwrap_or_default();
            ProducerSettings::new(&self.shared.config, &info, core.active)
        };

        let context = ProducerContext {
            buffer: self.shared.buffer.clone(),
            interrupt: self.shared.interrupt.clone(),
            status: self.shared.producer_status.clone(),
            observer: self.shared.clone(),
        };
        let producer = Producer::start(
            source,
            context,
            settings,
            self.shared.buffer.epochs(),
            self.pending_reposition.take(),
        )?;
        self.producer = Some(producer);
        Ok(())
    }

    /// 生产者线程因错误退出后取回数据源
    fn reap_producer(&mut self) {
        if self.producer.as_ref().is_some_and(Producer::is_finished) {
            debug!("回收已退出的生产者线程");
            self.shutdown_producer();
        }
    }

    fn shutdown_producer(&mut self) {
        if let Some(mut producer) = self.producer.take() {
            if let Some(source) = producer.stop() {
                self.source = Some(source);
            }
        }
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        info!("{} 🗑️  销毁播放器", log_ctx());
        self.detach();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ManualClock, SchedulerDriver};
    use crate::player::audio_device::ManualAudioDevice;
    use crate::player::synthetic_source::{SyntheticConfig, SyntheticSource};
    use crate::renderer::RecordingRenderer;
    use std::sync::atomic::Ordering;
    use std::thread;

    struct Harness {
        player: Player,
        clock: Arc<ManualClock>,
        device: ManualAudioDevice,
        renderer: RecordingRenderer,
        events: Receiver<PlayerEvent>,
    }

    fn harness() -> Harness {
        let clock = Arc::new(ManualClock::new());
        let device = ManualAudioDevice::new(48000, 2);
        let renderer = RecordingRenderer::new();
        let config = PlayerConfig {
            scheduler_driver: SchedulerDriver::Manual,
            ..PlayerConfig::default()
        };
        let player = Player::with_clock(config, Box::new(device.clone()), Box::new(renderer.clone()), clock.clone())
            .unwrap();
        let events = player.subscribe();
        Harness {
            player,
            clock,
            device,
            renderer,
            events,
        }
    }

    fn short_source(duration: f64) -> Box<SyntheticSource> {
        Box::new(SyntheticSource::new(SyntheticConfig {
            duration,
            decode_delay: Duration::from_millis(1),
            ..SyntheticConfig::default()
        }))
    }

    /// 推进时钟直到进入 Playing（等待生产者填满缓冲）
    fn pump_until_playing(h: &Harness) {
        for _ in 0..500 {
            h.player.pump();
            if h.player.state() == PlaybackState::Playing && !h.player.is_buffering() {
                return;
            }
            thread::sleep(Duration::from_millis(2));
            h.clock.advance(Duration::from_millis(10));
        }
        panic!("player never started: {:?}", h.player.session());
    }

    fn drain(events: &Receiver<PlayerEvent>) -> Vec<PlayerEvent> {
        events.try_iter().collect()
    }

    #[test]
    fn test_control_before_attach_is_invalid_state() {
        let mut h = harness();
        assert!(matches!(h.player.play(), Err(PlayerError::InvalidState(_))));
        assert!(matches!(h.player.seek_to_time(1.0), Err(PlayerError::InvalidState(_))));
        assert_eq!(h.player.current_time(), 0.0);
        assert_eq!(h.player.state(), PlaybackState::Stopped);
    }

    #[test]
    fn test_attach_emits_stopped_then_prepared() {
        let mut h = harness();
        let info = h.player.attach_input(short_source(2.0)).unwrap();
        assert_eq!(info.duration, 2.0);

        let events = drain(&h.events);
        assert_eq!(events[0], PlayerEvent::StateChanged(PlaybackState::Stopped));
        assert!(matches!(events[1], PlayerEvent::PreparedToPlay(_)));
        assert_eq!(h.player.duration(), 2.0);
    }

    #[test]
    fn test_open_failure_enters_failed() {
        let mut h = harness();
        let source = SyntheticSource::new(SyntheticConfig {
            fail_on_open: Some(PlayerError::CodecNotFound("h265".to_string())),
            ..SyntheticConfig::default()
        });
        let err = h.player.attach_input(Box::new(source)).unwrap_err();
        assert!(err.is_open_time());
        assert_eq!(h.player.state(), PlaybackState::Failed(err));
        assert!(matches!(h.player.play(), Err(PlayerError::InvalidState(_))));
    }

    #[test]
    fn test_play_buffers_then_plays() {
        let mut h = harness();
        h.player.attach_input(short_source(4.0)).unwrap();
        drain(&h.events);

        h.player.play().unwrap();
        assert!(h.player.is_buffering());
        pump_until_playing(&h);

        let events = drain(&h.events);
        let buffering: Vec<_> = events
            .iter()
            .filter(|e| matches!(e, PlayerEvent::BufferingChanged(_)))
            .collect();
        assert_eq!(buffering, vec![&PlayerEvent::BufferingChanged(true), &PlayerEvent::BufferingChanged(false)]);
        assert!(events.contains(&PlayerEvent::StateChanged(PlaybackState::Playing)));
        assert!(h.renderer.stats().frames_rendered >= 1);
    }

    #[test]
    fn test_pause_freezes_time() {
        let mut h = harness();
        h.player.attach_input(short_source(4.0)).unwrap();
        h.player.play().unwrap();
        pump_until_playing(&h);

        h.clock.advance_secs(0.5);
        h.player.pump();
        h.player.pause().unwrap();
        let paused_at = h.player.current_time();
        assert!((paused_at - 0.5).abs() < 1e-6, "paused at {}", paused_at);

        h.clock.advance_secs(1.0);
        assert_eq!(h.player.current_time(), paused_at);
        assert_eq!(h.player.state(), PlaybackState::Paused);
        assert!(!h.player.pump());
    }

    #[test]
    fn test_seek_is_clamped_and_reported() {
        let mut h = harness();
        h.player.attach_input(short_source(4.0)).unwrap();
        drain(&h.events);

        h.player.seek_to_time(-3.0).unwrap();
        assert_eq!(h.player.current_time(), 0.0);
        h.player.seek_to_time(99.0).unwrap();
        assert_eq!(h.player.current_time(), 4.0);

        let events = drain(&h.events);
        assert_eq!(events, vec![PlayerEvent::TimeUpdated(0.0), PlayerEvent::TimeUpdated(4.0)]);
    }

    #[test]
    fn test_stream_selection_validates_index() {
        let mut h = harness();
        let source = SyntheticSource::new(SyntheticConfig {
            audio_tracks: 2,
            ..SyntheticConfig::default()
        });
        h.player.attach_input(Box::new(source)).unwrap();

        assert!(matches!(
            h.player.activate_audio_stream_at_index(Some(5)),
            Err(PlayerError::StreamNotFound(_))
        ));
        h.player.activate_audio_stream_at_index(Some(1)).unwrap();
        assert_eq!(h.player.session().unwrap().active_audio_stream_index, Some(1));

        h.player.activate_audio_stream_at_index(None).unwrap();
        assert_eq!(h.player.session().unwrap().active_audio_stream_index, None);
        assert!(matches!(
            h.player.activate_subtitle_stream_at_index(Some(0)),
            Err(PlayerError::StreamNotFound(_))
        ));
    }

    #[test]
    fn test_deinterlacing_reaches_source() {
        let mut h = harness();
        let source = SyntheticSource::new(SyntheticConfig {
            duration: 4.0,
            decode_delay: Duration::from_millis(1),
            ..SyntheticConfig::default()
        });
        let calls = source.calls();
        h.player.attach_input(Box::new(source)).unwrap();

        // 生产者未启动时直接交给数据源
        h.player.set_deinterlacing_enabled(true).unwrap();
        assert!(calls.deinterlacing.load(Ordering::SeqCst));
        assert!(h.player.session().unwrap().deinterlacing_enabled);

        // 播放中经由生产者转发
        h.player.play().unwrap();
        h.player.set_deinterlacing_enabled(false).unwrap();
        let mut forwarded = false;
        for _ in 0..500 {
            if !calls.deinterlacing.load(Ordering::SeqCst) {
                forwarded = true;
                break;
            }
            thread::sleep(Duration::from_millis(2));
        }
        assert!(forwarded);
        assert!(!h.player.session().unwrap().deinterlacing_enabled);
    }

    #[test]
    fn test_stop_resets_to_start() {
        let mut h = harness();
        h.player.attach_input(short_source(4.0)).unwrap();
        h.player.play().unwrap();
        pump_until_playing(&h);
        h.clock.advance_secs(1.0);
        h.player.pump();

        h.player.stop();
        assert_eq!(h.player.state(), PlaybackState::Stopped);
        assert_eq!(h.player.current_time(), 0.0);
        assert_eq!(h.player.frame_buffer().frame_count(FrameKind::Video), 0);
        assert!(h.device.pull(16).is_none());
    }
}
