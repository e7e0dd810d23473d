#![allow(dead_code)]

use crossbeam_channel::Receiver;
use mpeg_playback::core::{ManualClock, PlaybackState, PlayerConfig, SchedulerDriver};
use mpeg_playback::player::{FrameSource, ManualAudioDevice, Player, PlayerEvent, SyntheticConfig, SyntheticSource};
use mpeg_playback::renderer::RecordingRenderer;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

pub const SAMPLE_RATE: u32 = 48_000;
pub const CHANNELS: u16 = 2;

/// 手动时钟 + 手动调度 + 手动音频设备
pub struct Harness {
    pub player: Player,
    pub clock: Arc<ManualClock>,
    pub device: ManualAudioDevice,
    pub renderer: RecordingRenderer,
    pub events: Receiver<PlayerEvent>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(PlayerConfig::default())
    }

    pub fn with_config(config: PlayerConfig) -> Self {
        let _ = env_logger::builder().is_test(true).try_init();

        let clock = Arc::new(ManualClock::new());
        let device = ManualAudioDevice::new(SAMPLE_RATE, CHANNELS);
        let renderer = RecordingRenderer::new();
        let config = PlayerConfig {
            scheduler_driver: SchedulerDriver::Manual,
            ..config
        };
        let player = Player::with_clock(config, Box::new(device.clone()), Box::new(renderer.clone()), clock.clone())
            .expect("player");
        let events = player.subscribe();
        Self {
            player,
            clock,
            device,
            renderer,
            events,
        }
    }

    pub fn attach(&mut self, source: impl FrameSource + 'static) {
        self.player.attach_input(Box::new(source)).expect("attach");
    }

    /// 等生产者送来足够的视频（或源已耗尽）
    pub fn wait_for_data(&self) {
        let buffer = self.player.frame_buffer();
        for _ in 0..2000 {
            if buffer.buffered_video_duration() >= Duration::from_millis(200)
                || buffer.buffered_audio_duration() >= Duration::from_millis(200)
                || buffer.is_source_exhausted()
            {
                return;
            }
            thread::sleep(Duration::from_millis(1));
        }
    }

    /// 推进墙上时钟，拉取同样时长的音频，然后驱动一次渲染
    pub fn step(&self, millis: u64) {
        self.wait_for_data();
        self.clock.advance(Duration::from_millis(millis));
        let frames = SAMPLE_RATE as usize * millis as usize / 1000;
        self.device.pull(frames);
        self.player.pump();
    }

    pub fn play_until_engaged(&mut self) {
        self.player.play().expect("play");
        self.wait_until_engaged();
    }

    /// 一直驱动到真正开始（或恢复）播放：缓冲要达到播放器自己的就绪条件，不是固定阈值
    pub fn wait_until_engaged(&self) {
        for _ in 0..5000 {
            self.player.pump();
            if self.is_engaged() {
                return;
            }
            thread::sleep(Duration::from_millis(1));
            self.clock.advance(Duration::from_millis(10));
        }
        panic!("player never started: {:?}", self.player.session());
    }

    pub fn is_engaged(&self) -> bool {
        self.player.state() == PlaybackState::Playing && !self.player.is_buffering()
    }

    pub fn drain(&self) -> Vec<PlayerEvent> {
        self.events.try_iter().collect()
    }

    /// 等待满足条件的事件（生产者线程上报的失败是异步的）
    pub fn wait_for_event(&self, mut matches: impl FnMut(&PlayerEvent) -> bool) -> Vec<PlayerEvent> {
        let mut seen = Vec::new();
        for _ in 0..2000 {
            while let Ok(event) = self.events.try_recv() {
                let done = matches(&event);
                seen.push(event);
                if done {
                    return seen;
                }
            }
            self.clock.advance(Duration::from_millis(10));
            self.player.pump();
            thread::sleep(Duration::from_millis(1));
        }
        panic!("event never arrived, saw {:?}", seen);
    }
}

/// 带 1ms 解码耗时的测试图案，避免生产者在 play() 返回前就填满缓冲
pub fn synthetic(duration: f64) -> SyntheticSource {
    SyntheticSource::new(SyntheticConfig {
        duration,
        decode_delay: Duration::from_millis(1),
        ..SyntheticConfig::default()
    })
}

pub fn state_changes(events: &[PlayerEvent]) -> Vec<PlaybackState> {
    events
        .iter()
        .filter_map(|e| match e {
            PlayerEvent::StateChanged(state) => Some(state.clone()),
            _ => None,
        })
        .collect()
}
