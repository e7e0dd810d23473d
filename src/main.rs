use anyhow::{Context, Result};
use crossbeam_channel::RecvTimeoutError;
use log::info;
use mpeg_playback::core::{PlaybackState, PlayerConfig};
use mpeg_playback::player::{AudioDevice, NullAudioDevice, Player, PlayerEvent, SyntheticConfig, SyntheticSource};
use mpeg_playback::renderer::RecordingRenderer;
use std::time::{Duration, Instant};

/// 等待事件的最长时间，超过说明播放卡住了
const EVENT_TIMEOUT: Duration = Duration::from_secs(10);

/// 事件轮询间隔（Manual 驱动时也是渲染推进间隔）
const POLL_INTERVAL: Duration = Duration::from_millis(5);

fn audio_device(config: &SyntheticConfig) -> Result<Box<dyn AudioDevice>> {
    #[cfg(feature = "cpal-output")]
    {
        match mpeg_playback::player::CpalAudioDevice::new(config.sample_rate, config.channels) {
            Ok(device) => return Ok(Box::new(device)),
            Err(e) => log::warn!("⚠️  打开音频设备失败，改用空设备: {}", e),
        }
    }
    Ok(Box::new(NullAudioDevice::new(config.sample_rate, config.channels)))
}

fn main() -> Result<()> {
    // 初始化日志
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    info!("🎬 mpeg_playback 演示启动");

    // 第一个参数：可选的 JSON 配置文件
    let config = match std::env::args().nth(1) {
        Some(path) => PlayerConfig::load(&path).with_context(|| format!("读取配置失败: {}", path))?,
        None => PlayerConfig::default(),
    };
    info!("配置: {:?}", config);

    let source_config = SyntheticConfig {
        duration: 5.0,
        tone_hz: Some(440.0),
        subtitles: vec![
            (0.5, 1.5, "你好".to_string()),
            (3.8, 1.0, "再见".to_string()),
        ],
        artwork: Some(vec![0xff; 64]),
        ..SyntheticConfig::default()
    };

    let renderer = RecordingRenderer::new();
    let device = audio_device(&source_config)?;
    let mut player = Player::new(config, device, Box::new(renderer.clone()))?;
    let events = player.subscribe();

    let info = player.attach_input(Box::new(SyntheticSource::new(source_config)))?;
    info!("媒体时长: {:.2}s, 视频 {}x{}", info.duration, info.frame_width, info.frame_height);
    player.play()?;

    let mut seeked = false;
    let mut last_event = Instant::now();
    loop {
        // Manual 驱动时由这里推进渲染
        player.pump();

        let event = match events.recv_timeout(POLL_INTERVAL) {
            Ok(event) => event,
            Err(RecvTimeoutError::Timeout) if last_event.elapsed() < EVENT_TIMEOUT => continue,
            Err(e) => anyhow::bail!("等待播放器事件失败: {}", e),
        };
        last_event = Instant::now();

        match &event {
            PlayerEvent::TimeUpdated(time) => {
                info!("⏱️  {:.2}s / {:.2}s, 字幕: {:?}", time, player.duration(), renderer.subtitle());
                // 演示一次拖动：跳过中间一段
                if !seeked && *time >= 1.0 {
                    seeked = true;
                    player.begin_seeking()?;
                    player.seek_to_time(3.5)?;
                    player.end_seeking()?;
                }
            }
            PlayerEvent::StateChanged(PlaybackState::Failed(e)) => {
                anyhow::bail!("播放失败: {}", e);
            }
            PlayerEvent::FinishedPlaying => {
                info!("🏁 播放完成");
                break;
            }
            other => info!("📣 {:?}", other),
        }
    }

    let stats = renderer.stats();
    info!(
        "渲染统计: {} 帧, 最后位置 {:?}, 封面 {}",
        stats.frames_rendered,
        stats.last_position,
        renderer.has_artwork()
    );
    Ok(())
}
