//! 测试图案数据源：确定性的视频 / 音频 / 字幕 / 封面图，
//! 可注入打开失败、解码失败和解码耗时。

use crate::core::{
    ArtworkFrame, AudioFrame, Frame, PixelLayout, PlayerError, Result, SelectableStream, StreamInfo, SubtitleFrame,
    VideoFrame,
};
use crate::player::frame_source::{DecodeOutcome, FrameSource, InterruptFlag};
use log::info;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const LANGUAGES: [&str; 4] = ["english", "français", "deutsch", "中文"];

/// 测试图案参数
#[derive(Debug, Clone)]
pub struct SyntheticConfig {
    pub duration: f64,
    pub frame_rate: f64,
    pub video: bool,
    /// 视频比音频先结束（`None` 表示和 `duration` 一样长）
    pub video_duration: Option<f64>,
    pub width: u32,
    pub height: u32,
    pub layout: PixelLayout,
    pub audio_tracks: usize,
    pub sample_rate: u32,
    pub channels: u16,
    /// 正弦音调频率；`None` 输出静音
    pub tone_hz: Option<f32>,
    /// 字幕 (开始, 时长, 文本)
    pub subtitles: Vec<(f64, f64, String)>,
    pub artwork: Option<Vec<u8>>,
    /// 打开时返回的错误
    pub fail_on_open: Option<PlayerError>,
    /// 解码到该媒体时间时返回解码错误
    pub fail_at: Option<f64>,
    /// 每次解码 / 定位的模拟耗时（可被中断）
    pub decode_delay: Duration,
    /// 作为外挂输入时显示的名字
    pub name: Option<String>,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            duration: 10.0,
            frame_rate: 25.0,
            video: true,
            video_duration: None,
            width: 16,
            height: 16,
            layout: PixelLayout::Rgba,
            audio_tracks: 1,
            sample_rate: 48_000,
            channels: 2,
            tone_hz: None,
            subtitles: Vec::new(),
            artwork: None,
            fail_on_open: None,
            fail_at: None,
            decode_delay: Duration::ZERO,
            name: None,
        }
    }
}

/// 从外部观察数据源收到的调用
#[derive(Debug, Default)]
pub struct SyntheticCalls {
    pub closed: AtomicBool,
    pub deinterlacing: AtomicBool,
    pub decode_calls: AtomicUsize,
    pub repositions: Mutex<Vec<f64>>,
    pub audio_selections: Mutex<Vec<Option<usize>>>,
}

/// 测试图案数据源
pub struct SyntheticSource {
    config: SyntheticConfig,
    calls: Arc<SyntheticCalls>,
    next_index: u64,
    total_frames: u64,
    audio_enabled: bool,
    subtitles_enabled: bool,
    next_cue: usize,
    artwork_sent: bool,
}

impl SyntheticSource {
    pub fn new(config: SyntheticConfig) -> Self {
        let total_frames = (config.duration.max(0.0) * config.frame_rate).round() as u64;
        let mut subtitles = config.subtitles.clone();
        subtitles.sort_by(|a, b| a.0.total_cmp(&b.0));
        Self {
            config: SyntheticConfig { subtitles, ..config },
            calls: Arc::new(SyntheticCalls::default()),
            next_index: 0,
            total_frames,
            audio_enabled: false,
            subtitles_enabled: false,
            next_cue: 0,
            artwork_sent: false,
        }
    }

    pub fn calls(&self) -> Arc<SyntheticCalls> {
        self.calls.clone()
    }

    fn frame_position(&self, index: u64) -> f64 {
        index as f64 / self.config.frame_rate
    }

    fn sample_at(&self, index: u64) -> u64 {
        (index as f64 * self.config.sample_rate as f64 / self.config.frame_rate).round() as u64
    }

    /// 可中断的模拟耗时；返回 false 表示被中断
    fn simulate_work(&self, interrupt: &InterruptFlag) -> bool {
        let deadline = Instant::now() + self.config.decode_delay;
        while Instant::now() < deadline {
            if interrupt.is_raised() {
                return false;
            }
            thread::sleep(Duration::from_millis(1));
        }
        !interrupt.is_raised()
    }

    fn video_frame(&self, index: u64) -> VideoFrame {
        let (w, h) = (self.config.width, self.config.height);
        let position = self.frame_position(index);
        let duration = 1.0 / self.config.frame_rate;
        let shade = (index % 256) as u8;

        match self.config.layout {
            PixelLayout::Rgba => {
                let pixel = [shade, 255 - shade, 128, 255];
                let data = pixel.repeat((w * h) as usize);
                VideoFrame::rgba(position, duration, w, h, data, w as usize * 4)
            }
            PixelLayout::Yuv420p => {
                let chroma = (w.div_ceil(2) * h.div_ceil(2)) as usize;
                VideoFrame::yuv(
                    position,
                    duration,
                    w,
                    h,
                    vec![shade; (w * h) as usize],
                    vec![128; chroma],
                    vec![128; chroma],
                )
            }
        }
    }

    fn audio_frame(&self, index: u64) -> AudioFrame {
        let start = self.sample_at(index);
        let end = self.sample_at(index + 1);
        let rate = self.config.sample_rate as f64;
        let channels = self.config.channels as usize;

        let mut samples = vec![0.0f32; (end - start) as usize * channels];
        if let Some(tone) = self.config.tone_hz {
            for (i, chunk) in samples.chunks_exact_mut(channels).enumerate() {
                let t = (start + i as u64) as f64 / rate;
                let value = (std::f64::consts::TAU * tone as f64 * t).sin() as f32 * 0.2;
                chunk.fill(value);
            }
        }

        AudioFrame::from_f32(start as f64 / rate, (end - start) as f64 / rate, &samples)
    }

    fn subtitle_frames(&mut self, batch_end: f64, out: &mut Vec<Frame>) {
        while let Some((start, duration, text)) = self.config.subtitles.get(self.next_cue) {
            if *start >= batch_end {
                break;
            }
            out.push(SubtitleFrame::new(*start, *duration, text.clone()).into());
            self.next_cue += 1;
        }
    }
}

impl FrameSource for SyntheticSource {
    fn open(&mut self) -> Result<StreamInfo> {
        if let Some(err) = self.config.fail_on_open.clone() {
            return Err(err);
        }
        if self.config.frame_rate <= 0.0 || self.config.sample_rate == 0 || self.config.channels == 0 {
            return Err(PlayerError::Unsupported(format!("无效的测试图案参数: {:?}", self.config)));
        }

        let audio_streams: Vec<SelectableStream> = (0..self.config.audio_tracks)
            .map(|i| SelectableStream {
                language: LANGUAGES.get(i).map(|l| l.to_string()),
                info: Some(format!(
                    "pcm_f32le, {} Hz, {} channels",
                    self.config.sample_rate, self.config.channels
                )),
                decodable: true,
                input_name: None,
            })
            .collect();
        let subtitle_streams = if self.config.subtitles.is_empty() {
            Vec::new()
        } else {
            vec![SelectableStream {
                language: Some(LANGUAGES[0].to_string()),
                info: Some("text".to_string()),
                decodable: true,
                input_name: None,
            }]
        };

        self.audio_enabled = !audio_streams.is_empty();
        self.subtitles_enabled = !subtitle_streams.is_empty();
        self.next_index = 0;
        self.next_cue = 0;
        self.artwork_sent = false;

        info!("🧪 打开测试图案: {:.2}s, {} 帧", self.config.duration, self.total_frames);

        Ok(StreamInfo {
            duration: self.config.duration,
            has_video: self.config.video,
            frame_width: if self.config.video { self.config.width } else { 0 },
            frame_height: if self.config.video { self.config.height } else { 0 },
            pixel_layout: self.config.video.then_some(self.config.layout),
            frame_rate: self.config.video.then_some(self.config.frame_rate),
            has_artwork: self.config.artwork.is_some(),
            active_audio_stream: self.audio_enabled.then_some(0),
            active_subtitle_stream: self.subtitles_enabled.then_some(0),
            audio_streams,
            subtitle_streams,
        })
    }

    fn decode_next(&mut self, interrupt: &InterruptFlag) -> Result<DecodeOutcome> {
        self.calls.decode_calls.fetch_add(1, Ordering::SeqCst);
        if !self.simulate_work(interrupt) {
            return Ok(DecodeOutcome::Interrupted);
        }

        let position = self.frame_position(self.next_index);
        if self.config.fail_at.is_some_and(|at| position >= at) {
            return Err(PlayerError::Decode(format!("测试图案在 {:.2}s 处损坏", position)));
        }
        if self.next_index >= self.total_frames {
            return Ok(DecodeOutcome::EndOfStream);
        }

        let index = self.next_index;
        self.next_index += 1;

        let mut batch = Vec::with_capacity(4);
        if !self.artwork_sent {
            if let Some(picture) = self.config.artwork.clone() {
                batch.push(ArtworkFrame::new(picture).into());
            }
            self.artwork_sent = true;
        }
        let video_end = self.config.video_duration.unwrap_or(self.config.duration);
        if self.config.video && position < video_end {
            batch.push(self.video_frame(index).into());
        }
        if self.audio_enabled {
            batch.push(self.audio_frame(index).into());
        }
        if self.subtitles_enabled {
            let batch_end = self.frame_position(index + 1);
            self.subtitle_frames(batch_end, &mut batch);
        }

        Ok(DecodeOutcome::Frames(batch))
    }

    fn reposition(&mut self, position: f64, interrupt: &InterruptFlag) -> Result<()> {
        self.calls.repositions.lock().push(position);
        if !self.simulate_work(interrupt) {
            return Ok(());
        }

        let index = (position.max(0.0) * self.config.frame_rate).floor() as u64;
        self.next_index = index.min(self.total_frames);
        // 仍在显示中的字幕也要重新送出
        self.next_cue = self
            .config
            .subtitles
            .iter()
            .position(|(start, duration, _)| start + duration > position)
            .unwrap_or(self.config.subtitles.len());
        Ok(())
    }

    fn activate_audio_stream(&mut self, index: Option<usize>) -> Result<()> {
        self.calls.audio_selections.lock().push(index);
        match index {
            Some(i) if i >= self.config.audio_tracks => {
                Err(PlayerError::StreamNotFound(format!("音频流 #{}", i)))
            }
            _ => {
                self.audio_enabled = index.is_some();
                Ok(())
            }
        }
    }

    fn activate_subtitle_stream(&mut self, index: Option<usize>) -> Result<()> {
        match index {
            Some(i) if i > 0 || self.config.subtitles.is_empty() => {
                Err(PlayerError::StreamNotFound(format!("字幕流 #{}", i)))
            }
            _ => {
                self.subtitles_enabled = index.is_some();
                Ok(())
            }
        }
    }

    fn set_deinterlacing_enabled(&mut self, enabled: bool) {
        self.calls.deinterlacing.store(enabled, Ordering::SeqCst);
    }

    fn close(&mut self) {
        self.calls.closed.store(true, Ordering::SeqCst);
    }

    fn input_name(&self) -> Option<String> {
        self.config.name.clone()
    }

    fn description(&self) -> String {
        format!(
            "synthetic {:.2}s @ {} fps ({} audio tracks)",
            self.config.duration, self.config.frame_rate, self.config.audio_tracks
        )
    }
}
