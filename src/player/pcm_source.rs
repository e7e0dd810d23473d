use crate::core::{AudioFrame, PlayerError, Result, SelectableStream, StreamInfo};
use crate::player::byte_stream::ByteStream;
use crate::player::frame_source::{DecodeOutcome, FrameSource, InterruptFlag};
use log::info;
use std::io::SeekFrom;

const SAMPLE_BYTES: usize = std::mem::size_of::<f32>();

/// 原始 PCM 格式（交错 f32，本机字节序，无容器头）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl PcmFormat {
    fn bytes_per_frame(&self) -> usize {
        self.channels as usize * SAMPLE_BYTES
    }
}

/// 基于字节流的 PCM 数据源
///
/// 长度未知的流时长报告为 0，仍然可以顺序播放。
pub struct PcmFrameSource {
    stream: Box<dyn ByteStream>,
    format: PcmFormat,
    frames_per_batch: usize,
    next_frame: u64,
    audio_enabled: bool,
    scratch: Vec<u8>,
}

impl PcmFrameSource {
    pub fn new(stream: Box<dyn ByteStream>, format: PcmFormat) -> Self {
        Self {
            stream,
            format,
            // 约 21ms @ 48kHz
            frames_per_batch: 1024,
            next_frame: 0,
            audio_enabled: true,
            scratch: Vec::new(),
        }
    }

    pub fn with_batch_frames(mut self, frames: usize) -> Self {
        self.frames_per_batch = frames.max(1);
        self
    }

    fn position_of(&self, frame: u64) -> f64 {
        frame as f64 / self.format.sample_rate as f64
    }
}

impl FrameSource for PcmFrameSource {
    fn open(&mut self) -> Result<StreamInfo> {
        if self.format.sample_rate == 0 || self.format.channels == 0 {
            return Err(PlayerError::Unsupported(format!("无效的 PCM 格式: {:?}", self.format)));
        }
        self.stream.open()?;
        self.next_frame = 0;

        let duration = self
            .stream
            .content_length()
            .known()
            .map(|len| self.position_of(len / self.format.bytes_per_frame() as u64))
            .unwrap_or(0.0);

        info!("🎵 打开 PCM 输入: {} ({:.2}s)", self.stream.description(), duration);

        Ok(StreamInfo {
            duration,
            audio_streams: vec![SelectableStream {
                info: Some(format!(
                    "pcm_f32le, {} Hz, {} channels",
                    self.format.sample_rate, self.format.channels
                )),
                decodable: true,
                ..Default::default()
            }],
            active_audio_stream: Some(0),
            ..Default::default()
        })
    }

    fn decode_next(&mut self, interrupt: &InterruptFlag) -> Result<DecodeOutcome> {
        if interrupt.is_raised() {
            return Ok(DecodeOutcome::Interrupted);
        }
        if !self.audio_enabled {
            return Ok(DecodeOutcome::EndOfStream);
        }

        let bytes_per_frame = self.format.bytes_per_frame();
        self.scratch.resize(self.frames_per_batch * bytes_per_frame, 0);
        let read = self.stream.read_full(&mut self.scratch)?;

        // 末尾不完整的采样帧丢弃
        let frames = read / bytes_per_frame;
        if frames == 0 {
            return Ok(DecodeOutcome::EndOfStream);
        }

        let position = self.position_of(self.next_frame);
        let duration = frames as f64 / self.format.sample_rate as f64;
        self.next_frame += frames as u64;

        let samples = self.scratch[..frames * bytes_per_frame].to_vec();
        Ok(DecodeOutcome::Frames(vec![AudioFrame::new(position, duration, samples).into()]))
    }

    fn reposition(&mut self, position: f64, interrupt: &InterruptFlag) -> Result<()> {
        if interrupt.is_raised() {
            return Ok(());
        }
        let frame = (position.max(0.0) * self.format.sample_rate as f64).round() as u64;
        let offset = frame * self.format.bytes_per_frame() as u64;
        self.stream.seek(SeekFrom::Start(offset))?;
        self.next_frame = frame;
        Ok(())
    }

    fn activate_audio_stream(&mut self, index: Option<usize>) -> Result<()> {
        match index {
            None => self.audio_enabled = false,
            Some(0) => self.audio_enabled = true,
            Some(other) => return Err(PlayerError::StreamNotFound(format!("音频流 #{}", other))),
        }
        Ok(())
    }

    fn close(&mut self) {
        self.stream.close();
    }

    fn description(&self) -> String {
        format!("pcm {}", self.stream.description())
    }

    fn input_name(&self) -> Option<String> {
        self.stream.name()
    }
}
