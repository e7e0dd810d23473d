use crate::core::error::PlayerError;
use serde::{Deserialize, Serialize};

/// 帧类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameKind {
    Video,
    Audio,
    Subtitle,
    Artwork,
}

/// 像素布局
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelLayout {
    /// 单平面 RGBA（打包）
    Rgba,
    /// 三平面 YUV420P（Y / Cb / Cr）
    Yuv420p,
}

/// 有时间戳、参与时长统计的帧
pub trait TimedFrame {
    /// 媒体时间（秒）
    fn position(&self) -> f64;
    /// 持续时间（秒）
    fn duration(&self) -> f64;
}

/// 视频帧数据
#[derive(Debug, Clone, PartialEq)]
pub struct VideoFrame {
    position: f64,
    duration: f64,
    width: u32,
    height: u32,
    layout: PixelLayout,
    line_size: usize,
    planes: Vec<Vec<u8>>,
}

impl VideoFrame {
    /// 打包 RGBA 帧，`line_size` 为每行字节数
    pub fn rgba(position: f64, duration: f64, width: u32, height: u32, data: Vec<u8>, line_size: usize) -> Self {
        Self {
            position,
            duration,
            width,
            height,
            layout: PixelLayout::Rgba,
            line_size,
            planes: vec![data],
        }
    }

    /// 平面 YUV420P 帧
    pub fn yuv(
        position: f64,
        duration: f64,
        width: u32,
        height: u32,
        luma: Vec<u8>,
        chroma_b: Vec<u8>,
        chroma_r: Vec<u8>,
    ) -> Self {
        Self {
            position,
            duration,
            width,
            height,
            layout: PixelLayout::Yuv420p,
            line_size: width as usize,
            planes: vec![luma, chroma_b, chroma_r],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn layout(&self) -> PixelLayout {
        self.layout
    }

    pub fn line_size(&self) -> usize {
        self.line_size
    }

    pub fn planes(&self) -> &[Vec<u8>] {
        &self.planes
    }

    pub fn plane(&self, index: usize) -> Option<&[u8]> {
        self.planes.get(index).map(|p| p.as_slice())
    }

    /// 帧结束的媒体时间
    pub fn end(&self) -> f64 {
        self.position + self.duration
    }

    pub(crate) fn set_position(&mut self, position: f64) {
        self.position = position;
    }

    pub(crate) fn set_duration(&mut self, duration: f64) {
        self.duration = duration;
    }
}

impl TimedFrame for VideoFrame {
    fn position(&self) -> f64 {
        self.position
    }

    fn duration(&self) -> f64 {
        self.duration
    }
}

/// 音频帧数据：交错 f32 样本的原始字节
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    position: f64,
    duration: f64,
    samples: Vec<u8>,
}

impl AudioFrame {
    pub fn new(position: f64, duration: f64, samples: Vec<u8>) -> Self {
        Self {
            position,
            duration,
            samples,
        }
    }

    /// 由交错 f32 样本构造
    pub fn from_f32(position: f64, duration: f64, samples: &[f32]) -> Self {
        Self::new(position, duration, bytemuck::cast_slice::<f32, u8>(samples).to_vec())
    }

    pub fn samples(&self) -> &[u8] {
        &self.samples
    }

    pub fn byte_len(&self) -> usize {
        self.samples.len()
    }

    pub(crate) fn set_position(&mut self, position: f64) {
        self.position = position;
    }

    pub(crate) fn set_duration(&mut self, duration: f64) {
        self.duration = duration;
    }
}

impl TimedFrame for AudioFrame {
    fn position(&self) -> f64 {
        self.position
    }

    fn duration(&self) -> f64 {
        self.duration
    }
}

/// 字幕帧数据（已解析好的显示文本）
#[derive(Debug, Clone, PartialEq)]
pub struct SubtitleFrame {
    position: f64,
    duration: f64,
    text: String,
}

impl SubtitleFrame {
    pub fn new(position: f64, duration: f64, text: impl Into<String>) -> Self {
        Self {
            position,
            duration,
            text: text.into(),
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn end(&self) -> f64 {
        self.position + self.duration
    }

    /// 当前时间是否落在字幕显示区间内
    pub fn covers(&self, time: f64) -> bool {
        self.position <= time && time <= self.end()
    }

    pub(crate) fn set_position(&mut self, position: f64) {
        self.position = position;
    }

    pub(crate) fn set_duration(&mut self, duration: f64) {
        self.duration = duration;
    }
}

impl TimedFrame for SubtitleFrame {
    fn position(&self) -> f64 {
        self.position
    }

    fn duration(&self) -> f64 {
        self.duration
    }
}

/// 封面图（不参与时长统计）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtworkFrame {
    picture: Vec<u8>,
}

impl ArtworkFrame {
    pub fn new(picture: Vec<u8>) -> Self {
        Self { picture }
    }

    pub fn picture(&self) -> &[u8] {
        &self.picture
    }
}

/// 解码后的帧
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Audio(AudioFrame),
    Video(VideoFrame),
    Artwork(ArtworkFrame),
    Subtitle(SubtitleFrame),
}

impl Frame {
    pub fn kind(&self) -> FrameKind {
        match self {
            Frame::Audio(_) => FrameKind::Audio,
            Frame::Video(_) => FrameKind::Video,
            Frame::Artwork(_) => FrameKind::Artwork,
            Frame::Subtitle(_) => FrameKind::Subtitle,
        }
    }

    /// 封面图没有时间轴，位置恒为 0
    pub fn position(&self) -> f64 {
        match self {
            Frame::Audio(f) => f.position,
            Frame::Video(f) => f.position,
            Frame::Subtitle(f) => f.position,
            Frame::Artwork(_) => 0.0,
        }
    }

    pub fn duration(&self) -> f64 {
        match self {
            Frame::Audio(f) => f.duration,
            Frame::Video(f) => f.duration,
            Frame::Subtitle(f) => f.duration,
            Frame::Artwork(_) => 0.0,
        }
    }
}

impl From<VideoFrame> for Frame {
    fn from(frame: VideoFrame) -> Self {
        Frame::Video(frame)
    }
}

impl From<AudioFrame> for Frame {
    fn from(frame: AudioFrame) -> Self {
        Frame::Audio(frame)
    }
}

impl From<SubtitleFrame> for Frame {
    fn from(frame: SubtitleFrame) -> Self {
        Frame::Subtitle(frame)
    }
}

impl From<ArtworkFrame> for Frame {
    fn from(frame: ArtworkFrame) -> Self {
        Frame::Artwork(frame)
    }
}

/// 可选择的音频 / 字幕流
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SelectableStream {
    /// 语言（代码或名称）
    pub language: Option<String>,
    /// 编码描述，例如 "aac, 48000 Hz, stereo"
    pub info: Option<String>,
    /// 是否有可用的解码器
    pub decodable: bool,
    /// 外部输入名（外挂音轨 / 字幕文件）
    pub input_name: Option<String>,
}

impl SelectableStream {
    /// 供菜单显示的名字
    pub fn display_name(&self) -> String {
        let mut name = String::new();

        if let Some(input) = &self.input_name {
            name.push_str(&format!("[{}] - ", input));
        }

        if !self.decodable {
            name.push_str("Unsupported");
            return name;
        }

        if let Some(language) = &self.language {
            let mut chars = language.chars();
            if let Some(first) = chars.next() {
                name.extend(first.to_uppercase());
                name.push_str(chars.as_str());
            }
            if self.info.is_some() {
                name.push_str(", ");
            }
        }

        if let Some(info) = &self.info {
            name.push_str(info);
        }

        name
    }
}

/// 打开输入后得到的流信息
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StreamInfo {
    /// 总时长（秒）
    pub duration: f64,
    pub has_video: bool,
    pub frame_width: u32,
    pub frame_height: u32,
    pub pixel_layout: Option<PixelLayout>,
    pub frame_rate: Option<f64>,
    pub has_artwork: bool,
    pub audio_streams: Vec<SelectableStream>,
    pub subtitle_streams: Vec<SelectableStream>,
    /// 打开后默认激活的音频流
    pub active_audio_stream: Option<usize>,
    /// 打开后默认激活的字幕流
    pub active_subtitle_stream: Option<usize>,
}

impl StreamInfo {
    pub fn has_audio(&self) -> bool {
        !self.audio_streams.is_empty()
    }

    pub fn has_subtitles(&self) -> bool {
        !self.subtitle_streams.is_empty()
    }

    /// 名义帧时长（来自帧率）
    pub fn nominal_frame_duration(&self) -> Option<f64> {
        self.frame_rate
            .filter(|fps| fps.is_finite() && *fps > 0.0)
            .map(|fps| 1.0 / fps)
    }
}

/// 播放状态
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    Stopped,
    Failed(PlayerError),
    Paused,
    Playing,
}

impl PlaybackState {
    pub fn is_failed(&self) -> bool {
        matches!(self, PlaybackState::Failed(_))
    }
}

/// 播放会话
///
/// 在 `attach_input` 时创建，新的 attach 或显式 teardown 时替换。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlayerSession {
    pub state: PlaybackState,
    pub buffering: bool,
    pub seeking: bool,
    /// 当前播放位置（秒）
    pub current_time: f64,
    /// 总时长（秒）
    pub duration: f64,
    pub active_audio_stream_index: Option<usize>,
    pub active_subtitle_stream_index: Option<usize>,
    pub deinterlacing_enabled: bool,
    pub stream_info: Option<StreamInfo>,
}

impl Default for PlayerSession {
    fn default() -> Self {
        Self {
            state: PlaybackState::Stopped,
            buffering: false,
            seeking: false,
            current_time: 0.0,
            duration: 0.0,
            active_audio_stream_index: None,
            active_subtitle_stream_index: None,
            deinterlacing_enabled: false,
            stream_info: None,
        }
    }
}

impl PlayerSession {
    /// 由流信息创建新会话
    pub fn from_stream_info(info: StreamInfo, deinterlacing_enabled: bool) -> Self {
        Self {
            duration: info.duration.max(0.0),
            active_audio_stream_index: info.active_audio_stream,
            active_subtitle_stream_index: info.active_subtitle_stream,
            deinterlacing_enabled,
            stream_info: Some(info),
            ..Self::default()
        }
    }

    pub fn has_video(&self) -> bool {
        self.stream_info.as_ref().map(|i| i.has_video).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_accessors() {
        let frame: Frame = SubtitleFrame::new(1.5, 2.0, "hello").into();
        assert_eq!(frame.kind(), FrameKind::Subtitle);
        assert_eq!(frame.position(), 1.5);
        assert_eq!(frame.duration(), 2.0);

        let artwork: Frame = ArtworkFrame::new(vec![1, 2, 3]).into();
        assert_eq!(artwork.kind(), FrameKind::Artwork);
        assert_eq!(artwork.duration(), 0.0);
    }

    #[test]
    fn test_audio_frame_from_f32_keeps_bytes() {
        let frame = AudioFrame::from_f32(0.0, 0.1, &[0.5, -0.5]);
        assert_eq!(frame.byte_len(), 8);
        let floats: Vec<f32> = frame
            .samples()
            .chunks_exact(4)
            .map(|b| f32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        assert_eq!(floats, vec![0.5, -0.5]);
    }

    #[test]
    fn test_yuv_frame_has_three_planes() {
        let frame = VideoFrame::yuv(0.0, 0.04, 4, 2, vec![0; 8], vec![0; 2], vec![0; 2]);
        assert_eq!(frame.layout(), PixelLayout::Yuv420p);
        assert_eq!(frame.planes().len(), 3);
        assert_eq!(frame.plane(1).map(|p| p.len()), Some(2));
        assert!(frame.plane(3).is_none());
    }

    #[test]
    fn test_stream_display_name() {
        let stream = SelectableStream {
            language: Some("english".into()),
            info: Some("aac, stereo".into()),
            decodable: true,
            input_name: Some("movie.en".into()),
        };
        assert_eq!(stream.display_name(), "[movie.en] - English, aac, stereo");

        let unsupported = SelectableStream {
            language: Some("fr".into()),
            decodable: false,
            ..Default::default()
        };
        assert_eq!(unsupported.display_name(), "Unsupported");
    }

    #[test]
    fn test_nominal_frame_duration() {
        let info = StreamInfo {
            frame_rate: Some(25.0),
            ..Default::default()
        };
        assert_eq!(info.nominal_frame_duration(), Some(0.04));
        assert_eq!(StreamInfo::default().nominal_frame_duration(), None);
    }

    #[test]
    fn test_session_from_stream_info() {
        let info = StreamInfo {
            duration: 10.0,
            has_video: true,
            audio_streams: vec![SelectableStream::default()],
            active_audio_stream: Some(0),
            ..Default::default()
        };
        let session = PlayerSession::from_stream_info(info, true);
        assert_eq!(session.state, PlaybackState::Stopped);
        assert_eq!(session.duration, 10.0);
        assert_eq!(session.active_audio_stream_index, Some(0));
        assert!(session.deinterlacing_enabled);
        assert!(session.has_video());
    }
}
