use crate::core::{ArtworkFrame, Result, TimedFrame, VideoFrame};
use crate::renderer::Renderer;
use log::{debug, info};
use parking_lot::Mutex;
use std::sync::Arc;

/// 渲染统计
#[derive(Debug, Default, Clone, PartialEq)]
pub struct RenderStats {
    pub frames_rendered: u64,
    /// 画面尺寸变化次数
    pub size_changes: u64,
    pub last_position: Option<f64>,
    pub last_size: Option<(u32, u32)>,
}

#[derive(Debug, Default)]
struct Recorded {
    subtitle: Option<String>,
    artwork_bytes: usize,
    stats: RenderStats,
}

/// 只记录呈现结果的渲染器，不做像素处理
///
/// 可以克隆：播放器持有一份，调用方用另一份读取记录。
#[derive(Debug, Clone, Default)]
pub struct RecordingRenderer {
    recorded: Arc<Mutex<Recorded>>,
}

impl RecordingRenderer {
    pub fn new() -> Self {
        info!("🎨 初始化 RecordingRenderer");
        Self::default()
    }

    pub fn subtitle(&self) -> Option<String> {
        self.recorded.lock().subtitle.clone()
    }

    pub fn has_artwork(&self) -> bool {
        self.recorded.lock().artwork_bytes > 0
    }

    pub fn stats(&self) -> RenderStats {
        self.recorded.lock().stats.clone()
    }
}

impl Renderer for RecordingRenderer {
    fn render(&mut self, frame: &VideoFrame) -> Result<()> {
        let mut recorded = self.recorded.lock();
        let stats = &mut recorded.stats;

        let size = (frame.width(), frame.height());
        if stats.last_size != Some(size) {
            debug!("🖼 画面尺寸变化: {:?} -> {}x{}", stats.last_size, size.0, size.1);
            stats.last_size = Some(size);
            stats.size_changes += 1;
        }
        stats.frames_rendered += 1;
        stats.last_position = Some(frame.position());
        Ok(())
    }

    fn show_subtitle(&mut self, text: Option<&str>) {
        self.recorded.lock().subtitle = text.map(str::to_string);
    }

    fn show_artwork(&mut self, artwork: &ArtworkFrame) {
        self.recorded.lock().artwork_bytes = artwork.picture().len();
    }

    fn clear(&mut self) {
        info!("🧹 清理 RecordingRenderer");
        let mut recorded = self.recorded.lock();
        recorded.subtitle = None;
        recorded.artwork_bytes = 0;
    }
}
