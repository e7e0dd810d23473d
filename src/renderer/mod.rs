// 渲染模块

pub mod recording;

use crate::core::{ArtworkFrame, Result, VideoFrame};

pub use recording::{RecordingRenderer, RenderStats};

/// 视频渲染器接口（外部 GPU / UI 消费者）
///
/// 每次调用接收一帧视频；字幕与封面图只在变化时通知。
pub trait Renderer: Send {
    /// 绘制一帧
    fn render(&mut self, frame: &VideoFrame) -> Result<()>;

    /// 当前字幕文本（`None` 表示清除）
    fn show_subtitle(&mut self, _text: Option<&str>) {}

    fn show_artwork(&mut self, _artwork: &ArtworkFrame) {}

    /// 会话结束 / 重新打开时清空画面
    fn clear(&mut self) {}
}

/// 什么也不画
#[derive(Debug, Default, Clone, Copy)]
pub struct NullRenderer;

impl Renderer for NullRenderer {
    fn render(&mut self, _frame: &VideoFrame) -> Result<()> {
        Ok(())
    }
}
