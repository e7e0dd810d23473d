use crate::core::{Frame, Result, StreamInfo};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// 中断标志
///
/// seek / stop 前由播放器置位，数据源在每个阻塞点轮询它并尽快返回。
/// 被中断不是错误。
#[derive(Debug, Clone, Default)]
pub struct InterruptFlag(Arc<AtomicBool>);

impl InterruptFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// `decode_next` 的结果
#[derive(Debug)]
pub enum DecodeOutcome {
    /// 一批按时间排序的帧（可以混合多种类型）
    Frames(Vec<Frame>),
    /// 到达流末尾
    EndOfStream,
    /// 调用被中断标志打断
    Interrupted,
}

/// 帧数据源抽象接口（外部解码器）
///
/// 不同的输入（本地文件、网络流、内存 PCM、测试图案）都实现这个接口。
/// 除 `open` 外所有方法都在生产者线程上调用。
pub trait FrameSource: Send {
    /// 打开输入并读取流信息
    fn open(&mut self) -> Result<StreamInfo>;

    /// 解码下一批帧
    ///
    /// 返回：
    /// - Ok(Frames): 成功解码
    /// - Ok(EndOfStream): 到达末尾
    /// - Ok(Interrupted): 中断标志被置位
    /// - Err(e): 解码 / IO 错误
    fn decode_next(&mut self, interrupt: &InterruptFlag) -> Result<DecodeOutcome>;

    /// 重新定位到指定媒体时间（秒），可被中断
    fn reposition(&mut self, position: f64, interrupt: &InterruptFlag) -> Result<()>;

    /// 切换音频流（`None` 表示关闭音频）
    fn activate_audio_stream(&mut self, _index: Option<usize>) -> Result<()> {
        Ok(())
    }

    /// 切换字幕流（`None` 表示关闭字幕）
    fn activate_subtitle_stream(&mut self, _index: Option<usize>) -> Result<()> {
        Ok(())
    }

    fn set_deinterlacing_enabled(&mut self, _enabled: bool) {}

    /// 关闭输入
    fn close(&mut self);

    /// 获取描述信息（用于日志）
    fn description(&self) -> String;

    /// 作为外挂输入时在流名前显示的名字
    fn input_name(&self) -> Option<String> {
        None
    }
}
