use crate::core::SubtitleFrame;
use crate::player::frame_buffer::FrameBuffer;

/// 当前显示中的字幕
#[derive(Debug, Default)]
pub struct SubtitleTrack {
    cues: Vec<SubtitleFrame>,
    shown: Option<String>,
}

impl SubtitleTrack {
    pub fn new() -> Self {
        Self::default()
    }

    /// 按当前时间更新字幕，返回显示文本是否变化
    pub fn update(&mut self, buffer: &FrameBuffer, time: f64) -> bool {
        self.cues.retain(|cue| cue.covers(time));

        buffer.with_subtitles(|queue| {
            while let Some(front) = queue.front() {
                if front.end() < time {
                    // 过期
                    queue.pop();
                } else if front.covers(time) {
                    if let Some(cue) = queue.pop() {
                        self.cues.push(cue);
                    }
                } else {
                    break;
                }
            }
        });

        let text = self
            .cues
            .iter()
            .map(|cue| cue.text().trim())
            .filter(|text| !text.is_empty())
            .collect::<Vec<_>>()
            .join("\n");
        let text = (!text.is_empty()).then_some(text);

        if text != self.shown {
            self.shown = text;
            true
        } else {
            false
        }
    }

    /// 清空显示，返回是否原本有字幕
    pub fn clear(&mut self) -> bool {
        self.cues.clear();
        self.shown.take().is_some()
    }

    pub fn text(&self) -> Option<&str> {
        self.shown.as_deref()
    }
}
