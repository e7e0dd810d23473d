//! 主输入 + 外挂输入（外挂音轨 / 字幕文件）
//!
//! 对生产者表现为一个数据源。视频只来自主输入，音频和字幕可以来自任意一个输入。
//! 外挂输入跟在主输入后面解码，进度追到主输入已解码的位置为止。

use crate::core::{Frame, FrameKind, PlayerError, Result, SelectableStream, StreamInfo};
use crate::player::frame_source::{DecodeOutcome, FrameSource, InterruptFlag};
use crate::player::log_ctx;
use log::{debug, info, warn};
use std::fmt;

/// 全局流序号对应的输入（`None` 为主输入）和输入内的序号
#[derive(Debug, Clone, Copy, PartialEq)]
struct Route {
    input: Option<usize>,
    local: usize,
}

/// 已打开的外挂输入
///
/// 打开后音频和字幕都处于关闭状态，被选中时才开始解码。
pub struct ExternalInput {
    source: Box<dyn FrameSource>,
    name: String,
    info: StreamInfo,
    serves_audio: bool,
    serves_subtitle: bool,
    decoded_until: f64,
    exhausted: bool,
}

impl ExternalInput {
    /// 打开外挂输入；没有音频也没有字幕流的输入被拒绝
    pub fn open(mut source: Box<dyn FrameSource>) -> Result<Self> {
        let info = match source.open() {
            Ok(info) => info,
            Err(e) => {
                source.close();
                return Err(e);
            }
        };

        let prepared = if info.audio_streams.is_empty() && info.subtitle_streams.is_empty() {
            Err(PlayerError::StreamNotFound("外挂输入中没有音频或字幕流".to_string()))
        } else {
            source
                .activate_audio_stream(None)
                .and_then(|_| source.activate_subtitle_stream(None))
        };
        if let Err(e) = prepared {
            source.close();
            return Err(e);
        }

        let name = source.input_name().unwrap_or_else(|| source.description());
        info!(
            "{} 📎 外挂输入 [{}]: 音频流 {}, 字幕流 {}",
            log_ctx(),
            name,
            info.audio_streams.len(),
            info.subtitle_streams.len()
        );
        Ok(Self {
            source,
            name,
            info,
            serves_audio: false,
            serves_subtitle: false,
            decoded_until: 0.0,
            exhausted: false,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 供菜单显示的音频流，名字前带输入名
    pub fn audio_streams(&self) -> Vec<SelectableStream> {
        self.labelled(&self.info.audio_streams)
    }

    pub fn subtitle_streams(&self) -> Vec<SelectableStream> {
        self.labelled(&self.info.subtitle_streams)
    }

    fn labelled(&self, streams: &[SelectableStream]) -> Vec<SelectableStream> {
        streams
            .iter()
            .map(|stream| SelectableStream {
                input_name: Some(self.name.clone()),
                ..stream.clone()
            })
            .collect()
    }

    fn is_serving(&self) -> bool {
        self.serves_audio || self.serves_subtitle
    }

    fn serves(&self, kind: FrameKind) -> bool {
        match kind {
            FrameKind::Audio => self.serves_audio,
            FrameKind::Subtitle => self.serves_subtitle,
            FrameKind::Video | FrameKind::Artwork => false,
        }
    }

    /// 外挂输入比主输入短时定位到它自己的末尾
    fn reposition(&mut self, position: f64, interrupt: &InterruptFlag) -> Result<()> {
        let target = match self.info.duration {
            duration if duration > 0.0 => position.min(duration),
            _ => position,
        };
        self.source.reposition(target, interrupt)?;
        self.decoded_until = target;
        self.exhausted = false;
        Ok(())
    }

    /// 解码到 `horizon` 为止，只保留被选中的类型；返回 false 表示被中断
    fn catch_up(&mut self, horizon: f64, interrupt: &InterruptFlag, out: &mut Vec<Frame>) -> Result<bool> {
        while !self.exhausted && self.decoded_until < horizon {
            match self.source.decode_next(interrupt)? {
                DecodeOutcome::Frames(batch) => {
                    let before = self.decoded_until;
                    self.take_batch(batch, out);
                    if self.decoded_until <= before {
                        // 没有带时间的帧，下次再继续
                        break;
                    }
                }
                DecodeOutcome::EndOfStream => {
                    debug!("外挂输入 [{}] 到达末尾", self.name);
                    self.exhausted = true;
                }
                DecodeOutcome::Interrupted => return Ok(false),
            }
        }
        Ok(true)
    }

    fn take_batch(&mut self, batch: Vec<Frame>, out: &mut Vec<Frame>) {
        for frame in batch {
            if frame.kind() != FrameKind::Artwork {
                self.decoded_until = self.decoded_until.max(frame.position() + frame.duration());
            }
            if self.serves(frame.kind()) {
                out.push(frame);
            }
        }
    }

    pub fn close(&mut self) {
        self.source.close();
    }
}

impl fmt::Debug for ExternalInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExternalInput")
            .field("name", &self.name)
            .field("serves_audio", &self.serves_audio)
            .field("serves_subtitle", &self.serves_subtitle)
            .field("decoded_until", &self.decoded_until)
            .finish_non_exhaustive()
    }
}

/// 生产者使用的数据源：主输入加上已挂载的外挂输入
///
/// 音频 / 字幕流的全局序号先排主输入的流，再按挂载顺序排外挂输入的流，
/// 与会话里的流列表一致。
pub struct InputSet {
    main: Box<dyn FrameSource>,
    externals: Vec<ExternalInput>,
    audio_routes: Vec<Route>,
    subtitle_routes: Vec<Route>,
    /// 主输入已解码到的媒体时间
    horizon: f64,
    main_exhausted: bool,
}

impl InputSet {
    pub fn new(main: Box<dyn FrameSource>) -> Self {
        Self {
            main,
            externals: Vec::new(),
            audio_routes: Vec::new(),
            subtitle_routes: Vec::new(),
            horizon: 0.0,
            main_exhausted: false,
        }
    }

    /// 挂载一个已打开的外挂输入，它的流排在现有流之后
    pub fn add_external(&mut self, input: ExternalInput) {
        let index = self.externals.len();
        let route = |local| Route {
            input: Some(index),
            local,
        };
        self.audio_routes.extend((0..input.info.audio_streams.len()).map(route));
        self.subtitle_routes.extend((0..input.info.subtitle_streams.len()).map(route));
        info!("{} 📎 挂载外挂输入 #{}: {}", log_ctx(), index, input.name);
        self.externals.push(input);
    }

    pub fn external_count(&self) -> usize {
        self.externals.len()
    }

    /// 某个类型当前是否由外挂输入提供
    fn served_externally(&self, kind: FrameKind) -> bool {
        self.externals.iter().any(|e| e.serves(kind))
    }

    fn route(routes: &[Route], index: usize, what: &str) -> Result<Route> {
        routes
            .get(index)
            .copied()
            .ok_or_else(|| PlayerError::StreamNotFound(format!("{} #{} (共 {} 个)", what, index, routes.len())))
    }

    /// 让外挂输入开始提供某个类型；空闲的输入先定位到主输入的解码位置
    fn start_serving(&mut self, input: usize, kind: FrameKind) -> Result<()> {
        let horizon = self.horizon;
        let Some(external) = self.externals.get_mut(input) else {
            return Err(PlayerError::StreamNotFound(format!("外挂输入 #{}", input)));
        };
        if !external.is_serving() {
            external.reposition(horizon, &InterruptFlag::new())?;
        }
        match kind {
            FrameKind::Audio => external.serves_audio = true,
            _ => external.serves_subtitle = true,
        }
        Ok(())
    }

    /// 主输入到达末尾后，外挂输入每次再解码一批，直到全部结束
    fn drain_externals(&mut self, interrupt: &InterruptFlag) -> Result<DecodeOutcome> {
        let mut batch = Vec::new();
        let mut remaining = false;
        for external in self.externals.iter_mut().filter(|e| e.is_serving() && !e.exhausted) {
            remaining = true;
            match external.source.decode_next(interrupt)? {
                DecodeOutcome::Frames(frames) => external.take_batch(frames, &mut batch),
                DecodeOutcome::EndOfStream => external.exhausted = true,
                DecodeOutcome::Interrupted => return Ok(DecodeOutcome::Interrupted),
            }
        }
        if remaining {
            Ok(DecodeOutcome::Frames(batch))
        } else {
            Ok(DecodeOutcome::EndOfStream)
        }
    }
}

impl FrameSource for InputSet {
    fn open(&mut self) -> Result<StreamInfo> {
        let info = self.main.open()?;
        let main = |local| Route { input: None, local };
        self.audio_routes = (0..info.audio_streams.len()).map(main).collect();
        self.subtitle_routes = (0..info.subtitle_streams.len()).map(main).collect();
        self.horizon = 0.0;
        self.main_exhausted = false;
        Ok(info)
    }

    fn decode_next(&mut self, interrupt: &InterruptFlag) -> Result<DecodeOutcome> {
        if self.main_exhausted {
            return self.drain_externals(interrupt);
        }

        let batch = match self.main.decode_next(interrupt)? {
            DecodeOutcome::Frames(batch) => batch,
            DecodeOutcome::EndOfStream => {
                self.main_exhausted = true;
                return self.drain_externals(interrupt);
            }
            DecodeOutcome::Interrupted => return Ok(DecodeOutcome::Interrupted),
        };

        let external_audio = self.served_externally(FrameKind::Audio);
        let external_subtitle = self.served_externally(FrameKind::Subtitle);
        let mut frames = Vec::with_capacity(batch.len());
        for frame in batch {
            if frame.kind() != FrameKind::Artwork {
                self.horizon = self.horizon.max(frame.position() + frame.duration());
            }
            let replaced = match frame.kind() {
                FrameKind::Audio => external_audio,
                FrameKind::Subtitle => external_subtitle,
                FrameKind::Video | FrameKind::Artwork => false,
            };
            if !replaced {
                frames.push(frame);
            }
        }

        let horizon = self.horizon;
        for external in self.externals.iter_mut().filter(|e| e.is_serving()) {
            if !external.catch_up(horizon, interrupt, &mut frames)? {
                return Ok(DecodeOutcome::Interrupted);
            }
        }

        frames.sort_by(|a, b| a.position().total_cmp(&b.position()));
        Ok(DecodeOutcome::Frames(frames))
    }

    fn reposition(&mut self, position: f64, interrupt: &InterruptFlag) -> Result<()> {
        self.main.reposition(position, interrupt)?;
        for external in self.externals.iter_mut().filter(|e| e.is_serving()) {
            external.reposition(position, interrupt)?;
        }
        self.horizon = position;
        self.main_exhausted = false;
        Ok(())
    }

    fn activate_audio_stream(&mut self, index: Option<usize>) -> Result<()> {
        let route = index
            .map(|i| Self::route(&self.audio_routes, i, "音频流"))
            .transpose()?;

        for (i, external) in self.externals.iter_mut().enumerate() {
            let keeps = route.is_some_and(|r| r.input == Some(i));
            if external.serves_audio && !keeps {
                external.serves_audio = false;
                if let Err(e) = external.source.activate_audio_stream(None) {
                    warn!("关闭外挂音频失败 [{}]: {}", external.name, e);
                }
            }
        }

        match route {
            None => self.main.activate_audio_stream(None),
            Some(Route { input: None, local }) => self.main.activate_audio_stream(Some(local)),
            Some(Route {
                input: Some(input),
                local,
            }) => {
                self.main.activate_audio_stream(None)?;
                self.start_serving(input, FrameKind::Audio)?;
                self.externals[input].source.activate_audio_stream(Some(local))
            }
        }
    }

    fn activate_subtitle_stream(&mut self, index: Option<usize>) -> Result<()> {
        let route = index
            .map(|i| Self::route(&self.subtitle_routes, i, "字幕流"))
            .transpose()?;

        for (i, external) in self.externals.iter_mut().enumerate() {
            let keeps = route.is_some_and(|r| r.input == Some(i));
            if external.serves_subtitle && !keeps {
                external.serves_subtitle = false;
                if let Err(e) = external.source.activate_subtitle_stream(None) {
                    warn!("关闭外挂字幕失败 [{}]: {}", external.name, e);
                }
            }
        }

        match route {
            None => self.main.activate_subtitle_stream(None),
            Some(Route { input: None, local }) => self.main.activate_subtitle_stream(Some(local)),
            Some(Route {
                input: Some(input),
                local,
            }) => {
                self.main.activate_subtitle_stream(None)?;
                self.start_serving(input, FrameKind::Subtitle)?;
                self.externals[input].source.activate_subtitle_stream(Some(local))
            }
        }
    }

    fn set_deinterlacing_enabled(&mut self, enabled: bool) {
        self.main.set_deinterlacing_enabled(enabled);
    }

    fn close(&mut self) {
        self.main.close();
        for external in self.externals.iter_mut() {
            external.close();
        }
    }

    fn description(&self) -> String {
        match self.externals.len() {
            0 => self.main.description(),
            n => format!("{} (+{} 个外挂输入)", self.main.description(), n),
        }
    }

    fn input_name(&self) -> Option<String> {
        self.main.input_name()
    }
}
