//! 播放编排核心
//!
//! 从可插拔的 [`player::FrameSource`] 拉取解码帧，放进有水位控制的 [`player::FrameBuffer`]，
//! 由 [`player::RenderScheduler`] 按媒体时间把视频帧交给 [`renderer::Renderer`]，
//! 音频由 [`player::AudioOutput`] 以拉取方式交给 [`player::AudioDevice`]。
//! 外挂音轨 / 字幕输入由 [`player::InputSet`] 和主输入一起解码。
//! 对外入口是 [`player::Player`]。

pub mod core;
pub mod player;
pub mod renderer;

pub use crate::core::{PlaybackState, PlayerConfig, PlayerError, PlayerSession, Result, StreamInfo};
pub use crate::player::{Player, PlayerEvent};
