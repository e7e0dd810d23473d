// 播放器核心模块

pub mod audio_device;
pub mod audio_output;
pub mod byte_stream;
#[cfg(feature = "cpal-output")]
pub mod cpal_device;
pub mod events;
pub mod frame_buffer;
pub mod frame_source;
pub mod input_set;
pub mod manager;
pub mod pcm_source;
pub mod producer;
pub mod render_scheduler;
pub mod subtitle_track;
pub mod synthetic_source;

pub use audio_device::{AudioDevice, AudioPullCallback, ManualAudioDevice, NullAudioDevice};
pub use audio_output::AudioOutput;
pub use byte_stream::{ByteStream, ContentLength, FileByteStream, MemoryByteStream};
#[cfg(feature = "cpal-output")]
pub use cpal_device::CpalAudioDevice;
pub use events::{EventHub, PlayerEvent};
pub use frame_buffer::{ActiveKinds, BufferEpochs, FrameBuffer, FrameQueue};
pub use frame_source::{DecodeOutcome, FrameSource, InterruptFlag};
pub use input_set::{ExternalInput, InputSet};
pub use manager::Player;
pub use pcm_source::{PcmFormat, PcmFrameSource};
pub use producer::{Producer, ProducerCommand, ProducerObserver, ProducerStatus};
pub use render_scheduler::{RenderCallback, RenderScheduler};
pub use subtitle_track::SubtitleTrack;
pub use synthetic_source::{SyntheticConfig, SyntheticCalls, SyntheticSource};

use std::process;
use std::thread;

/// 日志前缀：进程号 + 线程号
pub(crate) fn log_ctx() -> String {
    format!("[pid:{} tid:{:?}]", process::id(), thread::current().id())
}
