use crate::core::{PlayerError, Result};
use crate::player::audio_device::{AudioDevice, AudioPullCallback};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, Stream, StreamConfig, SupportedStreamConfigRange};
use log::{debug, error, info, warn};

/// 回退配置：(采样率, 声道数)，按优先级排列
const FALLBACK_CONFIGS: [(u32, u16); 4] = [
    (48000, 2), // 最常见
    (44100, 2), // CD 音质
    (48000, 1),
    (44100, 1),
];

/// cpal 音频设备
pub struct CpalAudioDevice {
    device: Device,
    config: StreamConfig,
    stream: Option<Stream>,
}

// cpal::Stream 本身不是 Send；设备只在持有它的 AudioOutput 的锁内被访问
unsafe impl Send for CpalAudioDevice {}

impl CpalAudioDevice {
    /// 打开默认输出设备（支持非标准配置自动回退）
    pub fn new(sample_rate: u32, channels: u16) -> Result<Self> {
        info!("初始化 cpal 音频设备: {} Hz, {} 声道", sample_rate, channels);

        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| PlayerError::AudioDevice("无法找到音频输出设备".to_string()))?;

        debug!("使用音频设备: {}", device.name().unwrap_or_default());

        let requested = Self::stream_config(sample_rate, channels);
        if Self::is_supported(&device, &requested)? {
            return Ok(Self {
                device,
                config: requested,
                stream: None,
            });
        }

        warn!("⚠️  音频设备不支持 {} Hz, {} 声道配置，回退到标准配置", sample_rate, channels);
        for (fb_rate, fb_channels) in FALLBACK_CONFIGS {
            let fallback = Self::stream_config(fb_rate, fb_channels);
            if Self::is_supported(&device, &fallback)? {
                info!("✅ 使用回退配置: {} Hz, {} 声道", fb_rate, fb_channels);
                return Ok(Self {
                    device,
                    config: fallback,
                    stream: None,
                });
            }
        }

        Err(PlayerError::AudioDevice(format!(
            "音频设备不支持任何标准配置 (原请求: {} Hz, {} 声道)",
            sample_rate, channels
        )))
    }

    fn stream_config(sample_rate: u32, channels: u16) -> StreamConfig {
        StreamConfig {
            channels,
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        }
    }

    fn is_supported(device: &Device, config: &StreamConfig) -> Result<bool> {
        let mut supported_configs = device
            .supported_output_configs()
            .map_err(|e| PlayerError::AudioDevice(format!("无法获取支持的音频配置: {}", e)))?;
        Ok(supported_configs.any(|supported| Self::is_config_compatible(config, &supported)))
    }

    /// 检查配置是否兼容
    fn is_config_compatible(config: &StreamConfig, supported: &SupportedStreamConfigRange) -> bool {
        let rate_in_range = config.sample_rate.0 >= supported.min_sample_rate().0
            && config.sample_rate.0 <= supported.max_sample_rate().0;

        rate_in_range && config.channels == supported.channels()
    }
}

impl AudioDevice for CpalAudioDevice {
    fn sample_rate(&self) -> u32 {
        self.config.sample_rate.0
    }

    fn channels(&self) -> u16 {
        self.config.channels
    }

    fn start(&mut self, mut callback: AudioPullCallback) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let stream = self
            .device
            .build_output_stream(
                &self.config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| callback(data),
                move |err| {
                    error!("音频流错误: {}", err);
                },
                None,
            )
            .map_err(|e| PlayerError::AudioDevice(format!("创建音频流失败: {}", e)))?;

        stream
            .play()
            .map_err(|e| PlayerError::AudioDevice(format!("启动音频流失败: {}", e)))?;

        self.stream = Some(stream);
        Ok(())
    }

    fn stop(&mut self) {
        // drop 流会同步停止回调
        self.stream.take();
    }

    fn is_running(&self) -> bool {
        self.stream.is_some()
    }
}
