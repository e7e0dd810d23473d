use crate::core::Result;
use crate::player::log_ctx;
use log::{debug, info};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// 拉取回调：填满交错 f32 缓冲（长度 = 帧数 × 声道数）
pub type AudioPullCallback = Box<dyn FnMut(&mut [f32]) + Send>;

/// 平台音频设备抽象
///
/// 设备在自己的实时线程上以原生采样率 / 声道数调用拉取回调。
pub trait AudioDevice: Send {
    fn sample_rate(&self) -> u32;

    fn channels(&self) -> u16;

    /// 注册回调并开始拉取
    fn start(&mut self, callback: AudioPullCallback) -> Result<()>;

    /// 停止拉取；返回后回调不再被调用
    fn stop(&mut self);

    fn is_running(&self) -> bool;
}

/// 空设备：按实时节奏拉取并丢弃样本
pub struct NullAudioDevice {
    sample_rate: u32,
    channels: u16,
    period: Duration,
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
}

impl NullAudioDevice {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
            period: Duration::from_millis(10),
            running: Arc::new(AtomicBool::new(false)),
            thread_handle: None,
        }
    }
}

impl Default for NullAudioDevice {
    fn default() -> Self {
        Self::new(48_000, 2)
    }
}

impl AudioDevice for NullAudioDevice {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn start(&mut self, mut callback: AudioPullCallback) -> Result<()> {
        self.stop();

        let frames = (self.sample_rate as u128 * self.period.as_millis() / 1000) as usize;
        let mut data = vec![0.0f32; frames.max(1) * self.channels as usize];
        let period = self.period;
        let running = self.running.clone();
        running.store(true, Ordering::SeqCst);

        let handle = thread::Builder::new()
            .name("null-audio".to_string())
            .spawn(move || {
                info!("{} 🔇 空音频设备开始拉取", log_ctx());
                let mut next = Instant::now();
                while running.load(Ordering::SeqCst) {
                    callback(&mut data);
                    next += period;
                    thread::sleep(next.saturating_duration_since(Instant::now()));
                }
            })?;

        self.thread_handle = Some(handle);
        Ok(())
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
            debug!("🔇 空音频设备已停止");
        }
    }

    fn is_running(&self) -> bool {
        self.thread_handle.is_some()
    }
}

impl Drop for NullAudioDevice {
    fn drop(&mut self) {
        self.stop();
    }
}

/// 手动设备：回调只在调用 `pull` 时执行（测试 / 离线渲染用）
///
/// 可以克隆：一份交给播放器，一份留给驱动方。
#[derive(Clone)]
pub struct ManualAudioDevice {
    sample_rate: u32,
    channels: u16,
    callback: Arc<Mutex<Option<AudioPullCallback>>>,
}

impl ManualAudioDevice {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
            callback: Arc::new(Mutex::new(None)),
        }
    }

    /// 请求 `frames` 个采样帧；设备未启动时返回 `None`
    pub fn pull(&self, frames: usize) -> Option<Vec<f32>> {
        let mut data = vec![0.0f32; frames * self.channels as usize];
        self.pull_into(&mut data).then_some(data)
    }

    /// 填充调用方提供的缓冲，返回是否调用了回调
    pub fn pull_into(&self, data: &mut [f32]) -> bool {
        match self.callback.lock().as_mut() {
            Some(callback) => {
                callback(data);
                true
            }
            None => false,
        }
    }
}

impl AudioDevice for ManualAudioDevice {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn start(&mut self, callback: AudioPullCallback) -> Result<()> {
        *self.callback.lock() = Some(callback);
        Ok(())
    }

    fn stop(&mut self) {
        self.callback.lock().take();
    }

    fn is_running(&self) -> bool {
        self.callback.lock().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_manual_device_pulls_on_demand() {
        let mut device = ManualAudioDevice::new(48_000, 2);
        let driver = device.clone();
        assert!(driver.pull(16).is_none());

        device
            .start(Box::new(|data: &mut [f32]| data.iter_mut().for_each(|s| *s = 0.25)))
            .unwrap();
        let data = driver.pull(16).unwrap();
        assert_eq!(data.len(), 32);
        assert!(data.iter().all(|s| *s == 0.25));

        device.stop();
        assert!(!driver.is_running());
    }

    #[test]
    fn test_null_device_paces_callback() {
        let mut device = NullAudioDevice::new(8_000, 1);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        device
            .start(Box::new(move |data: &mut [f32]| {
                assert_eq!(data.len(), 80);
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        thread::sleep(Duration::from_millis(60));
        device.stop();

        let seen = calls.load(Ordering::SeqCst);
        assert!(seen >= 1);
        thread::sleep(Duration::from_millis(30));
        assert_eq!(calls.load(Ordering::SeqCst), seen);
    }
}
