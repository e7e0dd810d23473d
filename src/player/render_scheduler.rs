//! 渲染调度器：自我重新调度的周期驱动。
//!
//! 每次触发调用回调，回调返回下一次触发的墙上时刻，或 `None` 表示停止。
//! 回调执行期间持有槽位锁，所以 `stop()` 返回后不会再有任何调用，
//! 包括正在进行中的那一次。驱动线程每次触发后公平地让出锁。

use crate::core::{PlayerError, Result, SchedulerDriver, WallClock};
use crate::player::log_ctx;
use crossbeam::atomic::AtomicCell;
use log::{debug, info, warn};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Instant;

/// 渲染回调：参数为触发时刻，返回下一次触发时刻
pub type RenderCallback = Box<dyn FnMut(Instant) -> Option<Instant> + Send>;

struct Slot {
    callback: Option<RenderCallback>,
    next_fire: Option<Instant>,
    shutdown: bool,
}

struct SchedulerShared {
    slot: Mutex<Slot>,
    wakeup: Condvar,
    clock: Arc<dyn WallClock>,
    /// 无锁镜像，查询不必等待正在执行的回调
    armed: AtomicBool,
    next_fire: AtomicCell<Option<Instant>>,
    /// 正在执行回调的线程
    firing_thread: AtomicCell<Option<ThreadId>>,
    /// 回调内部请求的 stop
    stop_requested: AtomicBool,
}

impl SchedulerShared {
    fn in_callback(&self) -> bool {
        self.firing_thread.load() == Some(thread::current().id())
    }

    fn publish(&self, slot: &Slot) {
        self.armed.store(slot.callback.is_some(), Ordering::SeqCst);
        self.next_fire.store(slot.next_fire);
    }

    /// 到期则调用回调（调用方已持有槽位锁）
    fn fire_locked(&self, slot: &mut Slot, now: Instant) -> bool {
        let due = slot.next_fire.is_some_and(|at| at <= now);
        let Some(callback) = slot.callback.as_mut().filter(|_| due) else {
            return false;
        };

        self.firing_thread.store(Some(thread::current().id()));
        let next = callback(now);
        self.firing_thread.store(None);

        if self.stop_requested.swap(false, Ordering::SeqCst) || next.is_none() {
            slot.callback = None;
            slot.next_fire = None;
        } else {
            slot.next_fire = next;
        }
        self.publish(slot);
        true
    }
}

/// 渲染调度器
pub struct RenderScheduler {
    shared: Arc<SchedulerShared>,
    driver: SchedulerDriver,
    thread_handle: Option<JoinHandle<()>>,
}

impl RenderScheduler {
    /// `Thread` 模式下启动驱动线程；`Manual` 模式由宿主调用 `fire_if_due`
    pub fn new(driver: SchedulerDriver, clock: Arc<dyn WallClock>) -> Result<Self> {
        let shared = Arc::new(SchedulerShared {
            slot: Mutex::new(Slot {
                callback: None,
                next_fire: None,
                shutdown: false,
            }),
            wakeup: Condvar::new(),
            clock,
            armed: AtomicBool::new(false),
            next_fire: AtomicCell::new(None),
            firing_thread: AtomicCell::new(None),
            stop_requested: AtomicBool::new(false),
        });

        let thread_handle = match driver {
            SchedulerDriver::Thread => {
                let shared = shared.clone();
                let handle = thread::Builder::new()
                    .name("render-scheduler".to_string())
                    .spawn(move || Self::drive(&shared))
                    .map_err(|e| PlayerError::Io(format!("无法启动渲染调度线程: {}", e)))?;
                Some(handle)
            }
            SchedulerDriver::Manual => None,
        };

        Ok(Self {
            shared,
            driver,
            thread_handle,
        })
    }

    pub fn driver(&self) -> SchedulerDriver {
        self.driver
    }

    /// 驱动线程主循环
    fn drive(shared: &SchedulerShared) {
        info!("{} ⏱ 渲染调度线程启动", log_ctx());
        let mut slot = shared.slot.lock();

        loop {
            if slot.shutdown {
                break;
            }

            match slot.next_fire {
                None => shared.wakeup.wait(&mut slot),
                Some(at) => {
                    let now = shared.clock.now();
                    if at > now {
                        // 墙上时钟与 Instant 同源（SystemClock）
                        let deadline = Instant::now() + (at - now);
                        shared.wakeup.wait_until(&mut slot, deadline);
                    } else {
                        shared.fire_locked(&mut slot, now);
                        // 回调落后时下一次立即到期，公平让出锁，stop()/start() 才不会饿死
                        MutexGuard::bump(&mut slot);
                    }
                }
            }
        }

        info!("{} ⏱ 渲染调度线程退出", log_ctx());
    }

    /// 安装回调并在 `first_fire` 时刻第一次触发
    ///
    /// 不能在回调内部调用。
    pub fn start(&self, callback: RenderCallback, first_fire: Instant) -> Result<()> {
        if self.shared.in_callback() {
            return Err(PlayerError::InvalidState("不能在渲染回调内重新启动调度器".to_string()));
        }

        let mut slot = self.shared.slot.lock();
        slot.callback = Some(callback);
        slot.next_fire = Some(first_fire);
        self.shared.stop_requested.store(false, Ordering::SeqCst);
        self.shared.publish(&slot);
        drop(slot);

        self.shared.wakeup.notify_all();
        debug!("⏱ 渲染调度器已启动");
        Ok(())
    }

    /// 停止调度
    ///
    /// 返回后回调不会再被调用；若有回调正在其它线程执行，会等它结束。
    /// 在回调内部调用时，本次回调返回后即停止。
    pub fn stop(&self) {
        if self.shared.in_callback() {
            self.shared.stop_requested.store(true, Ordering::SeqCst);
            self.shared.armed.store(false, Ordering::SeqCst);
            return;
        }

        let mut slot = self.shared.slot.lock();
        let was_armed = slot.callback.take().is_some();
        slot.next_fire = None;
        self.shared.publish(&slot);
        drop(slot);

        self.shared.wakeup.notify_all();
        if was_armed {
            debug!("⏱ 渲染调度器已停止");
        }
    }

    pub fn is_scheduling(&self) -> bool {
        self.shared.armed.load(Ordering::SeqCst)
    }

    pub fn next_fire(&self) -> Option<Instant> {
        self.shared.next_fire.load()
    }

    /// 到期则触发一次（Manual 模式的驱动入口）
    ///
    /// 返回是否调用了回调。
    pub fn fire_if_due(&self, now: Instant) -> bool {
        if self.shared.in_callback() {
            warn!("⚠️  渲染回调内的重入触发被忽略");
            return false;
        }
        let mut slot = self.shared.slot.lock();
        self.shared.fire_locked(&mut slot, now)
    }
}

impl Drop for RenderScheduler {
    fn drop(&mut self) {
        {
            let mut slot = self.shared.slot.lock();
            slot.shutdown = true;
            slot.callback = None;
            slot.next_fire = None;
        }
        self.shared.wakeup.notify_all();

        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}
