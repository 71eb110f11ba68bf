// 该文件是 Qingfeng （清风） 项目的一部分。
// src/input/live.rs - 拥塞控制的实时输入源
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

//! 实时输入源。
//!
//! 采集线程持续从设备取帧，经 [`CongestionWindow`] 准入后发布到
//! 单个“最新帧”槽位；消费者在 `load_data` 中等待比上次更新的帧。
//! 消费者跟不上时，窗口收缩，多余的帧在采集线程中直接丢弃。

use std::{
  sync::{
    Arc, Condvar, Mutex, MutexGuard, PoisonError,
    atomic::{AtomicBool, AtomicU64, Ordering},
  },
  thread::{self, JoinHandle},
  time::{Duration, Instant},
};

use chrono::{SecondsFormat, Utc};
use tracing::{debug, error, info, warn};

use super::{Admission, CaptureDevice, CongestionWindow, Grab, Input, InputError, SourceState};
use crate::{
  config::{ConfigError, StageOptions},
  context::PipelineContext,
  frame::Frame,
  signal::StopSignal,
};

#[derive(Debug, Clone, PartialEq)]
pub struct LiveSourceConfig {
  /// 初始窗口
  pub window: f64,
  /// 窗口上限
  pub max_window: f64,
  /// `load_data` 检查停止标志的间隔
  pub poll_interval: Duration,
  /// 设备暂时无帧时的重试间隔
  pub retry_interval: Duration,
}

impl Default for LiveSourceConfig {
  fn default() -> Self {
    Self {
      window: 100.0,
      max_window: 100.0,
      poll_interval: Duration::from_millis(100),
      retry_interval: Duration::from_secs(1),
    }
  }
}

impl LiveSourceConfig {
  /// 读取 `max_buffer`、`window`、`poll_ms`、`retry_ms`
  pub fn from_options(options: &mut StageOptions) -> Result<Self, ConfigError> {
    let default = Self::default();
    let max_window = match options.take_or::<u32>("max_buffer", 0)? {
      0 => default.max_window,
      n => f64::from(n),
    };
    Ok(Self {
      window: options.take_or("window", max_window)?,
      max_window,
      poll_interval: options.take_millis("poll_ms", default.poll_interval)?,
      retry_interval: options.take_millis("retry_ms", default.retry_interval)?,
    })
  }
}

/// 采集统计快照
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CaptureStats {
  pub admitted: u64,
  pub dropped: u64,
  pub window_size: f64,
}

struct Published {
  seq: u64,
  frame_id: String,
  frame: Arc<Frame>,
}

#[derive(Default)]
struct Slot {
  latest: Option<Arc<Published>>,
  failure: Option<String>,
  ended: bool,
}

struct Shared {
  slot: Mutex<Slot>,
  fresh: Condvar,
  /// 消费者最近取走的帧序号
  taken: AtomicU64,
  stop: AtomicBool,
  admitted: AtomicU64,
  dropped: AtomicU64,
  window_bits: AtomicU64,
}

impl Shared {
  fn new(window: f64) -> Self {
    Self {
      slot: Mutex::new(Slot::default()),
      fresh: Condvar::new(),
      taken: AtomicU64::new(0),
      stop: AtomicBool::new(false),
      admitted: AtomicU64::new(0),
      dropped: AtomicU64::new(0),
      window_bits: AtomicU64::new(window.to_bits()),
    }
  }

  fn lock(&self) -> MutexGuard<'_, Slot> {
    self.slot.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn should_stop(&self, signal: &StopSignal) -> bool {
    self.stop.load(Ordering::Acquire) || signal.is_raised()
  }

  fn fail(&self, reason: String) {
    self.lock().failure = Some(reason);
    self.fresh.notify_all();
  }

  fn stats(&self) -> CaptureStats {
    CaptureStats {
      admitted: self.admitted.load(Ordering::Relaxed),
      dropped: self.dropped.load(Ordering::Relaxed),
      window_size: f64::from_bits(self.window_bits.load(Ordering::Relaxed)),
    }
  }
}

/// 以拥塞窗口节流的实时输入源
pub struct LiveSource<D: CaptureDevice> {
  name: String,
  device: Option<D>,
  config: LiveSourceConfig,
  shared: Arc<Shared>,
  handle: Option<JoinHandle<D>>,
  signal: StopSignal,
  state: SourceState,
  last_seq: u64,
}

impl<D: CaptureDevice> LiveSource<D> {
  pub fn new(name: impl Into<String>, device: D, config: LiveSourceConfig) -> Self {
    let name = name.into();
    info!("正在预热输入源 {}: {}", name, device.describe());
    Self {
      name,
      device: Some(device),
      shared: Arc::new(Shared::new(config.window)),
      config,
      handle: None,
      signal: StopSignal::new(),
      state: SourceState::WarmingUp,
      last_seq: 0,
    }
  }

  pub fn state(&self) -> SourceState {
    self.state
  }

  pub fn stats(&self) -> CaptureStats {
    self.shared.stats()
  }
}

/// 采集时间戳加发布序号
fn frame_id_now(seq: u64) -> String {
  format!(
    "{}_{}",
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
    seq
  )
}

/// 分段休眠，以便及时响应停止请求
fn nap(shared: &Shared, signal: &StopSignal, total: Duration) {
  const STEP: Duration = Duration::from_millis(20);
  let deadline = Instant::now() + total;
  while !shared.should_stop(signal) {
    let now = Instant::now();
    if now >= deadline {
      break;
    }
    thread::sleep(STEP.min(deadline - now));
  }
}

fn capture_loop<D: CaptureDevice>(
  mut device: D,
  shared: Arc<Shared>,
  config: LiveSourceConfig,
  signal: StopSignal,
) -> D {
  let mut window = CongestionWindow::new(config.window, config.max_window);
  let mut seq = 0u64;

  while !shared.should_stop(&signal) {
    match device.grab() {
      Ok(Grab::Frame(frame)) => {
        let backlog = seq.saturating_sub(shared.taken.load(Ordering::Acquire));
        window.settle(u32::try_from(backlog).unwrap_or(u32::MAX));
        match window.on_arrival() {
          Admission::Admitted => {
            seq += 1;
            let published = Arc::new(Published {
              seq,
              frame_id: frame_id_now(seq),
              frame: Arc::new(frame),
            });
            shared.lock().latest = Some(published);
            shared.fresh.notify_all();
            shared.admitted.fetch_add(1, Ordering::Relaxed);
          }
          Admission::Dropped => {
            let dropped = shared.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            debug!(
              "消费者未跟上, 丢弃帧 (窗口 {:.2}, 累计丢弃 {})",
              window.window_size(),
              dropped
            );
          }
        }
        shared
          .window_bits
          .store(window.window_size().to_bits(), Ordering::Relaxed);
      }
      Ok(Grab::Empty) => {
        warn!("未采集到帧, {:?} 后重试", config.retry_interval);
        nap(&shared, &signal, config.retry_interval);
      }
      Ok(Grab::End) => {
        warn!("采集设备 {} 已无更多帧", device.describe());
        shared.lock().ended = true;
        shared.fresh.notify_all();
        break;
      }
      Err(e) => {
        error!("采集失败: {}", e);
        shared.fail(e.to_string());
        break;
      }
    }
  }

  debug!("采集线程退出");
  device
}

impl<D: CaptureDevice> Input for LiveSource<D> {
  fn name(&self) -> &str {
    &self.name
  }

  fn run(&mut self, signal: &StopSignal) -> Result<(), InputError> {
    match self.state {
      SourceState::Running => return Ok(()),
      SourceState::Stopped => return Err(InputError::Stopped),
      SourceState::WarmingUp => {}
    }
    let device = self.device.take().ok_or(InputError::NotRunning)?;

    self.signal = signal.clone();
    let shared = Arc::clone(&self.shared);
    let config = self.config.clone();
    let thread_signal = signal.clone();
    let handle = thread::Builder::new()
      .name(format!("{}-capture", self.name))
      .spawn(move || capture_loop(device, shared, config, thread_signal))?;

    self.handle = Some(handle);
    self.state = SourceState::Running;
    info!("输入源 {} 就绪", self.name);
    Ok(())
  }

  fn load_data(&mut self, ctx: &mut PipelineContext) -> Result<(), InputError> {
    match self.state {
      SourceState::WarmingUp => return Err(InputError::NotRunning),
      SourceState::Stopped => return Err(InputError::Stopped),
      SourceState::Running => {}
    }

    let mut slot = self.shared.lock();
    loop {
      if let Some(published) = slot.latest.as_ref().filter(|p| p.seq > self.last_seq) {
        let published = Arc::clone(published);
        drop(slot);
        self.last_seq = published.seq;
        self.shared.taken.store(published.seq, Ordering::Release);
        ctx.load(published.frame_id.clone(), Arc::clone(&published.frame));
        return Ok(());
      }
      if let Some(reason) = slot.failure.as_ref() {
        return Err(InputError::Acquisition(reason.clone()));
      }
      if slot.ended {
        return Err(InputError::EndOfStream);
      }
      if self.shared.should_stop(&self.signal) {
        return Err(InputError::Stopped);
      }
      slot = match self.shared.fresh.wait_timeout(slot, self.config.poll_interval) {
        Ok((guard, _)) => guard,
        Err(poisoned) => poisoned.into_inner().0,
      };
    }
  }

  fn stop(&mut self) {
    if self.state == SourceState::Stopped {
      return;
    }
    info!("正在释放输入源 {} 的资源...", self.name);
    self.shared.stop.store(true, Ordering::Release);
    self.shared.fresh.notify_all();

    let device = match self.handle.take() {
      Some(handle) => match handle.join() {
        Ok(device) => Some(device),
        Err(_) => {
          error!("{}", InputError::CaptureThreadPanicked);
          None
        }
      },
      None => self.device.take(),
    };
    if let Some(mut device) = device {
      device.release();
    }

    let stats = self.shared.stats();
    info!(
      "输入源 {} 已停止 (发布 {} 帧, 丢弃 {} 帧)",
      self.name, stats.admitted, stats.dropped
    );
    self.state = SourceState::Stopped;
  }

  fn stopped(&self) -> bool {
    self.state == SourceState::Stopped
  }
}

impl<D: CaptureDevice> Drop for LiveSource<D> {
  fn drop(&mut self) {
    self.stop();
  }
}
