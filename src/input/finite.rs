// 该文件是 Qingfeng （清风） 项目的一部分。
// src/input/finite.rs - 有限帧输入源
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

use std::{
  sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
    mpsc::{self, Receiver, RecvTimeoutError, SyncSender},
  },
  thread::{self, JoinHandle},
  time::Duration,
};

use tracing::{debug, error, info, warn};

use super::{CaptureDevice, Grab, Input, InputError, SourceState};
use crate::{
  config::{ConfigError, StageOptions},
  context::PipelineContext,
  frame::Frame,
  signal::StopSignal,
};

#[derive(Debug, Clone, PartialEq)]
pub struct FiniteSourceConfig {
  /// 预读缓冲的帧数
  pub buffer: usize,
  pub poll_interval: Duration,
}

impl Default for FiniteSourceConfig {
  fn default() -> Self {
    Self {
      buffer: 8,
      poll_interval: Duration::from_millis(100),
    }
  }
}

impl FiniteSourceConfig {
  /// 读取 `buffer`、`poll_ms`
  pub fn from_options(options: &mut StageOptions) -> Result<Self, ConfigError> {
    let default = Self::default();
    Ok(Self {
      buffer: options.take_or("buffer", default.buffer)?.max(1),
      poll_interval: options.take_millis("poll_ms", default.poll_interval)?,
    })
  }
}

type Delivery = Result<Frame, String>;

/// 按顺序逐帧交付、不丢帧的输入源（视频文件、图像目录）。
///
/// 帧编号为 `{设备描述}_{序号}`；交付最后一帧后 `stopped` 为真。
pub struct FiniteSource<D: CaptureDevice> {
  name: String,
  label: String,
  device: Option<D>,
  config: FiniteSourceConfig,
  receiver: Option<Receiver<Delivery>>,
  handle: Option<JoinHandle<D>>,
  halt: Arc<AtomicBool>,
  signal: StopSignal,
  state: SourceState,
  total: Option<usize>,
  index: usize,
}

impl<D: CaptureDevice> FiniteSource<D> {
  pub fn new(name: impl Into<String>, device: D, config: FiniteSourceConfig) -> Self {
    let name = name.into();
    let label = device.describe();
    let total = device.frame_count();
    info!(
      "打开有限输入源 {}: {} (总帧数 {})",
      name,
      label,
      total.map_or_else(|| "未知".to_string(), |n| n.to_string())
    );
    Self {
      name,
      label,
      device: Some(device),
      config,
      receiver: None,
      handle: None,
      halt: Arc::new(AtomicBool::new(false)),
      signal: StopSignal::new(),
      state: SourceState::WarmingUp,
      total,
      index: 0,
    }
  }

  pub fn total_frame_count(&self) -> Option<usize> {
    self.total
  }

  pub fn delivered(&self) -> usize {
    self.index
  }
}

fn read_loop<D: CaptureDevice>(
  mut device: D,
  sender: SyncSender<Delivery>,
  halt: Arc<AtomicBool>,
  signal: StopSignal,
) -> D {
  while !halt.load(Ordering::Acquire) && !signal.is_raised() {
    match device.grab() {
      Ok(Grab::Frame(frame)) => {
        // 缓冲区满时阻塞；接收端关闭后退出
        if sender.send(Ok(frame)).is_err() {
          break;
        }
      }
      Ok(Grab::Empty) => thread::sleep(Duration::from_millis(10)),
      Ok(Grab::End) => break,
      Err(e) => {
        error!("读取帧失败: {}", e);
        let _ = sender.send(Err(e.to_string()));
        break;
      }
    }
  }
  debug!("读取线程退出");
  device
}

impl<D: CaptureDevice> Input for FiniteSource<D> {
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

    let (sender, receiver) = mpsc::sync_channel(self.config.buffer);
    let halt = Arc::clone(&self.halt);
    let thread_signal = signal.clone();
    let handle = thread::Builder::new()
      .name(format!("{}-reader", self.name))
      .spawn(move || read_loop(device, sender, halt, thread_signal))?;

    self.signal = signal.clone();
    self.receiver = Some(receiver);
    self.handle = Some(handle);
    self.state = SourceState::Running;
    Ok(())
  }

  fn load_data(&mut self, ctx: &mut PipelineContext) -> Result<(), InputError> {
    match self.state {
      SourceState::WarmingUp => return Err(InputError::NotRunning),
      SourceState::Stopped => return Err(InputError::Stopped),
      SourceState::Running => {}
    }
    let receiver = self.receiver.as_ref().ok_or(InputError::NotRunning)?;

    loop {
      match receiver.recv_timeout(self.config.poll_interval) {
        Ok(Ok(frame)) => {
          ctx.load(format!("{}_{}", self.label, self.index), Arc::new(frame));
          ctx.total_frame_count = self.total;
          self.index += 1;
          if self.total == Some(self.index) {
            info!("{} 已交付最后一帧", self.name);
            self.state = SourceState::Stopped;
          }
          return Ok(());
        }
        Ok(Err(reason)) => return Err(InputError::Acquisition(reason)),
        Err(RecvTimeoutError::Timeout) => {
          if self.halt.load(Ordering::Acquire) || self.signal.is_raised() {
            return Err(InputError::Stopped);
          }
        }
        Err(RecvTimeoutError::Disconnected) => {
          if let Some(total) = self.total.filter(|&n| n != self.index) {
            warn!("{} 提前结束: 期望 {} 帧, 实际 {} 帧", self.name, total, self.index);
          }
          self.state = SourceState::Stopped;
          return Err(InputError::EndOfStream);
        }
      }
    }
  }

  fn stop(&mut self) {
    if self.handle.is_none() && self.device.is_none() {
      self.state = SourceState::Stopped;
      return;
    }
    info!("正在关闭输入源 {}...", self.name);
    self.halt.store(true, Ordering::Release);
    // 先关闭接收端，解除读取线程在发送上的阻塞
    self.receiver.take();

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
    self.state = SourceState::Stopped;
  }

  fn stopped(&self) -> bool {
    self.state == SourceState::Stopped
  }
}

impl<D: CaptureDevice> Drop for FiniteSource<D> {
  fn drop(&mut self) {
    self.stop();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    frame::FrameShape,
    input::MemoryDevice,
  };

  fn frames(n: u8) -> Vec<Frame> {
    (0..n)
      .map(|i| Frame::filled(FrameShape::rgb(2, 2), i))
      .collect()
  }

  #[test]
  fn delivers_every_frame_then_stops() {
    let signal = StopSignal::new();
    let device = MemoryDevice::new("clip", frames(5));
    let mut source = FiniteSource::new("video", device, FiniteSourceConfig::default());
    source.run(&signal).unwrap();

    let mut ctx = PipelineContext::new();
    for i in 0..5u8 {
      assert!(!source.stopped());
      source.load_data(&mut ctx).unwrap();
      assert_eq!(ctx.frame_id, format!("clip_{i}"));
      assert_eq!(ctx.orig_frame.as_nhwc()[0], i);
      assert_eq!(ctx.total_frame_count, Some(5));
    }
    assert!(source.stopped());
    source.stop();
    assert_eq!(source.delivered(), 5);
  }

  #[test]
  fn small_buffer_applies_backpressure_without_loss() {
    let signal = StopSignal::new();
    let device = MemoryDevice::new("clip", frames(20));
    let config = FiniteSourceConfig {
      buffer: 1,
      ..FiniteSourceConfig::default()
    };
    let mut source = FiniteSource::new("video", device, config);
    source.run(&signal).unwrap();

    let mut ctx = PipelineContext::new();
    let mut seen = Vec::new();
    while !source.stopped() {
      source.load_data(&mut ctx).unwrap();
      seen.push(ctx.orig_frame.as_nhwc()[0]);
    }
    assert_eq!(seen, (0..20).collect::<Vec<u8>>());
  }

  #[test]
  fn unknown_length_ends_with_end_of_stream() {
    struct Countdown(u8);
    impl CaptureDevice for Countdown {
      fn describe(&self) -> String {
        "countdown".to_string()
      }
      fn grab(&mut self) -> Result<Grab, InputError> {
        if self.0 == 0 {
          return Ok(Grab::End);
        }
        self.0 -= 1;
        Ok(Grab::Frame(Frame::filled(FrameShape::rgb(1, 1), self.0)))
      }
    }

    let signal = StopSignal::new();
    let mut source = FiniteSource::new("stream", Countdown(2), FiniteSourceConfig::default());
    source.run(&signal).unwrap();
    let mut ctx = PipelineContext::new();
    source.load_data(&mut ctx).unwrap();
    source.load_data(&mut ctx).unwrap();
    assert!(matches!(
      source.load_data(&mut ctx),
      Err(InputError::EndOfStream)
    ));
    assert!(source.stopped());
  }
}
