// 该文件是 Qingfeng （清风） 项目的一部分。
// src/input.rs - 帧输入源
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

use thiserror::Error;

use crate::{context::PipelineContext, frame::Frame, frame::FrameError, signal::StopSignal};

mod congestion;
mod finite;
mod image_file;
mod image_sequence;
mod live;
mod memory;

pub use self::congestion::{Admission, CongestionWindow};
pub use self::finite::{FiniteSource, FiniteSourceConfig};
pub use self::image_file::ImageFileInput;
pub use self::image_sequence::{ImageSequenceDevice, ImageSequenceInput};
pub use self::live::{CaptureStats, LiveSource, LiveSourceConfig};
pub use self::memory::MemoryDevice;

#[cfg(feature = "v4l_input")]
mod v4l2_source;
#[cfg(feature = "v4l_input")]
pub use self::v4l2_source::{V4l2Device, WebcamInput};

#[cfg(feature = "gstreamer_input")]
mod gstreamer_input;
#[cfg(feature = "gstreamer_input")]
pub use self::gstreamer_input::{GStreamerDevice, GStreamerInput, GStreamerInputPipelineBuilder};

#[derive(Error, Debug)]
pub enum InputError {
  #[error("无法打开采集设备 {device}: {reason}")]
  DeviceOpen { device: String, reason: String },
  #[error("帧采集失败: {0}")]
  Acquisition(String),
  #[error("输入源已结束")]
  EndOfStream,
  #[error("输入源已停止")]
  Stopped,
  #[error("输入源尚未启动")]
  NotRunning,
  #[error("采集线程异常退出")]
  CaptureThreadPanicked,
  #[error("图像错误: {0}")]
  Image(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("帧错误: {0}")]
  Frame(#[from] FrameError),
}

/// 一次采集的结果
#[derive(Debug)]
pub enum Grab {
  Frame(Frame),
  /// 暂时没有帧，稍后重试
  Empty,
  /// 设备不会再产生帧
  End,
}

/// 采集设备，由采集线程独占
pub trait CaptureDevice: Send + 'static {
  fn describe(&self) -> String;

  fn grab(&mut self) -> Result<Grab, InputError>;

  /// 已知的总帧数
  fn frame_count(&self) -> Option<usize> {
    None
  }

  fn release(&mut self) {}
}

impl<D: CaptureDevice + ?Sized> CaptureDevice for Box<D> {
  fn describe(&self) -> String {
    (**self).describe()
  }

  fn grab(&mut self) -> Result<Grab, InputError> {
    (**self).grab()
  }

  fn frame_count(&self) -> Option<usize> {
    (**self).frame_count()
  }

  fn release(&mut self) {
    (**self).release()
  }
}

/// 流水线的帧来源。
///
/// 生命周期：预热 → `run` → 多次 `load_data` → `stop`。
/// `stop` 可重复调用；`stopped` 为真后引擎结束循环。
pub trait Input: Send {
  fn name(&self) -> &str;

  fn run(&mut self, signal: &StopSignal) -> Result<(), InputError>;

  /// 写入下一帧的 `frame_id`、`orig_frame`、`orig_shape` 与 `input_frame`
  fn load_data(&mut self, ctx: &mut PipelineContext) -> Result<(), InputError>;

  fn stop(&mut self);

  fn stopped(&self) -> bool;
}

impl<T: Input + ?Sized> Input for Box<T> {
  fn name(&self) -> &str {
    (**self).name()
  }

  fn run(&mut self, signal: &StopSignal) -> Result<(), InputError> {
    (**self).run(signal)
  }

  fn load_data(&mut self, ctx: &mut PipelineContext) -> Result<(), InputError> {
    (**self).load_data(ctx)
  }

  fn stop(&mut self) {
    (**self).stop()
  }

  fn stopped(&self) -> bool {
    (**self).stopped()
  }
}

/// 采集线程与消费者共同使用的状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceState {
  WarmingUp,
  Running,
  Stopped,
}
