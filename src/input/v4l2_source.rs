// 该文件是 Qingfeng （清风） 项目的一部分。
// src/input/v4l2_source.rs - V4L2 摄像头采集设备
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

use std::pin::Pin;

use tracing::info;
use v4l::FourCC;
use v4l::buffer::Type;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;

use super::{CaptureDevice, Grab, InputError, LiveSource, LiveSourceConfig};
use crate::{
  config::{ConfigError, FromStageSpec, StageOptions},
  frame::{Frame, FrameShape, Resolution},
};

/// V4L2 摄像头（YUYV 采集，转换为 RGB）
///
/// v4l 的 Stream 需要引用 Device，因此用 `Pin<Box<Device>>` 固定设备地址。
pub struct V4l2Device {
  path: String,
  /// 捕获流（生命周期与 device 关联）
  stream: Option<Stream<'static>>,
  device: Pin<Box<Device>>,
  width: u32,
  height: u32,
}

impl V4l2Device {
  pub fn open(path: &str, resolution: Resolution) -> Result<Self, InputError> {
    let open_error = |e: std::io::Error| InputError::DeviceOpen {
      device: path.to_string(),
      reason: e.to_string(),
    };

    let device = Box::pin(Device::with_path(path).map_err(open_error)?);

    let mut format = device.format().map_err(open_error)?;
    format.width = resolution.width as u32;
    format.height = resolution.height as u32;
    format.fourcc = FourCC::new(b"YUYV");
    let format = device.set_format(&format).map_err(open_error)?;
    info!(
      "摄像头 {} 格式: {}x{} {}",
      path, format.width, format.height, format.fourcc
    );

    let mut source = Self {
      path: path.to_string(),
      stream: None,
      device,
      width: format.width,
      height: format.height,
    };

    // SAFETY: device 被 Pin<Box> 固定在堆上不会移动；
    // stream 在 release/Drop 中先于 device 释放
    let device_ref: &Device = &source.device;
    let stream = unsafe {
      let device_static: &'static Device = std::mem::transmute(device_ref);
      Stream::with_buffers(device_static, Type::VideoCapture, 4).map_err(open_error)?
    };

    source.stream = Some(stream);
    Ok(source)
  }

  /// 将 YUYV 格式转换为 RGB
  fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Vec<u8> {
    let mut rgb = Vec::with_capacity((width * height * 3) as usize);

    let mut push = |y: f32, u: f32, v: f32| {
      rgb.extend_from_slice(&[
        (y + 1.402 * v).clamp(0.0, 255.0) as u8,
        (y - 0.344 * u - 0.714 * v).clamp(0.0, 255.0) as u8,
        (y + 1.772 * u).clamp(0.0, 255.0) as u8,
      ]);
    };

    for chunk in yuyv.chunks_exact(4) {
      let u = chunk[1] as f32 - 128.0;
      let v = chunk[3] as f32 - 128.0;
      push(chunk[0] as f32, u, v);
      push(chunk[2] as f32, u, v);
    }

    rgb
  }
}

impl CaptureDevice for V4l2Device {
  fn describe(&self) -> String {
    format!("v4l2 {} ({}x{})", self.path, self.width, self.height)
  }

  fn grab(&mut self) -> Result<Grab, InputError> {
    let Some(stream) = self.stream.as_mut() else {
      return Ok(Grab::End);
    };
    let (buffer, _meta) = stream
      .next()
      .map_err(|e| InputError::Acquisition(format!("无法捕获帧: {e}")))?;
    if buffer.is_empty() {
      return Ok(Grab::Empty);
    }

    let rgb = Self::yuyv_to_rgb(buffer, self.width, self.height);
    let shape = FrameShape::rgb(self.height as usize, self.width as usize);
    Ok(Grab::Frame(Frame::from_raw(shape, rgb)?))
  }

  fn release(&mut self) {
    self.stream.take();
  }
}

impl Drop for V4l2Device {
  fn drop(&mut self) {
    // 确保 stream 在 device 之前被 drop
    self.stream.take();
  }
}

/// `webcam` 阶段参数
#[derive(Debug, Clone, PartialEq)]
pub struct WebcamInput {
  pub device: String,
  pub resolution: Resolution,
  pub source: LiveSourceConfig,
}

impl FromStageSpec for WebcamInput {
  const SCHEME: &'static str = "webcam";

  fn from_options(options: &mut StageOptions) -> Result<Self, ConfigError> {
    Ok(Self {
      device: options.take_or("path", "/dev/video0".to_string())?,
      resolution: options.take_or("resolution", Resolution::new(640, 480))?,
      source: LiveSourceConfig::from_options(options)?,
    })
  }
}

impl WebcamInput {
  pub fn open(self) -> Result<LiveSource<V4l2Device>, InputError> {
    let device = V4l2Device::open(&self.device, self.resolution)?;
    Ok(LiveSource::new(Self::SCHEME, device, self.source))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn yuyv_gray_maps_to_gray() {
    let rgb = V4l2Device::yuyv_to_rgb(&[100, 128, 200, 128], 2, 1);
    assert_eq!(rgb, vec![100, 100, 100, 200, 200, 200]);
  }
}
