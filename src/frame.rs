// 该文件是 Qingfeng （清风） 项目的一部分。
// src/frame.rs - 帧数据定义
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

use std::{fmt, str::FromStr};

use image::RgbImage;
use thiserror::Error;

pub const RGB_CHANNELS: usize = 3;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
  #[error("数据长度不匹配: 期望长度 {expected}, 实际长度 {actual}")]
  LengthMismatch { expected: usize, actual: usize },
  #[error("仅支持 3 通道图像, 实际通道数 {0}")]
  UnsupportedChannels(usize),
  #[error("帧尺寸超出范围: {0}")]
  TooLarge(FrameShape),
}

/// 帧尺寸 (高, 宽, 通道)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FrameShape {
  pub height: usize,
  pub width: usize,
  pub channels: usize,
}

impl FrameShape {
  pub const fn new(height: usize, width: usize, channels: usize) -> Self {
    Self {
      height,
      width,
      channels,
    }
  }

  pub const fn rgb(height: usize, width: usize) -> Self {
    Self::new(height, width, RGB_CHANNELS)
  }

  pub const fn len(&self) -> usize {
    self.height * self.width * self.channels
  }

  pub const fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// (高, 宽)
  pub const fn hw(&self) -> (usize, usize) {
    (self.height, self.width)
  }
}

impl fmt::Display for FrameShape {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}x{}x{}", self.height, self.width, self.channels)
  }
}

/// 以 `宽x高` 书写的分辨率，例如 `640x480`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Resolution {
  pub width: usize,
  pub height: usize,
}

impl Resolution {
  pub const fn new(width: usize, height: usize) -> Self {
    Self { width, height }
  }

  /// (高, 宽)
  pub const fn hw(&self) -> (usize, usize) {
    (self.height, self.width)
  }
}

impl fmt::Display for Resolution {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}x{}", self.width, self.height)
  }
}

impl FromStr for Resolution {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let (width, height) = s
      .split_once(['x', 'X'])
      .ok_or_else(|| format!("分辨率格式应为 宽x高, 实际为 '{s}'"))?;
    let width: usize = width.trim().parse().map_err(|e| format!("宽度无效: {e}"))?;
    let height: usize = height.trim().parse().map_err(|e| format!("高度无效: {e}"))?;
    if width == 0 || height == 0 {
      return Err(format!("分辨率不能为零: '{s}'"));
    }
    Ok(Self { width, height })
  }
}

/// 按 NHWC 排布存放的 8 位图像帧
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Frame {
  data: Box<[u8]>,
  shape: FrameShape,
}

impl Frame {
  pub fn from_raw(shape: FrameShape, data: Vec<u8>) -> Result<Self, FrameError> {
    if data.len() != shape.len() {
      return Err(FrameError::LengthMismatch {
        expected: shape.len(),
        actual: data.len(),
      });
    }
    Ok(Self {
      data: data.into_boxed_slice(),
      shape,
    })
  }

  pub fn filled(shape: FrameShape, value: u8) -> Self {
    Self {
      data: vec![value; shape.len()].into_boxed_slice(),
      shape,
    }
  }

  pub fn shape(&self) -> FrameShape {
    self.shape
  }

  pub fn height(&self) -> usize {
    self.shape.height
  }

  pub fn width(&self) -> usize {
    self.shape.width
  }

  pub fn channels(&self) -> usize {
    self.shape.channels
  }

  pub fn as_nhwc(&self) -> &[u8] {
    &self.data
  }

  pub fn pixel(&self, y: usize, x: usize) -> &[u8] {
    let c = self.shape.channels;
    let offset = (y * self.shape.width + x) * c;
    &self.data[offset..offset + c]
  }

  pub fn to_rgb_image(&self) -> Result<RgbImage, FrameError> {
    if self.shape.channels != RGB_CHANNELS {
      return Err(FrameError::UnsupportedChannels(self.shape.channels));
    }
    let (width, height) = match (
      u32::try_from(self.shape.width),
      u32::try_from(self.shape.height),
    ) {
      (Ok(w), Ok(h)) => (w, h),
      _ => return Err(FrameError::TooLarge(self.shape)),
    };
    RgbImage::from_raw(width, height, self.data.to_vec()).ok_or(FrameError::LengthMismatch {
      expected: self.shape.len(),
      actual: self.data.len(),
    })
  }
}

impl AsRef<[u8]> for Frame {
  fn as_ref(&self) -> &[u8] {
    &self.data
  }
}

impl AsMut<[u8]> for Frame {
  fn as_mut(&mut self) -> &mut [u8] {
    &mut self.data
  }
}

impl From<RgbImage> for Frame {
  fn from(image: RgbImage) -> Self {
    let shape = FrameShape::rgb(image.height() as usize, image.width() as usize);
    Self {
      data: image.into_raw().into_boxed_slice(),
      shape,
    }
  }
}
