// 该文件是 Qingfeng （清风） 项目的一部分。
// src/preprocess/transforms.rs - 图像变换预处理
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

use image::{Rgb, RgbImage, imageops};
use tracing::debug;

use super::{PreprocessError, Preprocessor};
use crate::{
  config::{ConfigError, FromStageSpec, StageOptions},
  context::PipelineContext,
  detection::Letterbox,
  frame::{Frame, Resolution},
};

const LETTERBOX_FILL: u8 = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transform {
  /// 直接拉伸到目标尺寸
  Resize(Resolution),
  /// 等比缩放并以灰色填充到目标尺寸
  Letterbox(Resolution),
  /// 交换 R 与 B 通道
  SwapRb,
}

impl fmt::Display for Transform {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Transform::Resize(res) => write!(f, "resize:{res}"),
      Transform::Letterbox(res) => write!(f, "letterbox:{res}"),
      Transform::SwapRb => f.write_str("rgb2bgr"),
    }
  }
}

impl FromStr for Transform {
  type Err = String;

  /// `resize:416x416`、`letterbox:416x416`、`rgb2bgr`
  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let (name, arg) = match s.split_once(':') {
      Some((name, arg)) => (name.trim(), Some(arg.trim())),
      None => (s.trim(), None),
    };
    match (name, arg) {
      ("resize", Some(res)) => Ok(Transform::Resize(res.parse()?)),
      ("letterbox", Some(res)) => Ok(Transform::Letterbox(res.parse()?)),
      ("rgb2bgr" | "bgr2rgb", None) => Ok(Transform::SwapRb),
      ("resize" | "letterbox", None) => Err(format!("变换 {name} 需要目标尺寸, 例如 {name}:416x416")),
      _ => Err(format!("未知的变换 '{s}'")),
    }
  }
}

impl Transform {
  fn apply(&self, frame: &Frame) -> Result<Frame, PreprocessError> {
    match *self {
      Transform::Resize(res) => {
        let image = frame.to_rgb_image()?;
        let resized = imageops::resize(
          &image,
          res.width as u32,
          res.height as u32,
          imageops::FilterType::Triangle,
        );
        Ok(Frame::from(resized))
      }
      Transform::Letterbox(res) => {
        let image = frame.to_rgb_image()?;
        let model_shape = res.hw();
        let lb = Letterbox::new(frame.shape().hw(), model_shape);
        let (scaled_h, scaled_w) = lb.scaled;
        if scaled_h == 0 || scaled_w == 0 {
          return Err(PreprocessError::Transform {
            transform: self.to_string(),
            reason: format!("输入帧 {} 缩放后为空", frame.shape()),
          });
        }
        let resized = imageops::resize(
          &image,
          scaled_w as u32,
          scaled_h as u32,
          imageops::FilterType::Triangle,
        );
        let mut canvas = RgbImage::from_pixel(
          res.width as u32,
          res.height as u32,
          Rgb([LETTERBOX_FILL; 3]),
        );
        let (x, y) = lb.paste_origin(model_shape);
        imageops::overlay(&mut canvas, &resized, x as i64, y as i64);
        Ok(Frame::from(canvas))
      }
      Transform::SwapRb => {
        let mut swapped = frame.clone();
        if swapped.channels() >= 3 {
          let channels = swapped.channels();
          for px in swapped.as_mut().chunks_exact_mut(channels) {
            px.swap(0, 2);
          }
        }
        Ok(swapped)
      }
    }
  }
}

/// 按顺序执行一组变换
#[derive(Debug, Clone, PartialEq)]
pub struct TransformsPreprocessor {
  tools: Vec<Transform>,
}

impl TransformsPreprocessor {
  pub fn new(tools: Vec<Transform>) -> Self {
    Self { tools }
  }

  pub fn tools(&self) -> &[Transform] {
    &self.tools
  }
}

impl FromStageSpec for TransformsPreprocessor {
  const SCHEME: &'static str = "transforms";

  /// `tools=letterbox:416x416,rgb2bgr`
  fn from_options(options: &mut StageOptions) -> Result<Self, ConfigError> {
    let raw: String = options.require("tools")?;
    let tools = raw
      .split(',')
      .filter(|t| !t.trim().is_empty())
      .map(|t| {
        t.parse::<Transform>()
          .map_err(|reason| ConfigError::InvalidOption {
            stage: options.stage().to_string(),
            key: "tools".to_string(),
            value: t.to_string(),
            reason,
          })
      })
      .collect::<Result<Vec<_>, _>>()?;
    Ok(Self { tools })
  }
}

impl Preprocessor for TransformsPreprocessor {
  fn name(&self) -> &str {
    Self::SCHEME
  }

  fn run(&mut self, ctx: &mut PipelineContext) -> Result<(), PreprocessError> {
    for tool in &self.tools {
      ctx.input_frame = tool.apply(&ctx.input_frame)?;
    }
    debug!("预处理完成: {} -> {}", ctx.orig_shape, ctx.input_frame.shape());
    Ok(())
  }
}
