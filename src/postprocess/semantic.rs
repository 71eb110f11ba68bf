// 该文件是 Qingfeng （清风） 项目的一部分。
// src/postprocess/semantic.rs - 语义分割后处理阶段
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

use tracing::debug;

use super::{PostprocessError, Postprocessor};
use crate::{
  config::{ConfigError, FromStageSpec, StageOptions},
  context::{PipelineContext, Slot},
  model::{Predictions, SegmentationMask},
  tensor::Tensor,
};

/// `semantic` 阶段：对 `(1, H, W, C)` 的输出逐像素取 argmax。
///
/// 单通道输出按 `threshold` 二值化。类别 0 为背景。
#[derive(Debug, Clone, PartialEq)]
pub struct SemanticPostprocessor {
  threshold: f32,
}

impl Default for SemanticPostprocessor {
  fn default() -> Self {
    Self { threshold: 0.5 }
  }
}

impl SemanticPostprocessor {
  pub fn new(threshold: f32) -> Self {
    Self { threshold }
  }

  pub fn mask(&self, tensor: &Tensor) -> Result<SegmentationMask, PostprocessError> {
    let &[1, height, width, classes] = tensor.shape() else {
      return Err(PostprocessError::MalformedOutput(format!(
        "分割输出应为 (1, H, W, C), 实际形状 {:?}",
        tensor.shape()
      )));
    };
    if classes == 0 || classes > u8::MAX as usize + 1 {
      return Err(PostprocessError::MalformedOutput(format!(
        "不支持的类别数 {classes}"
      )));
    }

    let labels = tensor
      .data()
      .chunks_exact(classes)
      .map(|px| {
        if classes == 1 {
          u8::from(px[0] > self.threshold)
        } else {
          let mut best = 0;
          for (i, &v) in px.iter().enumerate().skip(1) {
            if v > px[best] {
              best = i;
            }
          }
          best as u8
        }
      })
      .collect();

    SegmentationMask::new(height, width, labels)
      .ok_or_else(|| PostprocessError::MalformedOutput("掩码尺寸不一致".to_string()))
  }
}

impl FromStageSpec for SemanticPostprocessor {
  const SCHEME: &'static str = "semantic";

  fn from_options(options: &mut StageOptions) -> Result<Self, ConfigError> {
    Ok(Self {
      threshold: options.take_or("threshold", 0.5)?,
    })
  }
}

impl Postprocessor for SemanticPostprocessor {
  fn name(&self) -> &str {
    Self::SCHEME
  }

  fn requires(&self) -> &'static [Slot] {
    &[Slot::RawOutputs]
  }

  fn provides(&self) -> &'static [Slot] {
    &[Slot::Predictions]
  }

  fn run(&mut self, ctx: &mut PipelineContext) -> Result<(), PostprocessError> {
    let outputs = ctx.raw_outputs()?;
    let first = outputs
      .first()
      .ok_or_else(|| PostprocessError::MalformedOutput("没有分割输出".to_string()))?;
    let mask = self.mask(first)?;
    debug!("帧 {} 前景像素 {}", ctx.frame_id, mask.foreground());
    ctx.predictions = Some(Predictions::Mask(mask));
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn argmax_per_pixel() {
    let tensor = Tensor::new(
      vec![1, 1, 2, 3],
      vec![0.1, 0.7, 0.2, 0.5, 0.1, 0.4],
    )
    .unwrap();
    let mask = SemanticPostprocessor::default().mask(&tensor).unwrap();
    assert_eq!(mask.labels(), &[1, 0]);
    assert_eq!(mask.foreground(), 1);
  }

  #[test]
  fn single_channel_uses_threshold() {
    let tensor = Tensor::new(vec![1, 2, 1, 1], vec![0.2, 0.9]).unwrap();
    let mask = SemanticPostprocessor::new(0.5).mask(&tensor).unwrap();
    assert_eq!(mask.get(0, 0), 0);
    assert_eq!(mask.get(1, 0), 1);
  }

  #[test]
  fn rejects_batched_output() {
    let tensor = Tensor::zeros(vec![2, 1, 1, 2]);
    assert!(matches!(
      SemanticPostprocessor::default().mask(&tensor),
      Err(PostprocessError::MalformedOutput(_))
    ));
  }
}
