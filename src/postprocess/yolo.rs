// 该文件是 Qingfeng （清风） 项目的一部分。
// src/postprocess/yolo.rs - YOLO 检测后处理阶段
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
  detection::{AnchorSpec, NmsMethod, NmsParams, YoloPostprocess},
  frame::Resolution,
  model::Predictions,
};

const DEFAULT_INPUT_SIZE: Resolution = Resolution::new(416, 416);

/// `yolo` 阶段：`raw_outputs` → `predictions`
#[derive(Debug, Clone, PartialEq)]
pub struct YoloPostprocessor {
  inner: YoloPostprocess,
}

impl YoloPostprocessor {
  pub fn new(inner: YoloPostprocess) -> Self {
    Self { inner }
  }

  pub fn params(&self) -> &YoloPostprocess {
    &self.inner
  }
}

impl FromStageSpec for YoloPostprocessor {
  const SCHEME: &'static str = "yolo";

  fn from_options(options: &mut StageOptions) -> Result<Self, ConfigError> {
    let classes: usize = options.require("classes")?;
    let input_size = options.take_or("input_size", DEFAULT_INPUT_SIZE)?;
    let mut inner = YoloPostprocess::new(classes, input_size.hw());
    if let Some(anchors) = options.take::<AnchorSpec>("anchors")? {
      inner = inner.with_anchors(anchors);
    }
    inner.confidence = options.take_or("confidence", inner.confidence)?;
    inner.max_boxes = options.take_or("max_boxes", inner.max_boxes)?;
    let defaults = NmsParams::default();
    inner.nms = NmsParams {
      iou_threshold: options.take_or("iou", defaults.iou_threshold)?,
      confidence: inner.confidence,
      sigma: options.take_or("sigma", defaults.sigma)?,
      method: options.take_or::<NmsMethod>("nms", defaults.method)?,
    };
    Ok(Self { inner })
  }
}

impl Postprocessor for YoloPostprocessor {
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
    let result = self.inner.process(ctx.raw_outputs()?, ctx.orig_shape.hw())?;
    debug!("帧 {} 检测到 {} 个目标", ctx.frame_id, result.len());
    ctx.predictions = Some(Predictions::Detections(result));
    Ok(())
  }
}
