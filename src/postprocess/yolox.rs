// 该文件是 Qingfeng （清风） 项目的一部分。
// src/postprocess/yolox.rs - YOLOX 检测后处理阶段
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
  detection::YoloxPostprocess,
  frame::Resolution,
  model::Predictions,
};

const DEFAULT_INPUT_SIZE: Resolution = Resolution::new(640, 640);

/// `yolox` 阶段：第一个输出张量 → `predictions`
#[derive(Debug, Clone, PartialEq)]
pub struct YoloxPostprocessor {
  inner: YoloxPostprocess,
}

impl YoloxPostprocessor {
  pub fn new(inner: YoloxPostprocess) -> Self {
    Self { inner }
  }

  pub fn params(&self) -> &YoloxPostprocess {
    &self.inner
  }
}

impl FromStageSpec for YoloxPostprocessor {
  const SCHEME: &'static str = "yolox";

  fn from_options(options: &mut StageOptions) -> Result<Self, ConfigError> {
    let classes: usize = options.require("classes")?;
    let input_size = options.take_or("input_size", DEFAULT_INPUT_SIZE)?;
    let mut inner = YoloxPostprocess::new(classes, input_size.hw());
    inner.confidence = options.take_or("confidence", inner.confidence)?;
    inner.iou_threshold = options.take_or("iou", inner.iou_threshold)?;
    inner.max_boxes = options.take_or("max_boxes", inner.max_boxes)?;
    inner.class_agnostic = options.take_flag("class_agnostic")?;
    inner.letterbox = options.take_flag("letterbox")?;
    Ok(Self { inner })
  }
}

impl Postprocessor for YoloxPostprocessor {
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
    let prediction = ctx
      .raw_outputs()?
      .first()
      .ok_or_else(|| PostprocessError::MalformedOutput("模型没有输出张量".to_string()))?;
    let result = self.inner.process(prediction, ctx.orig_shape.hw())?;
    debug!("帧 {} 检测到 {} 个目标", ctx.frame_id, result.len());
    ctx.predictions = Some(Predictions::Detections(result));
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use super::*;
  use crate::{
    config::StageSpec,
    frame::{Frame, FrameShape},
    tensor::Tensor,
  };

  #[test]
  fn options_map_onto_params() {
    let spec = StageSpec::new("yolox")
      .with("classes", 3)
      .with("input_size", "320x256")
      .with("confidence", 0.25)
      .with("class_agnostic", "")
      .with("letterbox", true);
    let stage = YoloxPostprocessor::from_spec(&spec).unwrap();
    let params = stage.params();
    assert_eq!(params.num_classes, 3);
    assert_eq!(params.input_shape, (256, 320));
    assert_eq!(params.confidence, 0.25);
    assert_eq!(params.iou_threshold, 0.45);
    assert!(params.class_agnostic && params.letterbox);

    let spec = StageSpec::new("yolox")
      .with("classes", 1)
      .with("anchors", "1,1");
    assert!(matches!(
      YoloxPostprocessor::from_spec(&spec),
      Err(ConfigError::UnknownOption { .. })
    ));
  }

  #[test]
  fn writes_detections_or_reports_empty_outputs() {
    let mut stage = YoloxPostprocessor::new(YoloxPostprocess::new(1, (32, 32)));
    let mut ctx = PipelineContext::new();
    ctx.load("f", Arc::new(Frame::filled(FrameShape::rgb(32, 32), 0)));

    ctx.raw_outputs = Some(vec![]);
    assert!(matches!(
      stage.run(&mut ctx),
      Err(PostprocessError::MalformedOutput(_))
    ));

    let row = vec![16.0, 16.0, 8.0, 8.0, 0.9, 0.9];
    ctx.raw_outputs = Some(vec![Tensor::new(vec![1, 1, 6], row).unwrap()]);
    stage.run(&mut ctx).unwrap();
    let result = ctx.predictions().unwrap().detections().unwrap();
    assert_eq!(result.len(), 1);
    assert!((result.items[0].score - 0.81).abs() < 1e-6);
  }
}
