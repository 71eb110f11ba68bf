// 该文件是 Qingfeng （清风） 项目的一部分。
// src/postprocess/boxes.rs - 检测框行后处理阶段
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
  detection::BoxRowsPostprocess,
  frame::Resolution,
  model::Predictions,
};

const DEFAULT_INPUT_SIZE: Resolution = Resolution::new(300, 300);

/// `boxes` 阶段：模型已输出检测框时只做过滤与 NMS
#[derive(Debug, Clone, PartialEq)]
pub struct BoxesPostprocessor {
  inner: BoxRowsPostprocess,
}

impl BoxesPostprocessor {
  pub fn new(inner: BoxRowsPostprocess) -> Self {
    Self { inner }
  }

  pub fn params(&self) -> &BoxRowsPostprocess {
    &self.inner
  }
}

impl FromStageSpec for BoxesPostprocessor {
  const SCHEME: &'static str = "boxes";

  fn from_options(options: &mut StageOptions) -> Result<Self, ConfigError> {
    let input_size = options.take_or("input_size", DEFAULT_INPUT_SIZE)?;
    let mut inner = BoxRowsPostprocess::new(input_size.hw());
    inner.threshold = options.take_or("threshold", inner.threshold)?;
    inner.iou_threshold = options.take_or("iou", inner.iou_threshold)?;
    inner.background = if options.take_flag("keep_background")? {
      None
    } else {
      Some(options.take_or("background", 0)?)
    };
    Ok(Self { inner })
  }
}

impl Postprocessor for BoxesPostprocessor {
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
    let output = ctx
      .raw_outputs()?
      .first()
      .ok_or_else(|| PostprocessError::MalformedOutput("模型没有输出张量".to_string()))?;
    let result = self.inner.process(output)?;
    debug!("帧 {} 检测到 {} 个目标", ctx.frame_id, result.len());
    ctx.predictions = Some(Predictions::Detections(result));
    Ok(())
  }
}
