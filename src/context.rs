// 该文件是 Qingfeng （清风） 项目的一部分。
// src/context.rs - 流水线上下文
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

use std::{fmt, sync::Arc};

use thiserror::Error;

use crate::{
  frame::{Frame, FrameShape},
  model::Predictions,
  tensor::Tensor,
};

/// 由阶段写入的可选字段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Slot {
  RawOutputs,
  Predictions,
  OutputFrame,
}

impl fmt::Display for Slot {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      Slot::RawOutputs => "raw_outputs",
      Slot::Predictions => "predictions",
      Slot::OutputFrame => "output_frame",
    };
    f.write_str(name)
  }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContextError {
  #[error("上下文字段 {0} 尚未写入")]
  Missing(Slot),
}

/// 单帧在各阶段之间传递的数据。
///
/// `orig_frame` 在整个周期内保持不变；`input_frame` 是它的副本，
/// 由预处理阶段原地修改。每次 `load` 都会清空可选字段。
#[derive(Debug, Clone, Default)]
pub struct PipelineContext {
  pub frame_id: String,
  pub orig_frame: Arc<Frame>,
  pub orig_shape: FrameShape,
  pub input_frame: Frame,
  pub raw_outputs: Option<Vec<Tensor>>,
  pub predictions: Option<Predictions>,
  pub output_frame: Option<Frame>,
  pub total_frame_count: Option<usize>,
  /// 已载入的帧数
  pub sequence: u64,
}

impl PipelineContext {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn load(&mut self, frame_id: impl Into<String>, frame: Arc<Frame>) {
    self.frame_id = frame_id.into();
    self.orig_shape = frame.shape();
    self.input_frame = Frame::clone(&frame);
    self.orig_frame = frame;
    self.raw_outputs = None;
    self.predictions = None;
    self.output_frame = None;
    self.sequence += 1;
  }

  pub fn raw_outputs(&self) -> Result<&[Tensor], ContextError> {
    self
      .raw_outputs
      .as_deref()
      .ok_or(ContextError::Missing(Slot::RawOutputs))
  }

  pub fn predictions(&self) -> Result<&Predictions, ContextError> {
    self
      .predictions
      .as_ref()
      .ok_or(ContextError::Missing(Slot::Predictions))
  }

  /// 渲染后的帧，未渲染时返回原始帧
  pub fn display_frame(&self) -> &Frame {
    self.output_frame.as_ref().unwrap_or(self.orig_frame.as_ref())
  }
}
