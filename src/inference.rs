// 该文件是 Qingfeng （清风） 项目的一部分。
// src/inference.rs - 推理阶段
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

use std::time::Instant;

use thiserror::Error;
use tracing::debug;

use crate::{context::PipelineContext, frame::Frame, tensor::Tensor};

mod replay;

pub use self::replay::ReplayPredictor;

#[derive(Error, Debug)]
pub enum InferenceError {
  #[error("推理失败: {0}")]
  Prediction(String),
  #[error("模型输入无效: {0}")]
  InvalidInput(String),
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("回放数据解析失败: {0}")]
  Json(#[from] serde_json::Error),
}

/// 模型运行时：输入帧，输出原始张量
pub trait Predictor: Send {
  fn name(&self) -> &str;

  fn predict(&mut self, input: &Frame) -> Result<Vec<Tensor>, InferenceError>;
}

impl<P: Predictor + ?Sized> Predictor for Box<P> {
  fn name(&self) -> &str {
    (**self).name()
  }

  fn predict(&mut self, input: &Frame) -> Result<Vec<Tensor>, InferenceError> {
    (**self).predict(input)
  }
}

/// 把 `input_frame` 交给预测器，结果写入 `raw_outputs`
pub struct InferenceAdapter {
  predictor: Box<dyn Predictor>,
}

impl InferenceAdapter {
  pub fn new(predictor: Box<dyn Predictor>) -> Self {
    Self { predictor }
  }

  pub fn name(&self) -> &str {
    self.predictor.name()
  }

  pub fn run(&mut self, ctx: &mut PipelineContext) -> Result<(), InferenceError> {
    let now = Instant::now();
    let outputs = self.predictor.predict(&ctx.input_frame)?;
    debug!(
      "帧 {} 推理完成, {} 个输出, 耗时: {:.2?}",
      ctx.frame_id,
      outputs.len(),
      now.elapsed()
    );
    ctx.raw_outputs = Some(outputs);
    Ok(())
  }
}
