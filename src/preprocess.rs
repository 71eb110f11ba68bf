// 该文件是 Qingfeng （清风） 项目的一部分。
// src/preprocess.rs - 预处理阶段
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

use crate::{context::PipelineContext, frame::FrameError};

mod transforms;

pub use self::transforms::{Transform, TransformsPreprocessor};

#[derive(Error, Debug)]
pub enum PreprocessError {
  #[error("帧错误: {0}")]
  Frame(#[from] FrameError),
  #[error("变换 {transform} 失败: {reason}")]
  Transform { transform: String, reason: String },
}

/// 原地修改 `input_frame`
pub trait Preprocessor: Send {
  fn name(&self) -> &str;

  fn run(&mut self, ctx: &mut PipelineContext) -> Result<(), PreprocessError>;
}
