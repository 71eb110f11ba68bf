// 该文件是 Qingfeng （清风） 项目的一部分。
// src/postprocess.rs - 后处理阶段
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

use crate::{
  context::{ContextError, PipelineContext, Slot},
  detection::DetectionError,
  frame::FrameError,
};

mod boxes;
mod semantic;
mod yolo;
mod yolox;

pub use self::boxes::BoxesPostprocessor;
pub use self::semantic::SemanticPostprocessor;
pub use self::yolo::YoloPostprocessor;
pub use self::yolox::YoloxPostprocessor;

#[cfg(feature = "draw")]
mod draw;
#[cfg(feature = "draw")]
pub use self::draw::{DrawPostprocessor, palette};

#[derive(Error, Debug)]
pub enum PostprocessError {
  #[error("检测后处理失败: {0}")]
  Detection(#[from] DetectionError),
  #[error("{0}")]
  Missing(#[from] ContextError),
  #[error("模型输出格式错误: {0}")]
  MalformedOutput(String),
  #[error("帧错误: {0}")]
  Frame(#[from] FrameError),
}

/// 读取上下文中前序阶段的结果并写入新的字段。
///
/// `requires` 与 `provides` 在构建引擎时用于检查阶段顺序。
pub trait Postprocessor: Send {
  fn name(&self) -> &str;

  fn requires(&self) -> &'static [Slot] {
    &[]
  }

  fn provides(&self) -> &'static [Slot] {
    &[]
  }

  fn run(&mut self, ctx: &mut PipelineContext) -> Result<(), PostprocessError>;
}
