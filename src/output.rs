// 该文件是 Qingfeng （清风） 项目的一部分。
// src/output.rs - 输出阶段
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
  frame::FrameError,
};

mod log_output;
mod save_image_file;

pub use self::log_output::LogOutput;
pub use self::save_image_file::SaveImageFileOutput;

#[cfg(feature = "directory_record")]
mod directory_record;
#[cfg(feature = "directory_record")]
pub use self::directory_record::DirectoryRecordOutput;

#[derive(Error, Debug)]
pub enum OutputError {
  #[error("图像错误: {0}")]
  Image(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("帧错误: {0}")]
  Frame(#[from] FrameError),
  #[error("{0}")]
  Missing(#[from] ContextError),
}

/// 消费上下文的最终阶段。
///
/// `stopped` 为真时引擎结束循环，例如输出已达到帧数上限。
pub trait Output: Send {
  fn name(&self) -> &str;

  fn requires(&self) -> &'static [Slot] {
    &[]
  }

  fn run(&mut self, ctx: &PipelineContext) -> Result<(), OutputError>;

  fn stop(&mut self) {}

  fn stopped(&self) -> bool {
    false
  }
}
