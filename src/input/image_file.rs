// 该文件是 Qingfeng （清风） 项目的一部分。
// src/input/image_file.rs - 单张图像文件输入
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

use std::{path::PathBuf, sync::Arc};

use image::ImageReader;
use tracing::info;

use super::{Input, InputError};
use crate::{
  config::{ConfigError, FromStageSpec, StageOptions},
  context::PipelineContext,
  frame::Frame,
  signal::StopSignal,
};

/// 读取单张图像，交付一次后停止
pub struct ImageFileInput {
  path: PathBuf,
  frame: Option<Arc<Frame>>,
  stopped: bool,
}

impl ImageFileInput {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self {
      path: path.into(),
      frame: None,
      stopped: false,
    }
  }
}

impl FromStageSpec for ImageFileInput {
  const SCHEME: &'static str = "image";

  fn from_options(options: &mut StageOptions) -> Result<Self, ConfigError> {
    Ok(Self::new(options.require::<PathBuf>("path")?))
  }
}

impl Input for ImageFileInput {
  fn name(&self) -> &str {
    Self::SCHEME
  }

  fn run(&mut self, _signal: &StopSignal) -> Result<(), InputError> {
    if self.frame.is_none() {
      let image = ImageReader::open(&self.path)?.decode()?.to_rgb8();
      info!(
        "读取图像 {} ({}x{})",
        self.path.display(),
        image.width(),
        image.height()
      );
      self.frame = Some(Arc::new(Frame::from(image)));
    }
    // 唯一的一帧交付后流水线即结束
    self.stopped = true;
    Ok(())
  }

  fn load_data(&mut self, ctx: &mut PipelineContext) -> Result<(), InputError> {
    let frame = self.frame.as_ref().ok_or(InputError::NotRunning)?;
    ctx.load(self.path.display().to_string(), Arc::clone(frame));
    ctx.total_frame_count = Some(1);
    Ok(())
  }

  fn stop(&mut self) {
    self.stopped = true;
  }

  fn stopped(&self) -> bool {
    self.stopped
  }
}
