// 该文件是 Qingfeng （清风） 项目的一部分。
// src/output/save_image_file.rs - 保存图像文件
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

use std::path::{Path, PathBuf};

use tracing::info;

use super::{Output, OutputError};
use crate::{
  config::{ConfigError, FromStageSpec, StageOptions},
  context::PipelineContext,
};

/// 把渲染后的帧（没有时为原始帧）写入同一个文件，每帧覆盖
pub struct SaveImageFileOutput {
  path: PathBuf,
}

impl SaveImageFileOutput {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self { path: path.into() }
  }

  pub fn path(&self) -> &Path {
    &self.path
  }
}

impl FromStageSpec for SaveImageFileOutput {
  const SCHEME: &'static str = "save_image";

  fn from_options(options: &mut StageOptions) -> Result<Self, ConfigError> {
    Ok(Self::new(options.require::<String>("path")?))
  }
}

impl Output for SaveImageFileOutput {
  fn name(&self) -> &str {
    Self::SCHEME
  }

  fn run(&mut self, ctx: &PipelineContext) -> Result<(), OutputError> {
    if let Some(parent) = self.path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }

    ctx.display_frame().to_rgb_image()?.save(&self.path)?;
    info!("保存图像到文件: {}", self.path.display());
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use super::*;
  use crate::frame::{Frame, FrameShape};

  #[test]
  fn writes_output_frame_when_present() {
    let dir = std::env::temp_dir().join(format!("qingfeng-save-{}", std::process::id()));
    let path = dir.join("nested/out.png");
    let mut ctx = PipelineContext::new();
    ctx.load("f", Arc::new(Frame::filled(FrameShape::rgb(2, 2), 10)));
    ctx.output_frame = Some(Frame::filled(FrameShape::rgb(2, 2), 99));

    let mut output = SaveImageFileOutput::new(&path);
    output.run(&ctx).unwrap();

    let saved = image::open(&path).unwrap().to_rgb8();
    assert_eq!(saved.get_pixel(1, 1).0, [99, 99, 99]);
    std::fs::remove_dir_all(&dir).unwrap();
  }
}
