// 该文件是 Qingfeng （清风） 项目的一部分。
// src/input/image_sequence.rs - 图像目录输入
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

use image::ImageReader;
use tracing::debug;

use super::{CaptureDevice, FiniteSource, FiniteSourceConfig, Grab, InputError};
use crate::{
  config::{ConfigError, FromStageSpec, StageOptions},
  frame::Frame,
};

const IMAGE_EXTENSIONS: [&str; 6] = ["jpg", "jpeg", "png", "bmp", "gif", "webp"];

/// 按文件名顺序读取目录中的图像
#[derive(Debug)]
pub struct ImageSequenceDevice {
  directory: PathBuf,
  files: Vec<PathBuf>,
  cursor: usize,
}

impl ImageSequenceDevice {
  pub fn open(directory: impl AsRef<Path>) -> Result<Self, InputError> {
    let directory = directory.as_ref().to_path_buf();
    let mut files = std::fs::read_dir(&directory)
      .map_err(|e| InputError::DeviceOpen {
        device: directory.display().to_string(),
        reason: e.to_string(),
      })?
      .filter_map(|entry| entry.ok().map(|e| e.path()))
      .filter(|p| {
        p.extension()
          .and_then(|e| e.to_str())
          .is_some_and(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
      })
      .collect::<Vec<_>>();
    files.sort();

    Ok(Self {
      directory,
      files,
      cursor: 0,
    })
  }
}

impl CaptureDevice for ImageSequenceDevice {
  fn describe(&self) -> String {
    self.directory.display().to_string()
  }

  fn grab(&mut self) -> Result<Grab, InputError> {
    let Some(path) = self.files.get(self.cursor) else {
      return Ok(Grab::End);
    };
    self.cursor += 1;
    debug!("读取图像 {}", path.display());
    let image = ImageReader::open(path)?.decode()?.to_rgb8();
    Ok(Grab::Frame(Frame::from(image)))
  }

  fn frame_count(&self) -> Option<usize> {
    Some(self.files.len())
  }
}

/// `images` 阶段参数
#[derive(Debug, Clone, PartialEq)]
pub struct ImageSequenceInput {
  pub directory: PathBuf,
  pub source: FiniteSourceConfig,
}

impl FromStageSpec for ImageSequenceInput {
  const SCHEME: &'static str = "images";

  fn from_options(options: &mut StageOptions) -> Result<Self, ConfigError> {
    Ok(Self {
      directory: options.require("path")?,
      source: FiniteSourceConfig::from_options(options)?,
    })
  }
}

impl ImageSequenceInput {
  pub fn open(self) -> Result<FiniteSource<ImageSequenceDevice>, InputError> {
    let device = ImageSequenceDevice::open(&self.directory)?;
    Ok(FiniteSource::new(Self::SCHEME, device, self.source))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{context::PipelineContext, input::Input, signal::StopSignal};
  use image::{Rgb, RgbImage};

  #[test]
  fn reads_images_in_name_order() {
    let dir = std::env::temp_dir().join(format!("qingfeng-sequence-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    for (name, value) in [("b.png", 2u8), ("a.png", 1), ("c.png", 3)] {
      RgbImage::from_pixel(2, 2, Rgb([value; 3]))
        .save(dir.join(name))
        .unwrap();
    }
    std::fs::write(dir.join("notes.txt"), "ignored").unwrap();

    let spec = crate::config::StageSpec::new("images").with("path", dir.display());
    let mut source = ImageSequenceInput::from_spec(&spec).unwrap().open().unwrap();
    assert_eq!(source.total_frame_count(), Some(3));

    source.run(&StopSignal::new()).unwrap();
    let mut ctx = PipelineContext::new();
    let mut seen = Vec::new();
    while !source.stopped() {
      source.load_data(&mut ctx).unwrap();
      seen.push(ctx.orig_frame.as_nhwc()[0]);
    }
    assert_eq!(seen, vec![1, 2, 3]);
    source.stop();

    std::fs::remove_dir_all(&dir).unwrap();
  }

  #[test]
  fn missing_directory_fails_to_open() {
    assert!(matches!(
      ImageSequenceDevice::open("/nonexistent/qingfeng"),
      Err(InputError::DeviceOpen { .. })
    ));
  }
}
