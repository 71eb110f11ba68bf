// 该文件是 Qingfeng （清风） 项目的一部分。
// src/inference/replay.rs - 回放预先记录的模型输出
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

use std::path::Path;

use serde::Deserialize;
use tracing::info;

use super::{InferenceError, Predictor};
use crate::{
  config::{ConfigError, FromStageSpec, StageOptions},
  frame::{Frame, Resolution},
  tensor::Tensor,
};

/// 回放文件：`{"frames": [[{"shape": [...], "data": [...]}, ...], ...]}`
#[derive(Debug, Deserialize)]
struct ReplayFile {
  frames: Vec<Vec<Tensor>>,
}

/// 依次返回记录中的各帧输出，用于在没有模型运行时的设备上调试流水线
#[derive(Debug, Clone, PartialEq)]
pub struct ReplayPredictor {
  frames: Vec<Vec<Tensor>>,
  cursor: usize,
  repeat: bool,
  input_size: Option<Resolution>,
}

impl ReplayPredictor {
  pub fn new(frames: Vec<Vec<Tensor>>) -> Self {
    Self {
      frames,
      cursor: 0,
      repeat: true,
      input_size: None,
    }
  }

  pub fn load(path: impl AsRef<Path>) -> Result<Self, InferenceError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)?;
    let file: ReplayFile = serde_json::from_str(&text)?;
    info!("加载回放数据 {}: {} 帧", path.display(), file.frames.len());
    Ok(Self::new(file.frames))
  }

  pub fn with_repeat(mut self, repeat: bool) -> Self {
    self.repeat = repeat;
    self
  }

  /// 要求输入帧为指定尺寸
  pub fn with_input_size(mut self, size: Option<Resolution>) -> Self {
    self.input_size = size;
    self
  }
}

impl FromStageSpec for ReplayPredictor {
  const SCHEME: &'static str = "replay";

  fn from_options(options: &mut StageOptions) -> Result<Self, ConfigError> {
    let path: String = options.require("path")?;
    let repeat = options.take_or("loop", true)?;
    let input_size = options.take("input_size")?;
    let predictor = ReplayPredictor::load(&path).map_err(|e| ConfigError::InvalidOption {
      stage: options.stage().to_string(),
      key: "path".to_string(),
      value: path.clone(),
      reason: e.to_string(),
    })?;
    Ok(
      predictor
        .with_repeat(repeat)
        .with_input_size(input_size),
    )
  }
}

impl Predictor for ReplayPredictor {
  fn name(&self) -> &str {
    Self::SCHEME
  }

  fn predict(&mut self, input: &Frame) -> Result<Vec<Tensor>, InferenceError> {
    if let Some(size) = self.input_size
      && input.shape().hw() != size.hw()
    {
      return Err(InferenceError::InvalidInput(format!(
        "期望输入 {}, 实际 {}",
        size,
        input.shape()
      )));
    }
    if self.frames.is_empty() {
      return Err(InferenceError::Prediction("回放数据为空".to_string()));
    }
    if self.cursor >= self.frames.len() {
      if !self.repeat {
        return Err(InferenceError::Prediction(format!(
          "回放数据已用完 ({} 帧)",
          self.frames.len()
        )));
      }
      self.cursor = 0;
    }
    let outputs = self.frames[self.cursor].clone();
    self.cursor += 1;
    Ok(outputs)
  }
}
