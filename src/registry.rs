// 该文件是 Qingfeng （清风） 项目的一部分。
// src/registry.rs - 阶段注册表
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

use std::collections::BTreeMap;

use tracing::debug;

use crate::{
  config::{ConfigError, FromStageSpec, StageKind, StageSpec},
  inference::{Predictor, ReplayPredictor},
  input::{ImageFileInput, ImageSequenceInput, Input},
  output::{LogOutput, Output, SaveImageFileOutput},
  pipeline::PipelineError,
  postprocess::{
    BoxesPostprocessor, Postprocessor, SemanticPostprocessor, YoloPostprocessor,
    YoloxPostprocessor,
  },
  preprocess::{Preprocessor, TransformsPreprocessor},
};

pub type InputConstructor = fn(&StageSpec) -> Result<Box<dyn Input>, PipelineError>;
pub type PreprocessorConstructor = fn(&StageSpec) -> Result<Box<dyn Preprocessor>, PipelineError>;
pub type PredictorConstructor = fn(&StageSpec) -> Result<Box<dyn Predictor>, PipelineError>;
pub type PostprocessorConstructor =
  fn(&StageSpec) -> Result<Box<dyn Postprocessor>, PipelineError>;
pub type OutputConstructor = fn(&StageSpec) -> Result<Box<dyn Output>, PipelineError>;

/// 已知但没有集成运行时的模型格式
const UNSUPPORTED_MODEL_FORMATS: [&str; 4] = ["onnx", "tflite", "tf", "pytorch"];

/// 阶段名称到构造函数的映射，每类阶段各一张表
#[derive(Default)]
pub struct StageRegistry {
  inputs: BTreeMap<String, InputConstructor>,
  preprocessors: BTreeMap<String, PreprocessorConstructor>,
  predictors: BTreeMap<String, PredictorConstructor>,
  postprocessors: BTreeMap<String, PostprocessorConstructor>,
  outputs: BTreeMap<String, OutputConstructor>,
}

impl StageRegistry {
  pub fn empty() -> Self {
    Self::default()
  }

  /// 注册全部内置阶段
  pub fn with_builtins() -> Self {
    let mut registry = Self::empty();

    registry.register_input(ImageFileInput::SCHEME, |spec| {
      Ok(Box::new(ImageFileInput::from_spec(spec)?))
    });
    registry.register_input(ImageSequenceInput::SCHEME, |spec| {
      Ok(Box::new(ImageSequenceInput::from_spec(spec)?.open()?))
    });
    #[cfg(feature = "v4l_input")]
    registry.register_input(crate::input::WebcamInput::SCHEME, |spec| {
      Ok(Box::new(crate::input::WebcamInput::from_spec(spec)?.open()?))
    });
    #[cfg(feature = "gstreamer_input")]
    registry.register_input(crate::input::GStreamerInput::SCHEME, |spec| {
      Ok(crate::input::GStreamerInput::from_spec(spec)?.open()?)
    });

    registry.register_preprocessor(TransformsPreprocessor::SCHEME, |spec| {
      Ok(Box::new(TransformsPreprocessor::from_spec(spec)?))
    });

    registry.register_predictor(ReplayPredictor::SCHEME, |spec| {
      Ok(Box::new(ReplayPredictor::from_spec(spec)?))
    });

    registry.register_postprocessor(YoloPostprocessor::SCHEME, |spec| {
      Ok(Box::new(YoloPostprocessor::from_spec(spec)?))
    });
    registry.register_postprocessor(YoloxPostprocessor::SCHEME, |spec| {
      Ok(Box::new(YoloxPostprocessor::from_spec(spec)?))
    });
    registry.register_postprocessor(BoxesPostprocessor::SCHEME, |spec| {
      Ok(Box::new(BoxesPostprocessor::from_spec(spec)?))
    });
    registry.register_postprocessor(SemanticPostprocessor::SCHEME, |spec| {
      Ok(Box::new(SemanticPostprocessor::from_spec(spec)?))
    });
    #[cfg(feature = "draw")]
    registry.register_postprocessor(crate::postprocess::DrawPostprocessor::SCHEME, |spec| {
      Ok(Box::new(crate::postprocess::DrawPostprocessor::from_spec(spec)?))
    });

    registry.register_output(SaveImageFileOutput::SCHEME, |spec| {
      Ok(Box::new(SaveImageFileOutput::from_spec(spec)?))
    });
    registry.register_output(LogOutput::SCHEME, |spec| {
      Ok(Box::new(LogOutput::from_spec(spec)?))
    });
    #[cfg(feature = "directory_record")]
    registry.register_output(crate::output::DirectoryRecordOutput::SCHEME, |spec| {
      Ok(Box::new(crate::output::DirectoryRecordOutput::from_spec(spec)?))
    });

    registry
  }

  pub fn register_input(&mut self, name: impl Into<String>, constructor: InputConstructor) {
    self.inputs.insert(name.into(), constructor);
  }

  pub fn register_preprocessor(
    &mut self,
    name: impl Into<String>,
    constructor: PreprocessorConstructor,
  ) {
    self.preprocessors.insert(name.into(), constructor);
  }

  pub fn register_predictor(&mut self, name: impl Into<String>, constructor: PredictorConstructor) {
    self.predictors.insert(name.into(), constructor);
  }

  pub fn register_postprocessor(
    &mut self,
    name: impl Into<String>,
    constructor: PostprocessorConstructor,
  ) {
    self.postprocessors.insert(name.into(), constructor);
  }

  pub fn register_output(&mut self, name: impl Into<String>, constructor: OutputConstructor) {
    self.outputs.insert(name.into(), constructor);
  }

  /// 某类阶段已注册的名称
  pub fn names(&self, kind: StageKind) -> Vec<&str> {
    match kind {
      StageKind::Input => self.inputs.keys().map(String::as_str).collect(),
      StageKind::Preprocessor => self.preprocessors.keys().map(String::as_str).collect(),
      StageKind::Inference => self.predictors.keys().map(String::as_str).collect(),
      StageKind::Postprocessor => self.postprocessors.keys().map(String::as_str).collect(),
      StageKind::Output => self.outputs.keys().map(String::as_str).collect(),
    }
  }

  pub fn build_input(&self, spec: &StageSpec) -> Result<Box<dyn Input>, PipelineError> {
    lookup(&self.inputs, StageKind::Input, spec)?(spec)
  }

  pub fn build_preprocessor(
    &self,
    spec: &StageSpec,
  ) -> Result<Box<dyn Preprocessor>, PipelineError> {
    lookup(&self.preprocessors, StageKind::Preprocessor, spec)?(spec)
  }

  pub fn build_inference(&self, spec: &StageSpec) -> Result<Box<dyn Predictor>, PipelineError> {
    if !self.predictors.contains_key(&spec.name)
      && UNSUPPORTED_MODEL_FORMATS.contains(&spec.name.as_str())
    {
      return Err(
        ConfigError::UnsupportedStage {
          kind: StageKind::Inference,
          name: spec.name.clone(),
          reason: "未集成该模型格式的运行时, 请注册自定义 Predictor".to_string(),
        }
        .into(),
      );
    }
    lookup(&self.predictors, StageKind::Inference, spec)?(spec)
  }

  pub fn build_postprocessor(
    &self,
    spec: &StageSpec,
  ) -> Result<Box<dyn Postprocessor>, PipelineError> {
    lookup(&self.postprocessors, StageKind::Postprocessor, spec)?(spec)
  }

  pub fn build_output(&self, spec: &StageSpec) -> Result<Box<dyn Output>, PipelineError> {
    lookup(&self.outputs, StageKind::Output, spec)?(spec)
  }
}

fn lookup<T: Copy>(
  table: &BTreeMap<String, T>,
  kind: StageKind,
  spec: &StageSpec,
) -> Result<T, ConfigError> {
  debug!("构建{}阶段 {}", kind, spec.name);
  table
    .get(&spec.name)
    .copied()
    .ok_or_else(|| ConfigError::UnknownStage {
      kind,
      name: spec.name.clone(),
    })
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn unknown_and_unsupported_names_fail_fast() {
    let registry = StageRegistry::with_builtins();
    assert!(matches!(
      registry.build_output(&StageSpec::new("mqtt")),
      Err(PipelineError::Config(ConfigError::UnknownStage {
        kind: StageKind::Output,
        ..
      }))
    ));
    assert!(matches!(
      registry.build_inference(&StageSpec::new("tflite")),
      Err(PipelineError::Config(ConfigError::UnsupportedStage { .. }))
    ));
  }

  #[test]
  fn builtins_are_registered() {
    let registry = StageRegistry::with_builtins();
    assert!(registry.names(StageKind::Input).contains(&"images"));
    assert!(registry.names(StageKind::Inference).contains(&"replay"));
    let postprocessors = registry.names(StageKind::Postprocessor);
    for name in ["yolo", "yolox", "boxes", "semantic"] {
      assert!(postprocessors.contains(&name), "{name}");
    }
    assert!(registry.names(StageKind::Output).contains(&"log"));
    let output = registry
      .build_output(&StageSpec::new("log").with("limit", 1))
      .unwrap();
    assert_eq!(output.name(), "log");
  }
}
