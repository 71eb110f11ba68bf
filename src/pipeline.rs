// 该文件是 Qingfeng （清风） 项目的一部分。
// src/pipeline.rs - 流水线引擎
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

//! # 流水线引擎
//!
//! 单线程循环：`load_data` → 预处理 → 推理 → 后处理 → 输出。
//! 输入报告停止、任一输出报告停止或停止信号被触发时结束循环，
//! 无论正常结束还是出错都会执行清理。

use std::{collections::BTreeSet, thread, time::Duration, time::Instant};

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
  config::{ConfigError, DEFAULT_GRACE_PERIOD_MS, PipelineConfig, StageKind},
  context::{PipelineContext, Slot},
  inference::{InferenceAdapter, InferenceError, Predictor},
  input::{Input, InputError},
  output::{Output, OutputError},
  postprocess::{PostprocessError, Postprocessor},
  preprocess::{PreprocessError, Preprocessor},
  registry::StageRegistry,
  signal::StopSignal,
};

#[derive(Error, Debug)]
pub enum PipelineError {
  #[error("配置错误: {0}")]
  Config(#[from] ConfigError),
  #[error("输入错误: {0}")]
  Input(#[from] InputError),
  #[error("预处理阶段 {stage} 失败: {source}")]
  Preprocessing {
    stage: String,
    source: PreprocessError,
  },
  #[error("推理阶段 {stage} 失败: {source}")]
  Inference {
    stage: String,
    source: InferenceError,
  },
  #[error("后处理阶段 {stage} 失败: {source}")]
  Postprocessing {
    stage: String,
    source: PostprocessError,
  },
  #[error("输出阶段 {stage} 失败: {source}")]
  Output { stage: String, source: OutputError },
}

/// 一次运行的统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunReport {
  /// 完整经过所有阶段的帧数
  pub frames: u64,
  /// 是否因停止信号结束
  pub interrupted: bool,
}

#[derive(Default)]
pub struct EngineBuilder {
  input: Option<Box<dyn Input>>,
  preprocessors: Vec<Box<dyn Preprocessor>>,
  inference: Option<Box<dyn Predictor>>,
  postprocessors: Vec<Box<dyn Postprocessor>>,
  outputs: Vec<Box<dyn Output>>,
  grace_period: Option<Duration>,
}

impl EngineBuilder {
  pub fn set_input(mut self, input: impl Input + 'static) -> Self {
    self.input = Some(Box::new(input));
    self
  }

  pub fn add_preprocessor(mut self, stage: impl Preprocessor + 'static) -> Self {
    self.preprocessors.push(Box::new(stage));
    self
  }

  pub fn set_inference(mut self, predictor: impl Predictor + 'static) -> Self {
    self.inference = Some(Box::new(predictor));
    self
  }

  pub fn add_postprocessor(mut self, stage: impl Postprocessor + 'static) -> Self {
    self.postprocessors.push(Box::new(stage));
    self
  }

  pub fn add_output(mut self, output: impl Output + 'static) -> Self {
    self.outputs.push(Box::new(output));
    self
  }

  pub fn grace_period(mut self, grace_period: Duration) -> Self {
    self.grace_period = Some(grace_period);
    self
  }

  /// 检查必需阶段与上下文字段的读写顺序
  pub fn build(self) -> Result<Engine, ConfigError> {
    let input = self.input.ok_or(ConfigError::MissingStage(StageKind::Input))?;
    let inference = self
      .inference
      .ok_or(ConfigError::MissingStage(StageKind::Inference))?;
    if self.outputs.is_empty() {
      return Err(ConfigError::MissingStage(StageKind::Output));
    }

    let mut provided = BTreeSet::from([Slot::RawOutputs]);
    for stage in &self.postprocessors {
      check_slots(stage.name(), stage.requires(), &provided)?;
      provided.extend(stage.provides());
    }
    for output in &self.outputs {
      check_slots(output.name(), output.requires(), &provided)?;
    }

    Ok(Engine {
      input,
      preprocessors: self.preprocessors,
      inference: InferenceAdapter::new(inference),
      postprocessors: self.postprocessors,
      outputs: self.outputs,
      grace_period: self
        .grace_period
        .unwrap_or(Duration::from_millis(DEFAULT_GRACE_PERIOD_MS)),
      context: PipelineContext::new(),
    })
  }
}

fn check_slots(stage: &str, requires: &[Slot], provided: &BTreeSet<Slot>) -> Result<(), ConfigError> {
  match requires.iter().find(|&&slot| !provided.contains(&slot)) {
    Some(&slot) => Err(ConfigError::UnsatisfiedSlot {
      stage: stage.to_string(),
      slot,
    }),
    None => Ok(()),
  }
}

pub struct Engine {
  input: Box<dyn Input>,
  preprocessors: Vec<Box<dyn Preprocessor>>,
  inference: InferenceAdapter,
  postprocessors: Vec<Box<dyn Postprocessor>>,
  outputs: Vec<Box<dyn Output>>,
  grace_period: Duration,
  context: PipelineContext,
}

impl Engine {
  pub fn builder() -> EngineBuilder {
    EngineBuilder::default()
  }

  pub fn from_config(
    config: &PipelineConfig,
    registry: &StageRegistry,
  ) -> Result<Engine, PipelineError> {
    let input_spec = config
      .input
      .as_ref()
      .ok_or(ConfigError::MissingStage(StageKind::Input))?;
    let inference_spec = config
      .inference
      .as_ref()
      .ok_or(ConfigError::MissingStage(StageKind::Inference))?;

    let mut builder = EngineBuilder {
      input: Some(registry.build_input(input_spec)?),
      inference: Some(registry.build_inference(inference_spec)?),
      grace_period: Some(config.grace_period()),
      ..EngineBuilder::default()
    };
    for spec in &config.preprocessors {
      builder.preprocessors.push(registry.build_preprocessor(spec)?);
    }
    for spec in &config.postprocessors {
      builder
        .postprocessors
        .push(registry.build_postprocessor(spec)?);
    }
    for spec in &config.outputs {
      builder.outputs.push(registry.build_output(spec)?);
    }
    Ok(builder.build()?)
  }

  /// 各阶段名称
  pub fn summary(&self) -> String {
    let join = |names: Vec<&str>| {
      if names.is_empty() {
        "-".to_string()
      } else {
        names.join(", ")
      }
    };
    format!(
      "输入: {} | 预处理: {} | 推理: {} | 后处理: {} | 输出: {}",
      self.input.name(),
      join(self.preprocessors.iter().map(|s| s.name()).collect()),
      self.inference.name(),
      join(self.postprocessors.iter().map(|s| s.name()).collect()),
      join(self.outputs.iter().map(|s| s.name()).collect()),
    )
  }

  pub fn context(&self) -> &PipelineContext {
    &self.context
  }

  pub fn run(&mut self, signal: &StopSignal) -> Result<RunReport, PipelineError> {
    self.run_limited(signal, None)
  }

  /// 与 `run` 相同，最多处理 `max_frames` 帧
  pub fn run_limited(
    &mut self,
    signal: &StopSignal,
    max_frames: Option<u64>,
  ) -> Result<RunReport, PipelineError> {
    info!("启动流水线: {}", self.summary());
    let result = self.run_loop(signal, max_frames);
    self.cleanup();
    match &result {
      Ok(report) => info!(
        "流水线结束, 共处理 {} 帧{}",
        report.frames,
        if report.interrupted { " (被中断)" } else { "" }
      ),
      Err(e) => error!("流水线异常结束: {}", e),
    }
    result
  }

  fn run_loop(
    &mut self,
    signal: &StopSignal,
    max_frames: Option<u64>,
  ) -> Result<RunReport, PipelineError> {
    let mut report = RunReport::default();
    self.input.run(signal)?;

    loop {
      if signal.is_raised() {
        warn!("收到停止信号, 退出流水线循环");
        report.interrupted = true;
        break;
      }

      match self.run_once() {
        Ok(()) => report.frames += 1,
        Err(PipelineError::Input(InputError::EndOfStream | InputError::Stopped)) => {
          info!("输入源已结束");
          report.interrupted = signal.is_raised();
          break;
        }
        Err(e) => return Err(e),
      }

      if self.input.stopped() {
        debug!("输入源报告停止");
        break;
      }
      if let Some(output) = self.outputs.iter().find(|o| o.stopped()) {
        info!("输出 {} 报告停止", output.name());
        break;
      }
      if max_frames.is_some_and(|n| report.frames >= n) {
        info!("达到指定帧数 {}, 退出流水线循环", report.frames);
        break;
      }
    }

    Ok(report)
  }

  /// 处理一帧
  pub fn run_once(&mut self) -> Result<(), PipelineError> {
    let now = Instant::now();
    let ctx = &mut self.context;
    self.input.load_data(ctx)?;
    let loaded = now.elapsed();

    for stage in &mut self.preprocessors {
      stage
        .run(ctx)
        .map_err(|source| PipelineError::Preprocessing {
          stage: stage.name().to_string(),
          source,
        })?;
    }

    self
      .inference
      .run(ctx)
      .map_err(|source| PipelineError::Inference {
        stage: self.inference.name().to_string(),
        source,
      })?;
    let inferred = now.elapsed();

    for stage in &mut self.postprocessors {
      stage
        .run(ctx)
        .map_err(|source| PipelineError::Postprocessing {
          stage: stage.name().to_string(),
          source,
        })?;
    }

    for output in &mut self.outputs {
      output.run(ctx).map_err(|source| PipelineError::Output {
        stage: output.name().to_string(),
        source,
      })?;
    }

    debug!(
      "第 {} 帧 {} 完成, 读取 {:.2?} / 推理 {:.2?} / 总计 {:.2?}",
      ctx.sequence,
      ctx.frame_id,
      loaded,
      inferred,
      now.elapsed()
    );
    Ok(())
  }

  /// 停止输入与全部输出，然后等待后台写入
  fn cleanup(&mut self) {
    info!("清理流水线...");
    self.input.stop();
    for output in &mut self.outputs {
      output.stop();
    }
    if !self.grace_period.is_zero() {
      thread::sleep(self.grace_period);
    }
  }
}
