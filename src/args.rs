// 该文件是 Qingfeng （清风） 项目的一部分。
// src/args.rs - 命令行参数
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

use std::path::PathBuf;

use clap::Parser;

use qingfeng::config::{PipelineConfig, StageSpec};

/// Qingfeng 边缘检测流水线
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// JSON 流水线配置文件；与下列阶段参数同时给出时，阶段参数覆盖配置文件
  #[arg(long, value_name = "FILE")]
  pub config: Option<PathBuf>,

  /// 输入阶段，例如 images:///data/frames?buffer=4
  #[arg(long, value_name = "URL")]
  pub input: Option<StageSpec>,

  /// 预处理阶段，可重复，例如 transforms:?tools=letterbox:416x416
  #[arg(long, value_name = "URL")]
  pub preprocess: Vec<StageSpec>,

  /// 推理阶段，例如 replay:///data/outputs.json
  #[arg(long, value_name = "URL")]
  pub inference: Option<StageSpec>,

  /// 后处理阶段，可重复，例如 yolo:?classes=80
  #[arg(long, value_name = "URL")]
  pub postprocess: Vec<StageSpec>,

  /// 输出阶段，可重复，例如 folder:///data/records?always
  #[arg(long, value_name = "URL")]
  pub output: Vec<StageSpec>,

  /// 最大处理帧数
  #[arg(long, value_name = "FRAME_NUMBER")]
  pub frame_number: Option<u64>,

  /// 停止后等待后台写入的毫秒数
  #[arg(long, value_name = "MS")]
  pub grace_period_ms: Option<u64>,

  /// 输出调试日志
  #[arg(short, long)]
  pub verbose: bool,
}

impl Args {
  pub fn pipeline_config(&self) -> Result<PipelineConfig, qingfeng::config::ConfigError> {
    let mut config = match &self.config {
      Some(path) => PipelineConfig::load(path)?,
      None => PipelineConfig::default(),
    };
    if let Some(input) = &self.input {
      config.input = Some(input.clone());
    }
    if !self.preprocess.is_empty() {
      config.preprocessors = self.preprocess.clone();
    }
    if let Some(inference) = &self.inference {
      config.inference = Some(inference.clone());
    }
    if !self.postprocess.is_empty() {
      config.postprocessors = self.postprocess.clone();
    }
    if !self.output.is_empty() {
      config.outputs = self.output.clone();
    }
    if let Some(ms) = self.grace_period_ms {
      config.grace_period_ms = ms;
    }
    Ok(config)
  }
}
