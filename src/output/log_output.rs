// 该文件是 Qingfeng （清风） 项目的一部分。
// src/output/log_output.rs - 日志输出
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

use tracing::info;

use super::{Output, OutputError};
use crate::{
  config::{ConfigError, FromStageSpec, StageOptions},
  context::PipelineContext,
  model::{LabelMap, Predictions},
};

/// 把每帧的检测结果写入日志；设置 `limit` 后在 N 帧后报告停止
pub struct LogOutput {
  labels: LabelMap,
  limit: Option<u64>,
  frames: u64,
}

impl LogOutput {
  pub fn new(limit: Option<u64>) -> Self {
    Self {
      labels: LabelMap::coco(),
      limit,
      frames: 0,
    }
  }

  pub fn frames(&self) -> u64 {
    self.frames
  }
}

impl FromStageSpec for LogOutput {
  const SCHEME: &'static str = "log";

  fn from_options(options: &mut StageOptions) -> Result<Self, ConfigError> {
    let mut output = LogOutput::new(options.take("limit")?);
    if let Some(labels) = options.take_raw("labels") {
      output.labels = LabelMap::from_option(&labels).map_err(|e| ConfigError::InvalidOption {
        stage: options.stage().to_string(),
        key: "labels".to_string(),
        value: labels.clone(),
        reason: e.to_string(),
      })?;
    }
    Ok(output)
  }
}

impl Output for LogOutput {
  fn name(&self) -> &str {
    Self::SCHEME
  }

  fn run(&mut self, ctx: &PipelineContext) -> Result<(), OutputError> {
    self.frames += 1;
    match &ctx.predictions {
      Some(Predictions::Detections(result)) => {
        info!("帧 {}: {} 个目标", ctx.frame_id, result.len());
        for item in result.iter() {
          info!(
            "  {} {:.2} [{:.3}, {:.3}, {:.3}, {:.3}]",
            self.labels.name(item.class_id),
            item.score,
            item.bbox[0],
            item.bbox[1],
            item.bbox[2],
            item.bbox[3]
          );
        }
      }
      Some(Predictions::Mask(mask)) => {
        info!("帧 {}: 前景像素 {}", ctx.frame_id, mask.foreground());
      }
      None => info!("帧 {}: 无预测结果", ctx.frame_id),
    }
    if self.stopped() {
      info!("达到指定帧数 {}, 日志输出停止", self.frames);
    }
    Ok(())
  }

  fn stopped(&self) -> bool {
    self.limit.is_some_and(|limit| self.frames >= limit)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::StageSpec;

  #[test]
  fn stops_after_limit() {
    let mut output = LogOutput::from_spec(&StageSpec::new("log").with("limit", 2)).unwrap();
    let ctx = PipelineContext::new();
    output.run(&ctx).unwrap();
    assert!(!output.stopped());
    output.run(&ctx).unwrap();
    assert!(output.stopped());

    let mut unlimited = LogOutput::new(None);
    unlimited.run(&ctx).unwrap();
    assert!(!unlimited.stopped());
  }
}
