// 该文件是 Qingfeng （清风） 项目的一部分。
// src/output/directory_record.rs - 目录记录输出
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

use std::{
  path::{Path, PathBuf},
  sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
  },
  thread,
};

use chrono::{Datelike, Utc};
use tracing::{debug, error, info, warn};

use super::{Output, OutputError};
use crate::{
  config::{ConfigError, FromStageSpec, StageOptions},
  context::PipelineContext,
  frame::Frame,
  model::{DetectResult, LabelMap, Predictions},
};

/// 记录文件中类别的写法
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordLabel {
  Name,
  Id,
}

struct RecordEntry {
  frame_id: String,
  frame: Frame,
  detections: Option<DetectResult>,
}

/// 按日期目录保存有结果的帧。
///
/// 每 `frame_interval` 帧取一帧，攒够 `batch` 帧后交给后台线程写入
/// `<目录>/<年>/<月>/<日>/<frame_id>.png` 及同名 `.txt` 记录。
/// 后台写入期间到达的帧直接跳过。
pub struct DirectoryRecordOutput {
  directory: PathBuf,
  frame_interval: u64,
  batch: usize,
  always: bool,
  label: RecordLabel,
  labels: Arc<LabelMap>,
  seen: u64,
  pending: Vec<RecordEntry>,
  writing: Arc<AtomicBool>,
  stopped: bool,
}

impl DirectoryRecordOutput {
  pub fn new(directory: impl Into<PathBuf>) -> Self {
    Self {
      directory: directory.into(),
      frame_interval: 1,
      batch: 1,
      always: false,
      label: RecordLabel::Name,
      labels: Arc::new(LabelMap::coco()),
      seen: 0,
      pending: Vec::new(),
      writing: Arc::new(AtomicBool::new(false)),
      stopped: false,
    }
  }

  /// 没有检测结果的帧也保存
  pub fn always(mut self, always: bool) -> Self {
    self.always = always;
    self
  }

  pub fn with_batch(mut self, frame_interval: u64, batch: usize) -> Self {
    self.frame_interval = frame_interval.max(1);
    self.batch = batch.max(1);
    self
  }

  pub fn is_writing(&self) -> bool {
    self.writing.load(Ordering::Acquire)
  }

  fn dated_directory(&self) -> PathBuf {
    let now = Utc::now();
    self
      .directory
      .join(now.year().to_string())
      .join(format!("{:02}", now.month()))
      .join(format!("{:02}", now.day()))
  }

  fn flush(&mut self) {
    let entries = std::mem::take(&mut self.pending);
    let directory = self.dated_directory();
    let labels = Arc::clone(&self.labels);
    let label = self.label;
    let writing = Arc::clone(&self.writing);
    writing.store(true, Ordering::Release);

    let spawned = thread::Builder::new()
      .name("directory-record".to_string())
      .spawn(move || {
        for entry in &entries {
          if let Err(e) = write_entry(&directory, entry, &labels, label) {
            error!("写入记录 {} 失败: {}", entry.frame_id, e);
          }
        }
        debug!("已写入 {} 帧到 {}", entries.len(), directory.display());
        writing.store(false, Ordering::Release);
      });
    if let Err(e) = spawned {
      error!("无法启动写入线程: {}", e);
      self.writing.store(false, Ordering::Release);
    }
  }
}

fn write_entry(
  directory: &Path,
  entry: &RecordEntry,
  labels: &LabelMap,
  label: RecordLabel,
) -> Result<(), OutputError> {
  std::fs::create_dir_all(directory)?;
  let path = directory.join(format!("{}.png", urlencoding::encode(&entry.frame_id)));
  entry.frame.to_rgb_image()?.save(&path)?;

  if let Some(result) = &entry.detections {
    let records = result
      .iter()
      .map(|item| {
        let name = match label {
          RecordLabel::Name => labels.name(item.class_id).into_owned(),
          RecordLabel::Id => item.class_id.to_string(),
        };
        format!(
          "{}, {:.4}, {:.4}, {:.4}, {:.4}, {:.4}",
          name, item.score, item.bbox[0], item.bbox[1], item.bbox[2], item.bbox[3]
        )
      })
      .collect::<Vec<_>>();
    std::fs::write(path.with_extension("txt"), records.join("\n"))?;
  }
  Ok(())
}

impl FromStageSpec for DirectoryRecordOutput {
  const SCHEME: &'static str = "folder";

  fn from_options(options: &mut StageOptions) -> Result<Self, ConfigError> {
    let directory: String = options.require("path")?;
    let frame_interval = options.take_or("frame_interval", 1)?;
    let batch = options.take_or("batch", 1)?;
    let always = options.take_flag("always")?;
    let label = match options.take_raw("record").as_deref() {
      None | Some("name") => RecordLabel::Name,
      Some("id") => RecordLabel::Id,
      Some(other) => {
        return Err(ConfigError::InvalidOption {
          stage: options.stage().to_string(),
          key: "record".to_string(),
          value: other.to_string(),
          reason: "应为 name 或 id".to_string(),
        });
      }
    };
    let mut output = DirectoryRecordOutput::new(directory)
      .with_batch(frame_interval, batch)
      .always(always);
    output.label = label;
    if let Some(labels) = options.take_raw("labels") {
      let map = LabelMap::from_option(&labels).map_err(|e| ConfigError::InvalidOption {
        stage: options.stage().to_string(),
        key: "labels".to_string(),
        value: labels.clone(),
        reason: e.to_string(),
      })?;
      output.labels = Arc::new(map);
    }
    Ok(output)
  }
}

impl Output for DirectoryRecordOutput {
  fn name(&self) -> &str {
    Self::SCHEME
  }

  fn run(&mut self, ctx: &PipelineContext) -> Result<(), OutputError> {
    if self.stopped {
      return Ok(());
    }
    self.seen += 1;
    if self.seen % self.frame_interval != 0 {
      return Ok(());
    }
    if self.is_writing() {
      debug!("后台写入未完成, 跳过帧 {}", ctx.frame_id);
      return Ok(());
    }
    let has_result = ctx.predictions.as_ref().is_some_and(|p| !p.is_empty());
    if !self.always && !has_result {
      return Ok(());
    }

    self.pending.push(RecordEntry {
      frame_id: ctx.frame_id.clone(),
      frame: ctx.display_frame().clone(),
      detections: ctx
        .predictions
        .as_ref()
        .and_then(Predictions::detections)
        .cloned(),
    });
    if self.pending.len() >= self.batch {
      self.flush();
    }
    Ok(())
  }

  fn stop(&mut self) {
    if self.stopped {
      return;
    }
    self.stopped = true;
    if !self.pending.is_empty() {
      info!("丢弃 {} 帧未写入的记录", self.pending.len());
      self.pending.clear();
    }
    if self.is_writing() {
      warn!("后台写入仍在进行, 放弃等待");
    }
  }

  fn stopped(&self) -> bool {
    self.stopped
  }
}

#[cfg(test)]
mod tests {
  use std::{sync::Arc, time::Duration};

  use super::*;
  use crate::{
    config::StageSpec,
    frame::FrameShape,
    model::DetectItem,
  };

  fn files_with_extension(dir: &Path, ext: &str) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let Ok(entries) = std::fs::read_dir(dir) else {
      return found;
    };
    for entry in entries.flatten() {
      let path = entry.path();
      if path.is_dir() {
        found.extend(files_with_extension(&path, ext));
      } else if path.extension().is_some_and(|e| e == ext) {
        found.push(path);
      }
    }
    found
  }

  fn context(frame_id: &str, detections: Vec<DetectItem>) -> PipelineContext {
    let mut ctx = PipelineContext::new();
    ctx.load(frame_id, Arc::new(Frame::filled(FrameShape::rgb(4, 4), 1)));
    ctx.predictions = Some(Predictions::Detections(DetectResult::from(detections)));
    ctx
  }

  fn wait_idle(output: &DirectoryRecordOutput) {
    for _ in 0..200 {
      if !output.is_writing() {
        return;
      }
      thread::sleep(Duration::from_millis(10));
    }
    panic!("写入线程未结束");
  }

  #[test]
  fn writes_frames_with_detections() {
    let dir = std::env::temp_dir().join(format!("qingfeng-record-{}", std::process::id()));
    let spec = StageSpec::new("folder")
      .with("path", dir.display())
      .with("record", "id");
    let mut output = DirectoryRecordOutput::from_spec(&spec).unwrap();

    output.run(&context("empty", vec![])).unwrap();
    wait_idle(&output);
    output
      .run(&context(
        "cam/1",
        vec![DetectItem {
          class_id: 2,
          score: 0.5,
          bbox: [0.0, 0.1, 0.2, 0.3],
        }],
      ))
      .unwrap();
    wait_idle(&output);

    let images = files_with_extension(&dir, "png");
    assert_eq!(images.len(), 1);
    assert!(images[0].ends_with("cam%2F1.png"));
    let records = files_with_extension(&dir, "txt");
    let text = std::fs::read_to_string(&records[0]).unwrap();
    assert_eq!(text, "2, 0.5000, 0.0000, 0.1000, 0.2000, 0.3000");
    std::fs::remove_dir_all(&dir).unwrap();
  }

  #[test]
  fn batches_respect_interval_and_stop_drops_pending() {
    let dir = std::env::temp_dir().join(format!("qingfeng-batch-{}", std::process::id()));
    let mut output = DirectoryRecordOutput::new(&dir)
      .with_batch(2, 3)
      .always(true);
    for i in 0..4 {
      output.run(&context(&format!("f{i}"), vec![])).unwrap();
    }
    // 第 2、4 帧入队，不足一批
    assert_eq!(output.pending.len(), 2);
    output.stop();
    assert!(output.stopped());
    assert!(output.pending.is_empty());
    assert!(files_with_extension(&dir, "png").is_empty());
  }
}
