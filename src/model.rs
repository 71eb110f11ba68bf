// 该文件是 Qingfeng （清风） 项目的一部分。
// src/model.rs - 检测结果与标签
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

use std::{borrow::Cow, path::Path};

/// COCO 数据集类别名称
pub const COCO_CLASSES: [&str; 80] = [
  "person",
  "bicycle",
  "car",
  "motorcycle",
  "airplane",
  "bus",
  "train",
  "truck",
  "boat",
  "traffic light",
  "fire hydrant",
  "stop sign",
  "parking meter",
  "bench",
  "bird",
  "cat",
  "dog",
  "horse",
  "sheep",
  "cow",
  "elephant",
  "bear",
  "zebra",
  "giraffe",
  "backpack",
  "umbrella",
  "handbag",
  "tie",
  "suitcase",
  "frisbee",
  "skis",
  "snowboard",
  "sports ball",
  "kite",
  "baseball bat",
  "baseball glove",
  "skateboard",
  "surfboard",
  "tennis racket",
  "bottle",
  "wine glass",
  "cup",
  "fork",
  "knife",
  "spoon",
  "bowl",
  "banana",
  "apple",
  "sandwich",
  "orange",
  "broccoli",
  "carrot",
  "hot dog",
  "pizza",
  "donut",
  "cake",
  "chair",
  "couch",
  "potted plant",
  "bed",
  "dining table",
  "toilet",
  "tv",
  "laptop",
  "mouse",
  "remote",
  "keyboard",
  "cell phone",
  "microwave",
  "oven",
  "toaster",
  "sink",
  "refrigerator",
  "book",
  "clock",
  "vase",
  "scissors",
  "teddy bear",
  "hair drier",
  "toothbrush",
];

#[derive(Debug, Clone, PartialEq)]
pub struct DetectItem {
  pub class_id: u32,
  pub score: f32,
  pub bbox: [f32; 4], // [x_min, y_min, x_max, y_max]，按原图宽高归一化
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectResult {
  pub items: Box<[DetectItem]>,
}

impl DetectResult {
  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn iter(&self) -> std::slice::Iter<'_, DetectItem> {
    self.items.iter()
  }
}

impl From<Vec<DetectItem>> for DetectResult {
  fn from(items: Vec<DetectItem>) -> Self {
    Self {
      items: items.into_boxed_slice(),
    }
  }
}

/// 语义分割结果，每个像素一个类别编号
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentationMask {
  height: usize,
  width: usize,
  labels: Box<[u8]>,
}

impl SegmentationMask {
  pub fn new(height: usize, width: usize, labels: Vec<u8>) -> Option<Self> {
    (labels.len() == height * width).then(|| Self {
      height,
      width,
      labels: labels.into_boxed_slice(),
    })
  }

  pub fn height(&self) -> usize {
    self.height
  }

  pub fn width(&self) -> usize {
    self.width
  }

  pub fn get(&self, y: usize, x: usize) -> u8 {
    self.labels[y * self.width + x]
  }

  pub fn labels(&self) -> &[u8] {
    &self.labels
  }

  /// 非背景（非 0）像素数量
  pub fn foreground(&self) -> usize {
    self.labels.iter().filter(|&&l| l != 0).count()
  }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Predictions {
  Detections(DetectResult),
  Mask(SegmentationMask),
}

impl Predictions {
  pub fn detections(&self) -> Option<&DetectResult> {
    match self {
      Predictions::Detections(result) => Some(result),
      Predictions::Mask(_) => None,
    }
  }

  pub fn mask(&self) -> Option<&SegmentationMask> {
    match self {
      Predictions::Mask(mask) => Some(mask),
      Predictions::Detections(_) => None,
    }
  }

  pub fn is_empty(&self) -> bool {
    match self {
      Predictions::Detections(result) => result.is_empty(),
      Predictions::Mask(mask) => mask.foreground() == 0,
    }
  }
}

/// 类别编号到名称的映射
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LabelMap {
  names: Vec<String>,
}

impl LabelMap {
  pub fn coco() -> Self {
    Self {
      names: COCO_CLASSES.iter().map(|s| s.to_string()).collect(),
    }
  }

  /// 每行一个类别名称，空行忽略
  pub fn parse(text: &str) -> Self {
    Self {
      names: text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect(),
    }
  }

  pub fn load(path: impl AsRef<Path>) -> std::io::Result<Self> {
    Ok(Self::parse(&std::fs::read_to_string(path)?))
  }

  /// `coco` 为内置 COCO 标签，其余视为标签文件路径
  pub fn from_option(value: &str) -> std::io::Result<Self> {
    match value {
      "coco" => Ok(Self::coco()),
      path => Self::load(path),
    }
  }

  pub fn len(&self) -> usize {
    self.names.len()
  }

  pub fn is_empty(&self) -> bool {
    self.names.is_empty()
  }

  pub fn name(&self, class_id: u32) -> Cow<'_, str> {
    match self.names.get(class_id as usize) {
      Some(name) => Cow::Borrowed(name),
      None => Cow::Owned(format!("class {class_id}")),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn label_map_falls_back_to_id() {
    let labels = LabelMap::parse("cat\n\ndog\n");
    assert_eq!(labels.len(), 2);
    assert_eq!(labels.name(1), "dog");
    assert_eq!(labels.name(7), "class 7");
    assert_eq!(LabelMap::coco().name(0), "person");
  }

  #[test]
  fn mask_emptiness_counts_foreground() {
    let mask = SegmentationMask::new(2, 2, vec![0, 0, 1, 0]).unwrap();
    assert!(!Predictions::Mask(mask).is_empty());
    assert!(SegmentationMask::new(2, 2, vec![0; 3]).is_none());
    assert!(Predictions::Detections(DetectResult::default()).is_empty());
  }
}
