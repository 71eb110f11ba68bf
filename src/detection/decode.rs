// 该文件是 Qingfeng （清风） 项目的一部分。
// src/detection/decode.rs - YOLO 锚框解码
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

use std::str::FromStr;

use super::DetectionError;
use crate::tensor::Tensor;

/// YOLOv4 默认锚框 (宽, 高)，单位为模型输入像素
pub const DEFAULT_ANCHORS: [(f32, f32); 9] = [
  (12.0, 16.0),
  (19.0, 36.0),
  (40.0, 28.0),
  (36.0, 75.0),
  (76.0, 55.0),
  (72.0, 146.0),
  (142.0, 110.0),
  (192.0, 243.0),
  (459.0, 401.0),
];

const ANCHORS_PER_HEAD: usize = 3;

#[inline]
pub fn sigmoid(x: f32) -> f32 {
  1.0 / (1.0 + (-x).exp())
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnchorSpec {
  anchors: Vec<(f32, f32)>,
}

impl Default for AnchorSpec {
  fn default() -> Self {
    Self {
      anchors: DEFAULT_ANCHORS.to_vec(),
    }
  }
}

impl AnchorSpec {
  pub fn new(anchors: Vec<(f32, f32)>) -> Self {
    Self { anchors }
  }

  pub fn len(&self) -> usize {
    self.anchors.len()
  }

  pub fn is_empty(&self) -> bool {
    self.anchors.is_empty()
  }

  pub fn as_slice(&self) -> &[(f32, f32)] {
    &self.anchors
  }

  /// 第 `head` 个输出头使用的锚框组。
  ///
  /// 输出头按步长从小到大排列，使用的锚框从大到小，
  /// 3 个输出头时对应 `[[6,7,8],[3,4,5],[0,1,2]]`。
  pub fn group(&self, head: usize, heads: usize) -> &[(f32, f32)] {
    let start = (heads - 1 - head) * ANCHORS_PER_HEAD;
    &self.anchors[start..start + ANCHORS_PER_HEAD]
  }
}

impl FromStr for AnchorSpec {
  type Err = String;

  /// 接受 `12,16 19,36 ...` 或 `12,16,19,36,...`
  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let values = s
      .split(|c: char| c == ',' || c == ';' || c.is_whitespace())
      .filter(|v| !v.is_empty())
      .map(|v| v.parse::<f32>().map_err(|e| format!("锚框数值 '{v}' 无效: {e}")))
      .collect::<Result<Vec<_>, _>>()?;
    if values.is_empty() || values.len() % 2 != 0 {
      return Err(format!("锚框需要成对的宽高, 实际 {} 个数值", values.len()));
    }
    Ok(Self {
      anchors: values.chunks_exact(2).map(|p| (p[0], p[1])).collect(),
    })
  }
}

/// 解码后的候选框，中心点 `xywh` 按模型输入尺寸归一化
#[derive(Debug, Clone, PartialEq)]
pub struct RawBox {
  pub xywh: [f32; 4],
  pub objectness: f32,
  pub class_scores: Box<[f32]>,
}

/// 解码单个输出头 `(N, gH, gW, A*(5+C))`。
///
/// `input_shape` 为模型输入的 (高, 宽)。批次维度被展平。
pub fn decode_head(
  tensor: &Tensor,
  anchors: &[(f32, f32)],
  num_classes: usize,
  input_shape: (usize, usize),
) -> Result<Vec<RawBox>, DetectionError> {
  let &[batch, grid_h, grid_w, depth] = tensor.shape() else {
    return Err(DetectionError::MalformedTensor(format!(
      "输出头应为 4 维 (N, gH, gW, A*(5+C)), 实际形状 {:?}",
      tensor.shape()
    )));
  };

  let attrs = num_classes + 5;
  if depth != anchors.len() * attrs {
    return Err(DetectionError::ShapeMismatch(format!(
      "最后一维应为 {} x {} = {}, 实际 {}",
      anchors.len(),
      attrs,
      anchors.len() * attrs,
      depth
    )));
  }

  let (input_h, input_w) = input_shape;
  if grid_h == 0 || grid_w == 0 || input_h % grid_h != 0 || input_w % grid_w != 0 {
    return Err(DetectionError::ShapeMismatch(format!(
      "网格 {grid_h}x{grid_w} 无法整除输入 {input_h}x{input_w}"
    )));
  }
  if input_h / grid_h != input_w / grid_w {
    return Err(DetectionError::ShapeMismatch(format!(
      "两轴步长不一致: {} != {}",
      input_h / grid_h,
      input_w / grid_w
    )));
  }

  let data = tensor.data();
  let expected = crate::tensor::element_count(&[batch, grid_h, grid_w, depth]);
  if expected != Some(data.len()) {
    return Err(DetectionError::MalformedTensor(format!(
      "形状 {:?} 与数据长度 {} 不一致",
      tensor.shape(),
      data.len()
    )));
  }

  let mut boxes = Vec::with_capacity(batch * grid_h * grid_w * anchors.len());
  for n in 0..batch {
    for gy in 0..grid_h {
      for gx in 0..grid_w {
        let cell = ((n * grid_h + gy) * grid_w + gx) * depth;
        for (a, &(anchor_w, anchor_h)) in anchors.iter().enumerate() {
          let p = &data[cell + a * attrs..cell + (a + 1) * attrs];
          boxes.push(RawBox {
            xywh: [
              (sigmoid(p[0]) + gx as f32) / grid_w as f32,
              (sigmoid(p[1]) + gy as f32) / grid_h as f32,
              p[2].exp() * anchor_w / input_w as f32,
              p[3].exp() * anchor_h / input_h as f32,
            ],
            objectness: sigmoid(p[4]),
            class_scores: p[5..].iter().copied().map(sigmoid).collect(),
          });
        }
      }
    }
  }

  Ok(boxes)
}

/// 解码全部输出头并拼接
pub fn decode(
  heads: &[Tensor],
  anchors: &AnchorSpec,
  num_classes: usize,
  input_shape: (usize, usize),
) -> Result<Vec<RawBox>, DetectionError> {
  if heads.is_empty() {
    return Err(DetectionError::UnsupportedHeadCount(0));
  }
  if anchors.len() % ANCHORS_PER_HEAD != 0 || heads.len() != anchors.len() / ANCHORS_PER_HEAD {
    return Err(DetectionError::AnchorMismatch {
      heads: heads.len(),
      anchors: anchors.len(),
    });
  }

  let mut boxes = Vec::new();
  for (i, head) in heads.iter().enumerate() {
    boxes.extend(decode_head(
      head,
      anchors.group(i, heads.len()),
      num_classes,
      input_shape,
    )?);
  }
  Ok(boxes)
}
