// 该文件是 Qingfeng （清风） 项目的一部分。
// src/detection/yolo.rs - YOLO 检测后处理组合
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

use super::{
  AnchorSpec, Candidate, DetectionError, NmsParams, RawBox, correct_boxes, decode, filter_top_k,
  nms, to_corner_format,
};
use crate::{
  model::{DetectItem, DetectResult},
  tensor::Tensor,
};

/// 计算每个框的类别与得分，保留得分不低于 `confidence` 的框。
///
/// 单类别时得分即目标置信度，否则为目标置信度与类别概率之积。
pub fn score_candidates(raw: &[RawBox], confidence: f32) -> Vec<Candidate> {
  raw
    .iter()
    .filter_map(|b| {
      let (class_id, score) = if b.class_scores.len() <= 1 {
        (0, b.objectness)
      } else {
        let mut best = (0u32, b.objectness * b.class_scores[0]);
        for (i, &p) in b.class_scores.iter().enumerate().skip(1) {
          let score = b.objectness * p;
          if score > best.1 {
            best = (i as u32, score);
          }
        }
        best
      };
      (score >= confidence).then(|| Candidate {
        bbox: b.xywh,
        class_id,
        score,
      })
    })
    .collect()
}

/// 解码、还原、打分、NMS、Top-K 与坐标格式化
#[derive(Debug, Clone, PartialEq)]
pub struct YoloPostprocess {
  pub num_classes: usize,
  pub anchors: AnchorSpec,
  /// 模型输入 (高, 宽)
  pub input_shape: (usize, usize),
  pub confidence: f32,
  pub max_boxes: usize,
  pub nms: NmsParams,
}

impl YoloPostprocess {
  pub fn new(num_classes: usize, input_shape: (usize, usize)) -> Self {
    Self {
      num_classes,
      anchors: AnchorSpec::default(),
      input_shape,
      confidence: 0.1,
      max_boxes: 100,
      nms: NmsParams::default(),
    }
  }

  pub fn with_anchors(mut self, anchors: AnchorSpec) -> Self {
    self.anchors = anchors;
    self
  }

  /// `image_shape` 为原图 (高, 宽)
  pub fn process(
    &self,
    heads: &[Tensor],
    image_shape: (usize, usize),
  ) -> Result<DetectResult, DetectionError> {
    let mut raw = decode(heads, &self.anchors, self.num_classes, self.input_shape)?;
    correct_boxes(&mut raw, image_shape, self.input_shape);

    let candidates = score_candidates(&raw, self.confidence);
    let mut kept = nms(&candidates, &self.nms);
    filter_top_k(&mut kept, self.max_boxes);

    Ok(DetectResult::from(
      kept
        .into_iter()
        .map(|c| DetectItem {
          class_id: c.class_id,
          score: c.score,
          bbox: to_corner_format(c.bbox, image_shape),
        })
        .collect::<Vec<_>>(),
    ))
  }
}
