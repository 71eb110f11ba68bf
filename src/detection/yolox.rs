// 该文件是 Qingfeng （清风） 项目的一部分。
// src/detection/yolox.rs - YOLOX 无锚框输出后处理
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
  Candidate, DetectionError, NmsParams, RawBox, correct_boxes, filter_top_k, nms,
  nms_class_agnostic, to_corner_format,
};
use crate::{
  model::{DetectItem, DetectResult},
  tensor::Tensor,
};

/// YOLOX 输出 `(N, boxes, 5+C)` 的后处理，只取批次中的第一张图。
///
/// 每行为模型输入像素空间的中心点 `xywh`、目标置信度和各类别概率，均已激活。
/// 得分为目标置信度与最大类别概率之积。
#[derive(Debug, Clone, PartialEq)]
pub struct YoloxPostprocess {
  pub num_classes: usize,
  /// 模型输入 (高, 宽)
  pub input_shape: (usize, usize),
  pub confidence: f32,
  pub iou_threshold: f32,
  pub max_boxes: usize,
  /// 为真时所有类别一起做 NMS
  pub class_agnostic: bool,
  /// 输入经过等比缩放填充
  pub letterbox: bool,
}

impl YoloxPostprocess {
  pub fn new(num_classes: usize, input_shape: (usize, usize)) -> Self {
    Self {
      num_classes,
      input_shape,
      confidence: 0.7,
      iou_threshold: 0.45,
      max_boxes: 100,
      class_agnostic: false,
      letterbox: false,
    }
  }

  /// 打分并还原到原图像素空间左上角 `xywh`
  pub fn candidates(
    &self,
    prediction: &Tensor,
    image_shape: (usize, usize),
  ) -> Result<Vec<Candidate>, DetectionError> {
    let &[batch, rows, depth] = prediction.shape() else {
      return Err(DetectionError::MalformedTensor(format!(
        "YOLOX 输出应为 3 维 (N, boxes, 5+C), 实际形状 {:?}",
        prediction.shape()
      )));
    };
    if self.num_classes == 0 {
      return Err(DetectionError::ShapeMismatch("类别数必须大于 0".to_string()));
    }
    let attrs = self.num_classes + 5;
    if depth < attrs {
      return Err(DetectionError::ShapeMismatch(format!(
        "最后一维至少为 5 + {} = {}, 实际 {}",
        self.num_classes, attrs, depth
      )));
    }
    if batch == 0 || rows == 0 {
      return Ok(Vec::new());
    }
    let data = prediction.data().get(..rows * depth).ok_or_else(|| {
      DetectionError::MalformedTensor(format!(
        "形状 {:?} 与数据长度不一致",
        prediction.shape()
      ))
    })?;

    let (input_h, input_w) = (self.input_shape.0 as f32, self.input_shape.1 as f32);
    let mut boxes = Vec::new();
    let mut scored = Vec::new();
    for row in data.chunks_exact(depth) {
      let mut class_id = 0;
      for (i, &p) in row[5..attrs].iter().enumerate().skip(1) {
        if p > row[5 + class_id] {
          class_id = i;
        }
      }
      let class_conf = row[5 + class_id];
      let score = row[4] * class_conf;
      if score >= self.confidence {
        boxes.push(RawBox {
          xywh: [
            row[0] / input_w,
            row[1] / input_h,
            row[2] / input_w,
            row[3] / input_h,
          ],
          objectness: row[4],
          class_scores: Box::new([class_conf]),
        });
        scored.push((class_id as u32, score));
      }
    }

    if self.letterbox {
      correct_boxes(&mut boxes, image_shape, self.input_shape);
    } else {
      let (image_h, image_w) = (image_shape.0 as f32, image_shape.1 as f32);
      for b in &mut boxes {
        let [x, y, w, h] = b.xywh;
        b.xywh = [
          (x - w / 2.0) * image_w,
          (y - h / 2.0) * image_h,
          w * image_w,
          h * image_h,
        ];
      }
    }

    Ok(
      boxes
        .into_iter()
        .zip(scored)
        .map(|(b, (class_id, score))| Candidate {
          bbox: b.xywh,
          class_id,
          score,
        })
        .collect(),
    )
  }

  /// `image_shape` 为原图 (高, 宽)
  pub fn process(
    &self,
    prediction: &Tensor,
    image_shape: (usize, usize),
  ) -> Result<DetectResult, DetectionError> {
    let candidates = self.candidates(prediction, image_shape)?;
    let params = NmsParams {
      iou_threshold: self.iou_threshold,
      confidence: self.confidence,
      ..NmsParams::default()
    };
    let mut kept = if self.class_agnostic {
      nms_class_agnostic(&candidates, &params)
    } else {
      nms(&candidates, &params)
    };
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

#[cfg(test)]
mod tests {
  use super::*;

  /// 每行 `cx, cy, w, h, obj, p0, p1`，输入 64x64
  fn prediction(rows: &[[f32; 7]]) -> Tensor {
    Tensor::new(vec![1, rows.len(), 7], rows.concat()).unwrap()
  }

  #[test]
  fn scores_by_objectness_times_best_class() {
    let post = YoloxPostprocess::new(2, (64, 64));
    let t = prediction(&[
      [32.0, 32.0, 16.0, 16.0, 0.9, 0.2, 0.9],
      [10.0, 10.0, 8.0, 8.0, 0.9, 0.6, 0.5],
    ]);
    let kept = post.candidates(&t, (64, 64)).unwrap();
    assert_eq!(kept.len(), 1);
    assert_eq!(kept[0].class_id, 1);
    assert!((kept[0].score - 0.81).abs() < 1e-6);
    assert_eq!(kept[0].bbox, [24.0, 24.0, 16.0, 16.0]);
  }

  #[test]
  fn boxes_scale_to_original_image() {
    let post = YoloxPostprocess::new(2, (64, 64));
    let t = prediction(&[[32.0, 32.0, 16.0, 16.0, 1.0, 1.0, 0.0]]);
    let kept = post.candidates(&t, (128, 256)).unwrap();
    assert_eq!(kept[0].bbox, [96.0, 48.0, 64.0, 32.0]);

    let result = post.process(&t, (128, 256)).unwrap();
    let [x0, y0, x1, y1] = result.items[0].bbox;
    assert!((x0 - 0.375).abs() < 1e-6 && (x1 - 0.625).abs() < 1e-6);
    assert!((y0 - 0.375).abs() < 1e-6 && (y1 - 0.625).abs() < 1e-6);
  }

  #[test]
  fn class_aware_and_agnostic_nms() {
    let t = prediction(&[
      [32.0, 32.0, 20.0, 20.0, 1.0, 0.95, 0.0],
      [33.0, 33.0, 20.0, 20.0, 1.0, 0.0, 0.9],
    ]);
    let mut post = YoloxPostprocess::new(2, (64, 64));
    assert_eq!(post.process(&t, (64, 64)).unwrap().len(), 2);

    post.class_agnostic = true;
    let result = post.process(&t, (64, 64)).unwrap();
    assert_eq!(result.len(), 1);
    assert_eq!(result.items[0].class_id, 0);
  }

  #[test]
  fn rejects_short_rows_and_wrong_rank() {
    let post = YoloxPostprocess::new(3, (64, 64));
    let t = prediction(&[[0.0; 7]]);
    assert!(matches!(
      post.process(&t, (64, 64)),
      Err(DetectionError::ShapeMismatch(_))
    ));
    let t = Tensor::zeros(vec![7]);
    assert!(matches!(
      post.process(&t, (64, 64)),
      Err(DetectionError::MalformedTensor(_))
    ));
  }
}
