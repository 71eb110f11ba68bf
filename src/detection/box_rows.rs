// 该文件是 Qingfeng （清风） 项目的一部分。
// src/detection/box_rows.rs - 检测框行输出后处理
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

use super::{Candidate, DetectionError, NmsParams, nms, to_corner_format};
use crate::{
  model::{DetectItem, DetectResult},
  tensor::Tensor,
};

/// 已解码检测框的后处理，输出的最后两维为 `(boxes, K)`，`K >= 6`。
///
/// 每行前 6 列为归一化的 `y0, x0, y1, x1`、得分与类别；最后一列为 0 的行是填充。
/// 只处理第一组框。
#[derive(Debug, Clone, PartialEq)]
pub struct BoxRowsPostprocess {
  /// 模型输入 (高, 宽)，NMS 在该像素空间计算
  pub input_shape: (usize, usize),
  /// 保留得分严格大于该值的框
  pub threshold: f32,
  pub iou_threshold: f32,
  /// 丢弃的背景类别
  pub background: Option<u32>,
}

const MIN_COLUMNS: usize = 6;

impl BoxRowsPostprocess {
  pub fn new(input_shape: (usize, usize)) -> Self {
    Self {
      input_shape,
      threshold: 0.5,
      iou_threshold: 0.1,
      background: Some(0),
    }
  }

  /// 过滤后的候选框，模型输入像素空间左上角 `xywh`
  pub fn candidates(&self, output: &Tensor) -> Result<Vec<Candidate>, DetectionError> {
    let &[.., rows, columns] = output.shape() else {
      return Err(DetectionError::MalformedTensor(format!(
        "检测框输出至少为 2 维 (boxes, K), 实际形状 {:?}",
        output.shape()
      )));
    };
    if columns < MIN_COLUMNS {
      return Err(DetectionError::ShapeMismatch(format!(
        "每个检测框至少 {MIN_COLUMNS} 列, 实际 {columns}"
      )));
    }
    if output.is_empty() {
      return Ok(Vec::new());
    }
    let data = output.data().get(..rows * columns).ok_or_else(|| {
      DetectionError::MalformedTensor(format!("形状 {:?} 与数据长度不一致", output.shape()))
    })?;

    let (input_h, input_w) = (self.input_shape.0 as f32, self.input_shape.1 as f32);
    let candidates = data
      .chunks_exact(columns)
      .filter(|row| row[columns - 1] != 0.0 && row[4] > self.threshold)
      .filter_map(|row| {
        let class_id = row[5] as u32;
        if self.background == Some(class_id) {
          return None;
        }
        let [y0, x0, y1, x1] = [row[0], row[1], row[2], row[3]];
        Some(Candidate {
          bbox: [
            x0 * input_w,
            y0 * input_h,
            (x1 - x0) * input_w,
            (y1 - y0) * input_h,
          ],
          class_id,
          score: row[4],
        })
      })
      .collect();
    Ok(candidates)
  }

  /// 输出坐标按模型输入归一化
  pub fn process(&self, output: &Tensor) -> Result<DetectResult, DetectionError> {
    let candidates = self.candidates(output)?;
    let params = NmsParams {
      iou_threshold: self.iou_threshold,
      ..NmsParams::default()
    };

    Ok(DetectResult::from(
      nms(&candidates, &params)
        .into_iter()
        .map(|c| DetectItem {
          class_id: c.class_id,
          score: c.score,
          bbox: to_corner_format(c.bbox, self.input_shape),
        })
        .collect::<Vec<_>>(),
    ))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  /// 每行 `y0, x0, y1, x1, score, class, valid`
  fn output(rows: &[[f32; 7]]) -> Tensor {
    Tensor::new(vec![1, 1, rows.len(), 7], rows.concat()).unwrap()
  }

  #[test]
  fn drops_padding_low_scores_and_background() {
    let post = BoxRowsPostprocess::new((100, 200));
    let t = output(&[
      [0.1, 0.2, 0.5, 0.6, 0.9, 3.0, 1.0],
      [0.1, 0.2, 0.5, 0.6, 0.9, 3.0, 0.0],
      [0.1, 0.2, 0.5, 0.6, 0.5, 3.0, 1.0],
      [0.1, 0.2, 0.5, 0.6, 0.9, 0.0, 1.0],
    ]);
    let kept = post.candidates(&t).unwrap();
    assert_eq!(kept.len(), 1);
    assert_eq!(kept[0].class_id, 3);
    let [x, y, w, h] = kept[0].bbox;
    assert!((x - 40.0).abs() < 1e-4 && (y - 10.0).abs() < 1e-4);
    assert!((w - 80.0).abs() < 1e-4 && (h - 40.0).abs() < 1e-4);

    let result = post.process(&t).unwrap();
    let [x0, y0, x1, y1] = result.items[0].bbox;
    assert!((x0 - 0.2).abs() < 1e-4 && (y0 - 0.1).abs() < 1e-4);
    assert!((x1 - 0.6).abs() < 1e-4 && (y1 - 0.5).abs() < 1e-4);
  }

  #[test]
  fn overlapping_rows_are_suppressed_per_class() {
    let post = BoxRowsPostprocess::new((100, 100));
    let t = output(&[
      [0.1, 0.1, 0.5, 0.5, 0.8, 1.0, 1.0],
      [0.12, 0.12, 0.52, 0.52, 0.9, 1.0, 1.0],
      [0.12, 0.12, 0.52, 0.52, 0.7, 2.0, 1.0],
    ]);
    let result = post.process(&t).unwrap();
    let scores: Vec<f32> = result.items.iter().map(|d| d.score).collect();
    assert_eq!(scores, vec![0.9, 0.7]);
  }

  #[test]
  fn keeps_background_when_disabled() {
    let mut post = BoxRowsPostprocess::new((100, 100));
    post.background = None;
    let t = output(&[[0.1, 0.1, 0.5, 0.5, 0.9, 0.0, 1.0]]);
    assert_eq!(post.process(&t).unwrap().len(), 1);

    let narrow = Tensor::zeros(vec![1, 2, 5]);
    assert!(matches!(
      post.process(&narrow),
      Err(DetectionError::ShapeMismatch(_))
    ));
  }
}
