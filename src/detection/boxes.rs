// 该文件是 Qingfeng （清风） 项目的一部分。
// src/detection/boxes.rs - 坐标还原与格式转换
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

use super::RawBox;

/// 等比缩放并居中填充的几何参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
  /// 缩放后图像的 (高, 宽)
  pub scaled: (usize, usize),
  /// 归一化偏移 (x, y)
  pub offset: (f32, f32),
  /// 归一化坐标的放大系数 (x, y)
  pub scale: (f32, f32),
}

impl Letterbox {
  /// `image_shape` 与 `model_shape` 均为 (高, 宽)
  pub fn new(image_shape: (usize, usize), model_shape: (usize, usize)) -> Self {
    let (image_h, image_w) = (image_shape.0 as f32, image_shape.1 as f32);
    let (model_h, model_w) = (model_shape.0 as f32, model_shape.1 as f32);

    let ratio = (model_h / image_h).min(model_w / image_w);
    let new_h = (image_h * ratio).round_ties_even();
    let new_w = (image_w * ratio).round_ties_even();

    Self {
      scaled: (new_h as usize, new_w as usize),
      offset: (
        (model_w - new_w) / 2.0 / model_w,
        (model_h - new_h) / 2.0 / model_h,
      ),
      scale: (model_w / new_w, model_h / new_h),
    }
  }

  /// 缩放后的图像在模型输入中的左上角像素位置 (x, y)
  pub fn paste_origin(&self, model_shape: (usize, usize)) -> (usize, usize) {
    (
      model_shape.1.saturating_sub(self.scaled.1) / 2,
      model_shape.0.saturating_sub(self.scaled.0) / 2,
    )
  }
}

/// 将模型空间归一化中心点 `xywh` 原地还原为原图像素空间左上角 `xywh`
pub fn correct_boxes(boxes: &mut [RawBox], image_shape: (usize, usize), model_shape: (usize, usize)) {
  let lb = Letterbox::new(image_shape, model_shape);
  let (image_h, image_w) = (image_shape.0 as f32, image_shape.1 as f32);

  for b in boxes {
    let [x, y, w, h] = b.xywh;
    let w = w * lb.scale.0;
    let h = h * lb.scale.1;
    let x = (x - lb.offset.0) * lb.scale.0 - w / 2.0;
    let y = (y - lb.offset.1) * lb.scale.1 - h / 2.0;
    b.xywh = [x * image_w, y * image_h, w * image_w, h * image_h];
  }
}

/// [`correct_boxes`] 的逆变换
pub fn letterbox_boxes(
  boxes: &mut [RawBox],
  image_shape: (usize, usize),
  model_shape: (usize, usize),
) {
  let lb = Letterbox::new(image_shape, model_shape);
  let (image_h, image_w) = (image_shape.0 as f32, image_shape.1 as f32);

  for b in boxes {
    let [x, y, w, h] = b.xywh;
    let (x, y, w, h) = (x / image_w, y / image_h, w / image_w, h / image_h);
    let (x, y) = (x + w / 2.0, y + h / 2.0);
    b.xywh = [
      x / lb.scale.0 + lb.offset.0,
      y / lb.scale.1 + lb.offset.1,
      w / lb.scale.0,
      h / lb.scale.1,
    ];
  }
}

/// 像素空间左上角 `xywh` 转为归一化 `xyxy`。
///
/// 每个边界先不小于前一个边界，再截断到 `[0, 1]`；NaN 落到 0。
pub fn to_corner_format(xywh: [f32; 4], image_shape: (usize, usize)) -> [f32; 4] {
  let (height, width) = (image_shape.0 as f32, image_shape.1 as f32);
  let [x, y, w, h] = xywh;

  // f32::max 在一侧为 NaN 时返回另一侧
  let x_min = (x / width).max(0.0).min(1.0);
  let y_min = (y / height).max(0.0).min(1.0);
  let x_max = ((x + w) / width).max(x_min).min(1.0);
  let y_max = ((y + h) / height).max(y_min).min(1.0);

  [x_min, y_min, x_max, y_max]
}

#[cfg(test)]
mod tests {
  use super::*;

  fn raw(xywh: [f32; 4]) -> RawBox {
    RawBox {
      xywh,
      objectness: 1.0,
      class_scores: Box::new([]),
    }
  }

  fn assert_box_close(a: [f32; 4], b: [f32; 4]) {
    for (x, y) in a.iter().zip(b.iter()) {
      assert!((x - y).abs() < 1e-3, "{a:?} != {b:?}");
    }
  }

  #[test]
  fn square_image_maps_directly() {
    let mut boxes = [raw([0.5, 0.5, 0.25, 0.5])];
    correct_boxes(&mut boxes, (200, 200), (416, 416));
    assert_box_close(boxes[0].xywh, [75.0, 50.0, 50.0, 100.0]);
  }

  #[test]
  fn letterbox_padding_is_removed() {
    // 宽图 (高 100, 宽 200) 放入 100x100: 缩放为 50x100, 上下各填充 25
    let lb = Letterbox::new((100, 200), (100, 100));
    assert_eq!(lb.scaled, (50, 100));
    assert_eq!(lb.paste_origin((100, 100)), (0, 25));

    let mut boxes = [raw([0.5, 0.5, 0.2, 0.1])];
    correct_boxes(&mut boxes, (100, 200), (100, 100));
    // 高度 0.1 * 2 = 0.2 (原图归一化) -> 20 像素
    assert_box_close(boxes[0].xywh, [80.0, 40.0, 40.0, 20.0]);
  }

  #[test]
  fn letterbox_is_the_inverse() {
    let original = [13.0, 27.0, 40.0, 31.0];
    let mut boxes = [raw(original)];
    letterbox_boxes(&mut boxes, (480, 640), (416, 416));
    correct_boxes(&mut boxes, (480, 640), (416, 416));
    assert_box_close(boxes[0].xywh, original);
  }

  #[test]
  fn corner_format_is_clamped_and_ordered() {
    let image = (100, 200);
    assert_eq!(
      to_corner_format([20.0, 10.0, 40.0, 30.0], image),
      [0.1, 0.1, 0.3, 0.4]
    );

    let corners = to_corner_format([-50.0, 90.0, -10.0, 500.0], image);
    assert_eq!(corners, [0.0, 0.9, 0.0, 1.0]);

    for xywh in [
      [f32::NAN, f32::INFINITY, f32::NEG_INFINITY, f32::NAN],
      [f32::MAX, f32::MIN, f32::MAX, f32::MAX],
    ] {
      let [x0, y0, x1, y1] = to_corner_format(xywh, image);
      for v in [x0, y0, x1, y1] {
        assert!((0.0..=1.0).contains(&v));
      }
      assert!(x0 <= x1 && y0 <= y1);
    }
  }
}
