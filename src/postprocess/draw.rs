// 该文件是 Qingfeng （清风） 项目的一部分。
// src/postprocess/draw.rs - 检测结果与分割掩码可视化
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

use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::{
  drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut},
  rect::Rect,
};

use super::{PostprocessError, Postprocessor};
use crate::{
  config::{ConfigError, FromStageSpec, StageOptions},
  context::{PipelineContext, Slot},
  frame::Frame,
  model::{DetectResult, LabelMap, Predictions, SegmentationMask},
};

const PALETTE_SIZE: usize = 80;
const LABEL_FONT_SIZE: f32 = 16.0;
const LABEL_TEXT_HEIGHT: i32 = 20;
const LABEL_CHAR_WIDTH: f32 = 9.0; // 每字符平均宽度（粗略估计）
const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);

/// HSV 转 RGB
fn hsv_to_rgb(h: f32, s: f32, v: f32) -> Rgb<u8> {
  let c = v * s;
  let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
  let m = v - c;

  let (r, g, b) = match h {
    h if h < 60.0 => (c, x, 0.0),
    h if h < 120.0 => (x, c, 0.0),
    h if h < 180.0 => (0.0, c, x),
    h if h < 240.0 => (0.0, x, c),
    h if h < 300.0 => (x, 0.0, c),
    _ => (c, 0.0, x),
  };

  Rgb([
    ((r + m) * 255.0) as u8,
    ((g + m) * 255.0) as u8,
    ((b + m) * 255.0) as u8,
  ])
}

/// 类别编号对应的颜色，色相均匀分布
pub fn palette(class_id: u32) -> Rgb<u8> {
  let i = class_id as usize % PALETTE_SIZE;
  hsv_to_rgb(i as f32 / PALETTE_SIZE as f32 * 360.0, 0.8, 0.9)
}

/// `draw` 阶段：在原始帧的副本上绘制 `predictions`，写入 `output_frame`
pub struct DrawPostprocessor {
  labels: LabelMap,
  font: Option<FontVec>,
  thickness: u32,
  /// 掩码叠加的不透明度
  alpha: f32,
}

impl Default for DrawPostprocessor {
  fn default() -> Self {
    Self {
      labels: LabelMap::coco(),
      font: None,
      thickness: 2,
      alpha: 0.5,
    }
  }
}

impl DrawPostprocessor {
  pub fn with_font(mut self, font: FontVec) -> Self {
    self.font = Some(font);
    self
  }

  pub fn with_labels(mut self, labels: LabelMap) -> Self {
    self.labels = labels;
    self
  }

  pub fn draw_detections(&self, image: &mut RgbImage, result: &DetectResult) {
    let (w, h) = (image.width() as f32, image.height() as f32);
    for item in result.iter() {
      let color = palette(item.class_id);
      let x_min = (item.bbox[0] * w).floor() as i32;
      let y_min = (item.bbox[1] * h).floor() as i32;
      let x_max = (item.bbox[2] * w).ceil() as i32;
      let y_max = (item.bbox[3] * h).ceil() as i32;
      if x_max <= x_min || y_max <= y_min {
        continue;
      }

      for t in 0..self.thickness as i32 {
        let (bw, bh) = (x_max - x_min - 2 * t, y_max - y_min - 2 * t);
        if bw <= 0 || bh <= 0 {
          break;
        }
        let rect = Rect::at(x_min + t, y_min + t).of_size(bw as u32, bh as u32);
        draw_hollow_rect_mut(image, rect, color);
      }

      let Some(font) = &self.font else {
        continue;
      };
      let label = format!("{} {:.2}", self.labels.name(item.class_id), item.score);
      let text_width = (label.chars().count() as f32 * LABEL_CHAR_WIDTH) as i32;
      let label_x = x_min.max(0);
      let label_y = (y_min - LABEL_TEXT_HEIGHT).max(0);
      let label_width = text_width.min(image.width() as i32 - label_x);
      if label_width > 0 {
        let rect = Rect::at(label_x, label_y).of_size(label_width as u32, LABEL_TEXT_HEIGHT as u32);
        draw_filled_rect_mut(image, rect, color);
        draw_text_mut(
          image,
          TEXT_COLOR,
          label_x,
          label_y + 2,
          PxScale::from(LABEL_FONT_SIZE),
          font,
          &label,
        );
      }
    }
  }

  /// 掩码按最近邻缩放到图像尺寸后叠加，背景不着色
  pub fn draw_mask(&self, image: &mut RgbImage, mask: &SegmentationMask) {
    let (w, h) = (image.width() as usize, image.height() as usize);
    if mask.width() == 0 || mask.height() == 0 {
      return;
    }
    for (x, y, px) in image.enumerate_pixels_mut() {
      let my = y as usize * mask.height() / h;
      let mx = x as usize * mask.width() / w;
      let label = mask.get(my, mx);
      if label == 0 {
        continue;
      }
      let color = palette(label as u32);
      for c in 0..3 {
        let blended = px[c] as f32 * (1.0 - self.alpha) + color[c] as f32 * self.alpha;
        px[c] = blended.round().clamp(0.0, 255.0) as u8;
      }
    }
  }
}

impl FromStageSpec for DrawPostprocessor {
  const SCHEME: &'static str = "draw";

  fn from_options(options: &mut StageOptions) -> Result<Self, ConfigError> {
    let mut draw = DrawPostprocessor::default();
    draw.thickness = options.take_or("thickness", draw.thickness)?;
    draw.alpha = options.take_or::<f32>("alpha", draw.alpha)?.clamp(0.0, 1.0);

    if let Some(labels) = options.take_raw("labels") {
      draw.labels = LabelMap::from_option(&labels).map_err(|e| ConfigError::InvalidOption {
        stage: options.stage().to_string(),
        key: "labels".to_string(),
        value: labels.clone(),
        reason: e.to_string(),
      })?;
    }

    if let Some(path) = options.take_raw("font") {
      let invalid = |reason: String| ConfigError::InvalidOption {
        stage: options.stage().to_string(),
        key: "font".to_string(),
        value: path.clone(),
        reason,
      };
      let bytes = std::fs::read(&path).map_err(|e| invalid(e.to_string()))?;
      let font = FontVec::try_from_vec(bytes).map_err(|e| invalid(e.to_string()))?;
      draw.font = Some(font);
    }

    Ok(draw)
  }
}

impl Postprocessor for DrawPostprocessor {
  fn name(&self) -> &str {
    Self::SCHEME
  }

  fn requires(&self) -> &'static [Slot] {
    &[Slot::Predictions]
  }

  fn provides(&self) -> &'static [Slot] {
    &[Slot::OutputFrame]
  }

  fn run(&mut self, ctx: &mut PipelineContext) -> Result<(), PostprocessError> {
    let mut image = ctx.orig_frame.to_rgb_image()?;
    match ctx.predictions()? {
      Predictions::Detections(result) => self.draw_detections(&mut image, result),
      Predictions::Mask(mask) => self.draw_mask(&mut image, mask),
    }
    ctx.output_frame = Some(Frame::from(image));
    Ok(())
  }
}
