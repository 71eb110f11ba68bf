// 该文件是 Qingfeng （清风） 项目的一部分。
// src/detection.rs - 检测后处理数学库
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

//! 锚框解码、坐标还原、DIoU NMS 与 Top-K 筛选。
//!
//! 支持三种模型输出：带锚框的 YOLOv3/v4 输出头 ([`YoloPostprocess`])、
//! 无锚框的 YOLOX 输出 ([`YoloxPostprocess`]) 以及已解码的检测框行
//! ([`BoxRowsPostprocess`])。
//!
//! 本模块中的函数均为纯函数。框的坐标约定：
//! - 解码输出为模型输入空间内归一化的中心点 `xywh`；
//! - [`correct_boxes`] 之后为原图像素空间内左上角 `xywh`；
//! - [`to_corner_format`] 之后为原图归一化的 `xyxy`。

use thiserror::Error;

mod box_rows;
mod boxes;
mod decode;
mod nms;
mod yolo;
mod yolox;

pub use self::box_rows::BoxRowsPostprocess;
pub use self::boxes::{Letterbox, correct_boxes, letterbox_boxes, to_corner_format};
pub use self::decode::{AnchorSpec, DEFAULT_ANCHORS, RawBox, decode, decode_head, sigmoid};
pub use self::nms::{
  Candidate, NmsMethod, NmsParams, Scored, box_diou, filter_top_k, nms, nms_class_agnostic,
};
pub use self::yolo::{YoloPostprocess, score_candidates};
pub use self::yolox::YoloxPostprocess;

/// 检测后处理错误。
///
/// `ShapeMismatch`、`AnchorMismatch` 与 `UnsupportedHeadCount` 都表示模型输出与
/// 配置的形状不符，可用 [`DetectionError::is_shape_mismatch`] 统一判断。
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DetectionError {
  #[error("张量形状不匹配: {0}")]
  ShapeMismatch(String),
  #[error("输出头数量 {heads} 与锚框数量 {anchors} 不匹配 (每个输出头 3 个锚框)")]
  AnchorMismatch { heads: usize, anchors: usize },
  #[error("不支持的输出头数量: {0}")]
  UnsupportedHeadCount(usize),
  #[error("模型输出格式错误: {0}")]
  MalformedTensor(String),
}

impl DetectionError {
  pub fn is_shape_mismatch(&self) -> bool {
    matches!(
      self,
      DetectionError::ShapeMismatch(_)
        | DetectionError::AnchorMismatch { .. }
        | DetectionError::UnsupportedHeadCount(_)
    )
  }
}
