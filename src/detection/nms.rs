// 该文件是 Qingfeng （清风） 项目的一部分。
// src/detection/nms.rs - DIoU 非极大值抑制
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

use std::{fmt, str::FromStr};

use crate::model::DetectItem;

/// 像素空间左上角 `xywh` 的候选框
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
  pub bbox: [f32; 4],
  pub class_id: u32,
  pub score: f32,
}

pub trait Scored {
  fn score(&self) -> f32;
}

impl Scored for Candidate {
  fn score(&self) -> f32 {
    self.score
  }
}

impl Scored for DetectItem {
  fn score(&self) -> f32 {
    self.score
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NmsMethod {
  /// 丢弃 DIoU 超过阈值的框
  #[default]
  Hard,
  /// 超过阈值的框得分乘以 `1 - iou`
  Linear,
  /// 所有框得分乘以 `exp(-iou² / σ)`
  Gaussian,
}

impl fmt::Display for NmsMethod {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      NmsMethod::Hard => "hard",
      NmsMethod::Linear => "linear",
      NmsMethod::Gaussian => "gaussian",
    })
  }
}

impl FromStr for NmsMethod {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "hard" => Ok(NmsMethod::Hard),
      "linear" => Ok(NmsMethod::Linear),
      "gaussian" | "exp" => Ok(NmsMethod::Gaussian),
      other => Err(format!("未知的 NMS 方法 '{other}', 可选 hard/linear/gaussian")),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NmsParams {
  pub iou_threshold: f32,
  /// 软 NMS 衰减后的最低得分
  pub confidence: f32,
  pub sigma: f32,
  pub method: NmsMethod,
}

impl Default for NmsParams {
  fn default() -> Self {
    Self {
      iou_threshold: 0.4,
      confidence: 0.1,
      sigma: 0.5,
      method: NmsMethod::Hard,
    }
  }
}

/// 两个左上角 `xywh` 框的 DIoU，交集与外接框宽高按像素 +1 计算
pub fn box_diou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
  let [ax, ay, aw, ah] = *a;
  let [bx, by, bw, bh] = *b;

  let inter_w = ((ax + aw).min(bx + bw) - ax.max(bx) + 1.0).max(0.0);
  let inter_h = ((ay + ah).min(by + bh) - ay.max(by) + 1.0).max(0.0);
  let inter = inter_w * inter_h;
  let union = aw * ah + bw * bh - inter;
  let iou = if union > 0.0 { inter / union } else { 0.0 };

  let dx = (ax + aw / 2.0) - (bx + bw / 2.0);
  let dy = (ay + ah / 2.0) - (by + bh / 2.0);
  let center_distance = dx * dx + dy * dy;

  let enclose_w = ((ax + aw).max(bx + bw) - ax.min(bx) + 1.0).max(0.0);
  let enclose_h = ((ay + ah).max(by + bh) - ay.min(by) + 1.0).max(0.0);
  let enclose_diagonal = enclose_w * enclose_w + enclose_h * enclose_h;

  iou - center_distance / (enclose_diagonal + f32::EPSILON)
}

/// 按类别执行贪心 NMS。
///
/// 类别按首次出现的顺序处理，同一类别内按保留顺序输出。
pub fn nms(candidates: &[Candidate], params: &NmsParams) -> Vec<Candidate> {
  let mut classes: Vec<u32> = Vec::new();
  for c in candidates {
    if !classes.contains(&c.class_id) {
      classes.push(c.class_id);
    }
  }

  let mut keep = Vec::new();
  for class_id in classes {
    let pool = candidates
      .iter()
      .filter(|c| c.class_id == class_id)
      .cloned()
      .collect();
    suppress(pool, params, &mut keep);
  }
  keep
}

/// 不区分类别的贪心 NMS，任意两个框都可以相互抑制
pub fn nms_class_agnostic(candidates: &[Candidate], params: &NmsParams) -> Vec<Candidate> {
  let mut keep = Vec::new();
  suppress(candidates.to_vec(), params, &mut keep);
  keep
}

fn suppress(mut pool: Vec<Candidate>, params: &NmsParams, keep: &mut Vec<Candidate>) {
  while !pool.is_empty() {
    // 与 argmax 一致: 相同得分取第一个
    let mut best = 0;
    for (i, c) in pool.iter().enumerate().skip(1) {
      if c.score > pool[best].score {
        best = i;
      }
    }
    pool.swap(0, best);
    let selected = pool.remove(0);

    pool = pool
      .into_iter()
      .filter_map(|mut c| {
        let iou = box_diou(&selected.bbox, &c.bbox);
        match params.method {
          NmsMethod::Hard => (iou <= params.iou_threshold).then_some(c),
          NmsMethod::Linear => {
            if iou > params.iou_threshold {
              c.score *= 1.0 - iou;
            }
            (c.score >= params.confidence).then_some(c)
          }
          NmsMethod::Gaussian => {
            c.score *= (-(iou * iou) / params.sigma).exp();
            (c.score >= params.confidence).then_some(c)
          }
        }
      })
      .collect();
    keep.push(selected);
  }
}

/// 按得分降序保留前 `max_boxes` 个，相同得分保持原有顺序
pub fn filter_top_k<T: Scored>(items: &mut Vec<T>, max_boxes: usize) {
  items.sort_by(|a, b| b.score().total_cmp(&a.score()));
  items.truncate(max_boxes);
}
