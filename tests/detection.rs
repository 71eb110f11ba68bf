// 该文件是 Qingfeng （清风） 项目的一部分。
// tests/detection.rs - 检测流水线端到端测试
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

use std::path::PathBuf;

use image::{Rgb, RgbImage};
use qingfeng::{
  config::PipelineConfig,
  detection::{
    AnchorSpec, Candidate, NmsParams, YoloPostprocess, box_diou, filter_top_k, nms,
    to_corner_format,
  },
  pipeline::Engine,
  registry::StageRegistry,
  signal::StopSignal,
  tensor::Tensor,
};

/// 单输出头 (1, 2, 2, 18)：1 类，3 个锚框，仅第一个格子第一个锚框的目标置信度为 0.9
fn single_head() -> Tensor {
  let mut head = Tensor::zeros(vec![1, 2, 2, 18]);
  for (i, v) in head.data_mut().iter_mut().enumerate() {
    if i % 6 == 4 {
      *v = -20.0;
    }
  }
  head.data_mut()[4] = (0.9f32 / 0.1).ln();
  head
}

fn workspace(name: &str) -> PathBuf {
  let dir = std::env::temp_dir().join(format!("qingfeng-{name}-{}", std::process::id()));
  let _ = std::fs::remove_dir_all(&dir);
  std::fs::create_dir_all(&dir).unwrap();
  dir
}

#[test]
fn single_head_decodes_to_one_detection() {
  let anchors: AnchorSpec = "10,14 23,27 37,58".parse().unwrap();
  let post = YoloPostprocess::new(1, (32, 32)).with_anchors(anchors);
  let result = post.process(&[single_head()], (48, 64)).unwrap();

  assert_eq!(result.len(), 1);
  let item = &result.items[0];
  assert_eq!(item.class_id, 0);
  assert!((item.score - 0.9).abs() < 1e-4);
  let [x0, y0, x1, y1] = item.bbox;
  assert!(0.0 <= x0 && x0 <= x1 && x1 <= 1.0);
  assert!(0.0 <= y0 && y0 <= y1 && y1 <= 1.0);
}

#[test]
fn overlapping_same_class_keeps_the_stronger_box() {
  let a = Candidate {
    bbox: [100.0, 100.0, 50.0, 50.0],
    class_id: 3,
    score: 0.9,
  };
  let b = Candidate {
    bbox: [104.0, 102.0, 50.0, 50.0],
    class_id: 3,
    score: 0.8,
  };
  assert!(box_diou(&a.bbox, &b.bbox) > 0.4);

  let mut kept = nms(&[b, a.clone()], &NmsParams::default());
  filter_top_k(&mut kept, 100);
  assert_eq!(kept, vec![a]);
}

#[test]
fn corner_format_stays_in_unit_square() {
  let inputs = [
    [0.0, 0.0, 0.0, 0.0],
    [-50.0, -50.0, 10.0, 10.0],
    [1e6, 1e6, 1e6, 1e6],
    [320.0, 240.0, -40.0, 80.0],
    [f32::MAX, f32::MIN, 1.0, 1.0],
  ];
  for xywh in inputs {
    let [x0, y0, x1, y1] = to_corner_format(xywh, (480, 640));
    assert!((0.0..=1.0).contains(&x0) && x0 <= x1 && x1 <= 1.0, "{xywh:?}");
    assert!((0.0..=1.0).contains(&y0) && y0 <= y1 && y1 <= 1.0, "{xywh:?}");
  }
}

#[test]
fn config_driven_pipeline_detects_and_saves() {
  let dir = workspace("e2e");
  let frames = dir.join("frames");
  std::fs::create_dir_all(&frames).unwrap();
  for i in 0..2 {
    RgbImage::from_pixel(64, 48, Rgb([40, 80, 120]))
      .save(frames.join(format!("{i:03}.png")))
      .unwrap();
  }

  let replay = dir.join("replay.json");
  let recorded = serde_json::json!({ "frames": [[single_head()]] });
  std::fs::write(&replay, recorded.to_string()).unwrap();
  let saved = dir.join("out/last.png");

  let config = PipelineConfig::from_json(
    &serde_json::json!({
      "input": {"name": "images", "options": {"path": frames, "buffer": 1}},
      "preprocessors": [{"name": "transforms", "options": {"tools": "letterbox:32x32"}}],
      "inference": {"name": "replay", "options": {"path": replay, "input_size": "32x32"}},
      "postprocessors": [
        {"name": "yolo", "options": {"classes": 1, "input_size": "32x32", "anchors": "10,14 23,27 37,58"}}
      ],
      "outputs": [{"name": "save_image", "options": {"path": saved}}, {"name": "log"}],
      "grace_period_ms": 0
    })
    .to_string(),
  )
  .unwrap();

  let mut engine = Engine::from_config(&config, &StageRegistry::with_builtins()).unwrap();
  let report = engine.run(&StopSignal::new()).unwrap();
  assert_eq!(report.frames, 2);

  let ctx = engine.context();
  assert_eq!(ctx.total_frame_count, Some(2));
  assert_eq!(ctx.input_frame.shape().hw(), (32, 32));
  let result = ctx.predictions().unwrap().detections().unwrap();
  assert_eq!(result.len(), 1);
  assert!((result.items[0].score - 0.9).abs() < 1e-4);

  let image = image::open(&saved).unwrap().to_rgb8();
  assert_eq!(image.dimensions(), (64, 48));
  std::fs::remove_dir_all(&dir).unwrap();
}
