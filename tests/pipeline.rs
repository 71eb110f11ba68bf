// 该文件是 Qingfeng （清风） 项目的一部分。
// tests/pipeline.rs - 引擎集成测试
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

use std::{
  sync::{Arc, Mutex},
  thread,
  time::Duration,
};

use qingfeng::{
  config::{ConfigError, FromStageSpec, PipelineConfig, StageKind, StageSpec},
  context::{PipelineContext, Slot},
  detection::DetectionError,
  frame::{Frame, FrameShape},
  inference::{InferenceError, Predictor, ReplayPredictor},
  input::{
    CaptureDevice, FiniteSource, FiniteSourceConfig, Grab, Input, InputError, LiveSource,
    LiveSourceConfig, MemoryDevice,
  },
  output::{LogOutput, Output, OutputError},
  pipeline::{Engine, PipelineError},
  postprocess::{PostprocessError, Postprocessor, YoloPostprocessor},
  preprocess::{PreprocessError, Preprocessor},
  registry::StageRegistry,
  signal::StopSignal,
  tensor::Tensor,
};

/// 记录经过的帧编号，并在停止时打标记
#[derive(Clone, Default)]
struct Recorder {
  seen: Arc<Mutex<Vec<String>>>,
  stopped: Arc<Mutex<bool>>,
  requires: &'static [Slot],
}

impl Output for Recorder {
  fn name(&self) -> &str {
    "recorder"
  }

  fn requires(&self) -> &'static [Slot] {
    self.requires
  }

  fn run(&mut self, ctx: &PipelineContext) -> Result<(), OutputError> {
    self.seen.lock().unwrap().push(ctx.frame_id.clone());
    Ok(())
  }

  fn stop(&mut self) {
    *self.stopped.lock().unwrap() = true;
  }
}

struct Failing;

impl Predictor for Failing {
  fn name(&self) -> &str {
    "failing"
  }

  fn predict(&mut self, _input: &Frame) -> Result<Vec<Tensor>, InferenceError> {
    Err(InferenceError::Prediction("npu timeout".to_string()))
  }
}

fn frames(n: usize) -> Vec<Frame> {
  (0..n)
    .map(|i| Frame::filled(FrameShape::rgb(4, 4), i as u8))
    .collect()
}

fn finite(n: usize) -> FiniteSource<MemoryDevice> {
  FiniteSource::new(
    "memory",
    MemoryDevice::new("mem", frames(n)),
    FiniteSourceConfig::default(),
  )
}

fn empty_outputs() -> ReplayPredictor {
  ReplayPredictor::new(vec![vec![]])
}

#[test]
fn finite_source_runs_every_frame_once_in_order() {
  let recorder = Recorder::default();
  let mut engine = Engine::builder()
    .set_input(finite(5))
    .set_inference(empty_outputs())
    .add_output(recorder.clone())
    .grace_period(Duration::ZERO)
    .build()
    .unwrap();

  let report = engine.run(&StopSignal::new()).unwrap();
  assert_eq!(report.frames, 5);
  assert!(!report.interrupted);
  assert_eq!(
    *recorder.seen.lock().unwrap(),
    vec!["mem_0", "mem_1", "mem_2", "mem_3", "mem_4"]
  );
  assert!(*recorder.stopped.lock().unwrap());
}

#[test]
fn inference_failure_is_wrapped_after_cleanup() {
  let recorder = Recorder::default();
  let mut engine = Engine::builder()
    .set_input(finite(3))
    .set_inference(Failing)
    .add_output(recorder.clone())
    .grace_period(Duration::ZERO)
    .build()
    .unwrap();

  match engine.run(&StopSignal::new()) {
    Err(PipelineError::Inference { stage, source }) => {
      assert_eq!(stage, "failing");
      assert!(matches!(source, InferenceError::Prediction(_)));
    }
    other => panic!("unexpected: {other:?}"),
  }
  assert!(recorder.seen.lock().unwrap().is_empty());
  assert!(*recorder.stopped.lock().unwrap());
}

struct BrokenTransform;

impl Preprocessor for BrokenTransform {
  fn name(&self) -> &str {
    "broken_transform"
  }

  fn run(&mut self, _ctx: &mut PipelineContext) -> Result<(), PreprocessError> {
    Err(PreprocessError::Transform {
      transform: "resize".to_string(),
      reason: "目标尺寸为 0".to_string(),
    })
  }
}

/// 写入失败的输出，同样记录是否被停止
#[derive(Clone, Default)]
struct FullDisk {
  stopped: Arc<Mutex<bool>>,
}

impl Output for FullDisk {
  fn name(&self) -> &str {
    "full_disk"
  }

  fn run(&mut self, _ctx: &PipelineContext) -> Result<(), OutputError> {
    Err(OutputError::Io(std::io::Error::other("no space left on device")))
  }

  fn stop(&mut self) {
    *self.stopped.lock().unwrap() = true;
  }
}

/// 采集出错的摄像头
#[derive(Clone, Default)]
struct UnpluggedCamera {
  stopped: Arc<Mutex<bool>>,
}

impl Input for UnpluggedCamera {
  fn name(&self) -> &str {
    "unplugged"
  }

  fn run(&mut self, _signal: &StopSignal) -> Result<(), InputError> {
    Ok(())
  }

  fn load_data(&mut self, _ctx: &mut PipelineContext) -> Result<(), InputError> {
    Err(InputError::Acquisition("USB 设备已断开".to_string()))
  }

  fn stop(&mut self) {
    *self.stopped.lock().unwrap() = true;
  }

  fn stopped(&self) -> bool {
    *self.stopped.lock().unwrap()
  }
}

#[test]
fn preprocessing_failure_is_wrapped_after_cleanup() {
  let recorder = Recorder::default();
  let mut engine = Engine::builder()
    .set_input(finite(3))
    .add_preprocessor(BrokenTransform)
    .set_inference(empty_outputs())
    .add_output(recorder.clone())
    .grace_period(Duration::ZERO)
    .build()
    .unwrap();

  match engine.run(&StopSignal::new()) {
    Err(PipelineError::Preprocessing { stage, source }) => {
      assert_eq!(stage, "broken_transform");
      assert!(matches!(source, PreprocessError::Transform { .. }));
    }
    other => panic!("unexpected: {other:?}"),
  }
  assert!(recorder.seen.lock().unwrap().is_empty());
  assert!(*recorder.stopped.lock().unwrap());
}

#[test]
fn postprocessing_failure_is_wrapped_after_cleanup() {
  // 没有输出头时 yolo 解码失败
  let yolo = YoloPostprocessor::from_spec(&StageSpec::new("yolo").with("classes", 1)).unwrap();
  let recorder = Recorder::default();
  let mut engine = Engine::builder()
    .set_input(finite(3))
    .set_inference(empty_outputs())
    .add_postprocessor(yolo)
    .add_output(recorder.clone())
    .grace_period(Duration::ZERO)
    .build()
    .unwrap();

  match engine.run(&StopSignal::new()) {
    Err(PipelineError::Postprocessing { stage, source }) => {
      assert_eq!(stage, "yolo");
      assert!(matches!(
        source,
        PostprocessError::Detection(DetectionError::UnsupportedHeadCount(0))
      ));
    }
    other => panic!("unexpected: {other:?}"),
  }
  assert!(recorder.seen.lock().unwrap().is_empty());
  assert!(*recorder.stopped.lock().unwrap());
}

#[test]
fn output_failure_stops_every_output() {
  let recorder = Recorder::default();
  let full_disk = FullDisk::default();
  let mut engine = Engine::builder()
    .set_input(finite(3))
    .set_inference(empty_outputs())
    .add_output(recorder.clone())
    .add_output(full_disk.clone())
    .grace_period(Duration::ZERO)
    .build()
    .unwrap();

  match engine.run(&StopSignal::new()) {
    Err(PipelineError::Output { stage, source }) => {
      assert_eq!(stage, "full_disk");
      assert!(matches!(source, OutputError::Io(_)));
    }
    other => panic!("unexpected: {other:?}"),
  }
  // 前面的输出已处理第一帧
  assert_eq!(*recorder.seen.lock().unwrap(), vec!["mem_0"]);
  assert!(*recorder.stopped.lock().unwrap());
  assert!(*full_disk.stopped.lock().unwrap());
}

#[test]
fn acquisition_error_aborts_with_cleanup() {
  let camera = UnpluggedCamera::default();
  let recorder = Recorder::default();
  let mut engine = Engine::builder()
    .set_input(camera.clone())
    .set_inference(empty_outputs())
    .add_output(recorder.clone())
    .grace_period(Duration::ZERO)
    .build()
    .unwrap();

  assert!(matches!(
    engine.run(&StopSignal::new()),
    Err(PipelineError::Input(InputError::Acquisition(_)))
  ));
  assert!(camera.stopped());
  assert!(recorder.seen.lock().unwrap().is_empty());
  assert!(*recorder.stopped.lock().unwrap());
}

#[test]
fn output_limit_ends_the_loop() {
  let mut engine = Engine::builder()
    .set_input(finite(10))
    .set_inference(empty_outputs())
    .add_output(LogOutput::new(Some(3)))
    .grace_period(Duration::ZERO)
    .build()
    .unwrap();
  assert_eq!(engine.run(&StopSignal::new()).unwrap().frames, 3);
}

#[test]
fn raised_signal_interrupts_before_first_frame() {
  let signal = StopSignal::new();
  signal.raise();
  let mut engine = Engine::builder()
    .set_input(finite(3))
    .set_inference(empty_outputs())
    .add_output(Recorder::default())
    .grace_period(Duration::ZERO)
    .build()
    .unwrap();
  let report = engine.run(&signal).unwrap();
  assert_eq!(report.frames, 0);
  assert!(report.interrupted);
}

#[test]
fn build_checks_required_stages_and_slots() {
  assert!(matches!(
    Engine::builder()
      .set_inference(empty_outputs())
      .add_output(Recorder::default())
      .build(),
    Err(ConfigError::MissingStage(StageKind::Input))
  ));
  assert!(matches!(
    Engine::builder()
      .set_input(finite(1))
      .set_inference(empty_outputs())
      .build(),
    Err(ConfigError::MissingStage(StageKind::Output))
  ));

  // 输出需要 predictions，但没有后处理阶段提供
  let needs_predictions = Recorder {
    requires: &[Slot::Predictions],
    ..Recorder::default()
  };
  match Engine::builder()
    .set_input(finite(1))
    .set_inference(empty_outputs())
    .add_output(needs_predictions.clone())
    .build()
  {
    Err(ConfigError::UnsatisfiedSlot { stage, slot }) => {
      assert_eq!(stage, "recorder");
      assert_eq!(slot, Slot::Predictions);
    }
    Err(other) => panic!("unexpected: {other:?}"),
    Ok(_) => panic!("slot check passed"),
  }

  let yolo = YoloPostprocessor::from_spec(&StageSpec::new("yolo").with("classes", 1)).unwrap();
  assert_eq!(yolo.provides(), &[Slot::Predictions]);
  assert!(
    Engine::builder()
      .set_input(finite(1))
      .set_inference(empty_outputs())
      .add_postprocessor(yolo)
      .add_output(needs_predictions)
      .build()
      .is_ok()
  );
}

#[test]
fn config_rejects_unknown_and_unsupported_stages() {
  let config = PipelineConfig::from_json(
    r#"{
      "input": {"name": "image", "options": {"path": "/nonexistent.png"}},
      "inference": {"name": "onnx", "options": {"path": "model.onnx"}},
      "outputs": [{"name": "log"}]
    }"#,
  )
  .unwrap();
  let registry = StageRegistry::with_builtins();
  assert!(matches!(
    Engine::from_config(&config, &registry),
    Err(PipelineError::Config(ConfigError::UnsupportedStage {
      kind: StageKind::Inference,
      ..
    }))
  ));

  let config = PipelineConfig {
    input: Some(StageSpec::new("rtsp")),
    ..config
  };
  assert!(matches!(
    Engine::from_config(&config, &registry),
    Err(PipelineError::Config(ConfigError::UnknownStage {
      kind: StageKind::Input,
      ..
    }))
  ));

  let config = PipelineConfig {
    input: Some(StageSpec::new("images").with("path", "/nonexistent")),
    inference: Some(StageSpec::new("replay").with("path", "/nonexistent.json")),
    ..PipelineConfig::default()
  };
  assert!(matches!(
    Engine::from_config(&config, &registry),
    Err(PipelineError::Input(InputError::DeviceOpen { .. }))
  ));
}

/// 每次采集间隔 1 毫秒
struct Ticker(u8);

impl CaptureDevice for Ticker {
  fn describe(&self) -> String {
    "ticker".to_string()
  }

  fn grab(&mut self) -> Result<Grab, InputError> {
    thread::sleep(Duration::from_millis(1));
    self.0 = self.0.wrapping_add(1);
    Ok(Grab::Frame(Frame::filled(FrameShape::rgb(2, 2), self.0)))
  }
}

#[test]
fn slow_consumer_collapses_live_window() {
  let signal = StopSignal::new();
  let config = LiveSourceConfig {
    window: 16.0,
    max_window: 16.0,
    poll_interval: Duration::from_millis(10),
    retry_interval: Duration::from_millis(10),
  };
  let mut source = LiveSource::new("ticker", Ticker(0), config);
  source.run(&signal).unwrap();

  let mut ctx = PipelineContext::new();
  for _ in 0..3 {
    source.load_data(&mut ctx).unwrap();
    thread::sleep(Duration::from_millis(150));
  }

  let stats = source.stats();
  assert_eq!(stats.window_size, 1.0);
  assert!(stats.dropped > stats.admitted);
  source.stop();
}
