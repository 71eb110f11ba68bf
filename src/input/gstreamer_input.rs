// 该文件是 Qingfeng （清风） 项目的一部分。
// src/input/gstreamer_input.rs - GStreamer 采集设备
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

//! # GStreamer 输入
//!
//! 通过 `gst` 阶段读取摄像头或视频文件：
//!
//! - `gst://camera/dev/video0?resolution=640x480&fps=15`：实时源，经拥塞窗口节流；
//! - `gst://file/data/clip.mp4`：有限源，逐帧交付。
//!
//! 使用前需要安装 GStreamer 开发库
//! （Ubuntu/Debian: `libgstreamer1.0-dev libgstreamer-plugins-base1.0-dev`），
//! 并启用 `gstreamer_input` 特性。

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use tracing::{info, warn};

use super::{
  CaptureDevice, FiniteSource, FiniteSourceConfig, Grab, Input, InputError, LiveSource,
  LiveSourceConfig,
};
use crate::{
  config::{ConfigError, FromStageSpec, StageOptions},
  frame::{Frame, FrameShape, Resolution},
};

const PULL_TIMEOUT_MS: u64 = 100;

#[derive(Debug, Clone, PartialEq)]
pub enum GStreamerInputBuilderItem {
  FileSource(String),
  CameraSource {
    camera: String,
    io_mode: Option<u32>,
    format: String,
    width: usize,
    height: usize,
    fps: u32,
  },
  TargetFormat {
    format: String,
  },
  AspectRatio {
    ratio: (usize, usize),
  },
  VideoFlip {
    method: u32,
    direction: u32,
  },
}

/// 按 gst-launch 语法加引号
fn quote(value: &str) -> String {
  format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

impl GStreamerInputBuilderItem {
  fn to_pipeline(&self) -> String {
    match self {
      GStreamerInputBuilderItem::FileSource(path) => {
        format!("filesrc location={} ! decodebin", quote(path))
      }
      GStreamerInputBuilderItem::CameraSource {
        camera,
        io_mode,
        format,
        width,
        height,
        fps,
      } => {
        let io_mode = io_mode
          .map(|mode| format!(" io-mode={}", mode))
          .unwrap_or_default();
        format!(
          "v4l2src device={}{} ! video/x-raw,format={},width={},height={},framerate={}/1",
          camera, io_mode, format, width, height, fps
        )
      }
      GStreamerInputBuilderItem::TargetFormat { format } => {
        format!("videoconvert ! video/x-raw,format={}", format)
      }
      GStreamerInputBuilderItem::AspectRatio { ratio } => {
        format!("aspectratiocrop aspect-ratio={}/{}", ratio.0, ratio.1)
      }
      GStreamerInputBuilderItem::VideoFlip { method, direction } => {
        format!("videoflip method={} video-direction={}", method, direction)
      }
    }
  }

  fn video_flip(rotate: u32) -> Option<Self> {
    let (method, direction) = match rotate {
      90 => (1, 1),
      180 => (2, 2),
      270 => (3, 3),
      _ => return None,
    };
    Some(GStreamerInputBuilderItem::VideoFlip { method, direction })
  }
}

/// 实时摄像头或有限的视频文件
#[derive(Debug, Clone, PartialEq)]
pub enum GStreamerInput {
  Camera {
    builder: GStreamerInputPipelineBuilder,
    source: LiveSourceConfig,
  },
  File {
    builder: GStreamerInputPipelineBuilder,
    source: FiniteSourceConfig,
  },
}

impl FromStageSpec for GStreamerInput {
  const SCHEME: &'static str = "gst";

  fn from_options(options: &mut StageOptions) -> Result<Self, ConfigError> {
    let host: String = options.take_or("host", "camera".to_string())?;
    let path: String = options.require("path")?;
    let resolution: Resolution = options.take_or("resolution", Resolution::new(640, 480))?;
    let rotate: u32 = options.take_or("rotate", 0)?;

    let mut items = Vec::new();
    let gst_input = match host.as_str() {
      "camera" => {
        items.push(GStreamerInputBuilderItem::CameraSource {
          camera: path,
          io_mode: options.take("io-mode")?,
          format: options.take_or("format", "YUY2".to_string())?,
          width: resolution.width,
          height: resolution.height,
          fps: options.take_or("fps", 15)?,
        });
        items.push(GStreamerInputBuilderItem::AspectRatio {
          ratio: (resolution.width, resolution.height),
        });
        items.extend(GStreamerInputBuilderItem::video_flip(rotate));
        items.push(GStreamerInputBuilderItem::TargetFormat {
          format: "RGB".to_string(),
        });
        GStreamerInput::Camera {
          builder: GStreamerInputPipelineBuilder { items },
          source: LiveSourceConfig::from_options(options)?,
        }
      }
      "file" => {
        items.push(GStreamerInputBuilderItem::FileSource(path));
        items.extend(GStreamerInputBuilderItem::video_flip(rotate));
        items.push(GStreamerInputBuilderItem::TargetFormat {
          format: "RGB".to_string(),
        });
        GStreamerInput::File {
          builder: GStreamerInputPipelineBuilder { items },
          source: FiniteSourceConfig::from_options(options)?,
        }
      }
      other => {
        return Err(ConfigError::InvalidOption {
          stage: options.stage().to_string(),
          key: "host".to_string(),
          value: other.to_string(),
          reason: "应为 camera 或 file".to_string(),
        });
      }
    };
    Ok(gst_input)
  }
}

impl GStreamerInput {
  pub fn open(self) -> Result<Box<dyn Input>, InputError> {
    Ok(match self {
      GStreamerInput::Camera { builder, source } => {
        Box::new(LiveSource::new(Self::SCHEME, builder.build()?, source))
      }
      GStreamerInput::File { builder, source } => {
        Box::new(FiniteSource::new(Self::SCHEME, builder.build()?, source))
      }
    })
  }
}

/// GStreamer 输入管道构建器
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GStreamerInputPipelineBuilder {
  items: Vec<GStreamerInputBuilderItem>,
}

impl GStreamerInputPipelineBuilder {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn item(mut self, item: GStreamerInputBuilderItem) -> Self {
    self.items.push(item);
    self
  }

  pub fn description(&self) -> String {
    let basic_pipeline = self
      .items
      .iter()
      .map(GStreamerInputBuilderItem::to_pipeline)
      .collect::<Vec<String>>()
      .join(" ! ");
    format!("{} ! appsink max-buffers=2 drop=true name=sink", basic_pipeline)
  }

  pub fn build(self) -> Result<GStreamerDevice, InputError> {
    let description = self.description();
    let open_error = |reason: String| InputError::DeviceOpen {
      device: description.clone(),
      reason,
    };

    gst::init().map_err(|e| open_error(e.to_string()))?;
    info!("GStreamer 管道: {}", description);

    let pipeline = gst::parse::launch(&description)
      .map_err(|e| open_error(e.to_string()))?
      .downcast::<gst::Pipeline>()
      .map_err(|_| open_error("无法创建管道".to_string()))?;

    let appsink = pipeline
      .by_name("sink")
      .ok_or_else(|| open_error("找不到 appsink".to_string()))?
      .downcast::<gst_app::AppSink>()
      .map_err(|_| open_error("无法转换为 appsink".to_string()))?;

    pipeline
      .set_state(gst::State::Playing)
      .map_err(|e| open_error(e.to_string()))?;

    Ok(GStreamerDevice {
      description,
      pipeline,
      appsink,
    })
  }
}

/// 管理 GStreamer 管道与 appsink
pub struct GStreamerDevice {
  description: String,
  pipeline: gst::Pipeline,
  appsink: gst_app::AppSink,
}

impl CaptureDevice for GStreamerDevice {
  fn describe(&self) -> String {
    self.description.clone()
  }

  fn grab(&mut self) -> Result<Grab, InputError> {
    match self
      .appsink
      .try_pull_sample(gst::ClockTime::from_mseconds(PULL_TIMEOUT_MS))
    {
      Some(sample) => Ok(Grab::Frame(convert_sample(&sample)?)),
      None if self.appsink.is_eos() => Ok(Grab::End),
      None => Ok(Grab::Empty),
    }
  }

  fn release(&mut self) {
    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      warn!("无法停止 GStreamer 管道: {}", e);
    }
  }
}

impl Drop for GStreamerDevice {
  fn drop(&mut self) {
    self.release();
  }
}

fn convert_sample(sample: &gst::Sample) -> Result<Frame, InputError> {
  let buffer = sample
    .buffer()
    .ok_or_else(|| InputError::Acquisition("样本中没有缓冲区".to_string()))?;
  let caps = sample
    .caps()
    .ok_or_else(|| InputError::Acquisition("样本中没有 caps".to_string()))?;
  let video_info = gst_video::VideoInfo::from_caps(caps)
    .map_err(|_| InputError::Acquisition("无法从 caps 获取视频信息".to_string()))?;

  let width = video_info.width() as usize;
  let height = video_info.height() as usize;
  // 每行可能有对齐填充
  let stride = video_info.stride()[0] as usize;

  let map = buffer
    .map_readable()
    .map_err(|e| InputError::Acquisition(format!("无法映射缓冲区: {e}")))?;
  let data = map.as_slice();
  if data.len() < stride * height.saturating_sub(1) + width * 3 {
    return Err(InputError::Acquisition(format!(
      "缓冲区过小: {} 字节, {}x{} 步长 {}",
      data.len(),
      width,
      height,
      stride
    )));
  }

  let bgr = match video_info.format() {
    gst_video::VideoFormat::Rgb => false,
    gst_video::VideoFormat::Bgr => true,
    other => {
      return Err(InputError::Acquisition(format!(
        "不支持的视频格式: {other:?}"
      )));
    }
  };

  let mut rgb = Vec::with_capacity(width * height * 3);
  for row in data.chunks(stride).take(height) {
    for px in row[..width * 3].chunks_exact(3) {
      if bgr {
        rgb.extend_from_slice(&[px[2], px[1], px[0]]);
      } else {
        rgb.extend_from_slice(px);
      }
    }
  }

  Ok(Frame::from_raw(FrameShape::rgb(height, width), rgb)?)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::StageSpec;

  #[test]
  fn camera_pipeline_description() {
    let spec: StageSpec = "gst://camera/dev/video2?resolution=320x240&fps=30&rotate=180"
      .parse()
      .unwrap();
    let GStreamerInput::Camera { builder, .. } = GStreamerInput::from_spec(&spec).unwrap() else {
      panic!("expected camera");
    };
    assert_eq!(
      builder.description(),
      "v4l2src device=/dev/video2 ! video/x-raw,format=YUY2,width=320,height=240,framerate=30/1 \
       ! aspectratiocrop aspect-ratio=320/240 ! videoflip method=2 video-direction=2 \
       ! videoconvert ! video/x-raw,format=RGB ! appsink max-buffers=2 drop=true name=sink"
    );
  }

  #[test]
  fn file_host_is_finite() {
    let spec: StageSpec = "gst://file/data/clip.mp4?buffer=2".parse().unwrap();
    assert!(matches!(
      GStreamerInput::from_spec(&spec).unwrap(),
      GStreamerInput::File { .. }
    ));
    let spec = StageSpec::new("gst")
      .with("host", "file")
      .with("path", "/data/my \"clip\".mp4");
    let GStreamerInput::File { builder, .. } = GStreamerInput::from_spec(&spec).unwrap() else {
      panic!("expected file");
    };
    assert!(
      builder
        .description()
        .starts_with(r#"filesrc location="/data/my \"clip\".mp4" ! decodebin"#)
    );

    let spec: StageSpec = "gst://rtsp/stream".parse().unwrap();
    assert!(GStreamerInput::from_spec(&spec).is_err());
  }
}
