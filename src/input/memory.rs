// 该文件是 Qingfeng （清风） 项目的一部分。
// src/input/memory.rs - 内存帧设备
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

use std::collections::VecDeque;

use super::{CaptureDevice, Grab, InputError};
use crate::frame::Frame;

/// 依次返回预先给定的帧
#[derive(Debug, Clone)]
pub struct MemoryDevice {
  label: String,
  frames: VecDeque<Frame>,
  total: usize,
}

impl MemoryDevice {
  pub fn new(label: impl Into<String>, frames: Vec<Frame>) -> Self {
    Self {
      label: label.into(),
      total: frames.len(),
      frames: frames.into(),
    }
  }
}

impl CaptureDevice for MemoryDevice {
  fn describe(&self) -> String {
    self.label.clone()
  }

  fn grab(&mut self) -> Result<Grab, InputError> {
    Ok(match self.frames.pop_front() {
      Some(frame) => Grab::Frame(frame),
      None => Grab::End,
    })
  }

  fn frame_count(&self) -> Option<usize> {
    Some(self.total)
  }
}
