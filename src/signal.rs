// 该文件是 Qingfeng （清风） 项目的一部分。
// src/signal.rs - 停止信号
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

use std::sync::{
  Arc,
  atomic::{AtomicBool, Ordering},
};

/// 跨线程共享的停止请求，一旦置位不再复位
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn raise(&self) {
    self.0.store(true, Ordering::Release);
  }

  pub fn is_raised(&self) -> bool {
    self.0.load(Ordering::Acquire)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn clones_share_state() {
    let signal = StopSignal::new();
    let other = signal.clone();
    assert!(!other.is_raised());
    signal.raise();
    assert!(other.is_raised());
  }
}
