// 该文件是 Qingfeng （清风） 项目的一部分。
// src/input/congestion.rs - AIMD 拥塞窗口
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

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
  Admitted,
  Dropped,
}

/// 加性增、乘性减的帧准入窗口。
///
/// `in_flight` 为尚未被消费者取走的已发布帧数。到达的帧计入后，
/// 若不超过窗口则准入并将窗口增加 `1/window`（不超过上限），
/// 否则丢弃并将窗口减半（向下取整，不低于 1）。
#[derive(Debug, Clone, PartialEq)]
pub struct CongestionWindow {
  window_size: f64,
  max_window: f64,
  in_flight: u32,
}

impl CongestionWindow {
  pub const MIN_WINDOW: f64 = 1.0;

  pub fn new(initial: f64, max_window: f64) -> Self {
    let max_window = max_window.max(Self::MIN_WINDOW);
    Self {
      window_size: initial.clamp(Self::MIN_WINDOW, max_window),
      max_window,
      in_flight: 0,
    }
  }

  pub fn window_size(&self) -> f64 {
    self.window_size
  }

  pub fn max_window(&self) -> f64 {
    self.max_window
  }

  pub fn in_flight(&self) -> u32 {
    self.in_flight
  }

  /// 同步消费者尚未取走的帧数
  pub fn settle(&mut self, backlog: u32) {
    self.in_flight = backlog;
  }

  pub fn on_arrival(&mut self) -> Admission {
    self.in_flight = self.in_flight.saturating_add(1);
    if f64::from(self.in_flight) <= self.window_size {
      self.window_size = (self.window_size + 1.0 / self.window_size).min(self.max_window);
      self.in_flight -= 1;
      Admission::Admitted
    } else {
      self.window_size = (self.window_size / 2.0).floor().max(Self::MIN_WINDOW);
      Admission::Dropped
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn grows_additively_up_to_the_ceiling() {
    let mut window = CongestionWindow::new(1.0, 4.0);
    let mut previous = window.window_size();
    while window.window_size() < 4.0 {
      window.settle(0);
      assert_eq!(window.on_arrival(), Admission::Admitted);
      assert!(window.window_size() > previous);
      assert!(window.window_size() - previous <= 1.0);
      previous = window.window_size();
    }
    window.settle(0);
    window.on_arrival();
    assert_eq!(window.window_size(), 4.0);
  }

  #[test]
  fn halves_on_drop_and_never_goes_below_one() {
    let mut window = CongestionWindow::new(9.0, 100.0);
    window.settle(9);
    assert_eq!(window.on_arrival(), Admission::Dropped);
    assert_eq!(window.window_size(), 4.0);

    for _ in 0..10 {
      window.settle(50);
      assert_eq!(window.on_arrival(), Admission::Dropped);
    }
    assert_eq!(window.window_size(), 1.0);
  }

  #[test]
  fn window_of_one_admits_an_idle_consumer() {
    let mut window = CongestionWindow::new(1.0, 100.0);
    window.settle(0);
    assert_eq!(window.on_arrival(), Admission::Admitted);
    assert_eq!(window.in_flight(), 0);
    assert_eq!(window.window_size(), 2.0);
  }

  #[test]
  fn window_stays_in_bounds() {
    let mut window = CongestionWindow::new(3.0, 8.0);
    for i in 0..200u32 {
      window.settle(i % 11);
      window.on_arrival();
      let size = window.window_size();
      assert!((1.0..=8.0).contains(&size), "window {size}");
    }
  }
}
