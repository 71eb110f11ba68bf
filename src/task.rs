// 该文件是 Qingfeng （清风） 项目的一部分。
// src/task.rs - 持续运行任务
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

use std::{thread, time::Duration};

use tracing::{info, warn};

use crate::{
  pipeline::{Engine, PipelineError, RunReport},
  signal::StopSignal,
};

const FORCE_EXIT_AFTER: Duration = Duration::from_secs(30);

/// 运行引擎直到输入结束、达到指定帧数或收到 Ctrl-C
#[derive(Default, Debug)]
pub struct ContinuousTask {
  frame_number: Option<u64>,
  signal: StopSignal,
}

impl ContinuousTask {
  pub fn with_frame_number(mut self, frame_number: Option<u64>) -> Self {
    self.frame_number = frame_number;
    self
  }

  pub fn signal(&self) -> &StopSignal {
    &self.signal
  }

  /// 注册 Ctrl-C 处理：触发停止信号，超时仍未退出则强制结束进程
  pub fn install_interrupt_handler(&self) {
    let signal = self.signal.clone();
    let installed = ctrlc::set_handler(move || {
      if signal.is_raised() {
        return;
      }
      info!("收到中断信号，准备退出...");
      signal.raise();
      thread::spawn(|| {
        thread::sleep(FORCE_EXIT_AFTER);
        warn!("强制退出程序");
        std::process::exit(1);
      });
    });
    if let Err(e) = installed {
      warn!("无法注册 Ctrl-C 处理: {}", e);
    }
  }

  pub fn run_task(self, engine: &mut Engine) -> Result<RunReport, PipelineError> {
    info!("开始任务...");
    let report = engine.run_limited(&self.signal, self.frame_number)?;
    info!("任务完成，退出");
    Ok(report)
  }
}
