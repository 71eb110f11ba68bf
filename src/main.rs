// 该文件是 Qingfeng （清风） 项目的一部分。
// src/main.rs - 项目主程序
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

mod args;

use anyhow::Result;
use clap::Parser;
use tracing::{Level, info};

use qingfeng::{pipeline::Engine, registry::StageRegistry, task::ContinuousTask};

fn main() -> Result<()> {
  let args = args::Args::parse();

  tracing_subscriber::fmt()
    .with_max_level(if args.verbose {
      Level::DEBUG
    } else {
      Level::INFO
    })
    .init();

  let config = args.pipeline_config()?;
  let registry = StageRegistry::with_builtins();
  let mut engine = Engine::from_config(&config, &registry)?;
  info!("{}", engine.summary());

  let task = ContinuousTask::default().with_frame_number(args.frame_number);
  task.install_interrupt_handler();
  let report = task.run_task(&mut engine)?;

  info!(
    "处理完成: {} 帧{}",
    report.frames,
    if report.interrupted { ", 已中断" } else { "" }
  );
  Ok(())
}
