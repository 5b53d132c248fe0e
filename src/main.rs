// 该文件是 Xinxian （新鲜） 项目的一部分。
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

use std::sync::Arc;
use std::sync::atomic::Ordering;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use xinxian::{
  FromUrl,
  detector::SpoilageDetector,
  input::InputWrapper,
  marker::{FiducialLocator, MarkerDictionary},
  output::{Draw, OutputWrapper},
  server::{ApiConfig, ApiServer},
  stabilizer::LockPolicy,
  task::{LiveTask, OneShotTask, Task, console_commands},
};

fn build_detector(args: &args::Args) -> Result<SpoilageDetector> {
  let dictionary = match &args.dictionary {
    Some(path) => {
      let dictionary = MarkerDictionary::from_json_file(path)?;
      info!("标记字典: {} ({} 个码字)", path.display(), dictionary.len());
      dictionary
    }
    None => MarkerDictionary::builtin().clone(),
  };
  Ok(SpoilageDetector::new(FiducialLocator::new(dictionary)))
}

fn build_draw(args: &args::Args) -> Result<Draw> {
  Ok(match &args.font {
    Some(path) => Draw::with_font_file(path)?,
    None => Draw::default(),
  })
}

fn build_output(args: &args::Args, draw: &Draw) -> Result<Option<OutputWrapper>> {
  let Some(url) = &args.output else {
    return Ok(None);
  };
  info!("输出路径: {}", url);
  Ok(Some(OutputWrapper::from_url(url)?.with_draw(draw.clone())))
}

fn serve(args: &args::Args, detector: SpoilageDetector, draw: Draw) -> Result<()> {
  let handle = ApiServer::new(ApiConfig::new(&args.host, args.port), Arc::new(detector))
    .with_draw(draw)
    .spawn()?;

  let shutdown = handle.shutdown_flag();
  ctrlc::set_handler(move || {
    info!("收到中断信号，关闭检测接口...");
    shutdown.store(true, Ordering::SeqCst);
  })?;
  handle.wait()?;
  Ok(())
}

fn main() -> Result<()> {
  let args = args::Args::parse();

  let level = if args.debug { "debug" } else { "info" };
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
    .init();

  let detector = build_detector(&args)?;
  let draw = build_draw(&args)?;

  if args.serve {
    return serve(&args, detector, draw);
  }

  let output = build_output(&args, &draw)?;

  if let Some(url) = args.image_url() {
    let url = url?;
    info!("输入来源: {}", url);
    let input = InputWrapper::from_url(&url)?;
    OneShotTask.run_task(input, detector, output)?;
    return Ok(());
  }

  let url = args.camera_url()?;
  info!("输入来源: {}", url);
  let input = InputWrapper::from_url(&url)?;
  let policy = LockPolicy {
    cooldown: args.cooldown,
    clear_stale: args.clear_stale,
  };
  LiveTask::default()
    .with_frame_number(args.max_frames)
    .with_policy(policy)
    .with_save_dir(args.save_dir.clone())
    .with_commands(console_commands()?)
    .run_task(input, &detector, output)?;

  Ok(())
}
