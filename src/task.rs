// 该文件是 Xinxian （新鲜） 项目的一部分。
// src/task.rs - 单图与视频流任务
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

use std::io::BufRead;
use std::path::PathBuf;
use std::sync::mpsc::{Receiver, channel};
use std::{thread, time::Duration};

use tracing::{debug, info, warn};

use crate::detector::{Detection, Detector, FrameAnalyzer};
use crate::frame::Frame;
use crate::output::Render;
use crate::stabilizer::{LockPolicy, Stabilizer, StabilizerView};

pub trait Task<I, D, O>: Sized {
  type Output;
  type Error;
  fn run_task(self, input: I, detector: D, output: O) -> Result<Self::Output, Self::Error>;
}

/// 视频流运行时的交互命令
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
  Quit,
  Save,
}

impl Command {
  pub fn parse(line: &str) -> Option<Self> {
    match line.trim().to_ascii_lowercase().as_str() {
      "q" | "quit" => Some(Command::Quit),
      "s" | "save" => Some(Command::Save),
      _ => None,
    }
  }
}

/// Ctrl-C 与标准输入上的 `q` / `s` 行汇成一个命令通道
pub fn console_commands() -> anyhow::Result<Receiver<Command>> {
  let (tx, rx) = channel();

  let interrupt = tx.clone();
  ctrlc::set_handler(move || {
    info!("收到中断信号，准备退出...");
    let _ = interrupt.send(Command::Quit);
    thread::spawn(|| {
      thread::sleep(Duration::from_secs(30));
      warn!("强制退出程序");
      std::process::exit(1);
    });
  })?;

  thread::spawn(move || {
    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
      let Ok(line) = line else { break };
      match Command::parse(&line) {
        Some(command) => {
          if tx.send(command).is_err() {
            break;
          }
        }
        None => warn!("未知命令: {:?}（q 退出，s 保存）", line.trim()),
      }
    }
  });

  Ok(rx)
}

/// 单张图像：跑一次流水线，打印报告并输出 JSON
pub struct OneShotTask;

impl<IE, DE, RE, I, D, O> Task<I, D, O> for OneShotTask
where
  IE: std::error::Error + Sync + Send + 'static,
  DE: std::error::Error + Sync + Send + 'static,
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = Result<Frame, IE>>,
  D: Detector<Input = Frame, Output = Option<Detection>, Error = DE>,
  O: Render<Frame, Option<Detection>, Error = RE>,
{
  type Output = Option<Detection>;
  type Error = anyhow::Error;

  fn run_task(self, mut input: I, detector: D, output: O) -> Result<Self::Output, Self::Error> {
    let frame = input.next().ok_or_else(|| anyhow::anyhow!("没有输入帧"))??;
    info!("输入帧 {}x{}，开始检测...", frame.width(), frame.height());

    let now = std::time::Instant::now();
    let detection = detector.detect(&frame)?;
    info!("检测完成，耗时: {:.2?}", now.elapsed());

    match &detection {
      Some(d) => {
        for line in d.result.report().lines() {
          info!("{}", line);
        }
        println!("{}", d.result.to_json_pretty()?);
      }
      None => info!("图像中未检出标签（需要可见的定位标记）"),
    }
    output.render_result(&frame, &detection)?;

    Ok(detection)
  }
}

/// 视频流运行统计
#[derive(Debug, Default, Clone, PartialEq)]
pub struct LiveSummary {
  pub frames: usize,
  pub accepted: usize,
  pub saved: Vec<PathBuf>,
}

/// 视频流：逐帧经过稳定器，渲染叠加层并处理命令
pub struct LiveTask {
  frame_number: Option<usize>,
  policy: LockPolicy,
  save_dir: PathBuf,
  commands: Option<Receiver<Command>>,
}

impl Default for LiveTask {
  fn default() -> Self {
    Self {
      frame_number: None,
      policy: LockPolicy::default(),
      save_dir: PathBuf::from("."),
      commands: None,
    }
  }
}

impl LiveTask {
  pub fn with_frame_number(mut self, frame_number: Option<usize>) -> Self {
    self.frame_number = frame_number;
    self
  }

  pub fn with_policy(mut self, policy: LockPolicy) -> Self {
    self.policy = policy;
    self
  }

  pub fn with_save_dir(mut self, dir: PathBuf) -> Self {
    self.save_dir = dir;
    self
  }

  pub fn with_commands(mut self, commands: Receiver<Command>) -> Self {
    self.commands = Some(commands);
    self
  }

  fn poll(&self) -> Vec<Command> {
    self
      .commands
      .as_ref()
      .map(|rx| rx.try_iter().collect())
      .unwrap_or_default()
  }
}

impl<IE, RE, I, A, O> Task<I, A, O> for LiveTask
where
  IE: std::error::Error + Sync + Send + 'static,
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = Result<Frame, IE>>,
  A: FrameAnalyzer,
  O: Render<Frame, StabilizerView, Error = RE>,
{
  type Output = LiveSummary;
  type Error = anyhow::Error;

  fn run_task(self, input: I, analyzer: A, output: O) -> Result<Self::Output, Self::Error> {
    info!("开始视频流检测（q 退出，s 保存最近结果）...");
    let mut stabilizer = Stabilizer::new(analyzer, self.policy);
    let mut summary = LiveSummary::default();

    'frames: for frame in input {
      // 读帧失败直接结束循环
      let frame = frame?;
      let view = stabilizer.tick(&frame.image);
      summary.frames += 1;
      if view.accepted {
        summary.accepted += 1;
        if let Some(d) = &view.detection {
          info!(
            "[{}] {} / {} / 标记 #{} / {} {:.2}% / 安全: {}",
            d.result.timestamp,
            d.result.package_id,
            d.result.product_type,
            d.result.marker_id,
            d.result.spoilage_level,
            d.result.spoilage_percentage,
            if d.result.is_safe { "是" } else { "否" }
          );
        }
      }
      output.render_result(&frame, &view)?;
      debug!("帧 #{} 处理完成，冷却 {}", frame.index, view.cooldown);

      for command in self.poll() {
        match command {
          Command::Quit => {
            info!("收到退出命令");
            break 'frames;
          }
          Command::Save => match stabilizer.last_result() {
            Some(result) => summary.saved.push(result.save_json(&self.save_dir)?),
            None => warn!("还没有可保存的检测结果"),
          },
        }
      }

      if self.frame_number.is_some_and(|n| summary.frames >= n) {
        info!("达到指定帧数 {}, 退出任务循环", summary.frames);
        break;
      }
    }

    info!(
      "任务完成: {} 帧，{} 次分级",
      summary.frames, summary.accepted
    );
    Ok(summary)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::convert::Infallible;

  use image::{Rgb, RgbImage};

  use crate::detector::SpoilageDetector;

  struct NullSink;

  impl<T> Render<Frame, T> for NullSink {
    type Error = Infallible;

    fn render_result(&self, _: &Frame, _: &T) -> Result<(), Self::Error> {
      Ok(())
    }
  }

  fn blank_frames(n: usize) -> impl Iterator<Item = Result<Frame, std::io::Error>> {
    (0..n).map(|_| Ok(Frame::still(RgbImage::from_pixel(64, 48, Rgb([255, 255, 255])))))
  }

  #[test]
  fn commands_parse_case_insensitively() {
    assert_eq!(Command::parse(" Q\n"), Some(Command::Quit));
    assert_eq!(Command::parse("save"), Some(Command::Save));
    assert_eq!(Command::parse("x"), None);
  }

  #[test]
  fn one_shot_without_marker_returns_none() {
    let result = OneShotTask
      .run_task(blank_frames(1), SpoilageDetector::default(), NullSink)
      .unwrap();
    assert!(result.is_none());
  }

  #[test]
  fn one_shot_without_frames_fails() {
    assert!(
      OneShotTask
        .run_task(blank_frames(0), SpoilageDetector::default(), NullSink)
        .is_err()
    );
  }

  #[test]
  fn live_stops_at_frame_limit() {
    let summary = LiveTask::default()
      .with_frame_number(Some(3))
      .run_task(blank_frames(10), SpoilageDetector::default(), NullSink)
      .unwrap();
    assert_eq!(summary.frames, 3);
    assert_eq!(summary.accepted, 0);
  }

  #[test]
  fn live_read_failure_is_fatal() {
    let frames = blank_frames(2).chain(std::iter::once(Err(std::io::Error::other("断开"))));
    let result = LiveTask::default().run_task(frames, SpoilageDetector::default(), NullSink);
    assert!(result.is_err());
  }

  #[test]
  fn quit_command_ends_loop() {
    let (tx, rx) = channel();
    tx.send(Command::Save).unwrap();
    tx.send(Command::Quit).unwrap();
    let summary = LiveTask::default()
      .with_commands(rx)
      .run_task(blank_frames(10), SpoilageDetector::default(), NullSink)
      .unwrap();
    assert_eq!(summary.frames, 1);
    assert!(summary.saved.is_empty());
  }
}
