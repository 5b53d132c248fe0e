// 该文件是 Xinxian （新鲜） 项目的一部分。
// src/output/directory_record.rs - 目录记录输出
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

//! `folder:///dir[?always]`：按 `年/月/日` 建目录，每条记录写一张
//! 叠加层 PNG，有检测结果时再写一份同名 JSON。默认只记录有结果的帧，
//! 带 `always` 时每帧都记录。

use std::path::PathBuf;
use std::sync::atomic::{AtomicU16, Ordering};

use chrono::{Datelike, Local};
use thiserror::Error;
use tracing::debug;

use crate::detector::Detection;
use crate::frame::Frame;
use crate::output::{Render, draw::Draw};
use crate::stabilizer::StabilizerView;
use crate::{FromUrl, FromUrlWithScheme, url_file_path};

#[derive(Error, Debug)]
pub enum DirectoryRecordOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("JSON 错误: {0}")]
  JsonError(#[from] serde_json::Error),
}

pub struct DirectoryRecordOutput {
  directory: PathBuf,
  draw: Draw,
  frame_counter: AtomicU16,
  always: bool,
}

impl FromUrlWithScheme for DirectoryRecordOutput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn from_url(uri: &url::Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(DirectoryRecordOutputError::SchemeMismatch);
    }

    let always = uri.query_pairs().any(|(k, _)| k == "always");
    Ok(DirectoryRecordOutput {
      directory: PathBuf::from(url_file_path(uri)),
      draw: Draw::default(),
      frame_counter: AtomicU16::new(0),
      always,
    })
  }
}

impl DirectoryRecordOutput {
  pub fn with_draw(mut self, draw: Draw) -> Self {
    self.draw = draw;
    self
  }

  fn frame_id(&self) -> u16 {
    self.frame_counter.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
  }

  /// 记录文件路径（不含扩展名）
  fn frame_stem(&self) -> Result<PathBuf, DirectoryRecordOutputError> {
    let now = Local::now();
    let directory = self
      .directory
      .join(now.year().to_string())
      .join(format!("{:02}", now.month()))
      .join(format!("{:02}", now.day()));
    std::fs::create_dir_all(&directory)?;

    Ok(directory.join(format!(
      "{}-{:04X}",
      now.format("%H-%M-%S"),
      self.frame_id()
    )))
  }

  fn record(
    &self,
    frame: &Frame,
    detection: Option<&Detection>,
  ) -> Result<(), DirectoryRecordOutputError> {
    let stem = self.frame_stem()?;
    let image_path = stem.with_extension("png");
    self
      .draw
      .draw_overlay(&frame.image, detection)
      .save(&image_path)?;

    if let Some(detection) = detection {
      let json_path = stem.with_extension("json");
      std::fs::write(&json_path, detection.result.to_json_pretty()?)?;
    }
    debug!("记录帧 #{} 到 {}", frame.index, image_path.display());
    Ok(())
  }
}

impl Render<Frame, Option<Detection>> for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn render_result(&self, frame: &Frame, result: &Option<Detection>) -> Result<(), Self::Error> {
    if self.always || result.is_some() {
      self.record(frame, result.as_ref())?;
    }
    Ok(())
  }
}

/// 视频流中只记录新分级的帧，锁定期间的跟随帧不重复记录
impl Render<Frame, StabilizerView> for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn render_result(&self, frame: &Frame, result: &StabilizerView) -> Result<(), Self::Error> {
    if self.always || result.accepted {
      self.record(frame, result.detection.as_ref())?;
    }
    Ok(())
  }
}
