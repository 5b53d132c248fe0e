// 该文件是 Xinxian （新鲜） 项目的一部分。
// src/input/read_image_file.rs - 图像文件输入
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

use std::path::Path;

use image::{ImageReader, RgbImage};
use tracing::info;
use url::Url;

use super::{InputError, check_scheme};
use crate::frame::Frame;
use crate::{FromUrl, FromUrlWithScheme, url_file_path};

/// 单张静态图像，迭代一次后结束
pub struct ImageFileInput {
  image: Option<RgbImage>,
}

impl ImageFileInput {
  pub fn open(path: &Path) -> Result<Self, InputError> {
    let image = ImageReader::open(path)?.with_guessed_format()?.decode()?;
    info!(
      "读取图像: {} ({}x{})",
      path.display(),
      image.width(),
      image.height()
    );
    Ok(Self {
      image: Some(image.to_rgb8()),
    })
  }

  pub fn from_image(image: RgbImage) -> Self {
    Self { image: Some(image) }
  }
}

impl FromUrl for ImageFileInput {
  type Error = InputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    check_scheme(url, Self::SCHEME)?;
    Self::open(Path::new(&url_file_path(url)))
  }
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = "image";
}

impl Iterator for ImageFileInput {
  type Item = Result<Frame, InputError>;

  fn next(&mut self) -> Option<Self::Item> {
    self.image.take().map(|image| Ok(Frame::still(image)))
  }
}
