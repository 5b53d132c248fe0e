// 该文件是 Xinxian （新鲜） 项目的一部分。
// src/input.rs - 图像/摄像头输入
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

use thiserror::Error;

use crate::FromUrl;
use crate::frame::Frame;

mod decode;
pub use self::decode::{decode_base64_image, decode_image_bytes};

mod read_image_file;
pub use self::read_image_file::ImageFileInput;

#[cfg(feature = "v4l_input")]
mod v4l2_source;
#[cfg(feature = "v4l_input")]
pub use self::v4l2_source::V4l2Source;

#[derive(Error, Debug)]
pub enum InputError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像解码失败: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("Base64 解码失败: {0}")]
  Base64Error(#[from] base64::DecodeError),
  #[error("图像数据为空")]
  Empty,
  #[error("URI scheme 不匹配: 期望 '{expected}'，实际 '{found}'")]
  SchemeMismatch { expected: String, found: String },
  #[error("不支持的输入 URI: {0}")]
  Unsupported(String),
  #[error("无法打开设备 {path}: {source}")]
  DeviceError {
    path: String,
    source: std::io::Error,
  },
  #[error("无法捕获帧: {0}")]
  CaptureError(String),
}

pub(crate) fn check_scheme(url: &url::Url, expected: &str) -> Result<(), InputError> {
  if url.scheme() != expected {
    tracing::error!(
      "URI scheme mismatch: expected '{}', found '{}'",
      expected,
      url.scheme()
    );
    return Err(InputError::SchemeMismatch {
      expected: expected.to_string(),
      found: url.scheme().to_string(),
    });
  }
  Ok(())
}

/// 按 URL scheme 选择的帧来源
pub enum InputWrapper {
  ImageFile(ImageFileInput),
  #[cfg(feature = "v4l_input")]
  V4l2(V4l2Source),
}

impl FromUrl for InputWrapper {
  type Error = InputError;

  fn from_url(url: &url::Url) -> Result<Self, Self::Error> {
    use crate::FromUrlWithScheme;

    if url.scheme() == ImageFileInput::SCHEME {
      return Ok(InputWrapper::ImageFile(ImageFileInput::from_url(url)?));
    }
    #[cfg(feature = "v4l_input")]
    {
      if url.scheme() == V4l2Source::SCHEME {
        return Ok(InputWrapper::V4l2(V4l2Source::from_url(url)?));
      }
    }
    Err(InputError::Unsupported(url.to_string()))
  }
}

impl Iterator for InputWrapper {
  type Item = Result<Frame, InputError>;

  fn next(&mut self) -> Option<Self::Item> {
    match self {
      InputWrapper::ImageFile(input) => input.next(),
      #[cfg(feature = "v4l_input")]
      InputWrapper::V4l2(input) => input.next(),
    }
  }
}
