// 该文件是 Xinxian （新鲜） 项目的一部分。
// src/input/v4l2_source.rs - V4L2 摄像头输入源
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

use std::pin::Pin;
use std::time::Instant;

use image::RgbImage;
use tracing::{info, warn};
use url::Url;
use v4l::FourCC;
use v4l::buffer::Type;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;

use super::{InputError, check_scheme};
use crate::frame::Frame;
use crate::{FromUrl, FromUrlWithScheme, url_file_path};

const DEFAULT_WIDTH: u32 = 1280;
const DEFAULT_HEIGHT: u32 = 720;

/// V4L2 摄像头输入源
///
/// v4l 的 Stream 需要引用 Device，所以 Device 用 Pin<Box> 固定在堆上，
/// 再创建引用它的 Stream。
///
/// URL 形如 `v4l:///dev/video0?width=1280&height=720`。
pub struct V4l2Source {
  /// V4L2 设备（使用 Pin<Box> 固定内存位置）
  device: Pin<Box<Device>>,
  /// 捕获流（生命周期与 device 关联）
  stream: Option<Stream<'static>>,
  frame_index: u64,
  width: u32,
  height: u32,
  start_time: Instant,
}

impl V4l2Source {
  pub fn new(device_path: &str, width: u32, height: u32) -> Result<Self, InputError> {
    let open_error = |source| InputError::DeviceError {
      path: device_path.to_string(),
      source,
    };
    let device = Box::pin(Device::with_path(device_path).map_err(open_error)?);

    let mut format = device.format().map_err(open_error)?;
    format.width = width;
    format.height = height;
    format.fourcc = FourCC::new(b"YUYV");
    let format = device.set_format(&format).map_err(open_error)?;
    if format.fourcc != FourCC::new(b"YUYV") {
      return Err(InputError::CaptureError(format!(
        "设备不支持 YUYV 格式: {}",
        format.fourcc
      )));
    }
    if (format.width, format.height) != (width, height) {
      warn!(
        "设备分辨率调整为 {}x{}（请求 {}x{}）",
        format.width, format.height, width, height
      );
    }

    let mut source = Self {
      device,
      stream: None,
      frame_index: 0,
      width: format.width,
      height: format.height,
      start_time: Instant::now(),
    };

    // SAFETY: device 被 Pin<Box> 固定，不会移动；
    // Drop 中先取走 stream，再释放 device
    let device_ref: &Device = &source.device;
    let stream = unsafe {
      let device_static: &'static Device = std::mem::transmute(device_ref);
      Stream::with_buffers(device_static, Type::VideoCapture, 4).map_err(open_error)?
    };
    source.stream = Some(stream);

    info!(
      "打开摄像头 {} ({}x{} YUYV)",
      device_path, source.width, source.height
    );
    Ok(source)
  }

  /// 摄像头序号对应的设备节点
  pub fn device_path(index: u32) -> String {
    format!("/dev/video{}", index)
  }

  pub fn width(&self) -> u32 {
    self.width
  }

  pub fn height(&self) -> u32 {
    self.height
  }
}

/// YUYV (4:2:2) 转 RGB，每 4 字节两个像素
pub fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Vec<u8> {
  let mut rgb = Vec::with_capacity((width * height * 3) as usize);

  for chunk in yuyv.chunks_exact(4) {
    let u = chunk[1] as f32 - 128.0;
    let v = chunk[3] as f32 - 128.0;
    for y in [chunk[0] as f32, chunk[2] as f32] {
      let r = (y + 1.402 * v).clamp(0.0, 255.0) as u8;
      let g = (y - 0.344 * u - 0.714 * v).clamp(0.0, 255.0) as u8;
      let b = (y + 1.772 * u).clamp(0.0, 255.0) as u8;
      rgb.extend_from_slice(&[r, g, b]);
    }
  }

  rgb
}

fn query_u32(url: &Url, key: &str, default: u32) -> u32 {
  url
    .query_pairs()
    .find(|(k, _)| k == key)
    .and_then(|(_, v)| v.parse().ok())
    .unwrap_or(default)
}

impl FromUrl for V4l2Source {
  type Error = InputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    check_scheme(url, Self::SCHEME)?;
    let width = query_u32(url, "width", DEFAULT_WIDTH);
    let height = query_u32(url, "height", DEFAULT_HEIGHT);
    Self::new(&url_file_path(url), width, height)
  }
}

impl FromUrlWithScheme for V4l2Source {
  const SCHEME: &'static str = "v4l";
}

impl Drop for V4l2Source {
  fn drop(&mut self) {
    // stream 必须先于 device 释放
    self.stream.take();
    info!("摄像头已释放");
  }
}

impl Iterator for V4l2Source {
  type Item = Result<Frame, InputError>;

  fn next(&mut self) -> Option<Self::Item> {
    let stream = self.stream.as_mut()?;

    let buffer = match stream.next() {
      Ok((buffer, _meta)) => buffer,
      Err(e) => return Some(Err(InputError::CaptureError(e.to_string()))),
    };
    let rgb = yuyv_to_rgb(buffer, self.width, self.height);
    let Some(image) = RgbImage::from_raw(self.width, self.height, rgb) else {
      return Some(Err(InputError::CaptureError(format!(
        "帧数据长度不足: {} 字节",
        buffer.len()
      ))));
    };

    let frame = Frame {
      image,
      index: self.frame_index,
      timestamp_ms: self.start_time.elapsed().as_millis() as u64,
    };
    self.frame_index += 1;
    Some(Ok(frame))
  }
}
