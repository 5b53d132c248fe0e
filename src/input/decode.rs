// 该文件是 Xinxian （新鲜） 项目的一部分。
// src/input/decode.rs - 内存图像解码
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

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use image::RgbImage;

use super::InputError;

/// 解码任意受支持格式的图像字节，统一转为 8 位 RGB
pub fn decode_image_bytes(bytes: &[u8]) -> Result<RgbImage, InputError> {
  if bytes.is_empty() {
    return Err(InputError::Empty);
  }
  let image = image::load_from_memory(bytes)?;
  Ok(image.to_rgb8())
}

/// 解码 base64 图像；`data:image/...;base64,` 前缀会先被去掉
pub fn decode_base64_image(text: &str) -> Result<RgbImage, InputError> {
  let text = text.trim();
  let data = match text.split_once(',') {
    Some((header, data)) if header.starts_with("data:") => data,
    _ => text,
  };
  let bytes = STANDARD.decode(data.trim())?;
  decode_image_bytes(&bytes)
}
