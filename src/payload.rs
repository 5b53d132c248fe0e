// 该文件是 Xinxian （新鲜） 项目的一部分。
// src/payload.rs - 二维码载荷解码
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

//! 标签上的二维码只携带包装信息（编号、品类、批次、日期），
//! 解码失败或内容不是 JSON 对象时一律视为空载荷。

use image::{GrayImage, Luma, RgbImage};
use imageproc::contrast::equalize_histogram;
use rqrr::PreparedImage;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, trace};

use crate::cascade::Cascade;
use crate::frame::Point2;
use crate::preprocess::sharpen_rgb;

/// 二维码中的包装信息，所有字段可缺省
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Payload {
  pub id: Option<String>,
  pub product: Option<String>,
  pub packed: Option<String>,
  pub batch: Option<String>,
  pub aruco_id: Option<String>,
  pub is_spoiled: Option<String>,
}

fn field(map: &serde_json::Map<String, Value>, key: &str) -> Option<String> {
  match map.get(key)? {
    Value::Null => None,
    Value::String(s) => Some(s.clone()),
    other => Some(other.to_string()),
  }
}

impl Payload {
  /// 解析 JSON 对象文本；其他内容返回 `None`
  pub fn parse(text: &str) -> Option<Self> {
    let value: Value = serde_json::from_str(text.trim()).ok()?;
    let map = value.as_object()?;
    Some(Self {
      id: field(map, "id"),
      product: field(map, "product"),
      packed: field(map, "packed"),
      batch: field(map, "batch"),
      aruco_id: field(map, "aruco_id"),
      is_spoiled: field(map, "is_spoiled"),
    })
  }

  pub fn is_empty(&self) -> bool {
    *self == Self::default()
  }
}

/// 载荷及其在图像中的四边形
#[derive(Debug, Clone, PartialEq)]
pub struct PayloadReading {
  pub payload: Payload,
  pub polygon: [Point2; 4],
}

/// 二维码识别前的预处理
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadVariant {
  /// 原始帧的亮度
  Raw,
  /// BT.601 加权灰度
  Gray,
  Equalized,
  /// 彩色锐化后再取亮度
  Sharpened,
}

pub const PAYLOAD_VARIANTS: [PayloadVariant; 4] = [
  PayloadVariant::Raw,
  PayloadVariant::Gray,
  PayloadVariant::Equalized,
  PayloadVariant::Sharpened,
];

fn bt601(image: &RgbImage) -> GrayImage {
  GrayImage::from_fn(image.width(), image.height(), |x, y| {
    let [r, g, b] = image.get_pixel(x, y).0;
    let v = 0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32;
    Luma([v.round().clamp(0.0, 255.0) as u8])
  })
}

impl PayloadVariant {
  pub fn apply(&self, image: &RgbImage) -> GrayImage {
    match self {
      PayloadVariant::Raw => image::imageops::grayscale(image),
      PayloadVariant::Gray => bt601(image),
      PayloadVariant::Equalized => equalize_histogram(&bt601(image)),
      PayloadVariant::Sharpened => bt601(&sharpen_rgb(image)),
    }
  }
}

/// 在灰度图中识别第一个内容为 JSON 对象的二维码
fn read_gray(gray: &GrayImage) -> Option<PayloadReading> {
  let (w, h) = (gray.width() as usize, gray.height() as usize);
  let mut prepared = PreparedImage::prepare_from_greyscale(w, h, |x, y| gray.get_pixel(x as u32, y as u32)[0]);
  for grid in prepared.detect_grids() {
    let Ok((_, text)) = grid.decode() else {
      continue;
    };
    let Some(payload) = Payload::parse(&text) else {
      trace!("二维码内容不是 JSON 对象: {:?}", text);
      continue;
    };
    let polygon = grid.bounds.map(|p| Point2::new(p.x as f32, p.y as f32));
    return Some(PayloadReading { payload, polygon });
  }
  None
}

/// 载荷解码器：按变体顺序尝试，首个可解析的结果胜出
#[derive(Debug, Clone)]
pub struct PayloadDecoder {
  variants: Vec<PayloadVariant>,
}

impl Default for PayloadDecoder {
  fn default() -> Self {
    Self {
      variants: PAYLOAD_VARIANTS.to_vec(),
    }
  }
}

impl PayloadDecoder {
  pub fn with_variants(variants: Vec<PayloadVariant>) -> Self {
    Self { variants }
  }

  pub fn read(&self, image: &RgbImage) -> Option<PayloadReading> {
    let hit = Cascade::new(&[()], &self.variants).run(|_, _, _, variant| read_gray(&variant.apply(image)))?;
    debug!("二维码载荷: {:?} (变体 {:?})", hit.value.payload, self.variants[hit.variant_index]);
    Some(hit.value)
  }

  /// 解码失败时返回空载荷
  pub fn decode(&self, image: &RgbImage) -> Payload {
    self.read(image).map(|r| r.payload).unwrap_or_default()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_object_and_stringifies_values() {
    let p = Payload::parse(r#"{"id":"PKG-1","product":"Beef","aruco_id":7,"is_spoiled":false,"extra":1}"#).unwrap();
    assert_eq!(p.id.as_deref(), Some("PKG-1"));
    assert_eq!(p.product.as_deref(), Some("Beef"));
    assert_eq!(p.aruco_id.as_deref(), Some("7"));
    assert_eq!(p.is_spoiled.as_deref(), Some("false"));
    assert_eq!(p.batch, None);
  }

  #[test]
  fn rejects_non_objects() {
    assert!(Payload::parse("hello").is_none());
    assert!(Payload::parse("[1,2]").is_none());
    assert!(Payload::parse("42").is_none());
  }

  #[test]
  fn null_is_absent() {
    let p = Payload::parse(r#"{"id":null}"#).unwrap();
    assert!(p.is_empty());
  }

  #[test]
  fn blank_image_decodes_to_empty() {
    let img = RgbImage::from_pixel(64, 64, image::Rgb([255, 255, 255]));
    let decoder = PayloadDecoder::default();
    assert!(decoder.read(&img).is_none());
    assert!(decoder.decode(&img).is_empty());
  }

  fn qr_frame(text: &str) -> RgbImage {
    let qr = qrcode::QrCode::new(text.as_bytes())
      .unwrap()
      .render::<Luma<u8>>()
      .module_dimensions(5, 5)
      .build();
    let mut frame = RgbImage::from_pixel(300, 260, image::Rgb([255, 255, 255]));
    let qr = image::DynamicImage::ImageLuma8(qr).to_rgb8();
    image::imageops::overlay(&mut frame, &qr, 40, 30);
    frame
  }

  #[test]
  fn reads_json_qr_with_polygon() {
    let frame = qr_frame(r#"{"id":"PKG-5","product":"Pork","packed":"2026-02-01"}"#);
    let reading = PayloadDecoder::default().read(&frame).unwrap();
    assert_eq!(reading.payload.id.as_deref(), Some("PKG-5"));
    assert_eq!(reading.payload.product.as_deref(), Some("Pork"));
    assert_eq!(reading.payload.packed.as_deref(), Some("2026-02-01"));
    for p in reading.polygon {
      assert!(p.x >= 40.0 && p.y >= 30.0, "{:?}", reading.polygon);
    }
  }

  #[test]
  fn plain_text_qr_is_ignored() {
    let frame = qr_frame("just a label");
    let decoder = PayloadDecoder::default();
    assert!(decoder.read(&frame).is_none());
    assert!(decoder.decode(&frame).is_empty());
  }

  #[test]
  fn variants_keep_dimensions() {
    let img = RgbImage::from_pixel(20, 10, image::Rgb([10, 200, 30]));
    for v in PAYLOAD_VARIANTS {
      assert_eq!(v.apply(&img).dimensions(), (20, 10));
    }
  }
}
