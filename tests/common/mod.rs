// 该文件是 Xinxian （新鲜） 项目的一部分。
// tests/common/mod.rs - 集成测试用的合成标签
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

#![allow(dead_code)]

use image::{DynamicImage, Luma, Rgb, RgbImage, imageops};
use qrcode::QrCode;
use xinxian::frame::PixelRect;
use xinxian::marker::MarkerDictionary;
use xinxian::output::draw::fill_rect;

pub const WHITE: [u8; 3] = [255, 255, 255];
pub const RED: [u8; 3] = [220, 20, 20];

/// 白底画布上放一个标记，单元格 `cell` 像素
pub fn canvas_with_marker(
  width: u32,
  height: u32,
  id: u32,
  x: i64,
  y: i64,
  cell: u32,
) -> RgbImage {
  let marker = MarkerDictionary::builtin()
    .render_marker(id, cell)
    .expect("marker id in builtin dictionary");
  let marker = DynamicImage::ImageLuma8(marker).to_rgb8();
  let mut canvas = RgbImage::from_pixel(width, height, Rgb(WHITE));
  imageops::overlay(&mut canvas, &marker, x, y);
  canvas
}

/// 800x400 标签：标记 #7 位于 (50,50)，右侧 x >= 200 处的指示条涂成 `strip`
pub fn label(strip: [u8; 3]) -> RgbImage {
  let mut canvas = canvas_with_marker(800, 400, 7, 50, 50, 20);
  fill_rect(&mut canvas, &PixelRect::new(200, 0, 600, 400), strip);
  canvas
}

/// 二维码左上角（含静区）在标签中的位置，位于标记下方、指示条左侧
pub const QR_ORIGIN: (i64, i64) = (10, 190);

/// 二维码图像，模块 4 像素，带静区
pub fn qr_image(text: &str) -> RgbImage {
  let code = QrCode::new(text.as_bytes()).expect("text fits in a QR symbol");
  let qr = code
    .render::<Luma<u8>>()
    .module_dimensions(4, 4)
    .build();
  DynamicImage::ImageLuma8(qr).to_rgb8()
}

/// 在 `label` 的基础上于标记下方贴一个二维码
pub fn label_with_qr(strip: [u8; 3], text: &str) -> RgbImage {
  let mut canvas = label(strip);
  imageops::overlay(&mut canvas, &qr_image(text), QR_ORIGIN.0, QR_ORIGIN.1);
  canvas
}
