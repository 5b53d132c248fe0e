// 该文件是 Xinxian （新鲜） 项目的一部分。
// src/output/draw.rs - 检测结果叠加层绘制
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

use ab_glyph::{FontArc, PxScale};
use image::{GenericImage, Rgb, RgbImage};
use imageproc::drawing::{
  draw_filled_circle_mut, draw_filled_rect_mut, draw_hollow_rect_mut, draw_line_segment_mut,
  draw_text_mut,
};
use imageproc::rect::Rect;
use thiserror::Error;
use tracing::info;

use crate::classify::SpoilageLevel;
use crate::detector::Detection;
use crate::frame::{PixelRect, Point2};

// 颜色均为 RGB
const MARKER_COLOR: [u8; 3] = [0, 0, 255];
const PAYLOAD_COLOR: [u8; 3] = [0, 255, 0];
const SAFE_COLOR: [u8; 3] = [0, 255, 0];
const UNSAFE_COLOR: [u8; 3] = [255, 0, 0];
const PANEL_COLOR: [u8; 3] = [40, 40, 40];
const TEXT_COLOR: [u8; 3] = [255, 255, 255];
const DIM_TEXT_COLOR: [u8; 3] = [200, 200, 200];

const PANEL_HEIGHT: u32 = 200;
const RECOMMENDATION_CHARS: usize = 70;
const FONT_SIZE: f32 = 20.0;

#[derive(Error, Debug)]
pub enum DrawError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("字体文件无效: {0}")]
  InvalidFont(#[from] ab_glyph::InvalidFont),
}

/// 等级对应的状态颜色
pub fn level_color(level: SpoilageLevel) -> [u8; 3] {
  match level {
    SpoilageLevel::Fresh => [0, 255, 0],
    SpoilageLevel::Slight => [255, 255, 0],
    SpoilageLevel::Moderate => [255, 165, 0],
    SpoilageLevel::Spoiled => [255, 0, 0],
    SpoilageLevel::Unknown => [128, 128, 128],
  }
}

/// 叠加层绘制器；没有字体时只画几何图形
#[derive(Clone, Default)]
pub struct Draw {
  font: Option<FontArc>,
}

impl std::fmt::Debug for Draw {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Draw")
      .field("font", &self.font.is_some())
      .finish()
  }
}

impl Draw {
  pub fn with_font(font: FontArc) -> Self {
    Self { font: Some(font) }
  }

  pub fn with_font_file(path: &Path) -> Result<Self, DrawError> {
    let data = std::fs::read(path)?;
    let font = FontArc::try_from_vec(data)?;
    info!("加载字体: {}", path.display());
    Ok(Self::with_font(font))
  }

  pub fn has_font(&self) -> bool {
    self.font.is_some()
  }

  fn text(&self, image: &mut RgbImage, text: &str, x: i32, y: i32, size: f32, color: [u8; 3]) {
    if let Some(font) = &self.font {
      draw_text_mut(image, Rgb(color), x, y, PxScale::from(size), font, text);
    }
  }

  /// 原图加上检测叠加层；有检测时在下方拼接状态面板
  pub fn draw_overlay(&self, image: &RgbImage, detection: Option<&Detection>) -> RgbImage {
    let Some(detection) = detection else {
      return image.clone();
    };
    let mut canvas = image.clone();
    self.draw_geometry(&mut canvas, detection);

    let (width, height) = canvas.dimensions();
    let mut output = RgbImage::from_pixel(width, height + PANEL_HEIGHT, Rgb(PANEL_COLOR));
    // 尺寸一致，不会越界
    let _ = output.copy_from(&canvas, 0, 0);
    self.draw_panel(&mut output, height, detection);
    output
  }

  fn draw_geometry(&self, image: &mut RgbImage, detection: &Detection) {
    let result = &detection.result;
    let corners = &detection.marker.corners;
    draw_polygon(image, corners, MARKER_COLOR, 3);
    self.text(
      image,
      &format!("ArUco #{}", result.marker_id),
      corners[0].x as i32,
      corners[0].y as i32 - 24,
      FONT_SIZE,
      MARKER_COLOR,
    );

    if let Some(polygon) = &detection.payload_polygon {
      draw_polygon(image, polygon, PAYLOAD_COLOR, 2);
    }

    let color = if result.is_safe { SAFE_COLOR } else { UNSAFE_COLOR };
    draw_rect(image, &detection.region, color, 2);
    self.text(
      image,
      "Indicator",
      detection.region.x,
      detection.region.y - 20,
      FONT_SIZE * 0.8,
      color,
    );
  }

  fn draw_panel(&self, image: &mut RgbImage, top: u32, detection: &Detection) {
    let result = &detection.result;
    let top = top as i32;
    let status = level_color(result.spoilage_level);
    draw_filled_circle_mut(image, (50, top + 50), 30, Rgb(status));

    self.text(
      image,
      &format!("Package: {}", result.package_id),
      100,
      top + 14,
      FONT_SIZE,
      TEXT_COLOR,
    );
    self.text(
      image,
      &format!(
        "Product: {} | ArUco: {}",
        result.product_type, result.marker_id
      ),
      100,
      top + 44,
      FONT_SIZE * 0.85,
      DIM_TEXT_COLOR,
    );
    self.text(
      image,
      &format!("Status: {}", result.spoilage_level),
      100,
      top + 72,
      FONT_SIZE * 1.1,
      status,
    );
    self.text(
      image,
      &format!(
        "Spoilage: {:.1}%  |  Confidence: {:.1}%",
        result.spoilage_percentage, result.confidence
      ),
      100,
      top + 104,
      FONT_SIZE * 0.85,
      DIM_TEXT_COLOR,
    );

    let recommendation: String = result.recommendation.chars().take(RECOMMENDATION_CHARS).collect();
    let color = if result.is_safe { SAFE_COLOR } else { UNSAFE_COLOR };
    self.text(image, &recommendation, 20, top + 146, FONT_SIZE * 0.75, color);
  }
}

/// 闭合折线，`thickness` 像素粗
pub fn draw_polygon(image: &mut RgbImage, points: &[Point2], color: [u8; 3], thickness: i32) {
  if points.len() < 2 {
    return;
  }
  let half = thickness / 2;
  for i in 0..points.len() {
    let a = points[i];
    let b = points[(i + 1) % points.len()];
    for dy in -half..=half {
      for dx in -half..=half {
        let (ox, oy) = (dx as f32, dy as f32);
        draw_line_segment_mut(image, (a.x + ox, a.y + oy), (b.x + ox, b.y + oy), Rgb(color));
      }
    }
  }
}

/// 空心矩形，向内加粗
pub fn draw_rect(image: &mut RgbImage, rect: &PixelRect, color: [u8; 3], thickness: i32) {
  for t in 0..thickness {
    let (w, h) = (rect.w - 2 * t, rect.h - 2 * t);
    if w <= 0 || h <= 0 {
      break;
    }
    let r = Rect::at(rect.x + t, rect.y + t).of_size(w as u32, h as u32);
    draw_hollow_rect_mut(image, r, Rgb(color));
  }
}

/// 实心矩形，用于测试与标签渲染
pub fn fill_rect(image: &mut RgbImage, rect: &PixelRect, color: [u8; 3]) {
  if rect.is_empty() {
    return;
  }
  let r = Rect::at(rect.x, rect.y).of_size(rect.w as u32, rect.h as u32);
  draw_filled_rect_mut(image, r, Rgb(color));
}
