// 该文件是 Xinxian （新鲜） 项目的一部分。
// src/frame.rs - 帧与像素几何定义
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

use image::{GrayImage, RgbImage};
use serde::Serialize;

/// 帧数据
#[derive(Debug, Clone)]
pub struct Frame {
  /// RGB 图像数据
  pub image: RgbImage,
  /// 帧索引
  pub index: u64,
  /// 时间戳（毫秒）
  pub timestamp_ms: u64,
}

impl Frame {
  pub fn still(image: RgbImage) -> Self {
    Self {
      image,
      index: 0,
      timestamp_ms: 0,
    }
  }

  pub fn width(&self) -> u32 {
    self.image.width()
  }

  pub fn height(&self) -> u32 {
    self.image.height()
  }
}

impl AsRef<RgbImage> for Frame {
  fn as_ref(&self) -> &RgbImage {
    &self.image
  }
}

/// 转为灰度图
pub fn to_gray(image: &RgbImage) -> GrayImage {
  image::imageops::grayscale(image)
}

/// 图像坐标中的亚像素点
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Point2 {
  pub x: f32,
  pub y: f32,
}

impl Point2 {
  pub const fn new(x: f32, y: f32) -> Self {
    Self { x, y }
  }

  pub fn distance(&self, other: &Point2) -> f32 {
    ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
  }
}

/// 轴对齐矩形 (x, y, w, h)，单位为像素
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct PixelRect {
  pub x: i32,
  pub y: i32,
  pub w: i32,
  pub h: i32,
}

impl PixelRect {
  pub const fn new(x: i32, y: i32, w: i32, h: i32) -> Self {
    Self { x, y, w, h }
  }

  /// 四个角点的外接矩形，坐标按整数截断
  pub fn bounding(points: &[Point2]) -> Self {
    if points.is_empty() {
      return Self::default();
    }
    let xs = points.iter().map(|p| p.x as i32);
    let ys = points.iter().map(|p| p.y as i32);
    let x_min = xs.clone().min().unwrap_or(0);
    let x_max = xs.max().unwrap_or(0);
    let y_min = ys.clone().min().unwrap_or(0);
    let y_max = ys.max().unwrap_or(0);
    Self::new(x_min, y_min, x_max - x_min, y_max - y_min)
  }

  pub fn is_empty(&self) -> bool {
    self.w <= 0 || self.h <= 0
  }

  /// 与图像范围求交，返回 (x0, y0, x1, y1)，x1/y1 不含
  pub fn clamp_to(&self, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
    let x0 = self.x.max(0) as i64;
    let y0 = self.y.max(0) as i64;
    let x1 = (self.x as i64 + self.w as i64).min(width as i64);
    let y1 = (self.y as i64 + self.h as i64).min(height as i64);
    if x1 <= x0 || y1 <= y0 {
      return None;
    }
    Some((x0 as u32, y0 as u32, x1 as u32, y1 as u32))
  }
}
