// 该文件是 Xinxian （新鲜） 项目的一部分。
// src/classify.rs - 指示条颜色分级
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

use std::fmt;

use image::RgbImage;
use serde::Serialize;
use tracing::debug;

use crate::frame::PixelRect;

/// 变质等级，按严重程度排序；UNKNOWN 没有测量值，排在最前
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SpoilageLevel {
  Unknown,
  Fresh,
  Slight,
  Moderate,
  Spoiled,
}

impl SpoilageLevel {
  /// 非白色像素占比对应的等级
  pub fn from_percentage(spoiled_percent: f64) -> Self {
    if spoiled_percent < 10.0 {
      SpoilageLevel::Fresh
    } else if spoiled_percent < 20.0 {
      SpoilageLevel::Slight
    } else if spoiled_percent < 40.0 {
      SpoilageLevel::Moderate
    } else {
      SpoilageLevel::Spoiled
    }
  }

  pub fn is_safe(&self) -> bool {
    matches!(self, SpoilageLevel::Fresh | SpoilageLevel::Slight)
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      SpoilageLevel::Fresh => "FRESH",
      SpoilageLevel::Slight => "SLIGHT",
      SpoilageLevel::Moderate => "MODERATE",
      SpoilageLevel::Spoiled => "SPOILED",
      SpoilageLevel::Unknown => "UNKNOWN",
    }
  }

  pub fn recommendation(&self) -> &'static str {
    match self {
      SpoilageLevel::Fresh => "Product is fresh and safe for consumption.",
      SpoilageLevel::Slight => "Product shows slight changes. Use within 24 hours.",
      SpoilageLevel::Moderate => "Noticeable spoilage detected. Use immediately or discard.",
      SpoilageLevel::Spoiled => "Product is spoiled. DO NOT CONSUME. Dispose safely.",
      SpoilageLevel::Unknown => "Unable to determine spoilage level. Inspect manually.",
    }
  }
}

impl fmt::Display for SpoilageLevel {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// “新鲜”像素的 HSV 范围（8 位约定，H ∈ [0,180]），上下界均包含
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreshRange {
  pub lower: [u8; 3],
  pub upper: [u8; 3],
}

impl Default for FreshRange {
  fn default() -> Self {
    Self {
      lower: [0, 0, 180],
      upper: [180, 40, 255],
    }
  }
}

impl FreshRange {
  pub fn contains(&self, hsv: [u8; 3]) -> bool {
    (0..3).all(|i| self.lower[i] <= hsv[i] && hsv[i] <= self.upper[i])
  }
}

/// 采样区域的颜色统计，数值保留两位小数
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColorReadings {
  pub fresh_percent: f64,
  pub spoiled_percent: f64,
  pub avg_hue: f64,
  pub avg_saturation: f64,
  pub avg_value: f64,
  /// B, G, R 顺序
  pub avg_bgr: [f64; 3],
  pub qr_verified: bool,
}

impl ColorReadings {
  /// 两类占比之和，上限 100
  pub fn confidence(&self) -> f64 {
    (self.fresh_percent + self.spoiled_percent).min(100.0)
  }
}

/// 分级结果；`readings` 为空表示采样区域没有像素
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
  pub level: SpoilageLevel,
  pub percentage: f64,
  pub readings: Option<ColorReadings>,
}

impl Classification {
  pub fn unknown() -> Self {
    Self {
      level: SpoilageLevel::Unknown,
      percentage: 0.0,
      readings: None,
    }
  }

  pub fn confidence(&self) -> f64 {
    self.readings.as_ref().map(|r| r.confidence()).unwrap_or(0.0)
  }
}

pub fn round2(value: f64) -> f64 {
  (value * 100.0).round() / 100.0
}

/// RGB 转 8 位 HSV：H ∈ [0,180)，S、V ∈ [0,255]
pub fn rgb_to_hsv(rgb: [u8; 3]) -> [u8; 3] {
  let [r, g, b] = rgb.map(|c| c as i32);
  let v = r.max(g).max(b);
  let min = r.min(g).min(b);
  let diff = v - min;
  let s = if v == 0 {
    0.0
  } else {
    (255.0 * diff as f64 / v as f64).round()
  };
  let h = if diff == 0 {
    0.0
  } else {
    let sector = if v == r {
      (g - b) as f64
    } else if v == g {
      (b - r + 2 * diff) as f64
    } else {
      (r - g + 4 * diff) as f64
    };
    let mut h = (30.0 * sector / diff as f64).round();
    if h < 0.0 {
      h += 180.0;
    }
    if h >= 180.0 {
      h -= 180.0;
    }
    h
  };
  [h as u8, s as u8, v as u8]
}

/// 颜色分级器
#[derive(Debug, Clone, Copy, Default)]
pub struct ColorClassifier {
  pub fresh: FreshRange,
}

impl ColorClassifier {
  pub fn new(fresh: FreshRange) -> Self {
    Self { fresh }
  }

  /// 统计区域内非“新鲜”像素的占比并分级；区域为空时为 UNKNOWN
  pub fn classify(&self, image: &RgbImage, region: &PixelRect) -> Classification {
    let Some((x0, y0, x1, y1)) = region.clamp_to(image.width(), image.height()) else {
      debug!("采样区域为空: {:?}", region);
      return Classification::unknown();
    };

    let mut fresh = 0u64;
    let mut total = 0u64;
    let mut hsv_sum = [0f64; 3];
    let mut rgb_sum = [0f64; 3];
    for y in y0..y1 {
      for x in x0..x1 {
        let rgb = image.get_pixel(x, y).0;
        let hsv = rgb_to_hsv(rgb);
        if self.fresh.contains(hsv) {
          fresh += 1;
        }
        for i in 0..3 {
          hsv_sum[i] += hsv[i] as f64;
          rgb_sum[i] += rgb[i] as f64;
        }
        total += 1;
      }
    }

    let n = total as f64;
    let spoiled_percent = (total - fresh) as f64 / n * 100.0;
    let level = SpoilageLevel::from_percentage(spoiled_percent);
    // 只对一侧取整，另一侧取补数，两者之和恒为 100
    let fresh_rounded = round2(fresh as f64 / n * 100.0);
    let readings = ColorReadings {
      fresh_percent: fresh_rounded,
      spoiled_percent: 100.0 - fresh_rounded,
      avg_hue: round2(hsv_sum[0] / n),
      avg_saturation: round2(hsv_sum[1] / n),
      avg_value: round2(hsv_sum[2] / n),
      avg_bgr: [
        round2(rgb_sum[2] / n),
        round2(rgb_sum[1] / n),
        round2(rgb_sum[0] / n),
      ],
      qr_verified: false,
    };
    debug!(
      "颜色分级: {} (非白色 {:.2}%, 像素 {})",
      level, spoiled_percent, total
    );

    Classification {
      level,
      percentage: spoiled_percent,
      readings: Some(readings),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::Rgb;

  #[test]
  fn hsv_matches_eight_bit_convention() {
    assert_eq!(rgb_to_hsv([255, 255, 255]), [0, 0, 255]);
    assert_eq!(rgb_to_hsv([0, 0, 0]), [0, 0, 0]);
    assert_eq!(rgb_to_hsv([255, 0, 0]), [0, 255, 255]);
    assert_eq!(rgb_to_hsv([0, 255, 0]), [60, 255, 255]);
    assert_eq!(rgb_to_hsv([0, 0, 255]), [120, 255, 255]);
    assert_eq!(rgb_to_hsv([255, 0, 255]), [150, 255, 255]);
    assert_eq!(rgb_to_hsv([200, 200, 180]), [30, 26, 200]);
  }

  #[test]
  fn level_thresholds() {
    assert_eq!(SpoilageLevel::from_percentage(0.0), SpoilageLevel::Fresh);
    assert_eq!(SpoilageLevel::from_percentage(9.99), SpoilageLevel::Fresh);
    assert_eq!(SpoilageLevel::from_percentage(10.0), SpoilageLevel::Slight);
    assert_eq!(SpoilageLevel::from_percentage(19.99), SpoilageLevel::Slight);
    assert_eq!(SpoilageLevel::from_percentage(20.0), SpoilageLevel::Moderate);
    assert_eq!(SpoilageLevel::from_percentage(39.99), SpoilageLevel::Moderate);
    assert_eq!(SpoilageLevel::from_percentage(40.0), SpoilageLevel::Spoiled);
    assert_eq!(SpoilageLevel::from_percentage(100.0), SpoilageLevel::Spoiled);
  }

  #[test]
  fn severity_order_follows_percentage() {
    let mut previous = SpoilageLevel::from_percentage(0.0);
    for step in 1..=1000 {
      let level = SpoilageLevel::from_percentage(step as f64 * 0.1);
      assert!(level >= previous, "{} < {} at {}", level, previous, step);
      previous = level;
    }
    assert!(SpoilageLevel::Fresh < SpoilageLevel::Slight);
    assert!(SpoilageLevel::Moderate < SpoilageLevel::Spoiled);
    assert!(SpoilageLevel::Unknown < SpoilageLevel::Fresh);
    assert_eq!(
      [SpoilageLevel::Spoiled, SpoilageLevel::Fresh, SpoilageLevel::Moderate]
        .into_iter()
        .max(),
      Some(SpoilageLevel::Spoiled)
    );
  }

  #[test]
  fn percentages_always_sum_to_hundred() {
    let classifier = ColorClassifier::default();
    for (w, h) in [(40u32, 20u32), (7, 3), (13, 11), (33, 1), (160, 70)] {
      let total = w * h;
      for fresh in (0..=total).step_by((total as usize / 37).max(1)) {
        let mut img = RgbImage::from_pixel(w, h, Rgb([200, 30, 30]));
        for i in 0..fresh {
          img.put_pixel(i % w, i / w, Rgb([255, 255, 255]));
        }
        let c = classifier.classify(&img, &PixelRect::new(0, 0, w as i32, h as i32));
        let r = c.readings.unwrap();
        assert_eq!(
          r.fresh_percent + r.spoiled_percent,
          100.0,
          "{}x{} fresh {}",
          w,
          h,
          fresh
        );
      }
    }
  }

  #[test]
  fn single_white_pixel_keeps_complement() {
    let mut img = RgbImage::from_pixel(40, 20, Rgb([0, 0, 0]));
    img.put_pixel(0, 0, Rgb([255, 255, 255]));
    let c = ColorClassifier::default().classify(&img, &PixelRect::new(0, 0, 40, 20));
    let r = c.readings.unwrap();
    assert_eq!(r.fresh_percent, 0.13);
    assert_eq!(r.fresh_percent + r.spoiled_percent, 100.0);
    assert_eq!(c.level, SpoilageLevel::Spoiled);
  }

  #[test]
  fn safety_and_wording() {
    assert!(SpoilageLevel::Fresh.is_safe());
    assert!(SpoilageLevel::Slight.is_safe());
    assert!(!SpoilageLevel::Moderate.is_safe());
    assert!(!SpoilageLevel::Unknown.is_safe());
    assert!(SpoilageLevel::Spoiled.recommendation().contains("DO NOT CONSUME"));
    assert_eq!(
      serde_json::to_string(&SpoilageLevel::Moderate).unwrap(),
      "\"MODERATE\""
    );
  }

  #[test]
  fn fresh_range_boundaries_are_inclusive() {
    let range = FreshRange::default();
    assert!(range.contains([0, 40, 180]));
    assert!(range.contains([180, 0, 255]));
    assert!(!range.contains([0, 41, 255]));
    assert!(!range.contains([0, 0, 179]));
  }

  #[test]
  fn white_region_is_fresh() {
    let img = RgbImage::from_pixel(50, 20, Rgb([250, 250, 250]));
    let c = ColorClassifier::default().classify(&img, &PixelRect::new(10, 5, 20, 10));
    assert_eq!(c.level, SpoilageLevel::Fresh);
    assert_eq!(c.percentage, 0.0);
    let r = c.readings.unwrap();
    assert_eq!(r.fresh_percent, 100.0);
    assert_eq!(r.avg_bgr, [250.0, 250.0, 250.0]);
    assert!(!r.qr_verified);
  }

  #[test]
  fn quarter_colored_region_is_moderate() {
    let mut img = RgbImage::from_pixel(40, 10, Rgb([255, 255, 255]));
    for y in 0..10 {
      for x in 0..10 {
        img.put_pixel(x, y, Rgb([200, 30, 30]));
      }
    }
    let c = ColorClassifier::default().classify(&img, &PixelRect::new(0, 0, 40, 10));
    assert_eq!(c.level, SpoilageLevel::Moderate);
    assert_eq!(c.percentage, 25.0);
    let r = c.readings.as_ref().unwrap();
    assert_eq!(r.spoiled_percent, 25.0);
    assert_eq!(r.fresh_percent, 75.0);
    assert_eq!(c.confidence(), 100.0);
  }

  #[test]
  fn region_outside_image_is_unknown() {
    let img = RgbImage::new(30, 30);
    let c = ColorClassifier::default().classify(&img, &PixelRect::new(40, 0, 10, 10));
    assert_eq!(c, Classification::unknown());
    assert_eq!(c.confidence(), 0.0);
  }

  #[test]
  fn partial_region_is_clipped() {
    let img = RgbImage::from_pixel(30, 30, Rgb([0, 0, 0]));
    let c = ColorClassifier::default().classify(&img, &PixelRect::new(25, 25, 10, 10));
    assert_eq!(c.level, SpoilageLevel::Spoiled);
    assert_eq!(c.percentage, 100.0);
  }
}
