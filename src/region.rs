// 该文件是 Xinxian （新鲜） 项目的一部分。
// src/region.rs - 指示条区域映射
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

//! 指示条不做检测，而是按标签版式从标记的外接矩形推算：
//! 指示条位于标记右侧，宽约为标记的 3.2 倍、高约 0.7 倍，
//! 只取其中间 50% 的宽度采样。

use tracing::debug;

use crate::frame::PixelRect;

/// 标签版式比例（均相对标记宽或高）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegionLayout {
  pub gap_ratio: f64,
  pub strip_width_ratio: f64,
  pub strip_height_ratio: f64,
  /// 指示条相对标记上移的比例
  pub lift_ratio: f64,
  pub center_start_ratio: f64,
  pub center_width_ratio: f64,
  /// 超出画面时保留的边距（像素）
  pub clip_margin: i32,
}

impl Default for RegionLayout {
  fn default() -> Self {
    Self {
      gap_ratio: 0.2,
      strip_width_ratio: 3.2,
      strip_height_ratio: 0.7,
      lift_ratio: 0.2,
      center_start_ratio: 0.25,
      center_width_ratio: 0.5,
      clip_margin: 5,
    }
  }
}

/// 比例换算后向零截断
fn scaled(value: i32, ratio: f64) -> i32 {
  (value as f64 * ratio) as i32
}

impl RegionLayout {
  /// 由标记矩形推算采样矩形；裁剪后为空时返回 `None`
  pub fn map_region(&self, marker: &PixelRect, frame_w: u32, frame_h: u32) -> Option<PixelRect> {
    let PixelRect { x, y, w, h } = *marker;
    let gap = scaled(w, self.gap_ratio);
    let strip_width = scaled(w, self.strip_width_ratio);
    let strip_height = scaled(h, self.strip_height_ratio);

    let indicator_x = x + w + gap;
    let mut indicator_y = y - scaled(h, self.lift_ratio);
    if indicator_y < 0 {
      indicator_y = y;
    }
    debug!(
      "指示条全区域: x={}, y={}, w={}, h={}",
      indicator_x, indicator_y, strip_width, strip_height
    );

    let mut region = PixelRect::new(
      indicator_x + scaled(strip_width, self.center_start_ratio),
      indicator_y,
      scaled(strip_width, self.center_width_ratio),
      strip_height,
    );

    let (frame_w, frame_h) = (frame_w as i32, frame_h as i32);
    if region.x + region.w > frame_w {
      region.w = frame_w - region.x - self.clip_margin;
    }
    if region.y + region.h > frame_h {
      region.h = frame_h - region.y - self.clip_margin;
    }
    debug!(
      "采样区域: x={}, y={}, w={}, h={}",
      region.x, region.y, region.w, region.h
    );

    (!region.is_empty()).then_some(region)
  }
}

/// 使用默认版式推算采样矩形
pub fn map_region(marker: &PixelRect, frame_w: u32, frame_h: u32) -> Option<PixelRect> {
  RegionLayout::default().map_region(marker, frame_w, frame_h)
}
