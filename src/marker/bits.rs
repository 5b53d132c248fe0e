// 该文件是 Xinxian （新鲜） 项目的一部分。
// src/marker/bits.rs - 单元格采样
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

use image::GrayImage;

use super::dictionary::{MARKER_BITS, MARKER_CELLS};
use super::homography;
use crate::frame::Point2;

const SAMPLE_OFFSETS: [f64; 3] = [0.3, 0.5, 0.7];
/// 单元格均值的最小动态范围，低于此值视为均匀区域
const MIN_CELL_CONTRAST: f32 = 10.0;

/// 透视采样 6×6 单元格，校验黑色边框后返回 4×4 数据位
pub fn read_bits(image: &GrayImage, corners: &[Point2; 4], max_border_error_rate: f32) -> Option<u16> {
  let n = MARKER_CELLS as f64;
  let canonical = [[0.0, 0.0], [n, 0.0], [n, n], [0.0, n]];
  let h = homography::from_quad(&canonical, corners)?;
  let (width, height) = image.dimensions();

  let cells = MARKER_CELLS as usize;
  let mut means = vec![0f32; cells * cells];
  for row in 0..cells {
    for col in 0..cells {
      let mut sum = 0f32;
      let mut count = 0u32;
      for oy in SAMPLE_OFFSETS {
        for ox in SAMPLE_OFFSETS {
          let [x, y] = homography::project(&h, col as f64 + ox, row as f64 + oy)?;
          let (px, py) = (x.round(), y.round());
          if px < 0.0 || py < 0.0 || px >= width as f64 || py >= height as f64 {
            return None;
          }
          sum += image.get_pixel(px as u32, py as u32)[0] as f32;
          count += 1;
        }
      }
      means[row * cells + col] = sum / count as f32;
    }
  }

  let lo = means.iter().copied().fold(f32::MAX, f32::min);
  let hi = means.iter().copied().fold(f32::MIN, f32::max);
  if hi - lo < MIN_CELL_CONTRAST {
    return None;
  }
  let threshold = (lo + hi) / 2.0;
  let white = |row: usize, col: usize| means[row * cells + col] > threshold;

  let border_cells = 4 * (cells - 1);
  let max_errors = (border_cells as f32 * max_border_error_rate).floor() as usize;
  let border_errors = (0..cells)
    .flat_map(|row| (0..cells).map(move |col| (row, col)))
    .filter(|&(row, col)| row == 0 || col == 0 || row == cells - 1 || col == cells - 1)
    .filter(|&(row, col)| white(row, col))
    .count();
  if border_errors > max_errors {
    return None;
  }

  let bits = MARKER_BITS as usize;
  let mut code = 0u16;
  for row in 0..bits {
    for col in 0..bits {
      code <<= 1;
      if white(row + 1, col + 1) {
        code |= 1;
      }
    }
  }
  Some(code)
}
