// 该文件是 Xinxian （新鲜） 项目的一部分。
// src/preprocess.rs - 图像预处理变体
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

use image::{GrayImage, ImageBuffer, Luma, RgbImage};
use imageproc::contrast::{
  ThresholdType, adaptive_threshold, equalize_histogram, otsu_level, threshold,
};
use imageproc::distance_transform::Norm;
use imageproc::filter::{filter_clamped, gaussian_blur_f32};
use imageproc::kernel::Kernel;
use imageproc::map::map_pixels2;
use imageproc::morphology::close;

/// 标记检测所用的灰度预处理变体
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Variant {
  /// 原始灰度
  Gray,
  /// 直方图均衡化
  Equalized,
  /// 限制对比度自适应直方图均衡化
  Clahe { clip_limit: f32, tiles: u32 },
  /// 3×3 锐化
  Sharpened,
  /// Otsu 二值化
  Otsu,
  /// 固定阈值二值化
  Binary(u8),
  /// 高斯加权自适应阈值
  AdaptiveGaussian { block: u32, c: i32 },
  /// 均值自适应阈值
  AdaptiveMean { block: u32, c: i32 },
  /// Otsu 二值化后做 3×3 闭运算
  OtsuClosed,
}

/// 标记定位的变体顺序
pub const MARKER_VARIANTS: [Variant; 10] = [
  Variant::Gray,
  Variant::Equalized,
  Variant::Clahe {
    clip_limit: 2.0,
    tiles: 8,
  },
  Variant::Clahe {
    clip_limit: 3.0,
    tiles: 4,
  },
  Variant::Sharpened,
  Variant::Otsu,
  Variant::Binary(127),
  Variant::AdaptiveGaussian { block: 11, c: 2 },
  Variant::AdaptiveMean { block: 15, c: 5 },
  Variant::OtsuClosed,
];

impl Variant {
  pub fn name(&self) -> &'static str {
    match self {
      Variant::Gray => "gray",
      Variant::Equalized => "equalized",
      Variant::Clahe { .. } => "clahe",
      Variant::Sharpened => "sharpened",
      Variant::Otsu => "otsu",
      Variant::Binary(_) => "binary",
      Variant::AdaptiveGaussian { .. } => "adaptive_gaussian",
      Variant::AdaptiveMean { .. } => "adaptive_mean",
      Variant::OtsuClosed => "otsu_closed",
    }
  }

  pub fn apply(&self, gray: &GrayImage) -> GrayImage {
    match *self {
      Variant::Gray => gray.clone(),
      Variant::Equalized => equalize_histogram(gray),
      Variant::Clahe { clip_limit, tiles } => clahe(gray, tiles, tiles, clip_limit),
      Variant::Sharpened => sharpen(gray),
      Variant::Otsu => otsu_binary(gray),
      Variant::Binary(level) => threshold(gray, level, ThresholdType::Binary),
      Variant::AdaptiveGaussian { block, c } => {
        let local = gaussian_blur_f32(gray, gaussian_sigma(block));
        // 像素大于局部加权均值减 c 时置白
        map_pixels2(gray, &local, |p: Luma<u8>, m: Luma<u8>| {
          if p[0] as i32 > m[0] as i32 - c {
            Luma([255u8])
          } else {
            Luma([0u8])
          }
        })
      }
      Variant::AdaptiveMean { block, c } => adaptive_threshold(gray, block / 2, c),
      Variant::OtsuClosed => close(&otsu_binary(gray), Norm::LInf, 1),
    }
  }
}

/// 惰性计算并缓存各变体，跨配置复用
pub struct VariantCache<'a> {
  gray: &'a GrayImage,
  images: Vec<Option<GrayImage>>,
}

impl<'a> VariantCache<'a> {
  pub fn new(gray: &'a GrayImage) -> Self {
    Self {
      gray,
      images: Vec::new(),
    }
  }

  pub fn get(&mut self, index: usize, variant: &Variant) -> &GrayImage {
    if self.images.len() <= index {
      self.images.resize_with(index + 1, || None);
    }
    let gray = self.gray;
    self.images[index].get_or_insert_with(|| variant.apply(gray))
  }
}

/// 高斯核尺寸对应的标准差（与常见视觉库的约定一致）
fn gaussian_sigma(block: u32) -> f32 {
  0.3 * ((block as f32 - 1.0) * 0.5 - 1.0) + 0.8
}

pub fn otsu_binary(gray: &GrayImage) -> GrayImage {
  let level = otsu_level(gray);
  threshold(gray, level, ThresholdType::Binary)
}

const SHARPEN_KERNEL: [f32; 9] = [-1.0, -1.0, -1.0, -1.0, 9.0, -1.0, -1.0, -1.0, -1.0];

/// 3×3 锐化，边缘按最近像素延拓
pub fn sharpen(gray: &GrayImage) -> GrayImage {
  filter_clamped::<_, f32, u8>(gray, Kernel::new(&SHARPEN_KERNEL, 3, 3))
}

/// 逐通道锐化彩色图
pub fn sharpen_rgb(image: &RgbImage) -> RgbImage {
  filter_clamped::<_, f32, u8>(image, Kernel::new(&SHARPEN_KERNEL, 3, 3))
}

/// 限制对比度的分块直方图均衡化，块间双线性插值
pub fn clahe(gray: &GrayImage, tiles_x: u32, tiles_y: u32, clip_limit: f32) -> GrayImage {
  let (w, h) = (gray.width() as usize, gray.height() as usize);
  let (tiles_x, tiles_y) = (tiles_x as usize, tiles_y as usize);
  if w == 0 || h == 0 || tiles_x == 0 || tiles_y == 0 {
    return gray.clone();
  }
  let tile_w = w / tiles_x;
  let tile_h = h / tiles_y;
  if tile_w == 0 || tile_h == 0 {
    return gray.clone();
  }

  let mut maps = vec![[0u8; 256]; tiles_x * tiles_y];
  for ty in 0..tiles_y {
    for tx in 0..tiles_x {
      let x0 = tx * tile_w;
      let y0 = ty * tile_h;
      let x1 = if tx == tiles_x - 1 { w } else { x0 + tile_w };
      let y1 = if ty == tiles_y - 1 { h } else { y0 + tile_h };
      let tile_pixels = (x1 - x0) * (y1 - y0);

      let mut hist = [0u32; 256];
      for row in y0..y1 {
        for col in x0..x1 {
          hist[gray.get_pixel(col as u32, row as u32)[0] as usize] += 1;
        }
      }

      // 截断并重新分配超出部分
      let clip = ((clip_limit * tile_pixels as f32 / 256.0) as u32).max(1);
      let mut excess = 0u32;
      for bin in hist.iter_mut() {
        if *bin > clip {
          excess += *bin - clip;
          *bin = clip;
        }
      }
      let per_bin = excess / 256;
      let remainder = (excess % 256) as usize;
      for (i, bin) in hist.iter_mut().enumerate() {
        *bin += per_bin;
        if i < remainder {
          *bin += 1;
        }
      }

      let mut cdf = [0u32; 256];
      cdf[0] = hist[0];
      for i in 1..256 {
        cdf[i] = cdf[i - 1] + hist[i];
      }
      let cdf_min = cdf.iter().copied().find(|&v| v > 0).unwrap_or(0);
      let denom = cdf[255].saturating_sub(cdf_min);

      let map = &mut maps[ty * tiles_x + tx];
      for (i, slot) in map.iter_mut().enumerate() {
        *slot = if denom == 0 {
          i as u8
        } else {
          let value = cdf[i].saturating_sub(cdf_min) as f32 / denom as f32 * 255.0;
          value.min(255.0) as u8
        };
      }
    }
  }

  let tw = tile_w as f32;
  let th = tile_h as f32;
  let last_x = tiles_x as i32 - 1;
  let last_y = tiles_y as i32 - 1;
  ImageBuffer::from_fn(w as u32, h as u32, |x, y| {
    let pixel = gray.get_pixel(x, y)[0] as usize;
    let fx = (x as f32 + 0.5) / tw - 0.5;
    let fy = (y as f32 + 0.5) / th - 0.5;

    let tx0 = (fx.floor() as i32).clamp(0, last_x) as usize;
    let tx1 = (fx.floor() as i32 + 1).clamp(0, last_x) as usize;
    let ty0 = (fy.floor() as i32).clamp(0, last_y) as usize;
    let ty1 = (fy.floor() as i32 + 1).clamp(0, last_y) as usize;
    let ax = fx - fx.floor();
    let ay = fy - fy.floor();

    let v00 = maps[ty0 * tiles_x + tx0][pixel] as f32;
    let v10 = maps[ty0 * tiles_x + tx1][pixel] as f32;
    let v01 = maps[ty1 * tiles_x + tx0][pixel] as f32;
    let v11 = maps[ty1 * tiles_x + tx1][pixel] as f32;

    let top = v00 * (1.0 - ax) + v10 * ax;
    let bottom = v01 * (1.0 - ax) + v11 * ax;
    let value = top * (1.0 - ay) + bottom * ay;
    Luma([value.round().clamp(0.0, 255.0) as u8])
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  fn two_tone(w: u32, h: u32) -> GrayImage {
    ImageBuffer::from_fn(w, h, |x, _| if x < w / 2 { Luma([40]) } else { Luma([210]) })
  }

  #[test]
  fn every_variant_keeps_dimensions() {
    let gray = two_tone(64, 48);
    for variant in MARKER_VARIANTS.iter() {
      let out = variant.apply(&gray);
      assert_eq!(out.dimensions(), (64, 48), "{}", variant.name());
    }
  }

  #[test]
  fn sharpen_leaves_flat_image_unchanged() {
    let flat = GrayImage::from_pixel(10, 10, Luma([90]));
    assert_eq!(sharpen(&flat), flat);
  }

  #[test]
  fn sharpen_boosts_edges() {
    let gray = two_tone(10, 4);
    let out = sharpen(&gray);
    assert_eq!(out.get_pixel(4, 1)[0], 0);
    assert_eq!(out.get_pixel(5, 1)[0], 255);
    assert_eq!(out.get_pixel(0, 1)[0], 40);
  }

  #[test]
  fn sharpen_rgb_works_per_channel() {
    let img = RgbImage::from_fn(10, 4, |x, _| {
      if x < 5 {
        image::Rgb([40, 200, 0])
      } else {
        image::Rgb([210, 200, 255])
      }
    });
    let out = sharpen_rgb(&img);
    assert_eq!(out.get_pixel(4, 1).0, [0, 200, 0]);
    assert_eq!(out.get_pixel(5, 1).0, [255, 200, 255]);
    assert_eq!(out.get_pixel(0, 1).0, [40, 200, 0]);
  }

  #[test]
  fn adaptive_gaussian_marks_dark_side() {
    let out = Variant::AdaptiveGaussian { block: 11, c: 2 }.apply(&two_tone(40, 10));
    assert_eq!(out.get_pixel(19, 5)[0], 0);
    assert_eq!(out.get_pixel(20, 5)[0], 255);
  }

  #[test]
  fn otsu_separates_two_tones() {
    let out = otsu_binary(&two_tone(20, 20));
    assert_eq!(out.get_pixel(0, 0)[0], 0);
    assert_eq!(out.get_pixel(19, 19)[0], 255);
  }

  #[test]
  fn clahe_of_uniform_image_is_uniform() {
    let flat = GrayImage::from_pixel(32, 32, Luma([120]));
    let out = clahe(&flat, 4, 4, 3.0);
    let first = out.get_pixel(0, 0)[0];
    assert!(out.pixels().all(|p| p[0] == first));
  }

  #[test]
  fn adaptive_mean_marks_dark_side() {
    let out = Variant::AdaptiveMean { block: 15, c: 5 }.apply(&two_tone(40, 10));
    // 暗侧靠近边缘处低于局部均值
    assert_eq!(out.get_pixel(19, 5)[0], 0);
    assert_eq!(out.get_pixel(20, 5)[0], 255);
  }

  #[test]
  fn cache_computes_once_per_index() {
    let gray = two_tone(16, 16);
    let mut cache = VariantCache::new(&gray);
    let a = cache.get(5, &Variant::Otsu).clone();
    let b = cache.get(5, &Variant::Otsu).clone();
    assert_eq!(a, b);
    assert_eq!(cache.get(0, &Variant::Gray), &gray);
  }
}
