// 该文件是 Xinxian （新鲜） 项目的一部分。
// src/marker.rs - 基准标记定位
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

use std::collections::HashSet;

use image::RgbImage;
use serde::Serialize;
use tracing::{debug, trace};

use crate::cascade::Cascade;
use crate::frame::{PixelRect, Point2, to_gray};
use crate::preprocess::{MARKER_VARIANTS, Variant, VariantCache};

mod bits;
mod candidate;
pub mod dictionary;
pub mod homography;
mod refine;

pub use self::candidate::{Candidate, detect_candidates};
pub use self::dictionary::{MarkerDictionary, min_distance};
pub use self::refine::CornerRefinement;

/// 图像边长小于该值时不做检测
const MIN_IMAGE_SIDE: u32 = 16;

/// 一次标记检测
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarkerDetection {
  pub id: u32,
  /// 标记自身的左上、右上、右下、左下角
  pub corners: [Point2; 4],
  /// 角点的轴对齐外接矩形
  pub rect: PixelRect,
}

/// 一组检测参数
#[derive(Debug, Clone, PartialEq)]
pub struct MarkerParams {
  pub adaptive_window_min: u32,
  pub adaptive_window_max: u32,
  pub adaptive_window_step: u32,
  pub threshold_constant: f32,
  pub min_perimeter_rate: f32,
  pub max_perimeter_rate: f32,
  pub polygonal_approx_accuracy: f32,
  pub min_corner_distance_rate: f32,
  pub max_border_error_rate: f32,
  pub refinement: CornerRefinement,
}

impl Default for MarkerParams {
  fn default() -> Self {
    Self {
      adaptive_window_min: 3,
      adaptive_window_max: 23,
      adaptive_window_step: 5,
      threshold_constant: 7.0,
      min_perimeter_rate: 0.005,
      max_perimeter_rate: 4.0,
      polygonal_approx_accuracy: 0.08,
      min_corner_distance_rate: 0.01,
      max_border_error_rate: 0.35,
      refinement: CornerRefinement::Subpixel,
    }
  }
}

impl MarkerParams {
  /// 更宽的窗口与更松的多边形近似，适合模糊或大尺寸标记
  pub fn relaxed() -> Self {
    Self {
      adaptive_window_min: 5,
      adaptive_window_max: 35,
      adaptive_window_step: 5,
      threshold_constant: 10.0,
      polygonal_approx_accuracy: 0.10,
      refinement: CornerRefinement::Contour,
      ..Self::default()
    }
  }
}

/// 标记定位器：按 (参数集 × 预处理变体) 级联，首个有结果的组合胜出
#[derive(Debug, Clone)]
pub struct FiducialLocator {
  dictionary: MarkerDictionary,
  configs: Vec<MarkerParams>,
  variants: Vec<Variant>,
}

impl Default for FiducialLocator {
  fn default() -> Self {
    Self::new(MarkerDictionary::builtin().clone())
  }
}

impl FiducialLocator {
  pub fn new(dictionary: MarkerDictionary) -> Self {
    Self {
      dictionary,
      configs: vec![MarkerParams::default(), MarkerParams::relaxed()],
      variants: MARKER_VARIANTS.to_vec(),
    }
  }

  pub fn with_configs(mut self, configs: Vec<MarkerParams>) -> Self {
    self.configs = configs;
    self
  }

  pub fn with_variants(mut self, variants: Vec<Variant>) -> Self {
    self.variants = variants;
    self
  }

  pub fn dictionary(&self) -> &MarkerDictionary {
    &self.dictionary
  }

  /// 在图像中定位所有标记；同一 id 只保留首个
  pub fn locate(&self, image: &RgbImage) -> Vec<MarkerDetection> {
    if image.width() < MIN_IMAGE_SIDE || image.height() < MIN_IMAGE_SIDE {
      return Vec::new();
    }
    let gray = to_gray(image);
    let mut cache = VariantCache::new(&gray);

    let hit = Cascade::new(&self.configs, &self.variants).run(|_, params, index, variant| {
      let prepared = cache.get(index, variant);
      let found = self.detect_in(prepared, &gray, params);
      trace!("变体 {} 检出 {} 个标记", variant.name(), found.len());
      (!found.is_empty()).then_some(found)
    });

    let Some(hit) = hit else {
      return Vec::new();
    };
    let mut seen = HashSet::new();
    let markers: Vec<MarkerDetection> = hit
      .value
      .into_iter()
      .filter(|m| seen.insert(m.id))
      .collect();
    debug!(
      "检出标记 {:?} (变体 {})",
      markers.iter().map(|m| m.id).collect::<Vec<_>>(),
      self.variants[hit.variant_index].name()
    );
    markers
  }

  fn detect_in(
    &self,
    prepared: &image::GrayImage,
    gray: &image::GrayImage,
    params: &MarkerParams,
  ) -> Vec<MarkerDetection> {
    let mut found = Vec::new();
    for candidate in detect_candidates(prepared, params) {
      let Some(code) = bits::read_bits(prepared, &candidate.corners, params.max_border_error_rate)
      else {
        continue;
      };
      let Some(identified) = self.dictionary.identify(code) else {
        continue;
      };

      let mut corners = match params.refinement {
        CornerRefinement::None => candidate.corners,
        CornerRefinement::Subpixel => candidate.corners.map(|c| refine::refine_subpixel(gray, c)),
        CornerRefinement::Contour => refine::refine_contour(&candidate.corners, &candidate.contour),
      };
      corners.rotate_left(identified.rotation);
      found.push(MarkerDetection {
        id: identified.id,
        corners,
        rect: PixelRect::bounding(&corners),
      });
    }
    found
  }
}
