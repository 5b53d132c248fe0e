// 该文件是 Xinxian （新鲜） 项目的一部分。
// src/marker/candidate.rs - 四边形候选提取
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
use image::imageops::invert;
use imageproc::contours::{BorderType, find_contours};
use imageproc::contrast::adaptive_threshold;
use imageproc::geometry::approximate_polygon_dp;
use imageproc::point::Point;

use super::MarkerParams;
use crate::frame::Point2;

/// 角点离图像边缘的最小距离（像素）
const MIN_BORDER_DISTANCE: f32 = 3.0;
/// 最短边（像素）
const MIN_SIDE: f32 = 8.0;

/// 候选四边形，角点按图像中的顺时针排列
#[derive(Debug, Clone)]
pub struct Candidate {
  pub corners: [Point2; 4],
  pub contour: Vec<Point2>,
}

impl Candidate {
  pub fn perimeter(&self) -> f32 {
    (0..4)
      .map(|i| self.corners[i].distance(&self.corners[(i + 1) % 4]))
      .sum()
  }

  pub fn center(&self) -> Point2 {
    let x = self.corners.iter().map(|p| p.x).sum::<f32>() / 4.0;
    let y = self.corners.iter().map(|p| p.y).sum::<f32>() / 4.0;
    Point2::new(x, y)
  }
}

/// 暗前景的局部均值二值化：低于 `mean - c` 的像素记为前景
fn threshold_inv(src: &GrayImage, window: u32, c: f32) -> GrayImage {
  let mut binary = adaptive_threshold(src, window / 2, c.round() as i32);
  invert(&mut binary);
  binary
}

fn cross(o: Point2, a: Point2, b: Point2) -> f32 {
  (a.x - o.x) * (b.y - o.y) - (a.y - o.y) * (b.x - o.x)
}

fn is_convex(q: &[Point2; 4]) -> bool {
  let signs: Vec<f32> = (0..4)
    .map(|i| cross(q[i], q[(i + 1) % 4], q[(i + 2) % 4]))
    .collect();
  signs.iter().all(|&s| s > 0.0) || signs.iter().all(|&s| s < 0.0)
}

/// 闭合轮廓的多边形近似：在最远点对处切成两段，分别做 Douglas-Peucker
fn approximate_closed(points: &[Point<i32>], epsilon: f64) -> Vec<Point<i32>> {
  if points.len() < 4 {
    return points.to_vec();
  }
  let cx = points.iter().map(|p| p.x as f64).sum::<f64>() / points.len() as f64;
  let cy = points.iter().map(|p| p.y as f64).sum::<f64>() / points.len() as f64;
  let dist2 = |a: &Point<i32>, x: f64, y: f64| (a.x as f64 - x).powi(2) + (a.y as f64 - y).powi(2);

  let start = (0..points.len())
    .max_by(|&i, &j| dist2(&points[i], cx, cy).total_cmp(&dist2(&points[j], cx, cy)))
    .unwrap_or(0);
  let (sx, sy) = (points[start].x as f64, points[start].y as f64);
  let opposite = (0..points.len())
    .max_by(|&i, &j| dist2(&points[i], sx, sy).total_cmp(&dist2(&points[j], sx, sy)))
    .unwrap_or(0);
  if start == opposite {
    return vec![points[start]];
  }

  let (lo, hi) = (start.min(opposite), start.max(opposite));
  let first: Vec<Point<i32>> = points[lo..=hi].to_vec();
  let second: Vec<Point<i32>> = points[hi..]
    .iter()
    .chain(points[..=lo].iter())
    .copied()
    .collect();

  let mut polygon = approximate_polygon_dp(&first, epsilon, false);
  polygon.pop();
  let mut rest = approximate_polygon_dp(&second, epsilon, false);
  rest.pop();
  polygon.append(&mut rest);
  polygon
}

/// 在一个二值化窗口下提取候选
fn candidates_for_window(src: &GrayImage, window: u32, params: &MarkerParams) -> Vec<Candidate> {
  let (width, height) = src.dimensions();
  let max_dim = width.max(height) as f32;
  let min_perimeter = params.min_perimeter_rate * max_dim;
  let max_perimeter = params.max_perimeter_rate * max_dim;

  let binary = threshold_inv(src, window, params.threshold_constant);
  let mut found = Vec::new();

  for contour in find_contours::<i32>(&binary) {
    if contour.border_type != BorderType::Outer {
      continue;
    }
    let length = contour.points.len() as f32;
    if length < min_perimeter || length > max_perimeter {
      continue;
    }
    let epsilon = (length * params.polygonal_approx_accuracy).max(1.0) as f64;
    let polygon = approximate_closed(&contour.points, epsilon);
    if polygon.len() != 4 {
      continue;
    }
    let mut corners = [Point2::default(); 4];
    for (corner, p) in corners.iter_mut().zip(polygon.iter()) {
      *corner = Point2::new(p.x as f32, p.y as f32);
    }
    if !is_convex(&corners) {
      continue;
    }

    let min_side = (0..4)
      .map(|i| corners[i].distance(&corners[(i + 1) % 4]))
      .fold(f32::MAX, f32::min);
    if min_side < MIN_SIDE || min_side < params.min_corner_distance_rate * length {
      continue;
    }
    let near_border = corners.iter().any(|p| {
      p.x < MIN_BORDER_DISTANCE
        || p.y < MIN_BORDER_DISTANCE
        || p.x > width as f32 - 1.0 - MIN_BORDER_DISTANCE
        || p.y > height as f32 - 1.0 - MIN_BORDER_DISTANCE
    });
    if near_border {
      continue;
    }

    // y 轴向下时，叉积为正即顺时针
    if cross(corners[0], corners[1], corners[2]) < 0.0 {
      corners.swap(1, 3);
    }
    let contour = contour
      .points
      .iter()
      .map(|p| Point2::new(p.x as f32, p.y as f32))
      .collect();
    found.push(Candidate { corners, contour });
  }
  found
}

/// 去掉与更大候选同心的重复或内嵌候选
fn suppress_nested(mut candidates: Vec<Candidate>) -> Vec<Candidate> {
  candidates.sort_by(|a, b| b.perimeter().total_cmp(&a.perimeter()));
  let mut kept: Vec<Candidate> = Vec::new();
  for candidate in candidates {
    let center = candidate.center();
    let perimeter = candidate.perimeter();
    let duplicate = kept.iter().any(|k| {
      let side = k.perimeter() / 4.0;
      k.center().distance(&center) < side * 0.2 && perimeter / k.perimeter() > 0.6
    });
    if !duplicate {
      kept.push(candidate);
    }
  }
  kept
}

/// 多尺度局部二值化后提取凸四边形候选
pub fn detect_candidates(src: &GrayImage, params: &MarkerParams) -> Vec<Candidate> {
  let mut all = Vec::new();
  let mut window = params.adaptive_window_min;
  while window <= params.adaptive_window_max {
    let odd = if window % 2 == 0 { window + 1 } else { window };
    all.extend(candidates_for_window(src, odd, params));
    window += params.adaptive_window_step.max(1);
  }
  suppress_nested(all)
}
