// 该文件是 Xinxian （新鲜） 项目的一部分。
// src/marker/refine.rs - 角点细化
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
use nalgebra::{Matrix2, Vector2};

use crate::frame::Point2;

const SUBPIX_RADIUS: i32 = 5;
const SUBPIX_MAX_ITER: usize = 30;
const SUBPIX_EPS: f64 = 0.01;

/// 角点细化方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CornerRefinement {
  None,
  /// 梯度正交约束的亚像素迭代
  #[default]
  Subpixel,
  /// 沿轮廓拟合四条边再求交
  Contour,
}

fn gradient(image: &GrayImage, x: i32, y: i32) -> Option<(f64, f64)> {
  let (w, h) = image.dimensions();
  if x < 1 || y < 1 || x + 1 >= w as i32 || y + 1 >= h as i32 {
    return None;
  }
  let at = |x: i32, y: i32| image.get_pixel(x as u32, y as u32)[0] as f64;
  let gx = (at(x + 1, y) - at(x - 1, y)) * 0.5;
  let gy = (at(x, y + 1) - at(x, y - 1)) * 0.5;
  Some((gx, gy))
}

/// 亚像素角点：窗口内每个像素的梯度都应与 (p - q) 正交
pub fn refine_subpixel(image: &GrayImage, corner: Point2) -> Point2 {
  let origin = Vector2::new(corner.x as f64, corner.y as f64);
  let mut q = origin;
  let sigma2 = (SUBPIX_RADIUS as f64).powi(2);

  for _ in 0..SUBPIX_MAX_ITER {
    let cx = q.x.round() as i32;
    let cy = q.y.round() as i32;
    let mut a = Matrix2::<f64>::zeros();
    let mut b = Vector2::<f64>::zeros();
    for dy in -SUBPIX_RADIUS..=SUBPIX_RADIUS {
      for dx in -SUBPIX_RADIUS..=SUBPIX_RADIUS {
        let (px, py) = (cx + dx, cy + dy);
        let Some((gx, gy)) = gradient(image, px, py) else {
          continue;
        };
        let weight = (-((dx * dx + dy * dy) as f64) / sigma2).exp();
        let (gxx, gxy, gyy) = (gx * gx * weight, gx * gy * weight, gy * gy * weight);
        a += Matrix2::new(gxx, gxy, gxy, gyy);
        b += Vector2::new(gxx * px as f64 + gxy * py as f64, gxy * px as f64 + gyy * py as f64);
      }
    }
    let Some(inv) = a.try_inverse() else {
      return corner;
    };
    let next = inv * b;
    let step = (next - q).norm();
    q = next;
    if step < SUBPIX_EPS {
      break;
    }
  }

  if !q.x.is_finite() || !q.y.is_finite() || (q - origin).norm() > SUBPIX_RADIUS as f64 {
    return corner;
  }
  Point2::new(q.x as f32, q.y as f32)
}

/// 直线：过 (cx, cy)，方向 (dx, dy)
#[derive(Debug, Clone, Copy)]
struct Line {
  cx: f64,
  cy: f64,
  dx: f64,
  dy: f64,
}

fn fit_line(points: &[Point2]) -> Option<Line> {
  if points.len() < 2 {
    return None;
  }
  let n = points.len() as f64;
  let cx = points.iter().map(|p| p.x as f64).sum::<f64>() / n;
  let cy = points.iter().map(|p| p.y as f64).sum::<f64>() / n;
  let (mut sxx, mut sxy, mut syy) = (0.0, 0.0, 0.0);
  for p in points {
    let (x, y) = (p.x as f64 - cx, p.y as f64 - cy);
    sxx += x * x;
    sxy += x * y;
    syy += y * y;
  }
  let angle = 0.5 * (2.0 * sxy).atan2(sxx - syy);
  Some(Line {
    cx,
    cy,
    dx: angle.cos(),
    dy: angle.sin(),
  })
}

fn intersect(a: &Line, b: &Line) -> Option<Point2> {
  let det = a.dx * b.dy - a.dy * b.dx;
  if det.abs() < 1e-6 {
    return None;
  }
  let t = ((b.cx - a.cx) * b.dy - (b.cy - a.cy) * b.dx) / det;
  Some(Point2::new((a.cx + t * a.dx) as f32, (a.cy + t * a.dy) as f32))
}

/// 把轮廓点分配到四条边上分别拟合，相邻两边的交点即新角点
pub fn refine_contour(corners: &[Point2; 4], contour: &[Point2]) -> [Point2; 4] {
  let mut sides: [Vec<Point2>; 4] = Default::default();
  for (i, side) in sides.iter_mut().enumerate() {
    let a = corners[i];
    let b = corners[(i + 1) % 4];
    let (ex, ey) = (b.x - a.x, b.y - a.y);
    let len2 = ex * ex + ey * ey;
    if len2 <= f32::EPSILON {
      return *corners;
    }
    let len = len2.sqrt();
    let max_offset = 2.0 + len * 0.05;
    for p in contour {
      let (vx, vy) = (p.x - a.x, p.y - a.y);
      let t = (vx * ex + vy * ey) / len2;
      let offset = (vx * ey - vy * ex).abs() / len;
      if (0.1..=0.9).contains(&t) && offset <= max_offset {
        side.push(*p);
      }
    }
  }

  let lines: Vec<Option<Line>> = sides.iter().map(|s| fit_line(s)).collect();
  let mut refined = *corners;
  for i in 0..4 {
    let prev = (i + 3) % 4;
    if let (Some(a), Some(b)) = (&lines[prev], &lines[i])
      && let Some(p) = intersect(a, b)
      && p.distance(&corners[i]) < 0.25 * corners[i].distance(&corners[(i + 1) % 4]).max(4.0)
    {
      refined[i] = p;
    }
  }
  refined
}
