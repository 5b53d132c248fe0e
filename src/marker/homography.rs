// 该文件是 Xinxian （新鲜） 项目的一部分。
// src/marker/homography.rs - 四点单应性
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

use nalgebra::{Matrix3, SMatrix, SVector, Vector3};

use crate::frame::Point2;

/// 由四组对应点精确求解 H，使 dst ≈ H · src
pub fn from_quad(src: &[[f64; 2]; 4], dst: &[Point2; 4]) -> Option<Matrix3<f64>> {
  let mut a = SMatrix::<f64, 8, 8>::zeros();
  let mut b = SVector::<f64, 8>::zeros();
  for i in 0..4 {
    let (x, y) = (src[i][0], src[i][1]);
    let (u, v) = (dst[i].x as f64, dst[i].y as f64);
    let r = 2 * i;
    a[(r, 0)] = x;
    a[(r, 1)] = y;
    a[(r, 2)] = 1.0;
    a[(r, 6)] = -u * x;
    a[(r, 7)] = -u * y;
    b[r] = u;
    a[(r + 1, 3)] = x;
    a[(r + 1, 4)] = y;
    a[(r + 1, 5)] = 1.0;
    a[(r + 1, 6)] = -v * x;
    a[(r + 1, 7)] = -v * y;
    b[r + 1] = v;
  }
  let h = a.lu().solve(&b)?;
  if h.iter().any(|v| !v.is_finite()) {
    return None;
  }
  let m = Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], 1.0);
  // 退化四边形会解出奇异矩阵
  if m.determinant().abs() < 1e-9 {
    return None;
  }
  Some(m)
}

/// H · [x, y, 1]^T 投影到图像坐标
pub fn project(h: &Matrix3<f64>, x: f64, y: f64) -> Option<[f64; 2]> {
  let p = h * Vector3::new(x, y, 1.0);
  if p[2].abs() < 1e-12 {
    return None;
  }
  Some([p[0] / p[2], p[1] / p[2]])
}
