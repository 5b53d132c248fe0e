// 该文件是 Xinxian （新鲜） 项目的一部分。
// src/marker/dictionary.rs - 4×4 标记字典
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
use std::sync::LazyLock;

use calib_targets_aruco::builtins;
use image::{GrayImage, Luma};
use thiserror::Error;
use tracing::{error, info};

/// 数据区边长（单元格）
pub const MARKER_BITS: u32 = 4;
/// 含一圈黑色边框的总边长（单元格）
pub const MARKER_CELLS: u32 = MARKER_BITS + 2;

/// 标签打印所用的 ArUco 字典
pub const BUILTIN_NAME: &str = "DICT_4X4_250";
const BUILTIN_CORRECTION_BITS: u32 = 1;

static BUILTIN: LazyLock<MarkerDictionary> = LazyLock::new(|| {
  let codes: Vec<u16> = builtins::builtin_dictionary(BUILTIN_NAME)
    .into_iter()
    .flat_map(|dict| {
      dict
        .codes
        .iter()
        .map(|&code| from_black_lsb(code))
        .collect::<Vec<_>>()
    })
    .collect();
  if codes.is_empty() {
    error!("内置字典 {} 不可用，无法识别标记", BUILTIN_NAME);
  }
  MarkerDictionary {
    codes,
    max_correction_bits: BUILTIN_CORRECTION_BITS,
  }
});

/// 行优先、低位在前、1 为黑色的码字转为本模块的表示
fn from_black_lsb(code: u64) -> u16 {
  let mut out = 0u16;
  for row in 0..MARKER_BITS {
    for col in 0..MARKER_BITS {
      let black = (code >> (row * MARKER_BITS + col)) & 1 == 1;
      if !black {
        out = with_bit(out, row, col);
      }
    }
  }
  out
}

#[derive(Error, Debug)]
pub enum DictionaryError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("字典格式错误: {0}")]
  FormatError(#[from] serde_json::Error),
  #[error("字典为空")]
  Empty,
}

/// 字典匹配结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identified {
  pub id: u32,
  /// 采样网格相对标准朝向顺时针旋转的次数
  pub rotation: usize,
  pub distance: u32,
}

/// 标记字典：每个 id 对应一个 16 位编码，行优先，最高位为左上角单元格，
/// 1 表示白色单元格
#[derive(Debug, Clone)]
pub struct MarkerDictionary {
  codes: Vec<u16>,
  max_correction_bits: u32,
}

impl MarkerDictionary {
  /// 内置字典：ArUco DICT_4X4_250，可纠正 1 位
  pub fn builtin() -> &'static MarkerDictionary {
    &BUILTIN
  }

  pub fn from_codes(codes: Vec<u16>, max_correction_bits: u32) -> Result<Self, DictionaryError> {
    if codes.is_empty() {
      return Err(DictionaryError::Empty);
    }
    Ok(Self {
      codes,
      max_correction_bits,
    })
  }

  /// 从 JSON 数组文件加载编码，纠错位数由编码间最小距离推出
  pub fn from_json_file(path: &Path) -> Result<Self, DictionaryError> {
    let text = std::fs::read_to_string(path)?;
    let codes: Vec<u16> = serde_json::from_str(&text)?;
    let distance = min_distance(&codes);
    info!(
      "加载标记字典: {} ({} 个编码, 最小距离 {})",
      path.display(),
      codes.len(),
      distance
    );
    Self::from_codes(codes, distance.saturating_sub(1) / 2)
  }

  pub fn len(&self) -> usize {
    self.codes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.codes.is_empty()
  }

  pub fn code(&self, id: u32) -> Option<u16> {
    self.codes.get(id as usize).copied()
  }

  pub fn max_correction_bits(&self) -> u32 {
    self.max_correction_bits
  }

  /// 在四个朝向上寻找最近编码
  pub fn identify(&self, sampled: u16) -> Option<Identified> {
    let mut best: Option<Identified> = None;
    let mut bits = sampled;
    for rotation in 0..4 {
      for (id, &code) in self.codes.iter().enumerate() {
        let distance = (code ^ bits).count_ones();
        if best.is_none_or(|b| distance < b.distance) {
          best = Some(Identified {
            id: id as u32,
            rotation,
            distance,
          });
        }
      }
      bits = rotate_ccw(bits);
    }
    best.filter(|b| b.distance <= self.max_correction_bits)
  }

  /// 渲染标准朝向的标记位图，每个单元格 `cell_px` 像素
  pub fn render_marker(&self, id: u32, cell_px: u32) -> Option<GrayImage> {
    let code = self.code(id)?;
    let cell_px = cell_px.max(1);
    let size = MARKER_CELLS * cell_px;
    Some(GrayImage::from_fn(size, size, |x, y| {
      let col = x / cell_px;
      let row = y / cell_px;
      let border = col == 0 || row == 0 || col == MARKER_CELLS - 1 || row == MARKER_CELLS - 1;
      if !border && bit_at(code, row - 1, col - 1) {
        Luma([255])
      } else {
        Luma([0])
      }
    }))
  }
}

/// 行优先取位，(0,0) 为最高位
pub fn bit_at(code: u16, row: u32, col: u32) -> bool {
  let shift = MARKER_BITS * MARKER_BITS - 1 - (row * MARKER_BITS + col);
  (code >> shift) & 1 == 1
}

fn with_bit(code: u16, row: u32, col: u32) -> u16 {
  let shift = MARKER_BITS * MARKER_BITS - 1 - (row * MARKER_BITS + col);
  code | (1 << shift)
}

/// 顺时针旋转 90°：(r, c) -> (c, n-1-r)
pub fn rotate_cw(code: u16) -> u16 {
  let n = MARKER_BITS;
  let mut out = 0u16;
  for row in 0..n {
    for col in 0..n {
      if bit_at(code, row, col) {
        out = with_bit(out, col, n - 1 - row);
      }
    }
  }
  out
}

pub fn rotate_ccw(code: u16) -> u16 {
  rotate_cw(rotate_cw(rotate_cw(code)))
}

fn rotations(code: u16) -> [u16; 4] {
  let r1 = rotate_cw(code);
  let r2 = rotate_cw(r1);
  let r3 = rotate_cw(r2);
  [code, r1, r2, r3]
}

fn self_distance(code: u16) -> u32 {
  rotations(code)[1..]
    .iter()
    .map(|r| (r ^ code).count_ones())
    .min()
    .unwrap_or(0)
}

/// 编码集合在旋转意义下的最小距离
pub fn min_distance(codes: &[u16]) -> u32 {
  let mut best = u32::MAX;
  for (i, &a) in codes.iter().enumerate() {
    best = best.min(self_distance(a));
    for &b in &codes[i + 1..] {
      for r in rotations(b) {
        best = best.min((a ^ r).count_ones());
      }
    }
  }
  best
}
