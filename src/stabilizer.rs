// 该文件是 Xinxian （新鲜） 项目的一部分。
// src/stabilizer.rs - 视频流检测稳定器
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

//! 两态状态机：
//! - 空闲：本帧跑完整流水线，得到结果即锁定，冷却计数置为 `cooldown`；
//! - 锁定：不再分级，只重新定位同 id 的标记与二维码以刷新叠加层位置；
//!   标记可见但区域无效的帧不绘制。
//!
//! 冷却计数在每帧末尾减一（包括刚锁定的那一帧），归零后回到空闲。
//! 一个稳定器只服务一路视频流。

use image::RgbImage;
use tracing::{debug, info};

use crate::detector::{Detection, FrameAnalyzer};
use crate::result::DetectionResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockPolicy {
  /// 锁定持续的帧数
  pub cooldown: u32,
  /// 锁定期间标记消失时是否清除叠加层（默认保留最后位置）
  pub clear_stale: bool,
}

impl Default for LockPolicy {
  fn default() -> Self {
    Self {
      cooldown: 30,
      clear_stale: false,
    }
  }
}

/// 一帧的显示内容
#[derive(Debug, Clone, PartialEq)]
pub struct StabilizerView {
  /// 需要绘制的结果与几何信息
  pub detection: Option<Detection>,
  /// 本帧是否产生了新的分级
  pub accepted: bool,
  /// 本帧结束时剩余的冷却帧数
  pub cooldown: u32,
}

pub struct Stabilizer<A> {
  analyzer: A,
  policy: LockPolicy,
  cooldown: u32,
  current: Option<Detection>,
}

impl<A: FrameAnalyzer> Stabilizer<A> {
  pub fn new(analyzer: A, policy: LockPolicy) -> Self {
    Self {
      analyzer,
      policy,
      cooldown: 0,
      current: None,
    }
  }

  pub fn is_locked(&self) -> bool {
    self.cooldown > 0
  }

  /// 最近一次分级结果，用于保存
  pub fn last_result(&self) -> Option<&DetectionResult> {
    self.current.as_ref().map(|d| &d.result)
  }

  pub fn tick(&mut self, image: &RgbImage) -> StabilizerView {
    let mut accepted = false;
    let detection = if self.is_locked() {
      self.follow(image)
    } else if let Some(detection) = self.analyzer.analyze(image) {
      info!(
        "锁定结果: {} / 标记 #{} / {}",
        detection.result.package_id, detection.marker.id, detection.result.spoilage_level
      );
      self.current = Some(detection.clone());
      self.cooldown = self.policy.cooldown;
      accepted = true;
      Some(detection)
    } else {
      None
    };

    if self.cooldown > 0 {
      self.cooldown -= 1;
      if self.cooldown == 0 {
        debug!("冷却结束，恢复检测");
      }
    }

    StabilizerView {
      detection,
      accepted,
      cooldown: self.cooldown,
    }
  }

  /// 锁定期间：同 id 标记仍可见则更新位置，否则按策略保留或清除
  fn follow(&mut self, image: &RgbImage) -> Option<Detection> {
    let current = self.current.as_mut()?;
    let id = current.marker.id;
    let visible = self
      .analyzer
      .locate(image)
      .into_iter()
      .find(|m| m.id == id);

    match visible {
      Some(marker) => {
        let Some(region) = self.analyzer.region(&marker, image) else {
          debug!("标记 #{} 可见但指示条区域无效，本帧不绘制", id);
          return None;
        };
        current.marker = marker;
        current.region = region;
        current.payload_polygon = self.analyzer.payload_polygon(image);
        Some(current.clone())
      }
      None if self.policy.clear_stale => None,
      None => Some(current.clone()),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::cell::{Cell, RefCell};
  use std::collections::VecDeque;

  use crate::classify::Classification;
  use crate::frame::{PixelRect, Point2};
  use crate::marker::MarkerDetection;
  use crate::payload::Payload;
  use crate::result::compose;

  fn marker(id: u32, x: i32) -> MarkerDetection {
    MarkerDetection {
      id,
      corners: [Point2::new(x as f32, 0.0); 4],
      rect: PixelRect::new(x, 10, 20, 20),
    }
  }

  fn detection(id: u32, x: i32) -> Detection {
    let result = compose(&Payload::default(), id, &Classification::unknown(), chrono::Local::now());
    Detection {
      result,
      marker: marker(id, x),
      region: PixelRect::new(x + 30, 10, 10, 10),
      payload_polygon: None,
    }
  }

  /// 按脚本逐帧返回标记，并统计分级次数
  struct Scripted {
    frames: RefCell<VecDeque<Vec<MarkerDetection>>>,
    analyzed: Cell<usize>,
    qr_reads: Cell<usize>,
  }

  impl Scripted {
    fn new(frames: Vec<Vec<MarkerDetection>>) -> Self {
      Self {
        frames: RefCell::new(frames.into()),
        analyzed: Cell::new(0),
        qr_reads: Cell::new(0),
      }
    }

    fn next(&self) -> Vec<MarkerDetection> {
      self.frames.borrow_mut().pop_front().unwrap_or_default()
    }
  }

  impl FrameAnalyzer for Scripted {
    fn locate(&self, _: &RgbImage) -> Vec<MarkerDetection> {
      self.next()
    }

    /// x 超过 1000 视为区域落在画面外
    fn region(&self, marker: &MarkerDetection, _: &RgbImage) -> Option<PixelRect> {
      (marker.rect.x < 1000).then(|| PixelRect::new(marker.rect.x + 30, 10, 10, 10))
    }

    /// 每读一次二维码，角点右移一个像素
    fn payload_polygon(&self, _: &RgbImage) -> Option<[Point2; 4]> {
      let reads = self.qr_reads.get() + 1;
      self.qr_reads.set(reads);
      Some([Point2::new(reads as f32, 0.0); 4])
    }

    fn analyze(&self, _: &RgbImage) -> Option<Detection> {
      let markers = self.next();
      let m = markers.first()?;
      self.analyzed.set(self.analyzed.get() + 1);
      Some(detection(m.id, m.rect.x))
    }
  }

  fn image() -> RgbImage {
    RgbImage::new(4, 4)
  }

  #[test]
  fn locks_for_cooldown_frames() {
    let frames = (0..40).map(|_| vec![marker(3, 100)]).collect();
    let analyzer = Scripted::new(frames);
    let mut stabilizer = Stabilizer::new(&analyzer, LockPolicy::default());

    let first = stabilizer.tick(&image());
    assert!(first.accepted);
    assert_eq!(first.cooldown, 29);

    for tick in 1..30 {
      let view = stabilizer.tick(&image());
      assert!(!view.accepted, "tick {tick}");
      assert!(view.detection.is_some());
    }
    assert!(!stabilizer.is_locked());
    assert_eq!(analyzer.analyzed.get(), 1);

    let again = stabilizer.tick(&image());
    assert!(again.accepted);
    assert_eq!(analyzer.analyzed.get(), 2);
  }

  #[test]
  fn follows_same_marker_while_locked() {
    let analyzer = Scripted::new(vec![
      vec![marker(3, 100)],
      vec![marker(9, 10), marker(3, 140)],
    ]);
    let mut stabilizer = Stabilizer::new(&analyzer, LockPolicy::default());
    stabilizer.tick(&image());
    let view = stabilizer.tick(&image());
    let d = view.detection.unwrap();
    assert_eq!(d.marker.id, 3);
    assert_eq!(d.marker.rect.x, 140);
    assert_eq!(d.region.x, 170);
  }

  #[test]
  fn invalid_region_while_locked_draws_nothing() {
    let analyzer = Scripted::new(vec![
      vec![marker(3, 100)],
      vec![marker(3, 1200)],
      vec![marker(3, 120)],
    ]);
    let mut stabilizer = Stabilizer::new(&analyzer, LockPolicy::default());
    stabilizer.tick(&image());

    let view = stabilizer.tick(&image());
    assert!(view.detection.is_none());
    assert!(stabilizer.is_locked());
    assert_eq!(analyzer.qr_reads.get(), 0);

    let d = stabilizer.tick(&image()).detection.unwrap();
    assert_eq!(d.marker.rect.x, 120);
    assert_eq!(d.region.x, 150);
  }

  #[test]
  fn payload_polygon_is_reread_while_locked() {
    let frames = (0..3).map(|_| vec![marker(3, 100)]).collect();
    let analyzer = Scripted::new(frames);
    let mut stabilizer = Stabilizer::new(&analyzer, LockPolicy::default());
    assert_eq!(stabilizer.tick(&image()).detection.unwrap().payload_polygon, None);

    let first = stabilizer.tick(&image()).detection.unwrap();
    let second = stabilizer.tick(&image()).detection.unwrap();
    assert_eq!(first.payload_polygon.unwrap()[0].x, 1.0);
    assert_eq!(second.payload_polygon.unwrap()[0].x, 2.0);
  }

  #[test]
  fn keeps_last_position_when_marker_disappears() {
    let analyzer = Scripted::new(vec![vec![marker(3, 100)], vec![marker(4, 50)], vec![]]);
    let mut stabilizer = Stabilizer::new(&analyzer, LockPolicy::default());
    stabilizer.tick(&image());
    for _ in 0..2 {
      let d = stabilizer.tick(&image()).detection.unwrap();
      assert_eq!(d.marker.id, 3);
      assert_eq!(d.marker.rect.x, 100);
    }
  }

  #[test]
  fn clear_stale_hides_overlay_but_keeps_result() {
    let analyzer = Scripted::new(vec![vec![marker(3, 100)], vec![]]);
    let policy = LockPolicy {
      clear_stale: true,
      ..LockPolicy::default()
    };
    let mut stabilizer = Stabilizer::new(&analyzer, policy);
    stabilizer.tick(&image());
    let view = stabilizer.tick(&image());
    assert!(view.detection.is_none());
    assert!(stabilizer.is_locked());
    assert_eq!(stabilizer.last_result().unwrap().marker_id, 3);
  }

  #[test]
  fn idle_without_marker_shows_nothing() {
    let analyzer = Scripted::new(vec![vec![], vec![]]);
    let mut stabilizer = Stabilizer::new(&analyzer, LockPolicy::default());
    let view = stabilizer.tick(&image());
    assert_eq!(view.detection, None);
    assert!(!view.accepted);
    assert_eq!(view.cooldown, 0);
    assert!(stabilizer.last_result().is_none());
  }
}
