// 该文件是 Xinxian （新鲜） 项目的一部分。
// src/detector.rs - 单帧检测流水线
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

//! 单帧流水线：定位标记 → 推算指示条区域 → 颜色分级 → 合成结果。
//! 整个过程不修改任何共享状态，可在多个线程上并行调用。

use std::convert::Infallible;

use chrono::Local;
use image::RgbImage;
use tracing::{debug, info};

use crate::classify::{Classification, ColorClassifier, FreshRange};
use crate::frame::{Frame, PixelRect, Point2};
use crate::marker::{FiducialLocator, MarkerDetection};
use crate::payload::{Payload, PayloadDecoder, PayloadReading};
use crate::region::RegionLayout;
use crate::result::{DetectionResult, compose};

pub trait Detector {
  type Input;
  type Output;
  type Error;

  fn detect(&self, input: &Self::Input) -> Result<Self::Output, Self::Error>;
}

/// 一次成功分级及绘制叠加层所需的几何信息
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
  pub result: DetectionResult,
  pub marker: MarkerDetection,
  pub region: PixelRect,
  pub payload_polygon: Option<[Point2; 4]>,
}

/// 稳定器依赖的各个阶段，测试中可替换
pub trait FrameAnalyzer {
  fn locate(&self, image: &RgbImage) -> Vec<MarkerDetection>;
  fn region(&self, marker: &MarkerDetection, image: &RgbImage) -> Option<PixelRect>;
  /// 本帧二维码的四个角点
  fn payload_polygon(&self, image: &RgbImage) -> Option<[Point2; 4]>;
  fn analyze(&self, image: &RgbImage) -> Option<Detection>;
}

impl<T: FrameAnalyzer + ?Sized> FrameAnalyzer for &T {
  fn locate(&self, image: &RgbImage) -> Vec<MarkerDetection> {
    (**self).locate(image)
  }

  fn region(&self, marker: &MarkerDetection, image: &RgbImage) -> Option<PixelRect> {
    (**self).region(marker, image)
  }

  fn payload_polygon(&self, image: &RgbImage) -> Option<[Point2; 4]> {
    (**self).payload_polygon(image)
  }

  fn analyze(&self, image: &RgbImage) -> Option<Detection> {
    (**self).analyze(image)
  }
}

#[derive(Debug, Clone, Default)]
pub struct SpoilageDetector {
  locator: FiducialLocator,
  decoder: PayloadDecoder,
  layout: RegionLayout,
  classifier: ColorClassifier,
}

impl SpoilageDetector {
  pub fn new(locator: FiducialLocator) -> Self {
    Self {
      locator,
      ..Self::default()
    }
  }

  pub fn with_layout(mut self, layout: RegionLayout) -> Self {
    self.layout = layout;
    self
  }

  pub fn with_fresh_range(mut self, fresh: FreshRange) -> Self {
    self.classifier = ColorClassifier::new(fresh);
    self
  }

  pub fn with_decoder(mut self, decoder: PayloadDecoder) -> Self {
    self.decoder = decoder;
    self
  }

  pub fn locator(&self) -> &FiducialLocator {
    &self.locator
  }

  pub fn classify(&self, image: &RgbImage, region: &PixelRect) -> Classification {
    self.classifier.classify(image, region)
  }

  /// 对单张图像运行完整流水线；没有标记或区域无效时返回 `None`
  pub fn analyze_image(&self, image: &RgbImage) -> Option<Detection> {
    let markers = self.locator.locate(image);
    if markers.is_empty() {
      debug!("未检出标记");
      return None;
    }
    let reading = self.decoder.read(image);
    let (payload, polygon) = match &reading {
      Some(PayloadReading { payload, polygon }) => (payload.clone(), Some(*polygon)),
      None => (Payload::default(), None),
    };

    for marker in markers {
      let Some(region) = self.region(&marker, image) else {
        debug!("标记 #{} 的指示条区域无效", marker.id);
        continue;
      };
      let classification = self.classify(image, &region);
      let result = compose(&payload, marker.id, &classification, Local::now());
      info!(
        "标记 #{} -> {} ({:.2}%)",
        marker.id, result.spoilage_level, result.spoilage_percentage
      );
      return Some(Detection {
        result,
        marker,
        region,
        payload_polygon: polygon,
      });
    }
    None
  }
}

impl FrameAnalyzer for SpoilageDetector {
  fn locate(&self, image: &RgbImage) -> Vec<MarkerDetection> {
    self.locator.locate(image)
  }

  fn region(&self, marker: &MarkerDetection, image: &RgbImage) -> Option<PixelRect> {
    self
      .layout
      .map_region(&marker.rect, image.width(), image.height())
  }

  fn payload_polygon(&self, image: &RgbImage) -> Option<[Point2; 4]> {
    self.decoder.read(image).map(|reading| reading.polygon)
  }

  fn analyze(&self, image: &RgbImage) -> Option<Detection> {
    self.analyze_image(image)
  }
}

impl Detector for SpoilageDetector {
  type Input = Frame;
  type Output = Option<Detection>;
  type Error = Infallible;

  fn detect(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    Ok(self.analyze_image(&input.image))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::Rgb;

  #[test]
  fn blank_frame_has_no_detection() {
    let detector = SpoilageDetector::default();
    let frame = Frame::still(RgbImage::from_pixel(320, 240, Rgb([255, 255, 255])));
    assert_eq!(detector.detect(&frame), Ok(None));
  }

  #[test]
  fn region_follows_layout() {
    let detector = SpoilageDetector::default();
    let marker = MarkerDetection {
      id: 0,
      corners: [Point2::default(); 4],
      rect: PixelRect::new(50, 50, 100, 100),
    };
    let image = RgbImage::new(1000, 500);
    assert_eq!(
      detector.region(&marker, &image),
      Some(PixelRect::new(250, 30, 160, 70))
    );
  }
}
