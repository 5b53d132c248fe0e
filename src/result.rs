// 该文件是 Xinxian （新鲜） 项目的一部分。
// src/result.rs - 检测结果
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

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use tracing::info;

use crate::classify::{Classification, ColorReadings, SpoilageLevel, round2};
use crate::payload::Payload;

pub const DEFAULT_PRODUCT: &str = "Chicken";
pub const UNKNOWN_FIELD: &str = "Unknown";
pub const MARKER_PREFIX: &str = "ARUCO";

/// 一次分级的完整输出，创建后不再修改
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionResult {
  pub package_id: String,
  pub product_type: String,
  pub batch_id: String,
  pub pack_date: String,
  #[serde(rename = "aruco_id")]
  pub marker_id: u32,
  pub spoilage_level: SpoilageLevel,
  pub spoilage_percentage: f64,
  pub confidence: f64,
  pub timestamp: String,
  #[serde(serialize_with = "readings_or_empty")]
  pub color_readings: Option<ColorReadings>,
  pub is_safe: bool,
  pub recommendation: String,
}

/// 没有读数时仍输出对象，只带 `qr_verified`
fn readings_or_empty<S: Serializer>(
  readings: &Option<ColorReadings>,
  serializer: S,
) -> Result<S::Ok, S::Error> {
  match readings {
    Some(readings) => readings.serialize(serializer),
    None => {
      let mut map = serializer.serialize_map(Some(1))?;
      map.serialize_entry("qr_verified", &false)?;
      map.end()
    }
  }
}

/// 合成结果：载荷带 `id` 时才使用其字段，否则全部取默认值
pub fn compose(
  payload: &Payload,
  marker_id: u32,
  classification: &Classification,
  timestamp: DateTime<Local>,
) -> DetectionResult {
  let usable = payload.id.is_some();
  let pick = |value: &Option<String>, fallback: &str| -> String {
    value
      .as_ref()
      .filter(|_| usable)
      .cloned()
      .unwrap_or_else(|| fallback.to_string())
  };
  let level = classification.level;

  DetectionResult {
    package_id: pick(&payload.id, &format!("{}-{}", MARKER_PREFIX, marker_id)),
    product_type: pick(&payload.product, DEFAULT_PRODUCT),
    batch_id: pick(&payload.batch, UNKNOWN_FIELD),
    pack_date: pick(&payload.packed, UNKNOWN_FIELD),
    marker_id,
    spoilage_level: level,
    spoilage_percentage: round2(classification.percentage),
    confidence: classification.confidence(),
    timestamp: timestamp.format("%Y-%m-%dT%H:%M:%S%.6f").to_string(),
    color_readings: classification.readings.clone(),
    is_safe: level.is_safe(),
    recommendation: level.recommendation().to_string(),
  }
}

impl DetectionResult {
  /// 保存文件名：`detection_<package>_<YYYYmmdd_HHMMSS>.json`
  pub fn file_name(&self, at: DateTime<Local>) -> String {
    let package: String = self
      .package_id
      .chars()
      .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
      .collect();
    format!("detection_{}_{}.json", package, at.format("%Y%m%d_%H%M%S"))
  }

  pub fn to_json_pretty(&self) -> serde_json::Result<String> {
    serde_json::to_string_pretty(self)
  }

  /// 写入目录，返回文件路径
  pub fn save_json(&self, dir: &Path) -> io::Result<PathBuf> {
    let path = dir.join(self.file_name(Local::now()));
    let text = self.to_json_pretty().map_err(io::Error::other)?;
    fs::write(&path, text)?;
    info!("检测结果已保存: {}", path.display());
    Ok(path)
  }

  /// 人可读的摘要
  pub fn report(&self) -> String {
    format!(
      "Package: {}\nProduct: {}\nBatch: {}\nPacked: {}\nMarker: #{}\nStatus: {} ({:.1}% non-white, confidence {:.1}%)\nSafe: {}\n{}",
      self.package_id,
      self.product_type,
      self.batch_id,
      self.pack_date,
      self.marker_id,
      self.spoilage_level,
      self.spoilage_percentage,
      self.confidence,
      if self.is_safe { "yes" } else { "no" },
      self.recommendation
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::TimeZone;

  fn spoiled() -> Classification {
    Classification {
      level: SpoilageLevel::Spoiled,
      percentage: 62.346,
      readings: Some(ColorReadings {
        fresh_percent: 37.66,
        spoiled_percent: 62.35,
        avg_hue: 3.0,
        avg_saturation: 150.0,
        avg_value: 180.0,
        avg_bgr: [40.0, 40.0, 180.0],
        qr_verified: false,
      }),
    }
  }

  fn at() -> DateTime<Local> {
    Local.with_ymd_and_hms(2026, 3, 14, 9, 26, 53).unwrap()
  }

  #[test]
  fn fallbacks_without_payload() {
    let r = compose(&Payload::default(), 12, &spoiled(), at());
    assert_eq!(r.package_id, "ARUCO-12");
    assert_eq!(r.product_type, "Chicken");
    assert_eq!(r.batch_id, "Unknown");
    assert_eq!(r.pack_date, "Unknown");
    assert_eq!(r.spoilage_percentage, 62.35);
    assert_eq!(r.confidence, 100.0);
    assert!(!r.is_safe);
    assert_eq!(r.timestamp, "2026-03-14T09:26:53.000000");
  }

  #[test]
  fn payload_fields_used_only_with_id() {
    let with_id = Payload::parse(r#"{"id":"PKG-9","product":"Beef","batch":"B1"}"#).unwrap();
    let r = compose(&with_id, 1, &spoiled(), at());
    assert_eq!(r.package_id, "PKG-9");
    assert_eq!(r.product_type, "Beef");
    assert_eq!(r.batch_id, "B1");
    assert_eq!(r.pack_date, "Unknown");

    let without_id = Payload::parse(r#"{"product":"Beef"}"#).unwrap();
    let r = compose(&without_id, 1, &spoiled(), at());
    assert_eq!(r.package_id, "ARUCO-1");
    assert_eq!(r.product_type, "Chicken");
  }

  #[test]
  fn unknown_classification_has_zero_confidence() {
    let r = compose(&Payload::default(), 3, &Classification::unknown(), at());
    assert_eq!(r.spoilage_level, SpoilageLevel::Unknown);
    assert_eq!(r.confidence, 0.0);
    assert!(r.color_readings.is_none());
    assert!(r.recommendation.contains("Inspect manually"));
  }

  #[test]
  fn empty_readings_serialize_as_object() {
    let r = compose(&Payload::default(), 3, &Classification::unknown(), at());
    let value = serde_json::to_value(&r).unwrap();
    assert_eq!(value["color_readings"], serde_json::json!({ "qr_verified": false }));
    assert_eq!(value["spoilage_level"], "UNKNOWN");
  }

  #[test]
  fn serializes_with_marker_field_name() {
    let r = compose(&Payload::default(), 7, &spoiled(), at());
    let value = serde_json::to_value(&r).unwrap();
    assert_eq!(value["aruco_id"], 7);
    assert_eq!(value["spoilage_level"], "SPOILED");
    assert_eq!(value["color_readings"]["avg_bgr"][2], 180.0);
    assert!(value.get("marker_id").is_none());
  }

  #[test]
  fn saves_json_with_dated_name() {
    let dir = tempfile::tempdir().unwrap();
    let r = compose(&Payload::default(), 4, &spoiled(), at());
    assert_eq!(r.file_name(at()), "detection_ARUCO-4_20260314_092653.json");
    let path = r.save_json(dir.path()).unwrap();
    let text = std::fs::read_to_string(path).unwrap();
    assert!(text.contains("\"package_id\": \"ARUCO-4\""));
  }
}
