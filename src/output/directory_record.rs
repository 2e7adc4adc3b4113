// 该文件是 Anquan （安全） 项目的一部分。
// src/output/directory_record.rs - 目录记录输出
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

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{Datelike, Utc};

use super::FrameSink;
use crate::catalog::ClassCatalog;
use crate::detect::Detection;
use crate::input::Frame;

/// 目录记录输出
///
/// 把每一帧按日期目录 `YYYY/MM/DD/HH-MM-SS-XXXX.png` 落盘，
/// 可选为每帧附带一份 JSON 检测记录。
pub struct DirectorySink {
  directory: PathBuf,
  frame_counter: u16,
  record_detections: bool,
  catalog: Option<ClassCatalog>,
}

impl DirectorySink {
  pub fn new(directory: impl Into<PathBuf>) -> Self {
    Self {
      directory: directory.into(),
      frame_counter: 0,
      record_detections: false,
      catalog: None,
    }
  }

  /// 同时写 JSON 检测记录
  pub fn with_record(mut self, record: bool) -> Self {
    self.record_detections = record;
    self
  }

  /// 记录中附带类别名称（缺省只记录类别索引）
  pub fn with_catalog(mut self, catalog: ClassCatalog) -> Self {
    self.catalog = Some(catalog);
    self
  }

  fn next_frame_path(&mut self) -> Result<PathBuf> {
    let now = Utc::now();
    let directory = self
      .directory
      .join(now.year().to_string())
      .join(format!("{:02}", now.month()))
      .join(format!("{:02}", now.day()));
    if !directory.exists() {
      std::fs::create_dir_all(&directory)
        .with_context(|| format!("无法创建输出目录: {}", directory.display()))?;
    }

    self.frame_counter = self.frame_counter.wrapping_add(1);
    Ok(directory.join(format!(
      "{}-{:04X}.png",
      now.format("%H-%M-%S"),
      self.frame_counter
    )))
  }

  fn detection_record(&self, frame: &Frame, detections: &[Detection]) -> serde_json::Value {
    let items: Vec<serde_json::Value> = detections
      .iter()
      .map(|det| {
        let mut item = serde_json::json!({
          "bbox": det.bbox,
          "confidence": det.confidence,
          "class_id": det.class_id,
        });
        if let Some(name) = self.catalog.as_ref().and_then(|c| c.name(det.class_id)) {
          item["class_name"] = serde_json::Value::String(name.to_string());
        }
        item
      })
      .collect();

    serde_json::json!({
      "index": frame.index,
      "timestamp_ms": frame.timestamp_ms,
      "detections": items,
    })
  }
}

impl FrameSink for DirectorySink {
  fn publish(&mut self, frame: &Frame, detections: &[Detection]) -> Result<()> {
    let path = self.next_frame_path()?;

    frame
      .image
      .save(&path)
      .with_context(|| format!("无法保存图片: {}", path.display()))?;

    if self.record_detections {
      let record = self.detection_record(frame, detections);
      let record_path = path.with_extension("json");
      std::fs::write(&record_path, record.to_string())
        .with_context(|| format!("无法写入检测记录: {}", record_path.display()))?;
    }

    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use image::RgbImage;

  use super::*;

  fn frame(index: u64) -> Frame {
    Frame {
      image: RgbImage::new(8, 8),
      index,
      timestamp_ms: index * 33,
    }
  }

  #[test]
  fn publishes_into_dated_directory() {
    let dir = tempfile::tempdir().unwrap();
    let mut sink = DirectorySink::new(dir.path());

    sink.publish(&frame(0), &[]).unwrap();

    let now = Utc::now();
    let dated = dir
      .path()
      .join(now.year().to_string())
      .join(format!("{:02}", now.month()))
      .join(format!("{:02}", now.day()));
    let entries: Vec<_> = std::fs::read_dir(&dated).unwrap().collect();
    assert_eq!(entries.len(), 1);
  }

  #[test]
  fn json_record_carries_class_names() {
    let dir = tempfile::tempdir().unwrap();
    let mut sink = DirectorySink::new(dir.path())
      .with_record(true)
      .with_catalog(ClassCatalog::ppe());

    let detections = vec![Detection {
      bbox: [10.0, 10.0, 50.0, 50.0],
      confidence: 0.87,
      class_id: 2,
    }];
    sink.publish(&frame(7), &detections).unwrap();

    let mut json_files = Vec::new();
    for entry in walk(dir.path()) {
      if entry.extension().is_some_and(|e| e == "json") {
        json_files.push(entry);
      }
    }
    assert_eq!(json_files.len(), 1);

    let record: serde_json::Value =
      serde_json::from_str(&std::fs::read_to_string(&json_files[0]).unwrap()).unwrap();
    assert_eq!(record["index"], 7);
    assert_eq!(record["detections"][0]["class_name"], "helmet");
    assert_eq!(record["detections"][0]["class_id"], 2);
  }

  fn walk(dir: &std::path::Path) -> Vec<PathBuf> {
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir).unwrap().flatten() {
      let path = entry.path();
      if path.is_dir() {
        paths.extend(walk(&path));
      } else {
        paths.push(path);
      }
    }
    paths
  }
}
