// 该文件是 Anquan （安全） 项目的一部分。
// src/detect/mod.rs - 模型适配层
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

use image::RgbImage;
use thiserror::Error;

#[cfg(feature = "backend-tract")]
mod yolo;
#[cfg(feature = "backend-tract")]
pub use self::yolo::YoloDetector;

/// 单个检测结果
///
/// 在模型适配层一次性构造，下游组件不再接触后端的平行数组。
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
  /// 边界框 [x_min, y_min, x_max, y_max]（像素坐标）
  pub bbox: [f32; 4],
  /// 置信度 [0, 1]
  pub confidence: f32,
  /// 类别索引
  pub class_id: usize,
}

/// 模型推理错误
#[derive(Error, Debug)]
pub enum ModelInferenceError {
  #[error("模型输出格式错误: {0}")]
  MalformedOutput(String),
  #[error("模型加载错误: {0}")]
  ModelLoad(String),
  #[error("推理后端错误: {0}")]
  Backend(#[from] anyhow::Error),
}

/// 检测后端的原始输出边界
///
/// 边界框、置信度、类别索引三个平行数组必须等长，
/// 长度不一致只可能来自损坏的解码，按 `MalformedOutput` 处理。
#[derive(Debug, Default)]
pub struct RawDetections {
  pub boxes: Vec<[f32; 4]>,
  pub confidences: Vec<f32>,
  pub class_ids: Vec<usize>,
}

impl RawDetections {
  pub fn push(&mut self, bbox: [f32; 4], confidence: f32, class_id: usize) {
    self.boxes.push(bbox);
    self.confidences.push(confidence);
    self.class_ids.push(class_id);
  }

  /// 转换为 Detection 记录列表
  pub fn into_detections(self) -> Result<Vec<Detection>, ModelInferenceError> {
    if self.boxes.len() != self.confidences.len() || self.boxes.len() != self.class_ids.len() {
      return Err(ModelInferenceError::MalformedOutput(format!(
        "平行数组长度不一致: boxes={}, confidences={}, class_ids={}",
        self.boxes.len(),
        self.confidences.len(),
        self.class_ids.len()
      )));
    }

    Ok(
      self
        .boxes
        .into_iter()
        .zip(self.confidences)
        .zip(self.class_ids)
        .map(|((bbox, confidence), class_id)| Detection {
          bbox,
          confidence,
          class_id,
        })
        .collect(),
    )
  }
}

/// 检测器 trait
///
/// 对固定的模型、阈值与输入帧，实现必须是确定性的，且不得修改输入帧。
pub trait Detector {
  fn detect(&self, image: &RgbImage) -> Result<Vec<Detection>, ModelInferenceError>;
}

/// 检测器配置
///
/// 模型文件由配置显式指定，不在代码中写死某一个训练产物。
#[derive(Debug, Clone)]
pub struct DetectorConfig {
  /// ONNX 模型文件路径
  pub model_path: PathBuf,
  /// 置信度阈值 (0.0 - 1.0)
  pub confidence_threshold: f32,
  /// NMS IoU 阈值 (0.0 - 1.0)
  pub iou_threshold: f32,
  /// 模型输入边长（正方形输入）
  pub input_size: u32,
  /// 类别数量
  pub num_classes: usize,
}

impl DetectorConfig {
  pub fn new(model_path: impl Into<PathBuf>) -> Self {
    Self {
      model_path: model_path.into(),
      confidence_threshold: 0.5,
      iou_threshold: 0.45,
      input_size: 640,
      num_classes: crate::catalog::PPE_CLASSES.len(),
    }
  }

  pub fn with_confidence_threshold(mut self, threshold: f32) -> Self {
    self.confidence_threshold = threshold;
    self
  }

  pub fn with_iou_threshold(mut self, threshold: f32) -> Self {
    self.iou_threshold = threshold;
    self
  }

  pub fn with_input_size(mut self, size: u32) -> Self {
    self.input_size = size;
    self
  }

  pub fn with_num_classes(mut self, num_classes: usize) -> Self {
    self.num_classes = num_classes;
    self
  }
}

/// 计算两个边界框的 IoU
pub(crate) fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
  let x1 = a[0].max(b[0]);
  let y1 = a[1].max(b[1]);
  let x2 = a[2].min(b[2]);
  let y2 = a[3].min(b[3]);

  let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
  let area_a = (a[2] - a[0]) * (a[3] - a[1]);
  let area_b = (b[2] - b[0]) * (b[3] - b[1]);
  let union = area_a + area_b - intersection;

  if union > 0.0 { intersection / union } else { 0.0 }
}

/// 同类别非极大值抑制
pub(crate) fn nms(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
  // 按置信度降序排序
  detections.sort_by(|a, b| {
    b.confidence
      .partial_cmp(&a.confidence)
      .unwrap_or(std::cmp::Ordering::Equal)
  });

  let mut result = Vec::new();

  while !detections.is_empty() {
    let best = detections.remove(0);

    detections.retain(|det| {
      if det.class_id != best.class_id {
        return true;
      }
      iou(&best.bbox, &det.bbox) < iou_threshold
    });

    result.push(best);
  }

  result
}

#[cfg(test)]
mod tests {
  use super::*;

  fn det(bbox: [f32; 4], confidence: f32, class_id: usize) -> Detection {
    Detection {
      bbox,
      confidence,
      class_id,
    }
  }

  #[test]
  fn raw_detections_roundtrip() {
    let mut raw = RawDetections::default();
    raw.push([10.0, 10.0, 50.0, 50.0], 0.87, 2);
    raw.push([0.0, 0.0, 20.0, 30.0], 0.6, 4);

    let detections = raw.into_detections().unwrap();
    assert_eq!(detections.len(), 2);
    assert_eq!(detections[0].class_id, 2);
    assert_eq!(detections[0].bbox, [10.0, 10.0, 50.0, 50.0]);
    assert_eq!(detections[1].confidence, 0.6);
  }

  #[test]
  fn mismatched_arrays_are_malformed_output() {
    let raw = RawDetections {
      boxes: vec![[0.0, 0.0, 1.0, 1.0], [1.0, 1.0, 2.0, 2.0]],
      confidences: vec![0.9],
      class_ids: vec![0, 1],
    };

    let err = raw.into_detections().unwrap_err();
    assert!(matches!(err, ModelInferenceError::MalformedOutput(_)));
  }

  #[test]
  fn iou_of_identical_boxes_is_one() {
    let b = [10.0, 10.0, 50.0, 50.0];
    assert!((iou(&b, &b) - 1.0).abs() < 1e-6);
  }

  #[test]
  fn iou_of_disjoint_boxes_is_zero() {
    let a = [0.0, 0.0, 10.0, 10.0];
    let b = [20.0, 20.0, 30.0, 30.0];
    assert_eq!(iou(&a, &b), 0.0);
  }

  #[test]
  fn nms_keeps_highest_confidence_per_cluster() {
    let detections = vec![
      det([10.0, 10.0, 50.0, 50.0], 0.7, 2),
      det([12.0, 12.0, 52.0, 52.0], 0.9, 2),
      det([100.0, 100.0, 150.0, 150.0], 0.8, 2),
    ];

    let kept = nms(detections, 0.45);
    assert_eq!(kept.len(), 2);
    assert_eq!(kept[0].confidence, 0.9);
    assert_eq!(kept[1].confidence, 0.8);
  }

  #[test]
  fn nms_does_not_suppress_across_classes() {
    let detections = vec![
      det([10.0, 10.0, 50.0, 50.0], 0.9, 2),
      det([10.0, 10.0, 50.0, 50.0], 0.8, 4),
    ];

    let kept = nms(detections, 0.45);
    assert_eq!(kept.len(), 2);
  }
}
