// 该文件是 Anquan （安全） 项目的一部分。
// src/detect/yolo.rs - YOLO ONNX 检测器
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

use image::{RgbImage, imageops};
use tract_onnx::prelude::*;
use tracing::{debug, info};

use super::{Detection, DetectorConfig, ModelInferenceError, RawDetections, nms};
use crate::detect::Detector;

/// YOLO 边界框通道数（cx, cy, w, h）
const BOX_CHANNELS: usize = 4;

/// 基于 tract-onnx 的 YOLO 检测器
///
/// 加载 ultralytics 导出的 ONNX 检测模型，输入为 NCHW、f32、[0,1]
/// 归一化的正方形帧，输出头为 [1, 4+类别数, 锚点数]。
pub struct YoloDetector {
  model: TypedSimplePlan<TypedModel>,
  config: DetectorConfig,
}

impl YoloDetector {
  /// 按配置加载模型并构建推理计划
  pub fn new(config: DetectorConfig) -> Result<Self, ModelInferenceError> {
    let size = config.input_size as usize;

    info!("加载模型文件: {}", config.model_path.display());
    let model = tract_onnx::onnx()
      .model_for_path(&config.model_path)
      .and_then(|m| {
        m.with_input_fact(
          0,
          InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, size, size)),
        )
      })
      .and_then(|m| m.into_optimized())
      .and_then(|m| m.into_runnable())
      .map_err(|e| {
        ModelInferenceError::ModelLoad(format!("{}: {}", config.model_path.display(), e))
      })?;
    info!("模型加载完成");

    Ok(Self { model, config })
  }

  /// 预处理：缩放到模型输入尺寸并转为 NCHW f32 张量
  fn preprocess(&self, image: &RgbImage) -> Tensor {
    let size = self.config.input_size;
    let resized = imageops::resize(image, size, size, imageops::FilterType::Triangle);

    let size = size as usize;
    let input =
      tract_ndarray::Array4::from_shape_fn((1, 3, size, size), |(_, channel, y, x)| {
        resized.get_pixel(x as u32, y as u32)[channel] as f32 / 255.0
      });

    input.into_tensor()
  }

  /// 后处理：解码输出头、按阈值过滤并做 NMS
  ///
  /// 导出产物的输出轴顺序不完全一致，按 4+类别数 所在的轴判断布局。
  fn postprocess(
    &self,
    output: &Tensor,
    original_width: f32,
    original_height: f32,
  ) -> Result<Vec<Detection>, ModelInferenceError> {
    let view = output
      .to_array_view::<f32>()
      .map_err(ModelInferenceError::Backend)?;

    let channels = BOX_CHANNELS + self.config.num_classes;
    let shape = view.shape();
    if shape.len() != 3 || shape[0] != 1 {
      return Err(ModelInferenceError::MalformedOutput(format!(
        "预期输出形状 [1, {}, N] 或 [1, N, {}], 实际为 {:?}",
        channels, channels, shape
      )));
    }

    // (通道轴, 锚点轴)
    let (channel_axis, anchor_axis) = if shape[1] == channels {
      (1, 2)
    } else if shape[2] == channels {
      (2, 1)
    } else {
      return Err(ModelInferenceError::MalformedOutput(format!(
        "输出通道数与 4+{} 不匹配: {:?}",
        self.config.num_classes, shape
      )));
    };

    let anchors = shape[anchor_axis];
    let at = |channel: usize, anchor: usize| -> f32 {
      let mut idx = [0usize; 3];
      idx[channel_axis] = channel;
      idx[anchor_axis] = anchor;
      view[idx]
    };

    let input_size = self.config.input_size as f32;
    let scale_x = original_width / input_size;
    let scale_y = original_height / input_size;

    let mut raw = RawDetections::default();
    for anchor in 0..anchors {
      // 找到最高类别分数
      let mut best_score = 0.0f32;
      let mut best_class = 0usize;
      for class_id in 0..self.config.num_classes {
        let score = at(BOX_CHANNELS + class_id, anchor);
        if score > best_score {
          best_score = score;
          best_class = class_id;
        }
      }

      if best_score < self.config.confidence_threshold {
        continue;
      }

      let cx = at(0, anchor);
      let cy = at(1, anchor);
      let w = at(2, anchor);
      let h = at(3, anchor);

      // 中心点格式转角点格式，并缩放回原始图像尺寸
      let x_min = ((cx - w / 2.0) * scale_x).clamp(0.0, original_width);
      let y_min = ((cy - h / 2.0) * scale_y).clamp(0.0, original_height);
      let x_max = ((cx + w / 2.0) * scale_x).clamp(0.0, original_width);
      let y_max = ((cy + h / 2.0) * scale_y).clamp(0.0, original_height);

      raw.push([x_min, y_min, x_max, y_max], best_score, best_class);
    }

    let detections = raw.into_detections()?;
    debug!("阈值过滤后剩余 {} 个候选", detections.len());

    Ok(nms(detections, self.config.iou_threshold))
  }
}

impl Detector for YoloDetector {
  fn detect(&self, image: &RgbImage) -> Result<Vec<Detection>, ModelInferenceError> {
    let original_width = image.width() as f32;
    let original_height = image.height() as f32;

    debug!("设置模型输入");
    let input = self.preprocess(image);

    debug!("执行模型推理");
    let outputs = self
      .model
      .run(tvec!(input.into()))
      .map_err(ModelInferenceError::Backend)?;

    let output = outputs.first().ok_or_else(|| {
      ModelInferenceError::MalformedOutput("模型没有产生任何输出".to_string())
    })?;

    let detections = self.postprocess(output, original_width, original_height)?;
    debug!("检测到 {} 个物体", detections.len());

    Ok(detections)
  }
}
