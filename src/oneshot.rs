// 该文件是 Anquan （安全） 项目的一部分。
// src/oneshot.rs - 单帧检测管线
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
use tracing::info;

use crate::annotate::{AnnotateSummary, Annotator};
use crate::catalog::ClassCatalog;
use crate::detect::{Detection, Detector, ModelInferenceError};

/// 展示用的默认放大倍数
pub const DEFAULT_MAGNIFICATION: u32 = 2;

/// 单帧管线结果
#[derive(Debug)]
pub struct OneShotOutcome {
  /// 标注并放大后的展示图像
  pub image: RgbImage,
  /// 本帧的检测列表
  pub detections: Vec<Detection>,
  /// 标注统计
  pub summary: AnnotateSummary,
}

/// 对一帧静态图像执行一次检测 + 标注 + 放大
///
/// 每次调用相互独立，不保留任何状态；模型与输入相同则结果相同。
/// 推理失败时中止本次调用并上报，不产生展示图像。
pub fn run_oneshot<M: Detector>(
  detector: &M,
  annotator: &Annotator<'_>,
  catalog: &ClassCatalog,
  mut image: RgbImage,
  magnification: u32,
) -> Result<OneShotOutcome, ModelInferenceError> {
  let detections = detector.detect(&image)?;
  info!("检测到 {} 个物体", detections.len());

  let summary = annotator.annotate(&mut image, &detections, catalog);
  if summary.skipped > 0 {
    info!("跳过 {} 个无效检测", summary.skipped);
  }

  // 放大仅为展示，最近邻即可
  let image = if magnification > 1 {
    imageops::resize(
      &image,
      image.width() * magnification,
      image.height() * magnification,
      imageops::FilterType::Nearest,
    )
  } else {
    image
  };

  Ok(OneShotOutcome {
    image,
    detections,
    summary,
  })
}
