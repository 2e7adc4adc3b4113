// 该文件是 Anquan （安全） 项目的一部分。
// src/bin/ppe_oneshot.rs - 单帧 PPE 检测
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
use clap::Parser;
use tracing::info;

use anquan::annotate::Annotator;
use anquan::catalog::ClassCatalog;
use anquan::detect::{DetectorConfig, YoloDetector};
use anquan::input::load_image;
use anquan::oneshot::{DEFAULT_MAGNIFICATION, run_oneshot};

/// 单帧 PPE 检测参数
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// ONNX 模型文件路径
  #[arg(long, value_name = "FILE")]
  pub model: PathBuf,

  /// 输入图像来源
  /// 支持格式:
  /// - 本地文件: photo.jpg
  /// - 远程 URL: https://example.com/site.jpg
  /// - 内嵌数据: data:image/png;base64,....
  #[arg(long, value_name = "SOURCE")]
  pub input: String,

  /// 输出图片路径
  #[arg(long, value_name = "OUTPUT")]
  pub output: PathBuf,

  /// 置信度阈值 (0.0 - 1.0)
  #[arg(long, default_value = "0.5", value_name = "THRESHOLD")]
  pub confidence: f32,

  /// NMS IoU 阈值 (0.0 - 1.0)
  #[arg(long, default_value = "0.45", value_name = "THRESHOLD")]
  pub iou_threshold: f32,

  /// 展示放大倍数
  #[arg(long, default_value_t = DEFAULT_MAGNIFICATION, value_name = "FACTOR")]
  pub scale: u32,

  /// 额外写一份 JSON 检测记录
  #[arg(long, value_name = "FILE")]
  pub record: Option<PathBuf>,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型文件路径: {}", args.model.display());
  info!("输入来源: {}", args.input);
  info!("输出路径: {}", args.output.display());

  let image = load_image(&args.input)?;
  info!("输入图像: {}x{}", image.width(), image.height());

  let catalog = ClassCatalog::ppe();
  let config = DetectorConfig::new(&args.model)
    .with_confidence_threshold(args.confidence)
    .with_iou_threshold(args.iou_threshold)
    .with_num_classes(catalog.len());
  let detector = YoloDetector::new(config)?;
  let annotator = Annotator::default();

  let outcome = run_oneshot(&detector, &annotator, &catalog, image, args.scale)?;
  info!(
    "绘制 {} 个检测, 跳过 {} 个",
    outcome.summary.drawn, outcome.summary.skipped
  );

  outcome
    .image
    .save(&args.output)
    .with_context(|| format!("无法保存图片: {}", args.output.display()))?;

  if let Some(record_path) = args.record {
    let items: Vec<serde_json::Value> = outcome
      .detections
      .iter()
      .map(|det| {
        serde_json::json!({
          "bbox": det.bbox,
          "confidence": det.confidence,
          "class_id": det.class_id,
          "class_name": catalog.name(det.class_id),
        })
      })
      .collect();
    std::fs::write(&record_path, serde_json::json!({ "detections": items }).to_string())
      .with_context(|| format!("无法写入检测记录: {}", record_path.display()))?;
    info!("检测记录已写入: {}", record_path.display());
  }

  Ok(())
}
