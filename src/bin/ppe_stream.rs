// 该文件是 Anquan （安全） 项目的一部分。
// src/bin/ppe_stream.rs - 摄像头 PPE 连续检测
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
use std::thread;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};

use anquan::annotate::Annotator;
use anquan::catalog::ClassCatalog;
use anquan::detect::{DetectorConfig, YoloDetector};
use anquan::input::V4l2Source;
use anquan::output::DirectorySink;
use anquan::stream::StreamController;

/// 摄像头 PPE 连续检测参数
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// ONNX 模型文件路径
  #[arg(long, value_name = "FILE")]
  pub model: PathBuf,

  /// V4L2 设备路径
  #[arg(long, default_value = "/dev/video0", value_name = "DEVICE")]
  pub device: String,

  /// 输出目录
  #[arg(long, value_name = "DIRECTORY")]
  pub output: PathBuf,

  /// 置信度阈值 (0.0 - 1.0)
  #[arg(long, default_value = "0.5", value_name = "THRESHOLD")]
  pub confidence: f32,

  /// NMS IoU 阈值 (0.0 - 1.0)
  #[arg(long, default_value = "0.45", value_name = "THRESHOLD")]
  pub iou_threshold: f32,

  /// 最大处理帧数（不指定表示无限制）
  #[arg(long, value_name = "COUNT")]
  pub max_frames: Option<u64>,

  /// 为每帧写一份 JSON 检测记录
  #[arg(long)]
  pub record: bool,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型文件路径: {}", args.model.display());
  info!("输入设备: {}", args.device);
  info!("输出目录: {}", args.output.display());

  let catalog = ClassCatalog::ppe();
  let config = DetectorConfig::new(&args.model)
    .with_confidence_threshold(args.confidence)
    .with_iou_threshold(args.iou_threshold)
    .with_num_classes(catalog.len());
  let detector = YoloDetector::new(config)?;

  let sink = DirectorySink::new(&args.output)
    .with_record(args.record)
    .with_catalog(catalog.clone());

  let mut controller = StreamController::new(detector, Annotator::default(), catalog, sink)
    .with_max_frames(args.max_frames);
  let control = controller.control();

  ctrlc::set_handler(move || {
    info!("收到中断信号, 准备退出...");
    control.stop();
    thread::spawn(|| {
      thread::sleep(Duration::from_secs(30));
      warn!("强制退出程序");
      std::process::exit(1);
    });
  })
  .expect("Error setting Ctrl-C handler");

  let device = args.device.clone();
  let summary = controller.start(move || V4l2Source::new(&device))?;

  info!(
    "会话结束: 读取 {} 帧, 发布 {} 帧 ({:?})",
    summary.frames_read, summary.frames_published, summary.outcome
  );

  Ok(())
}
