// 该文件是 Anquan （安全） 项目的一部分。
// src/output/image_sink.rs - 单文件图片输出
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

use super::FrameSink;
use crate::detect::Detection;
use crate::input::Frame;

/// 单文件图片输出
///
/// 每次发布覆盖写同一个输出文件，适合预览最新帧。
pub struct ImageSink {
  output_path: PathBuf,
}

impl ImageSink {
  pub fn new(output_path: impl Into<PathBuf>) -> Self {
    Self {
      output_path: output_path.into(),
    }
  }
}

impl FrameSink for ImageSink {
  fn publish(&mut self, frame: &Frame, _detections: &[Detection]) -> Result<()> {
    frame
      .image
      .save(&self.output_path)
      .with_context(|| format!("无法保存图片: {}", self.output_path.display()))?;

    Ok(())
  }
}
