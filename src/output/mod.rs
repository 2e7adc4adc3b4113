// 该文件是 Anquan （安全） 项目的一部分。
// src/output/mod.rs - 输出模块
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

#[cfg(feature = "directory_record")]
mod directory_record;
mod image_sink;

#[cfg(feature = "directory_record")]
pub use directory_record::DirectorySink;
pub use image_sink::ImageSink;

use anyhow::Result;

use crate::detect::Detection;
use crate::input::Frame;

/// 帧发布目标 trait
///
/// 发布不要求确认（fire-and-forget），同一时刻只有一个写入者。
/// 检测列表随帧一起传入，供需要落盘记录的实现使用。
pub trait FrameSink {
  /// 发布一帧
  fn publish(&mut self, frame: &Frame, detections: &[Detection]) -> Result<()>;

  /// 完成写入
  fn finish(&mut self) -> Result<()> {
    Ok(())
  }
}
