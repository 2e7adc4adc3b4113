// 该文件是 Anquan （安全） 项目的一部分。
// src/input/mod.rs - 输入源模块
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

mod fetch;
#[cfg(feature = "v4l2_input")]
mod v4l2_source;

pub use fetch::{SourceFetchError, load_image};
#[cfg(feature = "v4l2_input")]
pub use v4l2_source::V4l2Source;

use image::RgbImage;
use thiserror::Error;

/// 帧数据
///
/// 每个采集节拍创建一帧，管线各阶段按所有权转移传递，显示后即销毁。
pub struct Frame {
  /// RGB 图像数据
  pub image: RgbImage,
  /// 帧索引
  pub index: u64,
  /// 时间戳（毫秒）
  pub timestamp_ms: u64,
}

/// 采集设备错误
///
/// 对当前流会话是致命的：控制器释放设备并回到空闲态，但不影响进程。
#[derive(Error, Debug)]
pub enum DeviceError {
  #[error("设备打开失败: {0}")]
  Open(String),
  #[error("设备读取失败: {0}")]
  Read(String),
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
}

/// 帧输入源 trait
///
/// `read_frame` 返回 `Ok(None)` 表示流结束。打开即构造，关闭由 Drop
/// 保证，设备句柄在会话期间由持有者独占。
pub trait FrameSource {
  fn read_frame(&mut self) -> Result<Option<Frame>, DeviceError>;

  /// 帧宽度
  fn width(&self) -> u32;

  /// 帧高度
  fn height(&self) -> u32;

  /// 帧率（如果适用）
  fn fps(&self) -> Option<f64> {
    None
  }
}
