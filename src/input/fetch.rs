// 该文件是 Anquan （安全） 项目的一部分。
// src/input/fetch.rs - 单帧图像来源（文件 / URL / data URI）
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

use std::io::Read;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use image::{ImageReader, RgbImage};
use thiserror::Error;
use tracing::debug;
use url::Url;

const DATA_URI_PREFIX: &str = "data:image/";

/// 图像来源错误
///
/// 单帧管线的来源边界错误，出错即上报调用方，不再进入检测。
#[derive(Error, Debug)]
pub enum SourceFetchError {
  #[error("HTTP 请求失败: 状态码 {0}")]
  HttpStatus(u16),
  #[error("HTTP 传输错误: {0}")]
  Http(String),
  #[error("data URI 缺少 base64 负载")]
  MalformedDataUri,
  #[error("base64 解码失败: {0}")]
  Base64(#[from] base64::DecodeError),
  #[error("图像解码失败: {0}")]
  Decode(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
}

/// 加载一帧静态图像
///
/// 按前缀分派：`data:image/...` 为内嵌 base64 数据，`http(s)://` 为
/// 远程 URL，其余视为本地文件路径。输出统一为 RGB8。
pub fn load_image(input: &str) -> Result<RgbImage, SourceFetchError> {
  if input.starts_with(DATA_URI_PREFIX) {
    debug!("按 data URI 解码输入图像");
    return decode_data_uri(input);
  }

  if let Ok(url) = Url::parse(input) {
    if matches!(url.scheme(), "http" | "https") {
      debug!("按 URL 拉取输入图像: {}", url);
      return fetch_http(input);
    }
  }

  debug!("按本地文件读取输入图像: {}", input);
  let image = ImageReader::open(input)?.decode()?;
  Ok(image.into_rgb8())
}

fn decode_data_uri(input: &str) -> Result<RgbImage, SourceFetchError> {
  // data:image/png;base64,xxxx —— 逗号后为负载
  let (_, payload) = input
    .split_once(',')
    .ok_or(SourceFetchError::MalformedDataUri)?;

  let bytes = STANDARD.decode(payload.trim())?;
  Ok(image::load_from_memory(&bytes)?.into_rgb8())
}

fn fetch_http(url: &str) -> Result<RgbImage, SourceFetchError> {
  match ureq::get(url).call() {
    Ok(response) => {
      let mut bytes = Vec::new();
      response.into_reader().read_to_end(&mut bytes)?;
      Ok(image::load_from_memory(&bytes)?.into_rgb8())
    }
    // 非 2xx 状态码按可报告错误处理，不让 HTTP 细节外泄
    Err(ureq::Error::Status(code, _)) => Err(SourceFetchError::HttpStatus(code)),
    Err(e) => Err(SourceFetchError::Http(e.to_string())),
  }
}
