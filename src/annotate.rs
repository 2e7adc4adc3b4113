// 该文件是 Anquan （安全） 项目的一部分。
// src/annotate.rs - 检测结果标注
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

use ab_glyph::{FontRef, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use tracing::warn;

use crate::catalog::ClassCatalog;
use crate::detect::Detection;

// 标注默认参数
const BOX_COLOR: [u8; 3] = [255, 0, 0]; // 红色
const STROKE_WIDTH: u32 = 3;
const LABEL_FONT_SIZE: f32 = 16.0;

/// 标注汇总
///
/// skipped 统计被跳过的检测（类别越界或退化框），每次跳过均有告警日志。
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AnnotateSummary {
  pub drawn: usize,
  pub skipped: usize,
}

/// 标注器
///
/// 在帧上绘制边界框与 `"{类别名} {置信度:.2}"` 标签。检测按输入顺序
/// 绘制，重叠的标签不做避让。
pub struct Annotator<'a> {
  color: Rgb<u8>,
  stroke_width: u32,
  font: FontRef<'a>,
  font_scale: PxScale,
}

impl Default for Annotator<'_> {
  fn default() -> Self {
    // 使用内置的默认字体数据
    let font_data = include_bytes!("../assets/DejaVuSans.ttf");
    let font = FontRef::try_from_slice(font_data).expect("无法加载嵌入的字体文件");

    Self {
      color: Rgb(BOX_COLOR),
      stroke_width: STROKE_WIDTH,
      font,
      font_scale: PxScale::from(LABEL_FONT_SIZE),
    }
  }
}

impl Annotator<'_> {
  pub fn with_color(mut self, color: [u8; 3]) -> Self {
    self.color = Rgb(color);
    self
  }

  pub fn with_stroke_width(mut self, stroke_width: u32) -> Self {
    self.stroke_width = stroke_width.max(1);
    self
  }

  /// 在图像上绘制所有有效检测，返回绘制/跳过统计
  ///
  /// 无效检测（类别越界、裁剪后宽高非正）只跳过该条并告警，不中断整批。
  /// 全部跳过时图像保持原样。
  pub fn annotate(
    &self,
    image: &mut RgbImage,
    detections: &[Detection],
    catalog: &ClassCatalog,
  ) -> AnnotateSummary {
    let mut summary = AnnotateSummary::default();

    for detection in detections {
      let Some(class_name) = catalog.name(detection.class_id) else {
        warn!(
          "类别索引越界: class_id={}, 目录类别数={}",
          detection.class_id,
          catalog.len()
        );
        summary.skipped += 1;
        continue;
      };

      let Some((x_min, y_min, x_max, y_max)) = clamp_bbox(&detection.bbox, image) else {
        warn!("边界框裁剪后退化, 跳过: {:?}", detection.bbox);
        summary.skipped += 1;
        continue;
      };

      self.draw_box(image, x_min, y_min, x_max, y_max);

      let label = format!("{} {:.2}", class_name, detection.confidence);
      draw_text_mut(
        image,
        self.color,
        x_min,
        y_min,
        self.font_scale,
        &self.font,
        &label,
      );

      summary.drawn += 1;
    }

    summary
  }

  /// 绘制指定线宽的矩形边框（向内收缩加粗）
  fn draw_box(&self, image: &mut RgbImage, x_min: i32, y_min: i32, x_max: i32, y_max: i32) {
    for t in 0..self.stroke_width as i32 {
      let width = (x_max - x_min + 1) - 2 * t;
      let height = (y_max - y_min + 1) - 2 * t;
      if width <= 0 || height <= 0 {
        break;
      }

      let rect = Rect::at(x_min + t, y_min + t).of_size(width as u32, height as u32);
      draw_hollow_rect_mut(image, rect, self.color);
    }
  }
}

/// 将边界框裁剪到图像范围内，退化框返回 None
fn clamp_bbox(bbox: &[f32; 4], image: &RgbImage) -> Option<(i32, i32, i32, i32)> {
  let w = image.width() as f32;
  let h = image.height() as f32;
  if w < 1.0 || h < 1.0 {
    return None;
  }

  let x_min = bbox[0].floor().clamp(0.0, w - 1.0) as i32;
  let y_min = bbox[1].floor().clamp(0.0, h - 1.0) as i32;
  let x_max = bbox[2].ceil().clamp(0.0, w - 1.0) as i32;
  let y_max = bbox[3].ceil().clamp(0.0, h - 1.0) as i32;

  if x_min >= x_max || y_min >= y_max {
    return None;
  }

  Some((x_min, y_min, x_max, y_max))
}
