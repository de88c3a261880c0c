// 该文件是 Shijue （视觉） 项目的一部分。
// src/output/draw.rs - 检测与分割结果可视化
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
use image::{DynamicImage, Rgb, RgbImage, RgbaImage, imageops};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;

use crate::{
  frame::Frame,
  model::{DetectResult, SegmentResult, WithLabel, WithPalette},
};

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 20.0;
const LABEL_TEXT_HEIGHT: i32 = 24;
const LABEL_CHAR_WIDTH: f32 = 11.0; // 每字符平均宽度（粗略估计）
const LABEL_TEXT_VERTICAL_PADDING: i32 = 2;
const BOX_COLOR: [u8; 3] = [0, 255, 136];
const BOX_THICKNESS: i32 = 2;

pub struct Draw<'a> {
  font_size: f32,
  label_text_height: i32,
  label_char_width: f32,
  label_text_vertical_padding: i32,
  font: FontRef<'a>,
}

impl<'a> Default for Draw<'a> {
  fn default() -> Self {
    let font_data = include_bytes!("../../assets/DejaVuSans.ttf");
    let font = FontRef::try_from_slice(font_data).expect("无法加载嵌入的字体文件");

    Self {
      font_size: LABEL_FONT_SIZE,
      label_text_height: LABEL_TEXT_HEIGHT,
      label_char_width: LABEL_CHAR_WIDTH,
      label_text_vertical_padding: LABEL_TEXT_VERTICAL_PADDING,
      font,
    }
  }
}

impl<'a> Draw<'a> {
  // rect 为源图像像素坐标 [x_min, y_min, x_max, y_max]
  fn draw_bbox_with_label<T: WithLabel>(
    &self,
    image: &mut RgbImage,
    rect: &[f32; 4],
    kind: &T,
    score: f32,
  ) {
    let (w, h) = (image.width() as i32, image.height() as i32);
    if w == 0 || h == 0 {
      return;
    }

    let x_min = (rect[0].floor() as i32).clamp(0, w - 1);
    let y_min = (rect[1].floor() as i32).clamp(0, h - 1);
    let x_max = (rect[2].ceil() as i32).clamp(0, w - 1);
    let y_max = (rect[3].ceil() as i32).clamp(0, h - 1);

    if x_min >= x_max || y_min >= y_max {
      return;
    }

    let color = Rgb(BOX_COLOR);
    for t in 0..BOX_THICKNESS {
      let width = x_max - x_min + 1 - 2 * t;
      let height = y_max - y_min + 1 - 2 * t;
      if width <= 0 || height <= 0 {
        break;
      }
      let border = Rect::at(x_min + t, y_min + t).of_size(width as u32, height as u32);
      draw_hollow_rect_mut(image, border, color);
    }

    let label = format!("{} {:.2}", kind.to_label_str(), score);
    let scale = PxScale::from(self.font_size);
    let text_color = Rgb([0u8, 0u8, 0u8]);

    let text_width = (label.len() as f32 * self.label_char_width) as i32;
    let text_height = self.label_text_height;

    // 标签放在边框上方，空间不足时贴着图像顶部
    let label_x = x_min;
    let label_y = (y_min - text_height).max(0);
    let label_width = text_width.min(w - label_x).max(0) as u32;
    let label_height = text_height.min(h - label_y).max(0) as u32;

    if label_width > 0 && label_height > 0 {
      let background = Rect::at(label_x, label_y).of_size(label_width, label_height);
      draw_filled_rect_mut(image, background, color);
      draw_text_mut(
        image,
        text_color,
        label_x,
        label_y + self.label_text_vertical_padding,
        scale,
        &self.font,
        &label,
      );
    }
  }
}

/// 将推理结果绘制到帧的副本上
pub trait DrawResult<R> {
  fn draw_result(&self, frame: &Frame, result: &R) -> RgbImage;
}

impl<T: WithLabel> DrawResult<DetectResult<T>> for Draw<'_> {
  fn draw_result(&self, frame: &Frame, result: &DetectResult<T>) -> RgbImage {
    let mut image = frame.image().clone();
    let (width, height) = image.dimensions();
    for item in result.items.iter() {
      let rect = item.source_rect(width, height, result.input_size);
      self.draw_bbox_with_label(&mut image, &rect, &item.kind, item.score);
    }
    image
  }
}

impl<T: WithPalette> DrawResult<SegmentResult<T>> for Draw<'_> {
  fn draw_result(&self, frame: &Frame, result: &SegmentResult<T>) -> RgbImage {
    overlay_mask(frame.image(), result)
  }
}

/// 着色掩码按最近邻缩放回源图尺寸，以结果自带的透明度叠加到源图上
pub fn overlay_mask<T: WithPalette>(source: &RgbImage, result: &SegmentResult<T>) -> RgbImage {
  let (width, height) = source.dimensions();
  let colored = result.colorize(result.alpha());
  let colored = if colored.dimensions() == (width, height) {
    colored
  } else {
    imageops::resize(&colored, width, height, imageops::FilterType::Nearest)
  };

  let mut canvas = DynamicImage::ImageRgb8(source.clone()).to_rgba8();
  imageops::overlay(&mut canvas, &colored, 0, 0);
  DynamicImage::ImageRgba8(canvas).to_rgb8()
}

/// 着色掩码，带结果自带的透明度，保持模型输出分辨率
pub fn mask_image<T: WithPalette>(result: &SegmentResult<T>) -> RgbaImage {
  result.colorize(result.alpha())
}

#[cfg(feature = "directory_record")]
pub use self::record::{Record, RecordFormat, RecordResult};

#[cfg(feature = "directory_record")]
mod record {
  use std::path::Path;

  use serde_json::json;

  use crate::{
    frame::Frame,
    model::{DetectResult, SegmentResult, WithLabel},
  };

  #[derive(Debug, Clone, Copy, PartialEq, Eq)]
  pub enum RecordFormat {
    /// 文本，类别名称
    Name,
    /// 文本，类别编号
    Id,
    Json,
  }

  pub struct Record {
    pub format: RecordFormat,
  }

  /// 将推理结果写成与图像同名的记录文件
  pub trait RecordResult<R> {
    fn record(&self, frame: &Frame, result: &R, path: &Path) -> Result<(), std::io::Error>;
  }

  impl Record {
    fn label<T: WithLabel>(&self, kind: &T) -> String {
      match self.format {
        RecordFormat::Id => format!("{}", kind.to_label_id()),
        _ => kind.to_label_str(),
      }
    }

    fn write_json(path: &Path, value: &serde_json::Value) -> Result<(), std::io::Error> {
      let text = serde_json::to_string_pretty(value).map_err(std::io::Error::other)?;
      std::fs::write(path.with_extension("json"), text)
    }
  }

  impl<T: WithLabel> RecordResult<DetectResult<T>> for Record {
    fn record(
      &self,
      frame: &Frame,
      result: &DetectResult<T>,
      path: &Path,
    ) -> Result<(), std::io::Error> {
      let (width, height) = (frame.width(), frame.height());

      if self.format == RecordFormat::Json {
        let detections: Vec<_> = result
          .items
          .iter()
          .map(|item| {
            json!({
              "label": item.kind.to_label_str(),
              "id": item.kind.to_label_id(),
              "score": item.score,
              "bbox": item.source_rect(width, height, result.input_size),
            })
          })
          .collect();
        let value = json!({
          "frame": frame.index(),
          "name": frame.name(),
          "width": width,
          "height": height,
          "detections": detections,
        });
        return Self::write_json(path, &value);
      }

      let mut records = Vec::new();
      for item in result.items.iter() {
        let rect = item.source_rect(width, height, result.input_size);
        records.push(format!(
          "{}, {:.4}, {:.4}, {:.4}, {:.4}, {:.4}",
          self.label(&item.kind),
          item.score,
          rect[0],
          rect[1],
          rect[2],
          rect[3]
        ));
      }
      std::fs::write(path.with_extension("txt"), records.join("\n"))
    }
  }

  impl<T: WithLabel> RecordResult<SegmentResult<T>> for Record {
    fn record(
      &self,
      frame: &Frame,
      result: &SegmentResult<T>,
      path: &Path,
    ) -> Result<(), std::io::Error> {
      let present = result.present_classes();

      if self.format == RecordFormat::Json {
        let classes: Vec<_> = present
          .iter()
          .map(|(kind, pixels)| {
            json!({
              "label": kind.to_label_str(),
              "id": kind.to_label_id(),
              "pixels": pixels,
            })
          })
          .collect();
        let value = json!({
          "frame": frame.index(),
          "name": frame.name(),
          "mask_width": result.mask.width,
          "mask_height": result.mask.height,
          "classes": classes,
        });
        return Self::write_json(path, &value);
      }

      let records: Vec<String> = present
        .iter()
        .map(|(kind, pixels)| format!("{}, {}", self.label(kind), pixels))
        .collect();
      std::fs::write(path.with_extension("txt"), records.join("\n"))
    }
  }
}
