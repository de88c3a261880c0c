// 该文件是 Shijue （视觉） 项目的一部分。
// src/frame.rs - 源图像帧定义
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

use image::{DynamicImage, Rgb, RgbImage, imageops::FilterType};

use crate::blob::BlobError;

/// 输入源产生的一帧图像，保持原始分辨率，只读
#[derive(Debug, Clone)]
pub struct Frame {
  image: RgbImage,
  index: u64,
  name: Option<String>,
}

impl Frame {
  pub fn new(image: RgbImage) -> Self {
    Self {
      image,
      index: 0,
      name: None,
    }
  }

  pub fn with_index(mut self, index: u64) -> Self {
    self.index = index;
    self
  }

  pub fn with_name(mut self, name: impl Into<String>) -> Self {
    self.name = Some(name.into());
    self
  }

  pub fn image(&self) -> &RgbImage {
    &self.image
  }

  pub fn width(&self) -> u32 {
    self.image.width()
  }

  pub fn height(&self) -> u32 {
    self.image.height()
  }

  pub fn index(&self) -> u64 {
    self.index
  }

  /// 源文件名（不含扩展名），目录输入时可用
  pub fn name(&self) -> Option<&str> {
    self.name.as_deref()
  }

  /// 按最近邻插值缩放到模型的方形输入尺寸
  pub fn resize_square(&self, size: u32) -> Result<RgbImage, BlobError> {
    resize_square(&self.image, size)
  }
}

impl From<RgbImage> for Frame {
  fn from(image: RgbImage) -> Self {
    Frame::new(image)
  }
}

impl From<DynamicImage> for Frame {
  fn from(image: DynamicImage) -> Self {
    if !image.color().has_alpha() {
      return Frame::new(image.to_rgb8());
    }

    // 带透明通道的图像按 alpha 预乘，相当于叠加在黑色背景上
    let rgba = image.to_rgba8();
    let rgb = RgbImage::from_fn(rgba.width(), rgba.height(), |x, y| {
      let [r, g, b, a] = rgba.get_pixel(x, y).0;
      Rgb([premultiply(r, a), premultiply(g, a), premultiply(b, a)])
    });
    Frame::new(rgb)
  }
}

/// 在 16 位精度下预乘后取高 8 位
#[inline]
fn premultiply(value: u8, alpha: u8) -> u8 {
  let value = value as u32 * 0x101;
  let alpha = alpha as u32 * 0x101;
  ((value * alpha / 0xffff) >> 8) as u8
}

/// 空图像无法缩放，直接报错
pub fn resize_square(image: &RgbImage, size: u32) -> Result<RgbImage, BlobError> {
  let (width, height) = image.dimensions();
  if width == 0 || height == 0 || size == 0 {
    return Err(BlobError::Empty);
  }
  if (width, height) == (size, size) {
    return Ok(image.clone());
  }
  Ok(image::imageops::resize(image, size, size, FilterType::Nearest))
}
