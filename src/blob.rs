// 该文件是 Shijue （视觉） 项目的一部分。
// src/blob.rs - 输入张量（blob）构建
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

//! 将 RGB 图像转换为推理引擎所需的平面浮点张量。
//!
//! 张量布局为 (C, H, W)，通道顺序 R、G、B，没有 batch 维度：
//!
//! ```text
//! T[c, row, col] = (pixel(row, col)[c] - mean[c]) * scale[c]
//! ```
//!
//! 该布局是与推理引擎之间的约定，不能更改。

use image::{ImageBuffer, Rgb, RgbImage};
use rayon::prelude::*;
use thiserror::Error;
use tracing::debug;

pub const BLOB_CHANNELS: usize = 3;

#[derive(Error, Debug)]
pub enum BlobError {
  #[error("图像尺寸不匹配: 期望 {expected}x{expected}, 实际 {width}x{height}")]
  ShapeMismatch {
    expected: u32,
    width: u32,
    height: u32,
  },
  #[error("图像为空")]
  Empty,
}

/// 逐通道归一化参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Normalization {
  pub mean: [f32; 3],
  pub scale: [f32; 3],
}

impl Normalization {
  /// 均值为 0，缩放 1/255，将像素映射到 [0, 1]
  pub const UNIT: Normalization = Normalization {
    mean: [0.0, 0.0, 0.0],
    scale: [1.0 / 255.0, 1.0 / 255.0, 1.0 / 255.0],
  };

  pub fn new(mean: [f32; 3], scale: [f32; 3]) -> Self {
    Self { mean, scale }
  }

  #[inline]
  pub fn normalize(&self, channel: usize, value: u8) -> f32 {
    (value as f32 - self.mean[channel]) * self.scale[channel]
  }

  #[inline]
  pub fn denormalize(&self, channel: usize, value: f32) -> f32 {
    value / self.scale[channel] + self.mean[channel]
  }
}

impl Default for Normalization {
  fn default() -> Self {
    Normalization::UNIT
  }
}

/// 平面 (C, H, W) 浮点张量
#[derive(Debug, Clone)]
pub struct Blob {
  data: Box<[f32]>,
  height: usize,
  width: usize,
}

impl Blob {
  /// 由已经缩放到 `expected_size` 见方的图像构建张量
  pub fn from_image(
    image: &RgbImage,
    expected_size: u32,
    normalization: &Normalization,
  ) -> Result<Self, BlobError> {
    let (width, height) = image.dimensions();
    if width != expected_size || height != expected_size {
      return Err(BlobError::ShapeMismatch {
        expected: expected_size,
        width,
        height,
      });
    }
    Self::from_rgb(image, normalization)
  }

  /// 由任意尺寸的图像构建张量
  pub fn from_rgb(image: &RgbImage, normalization: &Normalization) -> Result<Self, BlobError> {
    let (width, height) = (image.width() as usize, image.height() as usize);
    let frame = width * height;
    if frame == 0 {
      return Err(BlobError::Empty);
    }

    let mut data = vec![0f32; frame * BLOB_CHANNELS].into_boxed_slice();
    let (red, rest) = data.split_at_mut(frame);
    let (green, blue) = rest.split_at_mut(frame);
    let Normalization { mean, scale } = *normalization;

    // 每个工作线程只拿到自己那一行在三个通道平面中的切片
    red
      .par_chunks_mut(width)
      .zip(green.par_chunks_mut(width))
      .zip(blue.par_chunks_mut(width))
      .zip(image.as_raw().par_chunks(width * BLOB_CHANNELS))
      .for_each(|(((r, g), b), pixels)| {
        for (col, pixel) in pixels.chunks_exact(BLOB_CHANNELS).enumerate() {
          r[col] = (pixel[0] as f32 - mean[0]) * scale[0];
          g[col] = (pixel[1] as f32 - mean[1]) * scale[1];
          b[col] = (pixel[2] as f32 - mean[2]) * scale[2];
        }
      });

    debug!("构建输入张量: {}x{}x{}", BLOB_CHANNELS, height, width);

    Ok(Self {
      data,
      height,
      width,
    })
  }

  /// (C, H, W)
  pub fn shape(&self) -> [usize; 3] {
    [BLOB_CHANNELS, self.height, self.width]
  }

  pub fn height(&self) -> usize {
    self.height
  }

  pub fn width(&self) -> usize {
    self.width
  }

  pub fn as_slice(&self) -> &[f32] {
    &self.data
  }

  pub fn get(&self, channel: usize, row: usize, col: usize) -> Option<f32> {
    if channel >= BLOB_CHANNELS || row >= self.height || col >= self.width {
      return None;
    }
    let frame = self.height * self.width;
    self.data.get(channel * frame + row * self.width + col).copied()
  }

  /// 反归一化回 8 位图像，超出范围的值被截断
  pub fn to_rgb_image(&self, normalization: &Normalization) -> RgbImage {
    let frame = self.height * self.width;
    ImageBuffer::from_fn(self.width as u32, self.height as u32, |x, y| {
      let idx = y as usize * self.width + x as usize;
      let channel = |c: usize| {
        normalization
          .denormalize(c, self.data[c * frame + idx])
          .round()
          .clamp(0.0, 255.0) as u8
      };
      Rgb([channel(0), channel(1), channel(2)])
    })
  }
}

impl AsRef<[f32]> for Blob {
  fn as_ref(&self) -> &[f32] {
    &self.data
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const EPS: f32 = 1e-6;

  #[test]
  fn constant_color_fills_each_plane() {
    let image = RgbImage::from_pixel(8, 8, Rgb([200, 100, 50]));
    let norm = Normalization::new([10.0, 20.0, 30.0], [0.5, 0.25, 2.0]);
    let blob = Blob::from_image(&image, 8, &norm).unwrap();

    assert_eq!(blob.shape(), [3, 8, 8]);
    let plane = 64;
    let expected = [(200.0 - 10.0) * 0.5, (100.0 - 20.0) * 0.25, (50.0 - 30.0) * 2.0];
    for (c, value) in expected.iter().enumerate() {
      for v in &blob.as_slice()[c * plane..(c + 1) * plane] {
        assert!((v - value).abs() < EPS);
      }
    }
  }

  #[test]
  fn layout_is_channel_major_row_major() {
    let mut image = RgbImage::new(3, 2);
    for (x, y, p) in image.enumerate_pixels_mut() {
      let v = (y * 3 + x) as u8;
      *p = Rgb([v, v + 10, v + 20]);
    }
    let blob = Blob::from_rgb(&image, &Normalization::new([0.0; 3], [1.0; 3])).unwrap();
    let data = blob.as_slice();

    assert_eq!(&data[0..6], &[0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);
    assert_eq!(&data[6..12], &[10.0, 11.0, 12.0, 13.0, 14.0, 15.0]);
    assert_eq!(&data[12..18], &[20.0, 21.0, 22.0, 23.0, 24.0, 25.0]);
    assert_eq!(blob.get(1, 1, 2), Some(15.0));
    assert_eq!(blob.get(3, 0, 0), None);
  }

  #[test]
  fn unit_normalization_round_trips() {
    let mut image = RgbImage::new(16, 16);
    for (x, y, p) in image.enumerate_pixels_mut() {
      *p = Rgb([(x * 16) as u8, (y * 16) as u8, ((x + y) * 7) as u8]);
    }
    let blob = Blob::from_image(&image, 16, &Normalization::UNIT).unwrap();
    assert!(blob.as_slice().iter().all(|v| (-EPS..=1.0 + EPS).contains(v)));
    assert_eq!(blob.to_rgb_image(&Normalization::UNIT), image);
  }

  #[test]
  fn rejects_wrong_size() {
    let image = RgbImage::new(640, 480);
    let err = Blob::from_image(&image, 640, &Normalization::UNIT).unwrap_err();
    assert!(matches!(
      err,
      BlobError::ShapeMismatch {
        expected: 640,
        width: 640,
        height: 480
      }
    ));
  }

  #[test]
  fn rejects_empty_image() {
    let image = RgbImage::new(0, 0);
    assert!(matches!(
      Blob::from_rgb(&image, &Normalization::UNIT),
      Err(BlobError::Empty)
    ));
  }
}
