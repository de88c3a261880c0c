// 该文件是 Shijue （视觉） 项目的一部分。
// src/output/save_image_file.rs - 保存图像文件
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

use std::path::{Path, PathBuf};

use image::DynamicImage;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::Frame,
  model::{DetectResult, SegmentResult, WithLabel, WithPalette},
  output::{
    Render,
    draw::{Draw, DrawResult, mask_image},
  },
  url_file_path,
};

pub struct SaveImageFileOutput<'a> {
  path: PathBuf,
  save_mask: bool,
  draw: Draw<'a>,
}

#[derive(Error, Debug)]
pub enum SaveImageFileError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("无效路径: {0}")]
  InvalidPath(String),
}

impl<'a> FromUrlWithScheme for SaveImageFileOutput<'a> {
  const SCHEME: &'static str = "image";
}

impl<'a> FromUrl for SaveImageFileOutput<'a> {
  type Error = SaveImageFileError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(SaveImageFileError::SchemeMismatch(format!(
        "期望保存方式 '{}', 实际保存方式 '{}'",
        Self::SCHEME,
        uri.scheme()
      )));
    }

    let path = url_file_path(uri).map_err(|e| SaveImageFileError::InvalidPath(e.to_string()))?;
    if path.file_name().is_none() {
      return Err(SaveImageFileError::InvalidPath(
        path.display().to_string(),
      ));
    }

    Ok(SaveImageFileOutput {
      path,
      save_mask: uri.query_pairs().any(|(k, _)| k == "mask"),
      draw: Draw::default(),
    })
  }
}

impl<'a> SaveImageFileOutput<'a> {
  pub fn path(&self) -> &Path {
    &self.path
  }

  /// `<stem>_mask.png`，与输出图像同目录
  pub fn mask_path(&self) -> PathBuf {
    let stem = self
      .path
      .file_stem()
      .map(|s| s.to_string_lossy().into_owned())
      .unwrap_or_default();
    self.path.with_file_name(format!("{}_mask.png", stem))
  }

  fn save_image(
    &self,
    image: impl Into<DynamicImage>,
    path: &Path,
  ) -> Result<(), SaveImageFileError> {
    if let Some(parent) = path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }

    let image: DynamicImage = image.into();
    image.save(path)?;

    warn!("保存图像到文件: {}", path.display());

    Ok(())
  }
}

impl<'a, T: WithLabel> Render<Frame, DetectResult<T>> for SaveImageFileOutput<'a> {
  type Error = SaveImageFileError;

  fn render_result(&self, frame: &Frame, result: &DetectResult<T>) -> Result<(), Self::Error> {
    if self.save_mask {
      debug!("检测结果没有掩码，忽略 mask 参数");
    }
    let image = self.draw.draw_result(frame, result);
    self.save_image(image, &self.path)
  }
}

impl<'a, T: WithPalette> Render<Frame, SegmentResult<T>> for SaveImageFileOutput<'a> {
  type Error = SaveImageFileError;

  fn render_result(&self, frame: &Frame, result: &SegmentResult<T>) -> Result<(), Self::Error> {
    let image = self.draw.draw_result(frame, result);
    self.save_image(image, &self.path)?;
    if self.save_mask {
      self.save_image(mask_image(result), &self.mask_path())?;
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::{
    BoundingBox, ClassMask, CocoLabel, DEEPLAB_MASK_ALPHA, DetectItem, VocLabel,
  };
  use image::{Rgb, RgbImage, Rgba};

  fn output_url(path: &Path, query: &str) -> Url {
    Url::parse(&format!("image://{}{}", path.display(), query)).unwrap()
  }

  #[test]
  fn saves_detection_image_creating_parents() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("out.png");
    let output = SaveImageFileOutput::from_url(&output_url(&path, "")).unwrap();

    let frame = Frame::new(RgbImage::new(64, 48));
    let result = DetectResult {
      items: vec![DetectItem {
        kind: CocoLabel::from_label_id(5),
        score: 0.91,
        bbox: BoundingBox::new(4, 40, 20, 60),
      }]
      .into_boxed_slice(),
      input_size: 64,
    };
    output.render_result(&frame, &result).unwrap();

    let saved = image::open(&path).unwrap().to_rgb8();
    assert_eq!(saved.dimensions(), (64, 48));
    // y 方向 40..60 缩放为 30..45
    assert_eq!(saved.get_pixel(4, 38), &Rgb([0, 255, 136]));
    assert_eq!(saved.get_pixel(12, 38), &Rgb([0, 0, 0]));
  }

  #[test]
  fn mask_flag_saves_bare_mask() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("seg.png");
    let output = SaveImageFileOutput::from_url(&output_url(&path, "?mask")).unwrap();
    assert_eq!(output.mask_path(), dir.path().join("seg_mask.png"));

    let frame = Frame::new(RgbImage::new(16, 16));
    let mask = ClassMask {
      width: 4,
      height: 4,
      data: vec![15; 16].into_boxed_slice(),
    };
    output
      .render_result(&frame, &SegmentResult::<VocLabel>::new(mask))
      .unwrap();

    assert_eq!(image::open(&path).unwrap().width(), 16);
    let bare = image::open(output.mask_path()).unwrap();
    assert!(bare.color().has_alpha());
    let bare = bare.to_rgba8();
    assert_eq!(bare.dimensions(), (4, 4));
    let [r, g, b] = VocLabel::from_label_id(15).color();
    assert_eq!(bare.get_pixel(0, 0), &Rgba([r, g, b, DEEPLAB_MASK_ALPHA]));
  }

  #[test]
  fn rejects_directory_like_path() {
    let url = Url::parse("image:///").unwrap();
    assert!(matches!(
      SaveImageFileOutput::from_url(&url),
      Err(SaveImageFileError::InvalidPath(_))
    ));
  }
}
