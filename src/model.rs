// 该文件是 Shijue （视觉） 项目的一部分。
// src/model.rs - 模型
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

use std::{marker::PhantomData, str::FromStr};

use image::{Rgba, RgbaImage};
use thiserror::Error;
use url::Url;

use crate::{blob::BlobError, engine::EngineError};

mod label;
pub use self::label::{
  COCO_CLASSES, CocoLabel, VOC_CLASSES, VOC_PALETTE, VocLabel, WithLabel, WithPalette,
};

pub mod nms;
pub use self::nms::{BoundingBox, Candidate, NmsOrder};

mod yolov5;
pub use self::yolov5::{
  YOLOV5_CLASS_NUM, YOLOV5_INPUT_SIZE, YOLOV5_IOU_THRESH, YOLOV5_OBJECTNESS_THRESH,
  YOLOV5_SCORE_THRESH, YoloV5, YoloV5Builder, YoloV5Config, decode_detections, yolov5_anchor_num,
};

mod deeplab;
pub use self::deeplab::{
  DEEPLAB_CLASS_NUM, DEEPLAB_INPUT_SIZE, DEEPLAB_MASK_ALPHA, DeepLabConfig, DeepLabV3Plus,
  DeepLabV3PlusBuilder, decode_class_mask,
};

pub trait Model {
  type Input;
  type Output;
  type Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error>;
  fn postprocess(&self, output: &[f32]) -> Result<Self::Output, Self::Error>;
}

#[derive(Error, Debug)]
pub enum ModelError {
  #[error("推理引擎错误: {0}")]
  Engine(#[from] EngineError),
  #[error("输入张量错误: {0}")]
  Blob(#[from] BlobError),
  #[error("输出张量形状不匹配: 期望 {expected} 个元素 {shape}, 实际 {actual} 个元素")]
  OutputShapeMismatch {
    expected: usize,
    actual: usize,
    shape: String,
  },
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
  #[error("模型参数无效: {0}")]
  InvalidConfig(String),
}

/// 检查输出缓冲区长度与约定形状一致
pub(crate) fn check_output_len(actual: usize, shape: &[usize]) -> Result<(), ModelError> {
  let expected = shape.iter().product::<usize>();
  if expected != actual {
    return Err(ModelError::OutputShapeMismatch {
      expected,
      actual,
      shape: format!("{:?}", shape),
    });
  }
  Ok(())
}

/// 读取 URL 查询参数，存在但无法解析时报错
pub(crate) fn query_param<T: FromStr>(url: &Url, key: &str) -> Result<Option<T>, ModelError>
where
  T::Err: std::fmt::Display,
{
  match url.query_pairs().find(|(k, _)| k == key) {
    Some((_, value)) => value
      .parse::<T>()
      .map(Some)
      .map_err(|e| ModelError::InvalidConfig(format!("参数 {}={} 无效: {}", key, value, e))),
    None => Ok(None),
  }
}

#[derive(Debug, Clone)]
pub struct DetectItem<T> {
  pub kind: T,
  pub score: f32,
  pub bbox: BoundingBox, // 输入张量坐标，未截断
}

impl<T: WithLabel> DetectItem<T> {
  pub fn from_candidate(candidate: &Candidate) -> Self {
    Self {
      kind: T::from_label_id(candidate.class_index as u32),
      score: candidate.confidence,
      bbox: candidate.bbox,
    }
  }
}

impl<T> DetectItem<T> {
  /// 映射到源图像坐标并截断到图像范围内，返回 [x_min, y_min, x_max, y_max]
  pub fn source_rect(&self, src_width: u32, src_height: u32, input_size: u32) -> [f32; 4] {
    let (sw, sh) = (src_width as f32, src_height as f32);
    let scale = input_size as f32;
    let x0 = self.bbox.x0 as f32 * sw / scale;
    let y0 = self.bbox.y0 as f32 * sh / scale;
    let x1 = self.bbox.x1 as f32 * sw / scale;
    let y1 = self.bbox.y1 as f32 * sh / scale;
    [x0.max(0.0), y0.max(0.0), x1.min(sw), y1.min(sh)]
  }
}

#[derive(Debug, Clone)]
pub struct DetectResult<T> {
  pub items: Box<[DetectItem<T>]>,
  /// 模型输入边长，bbox 所在坐标系
  pub input_size: u32,
}

impl<T> DetectResult<T> {
  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }
}

/// 逐像素类别索引图，行优先
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassMask {
  pub width: usize,
  pub height: usize,
  pub data: Box<[u8]>,
}

impl ClassMask {
  pub fn get(&self, x: usize, y: usize) -> Option<u8> {
    if x >= self.width || y >= self.height {
      return None;
    }
    self.data.get(y * self.width + x).copied()
  }
}

#[derive(Debug, Clone)]
pub struct SegmentResult<T> {
  pub mask: ClassMask,
  alpha: u8,
  _label: PhantomData<T>,
}

impl<T: WithLabel> SegmentResult<T> {
  pub fn new(mask: ClassMask) -> Self {
    Self {
      mask,
      alpha: DEEPLAB_MASK_ALPHA,
      _label: PhantomData,
    }
  }

  /// 叠加显示时使用的透明度
  pub fn with_alpha(mut self, alpha: u8) -> Self {
    self.alpha = alpha;
    self
  }

  pub fn alpha(&self) -> u8 {
    self.alpha
  }

  pub fn class_at(&self, x: usize, y: usize) -> Option<T> {
    self
      .mask
      .get(x, y)
      .map(|id| T::from_label_id(id as u32))
  }

  /// 每个类别的像素数，下标为类别索引
  pub fn class_counts(&self) -> Vec<usize> {
    let mut counts = vec![0usize; T::CLASS_NUM];
    for &id in self.mask.data.iter() {
      if let Some(count) = counts.get_mut(id as usize) {
        *count += 1;
      }
    }
    counts
  }

  /// 出现过的类别及其像素数
  pub fn present_classes(&self) -> Vec<(T, usize)> {
    self
      .class_counts()
      .into_iter()
      .enumerate()
      .filter(|&(_, count)| count > 0)
      .map(|(id, count)| (T::from_label_id(id as u32), count))
      .collect()
  }
}

impl<T: WithPalette> SegmentResult<T> {
  /// 按调色板着色，透明度固定为 `alpha`
  pub fn colorize(&self, alpha: u8) -> RgbaImage {
    RgbaImage::from_fn(self.mask.width as u32, self.mask.height as u32, |x, y| {
      let id = self.mask.data[y as usize * self.mask.width + x as usize];
      let [r, g, b] = T::from_label_id(id as u32).color();
      Rgba([r, g, b, alpha])
    })
  }
}
