// 该文件是 Shijue （视觉） 项目的一部分。
// src/model/deeplab.rs - DeepLabV3+ 语义分割模型
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

use rayon::prelude::*;
use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  blob::{Blob, Normalization},
  engine::{InferenceEngine, TensorDumpEngine},
  frame::Frame,
  model::{
    ClassMask, Model, ModelError, SegmentResult, VocLabel, WithLabel, check_output_len,
    query_param,
  },
  url_file_path,
};

pub const DEEPLAB_CLASS_NUM: usize = 21;
pub const DEEPLAB_INPUT_SIZE: u32 = 512;
pub const DEEPLAB_MASK_ALPHA: u8 = 180;

/// 将 (classes, H, W) 概率张量解码为逐像素类别图
///
/// 每个像素取各类别通道中的最大值下标。最大值初始为 0 而不是负无穷，
/// 因此所有通道都不大于 0 的像素归为类别 0；相同值取较小下标。
pub fn decode_class_mask(
  output: &[f32],
  num_classes: usize,
  height: usize,
  width: usize,
) -> Result<ClassMask, ModelError> {
  check_output_len(output.len(), &[num_classes, height, width])?;
  if num_classes > u8::MAX as usize + 1 {
    return Err(ModelError::InvalidConfig(format!(
      "类别数 {} 超出掩码可表示范围",
      num_classes
    )));
  }

  let frame = height * width;
  let mut data = vec![0u8; frame].into_boxed_slice();
  if frame > 0 {
    data
      .par_chunks_mut(width)
      .enumerate()
      .for_each(|(row, line)| {
        for (col, class) in line.iter_mut().enumerate() {
          let offset = row * width + col;
          let mut best_value = 0.0f32;
          let mut best_class = 0usize;
          for c in 0..num_classes {
            let value = output[c * frame + offset];
            if value > best_value {
              best_value = value;
              best_class = c;
            }
          }
          *class = best_class as u8;
        }
      });
  }

  Ok(ClassMask {
    width,
    height,
    data,
  })
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeepLabConfig {
  pub input_size: u32,
  pub mask_alpha: u8,
  pub normalization: Normalization,
}

impl Default for DeepLabConfig {
  fn default() -> Self {
    Self {
      input_size: DEEPLAB_INPUT_SIZE,
      mask_alpha: DEEPLAB_MASK_ALPHA,
      normalization: Normalization::UNIT,
    }
  }
}

impl DeepLabConfig {
  /// 输出张量形状 (classes, H, W)
  pub fn output_shape(&self) -> [usize; 3] {
    let size = self.input_size as usize;
    [DEEPLAB_CLASS_NUM, size, size]
  }

  fn apply_query(mut self, url: &Url) -> Result<Self, ModelError> {
    if let Some(size) = query_param(url, "size")? {
      self.input_size = size;
    }
    if let Some(alpha) = query_param(url, "alpha")? {
      self.mask_alpha = alpha;
    }
    if self.input_size == 0 {
      return Err(ModelError::InvalidConfig("输入尺寸不能为 0".to_string()));
    }
    Ok(self)
  }
}

pub struct DeepLabV3Plus<E> {
  engine: E,
  config: DeepLabConfig,
}

impl<E: InferenceEngine> DeepLabV3Plus<E> {
  pub fn new(engine: E, config: DeepLabConfig) -> Self {
    Self { engine, config }
  }

  pub fn config(&self) -> &DeepLabConfig {
    &self.config
  }
}

impl<E: InferenceEngine> Model for DeepLabV3Plus<E> {
  type Input = Frame;
  type Output = SegmentResult<VocLabel>;
  type Error = ModelError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    let size = self.config.input_size;
    let output = {
      let resized = input.resize_square(size)?;
      let blob = Blob::from_image(&resized, size, &self.config.normalization)?;
      debug!("执行模型推理");
      self.engine.infer(&blob)?
    };

    self.postprocess(&output)
  }

  fn postprocess(&self, output: &[f32]) -> Result<Self::Output, Self::Error> {
    let [classes, height, width] = self.config.output_shape();
    debug!("解码分割输出: {}x{}x{}", classes, height, width);
    let mask = decode_class_mask(output, VocLabel::CLASS_NUM, height, width)?;
    let result = SegmentResult::<VocLabel>::new(mask).with_alpha(self.config.mask_alpha);

    for (label, count) in result.present_classes() {
      debug!("类别 {}: {} 像素", label.to_label_str(), count);
    }

    Ok(result)
  }
}

pub struct DeepLabV3PlusBuilder {
  engine_path: PathBuf,
  config: DeepLabConfig,
}

impl FromUrlWithScheme for DeepLabV3PlusBuilder {
  const SCHEME: &'static str = "deeplab";
}

impl FromUrl for DeepLabV3PlusBuilder {
  type Error = ModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ModelError::ModelPathError(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }

    Ok(DeepLabV3PlusBuilder {
      engine_path: url_file_path(url).map_err(|e| ModelError::ModelPathError(e.to_string()))?,
      config: DeepLabConfig::default().apply_query(url)?,
    })
  }
}

impl DeepLabV3PlusBuilder {
  pub fn config(mut self, config: DeepLabConfig) -> Self {
    self.config = config;
    self
  }

  pub fn build(self) -> Result<DeepLabV3Plus<TensorDumpEngine>, ModelError> {
    info!("加载模型输出: {}", self.engine_path.display());
    let size = self.config.input_size as usize;
    let engine = TensorDumpEngine::open(&self.engine_path)?.with_input_shape([3, size, size]);
    check_output_len(engine.output_len(), &self.config.output_shape())?;
    info!("模型加载完成");
    Ok(self.build_with(engine))
  }

  pub fn build_with<E: InferenceEngine>(self, engine: E) -> DeepLabV3Plus<E> {
    DeepLabV3Plus::new(engine, self.config)
  }
}
