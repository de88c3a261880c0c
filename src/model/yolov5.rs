// 该文件是 Shijue （视觉） 项目的一部分。
// src/model/yolov5.rs - YOLOv5 目标检测模型
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
use tracing::{debug, error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  blob::{Blob, Normalization},
  engine::{InferenceEngine, TensorDumpEngine},
  frame::Frame,
  model::{
    CocoLabel, DetectItem, DetectResult, Model, ModelError, WithLabel, check_output_len,
    nms::{BoundingBox, Candidate, NmsOrder, nms},
    query_param,
  },
  url_file_path,
};

pub const YOLOV5_CLASS_NUM: usize = 80;
pub const YOLOV5_INPUT_SIZE: u32 = 640;
pub const YOLOV5_OBJECTNESS_THRESH: f32 = 0.45;
pub const YOLOV5_SCORE_THRESH: f32 = 0.8;
pub const YOLOV5_IOU_THRESH: f32 = 0.4;
const YOLOV5_STRIDES: [u32; 3] = [8, 16, 32];
const YOLOV5_ANCHORS_PER_CELL: usize = 3;
// cx, cy, w, h, objectness
const YOLOV5_BOX_PARAMS: usize = 5;

/// 三个检测头的锚框总数，640 输入时为 25200
pub fn yolov5_anchor_num(input_size: u32) -> usize {
  YOLOV5_STRIDES
    .iter()
    .map(|stride| {
      let cells = (input_size / stride) as usize;
      cells * cells * YOLOV5_ANCHORS_PER_CELL
    })
    .sum()
}

/// 逐行解码检测输出
///
/// 输出为 (anchors, 5 + num_classes) 行优先排列。先用 objectness 过滤，
/// 再取类别分数最大值（严格大于才替换，相同分数取较小下标），
/// 最大分数不超过 `score_threshold` 的行被丢弃。两个阈值相互独立。
pub fn decode_detections(
  output: &[f32],
  num_classes: usize,
  objectness_threshold: f32,
  score_threshold: f32,
) -> Vec<Candidate> {
  let row_len = YOLOV5_BOX_PARAMS + num_classes;
  output
    .par_chunks_exact(row_len)
    .filter_map(|row| {
      if row[4] < objectness_threshold {
        return None;
      }

      let mut best_score = 0.0f32;
      let mut best_class = 0usize;
      for (class, &score) in row[YOLOV5_BOX_PARAMS..].iter().enumerate() {
        if score > best_score {
          best_score = score;
          best_class = class;
        }
      }
      if best_score <= score_threshold {
        return None;
      }

      Some(Candidate {
        bbox: BoundingBox::from_center(row[0], row[1], row[2], row[3]),
        class_index: best_class,
        confidence: best_score,
      })
    })
    .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct YoloV5Config {
  pub input_size: u32,
  pub objectness_threshold: f32,
  pub score_threshold: f32,
  pub iou_threshold: f32,
  pub nms_order: NmsOrder,
  pub normalization: Normalization,
}

impl Default for YoloV5Config {
  fn default() -> Self {
    Self {
      input_size: YOLOV5_INPUT_SIZE,
      objectness_threshold: YOLOV5_OBJECTNESS_THRESH,
      score_threshold: YOLOV5_SCORE_THRESH,
      iou_threshold: YOLOV5_IOU_THRESH,
      nms_order: NmsOrder::default(),
      normalization: Normalization::UNIT,
    }
  }
}

impl YoloV5Config {
  pub fn validate(&self) -> Result<(), ModelError> {
    let stride = YOLOV5_STRIDES[YOLOV5_STRIDES.len() - 1];
    if self.input_size == 0 || self.input_size % stride != 0 {
      error!("输入尺寸 {} 不是 {} 的整数倍", self.input_size, stride);
      return Err(ModelError::InvalidConfig(format!(
        "输入尺寸 {} 必须是 {} 的正整数倍",
        self.input_size, stride
      )));
    }
    Ok(())
  }

  /// 输出张量形状 (anchors, 5 + classes)
  pub fn output_shape(&self) -> [usize; 2] {
    [
      yolov5_anchor_num(self.input_size),
      YOLOV5_BOX_PARAMS + YOLOV5_CLASS_NUM,
    ]
  }

  fn apply_query(mut self, url: &Url) -> Result<Self, ModelError> {
    if let Some(size) = query_param(url, "size")? {
      self.input_size = size;
    }
    if let Some(objectness) = query_param(url, "objectness")? {
      self.objectness_threshold = objectness;
    }
    if let Some(score) = query_param(url, "score")? {
      self.score_threshold = score;
    }
    if let Some(iou) = query_param(url, "iou")? {
      self.iou_threshold = iou;
    }
    if let Some(order) = query_param(url, "nms")? {
      self.nms_order = order;
    }
    Ok(self)
  }
}

pub struct YoloV5<E> {
  engine: E,
  config: YoloV5Config,
}

impl<E: InferenceEngine> YoloV5<E> {
  pub fn new(engine: E, config: YoloV5Config) -> Result<Self, ModelError> {
    config.validate()?;
    debug!("YOLOv5 配置: {:?}", config);
    Ok(Self { engine, config })
  }

  pub fn config(&self) -> &YoloV5Config {
    &self.config
  }

  /// 从已解码的源图像构建输入张量
  pub fn preprocess(&self, frame: &Frame) -> Result<Blob, ModelError> {
    let resized = frame.resize_square(self.config.input_size)?;
    Ok(Blob::from_image(
      &resized,
      self.config.input_size,
      &self.config.normalization,
    )?)
  }
}

impl<E: InferenceEngine> Model for YoloV5<E> {
  type Input = Frame;
  type Output = DetectResult<CocoLabel>;
  type Error = ModelError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    debug!("预处理输入图像 {}x{}", input.width(), input.height());
    let output = {
      let blob = self.preprocess(input)?;
      debug!("执行模型推理");
      let now = std::time::Instant::now();
      let output = self.engine.infer(&blob)?;
      debug!("推理耗时: {:.2?}", now.elapsed());
      output
    };

    self.postprocess(&output)
  }

  fn postprocess(&self, output: &[f32]) -> Result<Self::Output, Self::Error> {
    debug!("后处理模型输出");
    check_output_len(output.len(), &self.config.output_shape())?;

    let candidates = decode_detections(
      output,
      CocoLabel::CLASS_NUM,
      self.config.objectness_threshold,
      self.config.score_threshold,
    );
    debug!("阈值过滤后剩余 {} 个候选", candidates.len());

    let kept = nms(candidates, self.config.iou_threshold, self.config.nms_order);
    let items: Vec<DetectItem<CocoLabel>> = kept.iter().map(DetectItem::from_candidate).collect();

    debug!("检测到 {} 个物体", items.len());
    debug!("检测结果: {:?}", items);

    Ok(DetectResult {
      items: items.into_boxed_slice(),
      input_size: self.config.input_size,
    })
  }
}

pub struct YoloV5Builder {
  engine_path: PathBuf,
  config: YoloV5Config,
}

impl FromUrlWithScheme for YoloV5Builder {
  const SCHEME: &'static str = "yolov5";
}

impl FromUrl for YoloV5Builder {
  type Error = ModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ModelError::ModelPathError(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }

    let engine_path =
      url_file_path(url).map_err(|e| ModelError::ModelPathError(e.to_string()))?;
    let config = YoloV5Config::default().apply_query(url)?;

    Ok(YoloV5Builder {
      engine_path,
      config,
    })
  }
}

impl YoloV5Builder {
  pub fn config(mut self, config: YoloV5Config) -> Self {
    self.config = config;
    self
  }

  /// 使用回放引擎构建模型
  pub fn build(self) -> Result<YoloV5<TensorDumpEngine>, ModelError> {
    info!("加载模型输出: {}", self.engine_path.display());
    let size = self.config.input_size as usize;
    let engine = TensorDumpEngine::open(&self.engine_path)?.with_input_shape([3, size, size]);
    check_output_len(engine.output_len(), &self.config.output_shape())?;
    info!("模型加载完成");
    self.build_with(engine)
  }

  pub fn build_with<E: InferenceEngine>(self, engine: E) -> Result<YoloV5<E>, ModelError> {
    YoloV5::new(engine, self.config)
  }
}
