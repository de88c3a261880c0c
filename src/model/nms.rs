// 该文件是 Shijue （视觉） 项目的一部分。
// src/model/nms.rs - 候选框与非极大值抑制
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

use std::str::FromStr;

use tracing::debug;

/// 输入张量像素坐标下的整数矩形，`[x0, x1) × [y0, y1)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BoundingBox {
  pub x0: i32,
  pub y0: i32,
  pub x1: i32,
  pub y1: i32,
}

impl BoundingBox {
  /// 角点顺序会被规范化，使 `x0 <= x1`、`y0 <= y1`
  pub fn new(x0: i32, y0: i32, x1: i32, y1: i32) -> Self {
    Self {
      x0: x0.min(x1),
      y0: y0.min(y1),
      x1: x0.max(x1),
      y1: y0.max(y1),
    }
  }

  /// 由中心点和宽高构建，坐标向零截断
  pub fn from_center(cx: f32, cy: f32, w: f32, h: f32) -> Self {
    Self::new(
      (cx - w / 2.0) as i32,
      (cy - h / 2.0) as i32,
      (cx + w / 2.0) as i32,
      (cy + h / 2.0) as i32,
    )
  }

  pub fn width(&self) -> i32 {
    self.x1 - self.x0
  }

  pub fn height(&self) -> i32 {
    self.y1 - self.y0
  }

  pub fn area(&self) -> i64 {
    self.width() as i64 * self.height() as i64
  }

  pub fn is_empty(&self) -> bool {
    self.x0 >= self.x1 || self.y0 >= self.y1
  }

  /// 两矩形的交集，不相交时返回 None
  pub fn intersect(&self, other: &BoundingBox) -> Option<BoundingBox> {
    let rect = BoundingBox {
      x0: self.x0.max(other.x0),
      y0: self.y0.max(other.y0),
      x1: self.x1.min(other.x1),
      y1: self.y1.min(other.y1),
    };
    (!rect.is_empty()).then_some(rect)
  }

  pub fn iou(&self, other: &BoundingBox) -> f32 {
    iou(self, other)
  }
}

/// 交并比；并集面积为 0（两个退化框）时返回 0
pub fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
  let inter = a.intersect(b).map(|r| r.area()).unwrap_or(0);
  let union = a.area() + b.area() - inter;
  if union <= 0 {
    return 0.0;
  }
  inter as f32 / union as f32
}

/// 解码阶段产生的候选检测
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
  pub bbox: BoundingBox,
  pub class_index: usize,
  pub confidence: f32,
}

/// NMS 排序方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NmsOrder {
  /// 按置信度升序，置信度最低的候选首先保留
  #[default]
  Ascending,
  /// 按置信度降序，即常规 NMS
  Descending,
}

impl FromStr for NmsOrder {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "ascending" | "asc" => Ok(NmsOrder::Ascending),
      "descending" | "desc" => Ok(NmsOrder::Descending),
      other => Err(format!("未知的 NMS 排序方向: {}", other)),
    }
  }
}

/// 贪心非极大值抑制，不区分类别
///
/// 候选先按置信度排序（稳定排序，相同置信度保持原顺序），第一个无条件保留；
/// 之后的候选只要与任一已保留候选的 IoU 超过 `iou_threshold` 即被丢弃。
/// 每一步都依赖之前所有的保留决定，因此只能顺序执行。
pub fn nms(mut candidates: Vec<Candidate>, iou_threshold: f32, order: NmsOrder) -> Vec<Candidate> {
  match order {
    NmsOrder::Ascending => candidates.sort_by(|a, b| a.confidence.total_cmp(&b.confidence)),
    NmsOrder::Descending => candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence)),
  }

  let mut kept: Vec<Candidate> = Vec::with_capacity(candidates.len());
  for candidate in candidates {
    let suppressed = kept
      .iter()
      .any(|k| iou(&candidate.bbox, &k.bbox) > iou_threshold);
    if !suppressed {
      kept.push(candidate);
    }
  }

  debug!("NMS 保留 {} 个候选", kept.len());
  kept
}
