// 该文件是 Shijue （视觉） 项目的一部分。
// src/model/label.rs - 类别标签与调色板
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

pub trait WithLabel: Sized + Copy + std::fmt::Debug {
  /// 类别数量，由模型决定
  const CLASS_NUM: usize;

  fn to_label_str(&self) -> String;
  fn to_label_id(&self) -> u32;
  fn from_label_id(id: u32) -> Self;
}

/// 可按类别着色的标签（分割结果可视化）
pub trait WithPalette: WithLabel {
  fn color(&self) -> [u8; 3];
}

macro_rules! label_set {
  ($(#[$meta:meta])* $name:ident, $names:ident) => {
    $(#[$meta])*
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct $name(u32);

    impl WithLabel for $name {
      const CLASS_NUM: usize = $names.len();

      fn to_label_str(&self) -> String {
        $names
          .get(self.0 as usize)
          .copied()
          .unwrap_or("unknown")
          .to_string()
      }

      fn to_label_id(&self) -> u32 {
        self.0
      }

      fn from_label_id(id: u32) -> Self {
        $name(id)
      }
    }
  };
}

/// COCO 数据集类别名称
pub const COCO_CLASSES: [&str; 80] = [
  "person",
  "bicycle",
  "car",
  "motorcycle",
  "airplane",
  "bus",
  "train",
  "truck",
  "boat",
  "traffic light",
  "fire hydrant",
  "stop sign",
  "parking meter",
  "bench",
  "bird",
  "cat",
  "dog",
  "horse",
  "sheep",
  "cow",
  "elephant",
  "bear",
  "zebra",
  "giraffe",
  "backpack",
  "umbrella",
  "handbag",
  "tie",
  "suitcase",
  "frisbee",
  "skis",
  "snowboard",
  "sports ball",
  "kite",
  "baseball bat",
  "baseball glove",
  "skateboard",
  "surfboard",
  "tennis racket",
  "bottle",
  "wine glass",
  "cup",
  "fork",
  "knife",
  "spoon",
  "bowl",
  "banana",
  "apple",
  "sandwich",
  "orange",
  "broccoli",
  "carrot",
  "hot dog",
  "pizza",
  "donut",
  "cake",
  "chair",
  "couch",
  "potted plant",
  "bed",
  "dining table",
  "toilet",
  "tv",
  "laptop",
  "mouse",
  "remote",
  "keyboard",
  "cell phone",
  "microwave",
  "oven",
  "toaster",
  "sink",
  "refrigerator",
  "book",
  "clock",
  "vase",
  "scissors",
  "teddy bear",
  "hair drier",
  "toothbrush",
];

/// PASCAL VOC 数据集类别名称，0 为背景
pub const VOC_CLASSES: [&str; 21] = [
  "background",
  "aeroplane",
  "bicycle",
  "bird",
  "boat",
  "bottle",
  "bus",
  "car",
  "cat",
  "chair",
  "cow",
  "diningtable",
  "dog",
  "horse",
  "motorbike",
  "person",
  "pottedplant",
  "sheep",
  "sofa",
  "train",
  "tvmonitor",
];

/// PASCAL VOC 标准调色板
pub const VOC_PALETTE: [[u8; 3]; 21] = [
  [0, 0, 0],
  [128, 0, 0],
  [0, 128, 0],
  [128, 128, 0],
  [0, 0, 128],
  [128, 0, 128],
  [0, 128, 128],
  [128, 128, 128],
  [64, 0, 0],
  [192, 0, 0],
  [64, 128, 0],
  [192, 128, 0],
  [64, 0, 128],
  [192, 0, 128],
  [64, 128, 128],
  [192, 128, 128],
  [0, 64, 0],
  [128, 64, 0],
  [0, 192, 0],
  [128, 192, 0],
  [0, 64, 128],
];

label_set!(
  /// COCO 80 类检测标签
  CocoLabel,
  COCO_CLASSES
);

label_set!(
  /// PASCAL VOC 21 类分割标签
  VocLabel,
  VOC_CLASSES
);

impl WithPalette for VocLabel {
  fn color(&self) -> [u8; 3] {
    VOC_PALETTE
      .get(self.0 as usize)
      .copied()
      .unwrap_or([255, 255, 255])
  }
}
