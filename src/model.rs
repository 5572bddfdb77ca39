// 该文件是 Chejian （车检） 项目的一部分。
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

use std::path::Path;

use image::RgbImage;

// COCO 80 类别名称
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

/// 按 COCO 类别 id 查找名称
pub fn coco_label(class_id: u32) -> Option<&'static str> {
  COCO_CLASSES.get(class_id as usize).copied()
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectItem {
  pub class_id: u32,
  pub score: f32,
  pub bbox: [f32; 4], // [x_min, y_min, x_max, y_max]，归一化坐标
}

#[derive(Debug, Clone, Default)]
pub struct DetectResult {
  pub items: Box<[DetectItem]>,
}

impl DetectResult {
  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }
}

impl From<Vec<DetectItem>> for DetectResult {
  fn from(items: Vec<DetectItem>) -> Self {
    Self {
      items: items.into_boxed_slice(),
    }
  }
}

/// 推理参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PredictParams {
  /// 置信度阈值
  pub conf: f32,
  /// 推理输入尺寸（正方形边长，像素）
  pub imgsz: u32,
}

/// 检测模型提供者
///
/// 将具体的推理运行时与命令行流程隔离开，便于替换和测试。
pub trait Detector {
  type Handle;
  type Error: std::error::Error + Send + Sync + 'static;

  /// 启动时检查运行时能力是否可用
  fn probe(&self) -> Result<(), Self::Error>;

  fn load(&self, weights: &Path) -> Result<Self::Handle, Self::Error>;

  /// 对单张图像推理，每个输入对应一个结果
  fn predict(
    &self,
    handle: &Self::Handle,
    image: &RgbImage,
    params: &PredictParams,
  ) -> Result<Vec<DetectResult>, Self::Error>;

  /// 在图像副本上绘制检测框
  fn render(&self, handle: &Self::Handle, image: &RgbImage, result: &DetectResult) -> RgbImage;

  fn label(&self, handle: &Self::Handle, class_id: u32) -> Option<String>;
}

pub mod decode;

#[cfg(feature = "model_yolo26")]
mod yolo26;
#[cfg(feature = "model_yolo26")]
pub use self::yolo26::{Yolo26, Yolo26Builder, Yolo26Error, Yolo26Provider};

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn coco_table_maps_car() {
    assert_eq!(coco_label(2), Some("car"));
    assert_eq!(coco_label(79), Some("toothbrush"));
    assert_eq!(coco_label(80), None);
  }
}
