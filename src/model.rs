// 该文件是 Kanjian （看见） 项目的一部分。
// src/model.rs - 模型
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

pub trait Model {
  type Input;
  type Output;
  type Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectItem<T> {
  pub kind: T,
  pub score: f32,
  pub bbox: [f32; 4], // [x_min, y_min, x_max, y_max]，相对模型输入归一化
}

impl<T> DetectItem<T> {
  /// 按图像尺寸换算为像素坐标 [x_min, y_min, x_max, y_max]
  pub fn pixel_box(&self, width: usize, height: usize) -> [u32; 4] {
    let (w, h) = (width as f32, height as f32);
    let scale = |v: f32, max: f32| (v * max).round().clamp(0.0, max) as u32;
    [
      scale(self.bbox[0], w),
      scale(self.bbox[1], h),
      scale(self.bbox[2], w),
      scale(self.bbox[3], h),
    ]
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectResult<T> {
  pub items: Box<[DetectItem<T>]>,
}

impl<T> DetectResult<T> {
  pub fn empty() -> Self {
    Self {
      items: Box::new([]),
    }
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }
}

impl<T> From<Vec<DetectItem<T>>> for DetectResult<T> {
  fn from(items: Vec<DetectItem<T>>) -> Self {
    Self {
      items: items.into_boxed_slice(),
    }
  }
}

pub trait WithLabel: Sized + std::fmt::Debug {
  fn to_label_str(&self) -> String;
  fn to_label_id(&self) -> u32;
  fn from_label_id(id: u32) -> Self;
}

mod coco;
pub use self::coco::{COCO_LABELS, CocoLabel};

pub mod filter;
pub use self::filter::{RawDetection, filter_detections};

pub mod options;
pub use self::options::{Accelerator, OptionsError, Precision};

mod torchscript;
pub use self::torchscript::{TorchDetector, TorchDetectorBuilder, TorchModelError};

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn pixel_box_scales_to_image_size() {
    let item = DetectItem {
      kind: CocoLabel::from_label_id(1),
      score: 0.8,
      bbox: [0.25, 0.5, 0.75, 1.0],
    };
    assert_eq!(item.pixel_box(200, 100), [50, 50, 150, 100]);
  }

  #[test]
  fn pixel_box_is_clamped() {
    let item = DetectItem {
      kind: CocoLabel::from_label_id(1),
      score: 0.8,
      bbox: [-0.1, 0.0, 1.2, 0.5],
    };
    assert_eq!(item.pixel_box(10, 10), [0, 0, 10, 5]);
  }

  #[test]
  fn result_from_vec() {
    let result: DetectResult<CocoLabel> = Vec::new().into();
    assert!(result.is_empty());
    assert_eq!(result.len(), 0);
    assert_eq!(result, DetectResult::empty());
  }
}
