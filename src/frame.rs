// 该文件是 Kanjian （看见） 项目的一部分。
// src/frame.rs - NHWC 帧定义
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

use image::{RgbImage, imageops::FilterType};
use thiserror::Error;

const RGB_CHANNELS: usize = 3;

pub trait AsNhwcFrame {
  fn as_nhwc(&self) -> &[u8];
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum FrameError {
  #[error("数据长度不匹配: 期望长度 {expected}, 实际长度 {actual}")]
  SizeMismatch { expected: usize, actual: usize },
}

/// RGB 帧，HWC 排列（批大小为 1 的 NHWC）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RgbNhwcFrame {
  width: usize,
  height: usize,
  data: Box<[u8]>,
}

impl RgbNhwcFrame {
  pub fn with_shape(height: usize, width: usize) -> Self {
    let data = vec![0u8; RGB_CHANNELS * width * height].into_boxed_slice();
    Self {
      width,
      height,
      data,
    }
  }

  pub fn from_raw(width: usize, height: usize, data: Vec<u8>) -> Result<Self, FrameError> {
    let expected = RGB_CHANNELS * width * height;
    if data.len() != expected {
      return Err(FrameError::SizeMismatch {
        expected,
        actual: data.len(),
      });
    }

    Ok(Self {
      width,
      height,
      data: data.into_boxed_slice(),
    })
  }

  /// 由 BGR 字节流构造，交换红蓝通道
  pub fn from_bgr(width: usize, height: usize, mut data: Vec<u8>) -> Result<Self, FrameError> {
    let expected = RGB_CHANNELS * width * height;
    if data.len() != expected {
      return Err(FrameError::SizeMismatch {
        expected,
        actual: data.len(),
      });
    }

    for pixel in data.chunks_exact_mut(RGB_CHANNELS) {
      pixel.swap(0, 2);
    }

    Self::from_raw(width, height, data)
  }

  pub fn height(&self) -> usize {
    self.height
  }

  pub fn width(&self) -> usize {
    self.width
  }

  pub fn channels(&self) -> usize {
    RGB_CHANNELS
  }

  /// 读取 (x, y) 处的 RGB 像素，越界时返回 `None`
  pub fn pixel(&self, x: usize, y: usize) -> Option<[u8; 3]> {
    if x >= self.width || y >= self.height {
      return None;
    }
    let idx = (y * self.width + x) * RGB_CHANNELS;
    match self.data.get(idx..idx + RGB_CHANNELS)? {
      &[r, g, b] => Some([r, g, b]),
      _ => None,
    }
  }

  pub fn is_empty(&self) -> bool {
    self.width == 0 || self.height == 0
  }

  /// 水平翻转（镜像）
  pub fn flip_horizontal(&mut self) {
    let row_len = self.width * RGB_CHANNELS;
    if row_len == 0 {
      return;
    }

    for row in self.data.chunks_exact_mut(row_len) {
      let (mut left, mut right) = (0usize, self.width.saturating_sub(1));
      while left < right {
        for c in 0..RGB_CHANNELS {
          row.swap(left * RGB_CHANNELS + c, right * RGB_CHANNELS + c);
        }
        left += 1;
        right -= 1;
      }
    }
  }

  /// 缩放到指定大小，尺寸不变时直接克隆
  pub fn resized(&self, width: usize, height: usize) -> Self {
    if width == self.width && height == self.height {
      return self.clone();
    }

    let resized = image::imageops::resize(
      &self.to_rgb_image(),
      width as u32,
      height as u32,
      FilterType::Triangle,
    );
    Self::from_rgb_image(&resized)
  }

  pub fn to_rgb_image(&self) -> RgbImage {
    // 长度在构造时已校验
    RgbImage::from_raw(self.width as u32, self.height as u32, self.data.to_vec())
      .unwrap_or_else(|| RgbImage::new(self.width as u32, self.height as u32))
  }

  pub fn from_rgb_image(image: &RgbImage) -> Self {
    let (width, height) = image.dimensions();
    Self {
      width: width as usize,
      height: height as usize,
      data: image.as_raw().clone().into_boxed_slice(),
    }
  }
}

impl From<RgbImage> for RgbNhwcFrame {
  fn from(image: RgbImage) -> Self {
    let (width, height) = image.dimensions();
    Self {
      width: width as usize,
      height: height as usize,
      data: image.into_raw().into_boxed_slice(),
    }
  }
}

impl AsMut<[u8]> for RgbNhwcFrame {
  fn as_mut(&mut self) -> &mut [u8] {
    &mut self.data
  }
}

impl AsNhwcFrame for RgbNhwcFrame {
  fn as_nhwc(&self) -> &[u8] {
    &self.data
  }
}
