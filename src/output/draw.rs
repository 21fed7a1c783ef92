// 该文件是 Kanjian （看见） 项目的一部分。
// src/output/draw.rs - 目标检测结果可视化
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::{Path, PathBuf};

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::{
  drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size},
  rect::Rect,
};
use thiserror::Error;
use tracing::{debug, warn};

use crate::{
  frame::RgbNhwcFrame,
  model::{DetectItem, DetectResult, WithLabel},
};

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 18.0;
const LABEL_TEXT_PADDING: i32 = 2;
const BOX_THICKNESS: i32 = 3;
const TEXT_COLOR: [u8; 3] = [255, 255, 255];

// 按类别循环取色
const PALETTE: [[u8; 3]; 8] = [
  [0, 255, 0],
  [255, 56, 56],
  [56, 56, 255],
  [255, 157, 151],
  [255, 178, 29],
  [207, 210, 49],
  [72, 249, 10],
  [146, 204, 23],
];

// 常见发行版的字体位置
const SYSTEM_FONTS: [&str; 5] = [
  "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
  "/usr/share/fonts/TTF/DejaVuSans.ttf",
  "/usr/share/fonts/dejavu/DejaVuSans.ttf",
  "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
  "/System/Library/Fonts/Supplemental/Arial.ttf",
];

#[derive(Error, Debug)]
pub enum DrawError {
  #[error("读取字体文件失败 {0}: {1}")]
  FontIoError(PathBuf, std::io::Error),
  #[error("无效的字体文件: {0}")]
  InvalidFont(PathBuf),
}

/// 检测框标题，例如 `P[person] = 93.12%`
pub fn caption(label: &str, score: f32) -> String {
  format!("P[{}] = {:.2}%", label, 100.0 * score)
}

/// 类别对应的边框颜色
pub fn class_color(label_id: u32) -> [u8; 3] {
  PALETTE[label_id as usize % PALETTE.len()]
}

#[derive(Clone)]
pub struct Draw {
  font_size: f32,
  font: Option<FontArc>,
}

impl Default for Draw {
  /// 在系统字体目录中查找字体，找不到时只画框
  fn default() -> Self {
    let font = SYSTEM_FONTS
      .iter()
      .map(Path::new)
      .filter(|path| path.exists())
      .find_map(|path| match load_font(path) {
        Ok(font) => {
          debug!("使用字体: {}", path.display());
          Some(font)
        }
        Err(e) => {
          warn!("{}", e);
          None
        }
      });

    if font.is_none() {
      warn!("未找到可用字体，只绘制检测框，可通过 --font 指定字体");
    }

    Self {
      font_size: LABEL_FONT_SIZE,
      font,
    }
  }
}

fn load_font(path: &Path) -> Result<FontArc, DrawError> {
  let data = std::fs::read(path).map_err(|e| DrawError::FontIoError(path.to_path_buf(), e))?;
  FontArc::try_from_vec(data).map_err(|_| DrawError::InvalidFont(path.to_path_buf()))
}

impl Draw {
  /// 指定字体文件；`None` 时查找系统字体
  pub fn with_font(path: Option<&Path>) -> Result<Self, DrawError> {
    match path {
      Some(path) => Ok(Self {
        font_size: LABEL_FONT_SIZE,
        font: Some(load_font(path)?),
      }),
      None => Ok(Self::default()),
    }
  }

  /// 不绘制文字
  pub fn boxes_only() -> Self {
    Self {
      font_size: LABEL_FONT_SIZE,
      font: None,
    }
  }

  pub fn has_font(&self) -> bool {
    self.font.is_some()
  }

  pub fn draw_detections_on_image<T: WithLabel>(
    &self,
    image: &mut RgbImage,
    result: &DetectResult<T>,
  ) {
    for item in result.items.iter() {
      self.draw_item(image, item);
    }
  }

  pub fn draw_detection<T: WithLabel>(
    &self,
    frame: &RgbNhwcFrame,
    result: &DetectResult<T>,
  ) -> RgbImage {
    let mut image = frame.to_rgb_image();
    self.draw_detections_on_image(&mut image, result);
    image
  }

  // bbox 为归一化坐标 [x_min, y_min, x_max, y_max]
  fn draw_item<T: WithLabel>(&self, image: &mut RgbImage, item: &DetectItem<T>) {
    let (w, h) = (image.width() as i32, image.height() as i32);
    if w == 0 || h == 0 {
      return;
    }

    let [x_min, y_min, x_max, y_max] = pixel_box(&item.bbox, w, h);
    if x_min >= x_max || y_min >= y_max {
      return;
    }

    let color = Rgb(class_color(item.kind.to_label_id()));
    for t in 0..BOX_THICKNESS {
      let (box_w, box_h) = (x_max - x_min + 1 - 2 * t, y_max - y_min + 1 - 2 * t);
      if box_w <= 0 || box_h <= 0 {
        break;
      }
      let rect = Rect::at(x_min + t, y_min + t).of_size(box_w as u32, box_h as u32);
      draw_hollow_rect_mut(image, rect, color);
    }

    let Some(font) = &self.font else {
      return;
    };

    let label = caption(&item.kind.to_label_str(), item.score);
    let scale = PxScale::from(self.font_size);
    let (text_w, text_h) = text_size(scale, font, &label);
    let (bg_w, bg_h) = (
      text_w as i32 + 2 * LABEL_TEXT_PADDING,
      text_h as i32 + 2 * LABEL_TEXT_PADDING,
    );

    // 标签放在边框上方，放不下时放在框内
    let label_x = x_min;
    let label_y = if y_min - bg_h >= 0 { y_min - bg_h } else { y_min };
    let bg_w = bg_w.min(w - label_x);
    if bg_w <= 0 || bg_h <= 0 {
      return;
    }

    draw_filled_rect_mut(
      image,
      Rect::at(label_x, label_y).of_size(bg_w as u32, bg_h as u32),
      color,
    );
    draw_text_mut(
      image,
      Rgb(TEXT_COLOR),
      label_x + LABEL_TEXT_PADDING,
      label_y + LABEL_TEXT_PADDING,
      scale,
      font,
      &label,
    );
  }
}

fn pixel_box(bbox: &[f32; 4], w: i32, h: i32) -> [i32; 4] {
  let (wf, hf) = (w as f32, h as f32);
  [
    ((bbox[0] * wf).floor() as i32).clamp(0, w - 1),
    ((bbox[1] * hf).floor() as i32).clamp(0, h - 1),
    ((bbox[2] * wf).ceil() as i32).clamp(0, w - 1),
    ((bbox[3] * hf).ceil() as i32).clamp(0, h - 1),
  ]
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::CocoLabel;

  fn single(bbox: [f32; 4]) -> DetectResult<CocoLabel> {
    DetectResult::from(vec![DetectItem {
      kind: CocoLabel::from_label_id(1),
      score: 0.9,
      bbox,
    }])
  }

  #[test]
  fn caption_is_percentage_with_two_decimals() {
    assert_eq!(caption("person", 0.93125), "P[person] = 93.12%");
    assert_eq!(caption("dog", 1.0), "P[dog] = 100.00%");
    assert_eq!(caption("unknown(0)", 0.7), "P[unknown(0)] = 70.00%");
  }

  #[test]
  fn colors_cycle_through_palette() {
    assert_eq!(class_color(1), class_color(1 + PALETTE.len() as u32));
    assert_ne!(class_color(1), class_color(2));
  }

  #[test]
  fn box_is_three_pixels_thick() {
    let draw = Draw::boxes_only();
    let mut image = RgbImage::new(16, 16);
    draw.draw_detections_on_image(&mut image, &single([0.25, 0.25, 0.75, 0.75]));

    let color = Rgb(class_color(1));
    for offset in 0..3 {
      assert_eq!(*image.get_pixel(4 + offset, 8), color);
      assert_eq!(*image.get_pixel(12 - offset, 8), color);
    }
    assert_eq!(*image.get_pixel(7, 8), Rgb([0, 0, 0]));
    assert_eq!(*image.get_pixel(8, 8), Rgb([0, 0, 0]));
    assert_eq!(*image.get_pixel(0, 0), Rgb([0, 0, 0]));
  }

  #[test]
  fn out_of_range_box_is_clamped() {
    let draw = Draw::boxes_only();
    let mut image = RgbImage::new(8, 8);
    draw.draw_detections_on_image(&mut image, &single([-0.5, -0.5, 1.5, 1.5]));
    assert_eq!(*image.get_pixel(0, 0), Rgb(class_color(1)));
    assert_eq!(*image.get_pixel(7, 7), Rgb(class_color(1)));
  }

  #[test]
  fn degenerate_box_is_skipped() {
    let draw = Draw::boxes_only();
    let mut image = RgbImage::new(8, 8);
    draw.draw_detections_on_image(&mut image, &single([0.5, 0.5, 0.5, 0.5]));
    assert!(image.pixels().all(|p| *p == Rgb([0, 0, 0])));
  }

  #[test]
  fn missing_font_file_is_an_error() {
    let result = Draw::with_font(Some(Path::new("/nonexistent/font.ttf")));
    assert!(matches!(result, Err(DrawError::FontIoError(..))));
  }

  #[test]
  fn invalid_font_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("font.ttf");
    std::fs::write(&path, b"not a font").unwrap();
    assert!(matches!(
      Draw::with_font(Some(&path)),
      Err(DrawError::InvalidFont(_))
    ));
  }

  #[test]
  fn drawing_on_frame_keeps_size() {
    let frame = RgbNhwcFrame::with_shape(10, 20);
    let image = Draw::boxes_only().draw_detection(&frame, &single([0.1, 0.1, 0.9, 0.9]));
    assert_eq!(image.dimensions(), (20, 10));
  }
}
