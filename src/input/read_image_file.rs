// 该文件是 Kanjian （看见） 项目的一部分。
// src/input/read_image_file.rs - 图像文件输入
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::RgbNhwcFrame,
  input::CaptureSource,
};

use image::ImageReader;
use thiserror::Error;
use tracing::{error, info};
use url::Url;

#[derive(Error, Debug)]
pub enum ImageFileInputError {
  #[error("URI schema mismatch")]
  SchemaMismatch,
  #[error("I/O error: {0}")]
  IoError(#[from] std::io::Error),
  #[error("Image loading error: {0}")]
  ImageLoadError(#[from] image::ImageError),
}

/// 单张图片输入，`image:///path/to/file.png[?flip=1]`
pub struct ImageFileInput {
  frame: Option<RgbNhwcFrame>,
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileInput {
  type Error = ImageFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ImageFileInputError::SchemaMismatch);
    }

    let flip = url
      .query_pairs()
      .any(|(k, v)| k == "flip" && (v == "1" || v == "true" || v.is_empty()));

    let image = ImageReader::open(url.path())?.decode()?.to_rgb8();
    info!(
      "读取图片: {} ({}x{})",
      url.path(),
      image.width(),
      image.height()
    );

    let mut frame = RgbNhwcFrame::from(image);
    if flip {
      frame.flip_horizontal();
    }

    Ok(ImageFileInput { frame: Some(frame) })
  }
}

impl Iterator for ImageFileInput {
  type Item = RgbNhwcFrame;

  fn next(&mut self) -> Option<Self::Item> {
    self.frame.take()
  }
}

impl CaptureSource for ImageFileInput {
  fn is_camera(&self) -> bool {
    false
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::{Rgb, RgbImage};

  fn write_image(dir: &tempfile::TempDir) -> std::path::PathBuf {
    let mut image = RgbImage::new(3, 2);
    image.put_pixel(0, 0, Rgb([255, 0, 0]));
    let path = dir.path().join("input.png");
    image.save(&path).unwrap();
    path
  }

  #[test]
  fn yields_exactly_one_frame() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_image(&dir);
    let url = Url::parse(&format!("image://{}", path.display())).unwrap();

    let mut input = ImageFileInput::from_url(&url).unwrap();
    let frame = input.next().unwrap();
    assert_eq!((frame.width(), frame.height()), (3, 2));
    assert!(input.next().is_none());
    assert!(!input.is_camera());
  }

  #[test]
  fn flip_query_mirrors_the_image() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_image(&dir);
    let url = Url::parse(&format!("image://{}?flip=1", path.display())).unwrap();

    let frame = ImageFileInput::from_url(&url).unwrap().next().unwrap();
    assert_eq!(frame.pixel(2, 0), Some([255, 0, 0]));
    assert_eq!(frame.pixel(0, 0), Some([0, 0, 0]));
  }

  #[test]
  fn rejects_other_schemes() {
    let url = Url::parse("gst://file/tmp/video.mp4").unwrap();
    assert!(matches!(
      ImageFileInput::from_url(&url),
      Err(ImageFileInputError::SchemaMismatch)
    ));
  }

  #[test]
  fn missing_file_is_io_error() {
    let url = Url::parse("image:///nonexistent/input.png").unwrap();
    assert!(matches!(
      ImageFileInput::from_url(&url),
      Err(ImageFileInputError::IoError(_))
    ));
  }
}
