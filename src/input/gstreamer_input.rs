// 该文件是 Kanjian （看见） 项目的一部分。
// src/input/gstreamer_input.rs - GStreamer 输入
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

//! # GStreamer 视频输入模块
//!
//! 本模块提供基于 GStreamer 的视频输入功能，支持：
//! - 摄像头捕获（V4L2，按编号或设备路径）
//! - 视频文件读取
//!
//! ## 系统依赖
//!
//! 使用前需要安装 GStreamer 开发库：
//!
//! **Ubuntu/Debian:**
//! ```bash
//! sudo apt-get install libgstreamer1.0-dev libgstreamer-plugins-base1.0-dev
//! ```
//!
//! ## 基本用法
//!
//! ```no_run
//! use kanjian::input::GStreamerInputPipelineBuilder;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // "0" 表示 /dev/video0，其他字符串视为视频文件路径
//! let input = GStreamerInputPipelineBuilder::from_capture_device("0")
//!     .horizontal_flip(true)
//!     .build()?;
//!
//! for frame in input {
//!     println!("处理帧: {}x{}", frame.width(), frame.height());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## URL 形式
//!
//! - `gst://camera/dev/video0?width=640&height=480&fps=30&flip=1`
//! - `gst://file/path/to/video.mp4?rotate=180`
//!
//! ## 支持的视频格式
//!
//! - RGB - 标准 RGB 格式
//! - BGR - BGR 格式（会自动转换为 RGB）
//!
//! 其他格式由管道中的 `videoconvert` 插件转换。

use std::collections::HashMap;

use crate::{FromUrl, FromUrlWithScheme, frame::RgbNhwcFrame, input::CaptureSource};

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use thiserror::Error;
use tracing::{error, info, warn};
use url::Url;

const RGB_CHANNELS: usize = 3;

/// GStreamer 输入错误类型
#[derive(Error, Debug)]
pub enum GStreamerInputError {
  /// URI scheme 不匹配（期望 "gst://"）
  #[error("URI scheme mismatch")]
  SchemeMismatch,
  /// GStreamer 库错误
  #[error("GStreamer error: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  /// GStreamer 布尔操作错误
  #[error("GStreamer boolean error: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  /// 无法获取 appsink 元素
  #[error("Failed to get appsink element")]
  AppSinkNotFound,
  /// 无法转换元素为 appsink
  #[error("Failed to convert element to appsink")]
  AppSinkConversionFailed,
  /// 无法从 caps 获取视频信息
  #[error("Failed to get video info from caps")]
  VideoInfoError,
  /// 不支持的视频格式
  #[error("Unsupported video format: {0}")]
  UnsupportedFormat(String),
  /// 管道错误
  #[error("Pipeline error: {0}")]
  PipelineError(String),
  /// 缓冲区大小不匹配
  #[error("Buffer size mismatch: expected {expected} bytes, got {actual} bytes")]
  BufferSizeMismatch { expected: usize, actual: usize },
  /// 状态改变错误
  #[error("State change error: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
}

/// `videoflip` 的翻转方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlipMethod {
  Clockwise,
  Rotate180,
  CounterClockwise,
  Horizontal,
}

impl FlipMethod {
  fn method(&self) -> u32 {
    match self {
      FlipMethod::Clockwise => 1,
      FlipMethod::Rotate180 => 2,
      FlipMethod::CounterClockwise => 3,
      FlipMethod::Horizontal => 4,
    }
  }

  fn from_rotate(rotate: &str) -> Option<Self> {
    match rotate {
      "90" => Some(FlipMethod::Clockwise),
      "180" => Some(FlipMethod::Rotate180),
      "270" => Some(FlipMethod::CounterClockwise),
      _ => None,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GStreamerInputBuilderItem {
  FileSource(String),
  CameraSource {
    camera: String,
    width: Option<u32>,
    height: Option<u32>,
    fps: Option<u32>,
  },
  TargetFormat {
    format: String,
  },
  VideoFlip(FlipMethod),
}

impl GStreamerInputBuilderItem {
  fn to_pipeline(&self) -> String {
    match self {
      GStreamerInputBuilderItem::FileSource(path) => {
        format!("filesrc location=\"{}\" ! decodebin", path)
      }
      GStreamerInputBuilderItem::CameraSource {
        camera,
        width,
        height,
        fps,
      } => {
        let mut caps = Vec::new();
        if let Some(width) = width {
          caps.push(format!("width={}", width));
        }
        if let Some(height) = height {
          caps.push(format!("height={}", height));
        }
        if let Some(fps) = fps {
          caps.push(format!("framerate={}/1", fps));
        }
        if caps.is_empty() {
          format!("v4l2src device={}", camera)
        } else {
          format!("v4l2src device={} ! video/x-raw,{}", camera, caps.join(","))
        }
      }
      GStreamerInputBuilderItem::TargetFormat { format } => {
        format!("videoconvert ! video/x-raw,format={}", format)
      }
      GStreamerInputBuilderItem::VideoFlip(method) => {
        format!("videoflip method={}", method.method())
      }
    }
  }
}

/// GStreamer 输入管道构建器
///
/// # 示例
///
/// ```no_run
/// use kanjian::input::GStreamerInputPipelineBuilder;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let input = GStreamerInputPipelineBuilder::camera("/dev/video0")
///     .horizontal_flip(true)
///     .build()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct GStreamerInputPipelineBuilder {
  items: Vec<GStreamerInputBuilderItem>,
  flip: Option<FlipMethod>,
  camera: bool,
}

impl GStreamerInputPipelineBuilder {
  pub fn camera(device: &str) -> Self {
    GStreamerInputPipelineBuilder {
      items: vec![GStreamerInputBuilderItem::CameraSource {
        camera: device.to_string(),
        width: None,
        height: None,
        fps: None,
      }],
      flip: None,
      camera: true,
    }
  }

  pub fn file(path: &str) -> Self {
    GStreamerInputPipelineBuilder {
      items: vec![GStreamerInputBuilderItem::FileSource(path.to_string())],
      flip: None,
      camera: false,
    }
  }

  /// 按捕获设备标识创建：纯数字视为摄像头编号（`/dev/videoN`），
  /// `/dev/video*` 视为摄像头设备，其余视为视频文件路径
  pub fn from_capture_device(id: &str) -> Self {
    if !id.is_empty() && id.chars().all(|c| c.is_ascii_digit()) {
      Self::camera(&format!("/dev/video{}", id))
    } else if id.starts_with("/dev/video") {
      Self::camera(id)
    } else {
      Self::file(id)
    }
  }

  pub fn horizontal_flip(mut self, flip: bool) -> Self {
    if flip {
      self.flip = Some(FlipMethod::Horizontal);
    }
    self
  }

  pub fn flip(mut self, method: FlipMethod) -> Self {
    self.flip = Some(method);
    self
  }

  pub fn is_camera(&self) -> bool {
    self.camera
  }

  pub fn pipeline_description(&self) -> String {
    let mut items = self.items.clone();
    items.push(GStreamerInputBuilderItem::TargetFormat {
      format: "RGB".to_string(),
    });
    if let Some(method) = self.flip {
      items.push(GStreamerInputBuilderItem::VideoFlip(method));
    }

    let basic_pipeline = items
      .iter()
      .map(GStreamerInputBuilderItem::to_pipeline)
      .collect::<Vec<String>>()
      .join(" ! ");

    // 摄像头只保留最新帧，文件逐帧读取
    if self.camera {
      format!(
        "{} ! appsink max-buffers=2 drop=true name=sink",
        basic_pipeline
      )
    } else {
      format!("{} ! appsink sync=false name=sink", basic_pipeline)
    }
  }

  pub fn build(self) -> Result<GStreamerInput, GStreamerInputError> {
    gst::init()?;

    let full_pipeline = self.pipeline_description();
    info!("GStreamer pipeline description: {}", full_pipeline);

    let pipeline = gst::parse::launch(&full_pipeline)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| GStreamerInputError::PipelineError("Failed to create pipeline".to_string()))?;

    let appsink = pipeline
      .by_name("sink")
      .ok_or(GStreamerInputError::AppSinkNotFound)?
      .downcast::<gst_app::AppSink>()
      .map_err(|_| GStreamerInputError::AppSinkConversionFailed)?;

    pipeline.set_state(gst::State::Playing)?;

    Ok(GStreamerInput {
      pipeline,
      appsink,
      camera: self.camera,
    })
  }
}

impl FromUrlWithScheme for GStreamerInputPipelineBuilder {
  const SCHEME: &'static str = "gst";
}

impl FromUrl for GStreamerInputPipelineBuilder {
  type Error = GStreamerInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(GStreamerInputError::SchemeMismatch);
    }

    let query: HashMap<String, String> = url
      .query_pairs()
      .map(|(k, v)| (String::from(k), String::from(v)))
      .collect();

    let mut builder = match url.host_str() {
      Some("camera") => {
        let number = |key: &str| query.get(key).and_then(|v| v.parse::<u32>().ok());
        GStreamerInputPipelineBuilder {
          items: vec![GStreamerInputBuilderItem::CameraSource {
            camera: url.path().to_string(),
            width: number("width"),
            height: number("height"),
            fps: number("fps"),
          }],
          flip: None,
          camera: true,
        }
      }
      Some("file") => Self::file(url.path()),
      _ => {
        return Err(GStreamerInputError::SchemeMismatch);
      }
    };

    if let Some(method) = query.get("rotate").and_then(|r| FlipMethod::from_rotate(r)) {
      builder = builder.flip(method);
    }
    if query.get("flip").is_some_and(|v| v == "1" || v == "true") {
      builder = builder.horizontal_flip(true);
    }

    Ok(builder)
  }
}

/// GStreamer 视频输入
///
/// 管理 GStreamer 管道和 appsink，逐帧产出 RGB 帧；流结束时迭代结束。
pub struct GStreamerInput {
  pipeline: gst::Pipeline,
  appsink: gst_app::AppSink,
  camera: bool,
}

impl Drop for GStreamerInput {
  fn drop(&mut self) {
    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      warn!("Failed to stop GStreamer pipeline: {}", e);
    }
  }
}

impl GStreamerInput {
  fn pull_sample(&self) -> Option<gst::Sample> {
    if self.appsink.is_eos() {
      info!("输入流结束");
      return None;
    }

    self
      .appsink
      .pull_sample()
      .map_err(|e| {
        error!("Failed to pull sample: {}", e);
        e
      })
      .ok()
  }
}

impl Iterator for GStreamerInput {
  type Item = RgbNhwcFrame;

  fn next(&mut self) -> Option<Self::Item> {
    let sample = self.pull_sample()?;
    convert_sample_to_nhwc(&sample)
      .map_err(|e| {
        error!("Failed to fetch sample: {}", e);
        e
      })
      .ok()
  }
}

impl CaptureSource for GStreamerInput {
  fn is_camera(&self) -> bool {
    self.camera
  }
}

fn convert_sample_to_nhwc(sample: &gst::Sample) -> Result<RgbNhwcFrame, GStreamerInputError> {
  let buffer = sample
    .buffer()
    .ok_or_else(|| GStreamerInputError::PipelineError("No buffer in sample".to_string()))?;
  let caps = sample
    .caps()
    .ok_or_else(|| GStreamerInputError::PipelineError("No caps in sample".to_string()))?;

  let video_info =
    gst_video::VideoInfo::from_caps(caps).map_err(|_| GStreamerInputError::VideoInfoError)?;

  let width = video_info.width() as usize;
  let height = video_info.height() as usize;
  let stride = video_info.stride()[0] as usize;

  let map = buffer.map_readable().map_err(|e| {
    GStreamerInputError::PipelineError(format!("Failed to map buffer for reading: {}", e))
  })?;

  let data = pack_rows(map.as_slice(), width, height, stride)?;

  match video_info.format() {
    gst_video::VideoFormat::Rgb => RgbNhwcFrame::from_raw(width, height, data),
    gst_video::VideoFormat::Bgr => RgbNhwcFrame::from_bgr(width, height, data),
    other => {
      return Err(GStreamerInputError::UnsupportedFormat(format!(
        "{:?}",
        other
      )));
    }
  }
  .map_err(|e| GStreamerInputError::PipelineError(e.to_string()))
}

/// 去掉每行末尾的对齐填充字节
fn pack_rows(
  data: &[u8],
  width: usize,
  height: usize,
  stride: usize,
) -> Result<Vec<u8>, GStreamerInputError> {
  let row_len = width * RGB_CHANNELS;
  let stride = stride.max(row_len);
  let expected = if height == 0 {
    0
  } else {
    stride * (height - 1) + row_len
  };
  if data.len() < expected {
    return Err(GStreamerInputError::BufferSizeMismatch {
      expected,
      actual: data.len(),
    });
  }

  if stride == row_len {
    return Ok(data[..row_len * height].to_vec());
  }

  let mut packed = Vec::with_capacity(row_len * height);
  for row in 0..height {
    let start = row * stride;
    packed.extend_from_slice(&data[start..start + row_len]);
  }
  Ok(packed)
}
