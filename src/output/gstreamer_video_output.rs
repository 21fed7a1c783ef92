// 该文件是 Kanjian （看见） 项目的一部分。
// src/output/gstreamer_video_output.rs - GStreamer 视频文件输出
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

//! # GStreamer 视频文件输出模块
//!
//! 将标注后的视频帧录制为 MP4 文件（MPEG-4 Part 2 / `mp4v` 编码，30 fps）。
//!
//! 编码管道在收到第一帧时创建，视频尺寸取第一帧的尺寸；之后尺寸不同的帧
//! 会被缩放到该尺寸。
//!
//! ## URL Scheme
//!
//! `gstvideo:///path/to/output.mp4`
//!
//! ## 基本用法
//!
//! ```no_run
//! use kanjian::{FromUrl, output::GStreamerVideoOutput};
//! use url::Url;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let url = Url::parse("gstvideo:///tmp/output.mp4")?;
//! let output = GStreamerVideoOutput::from_url(&url)?;
//! # Ok(())
//! # }
//! ```

use std::{
  path::{Path, PathBuf},
  sync::Mutex,
};

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{AsNhwcFrame, RgbNhwcFrame},
  model::{DetectResult, WithLabel},
  output::{Render, draw::Draw},
};

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use thiserror::Error;
use tracing::{error, info, warn};
use url::Url;

/// 录制帧率
pub const RECORD_FPS: i32 = 30;

// 等待复用器写完文件尾的最长时间
const EOS_TIMEOUT_SECONDS: u64 = 5;

/// GStreamer 视频输出错误类型
#[derive(Error, Debug)]
pub enum GStreamerVideoOutputError {
  /// URI scheme 不匹配
  #[error("URI scheme mismatch")]
  SchemeMismatch,
  /// GStreamer 库错误
  #[error("GStreamer error: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  /// GStreamer 布尔操作错误
  #[error("GStreamer boolean error: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  /// 无法获取 appsrc 元素
  #[error("Failed to get appsrc element")]
  AppSrcNotFound,
  /// 无法转换元素为 appsrc
  #[error("Failed to convert element to appsrc")]
  AppSrcConversionFailed,
  /// 管道错误
  #[error("Pipeline error: {0}")]
  PipelineError(String),
  /// 状态改变错误
  #[error("State change error: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
  /// 缓冲区创建错误
  #[error("Buffer creation error")]
  BufferCreationError,
  /// 空帧无法决定视频尺寸
  #[error("Cannot record an empty frame")]
  EmptyFrame,
}

/// 录制文件的编码管道描述
pub fn pipeline_description(path: &Path) -> String {
  format!(
    "appsrc name=src ! videoconvert ! avenc_mpeg4 ! mp4mux ! filesink location=\"{}\"",
    path.display()
  )
}

struct VideoWriter {
  pipeline: gst::Pipeline,
  appsrc: gst_app::AppSrc,
  width: usize,
  height: usize,
  frame_count: u64,
}

impl VideoWriter {
  fn open(path: &Path, width: usize, height: usize) -> Result<Self, GStreamerVideoOutputError> {
    gst::init()?;

    let pipeline_desc = pipeline_description(path);
    info!("Creating video output pipeline: {}", pipeline_desc);

    let pipeline = gst::parse::launch(&pipeline_desc)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| {
        GStreamerVideoOutputError::PipelineError("Failed to create pipeline".to_string())
      })?;

    let appsrc = pipeline
      .by_name("src")
      .ok_or(GStreamerVideoOutputError::AppSrcNotFound)?
      .downcast::<gst_app::AppSrc>()
      .map_err(|_| GStreamerVideoOutputError::AppSrcConversionFailed)?;

    let caps = gst::Caps::builder("video/x-raw")
      .field("format", "RGB")
      .field("width", width as i32)
      .field("height", height as i32)
      .field("framerate", gst::Fraction::new(RECORD_FPS, 1))
      .build();

    appsrc.set_caps(Some(&caps));
    appsrc.set_format(gst::Format::Time);

    pipeline.set_state(gst::State::Playing)?;

    info!(
      "Video output initialized: {}x{} @ {} fps -> {}",
      width,
      height,
      RECORD_FPS,
      path.display()
    );

    Ok(VideoWriter {
      pipeline,
      appsrc,
      width,
      height,
      frame_count: 0,
    })
  }

  fn push_frame(&mut self, data: &[u8]) -> Result<(), GStreamerVideoOutputError> {
    let mut buffer = gst::Buffer::from_mut_slice(data.to_vec());

    let frame_duration = 1_000_000_000 / RECORD_FPS as u64;
    let timestamp = self.frame_count * frame_duration;
    self.frame_count += 1;

    {
      let buffer_ref = buffer
        .get_mut()
        .ok_or(GStreamerVideoOutputError::BufferCreationError)?;
      buffer_ref.set_pts(gst::ClockTime::from_nseconds(timestamp));
      buffer_ref.set_duration(gst::ClockTime::from_nseconds(frame_duration));
    }

    self.appsrc.push_buffer(buffer).map_err(|e| {
      GStreamerVideoOutputError::PipelineError(format!("Failed to push buffer: {:?}", e))
    })?;

    Ok(())
  }
}

impl Drop for VideoWriter {
  fn drop(&mut self) {
    // 发送 EOS 并等待复用器写完文件
    if let Err(e) = self.appsrc.end_of_stream() {
      warn!("Failed to send EOS to video output: {:?}", e);
    } else if let Some(bus) = self.pipeline.bus() {
      let message = bus.timed_pop_filtered(
        gst::ClockTime::from_seconds(EOS_TIMEOUT_SECONDS),
        &[gst::MessageType::Eos, gst::MessageType::Error],
      );
      match message.as_ref().map(|m| m.view()) {
        Some(gst::MessageView::Error(err)) => {
          error!("Video output pipeline error: {}", err.error());
        }
        None => warn!("Timed out waiting for video output to finish"),
        _ => {}
      }
    }

    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      warn!("Failed to stop GStreamer video output pipeline: {}", e);
    }

    info!(
      "Video output closed. Total frames written: {}",
      self.frame_count
    );
  }
}

/// GStreamer 视频文件输出
pub struct GStreamerVideoOutput {
  path: PathBuf,
  draw: Draw,
  writer: Mutex<Option<VideoWriter>>,
}

impl FromUrlWithScheme for GStreamerVideoOutput {
  const SCHEME: &'static str = "gstvideo";
}

impl FromUrl for GStreamerVideoOutput {
  type Error = GStreamerVideoOutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(GStreamerVideoOutputError::SchemeMismatch);
    }

    Ok(GStreamerVideoOutput::new(url.path(), Draw::default()))
  }
}

impl GStreamerVideoOutput {
  pub fn new(path: impl AsRef<Path>, draw: Draw) -> Self {
    GStreamerVideoOutput {
      path: path.as_ref().to_path_buf(),
      draw,
      writer: Mutex::new(None),
    }
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  fn push_frame(&self, frame: &RgbNhwcFrame) -> Result<(), GStreamerVideoOutputError> {
    let mut writer = self
      .writer
      .lock()
      .map_err(|_| GStreamerVideoOutputError::PipelineError("writer lock poisoned".to_string()))?;

    if writer.is_none() {
      if frame.is_empty() {
        return Err(GStreamerVideoOutputError::EmptyFrame);
      }
      *writer = Some(VideoWriter::open(&self.path, frame.width(), frame.height())?);
    }

    let Some(writer) = writer.as_mut() else {
      return Err(GStreamerVideoOutputError::PipelineError(
        "video writer is not open".to_string(),
      ));
    };

    if (frame.width(), frame.height()) == (writer.width, writer.height) {
      writer.push_frame(frame.as_nhwc())
    } else {
      let resized = frame.resized(writer.width, writer.height);
      writer.push_frame(resized.as_nhwc())
    }
  }
}

impl<T: WithLabel> Render<RgbNhwcFrame, DetectResult<T>> for GStreamerVideoOutput {
  type Error = GStreamerVideoOutputError;

  fn render_result(
    &self,
    frame: &RgbNhwcFrame,
    result: &DetectResult<T>,
  ) -> Result<(), Self::Error> {
    let image = self.draw.draw_detection(frame, result);
    self.push_frame(&RgbNhwcFrame::from(image))
  }
}
