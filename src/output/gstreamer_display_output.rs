// 该文件是 Kanjian （看见） 项目的一部分。
// src/output/gstreamer_display_output.rs - GStreamer 窗口显示
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

//! # GStreamer 显示窗口
//!
//! 通过 `autovideosink` 显示标注后的帧。窗口中的按键 `q`、`Q` 与 `Esc`
//! 以及关闭窗口都会置位停止标志，由推理循环在下一帧前检查。
//!
//! URL：`display://`

use std::sync::{
  Arc, Mutex,
  atomic::{AtomicBool, Ordering},
};

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{AsNhwcFrame, RgbNhwcFrame},
  model::{DetectResult, WithLabel},
  output::{Render, draw::Draw},
};

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use url::Url;

const DISPLAY_PIPELINE: &str = "appsrc name=src ! videoconvert ! autovideosink sync=false";

#[derive(Error, Debug)]
pub enum GStreamerDisplayOutputError {
  #[error("URI scheme mismatch")]
  SchemeMismatch,
  #[error("GStreamer error: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  #[error("GStreamer boolean error: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  #[error("Failed to get appsrc element")]
  AppSrcNotFound,
  #[error("Failed to convert element to appsrc")]
  AppSrcConversionFailed,
  #[error("Pipeline error: {0}")]
  PipelineError(String),
  #[error("State change error: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
}

/// 退出键
pub fn is_quit_key(key: &str) -> bool {
  matches!(key, "q" | "Q" | "Escape")
}

struct DisplayWindow {
  pipeline: gst::Pipeline,
  appsrc: gst_app::AppSrc,
  width: usize,
  height: usize,
}

impl DisplayWindow {
  fn open(
    width: usize,
    height: usize,
    stop: Arc<AtomicBool>,
  ) -> Result<Self, GStreamerDisplayOutputError> {
    gst::init()?;

    let pipeline = gst::parse::launch(DISPLAY_PIPELINE)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| {
        GStreamerDisplayOutputError::PipelineError("Failed to create pipeline".to_string())
      })?;

    let appsrc = pipeline
      .by_name("src")
      .ok_or(GStreamerDisplayOutputError::AppSrcNotFound)?
      .downcast::<gst_app::AppSrc>()
      .map_err(|_| GStreamerDisplayOutputError::AppSrcConversionFailed)?;

    let caps = gst::Caps::builder("video/x-raw")
      .field("format", "RGB")
      .field("width", width as i32)
      .field("height", height as i32)
      .field("framerate", gst::Fraction::new(0, 1))
      .build();
    appsrc.set_caps(Some(&caps));
    appsrc.set_format(gst::Format::Time);
    appsrc.set_is_live(true);

    // 窗口的按键以导航事件的形式向上游传递
    let src_pad = appsrc
      .static_pad("src")
      .ok_or_else(|| GStreamerDisplayOutputError::PipelineError("appsrc has no src pad".into()))?;
    src_pad.add_probe(gst::PadProbeType::EVENT_UPSTREAM, move |_pad, info| {
      if let Some(event) = info.event()
        && event.type_() == gst::EventType::Navigation
        && let Ok(gst_video::NavigationEvent::KeyPress { key, .. }) =
          gst_video::NavigationEvent::parse(event)
      {
        debug!("窗口按键: {}", key);
        if is_quit_key(&key) {
          info!("收到退出按键 {}", key);
          stop.store(true, Ordering::SeqCst);
        }
      }
      gst::PadProbeReturn::Ok
    });

    pipeline.set_state(gst::State::Playing)?;
    info!("显示窗口已打开: {}x{}", width, height);

    Ok(DisplayWindow {
      pipeline,
      appsrc,
      width,
      height,
    })
  }

  fn push_frame(&self, data: &[u8]) -> Result<(), GStreamerDisplayOutputError> {
    let buffer = gst::Buffer::from_mut_slice(data.to_vec());
    self.appsrc.push_buffer(buffer).map_err(|e| {
      GStreamerDisplayOutputError::PipelineError(format!("Failed to push buffer: {:?}", e))
    })?;
    Ok(())
  }

  /// 窗口被关闭或管道出错时返回 true
  fn closed(&self) -> bool {
    let Some(bus) = self.pipeline.bus() else {
      return false;
    };
    match bus.pop_filtered(&[gst::MessageType::Error, gst::MessageType::Eos]) {
      Some(message) => {
        if let gst::MessageView::Error(err) = message.view() {
          warn!("显示管道结束: {}", err.error());
        }
        true
      }
      None => false,
    }
  }
}

impl Drop for DisplayWindow {
  fn drop(&mut self) {
    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      warn!("Failed to stop GStreamer display pipeline: {}", e);
    }
  }
}

/// GStreamer 显示窗口输出
pub struct GStreamerDisplayOutput {
  draw: Draw,
  stop: Arc<AtomicBool>,
  window: Mutex<Option<DisplayWindow>>,
}

impl FromUrlWithScheme for GStreamerDisplayOutput {
  const SCHEME: &'static str = "display";
}

impl FromUrl for GStreamerDisplayOutput {
  type Error = GStreamerDisplayOutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(GStreamerDisplayOutputError::SchemeMismatch);
    }
    Ok(GStreamerDisplayOutput::new(Draw::default()))
  }
}

impl GStreamerDisplayOutput {
  pub fn new(draw: Draw) -> Self {
    GStreamerDisplayOutput {
      draw,
      stop: Arc::new(AtomicBool::new(false)),
      window: Mutex::new(None),
    }
  }

  /// 按下退出键或关闭窗口后置位的标志
  pub fn stop_flag(&self) -> Arc<AtomicBool> {
    self.stop.clone()
  }

  fn show(&self, frame: &RgbNhwcFrame) -> Result<(), GStreamerDisplayOutputError> {
    let mut window = self.window.lock().map_err(|_| {
      GStreamerDisplayOutputError::PipelineError("window lock poisoned".to_string())
    })?;

    if window.is_none() {
      *window = Some(DisplayWindow::open(
        frame.width(),
        frame.height(),
        self.stop.clone(),
      )?);
    }

    let Some(window) = window.as_ref() else {
      return Err(GStreamerDisplayOutputError::PipelineError(
        "display window is not open".to_string(),
      ));
    };

    if window.closed() {
      self.stop.store(true, Ordering::SeqCst);
      return Ok(());
    }

    if (frame.width(), frame.height()) == (window.width, window.height) {
      window.push_frame(frame.as_nhwc())
    } else {
      window.push_frame(frame.resized(window.width, window.height).as_nhwc())
    }
  }
}

impl<T: WithLabel> Render<RgbNhwcFrame, DetectResult<T>> for GStreamerDisplayOutput {
  type Error = GStreamerDisplayOutputError;

  fn render_result(
    &self,
    frame: &RgbNhwcFrame,
    result: &DetectResult<T>,
  ) -> Result<(), Self::Error> {
    let image = self.draw.draw_detection(frame, result);
    self.show(&RgbNhwcFrame::from(image))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn quit_keys() {
    assert!(is_quit_key("q"));
    assert!(is_quit_key("Q"));
    assert!(is_quit_key("Escape"));
    assert!(!is_quit_key("space"));
    assert!(!is_quit_key("w"));
  }

  #[test]
  fn stop_flag_is_shared_and_initially_clear() {
    let output = GStreamerDisplayOutput::new(Draw::boxes_only());
    let flag = output.stop_flag();
    assert!(!flag.load(Ordering::SeqCst));
    output.stop.store(true, Ordering::SeqCst);
    assert!(flag.load(Ordering::SeqCst));
  }

  #[test]
  fn rejects_other_schemes() {
    let url = Url::parse("gstvideo:///tmp/out.mp4").unwrap();
    assert!(matches!(
      GStreamerDisplayOutput::from_url(&url),
      Err(GStreamerDisplayOutputError::SchemeMismatch)
    ));
  }
}
