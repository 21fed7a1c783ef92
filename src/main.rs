// 该文件是 Kanjian （看见） 项目的一部分。
// src/main.rs - 项目主程序
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

mod args;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use kanjian::{
  input::{GStreamerInput, GStreamerInputPipelineBuilder},
  model::{CocoLabel, TorchDetector, TorchDetectorBuilder},
  output::{GStreamerDisplayOutput, GStreamerVideoOutput, OutputList, OutputWrapper, draw::Draw},
  task::{CAPTURE_INIT_ERROR, ContinuousTask, Task, interrupt_flag},
};

/// 打开摄像头或视频文件
fn open_capture(args: &args::Args) -> Result<GStreamerInput> {
  GStreamerInputPipelineBuilder::from_capture_device(&args.capture_device)
    .horizontal_flip(args.flip)
    .build()
    .context(CAPTURE_INIT_ERROR)
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = args::Args::parse();

  info!("模型文件路径: {}", args.model.display());
  info!("推理设备: {}，精度: {}", args.device, args.precision);
  info!("输入来源: {}", args.capture_device);
  info!("置信度阈值: {}", args.threshold);

  let mut builder = TorchDetectorBuilder::new(&args.model)
    .accelerator(args.device)
    .precision(args.precision)
    .threshold(args.threshold)
    .limit(args.face_limit);
  match args.input_size() {
    Some((width, height)) => {
      info!("模型输入尺寸: {}x{}", width, height);
      builder = builder.input_shape(width, height);
    }
    None => info!("模型输入尺寸: 采集帧原始尺寸"),
  }
  let model: TorchDetector<CocoLabel> = builder.build()?;

  let input = open_capture(&args)?;

  let draw = Draw::with_font(args.font.as_deref())?;
  let mut task = ContinuousTask::default()
    .with_warmup_frames(args.warmup_frames)
    .with_frame_number(args.frame_number)
    .with_stop_flag(interrupt_flag()?);

  let mut outputs = OutputList::new();
  if !args.no_gui {
    let display = GStreamerDisplayOutput::new(draw.clone());
    task = task.with_stop_flag(display.stop_flag());
    outputs.push(OutputWrapper::GStreamerDisplayOutput(display));
  }
  if let Some(path) = &args.output {
    info!("录制到: {}", path.display());
    outputs.push(OutputWrapper::GStreamerVideoOutput(
      GStreamerVideoOutput::new(path, draw),
    ));
  }

  let summary = task.run_task(input, model, outputs)?;
  info!(
    "处理完成: 共 {} 帧, {} 个目标",
    summary.frames, summary.detections
  );

  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn missing_video_file_reports_capture_failure() {
    let args = args::Args::try_parse_from([
      "kanjian",
      "model.pt",
      "-C",
      "/nonexistent/kanjian/clip.mp4",
    ])
    .unwrap();
    let err = open_capture(&args).unwrap_err();
    assert_eq!(err.to_string(), CAPTURE_INIT_ERROR);
  }
}
