// 该文件是 Kanjian （看见） 项目的一部分。
// src/bin/detect_image.rs - 单张图片推理
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use kanjian::{
  FromUrl, FromUrlWithScheme,
  input::ImageFileInput,
  model::{Accelerator, CocoLabel, DetectResult, Precision, TorchDetectorBuilder, WithLabel},
  output::{SaveImageFileOutput, draw::Draw},
  path_to_url,
  task::{OneShotTask, Task},
};

/// 对单张图片做目标检测
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// TorchScript 模型文件路径
  #[arg(value_name = "MODEL")]
  pub model: PathBuf,

  /// 输入图片
  #[arg(value_name = "IMAGE")]
  pub image: PathBuf,

  /// 置信度阈值
  #[arg(short, long, default_value_t = 0.7, value_name = "THRESHOLD")]
  pub threshold: f32,

  /// 模型输入尺寸（宽 高），默认使用图片尺寸
  #[arg(short, long, num_args = 2, value_names = ["W", "H"])]
  pub input_shape: Option<Vec<usize>>,

  /// 推理设备: cpu, cuda, cuda:N, mps
  #[arg(short = 'D', long, default_value = "cpu", value_name = "DEVICE")]
  pub device: Accelerator,

  /// 数值精度
  #[arg(short = 'P', long, value_enum, default_value_t = Precision::Float)]
  pub precision: Precision,

  /// 标注结果输出路径
  #[arg(short, long, default_value = "result.png", value_name = "OUTPUT")]
  pub output: PathBuf,

  /// 第一个目标的裁剪图输出路径
  #[arg(long, value_name = "ROI")]
  pub roi: Option<PathBuf>,

  /// 标签字体（TrueType）
  #[arg(long, value_name = "FONT")]
  pub font: Option<PathBuf>,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型文件路径: {}", args.model.display());
  info!("输入图片: {}", args.image.display());
  info!("输出路径: {}", args.output.display());

  let image_url = path_to_url(ImageFileInput::SCHEME, &args.image.to_string_lossy())?;
  let frame = ImageFileInput::from_url(&image_url)?
    .next()
    .context("图片中没有可用的帧")?;

  let mut builder = TorchDetectorBuilder::new(&args.model)
    .accelerator(args.device)
    .precision(args.precision)
    .threshold(args.threshold);
  if let Some([width, height]) = args.input_shape.as_deref() {
    builder = builder.input_shape(*width, *height);
  }
  let model = builder.build::<CocoLabel>()?;
  let output = SaveImageFileOutput::new(&args.output, Draw::with_font(args.font.as_deref())?);

  let result: DetectResult<CocoLabel> =
    OneShotTask.run_task(std::iter::once(frame.clone()), model, output)?;

  let Some(first) = result.items.first() else {
    warn!("没有分数不低于 {} 的目标", args.threshold);
    println!("no detection above threshold {}", args.threshold);
    return Ok(());
  };

  let [x_min, y_min, x_max, y_max] = first.pixel_box(frame.width(), frame.height());
  println!("label: {}", first.kind.to_label_str());
  println!("score: {:.4}", first.score);
  println!("box: ({}, {}, {}, {})", x_min, y_min, x_max, y_max);

  if let Some(roi_path) = &args.roi {
    if x_max <= x_min || y_max <= y_min {
      warn!("目标框为空，不保存裁剪图");
    } else {
      let image = frame.to_rgb_image();
      let roi = image::imageops::crop_imm(&image, x_min, y_min, x_max - x_min, y_max - y_min)
        .to_image();
      roi.save(roi_path)?;
      info!("保存裁剪图到: {}", roi_path.display());
    }
  }

  Ok(())
}
