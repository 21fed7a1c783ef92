// 该文件是 Kanjian （看见） 项目的一部分。
// src/args.rs - 项目参数配置
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::PathBuf;

use clap::Parser;
use kanjian::model::{Accelerator, Precision};

/// Kanjian 实时目标检测
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// TorchScript 模型文件路径
  #[arg(value_name = "MODEL")]
  pub model: PathBuf,

  /// 置信度阈值，分数不低于该值的目标会被保留
  #[arg(short, long, default_value_t = 0.7, value_name = "THRESHOLD")]
  pub threshold: f32,

  /// 每帧最多保留的目标数（按分数从高到低）
  #[arg(short = 'f', long, value_name = "COUNT")]
  pub face_limit: Option<usize>,

  /// 模型输入尺寸（宽 高），默认按采集帧的原始尺寸推理
  #[arg(short, long, num_args = 2, value_names = ["W", "H"])]
  pub input_shape: Option<Vec<usize>>,

  /// 推理设备: cpu, cuda, cuda:N, mps
  #[arg(short = 'D', long, default_value = "cpu", value_name = "DEVICE")]
  pub device: Accelerator,

  /// 数值精度
  #[arg(short = 'P', long, value_enum, default_value_t = Precision::Float)]
  pub precision: Precision,

  /// 摄像头编号或视频文件路径
  #[arg(short = 'C', long, default_value = "0", value_name = "DEVICE")]
  pub capture_device: String,

  /// 水平翻转采集到的画面
  #[arg(short = 'F', long)]
  pub flip: bool,

  /// 打开摄像头后丢弃的帧数
  #[arg(short = 'W', long, default_value_t = 5, value_name = "COUNT")]
  pub warmup_frames: usize,

  /// 不显示窗口
  #[arg(long)]
  pub no_gui: bool,

  /// 录制视频的输出路径（MP4）
  #[arg(short, long, value_name = "OUTPUT")]
  pub output: Option<PathBuf>,

  /// 标签字体（TrueType），默认查找系统字体
  #[arg(long, value_name = "FONT")]
  pub font: Option<PathBuf>,

  /// 最多处理的帧数，默认处理到输入结束
  #[arg(long, value_name = "COUNT")]
  pub frame_number: Option<usize>,
}

impl Args {
  /// 模型输入的 (宽, 高)，未指定时返回 `None`
  pub fn input_size(&self) -> Option<(usize, usize)> {
    match self.input_shape.as_deref() {
      Some([width, height]) => Some((*width, *height)),
      _ => None,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn defaults() {
    let args = Args::try_parse_from(["kanjian", "model.pt"]).unwrap();
    assert_eq!(args.model, PathBuf::from("model.pt"));
    assert_eq!(args.threshold, 0.7);
    assert_eq!(args.face_limit, None);
    assert_eq!(args.input_shape, None);
    assert_eq!(args.input_size(), None);
    assert_eq!(args.device, Accelerator::Cpu);
    assert_eq!(args.precision, Precision::Float);
    assert_eq!(args.capture_device, "0");
    assert!(!args.flip);
    assert_eq!(args.warmup_frames, 5);
    assert!(!args.no_gui);
    assert_eq!(args.output, None);
    assert_eq!(args.font, None);
    assert_eq!(args.frame_number, None);
  }

  #[test]
  fn short_flags() {
    let args = Args::try_parse_from([
      "kanjian", "model.pt", "-t", "0.5", "-f", "3", "-i", "320", "240", "-D", "cuda:1", "-P",
      "half", "-C", "clip.mp4", "-F", "-W", "0", "-o", "out.mp4",
    ])
    .unwrap();
    assert_eq!(args.threshold, 0.5);
    assert_eq!(args.face_limit, Some(3));
    assert_eq!(args.input_size(), Some((320, 240)));
    assert_eq!(args.device, Accelerator::Cuda(1));
    assert_eq!(args.precision, Precision::Half);
    assert_eq!(args.capture_device, "clip.mp4");
    assert!(args.flip);
    assert_eq!(args.warmup_frames, 0);
    assert_eq!(args.output, Some(PathBuf::from("out.mp4")));
  }

  #[test]
  fn model_is_required() {
    assert!(Args::try_parse_from(["kanjian"]).is_err());
  }

  #[test]
  fn unsupported_device_and_precision_are_rejected() {
    assert!(Args::try_parse_from(["kanjian", "m.pt", "-D", "tpu"]).is_err());
    assert!(Args::try_parse_from(["kanjian", "m.pt", "-P", "int8"]).is_err());
  }

  #[test]
  fn input_shape_needs_two_values() {
    assert!(Args::try_parse_from(["kanjian", "m.pt", "-i", "320"]).is_err());
  }
}
