// 该文件是 Kanjian （看见） 项目的一部分。
// src/bin/export_model.rs - 导出 TorchScript 模型
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

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use kanjian::export::{ExportKind, export_model};

/// 将模块追踪为 TorchScript 文件
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 要导出的模型
  #[arg(value_enum, value_name = "MODEL")]
  pub models: Vec<ExportKind>,

  /// 输出目录
  #[arg(short, long, default_value = "data", value_name = "DIR")]
  pub output_dir: PathBuf,

  /// ResNet 权重文件（.ot）
  #[arg(short, long, value_name = "FILE")]
  pub weights: Option<PathBuf>,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();
  info!("输出目录: {}", args.output_dir.display());

  let models = if args.models.is_empty() {
    vec![ExportKind::Identity, ExportKind::Linear]
  } else {
    args.models
  };

  for kind in models {
    let weights = args.weights.as_deref().filter(|_| kind.takes_weights());
    let path = export_model(kind, &args.output_dir, weights)?;
    println!("saved model to {}", path.display());
  }

  Ok(())
}
