// 该文件是 Kanjian （看见） 项目的一部分。
// src/export.rs - TorchScript 模型导出
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

//! 将简单模块和分类网络追踪（trace）为 TorchScript 文件。
//!
//! 检测网络（Faster R-CNN 等）无法在 Rust 侧构建，需要用训练框架自带的
//! 工具导出，推理程序直接加载其产物。

use std::path::{Path, PathBuf};

use tch::{
  CModule, Device, Kind, TchError, Tensor,
  nn::{self, Module, ModuleT},
  vision::resnet,
};
use thiserror::Error;
use tracing::{info, warn};

const IMAGENET_CLASSES: i64 = 1000;

#[derive(Error, Debug)]
pub enum ExportError {
  #[error("libtorch 错误: {0}")]
  TorchError(#[from] TchError),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("{0} 不需要权重文件")]
  UnexpectedWeights(ExportKind),
}

/// 可导出的模型
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ExportKind {
  Identity,
  Linear,
  Resnet18,
  Resnet34,
  Resnet50,
}

impl std::fmt::Display for ExportKind {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let name = match self {
      ExportKind::Identity => "identity",
      ExportKind::Linear => "linear",
      ExportKind::Resnet18 => "resnet18",
      ExportKind::Resnet34 => "resnet34",
      ExportKind::Resnet50 => "resnet50",
    };
    write!(f, "{}", name)
  }
}

impl ExportKind {
  /// 输出文件名（不含扩展名）
  pub fn file_stem(&self) -> String {
    format!("trace_{}", self)
  }

  /// 追踪时使用的示例输入形状
  pub fn example_shape(&self) -> &'static [i64] {
    match self {
      ExportKind::Identity | ExportKind::Linear => &[1, 1],
      ExportKind::Resnet18 | ExportKind::Resnet34 | ExportKind::Resnet50 => &[1, 3, 224, 224],
    }
  }

  pub fn takes_weights(&self) -> bool {
    matches!(
      self,
      ExportKind::Resnet18 | ExportKind::Resnet34 | ExportKind::Resnet50
    )
  }
}

fn trace<F>(kind: ExportKind, forward: F) -> Result<CModule, TchError>
where
  F: Fn(&Tensor) -> Tensor,
{
  let example = Tensor::rand(kind.example_shape(), (Kind::Float, Device::Cpu));
  CModule::create_by_tracing(
    &kind.file_stem(),
    "forward",
    &[example],
    &mut |inputs: &[Tensor]| vec![forward(&inputs[0])],
  )
}

fn trace_network(kind: ExportKind, weights: Option<&Path>) -> Result<CModule, ExportError> {
  if weights.is_some() && !kind.takes_weights() {
    return Err(ExportError::UnexpectedWeights(kind));
  }

  let mut vs = nn::VarStore::new(Device::Cpu);
  let root = vs.root();

  let module = match kind {
    ExportKind::Identity => trace(kind, |x| x.shallow_clone())?,
    ExportKind::Linear => {
      let linear = nn::linear(&root / "linear", 1, 1, Default::default());
      vs.freeze();
      trace(kind, |x| linear.forward(x))?
    }
    ExportKind::Resnet18 | ExportKind::Resnet34 | ExportKind::Resnet50 => {
      let net: Box<dyn nn::ModuleT> = match kind {
        ExportKind::Resnet18 => Box::new(resnet::resnet18(&root, IMAGENET_CLASSES)),
        ExportKind::Resnet34 => Box::new(resnet::resnet34(&root, IMAGENET_CLASSES)),
        _ => Box::new(resnet::resnet50(&root, IMAGENET_CLASSES)),
      };
      match weights {
        Some(path) => {
          info!("加载权重: {}", path.display());
          vs.load(path)?;
        }
        None => warn!("未指定权重文件，{} 使用随机初始化的参数", kind),
      }
      vs.freeze();
      trace(kind, |x| net.forward_t(x, false))?
    }
  };

  Ok(module)
}

/// 追踪模型并保存为 `<output_dir>/trace_<kind>.pt`，返回保存路径
pub fn export_model(
  kind: ExportKind,
  output_dir: &Path,
  weights: Option<&Path>,
) -> Result<PathBuf, ExportError> {
  std::fs::create_dir_all(output_dir)?;

  let module = tch::no_grad(|| trace_network(kind, weights))?;
  let output_path = output_dir.join(format!("{}.pt", kind.file_stem()));
  module.save(&output_path)?;

  info!("导出 {} 到 {}", kind, output_path.display());
  Ok(output_path)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn file_names_follow_kind() {
    assert_eq!(ExportKind::Linear.file_stem(), "trace_linear");
    assert_eq!(ExportKind::Resnet50.file_stem(), "trace_resnet50");
  }

  #[test]
  fn identity_returns_its_input() {
    let dir = tempfile::tempdir().unwrap();
    let path = export_model(ExportKind::Identity, dir.path(), None).unwrap();
    assert_eq!(path, dir.path().join("trace_identity.pt"));

    let module = CModule::load(&path).unwrap();
    let input = Tensor::from_slice(&[3.0f32, -1.5]).view([1, 2]);
    let output = module.forward_ts(&[&input]).unwrap();
    assert_eq!(Vec::<f32>::try_from(output.view([-1])).unwrap(), vec![3.0, -1.5]);
  }

  #[test]
  fn linear_keeps_batch_shape() {
    let dir = tempfile::tempdir().unwrap();
    let path = export_model(ExportKind::Linear, dir.path(), None).unwrap();

    let module = CModule::load(&path).unwrap();
    let input = Tensor::rand([4, 1], (Kind::Float, Device::Cpu));
    let output = module.forward_ts(&[input]).unwrap();
    assert_eq!(output.size(), vec![4, 1]);
  }

  #[test]
  fn weights_are_rejected_for_toy_modules() {
    let dir = tempfile::tempdir().unwrap();
    let result = export_model(
      ExportKind::Linear,
      dir.path(),
      Some(Path::new("/tmp/weights.ot")),
    );
    assert!(matches!(result, Err(ExportError::UnexpectedWeights(_))));
  }
}
