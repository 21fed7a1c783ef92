// 该文件是 Kanjian （看见） 项目的一部分。
// src/model/options.rs - 推理设备与数值精度
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::{fmt, str::FromStr};

use tch::{Device, Kind};
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum OptionsError {
  #[error("不支持的推理设备: {0}（可选 cpu, cuda, cuda:N, mps）")]
  UnsupportedDevice(String),
  #[error("推理设备不可用: {0}")]
  DeviceUnavailable(String),
  #[error("不支持的数值精度: {0}（可选 half, float, double）")]
  UnsupportedPrecision(String),
}

/// 推理设备，例如 `cpu`、`cuda`、`cuda:1`、`mps`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accelerator {
  Cpu,
  Cuda(usize),
  Mps,
}

impl FromStr for Accelerator {
  type Err = OptionsError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let lower = s.trim().to_ascii_lowercase();
    match lower.as_str() {
      "cpu" => Ok(Accelerator::Cpu),
      "cuda" | "gpu" => Ok(Accelerator::Cuda(0)),
      "mps" => Ok(Accelerator::Mps),
      other => other
        .strip_prefix("cuda:")
        .and_then(|index| index.parse::<usize>().ok())
        .map(Accelerator::Cuda)
        .ok_or_else(|| OptionsError::UnsupportedDevice(s.to_string())),
    }
  }
}

impl fmt::Display for Accelerator {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Accelerator::Cpu => write!(f, "cpu"),
      Accelerator::Cuda(index) => write!(f, "cuda:{}", index),
      Accelerator::Mps => write!(f, "mps"),
    }
  }
}

impl Accelerator {
  /// 转换为 libtorch 设备，并检查设备在本机可用
  pub fn device(&self) -> Result<Device, OptionsError> {
    match *self {
      Accelerator::Cpu => Ok(Device::Cpu),
      Accelerator::Cuda(index) => {
        let count = tch::Cuda::device_count().max(0) as usize;
        if index < count {
          Ok(Device::Cuda(index))
        } else {
          Err(OptionsError::DeviceUnavailable(self.to_string()))
        }
      }
      Accelerator::Mps => {
        if tch::utils::has_mps() {
          Ok(Device::Mps)
        } else {
          Err(OptionsError::DeviceUnavailable(self.to_string()))
        }
      }
    }
  }
}

/// 数值精度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum Precision {
  Half,
  #[default]
  Float,
  Double,
}

impl Precision {
  pub fn kind(&self) -> Kind {
    match self {
      Precision::Half => Kind::Half,
      Precision::Float => Kind::Float,
      Precision::Double => Kind::Double,
    }
  }
}

impl FromStr for Precision {
  type Err = OptionsError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_ascii_lowercase().as_str() {
      "half" => Ok(Precision::Half),
      "float" => Ok(Precision::Float),
      "double" => Ok(Precision::Double),
      _ => Err(OptionsError::UnsupportedPrecision(s.to_string())),
    }
  }
}

impl fmt::Display for Precision {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Precision::Half => write!(f, "half"),
      Precision::Float => write!(f, "float"),
      Precision::Double => write!(f, "double"),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_device_names() {
    assert_eq!("cpu".parse(), Ok(Accelerator::Cpu));
    assert_eq!("CUDA".parse(), Ok(Accelerator::Cuda(0)));
    assert_eq!("cuda:2".parse(), Ok(Accelerator::Cuda(2)));
    assert_eq!("mps".parse(), Ok(Accelerator::Mps));
  }

  #[test]
  fn rejects_unknown_devices() {
    assert_eq!(
      "tpu".parse::<Accelerator>(),
      Err(OptionsError::UnsupportedDevice("tpu".to_string()))
    );
    assert!("cuda:x".parse::<Accelerator>().is_err());
  }

  #[test]
  fn cpu_is_always_available() {
    assert_eq!(Accelerator::Cpu.device(), Ok(Device::Cpu));
  }

  #[test]
  fn device_display_round_trips() {
    for name in ["cpu", "cuda:0", "mps"] {
      let accelerator: Accelerator = name.parse().unwrap();
      assert_eq!(accelerator.to_string(), name);
    }
  }

  #[test]
  fn precision_maps_to_kind() {
    assert_eq!(Precision::Half.kind(), Kind::Half);
    assert_eq!(Precision::default().kind(), Kind::Float);
    assert_eq!("double".parse::<Precision>().unwrap().kind(), Kind::Double);
    assert!("int8".parse::<Precision>().is_err());
  }
}
