// 该文件是 Kanjian （看见） 项目的一部分。
// src/model/torchscript.rs - TorchScript 检测模型
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::{collections::HashMap, marker::PhantomData, path::PathBuf};

use tch::{CModule, Device, IValue, Kind, Tensor};
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{AsNhwcFrame, RgbNhwcFrame},
  model::{
    Accelerator, CocoLabel, DetectResult, Model, OptionsError, Precision, RawDetection,
    WithLabel, filter_detections,
  },
};

const DEFAULT_THRESHOLD: f32 = 0.7;

#[derive(Error, Debug)]
pub enum TorchModelError {
  #[error("模型加载错误: {0}, 错误: {1}")]
  ModelLoadError(String, tch::TchError),
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
  #[error("推理选项错误: {0}")]
  OptionsError(#[from] OptionsError),
  #[error("libtorch 错误: {0}")]
  TorchError(#[from] tch::TchError),
  #[error("模型输出结构不符合预期: {0}")]
  UnexpectedOutput(String),
  #[error("模型输出缺少字段: {0}")]
  MissingKey(&'static str),
  #[error("模型输出形状不符合预期: {0}")]
  ShapeMismatch(String),
  #[error("输入帧为空")]
  EmptyFrame,
}

pub struct TorchDetectorBuilder {
  model_path: PathBuf,
  accelerator: Accelerator,
  precision: Precision,
  input_shape: Option<(usize, usize)>,
  threshold: f32,
  limit: Option<usize>,
}

impl FromUrlWithScheme for TorchDetectorBuilder {
  const SCHEME: &'static str = "torchscript";
}

impl FromUrl for TorchDetectorBuilder {
  type Error = TorchModelError;

  /// `torchscript:///path/model.pt?device=cuda&precision=half&threshold=0.5&width=640&height=480&limit=10`
  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(TorchModelError::ModelPathError(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }

    let query: HashMap<String, String> = url
      .query_pairs()
      .map(|(k, v)| (String::from(k), String::from(v)))
      .collect();

    let mut builder = TorchDetectorBuilder::new(url.path());
    if let Some(device) = query.get("device") {
      builder = builder.accelerator(device.parse()?);
    }
    if let Some(precision) = query.get("precision") {
      builder = builder.precision(precision.parse()?);
    }
    if let Some(threshold) = query.get("threshold").and_then(|v| v.parse().ok()) {
      builder = builder.threshold(threshold);
    }
    let width = query.get("width").and_then(|v| v.parse().ok());
    let height = query.get("height").and_then(|v| v.parse().ok());
    if let (Some(width), Some(height)) = (width, height) {
      builder = builder.input_shape(width, height);
    }
    builder = builder.limit(query.get("limit").and_then(|v| v.parse().ok()));

    Ok(builder)
  }
}

impl TorchDetectorBuilder {
  pub fn new(model_path: impl Into<PathBuf>) -> Self {
    Self {
      model_path: model_path.into(),
      accelerator: Accelerator::Cpu,
      precision: Precision::default(),
      input_shape: None,
      threshold: DEFAULT_THRESHOLD,
      limit: None,
    }
  }

  pub fn accelerator(mut self, accelerator: Accelerator) -> Self {
    self.accelerator = accelerator;
    self
  }

  pub fn precision(mut self, precision: Precision) -> Self {
    self.precision = precision;
    self
  }

  /// 模型输入尺寸（宽, 高），不设置时按帧的原始尺寸推理
  pub fn input_shape(mut self, width: usize, height: usize) -> Self {
    self.input_shape = Some((width, height));
    self
  }

  pub fn threshold(mut self, threshold: f32) -> Self {
    self.threshold = threshold;
    self
  }

  pub fn limit(mut self, limit: Option<usize>) -> Self {
    self.limit = limit;
    self
  }

  pub fn build<T: WithLabel>(self) -> Result<TorchDetector<T>, TorchModelError> {
    let path = self.model_path.display().to_string();
    if !self.model_path.is_file() {
      return Err(TorchModelError::ModelPathError(format!(
        "模型文件不存在: {}",
        path
      )));
    }
    if let Some((width, height)) = self.input_shape.filter(|&(w, h)| w == 0 || h == 0) {
      return Err(TorchModelError::ShapeMismatch(format!(
        "输入尺寸必须为正数: {}x{}",
        width, height
      )));
    }

    let device = self.accelerator.device()?;
    info!("加载 TorchScript 模型: {}", path);
    info!("推理设备: {}", self.accelerator);
    info!("数值精度: {}", self.precision);

    let mut module = {
      let _guard = tch::no_grad_guard();
      CModule::load_on_device(&self.model_path, device)
        .map_err(|e| TorchModelError::ModelLoadError(path.clone(), e))?
    };
    module.set_eval();
    if self.precision != Precision::Float {
      module.to(device, self.precision.kind(), false);
    }
    info!("模型加载完成");

    Ok(TorchDetector {
      module,
      device,
      kind: self.precision.kind(),
      input_shape: self.input_shape,
      threshold: self.threshold,
      limit: self.limit,
      _phantom: PhantomData,
    })
  }
}

pub struct TorchDetector<T = CocoLabel> {
  module: CModule,
  device: Device,
  kind: Kind,
  input_shape: Option<(usize, usize)>,
  threshold: f32,
  limit: Option<usize>,
  _phantom: PhantomData<T>,
}

impl<T> TorchDetector<T> {
  pub fn threshold(&self) -> f32 {
    self.threshold
  }

  pub fn input_shape(&self) -> Option<(usize, usize)> {
    self.input_shape
  }

  /// 实际送入模型的 (宽, 高)
  fn model_input_size(&self, frame: &RgbNhwcFrame) -> (usize, usize) {
    self
      .input_shape
      .unwrap_or((frame.width(), frame.height()))
  }

  /// HWC u8 → CHW 浮点张量，数值范围 [0, 1]
  fn preprocess(&self, frame: &RgbNhwcFrame) -> Result<Tensor, TorchModelError> {
    if frame.is_empty() {
      return Err(TorchModelError::EmptyFrame);
    }

    let (width, height) = self.model_input_size(frame);
    let resized;
    let frame = if (width, height) == (frame.width(), frame.height()) {
      frame
    } else {
      resized = frame.resized(width, height);
      &resized
    };
    let tensor = Tensor::from_slice(frame.as_nhwc())
      .view([height as i64, width as i64, 3])
      .to_device(self.device)
      .to_kind(self.kind)
      / 255.0;

    Ok(tensor.permute([2, 0, 1]))
  }
}

impl<T: WithLabel> Model for TorchDetector<T> {
  type Input = RgbNhwcFrame;
  type Output = DetectResult<T>;
  type Error = TorchModelError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    let _guard = tch::no_grad_guard();

    debug!("构造模型输入");
    let tensor = self.preprocess(input)?;

    // 检测模型接受 CHW 张量列表以支持任意尺寸
    debug!("执行模型推理");
    let output = self
      .module
      .forward_is(&[IValue::TensorList(vec![tensor])])?;

    debug!("解析模型输出");
    let raw = parse_detections(output)?;
    Ok(filter_detections(
      &raw,
      self.threshold,
      self.limit,
      self.model_input_size(input),
    ))
  }
}

fn ivalue_kind(value: &IValue) -> &'static str {
  match value {
    IValue::None => "None",
    IValue::Tensor(_) => "Tensor",
    IValue::Double(_) => "Double",
    IValue::Int(_) => "Int",
    IValue::Bool(_) => "Bool",
    IValue::Tuple(_) => "Tuple",
    IValue::String(_) => "String",
    IValue::TensorList(_) => "TensorList",
    IValue::GenericList(_) => "GenericList",
    IValue::GenericDict(_) => "GenericDict",
    _ => "Other",
  }
}

/// 在模型输出中定位检测结果字典
///
/// torchvision 脚本化检测模型返回 `(losses, [detections])`，
/// 追踪得到的模型通常直接返回 `[detections]` 或 `detections`。
fn locate_detections(output: IValue) -> Result<Vec<(IValue, IValue)>, TorchModelError> {
  match output {
    IValue::Tuple(mut items) => match items.pop() {
      Some(last) => locate_detections(last),
      None => Err(TorchModelError::UnexpectedOutput("空元组".to_string())),
    },
    IValue::GenericList(mut items) => {
      if items.is_empty() {
        return Err(TorchModelError::UnexpectedOutput("空列表".to_string()));
      }
      locate_detections(items.swap_remove(0))
    }
    IValue::GenericDict(entries) => Ok(entries),
    other => Err(TorchModelError::UnexpectedOutput(format!(
      "期望字典、列表或元组，实际为 {}",
      ivalue_kind(&other)
    ))),
  }
}

fn take_tensor(
  entries: &mut Vec<(IValue, IValue)>,
  key: &'static str,
) -> Result<Tensor, TorchModelError> {
  let position = entries
    .iter()
    .position(|(k, _)| matches!(k, IValue::String(name) if name == key))
    .ok_or(TorchModelError::MissingKey(key))?;

  match entries.swap_remove(position).1 {
    IValue::Tensor(tensor) => Ok(tensor),
    other => Err(TorchModelError::UnexpectedOutput(format!(
      "字段 {} 期望为 Tensor，实际为 {}",
      key,
      ivalue_kind(&other)
    ))),
  }
}

fn to_host_vec<E: tch::kind::Element + Copy>(
  tensor: &Tensor,
  kind: Kind,
) -> Result<Vec<E>, TorchModelError> {
  let flat = tensor
    .to_device(Device::Cpu)
    .to_kind(kind)
    .contiguous()
    .view([-1]);
  Ok(Vec::<E>::try_from(&flat)?)
}

/// 将模型输出转换为候选框列表（未过滤，坐标为模型输入像素坐标）
pub(crate) fn parse_detections(output: IValue) -> Result<Vec<RawDetection>, TorchModelError> {
  let mut entries = locate_detections(output)?;
  let boxes = take_tensor(&mut entries, "boxes")?;
  let scores = take_tensor(&mut entries, "scores")?;
  let labels = take_tensor(&mut entries, "labels")?;

  let count = scores.size().first().copied().unwrap_or(0);
  if boxes.size() != [count, 4] || labels.size() != [count] {
    return Err(TorchModelError::ShapeMismatch(format!(
      "boxes {:?}, scores {:?}, labels {:?}",
      boxes.size(),
      scores.size(),
      labels.size()
    )));
  }

  let boxes: Vec<f32> = to_host_vec(&boxes, Kind::Float)?;
  let scores: Vec<f32> = to_host_vec(&scores, Kind::Float)?;
  let labels: Vec<i64> = to_host_vec(&labels, Kind::Int64)?;

  Ok(RawDetection::zip(&boxes, &scores, &labels))
}
