// 该文件是 DsFlow 项目的一部分。
// src/model/yolo11.rs - YOLO11 推理配置生成
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 DsFlow Contributors

use std::{
  fmt,
  path::{Path, PathBuf},
  str::FromStr,
};

use thiserror::Error;
use tracing::info;

use super::{
  LabelError, LabelTable,
  infer_config::{
    DEFAULT_CLASS_THRESHOLD, InferConfig, InferConfigError, PROPERTY_SECTION, validate_threshold,
  },
};

const PARSER_LIBRARY: &str = "nvdsinfer_custom_impl_Yolo/libnvdsinfer_custom_impl_Yolo.so";

#[derive(Error, Debug)]
pub enum YoloConfigError {
  #[error("未知的 YOLO11 模型: {0}")]
  UnknownModel(String),
  #[error("未知的精度: {0}（可选 fp32、fp16、int8）")]
  UnknownPrecision(String),
  #[error("标签表中没有对象 '{0}'")]
  UnknownObject(String),
  #[error("batch-size 必须大于 0")]
  InvalidBatchSize,
  #[error("标签错误: {0}")]
  LabelError(#[from] LabelError),
  #[error("配置错误: {0}")]
  InferConfigError(#[from] InferConfigError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum YoloSize {
  Nano,
  Small,
  Medium,
  Large,
  ExtraLarge,
}

impl YoloSize {
  fn suffix(&self) -> char {
    match self {
      YoloSize::Nano => 'n',
      YoloSize::Small => 's',
      YoloSize::Medium => 'm',
      YoloSize::Large => 'l',
      YoloSize::ExtraLarge => 'x',
    }
  }
}

/// YOLO11 检查点，如 `yolo11s`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct YoloModel {
  pub size: YoloSize,
}

impl YoloModel {
  pub fn name(&self) -> String {
    format!("yolo11{}", self.size.suffix())
  }

  /// Ultralytics 导出的 ONNX 文件名
  pub fn onnx_file_name(&self) -> String {
    format!("{}.pt.onnx", self.name())
  }

  pub fn config_file_name(&self) -> String {
    format!("config_infer_{}.txt", self.name())
  }
}

impl FromStr for YoloModel {
  type Err = YoloConfigError;

  /// 接受 `yolo11s`、`yolo11s.pt`、`/models/yolo11s.pt.onnx` 等写法
  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let file_name = Path::new(s.trim())
      .file_name()
      .and_then(|n| n.to_str())
      .unwrap_or_default()
      .to_ascii_lowercase();
    let stem = file_name.trim_end_matches(".onnx").trim_end_matches(".pt");

    let size = match stem.strip_prefix("yolo11") {
      Some("n") => YoloSize::Nano,
      Some("s") => YoloSize::Small,
      Some("m") => YoloSize::Medium,
      Some("l") => YoloSize::Large,
      Some("x") => YoloSize::ExtraLarge,
      _ => return Err(YoloConfigError::UnknownModel(s.to_string())),
    };
    Ok(YoloModel { size })
  }
}

impl fmt::Display for YoloModel {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.name())
  }
}

/// TensorRT 推理精度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Precision {
  #[default]
  Fp32,
  Int8,
  Fp16,
}

impl Precision {
  /// nvinfer 的 `network-mode`
  pub fn network_mode(&self) -> u32 {
    match self {
      Precision::Fp32 => 0,
      Precision::Int8 => 1,
      Precision::Fp16 => 2,
    }
  }
}

impl FromStr for Precision {
  type Err = YoloConfigError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_ascii_lowercase().as_str() {
      "fp32" => Ok(Precision::Fp32),
      "fp16" => Ok(Precision::Fp16),
      "int8" => Ok(Precision::Int8),
      _ => Err(YoloConfigError::UnknownPrecision(s.to_string())),
    }
  }
}

impl fmt::Display for Precision {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Precision::Fp32 => write!(f, "fp32"),
      Precision::Int8 => write!(f, "int8"),
      Precision::Fp16 => write!(f, "fp16"),
    }
  }
}

/// 生成 DeepStream-Yolo 解析库使用的 nvinfer 配置
///
/// ```
/// use dsflow::model::{LabelTable, YoloConfigBuilder, YoloModel};
///
/// let config = YoloConfigBuilder::new("yolo11s".parse::<YoloModel>().unwrap())
///   .model_dir("/models")
///   .filter_object("car", &LabelTable::coco())
///   .unwrap()
///   .build()
///   .unwrap();
/// assert_eq!(config.get("property", "onnx-file"), Some("/models/yolo11s.pt.onnx"));
/// assert_eq!(config.filtered_class(), Some(2));
/// ```
#[derive(Debug, Clone)]
pub struct YoloConfigBuilder {
  model: YoloModel,
  model_dir: PathBuf,
  labels_path: Option<PathBuf>,
  engine_path: Option<PathBuf>,
  num_classes: usize,
  precision: Precision,
  batch_size: u32,
  gpu_id: u32,
  nms_iou_threshold: f32,
  pre_cluster_threshold: f32,
  topk: u32,
  target_class: Option<u32>,
}

impl YoloConfigBuilder {
  pub fn new(model: YoloModel) -> Self {
    YoloConfigBuilder {
      model,
      model_dir: PathBuf::from("/models"),
      labels_path: None,
      engine_path: None,
      num_classes: 80,
      precision: Precision::default(),
      batch_size: 1,
      gpu_id: 0,
      nms_iou_threshold: 0.45,
      pre_cluster_threshold: DEFAULT_CLASS_THRESHOLD,
      topk: 300,
      target_class: None,
    }
  }

  pub fn model_dir(mut self, dir: impl Into<PathBuf>) -> Self {
    self.model_dir = dir.into();
    self
  }

  pub fn labels_path(mut self, path: impl Into<PathBuf>) -> Self {
    self.labels_path = Some(path.into());
    self
  }

  pub fn engine_path(mut self, path: impl Into<PathBuf>) -> Self {
    self.engine_path = Some(path.into());
    self
  }

  pub fn num_classes(mut self, num_classes: usize) -> Self {
    self.num_classes = num_classes;
    self
  }

  pub fn precision(mut self, precision: Precision) -> Self {
    self.precision = precision;
    self
  }

  pub fn batch_size(mut self, batch_size: u32) -> Self {
    self.batch_size = batch_size;
    self
  }

  pub fn gpu_id(mut self, gpu_id: u32) -> Self {
    self.gpu_id = gpu_id;
    self
  }

  pub fn pre_cluster_threshold(mut self, threshold: f32) -> Self {
    self.pre_cluster_threshold = threshold;
    self
  }

  pub fn filter_class(mut self, class_id: u32) -> Self {
    self.target_class = Some(class_id);
    self
  }

  /// 按名称过滤，同时以标签表长度作为类别数
  pub fn filter_object(mut self, object: &str, labels: &LabelTable) -> Result<Self, YoloConfigError> {
    let class_id = labels
      .class_id(object)
      .ok_or_else(|| YoloConfigError::UnknownObject(object.to_string()))?;
    info!("对象 '{}' 的类别编号为 {}", object, class_id);
    self.num_classes = labels.len();
    self.target_class = Some(class_id);
    Ok(self)
  }

  fn default_engine_path(&self) -> PathBuf {
    self.model_dir.join(format!(
      "model_b{}_gpu{}_{}.engine",
      self.batch_size, self.gpu_id, self.precision
    ))
  }

  pub fn build(self) -> Result<InferConfig, YoloConfigError> {
    if self.batch_size == 0 {
      return Err(YoloConfigError::InvalidBatchSize);
    }
    validate_threshold(self.pre_cluster_threshold)?;

    let onnx = self.model_dir.join(self.model.onnx_file_name());
    let engine = self
      .engine_path
      .clone()
      .unwrap_or_else(|| self.default_engine_path());
    let labels = self
      .labels_path
      .clone()
      .unwrap_or_else(|| self.model_dir.join("labels.txt"));
    let parser = self.model_dir.join(PARSER_LIBRARY);

    let text = format!(
      "[property]
gpu-id={gpu}
net-scale-factor=0.0039215697906911373
model-color-format=0
onnx-file={onnx}
model-engine-file={engine}
#int8-calib-file=calib.table
labelfile-path={labels}
batch-size={batch}
network-mode={mode}
num-detected-classes={classes}
interval=0
gie-unique-id=1
process-mode=1
network-type=0
cluster-mode=2
maintain-aspect-ratio=1
symmetric-padding=1
#workspace-size=2000
parse-bbox-func-name=NvDsInferParseYolo
#parse-bbox-func-name=NvDsInferParseYoloCuda
custom-lib-path={parser}
engine-create-func-name=NvDsInferYoloCudaEngineGet

[class-attrs-all]
nms-iou-threshold={nms:?}
pre-cluster-threshold={threshold:?}
topk={topk}
",
      gpu = self.gpu_id,
      onnx = onnx.display(),
      engine = engine.display(),
      labels = labels.display(),
      batch = self.batch_size,
      mode = self.precision.network_mode(),
      classes = self.num_classes,
      parser = parser.display(),
      nms = self.nms_iou_threshold,
      threshold = self.pre_cluster_threshold,
      topk = self.topk,
    );

    let mut config = InferConfig::parse(&text);
    if self.precision == Precision::Int8 {
      config.set(
        PROPERTY_SECTION,
        "int8-calib-file",
        self.model_dir.join("calib.table").display().to_string(),
      );
    }
    if let Some(class_id) = self.target_class {
      config.filter_to_class(class_id, self.pre_cluster_threshold)?;
    }
    Ok(config)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn model_names() {
    for input in ["yolo11s", "YOLO11S", "yolo11s.pt", "/models/yolo11s.pt.onnx"] {
      let model: YoloModel = input.parse().unwrap();
      assert_eq!(model.size, YoloSize::Small, "{}", input);
    }
    let nano: YoloModel = "yolo11n".parse().unwrap();
    assert_eq!(nano.onnx_file_name(), "yolo11n.pt.onnx");
    assert_eq!(nano.config_file_name(), "config_infer_yolo11n.txt");

    for bad in ["yolov8s", "yolo11", "yolo11q", ""] {
      assert!(bad.parse::<YoloModel>().is_err(), "{}", bad);
    }
  }

  #[test]
  fn precision_modes() {
    assert_eq!("FP16".parse::<Precision>().unwrap(), Precision::Fp16);
    assert_eq!(Precision::Fp32.network_mode(), 0);
    assert_eq!(Precision::Int8.network_mode(), 1);
    assert_eq!(Precision::Fp16.network_mode(), 2);
    assert!("bf16".parse::<Precision>().is_err());
  }

  #[test]
  fn default_template() {
    let config = YoloConfigBuilder::new("yolo11n".parse().unwrap())
      .build()
      .unwrap();
    assert_eq!(config.get("property", "onnx-file"), Some("/models/yolo11n.pt.onnx"));
    assert_eq!(
      config.engine_file(),
      Some("/models/model_b1_gpu0_fp32.engine")
    );
    assert_eq!(config.get("property", "labelfile-path"), Some("/models/labels.txt"));
    assert_eq!(config.get("property", "num-detected-classes"), Some("80"));
    assert_eq!(config.get("property", "network-mode"), Some("0"));
    assert_eq!(
      config.get("property", "custom-lib-path"),
      Some("/models/nvdsinfer_custom_impl_Yolo/libnvdsinfer_custom_impl_Yolo.so")
    );
    assert_eq!(config.get("class-attrs-all", "nms-iou-threshold"), Some("0.45"));
    assert_eq!(config.get("class-attrs-all", "pre-cluster-threshold"), Some("0.25"));
    assert_eq!(config.get("class-attrs-all", "topk"), Some("300"));
    assert_eq!(config.filtered_class(), None);
    assert!(config.to_string().contains("#int8-calib-file=calib.table\n"));
  }

  #[test]
  fn precision_and_batch_affect_engine() {
    let config = YoloConfigBuilder::new("yolo11m".parse().unwrap())
      .model_dir("/opt/models")
      .precision(Precision::Int8)
      .batch_size(4)
      .gpu_id(1)
      .build()
      .unwrap();
    assert_eq!(
      config.engine_file(),
      Some("/opt/models/model_b4_gpu1_int8.engine")
    );
    assert_eq!(config.get("property", "network-mode"), Some("1"));
    assert_eq!(
      config.get("property", "int8-calib-file"),
      Some("/opt/models/calib.table")
    );

    let err = YoloConfigBuilder::new("yolo11m".parse().unwrap())
      .batch_size(0)
      .build()
      .unwrap_err();
    assert!(matches!(err, YoloConfigError::InvalidBatchSize));
  }

  #[test]
  fn object_filter() {
    let labels = LabelTable::parse("person\nbicycle\ncar\n");
    let config = YoloConfigBuilder::new("yolo11s".parse().unwrap())
      .filter_object("car", &labels)
      .unwrap()
      .build()
      .unwrap();
    assert_eq!(config.get("property", "num-detected-classes"), Some("3"));
    assert_eq!(config.filtered_class(), Some(2));
    assert_eq!(config.get("class-attrs-2", "topk"), Some("300"));
    assert_eq!(config.get("class-attrs-all", "pre-cluster-threshold"), Some("1.0"));

    let err = YoloConfigBuilder::new("yolo11s".parse().unwrap())
      .filter_object("unicorn", &labels)
      .unwrap_err();
    assert!(matches!(err, YoloConfigError::UnknownObject(o) if o == "unicorn"));
  }

  #[test]
  fn class_id_and_engine_overrides() {
    let config = YoloConfigBuilder::new("yolo11x".parse().unwrap())
      .engine_path("/engines/yolo11x_fp16.engine")
      .filter_class(5)
      .pre_cluster_threshold(0.4)
      .build()
      .unwrap();
    assert_eq!(config.engine_file(), Some("/engines/yolo11x_fp16.engine"));
    assert_eq!(config.filtered_class(), Some(5));
    assert_eq!(config.get("class-attrs-5", "pre-cluster-threshold"), Some("0.4"));
  }

  #[test]
  fn threshold_out_of_range() {
    for bad in [f32::NAN, 1.0, -0.5] {
      let err = YoloConfigBuilder::new("yolo11s".parse().unwrap())
        .pre_cluster_threshold(bad)
        .build()
        .unwrap_err();
      assert!(
        matches!(
          err,
          YoloConfigError::InferConfigError(InferConfigError::InvalidThreshold(_))
        ),
        "{}",
        bad
      );
    }
  }
}
