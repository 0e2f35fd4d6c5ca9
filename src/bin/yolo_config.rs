// 该文件是 DsFlow 项目的一部分。
// src/bin/yolo_config.rs - 生成 YOLO11 推理配置
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

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};

use dsflow::{
  model::{LabelTable, Precision, YoloConfigBuilder, YoloModel},
  settings::parse_threshold,
};

/// 为 YOLO11 模型生成 nvinfer 配置文件
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型名称，如 yolo11s
  #[arg(long, default_value = "yolo11s", value_name = "MODEL")]
  pub model: YoloModel,

  /// 只检测该对象，留空则检测全部类别
  #[arg(long, value_name = "NAME")]
  pub object: Option<String>,

  /// 直接指定要保留的类别编号
  #[arg(long, value_name = "ID", conflicts_with = "object")]
  pub class_id: Option<u32>,

  /// 模型、引擎与解析库所在目录
  #[arg(long, default_value = "/models", value_name = "DIR")]
  pub model_dir: PathBuf,

  /// 标签文件，默认为 <model-dir>/labels.txt
  #[arg(long, value_name = "FILE")]
  pub labels: Option<PathBuf>,

  /// 推理精度：fp32、fp16、int8
  #[arg(long, default_value = "fp32", value_name = "PRECISION")]
  pub precision: Precision,

  #[arg(long, default_value_t = 1, value_name = "SIZE")]
  pub batch_size: u32,

  #[arg(long, default_value_t = 0, value_name = "ID")]
  pub gpu_id: u32,

  /// 目标类别的 pre-cluster-threshold
  #[arg(long, default_value = "0.25", value_parser = parse_threshold, value_name = "THRESHOLD")]
  pub threshold: f32,

  /// TensorRT 引擎路径，默认为 <model-dir>/model_b<batch>_gpu<id>_<precision>.engine
  #[arg(long, value_name = "FILE")]
  pub engine: Option<PathBuf>,

  /// 输出路径，默认为 <model-dir>/config_infer_<model>.txt
  #[arg(long, value_name = "FILE")]
  pub output: Option<PathBuf>,

  /// 标签文件不存在时写入内置 COCO 标签
  #[arg(long)]
  pub write_labels: bool,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  let labels_path = args
    .labels
    .clone()
    .unwrap_or_else(|| args.model_dir.join("labels.txt"));
  let labels = if labels_path.exists() {
    LabelTable::from_file(&labels_path)?
  } else if args.write_labels {
    let coco = LabelTable::coco();
    coco.write_to(&labels_path)?;
    info!("已写入 COCO 标签: {}", labels_path.display());
    coco
  } else {
    warn!(
      "标签文件 {} 不存在，使用内置 COCO 标签",
      labels_path.display()
    );
    LabelTable::coco()
  };

  let mut builder = YoloConfigBuilder::new(args.model)
    .model_dir(&args.model_dir)
    .labels_path(&labels_path)
    .num_classes(labels.len())
    .precision(args.precision)
    .batch_size(args.batch_size)
    .gpu_id(args.gpu_id)
    .pre_cluster_threshold(args.threshold);
  if let Some(engine) = &args.engine {
    builder = builder.engine_path(engine);
  }
  if let Some(object) = &args.object {
    builder = builder.filter_object(object, &labels)?;
  } else if let Some(class_id) = args.class_id {
    builder = builder.filter_class(class_id);
  }
  let config = builder.build()?;

  let output = args
    .output
    .clone()
    .unwrap_or_else(|| args.model_dir.join(args.model.config_file_name()));
  config.save(&output)?;

  info!("模型: {}", args.model);
  info!("精度: {}", args.precision);
  if let Some(engine) = config.engine_file() {
    info!("引擎: {}", engine);
  }
  if let Some(class_id) = config.filtered_class() {
    info!(
      "类别过滤: {} (类别编号 {})",
      labels.name(class_id).unwrap_or("未知"),
      class_id
    );
  }
  info!("配置文件: {}", output.display());

  Ok(())
}
