// 该文件是 DsFlow 项目的一部分。
// src/bin/ds_detect.rs - DeepStream 目标检测
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

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};

use dsflow::{
  output::DETECT_MOUNT_POINT,
  pipeline::detect_pipeline,
  settings::{DetectArgs, DevicePreference},
  task::{PlayTask, ServeTask, Task},
};

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = DetectArgs::parse();

  let device = args.stream.device(DevicePreference::Device);
  let source = args.stream.source(DevicePreference::Device)?;

  let labels = args.load_labels();
  let class_id = args.class_id(&labels);
  match class_id {
    Some(id) => {
      info!("目标对象 '{}' (类别编号: {})", args.detect_object, id);
      info!("类别过滤: 已开启，只显示 '{}'", args.detect_object);
    }
    None => {
      warn!("标签中找不到 '{}'", args.detect_object);
      warn!("类别过滤: 已关闭，显示全部检测结果");
    }
  }
  let config = args.prepare_config(class_id);

  let sink = args.stream.output_sink(true, false);
  let pipeline = detect_pipeline(&source, args.stream.resolution(), &config, sink);
  let serve = ServeTask::new(args.rtsp_output_port, DETECT_MOUNT_POINT);

  info!("DeepStream 目标检测管道");
  info!("  输入: {} ({})", device, source);
  info!("  目标对象: {}", args.detect_object);
  info!(
    "  模型引擎: {}",
    args
      .model_engine
      .as_ref()
      .map(|p| p.display().to_string())
      .unwrap_or_default()
  );
  info!("  模型配置: {}", config.display());
  info!("  分辨率: {}", args.stream.resolution());
  info!(
    "  本地显示: {}",
    if sink.has_display() { "开启" } else { "关闭" }
  );
  if sink.is_rtsp() {
    info!("  RTSP 流: {}", serve.stream_url());
  }
  info!("  管道: {}", pipeline);
  info!("  输出: {}", sink.to_pipeline());

  if sink.is_rtsp() {
    serve.run_task(&pipeline)?;
  } else {
    PlayTask::default()
      .with_max_duration(args.stream.max_duration())
      .run_task(&pipeline)?;
  }

  Ok(())
}
