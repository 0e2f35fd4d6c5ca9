// 该文件是 DsFlow 项目的一部分。
// src/bin/ds_scale.rs - DeepStream GPU 缩放
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
  output::SCALE_MOUNT_POINT,
  pipeline::scale_pipeline,
  settings::{DevicePreference, ScaleArgs},
  task::{PlayTask, ServeTask, Task},
};

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = ScaleArgs::parse();

  let device = args.stream.device(DevicePreference::RtspUrl);
  let source = args.stream.source(DevicePreference::RtspUrl)?;
  if source.is_test_pattern() {
    info!("未指定摄像头或视频流，使用测试图案");
  }

  let resolution = args.stream.resolution();
  let sink = args.stream.output_sink(false, true);
  let pipeline = scale_pipeline(&source, resolution, sink);
  let serve = ServeTask::new(args.rtsp_output_port, SCALE_MOUNT_POINT);

  info!("DeepStream GPU 缩放管道");
  info!("  输入: {} ({})", device, source);
  info!("  输出尺寸: {}", resolution);
  info!(
    "  本地显示: {}",
    if sink.has_display() { "开启" } else { "关闭" }
  );
  if sink.is_rtsp() {
    info!("  RTSP 流: {}", serve.stream_url());
  }
  info!("  管道: {}", pipeline);
  warn!("画面会被拉伸到 {}，需要保持比例请使用相同宽高比", resolution);

  if sink.is_rtsp() {
    serve.run_task(&pipeline)?;
  } else {
    PlayTask::default()
      .with_max_duration(args.stream.max_duration())
      .run_task(&pipeline)?;
  }

  Ok(())
}
