// 该文件是 DsFlow 项目的一部分。
// src/settings.rs - 命令行与环境变量配置
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

//! # 配置
//!
//! 每个选项都可以通过命令行或同名环境变量给出，命令行优先。
//! 环境变量沿用容器启动脚本中的名字（`RTSP_URL`、`OUTPUT_WIDTH` 等）。

use std::path::{Path, PathBuf};

use clap::{ArgAction, Args, Parser};
use thiserror::Error;
use tracing::{info, warn};

use crate::{
  input::{InputError, TEST_DEVICE, VideoSource},
  model::{InferConfig, InferConfigError, LabelTable, validate_threshold},
  output::{DEFAULT_BITRATE, DisplaySink, H264Encoder, OutputSink},
  pipeline::Resolution,
};

pub const DEFAULT_MODEL_CONFIG: &str =
  "/opt/nvidia/deepstream/deepstream/samples/configs/deepstream-app/config_infer_primary.txt";
pub const DEFAULT_LABELS_FILE: &str = "/models/labels.txt";
pub const DEFAULT_FILTERED_CONFIG: &str = "/tmp/config_infer_filtered.txt";
pub const DEFAULT_DETECT_PORT: u16 = 8555;
pub const DEFAULT_SCALE_PORT: u16 = 8557;

#[derive(Error, Debug)]
pub enum SettingsError {
  #[error("输入错误: {0}")]
  InputError(#[from] InputError),
  #[error("配置错误: {0}")]
  InferConfigError(#[from] InferConfigError),
}

/// 只有 `true`（不区分大小写）表示开启
fn parse_switch(value: &str) -> Result<bool, String> {
  Ok(value.trim().eq_ignore_ascii_case("true"))
}

/// 目标类别阈值，需在 [0.0, 1.0) 之间
pub fn parse_threshold(value: &str) -> Result<f32, String> {
  let threshold: f32 = value.trim().parse().map_err(|e| format!("{}", e))?;
  validate_threshold(threshold).map_err(|e| e.to_string())
}

fn non_empty(value: &Option<String>) -> Option<&str> {
  value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// 两个环境变量都能指定输入，哪个优先取决于程序
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DevicePreference {
  /// `GST_DEVICE` 优先
  Device,
  /// `RTSP_URL` 优先
  RtspUrl,
}

/// 检测与缩放共用的输入输出选项
#[derive(Args, Debug, Clone)]
pub struct StreamArgs {
  /// 输入设备：RTSP/HTTP 地址、视频文件、/dev/videoN 或 test
  #[arg(long, env = "GST_DEVICE", value_name = "SOURCE")]
  pub device: Option<String>,

  /// 输入的网络流地址
  #[arg(long, env = "RTSP_URL", value_name = "URL")]
  pub rtsp_url: Option<String>,

  /// 是否在本地显示（仅 true 开启）
  #[arg(long, env = "SHOW_DISPLAY", default_value = "true", value_parser = parse_switch, action = ArgAction::Set, value_name = "BOOL")]
  pub show_display: bool,

  /// 本地显示使用的 sink：ximage 或 egl
  #[arg(long, env = "DISPLAY_SINK", default_value = "ximage", value_name = "SINK")]
  pub display_sink: DisplaySink,

  /// 开启 RTSP 输出（设置了即开启）
  #[arg(long, env = "RTSP_OUTPUT", num_args = 0..=1, default_missing_value = "1", value_name = "VALUE")]
  pub rtsp_output: Option<String>,

  /// 输出宽度
  #[arg(long, env = "OUTPUT_WIDTH", default_value_t = 1920, value_name = "PIXELS")]
  pub output_width: u32,

  /// 输出高度
  #[arg(long, env = "OUTPUT_HEIGHT", default_value_t = 1080, value_name = "PIXELS")]
  pub output_height: u32,

  /// H.264 编码码率
  #[arg(long, env = "RTSP_BITRATE", default_value_t = DEFAULT_BITRATE, value_name = "BPS")]
  pub bitrate: u32,

  /// 本地播放的最长时间（秒）
  #[arg(long, env = "MAX_DURATION", value_name = "SECONDS")]
  pub max_duration: Option<u64>,
}

impl StreamArgs {
  pub fn device(&self, preference: DevicePreference) -> String {
    let device = non_empty(&self.device);
    let rtsp_url = non_empty(&self.rtsp_url);
    let chosen = match preference {
      DevicePreference::Device => device.or(rtsp_url),
      DevicePreference::RtspUrl => rtsp_url.or(device),
    };
    chosen.unwrap_or(TEST_DEVICE).to_string()
  }

  pub fn source(&self, preference: DevicePreference) -> Result<VideoSource, SettingsError> {
    Ok(VideoSource::from_device(&self.device(preference))?)
  }

  pub fn rtsp_enabled(&self) -> bool {
    self.rtsp_output.is_some()
  }

  pub fn resolution(&self) -> Resolution {
    Resolution::new(self.output_width, self.output_height)
  }

  pub fn output_sink(&self, allow_tee: bool, fake_sync: bool) -> OutputSink {
    OutputSink::select(
      self
        .rtsp_enabled()
        .then(|| H264Encoder::with_bitrate(self.bitrate)),
      self.show_display.then_some(self.display_sink),
      allow_tee,
      fake_sync,
    )
  }

  pub fn max_duration(&self) -> Option<std::time::Duration> {
    self.max_duration.map(std::time::Duration::from_secs)
  }
}

/// DeepStream 目标检测
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct DetectArgs {
  #[command(flatten)]
  pub stream: StreamArgs,

  /// 要检测的对象名称
  #[arg(long, env = "DETECT_OBJECT", default_value = "person", value_name = "NAME")]
  pub detect_object: String,

  /// 直接指定类别编号，优先于按名称查找
  #[arg(long, env = "FILTER_CLASS_ID", value_name = "ID")]
  pub filter_class_id: Option<String>,

  /// 标签文件，每行一个类别
  #[arg(long, env = "LABELS_FILE", default_value = DEFAULT_LABELS_FILE, value_name = "FILE")]
  pub labels: PathBuf,

  /// nvinfer 配置文件
  #[arg(long, env = "MODEL_CONFIG", default_value = DEFAULT_MODEL_CONFIG, value_name = "FILE")]
  pub model_config: PathBuf,

  /// TensorRT 引擎文件，替换配置中的 model-engine-file
  #[arg(long, env = "MODEL_ENGINE", value_name = "FILE")]
  pub model_engine: Option<PathBuf>,

  /// 引擎所在目录，保留配置中的引擎文件名
  #[arg(long, env = "MODEL_ENGINE_DIR", value_name = "DIR")]
  pub engine_dir: Option<PathBuf>,

  /// 生成的过滤配置的写入位置
  #[arg(long, env = "FILTERED_CONFIG", default_value = DEFAULT_FILTERED_CONFIG, value_name = "FILE")]
  pub filtered_config: PathBuf,

  /// 目标类别的 pre-cluster-threshold
  #[arg(long, env = "CLASS_THRESHOLD", default_value = "0.25", value_parser = parse_threshold, value_name = "THRESHOLD")]
  pub class_threshold: f32,

  /// RTSP 输出端口
  #[arg(long, env = "RTSP_OUTPUT_PORT", default_value_t = DEFAULT_DETECT_PORT, value_name = "PORT")]
  pub rtsp_output_port: u16,
}

impl DetectArgs {
  /// 读取标签文件，失败时使用内置的 COCO 标签
  pub fn load_labels(&self) -> LabelTable {
    match LabelTable::from_file(&self.labels) {
      Ok(table) => table,
      Err(e) => {
        warn!(
          "无法读取标签文件 {}: {}，使用内置 COCO 标签",
          self.labels.display(),
          e
        );
        LabelTable::coco()
      }
    }
  }

  /// `FILTER_CLASS_ID` 可解析时优先，否则按对象名称查找
  pub fn class_id(&self, labels: &LabelTable) -> Option<u32> {
    let explicit = non_empty(&self.filter_class_id).and_then(|v| match v.parse::<u32>() {
      Ok(id) => Some(id),
      Err(e) => {
        warn!("忽略无效的 FILTER_CLASS_ID '{}': {}", v, e);
        None
      }
    });
    if let Some(id) = explicit {
      if let Some(name) = labels.name(id) {
        info!("使用指定的类别编号 {} ({})", id, name);
      } else {
        warn!("类别编号 {} 超出标签表范围 ({} 类)", id, labels.len());
      }
      return Some(id);
    }
    labels.class_id(&self.detect_object)
  }

  fn model_engine(&self) -> Option<&Path> {
    self
      .model_engine
      .as_deref()
      .filter(|p| !p.as_os_str().is_empty())
  }

  fn needs_derived_config(&self, class_id: Option<u32>) -> bool {
    class_id.is_some() || self.model_engine().is_some() || self.engine_dir.is_some()
  }

  /// 写出派生配置并返回其路径
  pub fn write_derived_config(&self, class_id: Option<u32>) -> Result<PathBuf, SettingsError> {
    let mut config = InferConfig::from_file(&self.model_config)?;

    // 派生配置写在别处，相对路径要按原配置所在目录展开
    let base_dir = match self.model_config.parent() {
      Some(parent) if !parent.as_os_str().is_empty() => parent,
      _ => Path::new("."),
    };
    let base_dir = std::path::absolute(base_dir).map_err(InferConfigError::from)?;
    config.absolutize_paths(base_dir);
    if let Some(dir) = &self.engine_dir
      && !config.rewrite_engine_dir(dir)?
    {
      warn!("配置中没有 model-engine-file，忽略引擎目录 {}", dir.display());
    }
    if let Some(engine) = self.model_engine() {
      config.set_engine_file(engine)?;
    }
    if let Some(class_id) = class_id {
      config.filter_to_class(class_id, self.class_threshold)?;
    }

    config.save(&self.filtered_config)?;
    Ok(self.filtered_config.clone())
  }

  /// 需要时生成派生配置；生成失败则退回原始配置
  pub fn prepare_config(&self, class_id: Option<u32>) -> PathBuf {
    if !self.needs_derived_config(class_id) {
      return self.model_config.clone();
    }
    match self.write_derived_config(class_id) {
      Ok(path) => {
        info!("已生成过滤配置: {}", path.display());
        path
      }
      Err(e) => {
        warn!("生成过滤配置失败: {}，使用原始配置", e);
        self.model_config.clone()
      }
    }
  }
}

/// DeepStream GPU 缩放
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct ScaleArgs {
  #[command(flatten)]
  pub stream: StreamArgs,

  /// RTSP 输出端口
  #[arg(long, env = "RTSP_OUTPUT_PORT", default_value_t = DEFAULT_SCALE_PORT, value_name = "PORT")]
  pub rtsp_output_port: u16,
}

#[cfg(test)]
mod tests {
  use super::*;

  fn detect(args: &[&str]) -> DetectArgs {
    DetectArgs::try_parse_from(std::iter::once("ds-detect").chain(args.iter().copied())).unwrap()
  }

  fn scale(args: &[&str]) -> ScaleArgs {
    ScaleArgs::try_parse_from(std::iter::once("ds-scale").chain(args.iter().copied())).unwrap()
  }

  #[test]
  fn device_preference() {
    let args = detect(&["--device", "/dev/video0", "--rtsp-url", "rtsp://cam/live"]);
    assert_eq!(args.stream.device(DevicePreference::Device), "/dev/video0");
    assert_eq!(args.stream.device(DevicePreference::RtspUrl), "rtsp://cam/live");

    let only_url = scale(&["--rtsp-url", "rtsp://cam/live"]);
    assert_eq!(only_url.stream.device(DevicePreference::Device), "rtsp://cam/live");

    let blank = scale(&["--device", "  "]);
    assert_eq!(blank.stream.device(DevicePreference::RtspUrl), "test");
  }

  #[test]
  fn switches() {
    assert!(!detect(&["--show-display", "false"]).stream.show_display);
    assert!(!detect(&["--show-display", "yes"]).stream.show_display);
    assert!(detect(&["--show-display", "TRUE"]).stream.show_display);

    let rtsp = detect(&["--rtsp-output"]);
    assert!(rtsp.stream.rtsp_enabled());
    let rtsp = detect(&["--rtsp-output", "anything"]);
    assert!(rtsp.stream.rtsp_enabled());
  }

  #[test]
  fn sink_selection_differs_between_programs() {
    let detect_args = detect(&["--rtsp-output", "--show-display", "true"]);
    assert!(matches!(
      detect_args.stream.output_sink(true, false),
      OutputSink::RtspWithDisplay(..)
    ));
    let scale_args = scale(&["--rtsp-output", "--bitrate", "1000000"]);
    assert_eq!(
      scale_args.stream.output_sink(false, true),
      OutputSink::Rtsp(H264Encoder::with_bitrate(1_000_000))
    );
    let headless = scale(&["--show-display", "false"]);
    assert_eq!(
      headless.stream.output_sink(false, true),
      OutputSink::Fake { sync: true }
    );
  }

  #[test]
  fn class_id_resolution() {
    let labels = LabelTable::coco();
    assert_eq!(detect(&[]).class_id(&labels), Some(0));
    assert_eq!(detect(&["--detect-object", "dog"]).class_id(&labels), Some(16));
    assert_eq!(detect(&["--detect-object", "unicorn"]).class_id(&labels), None);
    assert_eq!(
      detect(&["--detect-object", "dog", "--filter-class-id", "2"]).class_id(&labels),
      Some(2)
    );
    assert_eq!(
      detect(&["--detect-object", "dog", "--filter-class-id", "two"]).class_id(&labels),
      Some(16)
    );
  }

  #[test]
  fn class_threshold_range() {
    assert_eq!(detect(&[]).class_threshold, 0.25);
    assert_eq!(detect(&["--class-threshold", "0.6"]).class_threshold, 0.6);
    for bad in ["NaN", "inf", "1.0", "1.5", "-0.1", "high"] {
      let parsed = DetectArgs::try_parse_from(["ds-detect", "--class-threshold", bad]);
      assert!(parsed.is_err(), "{}", bad);
    }
  }

  #[test]
  fn untouched_config_is_used_directly() {
    let args = detect(&["--model-config", "/models/config_infer_yolo11s.txt"]);
    assert_eq!(
      args.prepare_config(None),
      PathBuf::from("/models/config_infer_yolo11s.txt")
    );
  }

  #[test]
  fn missing_base_config_falls_back() {
    let dir = tempfile::tempdir().unwrap();
    let filtered = dir.path().join("filtered.txt");
    let args = detect(&[
      "--model-config",
      "/nonexistent/config.txt",
      "--filtered-config",
      filtered.to_str().unwrap(),
    ]);
    assert_eq!(args.prepare_config(Some(0)), PathBuf::from("/nonexistent/config.txt"));
    assert!(!filtered.exists());
  }
}
