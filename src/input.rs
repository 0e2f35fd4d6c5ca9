// 该文件是 DsFlow 项目的一部分。
// src/input.rs - 视频输入源
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

//! # 视频输入源
//!
//! 根据设备字符串判断输入类型，并生成对应的 DeepStream 源元素：
//! - 网络流（`rtsp://`、`http://` 等）与 `file://` URI 使用 `nvurisrcbin`
//! - 本地视频文件（`.mp4`、`.avi`、`.mkv`）转换为 `file://` URI
//! - 已存在的 `/dev/video*` 设备使用 `v4l2src`
//! - 其余情况回退到 `videotestsrc` 测试图案
//!
//! ```
//! use dsflow::input::VideoSource;
//!
//! let source = VideoSource::from_device("rtsp://192.168.1.100:8554/stream").unwrap();
//! assert_eq!(
//!   source.to_pipeline(),
//!   "nvurisrcbin uri=rtsp://192.168.1.100:8554/stream"
//! );
//! ```

use std::{
  fmt,
  path::{Path, PathBuf},
};

use crate::FromUrl;

use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

/// 未指定输入时使用的设备名
pub const TEST_DEVICE: &str = "test";

const NETWORK_SCHEMES: [&str; 4] = ["rtsp", "rtsps", "http", "https"];
const VIDEO_FILE_EXTENSIONS: [&str; 3] = ["mp4", "avi", "mkv"];
const CAMERA_PREFIX: &str = "/dev/video";

#[derive(Error, Debug)]
pub enum InputError {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("无法将路径转换为 file URI: {0}")]
  InvalidPath(PathBuf),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
}

/// 管道的视频输入
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VideoSource {
  /// 网络流或显式给出的 URI
  Uri(Url),
  /// 本地视频文件（已转换为绝对路径的 file URI）
  File(Url),
  /// V4L2 摄像头
  Camera(PathBuf),
  /// 测试图案
  TestPattern,
}

impl VideoSource {
  /// 根据设备字符串识别输入源
  pub fn from_device(device: &str) -> Result<Self, InputError> {
    Self::classify(device, |path| path.exists())
  }

  fn classify(device: &str, exists: impl Fn(&Path) -> bool) -> Result<Self, InputError> {
    let device = device.trim();
    if device.is_empty() || device == TEST_DEVICE {
      return Ok(VideoSource::TestPattern);
    }

    if let Ok(url) = Url::parse(device) {
      if let Ok(source) = Self::from_url(&url) {
        return Ok(source);
      }
      debug!("'{}' 不是受支持的 URI，按本地路径处理", device);
    }

    let path = Path::new(device);
    if is_video_file(path) {
      let absolute = std::path::absolute(path)?;
      let url =
        Url::from_file_path(&absolute).map_err(|_| InputError::InvalidPath(absolute.clone()))?;
      return Ok(VideoSource::File(url));
    }

    if device.starts_with(CAMERA_PREFIX) && exists(path) {
      return Ok(VideoSource::Camera(path.to_path_buf()));
    }

    warn!("无法识别输入 '{}'，使用测试图案", device);
    Ok(VideoSource::TestPattern)
  }

  pub fn is_test_pattern(&self) -> bool {
    matches!(self, VideoSource::TestPattern)
  }

  /// 生成源元素的管道描述
  pub fn to_pipeline(&self) -> String {
    match self {
      VideoSource::Uri(url) | VideoSource::File(url) => format!("nvurisrcbin uri={}", url),
      VideoSource::Camera(device) => format!("v4l2src device={}", device.display()),
      VideoSource::TestPattern => "videotestsrc".to_string(),
    }
  }
}

impl FromUrl for VideoSource {
  type Error = InputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      scheme if NETWORK_SCHEMES.contains(&scheme) => Ok(VideoSource::Uri(url.clone())),
      "file" => Ok(VideoSource::File(url.clone())),
      "v4l2" => Ok(VideoSource::Camera(PathBuf::from(url.path()))),
      "test" => Ok(VideoSource::TestPattern),
      other => Err(InputError::SchemeMismatch(other.to_string())),
    }
  }
}

impl fmt::Display for VideoSource {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      VideoSource::Uri(url) => write!(f, "网络流 {}", url),
      VideoSource::File(url) => write!(f, "视频文件 {}", url),
      VideoSource::Camera(device) => write!(f, "摄像头 {}", device.display()),
      VideoSource::TestPattern => write!(f, "测试图案"),
    }
  }
}

fn is_video_file(path: &Path) -> bool {
  path
    .extension()
    .and_then(|ext| ext.to_str())
    .map(|ext| {
      VIDEO_FILE_EXTENSIONS
        .iter()
        .any(|known| ext.eq_ignore_ascii_case(known))
    })
    .unwrap_or(false)
}
