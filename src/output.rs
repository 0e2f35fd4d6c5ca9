// 该文件是 DsFlow 项目的一部分。
// src/output.rs - 输出定义
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

use std::{fmt, str::FromStr};

use thiserror::Error;

#[cfg(feature = "gstreamer_rtsp")]
pub mod rtsp_server;
#[cfg(feature = "gstreamer_rtsp")]
pub use self::rtsp_server::{RtspServer, RtspServerError};

/// OSD 之后保持 NVMM 内存的 I420 转换
const NVMM_I420: &str = "nvvideoconvert ! video/x-raw(memory:NVMM),format=I420";

pub const DEFAULT_BITRATE: u32 = 4_000_000;

pub const DETECT_MOUNT_POINT: &str = "/ds-detect";
pub const SCALE_MOUNT_POINT: &str = "/ds-scale";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum OutputError {
  #[error("未知的显示输出: {0}")]
  UnknownDisplaySink(String),
}

/// 硬件 H.264 编码与 RTP 打包
///
/// RTSP 服务器按 `pay0` 查找负载元素，名称不能改。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct H264Encoder {
  pub bitrate: u32,
}

impl Default for H264Encoder {
  fn default() -> Self {
    H264Encoder {
      bitrate: DEFAULT_BITRATE,
    }
  }
}

impl H264Encoder {
  pub fn with_bitrate(bitrate: u32) -> Self {
    H264Encoder { bitrate }
  }

  pub fn to_pipeline(&self) -> String {
    format!(
      "nvv4l2h264enc bitrate={} insert-sps-pps=true ! h264parse ! rtph264pay name=pay0 pt=96",
      self.bitrate
    )
  }
}

/// 本地显示输出
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DisplaySink {
  /// X11 显示，需要先从 GPU 内存转换
  #[default]
  XImage,
  /// EGL 显示，可直接接收 NVMM 缓冲
  EglGles,
}

impl DisplaySink {
  pub fn to_pipeline(&self) -> String {
    match self {
      DisplaySink::XImage => "nvvideoconvert ! ximagesink sync=false".to_string(),
      DisplaySink::EglGles => "nvvideoconvert ! nveglglessink".to_string(),
    }
  }
}

impl FromStr for DisplaySink {
  type Err = OutputError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_ascii_lowercase().as_str() {
      "ximage" | "ximagesink" | "x11" => Ok(DisplaySink::XImage),
      "egl" | "eglgles" | "nveglglessink" => Ok(DisplaySink::EglGles),
      _ => Err(OutputError::UnknownDisplaySink(s.to_string())),
    }
  }
}

impl fmt::Display for DisplaySink {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      DisplaySink::XImage => write!(f, "ximage"),
      DisplaySink::EglGles => write!(f, "egl"),
    }
  }
}

/// 管道末端的输出
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputSink {
  Rtsp(H264Encoder),
  /// 通过 tee 同时推流与本地显示
  RtspWithDisplay(H264Encoder, DisplaySink),
  Display(DisplaySink),
  Fake { sync: bool },
}

impl OutputSink {
  /// 按配置选择输出
  ///
  /// RTSP 优先；只有 `allow_tee` 时才会同时保留本地显示。
  pub fn select(
    rtsp: Option<H264Encoder>,
    display: Option<DisplaySink>,
    allow_tee: bool,
    fake_sync: bool,
  ) -> Self {
    match (rtsp, display) {
      (Some(encoder), Some(display)) if allow_tee => OutputSink::RtspWithDisplay(encoder, display),
      (Some(encoder), _) => OutputSink::Rtsp(encoder),
      (None, Some(display)) => OutputSink::Display(display),
      (None, None) => OutputSink::Fake { sync: fake_sync },
    }
  }

  pub fn is_rtsp(&self) -> bool {
    matches!(self, OutputSink::Rtsp(_) | OutputSink::RtspWithDisplay(..))
  }

  pub fn has_display(&self) -> bool {
    matches!(self, OutputSink::Display(_) | OutputSink::RtspWithDisplay(..))
  }

  pub fn to_pipeline(&self) -> String {
    match self {
      OutputSink::Rtsp(encoder) => format!("{} ! {}", NVMM_I420, encoder.to_pipeline()),
      OutputSink::RtspWithDisplay(encoder, display) => format!(
        "{} ! tee name=t t. ! queue ! {} t. ! queue ! {}",
        NVMM_I420,
        encoder.to_pipeline(),
        display.to_pipeline()
      ),
      OutputSink::Display(display) => display.to_pipeline(),
      OutputSink::Fake { sync: true } => "fakesink".to_string(),
      OutputSink::Fake { sync: false } => "fakesink sync=false".to_string(),
    }
  }
}
