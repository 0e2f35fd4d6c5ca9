// 该文件是 DsFlow 项目的一部分。
// src/pipeline.rs - DeepStream 管道描述
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

//! # DeepStream 管道
//!
//! 管道以 `gst-launch` 语法的字符串表示，由 GStreamer 解析。
//! 从 `nvvideoconvert` 开始，帧一直保存在 GPU 内存（NVMM）中。
//!
//! 检测管道：
//! ```text
//! 源 ! nvvideoconvert ! nvstreammux ! nvinfer ! nvdsosd ! 输出
//! ```
//!
//! 缩放管道：
//! ```text
//! 源 ! nvvideoconvert ! video/x-raw(memory:NVMM),width=W,height=H ! 输出
//! ```

use std::{
  fmt,
  path::{Path, PathBuf},
};

use crate::{input::VideoSource, output::OutputSink};

/// `nvvideoconvert` 的插值算法
pub const INTERPOLATION_METHOD: u32 = 5;

/// 测试源默认使用 SMPTE 彩条
pub const SMPTE_PATTERN: u32 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
  pub width: u32,
  pub height: u32,
}

impl Resolution {
  pub fn new(width: u32, height: u32) -> Self {
    Resolution { width, height }
  }
}

impl Default for Resolution {
  fn default() -> Self {
    Resolution::new(1920, 1080)
  }
}

impl fmt::Display for Resolution {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}x{}", self.width, self.height)
  }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PipelineItem {
  Source(VideoSource),
  TestSource {
    pattern: Option<u32>,
  },
  Convert {
    interpolation: Option<u32>,
  },
  /// 系统内存中的原始视频 caps
  RawCaps(Resolution),
  /// GPU 内存中的视频 caps
  NvmmCaps(Option<Resolution>),
  StreamMux {
    resolution: Resolution,
    batch_size: u32,
  },
  Infer {
    config: PathBuf,
  },
  Osd,
  Sink(OutputSink),
}

impl PipelineItem {
  fn to_pipeline(&self) -> String {
    match self {
      PipelineItem::Source(source) => source.to_pipeline(),
      PipelineItem::TestSource { pattern } => match pattern {
        Some(pattern) => format!("videotestsrc pattern={}", pattern),
        None => "videotestsrc".to_string(),
      },
      PipelineItem::Convert { interpolation } => match interpolation {
        Some(method) => format!("nvvideoconvert interpolation-method={}", method),
        None => "nvvideoconvert".to_string(),
      },
      PipelineItem::RawCaps(res) => {
        format!("video/x-raw,width={},height={}", res.width, res.height)
      }
      PipelineItem::NvmmCaps(res) => match res {
        Some(res) => format!(
          "video/x-raw(memory:NVMM),width={},height={}",
          res.width, res.height
        ),
        None => "video/x-raw(memory:NVMM)".to_string(),
      },
      // 由前一个元素连接到 nvstreammux 的 sink_0 请求垫
      PipelineItem::StreamMux {
        resolution,
        batch_size,
      } => format!(
        "m.sink_0 nvstreammux name=m width={} height={} batch-size={}",
        resolution.width, resolution.height, batch_size
      ),
      PipelineItem::Infer { config } => {
        format!("nvinfer config-file-path=\"{}\"", config.display())
      }
      PipelineItem::Osd => "nvdsosd".to_string(),
      PipelineItem::Sink(sink) => sink.to_pipeline(),
    }
  }
}

#[derive(Debug, Clone, Default)]
pub struct PipelineBuilder {
  items: Vec<PipelineItem>,
}

impl PipelineBuilder {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn item(mut self, item: PipelineItem) -> Self {
    self.items.push(item);
    self
  }

  pub fn source(self, source: &VideoSource) -> Self {
    self.item(PipelineItem::Source(source.clone()))
  }

  pub fn convert(self) -> Self {
    self.item(PipelineItem::Convert {
      interpolation: Some(INTERPOLATION_METHOD),
    })
  }

  pub fn sink(self, sink: OutputSink) -> Self {
    self.item(PipelineItem::Sink(sink))
  }

  pub fn items(&self) -> &[PipelineItem] {
    &self.items
  }

  pub fn build(&self) -> String {
    self
      .items
      .iter()
      .map(PipelineItem::to_pipeline)
      .collect::<Vec<String>>()
      .join(" ! ")
  }
}

/// 目标检测管道
pub fn detect_pipeline(
  source: &VideoSource,
  resolution: Resolution,
  config: &Path,
  sink: OutputSink,
) -> String {
  PipelineBuilder::new()
    .source(source)
    .convert()
    .item(PipelineItem::StreamMux {
      resolution,
      batch_size: 1,
    })
    .item(PipelineItem::Infer {
      config: config.to_path_buf(),
    })
    .item(PipelineItem::Osd)
    .sink(sink)
    .build()
}

/// 缩放管道，画面会被拉伸到 `resolution`
pub fn scale_pipeline(source: &VideoSource, resolution: Resolution, sink: OutputSink) -> String {
  let builder = if source.is_test_pattern() {
    // 测试源在系统内存中按目标尺寸生成，再上传到 GPU
    PipelineBuilder::new()
      .item(PipelineItem::TestSource {
        pattern: Some(SMPTE_PATTERN),
      })
      .item(PipelineItem::RawCaps(resolution))
      .convert()
      .item(PipelineItem::NvmmCaps(None))
  } else {
    PipelineBuilder::new()
      .source(source)
      .convert()
      .item(PipelineItem::NvmmCaps(Some(resolution)))
  };
  builder.sink(sink).build()
}
