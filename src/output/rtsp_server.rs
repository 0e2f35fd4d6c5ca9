// 该文件是 DsFlow 项目的一部分。
// src/output/rtsp_server.rs - GStreamer RTSP 服务器输出
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

//! # RTSP 服务器
//!
//! 用 `gst-rtsp-server` 把整条管道发布为一个共享的媒体挂载点。
//! 管道描述不加括号直接交给 media factory，负载元素必须命名为 `pay0`。
//!
//! ```no_run
//! use dsflow::output::RtspServer;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let server = RtspServer::builder()
//!   .port(8555)
//!   .mount_point("/ds-detect")
//!   .launch("videotestsrc ! x264enc ! rtph264pay name=pay0 pt=96")
//!   .build()?;
//! server.run()?;
//! # Ok(())
//! # }
//! ```

use gstreamer::{self as gst, glib};
use gstreamer_rtsp_server::{self as gst_rtsp_server, prelude::*};
use thiserror::Error;
use tracing::{debug, info, warn};

pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0";

#[derive(Error, Debug)]
pub enum RtspServerError {
  #[error("GStreamer error: {0}")]
  GStreamerError(#[from] glib::Error),
  #[error("GStreamer boolean error: {0}")]
  GStreamerBoolError(#[from] glib::BoolError),
  #[error("Failed to get mount points")]
  MountPointsNotFound,
  #[error("Mount point must start with '/': {0}")]
  InvalidMountPoint(String),
  #[error("Empty pipeline description")]
  EmptyLaunch,
  #[error("Failed to set Ctrl-C handler: {0}")]
  SignalHandlerError(#[from] ctrlc::Error),
}

pub struct RtspServerBuilder {
  port: u16,
  mount_point: String,
  launch: String,
}

impl Default for RtspServerBuilder {
  fn default() -> Self {
    RtspServerBuilder {
      port: 8554,
      mount_point: "/stream".to_string(),
      launch: String::new(),
    }
  }
}

impl RtspServerBuilder {
  pub fn port(mut self, port: u16) -> Self {
    self.port = port;
    self
  }

  pub fn mount_point(mut self, mount_point: impl Into<String>) -> Self {
    self.mount_point = mount_point.into();
    self
  }

  pub fn launch(mut self, launch: impl Into<String>) -> Self {
    self.launch = launch.into();
    self
  }

  pub fn build(self) -> Result<RtspServer, RtspServerError> {
    if !self.mount_point.starts_with('/') {
      return Err(RtspServerError::InvalidMountPoint(self.mount_point));
    }
    if self.launch.trim().is_empty() {
      return Err(RtspServerError::EmptyLaunch);
    }

    // Initialize GStreamer (subsequent calls are safe no-ops)
    gst::init()?;

    let server = gst_rtsp_server::RTSPServer::new();
    server.set_address(DEFAULT_BIND_ADDRESS);
    server.set_service(&self.port.to_string());

    let factory = gst_rtsp_server::RTSPMediaFactory::new();
    debug!("Setting pipeline: {}", self.launch);
    factory.set_launch(&self.launch);
    // 所有客户端共用同一条管道
    factory.set_shared(true);

    factory.connect_media_constructed(|_factory, media| {
      debug!("Media constructed");
      media.connect_new_stream(|_media, stream| {
        debug!("New stream created: {:?}", stream);
      });
      media.connect_prepared(|_media| {
        debug!("Media prepared");
      });
    });

    let mounts = server
      .mount_points()
      .ok_or(RtspServerError::MountPointsNotFound)?;
    mounts.add_factory(&self.mount_point, factory);

    server.connect_client_connected(|_server, client| {
      info!("Client connected: {:?}", client);
    });

    debug!(
      "RTSP server configured for {}:{}{}",
      DEFAULT_BIND_ADDRESS, self.port, self.mount_point
    );

    Ok(RtspServer {
      server,
      port: self.port,
      mount_point: self.mount_point,
    })
  }
}

pub struct RtspServer {
  server: gst_rtsp_server::RTSPServer,
  port: u16,
  mount_point: String,
}

impl RtspServer {
  pub fn builder() -> RtspServerBuilder {
    RtspServerBuilder::default()
  }

  /// 供客户端使用的本地地址
  pub fn stream_url(&self) -> String {
    format!("rtsp://localhost:{}{}", self.port, self.mount_point)
  }

  /// 挂到默认主上下文并运行主循环，直到收到 Ctrl-C
  pub fn run(self) -> Result<(), RtspServerError> {
    let source_id = self.server.attach(None)?;

    info!("RTSP server started on port {}", self.port);
    info!("Stream available at {}", self.stream_url());
    info!("View with: ffplay {}", self.stream_url());
    info!("Waiting for RTSP clients to connect... (Ctrl+C to stop)");

    let main_loop = glib::MainLoop::new(None, false);
    let handle = main_loop.clone();
    ctrlc::set_handler(move || {
      info!("收到中断信号，停止 RTSP 服务器...");
      handle.quit();
    })?;

    main_loop.run();

    source_id.remove();
    if let Some(pool) = self.server.session_pool() {
      let removed = pool.cleanup();
      if removed > 0 {
        warn!("Closed {} active RTSP sessions", removed);
      }
    }
    info!("RTSP server stopped");

    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn mount_point_needs_leading_slash() {
    let err = RtspServer::builder()
      .mount_point("ds-detect")
      .launch("videotestsrc ! x264enc ! rtph264pay name=pay0 pt=96")
      .build()
      .err()
      .unwrap();
    assert!(matches!(err, RtspServerError::InvalidMountPoint(m) if m == "ds-detect"));
  }

  #[test]
  fn blank_launch_is_rejected() {
    let err = RtspServer::builder()
      .mount_point("/ds-detect")
      .launch("   ")
      .build()
      .err()
      .unwrap();
    assert!(matches!(err, RtspServerError::EmptyLaunch));
  }

  #[test]
  fn stream_url_uses_port_and_mount_point() {
    let server = RtspServer::builder()
      .port(8555)
      .mount_point("/ds-detect")
      .launch("videotestsrc ! x264enc ! rtph264pay name=pay0 pt=96")
      .build()
      .unwrap();
    assert_eq!(server.stream_url(), "rtsp://localhost:8555/ds-detect");
  }
}
