// 该文件是 DsFlow 项目的一部分。
// src/task.rs - 管道运行任务
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

pub trait Task: Sized {
  type Error;
  fn run_task(self, pipeline: &str) -> Result<(), Self::Error>;
}

#[cfg(feature = "gstreamer_play")]
pub use self::play::{PlayError, PlayOutcome, PlayTask};

#[cfg(feature = "gstreamer_rtsp")]
pub use self::serve::ServeTask;

#[cfg(feature = "gstreamer_play")]
mod play {
  use std::{
    sync::mpsc,
    thread,
    time::{Duration, Instant},
  };

  use gstreamer::{self as gst, prelude::*};
  use thiserror::Error;
  use tracing::{debug, info, warn};

  use super::Task;

  const POLL_INTERVAL_MS: u64 = 100;
  /// 发送 EOS 后等待管道排空的时间
  const EOS_GRACE: Duration = Duration::from_secs(5);
  const FORCE_EXIT_AFTER: Duration = Duration::from_secs(30);

  #[derive(Error, Debug)]
  pub enum PlayError {
    #[error("GStreamer error: {0}")]
    GStreamerError(#[from] gst::glib::Error),
    #[error("State change error: {0}")]
    StateChangeError(#[from] gst::StateChangeError),
    #[error("Pipeline without bus")]
    BusNotFound,
    #[error("Error from {element}: {message} ({debug})")]
    Pipeline {
      element: String,
      message: String,
      debug: String,
    },
    #[error("Failed to set Ctrl-C handler: {0}")]
    SignalHandlerError(#[from] ctrlc::Error),
  }

  #[derive(Debug, Clone, Copy, PartialEq, Eq)]
  pub enum PlayOutcome {
    EndOfStream,
    Interrupted,
    DurationElapsed,
  }

  /// 退出时把管道置回 Null
  struct PipelineGuard(gst::Element);

  impl Drop for PipelineGuard {
    fn drop(&mut self) {
      if let Err(e) = self.0.set_state(gst::State::Null) {
        warn!("Failed to stop GStreamer pipeline: {}", e);
      }
    }
  }

  /// 在本地直接运行管道，直到 EOS、错误、中断或超时
  #[derive(Default, Debug)]
  pub struct PlayTask {
    max_duration: Option<Duration>,
  }

  impl PlayTask {
    pub fn with_max_duration(mut self, max_duration: Option<Duration>) -> Self {
      self.max_duration = max_duration;
      self
    }

    pub fn play(&self, launch: &str) -> Result<PlayOutcome, PlayError> {
      gst::init()?;

      info!("GStreamer pipeline description: {}", launch);
      let pipeline = gst::parse::launch(launch)?;
      let _guard = PipelineGuard(pipeline.clone());
      let bus = pipeline.bus().ok_or(PlayError::BusNotFound)?;

      let (tx, rx) = mpsc::channel();
      ctrlc::set_handler(move || {
        info!("收到中断信号，准备退出...");
        let _ = tx.send(());
        thread::spawn(|| {
          thread::sleep(FORCE_EXIT_AFTER);
          warn!("强制退出程序");
          std::process::exit(1);
        });
      })?;

      pipeline.set_state(gst::State::Playing)?;
      let started = Instant::now();
      let mut stopping: Option<(Instant, PlayOutcome)> = None;

      loop {
        match stopping {
          Some((deadline, outcome)) if Instant::now() >= deadline => {
            warn!("等待 EOS 超时，直接停止管道");
            return Ok(outcome);
          }
          Some(_) => {}
          None => {
            let stop = if rx.try_recv().is_ok() {
              Some(PlayOutcome::Interrupted)
            } else if self.max_duration.is_some_and(|d| started.elapsed() >= d) {
              info!("达到最长运行时间 {:?}", self.max_duration);
              Some(PlayOutcome::DurationElapsed)
            } else {
              None
            };
            if let Some(outcome) = stop {
              if !pipeline.send_event(gst::event::Eos::new()) {
                warn!("管道未接受 EOS 事件");
              }
              stopping = Some((Instant::now() + EOS_GRACE, outcome));
            }
          }
        }

        let Some(msg) = bus.timed_pop(gst::ClockTime::from_mseconds(POLL_INTERVAL_MS)) else {
          continue;
        };

        use gst::MessageView;
        match msg.view() {
          MessageView::Eos(..) => {
            info!("End of stream");
            return Ok(
              stopping
                .map(|(_, outcome)| outcome)
                .unwrap_or(PlayOutcome::EndOfStream),
            );
          }
          MessageView::Error(err) => {
            return Err(PlayError::Pipeline {
              element: err
                .src()
                .map(|s| s.path_string().to_string())
                .unwrap_or_else(|| "unknown".to_string()),
              message: err.error().to_string(),
              debug: err.debug().map(|d| d.to_string()).unwrap_or_default(),
            });
          }
          MessageView::Warning(w) => {
            warn!("Pipeline warning: {}", w.error());
          }
          MessageView::StateChanged(state_changed) => {
            if state_changed
              .src()
              .map(|s| s == &pipeline)
              .unwrap_or(false)
            {
              info!(
                "Pipeline state changed from {:?} to {:?}",
                state_changed.old(),
                state_changed.current()
              );
            }
          }
          _ => debug!("Bus message: {:?}", msg.type_()),
        }
      }
    }
  }

  impl Task for PlayTask {
    type Error = PlayError;

    fn run_task(self, pipeline: &str) -> Result<(), Self::Error> {
      info!("开始任务...");
      let outcome = self.play(pipeline)?;
      info!("任务完成，退出 ({:?})", outcome);
      Ok(())
    }
  }
}

#[cfg(feature = "gstreamer_rtsp")]
mod serve {
  use tracing::info;

  use super::Task;
  use crate::output::{RtspServer, RtspServerError};

  /// 通过 RTSP 服务器发布管道，客户端连接时才启动
  #[derive(Debug)]
  pub struct ServeTask {
    port: u16,
    mount_point: String,
  }

  impl ServeTask {
    pub fn new(port: u16, mount_point: impl Into<String>) -> Self {
      ServeTask {
        port,
        mount_point: mount_point.into(),
      }
    }

    pub fn stream_url(&self) -> String {
      format!("rtsp://localhost:{}{}", self.port, self.mount_point)
    }
  }

  impl Task for ServeTask {
    type Error = RtspServerError;

    fn run_task(self, pipeline: &str) -> Result<(), Self::Error> {
      info!("启动 RTSP 服务器...");
      RtspServer::builder()
        .port(self.port)
        .mount_point(self.mount_point)
        .launch(pipeline)
        .build()?
        .run()
    }
  }
}
