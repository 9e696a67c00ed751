// 该文件是 Shanan （山南西风） 项目的一部分。
// src/output.rs - 叠加层输出
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, frame::RgbFrame, task::OverlayFrame};

/// 预览重绘：每次检测列表更新后调用
pub trait Render<Frame, Output> {
  type Error;
  fn render_result(&self, frame: &Frame, result: &Output) -> Result<(), Self::Error>;
}

#[cfg(feature = "draw_overlay")]
pub mod draw;

#[cfg(feature = "gstreamer_output")]
mod gstreamer_preview_output;
#[cfg(feature = "gstreamer_output")]
pub use self::gstreamer_preview_output::{GStreamerPreviewOutput, GStreamerPreviewOutputError};

#[derive(Error, Debug)]
pub enum OutputError {
  #[cfg(feature = "gstreamer_output")]
  #[error("GStreamer 预览输出错误: {0}")]
  GStreamerPreviewOutputError(#[from] GStreamerPreviewOutputError),
  #[error("URI 方案不匹配")]
  SchemeMismatch,
}

/// 以日志形式输出屏幕矩形，不依赖任何显示设备
///
/// URL 形式：`log://`，`log://?quiet` 时只输出 debug 级别。
pub struct LogOutput {
  quiet: bool,
}

impl FromUrlWithScheme for LogOutput {
  const SCHEME: &'static str = "log";
}

impl FromUrl for LogOutput {
  type Error = OutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(OutputError::SchemeMismatch);
    }
    let quiet = url.query_pairs().any(|(k, _)| k == "quiet");
    Ok(LogOutput { quiet })
  }
}

impl Render<RgbFrame, OverlayFrame> for LogOutput {
  type Error = OutputError;

  fn render_result(&self, frame: &RgbFrame, result: &OverlayFrame) -> Result<(), Self::Error> {
    if self.quiet {
      debug!(
        "帧 {}: {} 个目标, FPS {}",
        result.index,
        result.rects.len(),
        result.fps
      );
      return Ok(());
    }

    info!(
      "帧 {} ({}x{}, {:?}/{:?}): {} 个目标, 耗时 {:.2?}, FPS {}",
      result.index,
      frame.width(),
      frame.height(),
      result.context.orientation,
      result.context.facing,
      result.rects.len(),
      result.latency,
      result.fps
    );
    for rect in &result.rects {
      info!(
        "  - {}: {:.2}% at ({:.0}, {:.0}, {:.0}x{:.0})",
        rect.label,
        rect.score * 100.0,
        rect.x,
        rect.y,
        rect.width,
        rect.height
      );
    }
    Ok(())
  }
}

pub enum OutputWrapper {
  Log(LogOutput),
  #[cfg(feature = "gstreamer_output")]
  GStreamerPreview(GStreamerPreviewOutput),
}

impl FromUrl for OutputWrapper {
  type Error = OutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      LogOutput::SCHEME => Ok(OutputWrapper::Log(LogOutput::from_url(url)?)),
      #[cfg(feature = "gstreamer_output")]
      GStreamerPreviewOutput::SCHEME => {
        let output = GStreamerPreviewOutput::from_url(url)?;
        Ok(OutputWrapper::GStreamerPreview(output))
      }
      _ => Err(OutputError::SchemeMismatch),
    }
  }
}

impl Render<RgbFrame, OverlayFrame> for OutputWrapper {
  type Error = OutputError;

  fn render_result(&self, frame: &RgbFrame, result: &OverlayFrame) -> Result<(), Self::Error> {
    match self {
      OutputWrapper::Log(output) => output.render_result(frame, result),
      #[cfg(feature = "gstreamer_output")]
      OutputWrapper::GStreamerPreview(output) => output
        .render_result(frame, result)
        .map_err(OutputError::from),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn log_output_from_url() {
    let url = Url::parse("log://?quiet").unwrap();
    assert!(matches!(
      OutputWrapper::from_url(&url),
      Ok(OutputWrapper::Log(LogOutput { quiet: true }))
    ));
    let url = Url::parse("mailto:someone@example.com").unwrap();
    assert!(OutputWrapper::from_url(&url).is_err());
  }
}
