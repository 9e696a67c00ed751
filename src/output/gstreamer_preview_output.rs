// 该文件是 Shanan （山南西风） 项目的一部分。
// src/output/gstreamer_preview_output.rs - GStreamer 预览窗口
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

//! # GStreamer 预览输出
//!
//! 把叠加了检测框的预览画面推送到显示窗口。
//!
//! ## URL
//!
//! `gst://display?width=360&platform=ios&font=/path/to/font.ttf&sink=autovideosink`
//!
//! - `width`: 预览宽度（竖屏），高度按平台宽高比推出，默认 360
//! - `platform`: `ios` 或 `android`，默认 `android`
//! - `font`: 可选，标签字体
//! - `sink`: 显示元素，默认 `autovideosink`

use std::path::Path;

use clap::ValueEnum;
use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{error, info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::RgbFrame,
  input::query_map,
  mapper::Viewport,
  output::{
    Render,
    draw::{Draw, DrawError},
  },
  platform::Platform,
  task::OverlayFrame,
};

/// GStreamer 预览输出错误类型
#[derive(Error, Debug)]
pub enum GStreamerPreviewOutputError {
  /// URI scheme 不匹配
  #[error("URI scheme mismatch")]
  SchemeMismatch,
  /// GStreamer 库错误
  #[error("GStreamer error: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  /// 无法获取 appsrc 元素
  #[error("Failed to get appsrc element")]
  AppSrcNotFound,
  /// 无法转换元素为 appsrc
  #[error("Failed to convert element to appsrc")]
  AppSrcConversionFailed,
  /// 管道错误
  #[error("Pipeline error: {0}")]
  PipelineError(String),
  /// 参数错误
  #[error("Invalid parameter: {0}")]
  InvalidParameter(String),
  /// 状态改变错误
  #[error("State change error: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
  /// 绘制错误
  #[error("Draw error: {0}")]
  DrawError(#[from] DrawError),
}

pub struct GStreamerPreviewOutput {
  pipeline: gst::Pipeline,
  appsrc: gst_app::AppSrc,
  draw: Draw,
  // 当前 caps 的尺寸，方向变化时重新协商
  caps_size: Mutex<Option<(u32, u32)>>,
}

impl FromUrlWithScheme for GStreamerPreviewOutput {
  const SCHEME: &'static str = "gst";
}

impl FromUrl for GStreamerPreviewOutput {
  type Error = GStreamerPreviewOutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME || url.host_str() != Some("display") {
      error!("URI scheme mismatch: expected 'gst://display', found '{}'", url);
      return Err(GStreamerPreviewOutputError::SchemeMismatch);
    }

    gst::init()?;

    let query = query_map(url);
    let width: f32 = match query.get("width") {
      Some(v) => v
        .parse()
        .map_err(|_| GStreamerPreviewOutputError::InvalidParameter(format!("width={}", v)))?,
      None => 360.0,
    };
    let platform = match query.get("platform") {
      Some(v) => Platform::from_str(v, true)
        .map_err(|_| GStreamerPreviewOutputError::InvalidParameter(format!("platform={}", v)))?,
      None => Platform::Android,
    };
    let sink = query
      .get("sink")
      .map(String::as_str)
      .unwrap_or("autovideosink");

    let mut draw = Draw::new(Viewport::for_screen(platform, width));
    if let Some(font) = query.get("font") {
      draw = draw.with_font_file(Path::new(font))?;
    }

    let pipeline_desc = format!(
      "appsrc name=src is-live=true format=time ! videoconvert ! {} sync=false",
      sink
    );
    info!("Creating preview pipeline: {}", pipeline_desc);

    let pipeline = gst::parse::launch(&pipeline_desc)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| {
        GStreamerPreviewOutputError::PipelineError("Failed to create pipeline".to_string())
      })?;

    let appsrc = pipeline
      .by_name("src")
      .ok_or(GStreamerPreviewOutputError::AppSrcNotFound)?
      .downcast::<gst_app::AppSrc>()
      .map_err(|_| GStreamerPreviewOutputError::AppSrcConversionFailed)?;

    pipeline.set_state(gst::State::Playing)?;

    Ok(GStreamerPreviewOutput {
      pipeline,
      appsrc,
      draw,
      caps_size: Mutex::new(None),
    })
  }
}

impl Drop for GStreamerPreviewOutput {
  fn drop(&mut self) {
    let _ = self.appsrc.end_of_stream();
    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      warn!("Failed to stop GStreamer preview pipeline: {}", e);
    }
  }
}

impl GStreamerPreviewOutput {
  fn ensure_caps(&self, width: u32, height: u32) {
    let mut current = self.caps_size.lock();
    if *current == Some((width, height)) {
      return;
    }
    let caps = gst::Caps::builder("video/x-raw")
      .field("format", "RGB")
      .field("width", width as i32)
      .field("height", height as i32)
      .field("framerate", gst::Fraction::new(0, 1))
      .build();
    self.appsrc.set_caps(Some(&caps));
    info!("预览尺寸: {}x{}", width, height);
    *current = Some((width, height));
  }

  fn push_frame(&self, data: &[u8]) -> Result<(), GStreamerPreviewOutputError> {
    let buffer = gst::Buffer::from_slice(data.to_vec());
    self.appsrc.push_buffer(buffer).map_err(|e| {
      GStreamerPreviewOutputError::PipelineError(format!("Failed to push buffer: {:?}", e))
    })?;
    Ok(())
  }
}

impl Render<RgbFrame, OverlayFrame> for GStreamerPreviewOutput {
  type Error = GStreamerPreviewOutputError;

  fn render_result(&self, frame: &RgbFrame, result: &OverlayFrame) -> Result<(), Self::Error> {
    let preview = self.draw.draw_overlay(frame, result);
    self.ensure_caps(preview.width(), preview.height());
    self.push_frame(preview.as_raw())
  }
}
