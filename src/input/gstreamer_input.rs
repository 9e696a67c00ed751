// 该文件是 Shanan （山南西风） 项目的一部分。
// src/input/gstreamer_input.rs - GStreamer 相机输入
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

//! # GStreamer 相机输入
//!
//! 从相机（或视频文件）抓取帧，缩放到检测张量尺寸后输出 RGB 交错帧。
//!
//! ## URL
//!
//! - `gst://camera/dev/video0?width=180&height=320&fps=15&rotate=90`
//! - `gst://file/path/to/video.mp4?width=180&height=320`
//!
//! `width`/`height` 为张量尺寸；`rotate` 为纹理旋转角度（0/90/180/270），
//! 在需要软件旋转的平台上由调用方按屏幕方向给出。
//!
//! ## 系统依赖
//!
//! ```bash
//! sudo apt-get install libgstreamer1.0-dev libgstreamer-plugins-base1.0-dev
//! ```

use std::collections::HashMap;

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use thiserror::Error;
use tracing::{error, info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{Layout, RgbFrame, frame_len},
  input::{query_map, query_size},
  platform::Platform,
};

/// GStreamer 输入错误类型
#[derive(Error, Debug)]
pub enum GStreamerInputError {
  /// URI scheme 不匹配（期望 "gst://"）
  #[error("URI scheme mismatch")]
  SchemeMismatch,
  /// GStreamer 库错误
  #[error("GStreamer error: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  /// GStreamer 布尔操作错误
  #[error("GStreamer boolean error: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  /// 无法获取 appsink 元素
  #[error("Failed to get appsink element")]
  AppSinkNotFound,
  /// 无法转换元素为 appsink
  #[error("Failed to convert element to appsink")]
  AppSinkConversionFailed,
  /// 无法从 caps 获取视频信息
  #[error("Failed to get video info from caps")]
  VideoInfoError,
  /// 不支持的视频格式
  #[error("Unsupported video format")]
  UnsupportedFormat,
  /// 管道错误
  #[error("Pipeline error: {0}")]
  PipelineError(String),
  /// 参数错误
  #[error("Invalid parameter: {0}")]
  InvalidParameter(String),
  /// 状态改变错误
  #[error("State change error: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
}

enum GStreamerInputBuilderItem {
  FileSource(String),
  CameraSource {
    camera: String,
    io_mode: Option<u32>,
    fps: u32,
  },
  VideoFlip {
    method: u32,
  },
  Scale {
    width: u32,
    height: u32,
  },
}

impl GStreamerInputBuilderItem {
  fn to_pipeline(&self) -> String {
    match self {
      GStreamerInputBuilderItem::FileSource(path) => {
        format!("filesrc location={} ! decodebin ! videoconvert", path)
      }
      GStreamerInputBuilderItem::CameraSource {
        camera,
        io_mode,
        fps,
      } => {
        let io_mode_str = if let Some(mode) = io_mode {
          format!(" io-mode={}", mode)
        } else {
          "".to_string()
        };
        format!(
          "v4l2src device={}{} ! videorate ! video/x-raw,framerate={}/1 ! videoconvert",
          camera, io_mode_str, fps
        )
      }
      GStreamerInputBuilderItem::VideoFlip { method } => {
        format!("videoflip method={}", method)
      }
      GStreamerInputBuilderItem::Scale { width, height } => {
        format!(
          "videoscale ! video/x-raw,format=RGB,width={},height={}",
          width, height
        )
      }
    }
  }
}

/// GStreamer 输入管道构建器
pub struct GStreamerInputPipelineBuilder {
  items: Vec<GStreamerInputBuilderItem>,
  width: u32,
  height: u32,
}

impl GStreamerInputPipelineBuilder {
  fn video_flip(rotate: u32) -> Option<GStreamerInputBuilderItem> {
    // videoflip: 1 = 顺时针 90, 2 = 180, 3 = 逆时针 90
    let method = match rotate {
      0 => return None,
      90 => 1,
      180 => 2,
      270 => 3,
      other => {
        warn!("不支持的旋转角度 {}, 忽略", other);
        return None;
      }
    };
    Some(GStreamerInputBuilderItem::VideoFlip { method })
  }

  pub fn build(mut self) -> Result<GStreamerInput, GStreamerInputError> {
    gst::init()?;

    self.items.push(GStreamerInputBuilderItem::Scale {
      width: self.width,
      height: self.height,
    });

    let basic_pipeline = self
      .items
      .iter()
      .map(GStreamerInputBuilderItem::to_pipeline)
      .collect::<Vec<String>>()
      .join(" ! ");
    let full_pipeline = format!(
      "{} ! appsink max-buffers=2 drop=true name=sink",
      basic_pipeline
    );

    info!("GStreamer pipeline description: {}", full_pipeline);

    let pipeline = gst::parse::launch(&full_pipeline)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| GStreamerInputError::PipelineError("Failed to create pipeline".to_string()))?;

    let appsink = pipeline
      .by_name("sink")
      .ok_or(GStreamerInputError::AppSinkNotFound)?
      .downcast::<gst_app::AppSink>()
      .map_err(|_| GStreamerInputError::AppSinkConversionFailed)?;

    pipeline.set_state(gst::State::Playing)?;

    Ok(GStreamerInput { pipeline, appsink })
  }
}

impl FromUrlWithScheme for GStreamerInputPipelineBuilder {
  const SCHEME: &'static str = "gst";
}

impl FromUrl for GStreamerInputPipelineBuilder {
  type Error = GStreamerInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(GStreamerInputError::SchemeMismatch);
    }

    let query: HashMap<String, String> = query_map(url);
    let (tw, th) = Platform::Android.tensor_size();
    let (width, height) = query_size(&query, (tw as u32, th as u32))
      .map_err(|e| GStreamerInputError::InvalidParameter(e.to_string()))?;
    let rotate = query
      .get("rotate")
      .and_then(|v| v.parse::<u32>().ok())
      .unwrap_or(0);

    let mut items = match url.host_str() {
      Some("camera") => vec![GStreamerInputBuilderItem::CameraSource {
        camera: url.path().to_string(),
        io_mode: query.get("io-mode").and_then(|v| v.parse::<u32>().ok()),
        fps: query
          .get("fps")
          .and_then(|v| v.parse::<u32>().ok())
          .unwrap_or(15),
      }],
      Some("file") => vec![GStreamerInputBuilderItem::FileSource(
        url.path().to_string(),
      )],
      _ => {
        return Err(GStreamerInputError::SchemeMismatch);
      }
    };
    if let Some(flip) = Self::video_flip(rotate) {
      items.push(flip);
    }

    Ok(GStreamerInputPipelineBuilder {
      items,
      width,
      height,
    })
  }
}

/// GStreamer 视频输入
pub struct GStreamerInput {
  pipeline: gst::Pipeline,
  appsink: gst_app::AppSink,
}

impl Drop for GStreamerInput {
  fn drop(&mut self) {
    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      warn!("Failed to stop GStreamer pipeline: {}", e);
    }
  }
}

impl GStreamerInput {
  fn pull_sample(&self) -> Option<gst::Sample> {
    self
      .appsink
      .pull_sample()
      .map_err(|e| {
        error!("Failed to pull sample: {}", e);
        e
      })
      .ok()
  }
}

impl Iterator for GStreamerInput {
  type Item = RgbFrame;

  fn next(&mut self) -> Option<Self::Item> {
    let sample = self.pull_sample()?;
    convert_sample(sample)
      .map_err(|e| {
        error!("Failed to fetch sample: {}", e);
        e
      })
      .ok()
  }
}

fn convert_sample(sample: gst::Sample) -> Result<RgbFrame, GStreamerInputError> {
  let buffer = sample
    .buffer()
    .ok_or_else(|| GStreamerInputError::PipelineError("No buffer in sample".to_string()))?;
  let caps = sample
    .caps()
    .ok_or_else(|| GStreamerInputError::PipelineError("No caps in sample".to_string()))?;

  let video_info =
    gst_video::VideoInfo::from_caps(caps).map_err(|_| GStreamerInputError::VideoInfoError)?;

  let width = video_info.width() as usize;
  let height = video_info.height() as usize;
  // 每行可能有填充
  let stride = video_info.stride()[0] as usize;

  let map = buffer.map_readable().map_err(|e| {
    GStreamerInputError::PipelineError(format!("Failed to map buffer for reading: {}", e))
  })?;
  let data = map.as_slice();

  let len = frame_len(width as u32, height as u32)
    .map_err(|e| GStreamerInputError::PipelineError(e.to_string()))?;
  let mut pixels = vec![0u8; len];
  let swap = match video_info.format() {
    gst_video::VideoFormat::Rgb => false,
    gst_video::VideoFormat::Bgr => true,
    _ => return Err(GStreamerInputError::UnsupportedFormat),
  };

  for h in 0..height {
    let row = data.get(h * stride..h * stride + width * 3).ok_or_else(|| {
      GStreamerInputError::PipelineError(format!("Buffer too small for row {}", h))
    })?;
    let dst = &mut pixels[h * width * 3..(h + 1) * width * 3];
    if swap {
      for (d, s) in dst.chunks_exact_mut(3).zip(row.chunks_exact(3)) {
        d.copy_from_slice(&[s[2], s[1], s[0]]);
      }
    } else {
      dst.copy_from_slice(row);
    }
  }

  RgbFrame::new(width as u32, height as u32, Layout::Nhwc, pixels)
    .map_err(|e| GStreamerInputError::PipelineError(e.to_string()))
}
