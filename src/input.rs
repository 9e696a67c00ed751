// 该文件是 Shanan （山南西风） 项目的一部分。
// src/input.rs - 帧源
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

//! 帧源是一个惰性的、不可重启的 [`RgbFrame`] 迭代器。
//! 相机类帧源理论上无限，返回 `None` 表示设备已关闭。

use std::collections::HashMap;

use thiserror::Error;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{MAX_DIMENSION, RgbFrame},
  mapper::{tensor_dims, texture_rotation_degrees},
  orientation::DisplayContext,
  platform::Platform,
};

mod synthetic;
pub use self::synthetic::SyntheticInput;

#[cfg(feature = "read_image_file")]
mod read_image_file;
#[cfg(feature = "read_image_file")]
pub use self::read_image_file::{ImageFileInput, ImageFileInputError};

#[cfg(feature = "gstreamer_input")]
mod gstreamer_input;
#[cfg(feature = "gstreamer_input")]
pub use self::gstreamer_input::{
  GStreamerInput, GStreamerInputError, GStreamerInputPipelineBuilder,
};

#[derive(Error, Debug)]
pub enum InputError {
  #[cfg(feature = "read_image_file")]
  #[error("Image file input error: {0}")]
  ImageFileInputError(#[from] ImageFileInputError),
  #[cfg(feature = "gstreamer_input")]
  #[error("GStreamer input error: {0}")]
  GStreamerInputError(#[from] GStreamerInputError),
  #[error("Invalid input parameter: {0}")]
  InvalidParameter(String),
  #[error("URI scheme mismatch")]
  SchemeMismatch,
}

pub(crate) fn query_map(url: &Url) -> HashMap<String, String> {
  url
    .query_pairs()
    .map(|(k, v)| (String::from(k), String::from(v)))
    .collect()
}

/// 读取查询参数中的尺寸，缺省时使用默认值
pub(crate) fn query_size(
  query: &HashMap<String, String>,
  default: (u32, u32),
) -> Result<(u32, u32), InputError> {
  let parse = |key: &str, default: u32| -> Result<u32, InputError> {
    match query.get(key) {
      Some(v) => v
        .parse::<u32>()
        .ok()
        .filter(|v| (1..=MAX_DIMENSION).contains(v))
        .ok_or_else(|| InputError::InvalidParameter(format!("{}={}", key, v))),
      None => Ok(default),
    }
  };
  Ok((parse("width", default.0)?, parse("height", default.1)?))
}

/// 按平台与显示上下文补全帧源 URL
///
/// 未给出 `width` 与 `height` 时取当前方向下的张量尺寸，帧与坐标映射因此处于同一坐标系。
/// 相机源未给出 `rotate` 时取纹理旋转角度。显式参数保持不变。
pub fn source_url(url: &Url, platform: Platform, context: DisplayContext) -> Url {
  let query = query_map(url);
  let mut url = url.clone();

  if !query.contains_key("width") && !query.contains_key("height") {
    let (tw, th) = tensor_dims(platform, context.orientation);
    url
      .query_pairs_mut()
      .append_pair("width", &(tw as u32).to_string())
      .append_pair("height", &(th as u32).to_string());
  }

  let is_camera = url.scheme() == "gst" && url.host_str() == Some("camera");
  if is_camera && !query.contains_key("rotate") {
    let degrees = texture_rotation_degrees(platform, context.orientation, context.facing);
    if degrees != 0 {
      url
        .query_pairs_mut()
        .append_pair("rotate", &degrees.to_string());
    }
  }
  url
}

pub enum InputWrapper {
  Synthetic(SyntheticInput),
  #[cfg(feature = "read_image_file")]
  ReadImageFile(ImageFileInput),
  #[cfg(feature = "gstreamer_input")]
  GStreamerInput(GStreamerInput),
}

impl FromUrl for InputWrapper {
  type Error = InputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() == SyntheticInput::SCHEME {
      return Ok(InputWrapper::Synthetic(SyntheticInput::from_url(url)?));
    }
    #[cfg(feature = "read_image_file")]
    {
      if url.scheme() == ImageFileInput::SCHEME {
        let input = ImageFileInput::from_url(url)?;
        return Ok(InputWrapper::ReadImageFile(input));
      }
    }
    #[cfg(feature = "gstreamer_input")]
    {
      if url.scheme() == GStreamerInputPipelineBuilder::SCHEME {
        let input = GStreamerInputPipelineBuilder::from_url(url)?.build()?;
        return Ok(InputWrapper::GStreamerInput(input));
      }
    }
    Err(InputError::SchemeMismatch)
  }
}

impl Iterator for InputWrapper {
  type Item = RgbFrame;

  fn next(&mut self) -> Option<Self::Item> {
    match self {
      InputWrapper::Synthetic(input) => input.next(),
      #[cfg(feature = "read_image_file")]
      InputWrapper::ReadImageFile(input) => input.next(),
      #[cfg(feature = "gstreamer_input")]
      InputWrapper::GStreamerInput(input) => input.next(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::orientation::{CameraFacing, Orientation};

  #[test]
  fn picks_synthetic_source() {
    let url = Url::parse("synthetic://?width=8&height=6").unwrap();
    let mut input = InputWrapper::from_url(&url).unwrap();
    let frame = input.next().unwrap();
    assert_eq!((frame.width(), frame.height()), (8, 6));
  }

  #[test]
  fn unknown_scheme_is_rejected() {
    let url = Url::parse("ftp://host/file").unwrap();
    assert!(matches!(
      InputWrapper::from_url(&url),
      Err(InputError::SchemeMismatch)
    ));
  }

  #[test]
  fn source_url_follows_platform_tensor() {
    let portrait = DisplayContext::default();
    let url = source_url(&Url::parse("synthetic://").unwrap(), Platform::Android, portrait);
    let mut input = InputWrapper::from_url(&url).unwrap();
    let frame = input.next().unwrap();
    assert_eq!((frame.width(), frame.height()), (180, 240));

    let landscape = DisplayContext {
      orientation: Orientation::LandscapeLeft,
      ..portrait
    };
    let url = source_url(&Url::parse("synthetic://").unwrap(), Platform::Ios, landscape);
    let query = query_map(&url);
    assert_eq!(query.get("width").map(String::as_str), Some("320"));
    assert_eq!(query.get("height").map(String::as_str), Some("180"));
  }

  #[test]
  fn source_url_keeps_explicit_parameters() {
    let url = Url::parse("synthetic://?width=8&frames=2").unwrap();
    let adjusted = source_url(&url, Platform::Android, DisplayContext::default());
    assert_eq!(adjusted, url);

    let camera = Url::parse("gst://camera/dev/video0?rotate=0").unwrap();
    let adjusted = source_url(&camera, Platform::Ios, DisplayContext::default());
    let query = query_map(&adjusted);
    assert_eq!(query.get("rotate").map(String::as_str), Some("0"));
  }

  #[test]
  fn camera_source_gets_texture_rotation() {
    let context = DisplayContext {
      orientation: Orientation::LandscapeLeft,
      facing: CameraFacing::Front,
    };
    let camera = Url::parse("gst://camera/dev/video0").unwrap();

    let query = query_map(&source_url(&camera, Platform::Ios, context));
    assert_eq!(query.get("rotate").map(String::as_str), Some("270"));

    // 硬件已处理旋转的平台不加 rotate
    let query = query_map(&source_url(&camera, Platform::Android, context));
    assert!(!query.contains_key("rotate"));
    assert_eq!(query.get("height").map(String::as_str), Some("240"));
  }

  #[test]
  fn size_parameters_must_be_positive() {
    let url = Url::parse("synthetic://?width=0").unwrap();
    assert!(matches!(
      InputWrapper::from_url(&url),
      Err(InputError::InvalidParameter(_))
    ));
  }
}
