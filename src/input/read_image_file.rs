// 该文件是 Shanan （山南西风） 项目的一部分。
// src/input/read_image_file.rs - 静态图片帧源
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

use image::{ImageReader, RgbImage, imageops::FilterType};
use thiserror::Error;
use tracing::{error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::RgbFrame,
  input::{InputError, query_map, query_size},
};

#[derive(Error, Debug)]
pub enum ImageFileInputError {
  #[error("URI schema mismatch")]
  SchemaMismatch,
  #[error("I/O error: {0}")]
  IoError(#[from] std::io::Error),
  #[error("Image loading error: {0}")]
  ImageLoadError(#[from] image::ImageError),
}

/// 把一张图片当作“静止的相机”，按需重复输出
///
/// URL 形式：`image:///path/to/photo.jpg?width=180&height=320`，
/// 给出尺寸时会先缩放到张量尺寸。
pub struct ImageFileInput {
  image: RgbImage,
  remaining: Option<u64>,
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileInput {
  type Error = InputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ImageFileInputError::SchemaMismatch.into());
    }

    let path = url.path();
    let image = ImageReader::open(path)
      .map_err(ImageFileInputError::from)?
      .decode()
      .map_err(ImageFileInputError::from)?
      .to_rgb8();
    info!("读取图片: {} ({}x{})", path, image.width(), image.height());

    let query = query_map(url);
    let image = if query.contains_key("width") || query.contains_key("height") {
      let (width, height) = query_size(&query, image.dimensions())?;
      image::imageops::resize(&image, width, height, FilterType::Triangle)
    } else {
      image
    };

    let remaining = match query.get("frames") {
      Some(v) => Some(
        v.parse::<u64>()
          .map_err(|_| InputError::InvalidParameter(format!("frames={}", v)))?,
      ),
      None => None,
    };

    Ok(ImageFileInput { image, remaining })
  }
}

impl Iterator for ImageFileInput {
  type Item = RgbFrame;

  fn next(&mut self) -> Option<Self::Item> {
    if let Some(remaining) = self.remaining.as_mut() {
      if *remaining == 0 {
        return None;
      }
      *remaining -= 1;
    }
    Some(RgbFrame::from(self.image.clone()))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn repeats_and_resizes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("still.png");
    RgbImage::from_pixel(20, 10, image::Rgb([10, 20, 30]))
      .save(&path)
      .unwrap();

    let url = Url::parse(&format!("image://{}?width=8&height=4&frames=3", path.display())).unwrap();
    let input = ImageFileInput::from_url(&url).unwrap();
    let frames: Vec<_> = input.collect();
    assert_eq!(frames.len(), 3);
    assert_eq!((frames[0].width(), frames[0].height()), (8, 4));
    let px = frames[2].pixel(3, 2).unwrap();
    for (got, want) in px.iter().zip([10u8, 20, 30]) {
      assert!(got.abs_diff(want) <= 1);
    }
  }

  #[test]
  fn missing_file_is_an_error() {
    let url = Url::parse("image:///definitely/not/here.png").unwrap();
    assert!(ImageFileInput::from_url(&url).is_err());
  }
}
