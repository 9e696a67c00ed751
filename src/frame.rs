// 该文件是 Shanan （山南西风） 项目的一部分。
// src/frame.rs - RGB 帧定义
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

pub const RGB_CHANNELS: usize = 3;

/// 单边最大像素数，远大于任何相机纹理
pub const MAX_DIMENSION: u32 = 16384;

/// 像素在缓冲区中的排布方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
  /// 交错排布 (H x W x C)
  Nhwc,
  /// 平面排布 (C x H x W)
  Nchw,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum FrameError {
  #[error("数据长度不匹配: 期望长度 {expected}, 实际长度 {actual}")]
  SizeMismatch { expected: usize, actual: usize },
  #[error("帧尺寸无效: {0}x{1}")]
  EmptyShape(u32, u32),
  #[error("帧尺寸过大: {0}x{1}, 单边最大 {MAX_DIMENSION}")]
  TooLarge(u32, u32),
}

/// 帧源与检测器之间传递的图像缓冲区
///
/// 尺寸在运行时确定：张量尺寸会随屏幕方向切换，不能像推理模型输入那样写死在类型里。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RgbFrame {
  width: u32,
  height: u32,
  layout: Layout,
  data: Box<[u8]>,
}

/// 给定尺寸的 RGB 缓冲区长度，在 `usize` 中做带溢出检查的乘法
pub fn frame_len(width: u32, height: u32) -> Result<usize, FrameError> {
  if width == 0 || height == 0 {
    return Err(FrameError::EmptyShape(width, height));
  }
  if width > MAX_DIMENSION || height > MAX_DIMENSION {
    return Err(FrameError::TooLarge(width, height));
  }
  (width as usize)
    .checked_mul(height as usize)
    .and_then(|n| n.checked_mul(RGB_CHANNELS))
    .ok_or(FrameError::TooLarge(width, height))
}

impl RgbFrame {
  pub fn new(width: u32, height: u32, layout: Layout, data: Vec<u8>) -> Result<Self, FrameError> {
    let expected = frame_len(width, height)?;
    if data.len() != expected {
      return Err(FrameError::SizeMismatch {
        expected,
        actual: data.len(),
      });
    }

    Ok(Self {
      width,
      height,
      layout,
      data: data.into_boxed_slice(),
    })
  }

  /// 全黑帧
  pub fn zeroed(width: u32, height: u32, layout: Layout) -> Result<Self, FrameError> {
    Self::new(width, height, layout, vec![0u8; frame_len(width, height)?])
  }

  pub fn width(&self) -> u32 {
    self.width
  }

  pub fn height(&self) -> u32 {
    self.height
  }

  pub fn channels(&self) -> usize {
    RGB_CHANNELS
  }

  pub fn layout(&self) -> Layout {
    self.layout
  }

  pub fn as_bytes(&self) -> &[u8] {
    &self.data
  }

  pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
    if x >= self.width || y >= self.height {
      return None;
    }
    let (w, h) = (self.width as usize, self.height as usize);
    let (x, y) = (x as usize, y as usize);
    let px = match self.layout {
      Layout::Nhwc => {
        let idx = (y * w + x) * RGB_CHANNELS;
        [self.data[idx], self.data[idx + 1], self.data[idx + 2]]
      }
      Layout::Nchw => {
        let plane = w * h;
        let idx = y * w + x;
        [
          self.data[idx],
          self.data[plane + idx],
          self.data[2 * plane + idx],
        ]
      }
    };
    Some(px)
  }

  /// 转为交错排布，已是交错排布时直接返回
  pub fn into_nhwc(self) -> Self {
    if self.layout == Layout::Nhwc {
      return self;
    }
    let plane = self.width as usize * self.height as usize;
    let mut data = vec![0u8; plane * RGB_CHANNELS];
    for idx in 0..plane {
      for c in 0..RGB_CHANNELS {
        data[idx * RGB_CHANNELS + c] = self.data[c * plane + idx];
      }
    }
    Self {
      width: self.width,
      height: self.height,
      layout: Layout::Nhwc,
      data: data.into_boxed_slice(),
    }
  }

  /// 转为平面排布
  pub fn into_nchw(self) -> Self {
    if self.layout == Layout::Nchw {
      return self;
    }
    let plane = self.width as usize * self.height as usize;
    let mut data = vec![0u8; plane * RGB_CHANNELS];
    for idx in 0..plane {
      for c in 0..RGB_CHANNELS {
        data[c * plane + idx] = self.data[idx * RGB_CHANNELS + c];
      }
    }
    Self {
      width: self.width,
      height: self.height,
      layout: Layout::Nchw,
      data: data.into_boxed_slice(),
    }
  }
}

#[cfg(feature = "image")]
impl From<image::RgbImage> for RgbFrame {
  fn from(image: image::RgbImage) -> Self {
    let (width, height) = image.dimensions();
    Self {
      width,
      height,
      layout: Layout::Nhwc,
      data: image.into_raw().into_boxed_slice(),
    }
  }
}

#[cfg(feature = "image")]
impl RgbFrame {
  pub fn to_rgb_image(&self) -> image::RgbImage {
    image::ImageBuffer::from_fn(self.width, self.height, |x, y| {
      image::Rgb(self.pixel(x, y).unwrap_or_default())
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn rejects_wrong_length() {
    let err = RgbFrame::new(4, 2, Layout::Nhwc, vec![0; 10]).unwrap_err();
    assert_eq!(
      err,
      FrameError::SizeMismatch {
        expected: 24,
        actual: 10
      }
    );
  }

  #[test]
  fn rejects_empty_shape() {
    assert!(RgbFrame::new(0, 2, Layout::Nhwc, vec![]).is_err());
  }

  #[test]
  fn oversized_shape_is_rejected_before_allocating() {
    assert_eq!(
      frame_len(65536, 65536),
      Err(FrameError::TooLarge(65536, 65536))
    );
    assert_eq!(
      frame_len(u32::MAX, u32::MAX),
      Err(FrameError::TooLarge(u32::MAX, u32::MAX))
    );
    assert_eq!(frame_len(MAX_DIMENSION, 1), Ok(MAX_DIMENSION as usize * 3));
    assert!(RgbFrame::zeroed(MAX_DIMENSION + 1, 1, Layout::Nhwc).is_err());
  }

  #[test]
  fn layout_conversion_keeps_pixels() {
    // 2x1: 红、绿
    let frame = RgbFrame::new(2, 1, Layout::Nhwc, vec![255, 0, 0, 0, 255, 0]).unwrap();
    let planar = frame.clone().into_nchw();
    assert_eq!(planar.as_bytes(), &[255, 0, 0, 255, 0, 0]);
    assert_eq!(planar.pixel(1, 0), Some([0, 255, 0]));
    assert_eq!(planar.into_nhwc(), frame);
  }

  #[test]
  fn pixel_out_of_bounds() {
    let frame = RgbFrame::zeroed(2, 2, Layout::Nchw).unwrap();
    assert_eq!(frame.pixel(2, 0), None);
  }
}
