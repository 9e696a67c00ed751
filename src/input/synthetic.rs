// 该文件是 Shanan （山南西风） 项目的一部分。
// src/input/synthetic.rs - 合成测试画面
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

use tracing::{debug, error};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{FrameError, Layout, RGB_CHANNELS, RgbFrame, frame_len},
  input::{InputError, query_map, query_size},
};

const SQUARE_SIZE: u32 = 16;
const SQUARE_STEP: u32 = 4;

/// 灰底上移动的白色方块
///
/// URL 形式：`synthetic://?width=180&height=320&frames=100`，
/// 省略 `frames` 时无限输出。
pub struct SyntheticInput {
  width: u32,
  height: u32,
  index: u64,
  limit: Option<u64>,
}

impl SyntheticInput {
  pub fn new(width: u32, height: u32) -> Self {
    Self {
      width,
      height,
      index: 0,
      limit: None,
    }
  }

  pub fn with_limit(mut self, limit: Option<u64>) -> Self {
    self.limit = limit;
    self
  }

  fn render(&self) -> Result<RgbFrame, FrameError> {
    let (w, h) = (self.width, self.height);
    let span = w.saturating_sub(SQUARE_SIZE).max(1);
    let offset = ((self.index as u32).wrapping_mul(SQUARE_STEP)) % span;
    let top = h.saturating_sub(SQUARE_SIZE) / 2;

    let mut data = vec![64u8; frame_len(w, h)?];
    let row = w as usize * RGB_CHANNELS;
    for y in top..top.saturating_add(SQUARE_SIZE).min(h) {
      for x in offset..offset.saturating_add(SQUARE_SIZE).min(w) {
        let idx = y as usize * row + x as usize * RGB_CHANNELS;
        data[idx..idx + RGB_CHANNELS].copy_from_slice(&[255, 255, 255]);
      }
    }

    RgbFrame::new(w, h, Layout::Nhwc, data)
  }
}

impl FromUrlWithScheme for SyntheticInput {
  const SCHEME: &'static str = "synthetic";
}

impl FromUrl for SyntheticInput {
  type Error = InputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(InputError::SchemeMismatch);
    }
    let query = query_map(url);
    let (width, height) = query_size(&query, (180, 320))?;
    let limit = match query.get("frames") {
      Some(v) => Some(
        v.parse::<u64>()
          .map_err(|_| InputError::InvalidParameter(format!("frames={}", v)))?,
      ),
      None => None,
    };
    Ok(Self::new(width, height).with_limit(limit))
  }
}

impl Iterator for SyntheticInput {
  type Item = RgbFrame;

  fn next(&mut self) -> Option<Self::Item> {
    if self.limit.is_some_and(|limit| self.index >= limit) {
      debug!("合成画面已输出 {} 帧，结束", self.index);
      return None;
    }
    match self.render() {
      Ok(frame) => {
        self.index += 1;
        Some(frame)
      }
      Err(e) => {
        error!("生成合成画面失败: {}", e);
        None
      }
    }
  }
}
