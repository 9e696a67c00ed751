// 该文件是 Shanan （山南西风） 项目的一部分。
// src/output/draw.rs - 检测叠加层绘制
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

use std::path::Path;

use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage, imageops::FilterType};
use imageproc::{
  drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut},
  rect::Rect,
};
use thiserror::Error;
use tracing::info;

use crate::{frame::RgbFrame, mapper::{ScreenRect, Viewport}, task::OverlayFrame};

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 16.0;
const LABEL_TEXT_HEIGHT: i32 = 20;
const LABEL_CHAR_WIDTH: f32 = 9.0; // 每字符平均宽度（粗略估计）
const BOX_COLOR: [u8; 3] = [0, 0, 0]; // 黑色
const BOX_THICKNESS: u32 = 2;

#[derive(Error, Debug)]
pub enum DrawError {
  #[error("字体文件读取错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("字体无效: {0}")]
  InvalidFont(#[from] ab_glyph::InvalidFont),
}

/// 在预览画面上绘制屏幕坐标矩形
///
/// 没有字体时只画框，不画标签与 FPS。
pub struct Draw {
  viewport: Viewport,
  font: Option<FontVec>,
  font_size: f32,
  box_color: [u8; 3],
}

impl Draw {
  pub fn new(viewport: Viewport) -> Self {
    Self {
      viewport,
      font: None,
      font_size: LABEL_FONT_SIZE,
      box_color: BOX_COLOR,
    }
  }

  pub fn with_font_file(mut self, path: &Path) -> Result<Self, DrawError> {
    let data = std::fs::read(path)?;
    self.font = Some(FontVec::try_from_vec(data)?);
    info!("加载标签字体: {}", path.display());
    Ok(self)
  }

  pub fn with_color(mut self, color: [u8; 3]) -> Self {
    self.box_color = color;
    self
  }

  /// 把帧缩放到当前方向下的预览尺寸，再叠加矩形
  pub fn draw_overlay(&self, frame: &RgbFrame, overlay: &OverlayFrame) -> RgbImage {
    let (w, h) = self.viewport.oriented(overlay.context.orientation);
    let (w, h) = ((w.round() as u32).max(1), (h.round() as u32).max(1));
    let mut preview = image::imageops::resize(&frame.to_rgb_image(), w, h, FilterType::Triangle);

    for rect in &overlay.rects {
      self.draw_rect(&mut preview, rect);
    }

    if let Some(font) = &self.font {
      let text = format!("FPS: {}", overlay.fps);
      let bg = Rect::at(10, 10).of_size(80, LABEL_TEXT_HEIGHT as u32);
      draw_filled_rect_mut(&mut preview, bg, Rgb([255, 255, 255]));
      draw_text_mut(
        &mut preview,
        Rgb([0, 0, 0]),
        14,
        12,
        PxScale::from(self.font_size),
        font,
        &text,
      );
    }

    preview
  }

  fn draw_rect(&self, image: &mut RgbImage, rect: &ScreenRect) {
    let x = rect.x.round() as i32;
    let y = rect.y.round() as i32;
    let width = (rect.width.round() as u32).max(1);
    let height = (rect.height.round() as u32).max(1);

    // 加粗边框
    for t in 0..BOX_THICKNESS {
      let inner_w = width.saturating_sub(2 * t).max(1);
      let inner_h = height.saturating_sub(2 * t).max(1);
      let r = Rect::at(x + t as i32, y + t as i32).of_size(inner_w, inner_h);
      draw_hollow_rect_mut(image, r, Rgb(self.box_color));
    }

    let Some(font) = &self.font else {
      return;
    };
    let label = format!("{} {:.2}", rect.label, rect.score);
    let text_width = ((label.chars().count() as f32 * LABEL_CHAR_WIDTH) as u32).max(1);
    let label_y = (y - LABEL_TEXT_HEIGHT).max(0);
    let bg = Rect::at(x, label_y).of_size(text_width, LABEL_TEXT_HEIGHT as u32);
    draw_filled_rect_mut(image, bg, Rgb(self.box_color));
    draw_text_mut(
      image,
      Rgb([255, 255, 255]),
      x,
      label_y + 2,
      PxScale::from(self.font_size),
      font,
      &label,
    );
  }
}
