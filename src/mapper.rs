// 该文件是 Shanan （山南西风） 项目的一部分。
// src/mapper.rs - 张量坐标到屏幕坐标的映射
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

//! # 坐标映射
//!
//! 检测器输出的边框位于缩放后的张量坐标系中，本模块把它们映射到预览画面的像素坐标，
//! 同时考虑屏幕方向、前后摄像头镜像以及平台的宽高比约定。
//!
//! 两种模式：
//!
//! - [`MappingMode::Legacy`]: 与移动端旧版行为逐位一致。镜像条件为
//!   “平台硬件镜像 **或** 后置摄像头”，镜像时只翻转左上角 x，宽高不缩放。
//! - [`MappingMode::Corrected`]: 镜像条件为两者异或，翻转时计入框宽，宽高与 x/y 同比例缩放。

use clap::ValueEnum;
use serde::Serialize;

use crate::{
  detector::Detection,
  orientation::{CameraFacing, DisplayContext, Orientation},
  platform::Platform,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize)]
pub enum MappingMode {
  #[default]
  Legacy,
  Corrected,
}

/// 预览视口尺寸，按竖屏给出
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
  pub width: f32,
  pub height: f32,
}

impl Viewport {
  pub fn new(width: f32, height: f32) -> Self {
    Self { width, height }
  }

  /// 按平台宽高比从屏幕宽度推出预览尺寸
  pub fn for_screen(platform: Platform, screen_width: f32) -> Self {
    Self {
      width: screen_width,
      height: screen_width / platform.aspect_ratio(),
    }
  }

  /// 给定方向下屏幕 x/y 轴的跨度；横屏时预览容器宽高互换
  pub fn oriented(&self, orientation: Orientation) -> (f32, f32) {
    if orientation.is_portrait() {
      (self.width, self.height)
    } else {
      (self.height, self.width)
    }
  }
}

/// 屏幕坐标下的矩形
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScreenRect {
  pub label: String,
  pub score: f32,
  pub x: f32,
  pub y: f32,
  pub width: f32,
  pub height: f32,
}

/// 当前方向下的有效张量尺寸 (宽, 高)
///
/// 软件旋转纹理的平台在横屏时交换张量宽高，否则画面会被过度拉伸。
pub fn tensor_dims(platform: Platform, orientation: Orientation) -> (f32, f32) {
  let (w, h) = platform.tensor_size();
  if orientation.is_portrait() || !platform.rotates_in_software() {
    (w, h)
  } else {
    (h, w)
  }
}

/// 是否需要水平镜像
pub fn mirrors_x(platform: Platform, facing: CameraFacing, mode: MappingMode) -> bool {
  let back = facing == CameraFacing::Back;
  match mode {
    MappingMode::Legacy => platform.mirrors_in_hardware() || back,
    MappingMode::Corrected => platform.mirrors_in_hardware() ^ back,
  }
}

/// 相机源需要对纹理施加的旋转角度（度）
///
/// 硬件已旋转的平台总是 0。
pub fn texture_rotation_degrees(
  platform: Platform,
  orientation: Orientation,
  facing: CameraFacing,
) -> u32 {
  if !platform.rotates_in_software() {
    return 0;
  }
  match (orientation, facing) {
    (Orientation::PortraitDown, _) => 180,
    (Orientation::LandscapeLeft, CameraFacing::Front) => 270,
    (Orientation::LandscapeLeft, CameraFacing::Back) => 90,
    (Orientation::LandscapeRight, CameraFacing::Front) => 90,
    (Orientation::LandscapeRight, CameraFacing::Back) => 270,
    (Orientation::PortraitUp, _) => 0,
  }
}

/// 坐标映射器，无内部状态
#[derive(Debug, Clone, Copy)]
pub struct CoordinateMapper {
  pub platform: Platform,
  pub viewport: Viewport,
  pub mode: MappingMode,
}

impl CoordinateMapper {
  pub fn new(platform: Platform, viewport: Viewport, mode: MappingMode) -> Self {
    Self {
      platform,
      viewport,
      mode,
    }
  }

  pub fn map(&self, detection: &Detection, ctx: DisplayContext) -> ScreenRect {
    let (tensor_w, tensor_h) = tensor_dims(self.platform, ctx.orientation);
    let (span_x, span_y) = self.viewport.oriented(ctx.orientation);
    let [x, y, w, h] = detection.bbox;

    let flip = mirrors_x(self.platform, ctx.facing, self.mode);
    let x = match (flip, self.mode) {
      (false, _) => x,
      (true, MappingMode::Legacy) => tensor_w - x,
      (true, MappingMode::Corrected) => tensor_w - x - w,
    };

    let (width, height) = match self.mode {
      MappingMode::Legacy => (w, h),
      MappingMode::Corrected => (w * span_x / tensor_w, h * span_y / tensor_h),
    };

    ScreenRect {
      label: detection.label.clone(),
      score: detection.score,
      x: x * span_x / tensor_w,
      y: y * span_y / tensor_h,
      width,
      height,
    }
  }

  pub fn map_all(&self, detections: &[Detection], ctx: DisplayContext) -> Vec<ScreenRect> {
    detections.iter().map(|d| self.map(d, ctx)).collect()
  }
}
