// 该文件是 Shanan （山南西风） 项目的一部分。
// src/platform.rs - 平台相关的相机约定
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

use clap::ValueEnum;

/// 张量宽度（竖屏），高度由平台宽高比推出
pub const TENSOR_WIDTH: f32 = 180.0;

/// 相机平台族
///
/// - `Ios`: 传感器输出不随设备旋转，需要软件旋转纹理；预览为 16:9
/// - `Android`: 硬件已旋转并镜像；预览为 4:3
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Platform {
  Ios,
  Android,
}

impl Platform {
  /// 传感器输出是否需要在软件中旋转
  pub fn rotates_in_software(self) -> bool {
    matches!(self, Platform::Ios)
  }

  /// 平台是否总是在硬件中做水平镜像
  pub fn mirrors_in_hardware(self) -> bool {
    matches!(self, Platform::Android)
  }

  /// 预览的宽高比 (宽 / 高，竖屏)
  pub fn aspect_ratio(self) -> f32 {
    match self {
      Platform::Ios => 9.0 / 16.0,
      Platform::Android => 3.0 / 4.0,
    }
  }

  /// 竖屏下送入检测器的张量尺寸 (宽, 高)
  pub fn tensor_size(self) -> (f32, f32) {
    (TENSOR_WIDTH, TENSOR_WIDTH / self.aspect_ratio())
  }

  /// 相机纹理的原生尺寸 (宽, 高)
  pub fn texture_size(self) -> (u32, u32) {
    match self {
      Platform::Ios => (1080, 1920),
      Platform::Android => (1600, 1200),
    }
  }
}
