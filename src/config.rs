// 该文件是 Shanan （山南西风） 项目的一部分。
// src/config.rs - 运行配置
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

use std::time::Duration;

use thiserror::Error;

use crate::{
  mapper::{CoordinateMapper, MappingMode, Viewport},
  orientation::CameraFacing,
  platform::Platform,
};

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
  #[error("屏幕宽度必须为正数: {0}")]
  ScreenWidth(f32),
  #[error("置信度阈值必须在 [0, 1] 之间: {0}")]
  MinScore(f32),
  #[error("推理超时必须大于 0")]
  ZeroTimeout,
  #[error("模型加载次数至少为 1")]
  ZeroAttempts,
}

/// 叠加层运行配置
#[derive(Debug, Clone)]
pub struct OverlayConfig {
  /// 相机平台约定
  pub platform: Platform,
  /// 坐标映射模式
  pub mapping_mode: MappingMode,
  /// 初始摄像头朝向
  pub facing: CameraFacing,
  /// 屏幕宽度（竖屏像素），预览高度按平台宽高比推出
  pub screen_width: f32,
  /// 单帧推理超时，超时的帧被跳过
  pub inference_timeout: Option<Duration>,
  /// 低于该分数的检测不绘制
  pub min_score: f32,
  /// 模型加载最多尝试次数
  pub model_load_attempts: u32,
  /// 最多处理的帧数
  pub max_frames: Option<u64>,
}

impl Default for OverlayConfig {
  fn default() -> Self {
    Self {
      platform: Platform::Android,
      mapping_mode: MappingMode::Legacy,
      facing: CameraFacing::Front,
      screen_width: 360.0,
      inference_timeout: None,
      min_score: 0.0,
      model_load_attempts: 1,
      max_frames: None,
    }
  }
}

impl OverlayConfig {
  pub fn validate(&self) -> Result<(), ConfigError> {
    if !(self.screen_width.is_finite() && self.screen_width > 0.0) {
      return Err(ConfigError::ScreenWidth(self.screen_width));
    }
    if !(0.0..=1.0).contains(&self.min_score) {
      return Err(ConfigError::MinScore(self.min_score));
    }
    if self.inference_timeout.is_some_and(|t| t.is_zero()) {
      return Err(ConfigError::ZeroTimeout);
    }
    if self.model_load_attempts == 0 {
      return Err(ConfigError::ZeroAttempts);
    }
    Ok(())
  }

  pub fn viewport(&self) -> Viewport {
    Viewport::for_screen(self.platform, self.screen_width)
  }

  pub fn mapper(&self) -> CoordinateMapper {
    CoordinateMapper::new(self.platform, self.viewport(), self.mapping_mode)
  }
}
