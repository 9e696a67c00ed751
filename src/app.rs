// 该文件是 Shanan （山南西风） 项目的一部分。
// src/app.rs - 启动流程与界面状态
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

use std::{
  fs::File,
  io::{self, ErrorKind},
  path::PathBuf,
  sync::Arc,
};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::{
  config::{ConfigError, OverlayConfig},
  detector::{DetectorError, LazyDetector, ModelLoader, ReadyFlag},
  orientation::{OrientationSensor, OrientationTracker},
  task::FrameLoop,
};

/// 界面状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppState {
  /// 正在加载模型
  Loading,
  /// 相机权限未授予，停留在此状态直到重新启动
  AwaitingPermission,
  Running,
  Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionStatus {
  Granted,
  Denied,
}

/// 相机无法使用，且原因不是权限
#[derive(Error, Debug)]
pub enum PermissionError {
  #[error("无法打开摄像头 {path}: {source}")]
  Device {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

#[async_trait(?Send)]
pub trait CameraPermission {
  /// 只有用户拒绝授权时返回 `Ok(Denied)`；设备缺失、被占用等返回错误
  async fn request(&self) -> Result<PermissionStatus, PermissionError>;
}

/// 不做检查，用于合成帧源与图片帧源
pub struct AlwaysGranted;

#[async_trait(?Send)]
impl CameraPermission for AlwaysGranted {
  async fn request(&self) -> Result<PermissionStatus, PermissionError> {
    Ok(PermissionStatus::Granted)
  }
}

/// 能以只读方式打开摄像头设备节点即视为已授权
pub struct DevicePermission {
  path: PathBuf,
}

impl DevicePermission {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self { path: path.into() }
  }
}

#[async_trait(?Send)]
impl CameraPermission for DevicePermission {
  async fn request(&self) -> Result<PermissionStatus, PermissionError> {
    match File::open(&self.path) {
      Ok(_) => Ok(PermissionStatus::Granted),
      Err(e) if e.kind() == ErrorKind::PermissionDenied => {
        warn!("没有访问 {} 的权限", self.path.display());
        Ok(PermissionStatus::Denied)
      }
      Err(source) => Err(PermissionError::Device {
        path: self.path.clone(),
        source,
      }),
    }
  }
}

#[derive(Error, Debug)]
pub enum AppError {
  #[error("相机权限被拒绝")]
  PermissionDenied,
  #[error("相机不可用: {0}")]
  Camera(#[from] PermissionError),
  #[error("模型加载失败: {0}")]
  ModelLoad(#[source] DetectorError),
  #[error("配置错误: {0}")]
  Config(#[from] ConfigError),
}

/// 应用外壳：持有配置、方向状态与界面状态
pub struct App {
  config: OverlayConfig,
  tracker: OrientationTracker,
  state: Arc<watch::Sender<AppState>>,
}

impl App {
  pub fn new(config: OverlayConfig) -> Result<Self, AppError> {
    config.validate()?;
    let tracker = OrientationTracker::new(config.facing);
    let (state, _) = watch::channel(AppState::Loading);
    Ok(Self {
      config,
      tracker,
      state: Arc::new(state),
    })
  }

  pub fn config(&self) -> &OverlayConfig {
    &self.config
  }

  pub fn tracker(&self) -> &OrientationTracker {
    &self.tracker
  }

  pub fn state(&self) -> AppState {
    self.state.borrow().clone()
  }

  pub fn watch_state(&self) -> watch::Receiver<AppState> {
    self.state.subscribe()
  }

  fn set_state(&self, state: AppState) {
    info!("界面状态: {:?}", state);
    self.state.send_replace(state);
  }

  /// 启动：读取方向、请求相机权限并加载模型
  ///
  /// 权限请求与模型加载同时进行；相机不可用与权限被拒绝都优先于加载失败。
  pub async fn prepare<S, P, L>(
    &self,
    sensor: &S,
    permission: &P,
    detector: &LazyDetector<L::Model>,
    loader: &L,
  ) -> Result<(), AppError>
  where
    S: OrientationSensor + ?Sized,
    P: CameraPermission + ?Sized,
    L: ModelLoader + ?Sized,
  {
    self.set_state(AppState::Loading);
    self.tracker.start(sensor);

    let (status, loaded) = tokio::join!(
      permission.request(),
      detector.load_with(loader, self.config.model_load_attempts)
    );

    match status {
      Ok(PermissionStatus::Granted) => {}
      Ok(PermissionStatus::Denied) => {
        self.set_state(AppState::AwaitingPermission);
        return Err(AppError::PermissionDenied);
      }
      Err(e) => {
        error!("{}", e);
        self.set_state(AppState::Failed(e.to_string()));
        return Err(e.into());
      }
    }
    if let Err(e) = loaded {
      error!("模型加载失败: {}", e);
      self.set_state(AppState::Failed(e.to_string()));
      return Err(AppError::ModelLoad(e));
    }

    self.set_state(AppState::Running);
    Ok(())
  }

  /// 按当前配置与方向状态创建帧循环
  pub fn frame_loop(&self, ready: ReadyFlag) -> FrameLoop {
    FrameLoop::new(&self.config, self.tracker.watch(), ready)
  }
}
