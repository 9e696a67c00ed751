// 该文件是 Shanan （山南西风） 项目的一部分。
// src/orientation.rs - 屏幕方向与相机朝向
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

use std::sync::Arc;

use clap::ValueEnum;
use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize)]
pub enum Orientation {
  #[default]
  PortraitUp,
  PortraitDown,
  LandscapeLeft,
  LandscapeRight,
}

impl Orientation {
  pub const ALL: [Orientation; 4] = [
    Orientation::PortraitUp,
    Orientation::PortraitDown,
    Orientation::LandscapeLeft,
    Orientation::LandscapeRight,
  ];

  pub fn is_portrait(self) -> bool {
    matches!(self, Orientation::PortraitUp | Orientation::PortraitDown)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize)]
pub enum CameraFacing {
  #[default]
  Front,
  Back,
}

impl CameraFacing {
  pub fn toggled(self) -> Self {
    match self {
      CameraFacing::Front => CameraFacing::Back,
      CameraFacing::Back => CameraFacing::Front,
    }
  }
}

/// 每帧映射坐标时使用的显示上下文
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct DisplayContext {
  pub orientation: Orientation,
  pub facing: CameraFacing,
}

#[derive(Error, Debug)]
pub enum SensorError {
  #[error("方向传感器不可用: {0}")]
  Unavailable(String),
}

pub type OrientationListener = Box<dyn Fn(Orientation) + Send + Sync>;

/// 方向传感器
pub trait OrientationSensor {
  /// 查询当前方向
  fn current(&self) -> Result<Orientation, SensorError>;
  /// 注册方向变化回调
  fn subscribe(&self, listener: OrientationListener);
}

/// 方向状态的唯一持有者
///
/// 方向由传感器回调写入，相机朝向由用户切换写入，最后写入者生效；
/// 帧循环与渲染通过 [`watch::Receiver`] 读取快照。
#[derive(Clone)]
pub struct OrientationTracker {
  state: Arc<watch::Sender<DisplayContext>>,
}

impl OrientationTracker {
  pub fn new(facing: CameraFacing) -> Self {
    let (state, _) = watch::channel(DisplayContext {
      orientation: Orientation::default(),
      facing,
    });
    Self {
      state: Arc::new(state),
    }
  }

  /// 读取一次初始方向并订阅后续变化
  ///
  /// 查询失败时回退到默认方向。
  pub fn start<S: OrientationSensor + ?Sized>(&self, sensor: &S) -> Orientation {
    let initial = match sensor.current() {
      Ok(orientation) => orientation,
      Err(e) => {
        warn!("查询屏幕方向失败，使用默认方向: {}", e);
        Orientation::default()
      }
    };
    self.set_orientation(initial);
    info!("初始屏幕方向: {:?}", initial);

    let state = self.state.clone();
    sensor.subscribe(Box::new(move |orientation| {
      debug!("屏幕方向变化: {:?}", orientation);
      state.send_modify(|ctx| ctx.orientation = orientation);
    }));

    initial
  }

  pub fn context(&self) -> DisplayContext {
    *self.state.borrow()
  }

  pub fn watch(&self) -> watch::Receiver<DisplayContext> {
    self.state.subscribe()
  }

  pub fn set_orientation(&self, orientation: Orientation) {
    self.state.send_modify(|ctx| ctx.orientation = orientation);
  }

  pub fn set_facing(&self, facing: CameraFacing) {
    self.state.send_modify(|ctx| ctx.facing = facing);
  }

  /// 切换前后摄像头，返回切换后的朝向
  pub fn toggle_facing(&self) -> CameraFacing {
    let mut facing = CameraFacing::default();
    self.state.send_modify(|ctx| {
      ctx.facing = ctx.facing.toggled();
      facing = ctx.facing;
    });
    info!("切换摄像头: {:?}", facing);
    facing
  }
}

/// 手动设置方向的传感器，用于桌面环境与测试
#[derive(Default)]
pub struct FixedSensor {
  orientation: Mutex<Option<Orientation>>,
  listeners: Mutex<Vec<Arc<dyn Fn(Orientation) + Send + Sync>>>,
}

impl FixedSensor {
  pub fn new(orientation: Orientation) -> Self {
    Self {
      orientation: Mutex::new(Some(orientation)),
      listeners: Mutex::new(Vec::new()),
    }
  }

  /// 没有可用方向的传感器，查询总是失败
  pub fn unavailable() -> Self {
    Self::default()
  }

  /// 更新方向并通知所有订阅者
  ///
  /// 回调在锁外执行，回调内可以再次订阅；新订阅者从下一次变化开始收到通知。
  pub fn set(&self, orientation: Orientation) {
    *self.orientation.lock() = Some(orientation);
    let listeners = self.listeners.lock().clone();
    for listener in listeners.iter() {
      listener(orientation);
    }
  }
}

impl OrientationSensor for FixedSensor {
  fn current(&self) -> Result<Orientation, SensorError> {
    let current = *self.orientation.lock();
    current.ok_or_else(|| SensorError::Unavailable("未设置方向".to_string()))
  }

  fn subscribe(&self, listener: OrientationListener) {
    self.listeners.lock().push(Arc::from(listener));
  }
}

#[cfg(test)]
mod tests {
  use std::sync::atomic::{AtomicUsize, Ordering};

  use super::*;

  #[test]
  fn listener_may_subscribe_during_notification() {
    let sensor = Arc::new(FixedSensor::new(Orientation::PortraitUp));
    let late_calls = Arc::new(AtomicUsize::new(0));

    let weak = Arc::downgrade(&sensor);
    let counter = late_calls.clone();
    sensor.subscribe(Box::new(move |_| {
      if let Some(sensor) = weak.upgrade() {
        let counter = counter.clone();
        sensor.subscribe(Box::new(move |_| {
          counter.fetch_add(1, Ordering::SeqCst);
        }));
      }
    }));

    sensor.set(Orientation::LandscapeLeft);
    assert_eq!(sensor.listeners.lock().len(), 2);
    assert_eq!(late_calls.load(Ordering::SeqCst), 0);

    sensor.set(Orientation::PortraitDown);
    assert_eq!(sensor.listeners.lock().len(), 3);
    assert_eq!(late_calls.load(Ordering::SeqCst), 1);
    assert_eq!(sensor.current().unwrap(), Orientation::PortraitDown);
  }

  #[test]
  fn start_reads_initial_orientation() {
    let tracker = OrientationTracker::new(CameraFacing::Front);
    let sensor = FixedSensor::new(Orientation::LandscapeLeft);
    assert_eq!(tracker.start(&sensor), Orientation::LandscapeLeft);
    assert_eq!(tracker.context().orientation, Orientation::LandscapeLeft);
  }

  #[test]
  fn failed_query_falls_back_to_default() {
    let tracker = OrientationTracker::new(CameraFacing::Back);
    tracker.set_orientation(Orientation::LandscapeRight);
    let sensor = FixedSensor::unavailable();
    assert_eq!(tracker.start(&sensor), Orientation::PortraitUp);
    assert_eq!(
      tracker.context(),
      DisplayContext {
        orientation: Orientation::PortraitUp,
        facing: CameraFacing::Back,
      }
    );
  }

  #[test]
  fn subscription_is_last_writer_wins() {
    let tracker = OrientationTracker::new(CameraFacing::Front);
    let sensor = FixedSensor::new(Orientation::PortraitUp);
    tracker.start(&sensor);
    let mut rx = tracker.watch();

    sensor.set(Orientation::LandscapeLeft);
    sensor.set(Orientation::PortraitDown);

    assert!(rx.has_changed().unwrap());
    assert_eq!(rx.borrow_and_update().orientation, Orientation::PortraitDown);
  }

  #[test]
  fn toggle_facing_flips() {
    let tracker = OrientationTracker::new(CameraFacing::Front);
    assert_eq!(tracker.toggle_facing(), CameraFacing::Back);
    assert_eq!(tracker.toggle_facing(), CameraFacing::Front);
    tracker.set_facing(CameraFacing::Back);
    assert_eq!(tracker.context().facing, CameraFacing::Back);
    assert!(Orientation::PortraitDown.is_portrait());
    assert!(!Orientation::LandscapeRight.is_portrait());
  }
}
