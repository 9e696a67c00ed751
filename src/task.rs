// 该文件是 Shanan （山南西风） 项目的一部分。
// src/task.rs - 帧循环
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

//! # 帧循环
//!
//! 逐帧取图、推理、映射到屏幕坐标、发布结果并请求重绘。
//!
//! 同一时刻最多只有一次推理在进行；推理失败或超时的帧被跳过，循环继续。
//! 取消后不会再发布任何结果，即使取消时有推理仍在进行。

use std::{
  sync::Arc,
  time::{Duration, Instant},
};

use serde::Serialize;
use thiserror::Error;
use tokio::{sync::watch, task::JoinHandle};
use tracing::{debug, info, warn};

use crate::{
  config::OverlayConfig,
  detector::{Detection, Detector, DetectorError, ReadyFlag},
  frame::RgbFrame,
  mapper::{CoordinateMapper, ScreenRect, tensor_dims},
  orientation::DisplayContext,
  output::Render,
};

/// 一次发布的叠加结果
#[derive(Debug, Clone, Serialize)]
pub struct OverlayFrame {
  /// 帧序号，从 1 开始
  pub index: u64,
  /// 映射时使用的方向与朝向
  pub context: DisplayContext,
  /// 模型输出（已按分数过滤）
  pub detections: Vec<Detection>,
  /// 屏幕坐标矩形，与 `detections` 一一对应
  pub rects: Vec<ScreenRect>,
  /// 推理耗时
  pub latency: Duration,
  /// 由推理耗时推出的帧率
  pub fps: u32,
}

/// `floor(1000 / 毫秒)`，耗时不足 1 毫秒按 1 毫秒计
pub fn fps_from_latency(latency: Duration) -> u32 {
  let millis = latency.as_millis().max(1);
  (1000 / millis) as u32
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
  Idle,
  Running,
  Stopped,
}

/// 帧循环的取消标记
///
/// 状态只会 Idle -> Running -> Stopped 单向变化，停止后不可重启。
#[derive(Clone)]
pub struct LoopControl {
  state: Arc<watch::Sender<LoopState>>,
}

impl Default for LoopControl {
  fn default() -> Self {
    Self::new()
  }
}

impl LoopControl {
  pub fn new() -> Self {
    let (state, _) = watch::channel(LoopState::Idle);
    Self {
      state: Arc::new(state),
    }
  }

  pub fn state(&self) -> LoopState {
    *self.state.borrow()
  }

  pub fn is_cancelled(&self) -> bool {
    self.state() == LoopState::Stopped
  }

  /// 请求停止，可重复调用；首次生效时返回 true
  pub fn cancel(&self) -> bool {
    let changed = self.stop();
    if changed {
      info!("帧循环已取消");
    }
    changed
  }

  /// 等待停止
  pub async fn cancelled(&self) {
    let mut rx = self.state.subscribe();
    let _ = rx.wait_for(|state| *state == LoopState::Stopped).await;
  }

  fn start(&self) -> bool {
    self.state.send_if_modified(|state| match state {
      LoopState::Idle => {
        *state = LoopState::Running;
        true
      }
      _ => false,
    })
  }

  fn stop(&self) -> bool {
    self.state.send_if_modified(|state| {
      if *state == LoopState::Stopped {
        false
      } else {
        *state = LoopState::Stopped;
        true
      }
    })
  }
}

#[derive(Error, Debug)]
pub enum LoopError {
  #[error("渲染失败: {0}")]
  Render(#[source] Box<dyn std::error::Error + Send + Sync>),
  #[error("帧循环任务异常退出: {0}")]
  Join(#[from] tokio::task::JoinError),
}

/// 帧循环结束时的统计
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct LoopSummary {
  /// 取到的帧数
  pub frames: u64,
  /// 发布的结果数
  pub published: u64,
  /// 推理失败或超时而跳过的帧数
  pub skipped: u64,
  /// 尺寸与当前方向下张量尺寸不符的帧数
  pub mismatched: u64,
  pub last_fps: u32,
}

pub struct FrameLoop {
  mapper: CoordinateMapper,
  context: watch::Receiver<DisplayContext>,
  ready: ReadyFlag,
  control: LoopControl,
  publisher: watch::Sender<Option<Arc<OverlayFrame>>>,
  inference_timeout: Option<Duration>,
  min_score: f32,
  max_frames: Option<u64>,
}

impl FrameLoop {
  pub fn new(
    config: &OverlayConfig,
    context: watch::Receiver<DisplayContext>,
    ready: ReadyFlag,
  ) -> Self {
    let (publisher, _) = watch::channel(None);
    Self {
      mapper: config.mapper(),
      context,
      ready,
      control: LoopControl::new(),
      publisher,
      inference_timeout: config.inference_timeout,
      min_score: config.min_score,
      max_frames: config.max_frames,
    }
  }

  pub fn with_frame_number(mut self, frame_number: Option<u64>) -> Self {
    self.max_frames = frame_number;
    self
  }

  pub fn control(&self) -> LoopControl {
    self.control.clone()
  }

  /// 订阅发布的结果，最新一帧覆盖旧帧
  pub fn subscribe(&self) -> watch::Receiver<Option<Arc<OverlayFrame>>> {
    self.publisher.subscribe()
  }

  /// 运行帧循环直到帧源结束、达到帧数上限或被取消
  ///
  /// 渲染失败会终止循环并返回错误；推理失败只跳过当前帧。
  pub async fn run<I, D, O>(
    &self,
    frames: I,
    detector: &D,
    output: &O,
  ) -> Result<LoopSummary, LoopError>
  where
    I: Iterator<Item = RgbFrame>,
    D: Detector + ?Sized,
    O: Render<RgbFrame, OverlayFrame>,
    O::Error: std::error::Error + Send + Sync + 'static,
  {
    let result = self.run_inner(frames, detector, output).await;
    self.control.stop();
    result
  }

  async fn run_inner<I, D, O>(
    &self,
    mut frames: I,
    detector: &D,
    output: &O,
  ) -> Result<LoopSummary, LoopError>
  where
    I: Iterator<Item = RgbFrame>,
    D: Detector + ?Sized,
    O: Render<RgbFrame, OverlayFrame>,
    O::Error: std::error::Error + Send + Sync + 'static,
  {
    let mut summary = LoopSummary::default();
    if !self.control.start() {
      info!("帧循环在启动前已取消");
      return Ok(summary);
    }

    if !self.ready.is_ready() {
      info!("等待模型就绪...");
      tokio::select! {
        _ = self.ready.wait() => {}
        _ = self.control.cancelled() => {
          info!("等待模型期间被取消");
          return Ok(summary);
        }
      }
    }
    info!("开始帧循环");

    loop {
      if self.control.is_cancelled() {
        break;
      }
      if self.max_frames.is_some_and(|n| summary.frames >= n) {
        info!("达到指定帧数 {}, 退出帧循环", summary.frames);
        break;
      }
      let Some(frame) = frames.next() else {
        info!("帧源已结束");
        break;
      };
      summary.frames += 1;
      let index = summary.frames;

      let now = Instant::now();
      let result = self.infer(detector, &frame).await;
      let latency = now.elapsed();

      // 推理期间可能已被取消，此时丢弃结果
      if self.control.is_cancelled() {
        debug!("丢弃第 {} 帧的在途结果", index);
        break;
      }

      let detections = match result {
        Ok(detections) => detections,
        Err(e) => {
          warn!("第 {} 帧推理失败，跳过: {}", index, e);
          summary.skipped += 1;
          tokio::task::yield_now().await;
          continue;
        }
      };

      let fps = fps_from_latency(latency);
      summary.last_fps = fps;

      let context = *self.context.borrow();
      let (tw, th) = tensor_dims(self.mapper.platform, context.orientation);
      if (frame.width(), frame.height()) != (tw as u32, th as u32) {
        if summary.mismatched == 0 {
          warn!(
            "帧尺寸 {}x{} 与张量尺寸 {}x{} 不符，矩形可能越出预览",
            frame.width(),
            frame.height(),
            tw,
            th
          );
        }
        summary.mismatched += 1;
      }
      let detections: Vec<Detection> = detections
        .into_iter()
        .filter(|d| d.score >= self.min_score)
        .collect();
      let rects = self.mapper.map_all(&detections, context);
      debug!(
        "第 {} 帧: {} 个目标, 耗时 {:.2?}",
        index,
        rects.len(),
        latency
      );

      let overlay = Arc::new(OverlayFrame {
        index,
        context,
        detections,
        rects,
        latency,
        fps,
      });
      self.publisher.send_replace(Some(overlay.clone()));
      summary.published += 1;

      output
        .render_result(&frame, &overlay)
        .map_err(|e| LoopError::Render(Box::new(e)))?;

      tokio::task::yield_now().await;
    }

    info!(
      "帧循环结束: 共 {} 帧, 发布 {} 帧, 跳过 {} 帧",
      summary.frames, summary.published, summary.skipped
    );
    Ok(summary)
  }

  async fn infer<D: Detector + ?Sized>(
    &self,
    detector: &D,
    frame: &RgbFrame,
  ) -> Result<Vec<Detection>, DetectorError> {
    match self.inference_timeout {
      Some(limit) => tokio::time::timeout(limit, detector.detect(frame))
        .await
        .unwrap_or(Err(DetectorError::Timeout(limit))),
      None => detector.detect(frame).await,
    }
  }

  /// 在当前 `LocalSet` 上启动帧循环
  pub fn spawn_local<I, D, O>(self, frames: I, detector: D, output: O) -> LoopHandle
  where
    I: Iterator<Item = RgbFrame> + 'static,
    D: Detector + 'static,
    O: Render<RgbFrame, OverlayFrame> + 'static,
    O::Error: std::error::Error + Send + Sync + 'static,
  {
    let control = self.control();
    let task = tokio::task::spawn_local(async move { self.run(frames, &detector, &output).await });
    LoopHandle {
      control,
      task: Some(task),
    }
  }
}

/// 已启动的帧循环
///
/// 丢弃句柄会取消循环，循环在下一个检查点退出。
pub struct LoopHandle {
  control: LoopControl,
  task: Option<JoinHandle<Result<LoopSummary, LoopError>>>,
}

impl LoopHandle {
  pub fn control(&self) -> LoopControl {
    self.control.clone()
  }

  pub fn cancel(&self) -> bool {
    self.control.cancel()
  }

  pub async fn join(mut self) -> Result<LoopSummary, LoopError> {
    match self.task.take() {
      Some(task) => task.await?,
      None => Ok(LoopSummary::default()),
    }
  }
}

impl Drop for LoopHandle {
  fn drop(&mut self) {
    if self.task.is_some() {
      self.control.cancel();
    }
  }
}

#[cfg(test)]
mod tests {
  use std::{cell::Cell, rc::Rc};

  use async_trait::async_trait;
  use tokio::sync::Notify;

  use super::*;
  use crate::{
    frame::Layout,
    orientation::{CameraFacing, Orientation, OrientationTracker},
    output::OutputError,
    platform::Platform,
  };

  fn frames(n: usize) -> impl Iterator<Item = RgbFrame> {
    (0..n).map(|_| RgbFrame::zeroed(4, 4, Layout::Nhwc).unwrap())
  }

  fn config() -> OverlayConfig {
    OverlayConfig {
      platform: Platform::Ios,
      screen_width: 360.0,
      ..Default::default()
    }
  }

  struct NullOutput;

  impl Render<RgbFrame, OverlayFrame> for NullOutput {
    type Error = OutputError;

    fn render_result(&self, _frame: &RgbFrame, _result: &OverlayFrame) -> Result<(), Self::Error> {
      Ok(())
    }
  }

  struct FailingOutput;

  impl Render<RgbFrame, OverlayFrame> for FailingOutput {
    type Error = OutputError;

    fn render_result(&self, _frame: &RgbFrame, _result: &OverlayFrame) -> Result<(), Self::Error> {
      Err(OutputError::SchemeMismatch)
    }
  }

  /// 渲染时检查结果已先发布
  struct CheckPublished {
    rx: watch::Receiver<Option<Arc<OverlayFrame>>>,
    renders: Cell<u64>,
  }

  impl Render<RgbFrame, OverlayFrame> for CheckPublished {
    type Error = OutputError;

    fn render_result(&self, _frame: &RgbFrame, result: &OverlayFrame) -> Result<(), Self::Error> {
      let published = self.rx.borrow().as_ref().map(|o| o.index);
      assert_eq!(published, Some(result.index));
      self.renders.set(self.renders.get() + 1);
      Ok(())
    }
  }

  struct CountingDetector {
    calls: Cell<u32>,
    ready: ReadyFlag,
    calls_before_ready: Cell<u32>,
  }

  #[async_trait(?Send)]
  impl Detector for CountingDetector {
    async fn detect(&self, _frame: &RgbFrame) -> Result<Vec<Detection>, DetectorError> {
      self.calls.set(self.calls.get() + 1);
      if !self.ready.is_ready() {
        self.calls_before_ready.set(self.calls_before_ready.get() + 1);
      }
      Ok(vec![Detection::new("cup", 0.9, [20.0, 10.0, 10.0, 10.0])])
    }
  }

  /// 奇数次调用失败
  struct FlakyDetector {
    calls: Cell<u32>,
  }

  #[async_trait(?Send)]
  impl Detector for FlakyDetector {
    async fn detect(&self, _frame: &RgbFrame) -> Result<Vec<Detection>, DetectorError> {
      self.calls.set(self.calls.get() + 1);
      if self.calls.get() % 2 == 1 {
        return Err(DetectorError::Inference("张量无效".to_string()));
      }
      Ok(vec![
        Detection::new("cup", 0.9, [0.0, 0.0, 10.0, 10.0]),
        Detection::new("dog", 0.1, [0.0, 0.0, 10.0, 10.0]),
      ])
    }
  }

  /// 推理一直挂起，直到被放行
  struct GatedDetector {
    gate: Rc<Notify>,
    calls: Cell<u32>,
  }

  #[async_trait(?Send)]
  impl Detector for GatedDetector {
    async fn detect(&self, _frame: &RgbFrame) -> Result<Vec<Detection>, DetectorError> {
      self.calls.set(self.calls.get() + 1);
      self.gate.notified().await;
      Ok(vec![Detection::new("cup", 0.9, [0.0, 0.0, 10.0, 10.0])])
    }
  }

  struct SlowDetector;

  #[async_trait(?Send)]
  impl Detector for SlowDetector {
    async fn detect(&self, _frame: &RgbFrame) -> Result<Vec<Detection>, DetectorError> {
      tokio::time::sleep(Duration::from_millis(200)).await;
      Ok(vec![])
    }
  }

  #[test]
  fn fps_from_latency_values() {
    assert_eq!(fps_from_latency(Duration::ZERO), 1000);
    assert_eq!(fps_from_latency(Duration::from_millis(3)), 333);
    assert_eq!(fps_from_latency(Duration::from_millis(50)), 20);
    assert_eq!(fps_from_latency(Duration::from_millis(1500)), 0);
  }

  #[test]
  fn cancel_is_idempotent() {
    let control = LoopControl::new();
    assert_eq!(control.state(), LoopState::Idle);
    assert!(control.cancel());
    assert!(!control.cancel());
    assert!(control.is_cancelled());
    assert!(!control.start());
  }

  #[tokio::test]
  async fn publishes_before_render() {
    let tracker = OrientationTracker::new(CameraFacing::Front);
    let frame_loop = FrameLoop::new(&config(), tracker.watch(), ReadyFlag::ready());
    let output = CheckPublished {
      rx: frame_loop.subscribe(),
      renders: Cell::new(0),
    };
    let detector = CountingDetector {
      calls: Cell::new(0),
      ready: ReadyFlag::ready(),
      calls_before_ready: Cell::new(0),
    };

    let summary = frame_loop.run(frames(3), &detector, &output).await.unwrap();
    assert_eq!(summary.frames, 3);
    assert_eq!(summary.published, 3);
    assert_eq!(output.renders.get(), 3);
    assert!(frame_loop.control().is_cancelled());

    let last = frame_loop.subscribe().borrow().clone().unwrap();
    assert_eq!(last.index, 3);
    // iOS 竖屏 360x640, 张量 180x320，前置摄像头不镜像
    assert_eq!(last.rects[0].x, 40.0);
    assert_eq!(last.rects[0].y, 20.0);
  }

  #[tokio::test]
  async fn counts_frames_off_tensor_size() {
    let sized = |w, h, n| (0..n).map(move |_| RgbFrame::zeroed(w, h, Layout::Nhwc).unwrap());
    let android = OverlayConfig {
      platform: Platform::Android,
      ..Default::default()
    };
    let detector = CountingDetector {
      calls: Cell::new(0),
      ready: ReadyFlag::ready(),
      calls_before_ready: Cell::new(0),
    };

    // Android 张量为 180x240，竖屏 180x320 的帧会越出预览
    let tracker = OrientationTracker::new(CameraFacing::Front);
    let frame_loop = FrameLoop::new(&android, tracker.watch(), ReadyFlag::ready());
    let summary = frame_loop
      .run(sized(180, 320, 2), &detector, &NullOutput)
      .await
      .unwrap();
    assert_eq!(summary.published, 2);
    assert_eq!(summary.mismatched, 2);

    let frame_loop = FrameLoop::new(&android, tracker.watch(), ReadyFlag::ready());
    let summary = frame_loop
      .run(sized(180, 240, 2), &detector, &NullOutput)
      .await
      .unwrap();
    assert_eq!(summary.mismatched, 0);
  }

  #[tokio::test]
  async fn uses_latest_orientation() {
    let tracker = OrientationTracker::new(CameraFacing::Back);
    let frame_loop = FrameLoop::new(&config(), tracker.watch(), ReadyFlag::ready())
      .with_frame_number(Some(1));
    tracker.set_orientation(Orientation::LandscapeLeft);
    let detector = CountingDetector {
      calls: Cell::new(0),
      ready: ReadyFlag::ready(),
      calls_before_ready: Cell::new(0),
    };
    frame_loop
      .run(frames(5), &detector, &NullOutput)
      .await
      .unwrap();

    let last = frame_loop.subscribe().borrow().clone().unwrap();
    assert_eq!(last.context.orientation, Orientation::LandscapeLeft);
    assert_eq!(detector.calls.get(), 1);
  }

  #[tokio::test]
  async fn survives_inference_failures() {
    let tracker = OrientationTracker::new(CameraFacing::Front);
    let config = OverlayConfig {
      min_score: 0.5,
      ..config()
    };
    let frame_loop = FrameLoop::new(&config, tracker.watch(), ReadyFlag::ready());
    let detector = FlakyDetector {
      calls: Cell::new(0),
    };

    let summary = frame_loop
      .run(frames(4), &detector, &NullOutput)
      .await
      .unwrap();
    assert_eq!(detector.calls.get(), 4);
    assert_eq!(summary.skipped, 2);
    assert_eq!(summary.published, 2);

    let last = frame_loop.subscribe().borrow().clone().unwrap();
    assert_eq!(last.index, 4);
    assert_eq!(last.detections.len(), 1);
    assert_eq!(last.rects.len(), 1);
    assert_eq!(last.rects[0].label, "cup");
  }

  #[tokio::test]
  async fn timeout_skips_frame() {
    let tracker = OrientationTracker::new(CameraFacing::Front);
    let config = OverlayConfig {
      inference_timeout: Some(Duration::from_millis(10)),
      ..config()
    };
    let frame_loop = FrameLoop::new(&config, tracker.watch(), ReadyFlag::ready());
    let summary = frame_loop
      .run(frames(2), &SlowDetector, &NullOutput)
      .await
      .unwrap();
    assert_eq!(summary.skipped, 2);
    assert_eq!(summary.published, 0);
    assert!(frame_loop.subscribe().borrow().is_none());
  }

  #[tokio::test]
  async fn render_failure_stops_loop() {
    let tracker = OrientationTracker::new(CameraFacing::Front);
    let frame_loop = FrameLoop::new(&config(), tracker.watch(), ReadyFlag::ready());
    let detector = CountingDetector {
      calls: Cell::new(0),
      ready: ReadyFlag::ready(),
      calls_before_ready: Cell::new(0),
    };
    let result = frame_loop.run(frames(3), &detector, &FailingOutput).await;
    assert!(matches!(result, Err(LoopError::Render(_))));
    assert_eq!(detector.calls.get(), 1);
    assert!(frame_loop.control().is_cancelled());
  }

  #[tokio::test]
  async fn waits_for_ready_before_detecting() {
    let tracker = OrientationTracker::new(CameraFacing::Front);
    let ready = ReadyFlag::new();
    let frame_loop =
      FrameLoop::new(&config(), tracker.watch(), ready.clone()).with_frame_number(Some(2));
    let detector = CountingDetector {
      calls: Cell::new(0),
      ready: ready.clone(),
      calls_before_ready: Cell::new(0),
    };

    let run = frame_loop.run(frames(10), &detector, &NullOutput);
    let load = async {
      for _ in 0..5 {
        tokio::task::yield_now().await;
      }
      assert_eq!(detector.calls.get(), 0);
      ready.set();
    };
    let (summary, _) = tokio::join!(run, load);

    let summary = summary.unwrap();
    assert_eq!(summary.published, 2);
    assert_eq!(detector.calls.get(), 2);
    assert_eq!(detector.calls_before_ready.get(), 0);
  }

  #[tokio::test]
  async fn cancel_while_waiting_for_ready() {
    let tracker = OrientationTracker::new(CameraFacing::Front);
    let frame_loop = FrameLoop::new(&config(), tracker.watch(), ReadyFlag::new());
    let control = frame_loop.control();
    let detector = FlakyDetector {
      calls: Cell::new(0),
    };

    let run = frame_loop.run(frames(10), &detector, &NullOutput);
    let cancel = async {
      tokio::task::yield_now().await;
      control.cancel();
    };
    let (summary, _) = tokio::join!(run, cancel);
    assert_eq!(summary.unwrap(), LoopSummary::default());
    assert_eq!(detector.calls.get(), 0);
  }

  #[tokio::test]
  async fn cancel_during_inference_drops_result() {
    let tracker = OrientationTracker::new(CameraFacing::Front);
    let frame_loop = FrameLoop::new(&config(), tracker.watch(), ReadyFlag::ready());
    let control = frame_loop.control();
    let published = frame_loop.subscribe();
    let gate = Rc::new(Notify::new());
    let detector = GatedDetector {
      gate: gate.clone(),
      calls: Cell::new(0),
    };

    let run = frame_loop.run(frames(10), &detector, &NullOutput);
    let cancel = async {
      while detector.calls.get() == 0 {
        tokio::task::yield_now().await;
      }
      control.cancel();
      gate.notify_one();
    };
    let (summary, _) = tokio::join!(run, cancel);

    let summary = summary.unwrap();
    assert_eq!(summary.frames, 1);
    assert_eq!(summary.published, 0);
    assert_eq!(detector.calls.get(), 1);
    assert!(!published.has_changed().unwrap());
  }

  #[tokio::test]
  async fn dropping_handle_cancels() {
    let local = tokio::task::LocalSet::new();
    local
      .run_until(async {
        let tracker = OrientationTracker::new(CameraFacing::Front);
        let frame_loop = FrameLoop::new(&config(), tracker.watch(), ReadyFlag::new());
        let handle = frame_loop.spawn_local(
          frames(10),
          FlakyDetector {
            calls: Cell::new(0),
          },
          NullOutput,
        );
        let control = handle.control();
        drop(handle);
        assert!(control.is_cancelled());
      })
      .await;
  }

  #[tokio::test]
  async fn spawned_loop_joins() {
    let local = tokio::task::LocalSet::new();
    local
      .run_until(async {
        let tracker = OrientationTracker::new(CameraFacing::Front);
        let frame_loop = FrameLoop::new(&config(), tracker.watch(), ReadyFlag::ready());
        let handle = frame_loop.spawn_local(
          frames(3),
          FlakyDetector {
            calls: Cell::new(0),
          },
          NullOutput,
        );
        let summary = handle.join().await.unwrap();
        assert_eq!(summary.frames, 3);
        assert_eq!(summary.published, 1);
      })
      .await;
  }
}
