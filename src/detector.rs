// 该文件是 Shanan （山南西风） 项目的一部分。
// src/detector.rs - 检测器封装
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

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{OnceCell, watch};
use tracing::{debug, info, warn};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, frame::RgbFrame};

mod replay;
pub use self::replay::{ReplayDetector, ReplayLoader};

#[cfg(feature = "onnx_detector")]
mod onnx;
#[cfg(feature = "onnx_detector")]
pub use self::onnx::{COCO_CLASSES, EndToEndDecoder, OnnxDetector, OnnxLoader};

/// 单个检测结果，边框为张量坐标 [x, y, width, height]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
  pub label: String,
  pub score: f32,
  pub bbox: [f32; 4],
}

impl Detection {
  pub fn new(label: impl Into<String>, score: f32, bbox: [f32; 4]) -> Self {
    Self {
      label: label.into(),
      score,
      bbox,
    }
  }
}

#[derive(Error, Debug)]
pub enum DetectorError {
  #[error("模型尚未加载完成")]
  NotReady,
  #[error("模型加载错误: {0}")]
  Load(String),
  #[error("推理错误: {0}")]
  Inference(String),
  #[error("推理超时 ({0:?})")]
  Timeout(std::time::Duration),
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("记录解析错误: {0}")]
  Json(#[from] serde_json::Error),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

/// 检测器：输入一帧图像，按模型原始顺序返回检测结果
///
/// 帧循环在单线程协作调度上运行，因此不要求 `Send`。
#[async_trait(?Send)]
pub trait Detector {
  async fn detect(&self, frame: &RgbFrame) -> Result<Vec<Detection>, DetectorError>;
}

#[async_trait(?Send)]
impl<D: Detector + ?Sized> Detector for std::rc::Rc<D> {
  async fn detect(&self, frame: &RgbFrame) -> Result<Vec<Detection>, DetectorError> {
    (**self).detect(frame).await
  }
}

/// 一次性异步加载模型
#[async_trait(?Send)]
pub trait ModelLoader {
  type Model: Detector;
  async fn load(&self) -> Result<Self::Model, DetectorError>;
}

/// 模型就绪标志，只会从未就绪变为就绪一次
#[derive(Clone)]
pub struct ReadyFlag {
  state: Arc<watch::Sender<bool>>,
}

impl Default for ReadyFlag {
  fn default() -> Self {
    Self::new()
  }
}

impl ReadyFlag {
  pub fn new() -> Self {
    let (state, _) = watch::channel(false);
    Self {
      state: Arc::new(state),
    }
  }

  /// 已就绪的标志，用于无需加载的检测器
  pub fn ready() -> Self {
    let flag = Self::new();
    flag.set();
    flag
  }

  /// 置为就绪，首次设置时返回 true
  pub fn set(&self) -> bool {
    self.state.send_if_modified(|ready| {
      if *ready {
        false
      } else {
        *ready = true;
        true
      }
    })
  }

  pub fn is_ready(&self) -> bool {
    *self.state.borrow()
  }

  /// 等待就绪
  pub async fn wait(&self) {
    let mut rx = self.state.subscribe();
    // 发送端由自身持有，不会关闭
    let _ = rx.wait_for(|ready| *ready).await;
  }
}

/// 延迟加载的检测器
///
/// 加载完成前的调用返回 [`DetectorError::NotReady`]，调用方应先等待 [`ReadyFlag`]。
pub struct LazyDetector<M> {
  model: OnceCell<M>,
  ready: ReadyFlag,
}

impl<M> Default for LazyDetector<M> {
  fn default() -> Self {
    Self::new()
  }
}

impl<M> LazyDetector<M> {
  pub fn new() -> Self {
    Self {
      model: OnceCell::new(),
      ready: ReadyFlag::new(),
    }
  }

  pub fn ready_flag(&self) -> ReadyFlag {
    self.ready.clone()
  }

  pub fn is_ready(&self) -> bool {
    self.ready.is_ready()
  }

  /// 加载模型，失败时最多尝试 `attempts` 次
  pub async fn load_with<L>(&self, loader: &L, attempts: u32) -> Result<(), DetectorError>
  where
    L: ModelLoader<Model = M> + ?Sized,
  {
    if self.model.initialized() {
      debug!("模型已加载，跳过");
      return Ok(());
    }

    let attempts = attempts.max(1);
    let mut last_error = None;
    for attempt in 1..=attempts {
      info!("加载模型 (第 {}/{} 次)", attempt, attempts);
      match loader.load().await {
        Ok(model) => {
          if self.model.set(model).is_err() {
            warn!("模型已被并发加载，丢弃本次结果");
          }
          self.ready.set();
          info!("模型加载完成");
          return Ok(());
        }
        Err(e) => {
          warn!("模型加载失败: {}", e);
          last_error = Some(e);
        }
      }
    }

    Err(last_error.unwrap_or_else(|| DetectorError::Load("未尝试加载".to_string())))
  }
}

#[async_trait(?Send)]
impl<M: Detector> Detector for LazyDetector<M> {
  async fn detect(&self, frame: &RgbFrame) -> Result<Vec<Detection>, DetectorError> {
    match self.model.get() {
      Some(model) => model.detect(frame).await,
      None => Err(DetectorError::NotReady),
    }
  }
}

/// 按 URL 方案选择的检测器
pub enum DetectorWrapper {
  Replay(ReplayDetector),
  #[cfg(feature = "onnx_detector")]
  Onnx(OnnxDetector),
}

#[async_trait(?Send)]
impl Detector for DetectorWrapper {
  async fn detect(&self, frame: &RgbFrame) -> Result<Vec<Detection>, DetectorError> {
    match self {
      DetectorWrapper::Replay(detector) => detector.detect(frame).await,
      #[cfg(feature = "onnx_detector")]
      DetectorWrapper::Onnx(detector) => detector.detect(frame).await,
    }
  }
}

pub enum LoaderWrapper {
  Replay(ReplayLoader),
  #[cfg(feature = "onnx_detector")]
  Onnx(OnnxLoader),
}

impl FromUrl for LoaderWrapper {
  type Error = DetectorError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() == ReplayLoader::SCHEME {
      return Ok(LoaderWrapper::Replay(ReplayLoader::from_url(url)?));
    }
    #[cfg(feature = "onnx_detector")]
    {
      if url.scheme() == OnnxLoader::SCHEME {
        return Ok(LoaderWrapper::Onnx(OnnxLoader::from_url(url)?));
      }
    }
    Err(DetectorError::SchemeMismatch(url.scheme().to_string()))
  }
}

#[async_trait(?Send)]
impl ModelLoader for LoaderWrapper {
  type Model = DetectorWrapper;

  async fn load(&self) -> Result<DetectorWrapper, DetectorError> {
    match self {
      LoaderWrapper::Replay(loader) => loader.load().await.map(DetectorWrapper::Replay),
      #[cfg(feature = "onnx_detector")]
      LoaderWrapper::Onnx(loader) => loader.load().await.map(DetectorWrapper::Onnx),
    }
  }
}

#[cfg(test)]
mod tests {
  use std::cell::Cell;

  use super::*;
  use crate::frame::Layout;

  struct Fixed;

  #[async_trait(?Send)]
  impl Detector for Fixed {
    async fn detect(&self, _frame: &RgbFrame) -> Result<Vec<Detection>, DetectorError> {
      Ok(vec![Detection::new("cup", 0.7, [1.0, 2.0, 3.0, 4.0])])
    }
  }

  struct FlakyLoader {
    failures: Cell<u32>,
    calls: Cell<u32>,
  }

  #[async_trait(?Send)]
  impl ModelLoader for FlakyLoader {
    type Model = Fixed;

    async fn load(&self) -> Result<Fixed, DetectorError> {
      self.calls.set(self.calls.get() + 1);
      if self.failures.get() > 0 {
        self.failures.set(self.failures.get() - 1);
        return Err(DetectorError::Load("网络错误".to_string()));
      }
      Ok(Fixed)
    }
  }

  #[tokio::test]
  async fn not_ready_before_load() {
    let detector = LazyDetector::<Fixed>::new();
    let frame = RgbFrame::zeroed(2, 2, Layout::Nhwc).unwrap();
    assert!(!detector.is_ready());
    assert!(matches!(
      detector.detect(&frame).await,
      Err(DetectorError::NotReady)
    ));
  }

  #[tokio::test]
  async fn load_retries_are_bounded() {
    let detector = LazyDetector::new();
    let loader = FlakyLoader {
      failures: Cell::new(5),
      calls: Cell::new(0),
    };
    assert!(detector.load_with(&loader, 3).await.is_err());
    assert_eq!(loader.calls.get(), 3);
    assert!(!detector.is_ready());
  }

  #[tokio::test]
  async fn load_sets_ready_once() {
    let detector = LazyDetector::new();
    let loader = FlakyLoader {
      failures: Cell::new(1),
      calls: Cell::new(0),
    };
    let ready = detector.ready_flag();
    detector.load_with(&loader, 2).await.unwrap();
    assert!(ready.is_ready());
    assert!(!ready.set());
    ready.wait().await;

    let frame = RgbFrame::zeroed(2, 2, Layout::Nhwc).unwrap();
    let result = detector.detect(&frame).await.unwrap();
    assert_eq!(result[0].label, "cup");
  }

  #[tokio::test]
  async fn loader_is_chosen_by_scheme() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    std::io::Write::write_all(&mut file, br#"[{"label":"cup","score":0.7,"bbox":[1,2,3,4]}]"#)
      .unwrap();
    let url = Url::from_file_path(file.path()).unwrap();
    let url = Url::parse(&url.as_str().replacen("file", "replay", 1)).unwrap();

    let loader = LoaderWrapper::from_url(&url).unwrap();
    assert!(matches!(loader, LoaderWrapper::Replay(_)));
    let detector = LazyDetector::new();
    detector.load_with(&loader, 1).await.unwrap();
    let frame = RgbFrame::zeroed(2, 2, Layout::Nhwc).unwrap();
    assert_eq!(detector.detect(&frame).await.unwrap()[0].bbox, [1.0, 2.0, 3.0, 4.0]);

    let unknown = Url::parse("tflite:///model.tflite").unwrap();
    assert!(matches!(
      LoaderWrapper::from_url(&unknown),
      Err(DetectorError::SchemeMismatch(_))
    ));
  }
}
