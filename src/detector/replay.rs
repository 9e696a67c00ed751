// 该文件是 Shanan （山南西风） 项目的一部分。
// src/detector/replay.rs - 回放预先记录的检测结果
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

//! 记录文件为 JSON Lines，每行是一帧的检测数组：
//!
//! ```text
//! [{"label":"person","score":0.91,"bbox":[10,10,20,20]}]
//! []
//! ```
//!
//! URL 形式：`replay:///path/to/detections.jsonl`

use std::{cell::Cell, path::PathBuf};

use async_trait::async_trait;
use tracing::{debug, error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  detector::{Detection, Detector, DetectorError, ModelLoader},
  frame::RgbFrame,
};

/// 按顺序循环回放记录的检测器
pub struct ReplayDetector {
  records: Vec<Vec<Detection>>,
  cursor: Cell<usize>,
}

impl ReplayDetector {
  pub fn from_records(records: Vec<Vec<Detection>>) -> Self {
    Self {
      records,
      cursor: Cell::new(0),
    }
  }

  pub fn parse(text: &str) -> Result<Self, DetectorError> {
    let records = text
      .lines()
      .map(str::trim)
      .filter(|line| !line.is_empty())
      .map(serde_json::from_str::<Vec<Detection>>)
      .collect::<Result<Vec<_>, _>>()?;
    Ok(Self::from_records(records))
  }

  pub fn len(&self) -> usize {
    self.records.len()
  }

  pub fn is_empty(&self) -> bool {
    self.records.is_empty()
  }
}

#[async_trait(?Send)]
impl Detector for ReplayDetector {
  async fn detect(&self, frame: &RgbFrame) -> Result<Vec<Detection>, DetectorError> {
    if self.records.is_empty() {
      return Ok(Vec::new());
    }
    let index = self.cursor.get();
    self.cursor.set((index + 1) % self.records.len());
    debug!(
      "回放第 {} 条记录 ({}x{})",
      index,
      frame.width(),
      frame.height()
    );
    Ok(self.records[index].clone())
  }
}

/// 从文件加载 [`ReplayDetector`]
pub struct ReplayLoader {
  path: PathBuf,
}

impl ReplayLoader {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self { path: path.into() }
  }
}

impl FromUrlWithScheme for ReplayLoader {
  const SCHEME: &'static str = "replay";
}

impl FromUrl for ReplayLoader {
  type Error = DetectorError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(DetectorError::SchemeMismatch(url.scheme().to_string()));
    }
    Ok(Self::new(url.path()))
  }
}

#[async_trait(?Send)]
impl ModelLoader for ReplayLoader {
  type Model = ReplayDetector;

  async fn load(&self) -> Result<ReplayDetector, DetectorError> {
    info!("加载检测记录: {}", self.path.display());
    let text = std::fs::read_to_string(&self.path)?;
    let detector = ReplayDetector::parse(&text)?;
    info!("共 {} 帧记录", detector.len());
    Ok(detector)
  }
}
