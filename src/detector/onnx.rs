// 该文件是 Shanan （山南西风） 项目的一部分。
// src/detector/onnx.rs - ONNX 端到端检测模型
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

//! # ONNX 检测器
//!
//! 在 CPU 上用 tract 运行导出为端到端格式的 YOLO 模型。模型输入为
//! `[1, 3, H, W]` 的 RGB 浮点张量（0.0 - 1.0），输出为 `[1, N, 6]`，
//! 每行 `[x1, y1, x2, y2, score, class]`，坐标为模型输入像素，已做过 NMS。
//!
//! ## URL
//!
//! `onnx:///path/to/model.onnx?width=640&height=640&score=0.5&max=20&labels=/path/to/labels.txt`
//!
//! 标签文件每行一个类别名，缺省为 COCO 80 类。

use std::path::PathBuf;

use async_trait::async_trait;
use image::imageops::FilterType;
use tracing::{debug, error, info};
use tract_onnx::prelude::*;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  detector::{Detection, Detector, DetectorError, ModelLoader},
  frame::RgbFrame,
};

/// COCO 数据集类别名称
pub const COCO_CLASSES: [&str; 80] = [
  "person",
  "bicycle",
  "car",
  "motorcycle",
  "airplane",
  "bus",
  "train",
  "truck",
  "boat",
  "traffic light",
  "fire hydrant",
  "stop sign",
  "parking meter",
  "bench",
  "bird",
  "cat",
  "dog",
  "horse",
  "sheep",
  "cow",
  "elephant",
  "bear",
  "zebra",
  "giraffe",
  "backpack",
  "umbrella",
  "handbag",
  "tie",
  "suitcase",
  "frisbee",
  "skis",
  "snowboard",
  "sports ball",
  "kite",
  "baseball bat",
  "baseball glove",
  "skateboard",
  "surfboard",
  "tennis racket",
  "bottle",
  "wine glass",
  "cup",
  "fork",
  "knife",
  "spoon",
  "bowl",
  "banana",
  "apple",
  "sandwich",
  "orange",
  "broccoli",
  "carrot",
  "hot dog",
  "pizza",
  "donut",
  "cake",
  "chair",
  "couch",
  "potted plant",
  "bed",
  "dining table",
  "toilet",
  "tv",
  "laptop",
  "mouse",
  "remote",
  "keyboard",
  "cell phone",
  "microwave",
  "oven",
  "toaster",
  "sink",
  "refrigerator",
  "book",
  "clock",
  "vase",
  "scissors",
  "teddy bear",
  "hair drier",
  "toothbrush",
];

const ROW_LEN: usize = 6;

/// 端到端输出的解码参数
#[derive(Debug, Clone)]
pub struct EndToEndDecoder {
  /// 置信度阈值
  pub min_score: f32,
  /// 每帧最多返回的目标数
  pub max_boxes: usize,
  pub labels: Vec<String>,
}

impl Default for EndToEndDecoder {
  fn default() -> Self {
    Self {
      min_score: 0.5,
      max_boxes: 20,
      labels: COCO_CLASSES.iter().map(|s| s.to_string()).collect(),
    }
  }
}

impl EndToEndDecoder {
  /// 将输出行换算为帧坐标下的 [x, y, width, height]
  ///
  /// `input` 为模型输入尺寸，`frame` 为原始帧尺寸；边框截断在帧内，
  /// 截断后为空的边框丢弃。结果保持模型输出顺序。
  pub fn decode(
    &self,
    output: &[f32],
    input: (f32, f32),
    frame: (f32, f32),
  ) -> Result<Vec<Detection>, DetectorError> {
    if output.len() % ROW_LEN != 0 {
      return Err(DetectorError::Inference(format!(
        "输出长度 {} 不是 {} 的倍数",
        output.len(),
        ROW_LEN
      )));
    }

    let scale_x = frame.0 / input.0;
    let scale_y = frame.1 / input.1;

    let detections = output
      .chunks_exact(ROW_LEN)
      .filter(|row| row[4] >= self.min_score)
      .filter_map(|row| {
        let x1 = (row[0] * scale_x).clamp(0.0, frame.0);
        let y1 = (row[1] * scale_y).clamp(0.0, frame.1);
        let x2 = (row[2] * scale_x).clamp(0.0, frame.0);
        let y2 = (row[3] * scale_y).clamp(0.0, frame.1);
        if x2 <= x1 || y2 <= y1 {
          return None;
        }
        let class_id = row[5].max(0.0) as usize;
        let label = self
          .labels
          .get(class_id)
          .map(String::as_str)
          .unwrap_or("unknown");
        Some(Detection::new(label, row[4], [x1, y1, x2 - x1, y2 - y1]))
      })
      .take(self.max_boxes)
      .collect();
    Ok(detections)
  }
}

/// 基于 tract 的 ONNX 检测器
pub struct OnnxDetector {
  model: TypedRunnableModel<TypedModel>,
  width: u32,
  height: u32,
  decoder: EndToEndDecoder,
}

impl OnnxDetector {
  /// 缩放到模型输入尺寸并转为 NCHW 浮点张量
  fn build_input(&self, frame: &RgbFrame) -> Tensor {
    let resized = image::imageops::resize(
      &frame.to_rgb_image(),
      self.width,
      self.height,
      FilterType::Triangle,
    );
    tract_ndarray::Array4::from_shape_fn(
      (1, 3, self.height as usize, self.width as usize),
      |(_, channel, y, x)| resized.get_pixel(x as u32, y as u32)[channel] as f32 / 255.0,
    )
    .into_tensor()
  }
}

#[async_trait(?Send)]
impl Detector for OnnxDetector {
  async fn detect(&self, frame: &RgbFrame) -> Result<Vec<Detection>, DetectorError> {
    let input = self.build_input(frame);
    let outputs = self
      .model
      .run(tvec!(input.into()))
      .map_err(|e| DetectorError::Inference(e.to_string()))?;
    let output = outputs
      .first()
      .ok_or_else(|| DetectorError::Inference("模型没有输出".to_string()))?;
    let view = output
      .to_array_view::<f32>()
      .map_err(|e| DetectorError::Inference(e.to_string()))?;
    let rows: Vec<f32> = view.iter().copied().collect();

    let detections = self.decoder.decode(
      &rows,
      (self.width as f32, self.height as f32),
      (frame.width() as f32, frame.height() as f32),
    )?;
    debug!("检测到 {} 个物体", detections.len());
    Ok(detections)
  }
}

fn invalid(key: &str, value: &str) -> DetectorError {
  DetectorError::Load(format!("无效参数 {}={}", key, value))
}

/// 从 `onnx://` URL 加载 [`OnnxDetector`]
#[derive(Debug)]
pub struct OnnxLoader {
  path: PathBuf,
  width: u32,
  height: u32,
  min_score: f32,
  max_boxes: usize,
  labels: Option<PathBuf>,
}

impl FromUrlWithScheme for OnnxLoader {
  const SCHEME: &'static str = "onnx";
}

impl FromUrl for OnnxLoader {
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

    let defaults = EndToEndDecoder::default();
    let mut loader = Self {
      path: PathBuf::from(url.path()),
      width: 640,
      height: 640,
      min_score: defaults.min_score,
      max_boxes: defaults.max_boxes,
      labels: None,
    };
    for (key, value) in url.query_pairs() {
      match &*key {
        "width" => {
          loader.width = value
            .parse::<u32>()
            .ok()
            .filter(|v| *v > 0)
            .ok_or_else(|| invalid(&key, &value))?
        }
        "height" => {
          loader.height = value
            .parse::<u32>()
            .ok()
            .filter(|v| *v > 0)
            .ok_or_else(|| invalid(&key, &value))?
        }
        "score" => {
          loader.min_score = value
            .parse::<f32>()
            .ok()
            .filter(|v| (0.0..=1.0).contains(v))
            .ok_or_else(|| invalid(&key, &value))?
        }
        "max" => {
          loader.max_boxes = value
            .parse::<usize>()
            .map_err(|_| invalid(&key, &value))?
        }
        "labels" => loader.labels = Some(PathBuf::from(&*value)),
        _ => debug!("忽略未知参数 {}", key),
      }
    }
    Ok(loader)
  }
}

#[async_trait(?Send)]
impl ModelLoader for OnnxLoader {
  type Model = OnnxDetector;

  async fn load(&self) -> Result<OnnxDetector, DetectorError> {
    info!(
      "加载 ONNX 模型: {} ({}x{})",
      self.path.display(),
      self.width,
      self.height
    );
    let labels = match &self.labels {
      Some(path) => std::fs::read_to_string(path)?
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect(),
      None => EndToEndDecoder::default().labels,
    };

    let model = tract_onnx::onnx()
      .model_for_path(&self.path)
      .and_then(|model| {
        model.with_input_fact(
          0,
          InferenceFact::dt_shape(
            f32::datum_type(),
            tvec!(1, 3, self.height as usize, self.width as usize),
          ),
        )
      })
      .and_then(|model| model.into_optimized())
      .and_then(|model| model.into_runnable())
      .map_err(|e| DetectorError::Load(e.to_string()))?;

    info!("模型就绪，共 {} 个类别", labels.len());
    Ok(OnnxDetector {
      model,
      width: self.width,
      height: self.height,
      decoder: EndToEndDecoder {
        min_score: self.min_score,
        max_boxes: self.max_boxes,
        labels,
      },
    })
  }
}
