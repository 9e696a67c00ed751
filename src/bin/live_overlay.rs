// 该文件是 Shanan （山南西风） 项目的一部分。
// src/bin/live_overlay.rs - 实时检测叠加
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

use std::{path::PathBuf, rc::Rc, time::Duration};

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};
use url::Url;

use shanan_overlay::{
  FromUrl,
  app::{AlwaysGranted, App, CameraPermission, DevicePermission},
  config::OverlayConfig,
  detector::{LazyDetector, LoaderWrapper},
  input::{InputWrapper, source_url},
  mapper::MappingMode,
  orientation::{CameraFacing, DisplayContext, FixedSensor, Orientation},
  output::OutputWrapper,
  platform::Platform,
};

/// 实时检测叠加
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 检测器，如 replay:///path/to/detections.jsonl 或 onnx:///path/to/model.onnx
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 输入来源，如 gst://camera/dev/video0 或 synthetic://
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 输出，如 log:// 或 gst://display
  #[arg(long, value_name = "OUTPUT", default_value = "log://")]
  pub output: Url,

  #[arg(long, value_enum, default_value_t = Platform::Android)]
  pub platform: Platform,
  #[arg(long, value_enum, default_value_t = MappingMode::Legacy)]
  pub mapping: MappingMode,
  #[arg(long, value_enum, default_value_t = Orientation::PortraitUp)]
  pub orientation: Orientation,
  #[arg(long, value_enum, default_value_t = CameraFacing::Front)]
  pub facing: CameraFacing,

  /// 屏幕宽度（竖屏像素）
  #[arg(long, default_value_t = 360.0)]
  pub screen_width: f32,
  /// 单帧推理超时（毫秒）
  #[arg(long, value_name = "MILLIS")]
  pub timeout_ms: Option<u64>,
  /// 置信度阈值 (0.0 - 1.0)
  #[arg(long, default_value_t = 0.0, value_name = "THRESHOLD")]
  pub min_score: f32,
  /// 模型加载最多尝试次数
  #[arg(long, default_value_t = 3)]
  pub load_attempts: u32,
  /// 摄像头设备节点，给出时先检查访问权限
  #[arg(long, value_name = "DEVICE")]
  pub device: Option<PathBuf>,

  #[arg(long, value_name = "FRAME_NUMBER")]
  pub frame_number: Option<u64>,
}

impl Args {
  fn config(&self) -> OverlayConfig {
    OverlayConfig {
      platform: self.platform,
      mapping_mode: self.mapping,
      facing: self.facing,
      screen_width: self.screen_width,
      inference_timeout: self.timeout_ms.map(Duration::from_millis),
      min_score: self.min_score,
      model_load_attempts: self.load_attempts,
      max_frames: self.frame_number,
    }
  }

  /// 帧源尺寸与纹理旋转按平台和初始方向补全
  fn input_url(&self) -> Url {
    let context = DisplayContext {
      orientation: self.orientation,
      facing: self.facing,
    };
    source_url(&self.input, self.platform, context)
  }
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型: {}", args.model);
  info!("输入来源: {}", args.input);
  info!("输出: {}", args.output);

  let runtime = tokio::runtime::Builder::new_current_thread()
    .enable_all()
    .build()?;
  let local = tokio::task::LocalSet::new();
  local.block_on(&runtime, run(args))
}

async fn run(args: Args) -> Result<()> {
  let app = App::new(args.config())?;
  let (texture_w, texture_h) = args.platform.texture_size();
  info!(
    "平台 {:?}: 纹理 {}x{}, 张量 {:?}, 预览 {:?}",
    args.platform,
    texture_w,
    texture_h,
    args.platform.tensor_size(),
    app.config().viewport()
  );

  let input_url = args.input_url();
  info!("帧源: {}", input_url);
  let input = InputWrapper::from_url(&input_url)?;
  let output = OutputWrapper::from_url(&args.output)?;
  let loader = LoaderWrapper::from_url(&args.model)?;
  let detector = Rc::new(LazyDetector::new());

  // 先启动帧循环，模型就绪前不会调用检测器
  let handle = app
    .frame_loop(detector.ready_flag())
    .spawn_local(input, detector.clone(), output);

  let control = handle.control();
  ctrlc::set_handler(move || {
    info!("收到中断信号，准备退出...");
    control.cancel();
  })?;

  let sensor = FixedSensor::new(args.orientation);
  let permission: Box<dyn CameraPermission> = match &args.device {
    Some(device) => Box::new(DevicePermission::new(device)),
    None => Box::new(AlwaysGranted),
  };
  if let Err(e) = app
    .prepare(&sensor, permission.as_ref(), detector.as_ref(), &loader)
    .await
  {
    warn!("启动失败，停止帧循环: {}", e);
    handle.cancel();
    return Err(e.into());
  }

  let summary = handle.join().await?;
  info!(
    "任务完成: 共 {} 帧, 发布 {} 帧, 跳过 {} 帧, 尺寸不符 {} 帧, 最后 FPS {}",
    summary.frames, summary.published, summary.skipped, summary.mismatched, summary.last_fps
  );
  Ok(())
}
