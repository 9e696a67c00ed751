// 该文件是 Shanan （山南西风） 项目的一部分。
// src/bin/overlay_oneshot.rs - 单帧检测并输出屏幕坐标
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

use anyhow::{Result, anyhow};
use clap::Parser;
use tracing::info;
use url::Url;

use shanan_overlay::{
  FromUrl,
  app::{AlwaysGranted, App},
  config::OverlayConfig,
  detector::{LazyDetector, LoaderWrapper},
  input::{InputWrapper, source_url},
  mapper::MappingMode,
  orientation::{CameraFacing, DisplayContext, FixedSensor, Orientation},
  output::OutputWrapper,
  platform::Platform,
};

/// 对一帧图像做检测，以 JSON 打印映射后的屏幕矩形
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  #[arg(long, value_name = "OUTPUT", default_value = "log://?quiet")]
  pub output: Url,

  #[arg(long, value_enum, default_value_t = Platform::Android)]
  pub platform: Platform,
  #[arg(long, value_enum, default_value_t = MappingMode::Legacy)]
  pub mapping: MappingMode,
  #[arg(long, value_enum, default_value_t = Orientation::PortraitUp)]
  pub orientation: Orientation,
  #[arg(long, value_enum, default_value_t = CameraFacing::Front)]
  pub facing: CameraFacing,
  #[arg(long, default_value_t = 360.0)]
  pub screen_width: f32,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();
  info!("模型: {}", args.model);
  info!("输入来源: {}", args.input);

  let runtime = tokio::runtime::Builder::new_current_thread()
    .enable_all()
    .build()?;
  runtime.block_on(run(args))
}

async fn run(args: Args) -> Result<()> {
  let app = App::new(OverlayConfig {
    platform: args.platform,
    mapping_mode: args.mapping,
    facing: args.facing,
    screen_width: args.screen_width,
    max_frames: Some(1),
    ..Default::default()
  })?;

  let detector = LazyDetector::new();
  let loader = LoaderWrapper::from_url(&args.model)?;
  app
    .prepare(
      &FixedSensor::new(args.orientation),
      &AlwaysGranted,
      &detector,
      &loader,
    )
    .await?;

  let frame_loop = app.frame_loop(detector.ready_flag());
  let results = frame_loop.subscribe();
  let context = DisplayContext {
    orientation: args.orientation,
    facing: args.facing,
  };
  let input = InputWrapper::from_url(&source_url(&args.input, args.platform, context))?;
  let output = OutputWrapper::from_url(&args.output)?;
  frame_loop.run(input, &detector, &output).await?;

  let overlay = results
    .borrow()
    .clone()
    .ok_or_else(|| anyhow!("没有检测结果"))?;
  println!("{}", serde_json::to_string_pretty(overlay.as_ref())?);

  Ok(())
}
