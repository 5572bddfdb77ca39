// 该文件是 Chejian （车检） 项目的一部分。
// src/bin/detect_car.rs - 单张图像车辆检测
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

use anyhow::Result;
use clap::Parser;
use tracing::info;

use chejian::{
  args::DetectArgs,
  detect::{DetectParams, run_detection},
  model::Yolo26Provider,
};

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let params = DetectParams::from(DetectArgs::parse());

  info!("输入图像: {}", params.source.display());
  info!("模型文件路径: {}", params.weights.display());
  info!("标注输出: {}", params.output_path().display());

  let mut stdout = std::io::stdout().lock();
  let outcome = run_detection(&Yolo26Provider, &params, &mut stdout)?;
  info!("检测完成，共 {} 个目标", outcome.detections.len());

  Ok(())
}
