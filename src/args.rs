// 该文件是 Chejian （车检） 项目的一部分。
// src/args.rs - 命令行参数配置
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

use std::path::PathBuf;

use clap::Parser;

use crate::{detect::DetectParams, export::ExportParams};

pub const DEFAULT_DETECT_WEIGHTS: &str = "yolo26n.rknn";
pub const DEFAULT_EXPORT_WEIGHTS: &str = "yolo26n.pt";
pub const DEFAULT_EXPORT_OUT: &str = "yolo26n.tflite";

fn parse_confidence(s: &str) -> Result<f32, String> {
  let value: f32 = s.parse().map_err(|e| format!("{e}"))?;
  if (0.0..=1.0).contains(&value) {
    Ok(value)
  } else {
    Err(format!("置信度必须在 0.0 到 1.0 之间，实际为 {value}"))
  }
}

/// 对单张图像运行 YOLO，列出并保存车辆检测结果（COCO 类别 'car'，id=2）
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct DetectArgs {
  /// 输入图像路径
  #[arg(short, long, value_name = "FILE")]
  pub source: PathBuf,

  /// RKNN 模型文件路径
  #[arg(short, long, value_name = "FILE", default_value = DEFAULT_DETECT_WEIGHTS)]
  pub weights: PathBuf,

  /// 置信度阈值 (0.0 - 1.0)
  #[arg(long, default_value = "0.25", value_name = "THRESHOLD", value_parser = parse_confidence)]
  pub conf: f32,

  /// 推理图像尺寸（像素）
  #[arg(long, default_value = "640", value_name = "PIXELS", value_parser = clap::value_parser!(u32).range(1..))]
  pub imgsz: u32,

  /// 标注图像输出路径（默认: annotated_<输入文件名>.jpg）
  #[arg(short, long, value_name = "FILE")]
  pub output: Option<PathBuf>,

  /// 同时在标注图像旁保存文本检测记录
  #[arg(long)]
  pub save_txt: bool,
}

impl From<DetectArgs> for DetectParams {
  fn from(args: DetectArgs) -> Self {
    DetectParams {
      source: args.source,
      weights: args.weights,
      conf: args.conf,
      imgsz: args.imgsz,
      output: args.output,
      save_txt: args.save_txt,
    }
  }
}

/// 将 YOLO 模型导出为移动端使用的 TFLite
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct ExportArgs {
  /// .pt 权重文件路径
  #[arg(long, value_name = "FILE", default_value = DEFAULT_EXPORT_WEIGHTS)]
  pub weights: PathBuf,

  /// 导出图像尺寸（正方形）
  #[arg(long, default_value = "640", value_name = "PIXELS", value_parser = clap::value_parser!(u32).range(1..))]
  pub imgsz: u32,

  /// 导出 INT8 量化的 TFLite（需要校准数据）
  #[arg(long)]
  pub int8: bool,

  /// 导出产物的复制路径
  #[arg(long, value_name = "FILE", default_value = DEFAULT_EXPORT_OUT)]
  pub out: PathBuf,

  /// 用于运行 ultralytics 的 Python 解释器
  #[arg(long, value_name = "PYTHON", default_value = "python3")]
  pub python: String,
}

impl From<&ExportArgs> for ExportParams {
  fn from(args: &ExportArgs) -> Self {
    ExportParams {
      weights: args.weights.clone(),
      imgsz: args.imgsz,
      int8: args.int8,
      out: Some(args.out.clone()),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn detect_defaults() {
    let args = DetectArgs::try_parse_from(["detect-car", "-s", "car.jpg"]).unwrap();
    let params = DetectParams::from(args);
    assert_eq!(params.source, PathBuf::from("car.jpg"));
    assert_eq!(params.weights, PathBuf::from(DEFAULT_DETECT_WEIGHTS));
    assert_eq!(params.conf, 0.25);
    assert_eq!(params.imgsz, 640);
    assert_eq!(params.output, None);
    assert!(!params.save_txt);
  }

  #[test]
  fn detect_requires_source() {
    assert!(DetectArgs::try_parse_from(["detect-car"]).is_err());
  }

  #[test]
  fn detect_short_flags() {
    let args = DetectArgs::try_parse_from([
      "detect-car", "-s", "a.png", "-w", "m.rknn", "-o", "out.jpg", "--conf", "0.5", "--imgsz", "320",
    ])
    .unwrap();
    assert_eq!(args.weights, PathBuf::from("m.rknn"));
    assert_eq!(args.output, Some(PathBuf::from("out.jpg")));
    assert_eq!(args.conf, 0.5);
    assert_eq!(args.imgsz, 320);
  }

  #[test]
  fn confidence_out_of_range_is_rejected() {
    assert!(DetectArgs::try_parse_from(["detect-car", "-s", "a.jpg", "--conf", "1.5"]).is_err());
    assert!(DetectArgs::try_parse_from(["detect-car", "-s", "a.jpg", "--conf", "abc"]).is_err());
    assert!(DetectArgs::try_parse_from(["detect-car", "-s", "a.jpg", "--imgsz", "0"]).is_err());
  }

  #[test]
  fn export_defaults() {
    let args = ExportArgs::try_parse_from(["export-model"]).unwrap();
    let params = ExportParams::from(&args);
    assert_eq!(params.weights, PathBuf::from(DEFAULT_EXPORT_WEIGHTS));
    assert_eq!(params.imgsz, 640);
    assert!(!params.int8);
    assert_eq!(params.out, Some(PathBuf::from(DEFAULT_EXPORT_OUT)));
    assert_eq!(args.python, "python3");
  }

  #[test]
  fn export_int8_flag() {
    let args = ExportArgs::try_parse_from(["export-model", "--int8", "--imgsz", "320"]).unwrap();
    assert!(args.int8);
    assert_eq!(args.imgsz, 320);
  }
}
