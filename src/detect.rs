// 该文件是 Chejian （车检） 项目的一部分。
// src/detect.rs - 车辆检测流程
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
  io::Write,
  path::{Path, PathBuf},
};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
  draw::Record,
  input::load_image,
  model::{DetectResult, Detector, PredictParams},
};

/// COCO 中 "car" 的类别 id
pub const TARGET_CLASS_ID: u32 = 2;
/// 与 [`TARGET_CLASS_ID`] 对应的语义标签
pub const TARGET_CLASS_NAME: &str = "car";

pub const ANNOTATED_PREFIX: &str = "annotated_";
pub const ANNOTATED_EXTENSION: &str = "jpg";

/// 检测运行参数
#[derive(Debug, Clone, PartialEq)]
pub struct DetectParams {
  pub source: PathBuf,
  pub weights: PathBuf,
  pub conf: f32,
  pub imgsz: u32,
  /// 标注图像输出路径，缺省时由源文件名推导
  pub output: Option<PathBuf>,
  /// 是否在标注图像旁写出文本记录
  pub save_txt: bool,
}

impl DetectParams {
  pub fn output_path(&self) -> PathBuf {
    self
      .output
      .clone()
      .unwrap_or_else(|| default_output_path(&self.source))
  }
}

#[derive(Error, Debug)]
pub enum PreconditionError {
  #[error("检测后端不可用: {0}")]
  BackendUnavailable(#[source] Box<dyn std::error::Error + Send + Sync>),
  #[error("源图像不存在: {}", .0.display())]
  SourceNotFound(PathBuf),
  #[error("权重文件不存在: {}", .0.display())]
  WeightsNotFound(PathBuf),
}

/// 过滤后的单个检测目标，bbox 为源图像像素坐标 [x1, y1, x2, y2]
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
  pub bbox: [f32; 4],
  pub score: f32,
  pub class_id: u32,
  pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectOutcome {
  pub detections: Vec<Detection>,
  /// 成功写出的标注图像路径
  pub annotated: Option<PathBuf>,
}

/// `annotated_<stem>.jpg`，与源文件扩展名无关
pub fn default_output_path(source: &Path) -> PathBuf {
  let stem = source
    .file_stem()
    .map(|s| s.to_string_lossy().into_owned())
    .unwrap_or_else(|| "image".to_string());
  PathBuf::from(format!("{ANNOTATED_PREFIX}{stem}.{ANNOTATED_EXTENSION}"))
}

/// 只保留目标类别，保持模型返回顺序，并将归一化坐标换算为像素坐标
pub fn filter_target<L>(result: &DetectResult, width: u32, height: u32, label_of: L) -> Vec<Detection>
where
  L: Fn(u32) -> Option<String>,
{
  let (w, h) = (width as f32, height as f32);
  result
    .items
    .iter()
    .filter(|item| item.class_id == TARGET_CLASS_ID)
    .map(|item| Detection {
      bbox: [
        item.bbox[0] * w,
        item.bbox[1] * h,
        item.bbox[2] * w,
        item.bbox[3] * h,
      ],
      score: item.score,
      class_id: item.class_id,
      name: label_of(item.class_id).unwrap_or_else(|| item.class_id.to_string()),
    })
    .collect()
}

pub fn format_report(detections: &[Detection], conf: f32) -> Vec<String> {
  let mut lines = Vec::with_capacity(detections.len() + 1);
  lines.push(format!(
    "找到 {} 个 {} (类别 id={})，置信度 >= {}",
    detections.len(),
    TARGET_CLASS_NAME,
    TARGET_CLASS_ID,
    conf
  ));
  for (i, det) in detections.iter().enumerate() {
    let [x1, y1, x2, y2] = det.bbox;
    lines.push(format!(
      "#{}: {} conf={:.3} bbox=[{:.1}, {:.1}, {:.1}, {:.1}]",
      i + 1,
      det.name,
      det.score,
      x1,
      y1,
      x2,
      y2
    ));
  }
  lines
}

/// 依次检查后端能力、源图像与权重文件
pub fn check_preconditions<D: Detector>(detector: &D, params: &DetectParams) -> Result<(), PreconditionError> {
  detector
    .probe()
    .map_err(|e| PreconditionError::BackendUnavailable(Box::new(e)))?;
  if !params.source.is_file() {
    return Err(PreconditionError::SourceNotFound(params.source.clone()));
  }
  if !params.weights.is_file() {
    return Err(PreconditionError::WeightsNotFound(params.weights.clone()));
  }
  Ok(())
}

/// 运行一次检测：加载模型、推理、输出报告并保存标注图像
///
/// 报告写入 `out`。标注图像写出失败只会告警，不影响返回结果。
pub fn run_detection<D, W>(detector: &D, params: &DetectParams, out: &mut W) -> anyhow::Result<DetectOutcome>
where
  D: Detector,
  W: Write,
{
  check_preconditions(detector, params)?;

  writeln!(out, "正在从 {} 加载模型...", params.weights.display())?;
  let model = detector.load(&params.weights)?;

  writeln!(
    out,
    "正在推理 {} (imgsz={}, conf={})...",
    params.source.display(),
    params.imgsz,
    params.conf
  )?;
  let image = load_image(&params.source)?;
  let predict_params = PredictParams {
    conf: params.conf,
    imgsz: params.imgsz,
  };
  let results = detector.predict(&model, &image, &predict_params)?;

  let Some(result) = results.first() else {
    writeln!(out, "模型未返回任何结果。")?;
    return Ok(DetectOutcome {
      detections: Vec::new(),
      annotated: None,
    });
  };
  debug!("模型返回 {} 个候选", result.len());

  let detections = filter_target(result, image.width(), image.height(), |id| {
    detector.label(&model, id)
  });
  for line in format_report(&detections, params.conf) {
    writeln!(out, "{}", line)?;
  }

  if detections.is_empty() {
    info!("没有目标类别的检测结果，跳过标注图像");
    return Ok(DetectOutcome {
      detections,
      annotated: None,
    });
  }

  let output_path = params.output_path();
  let annotated = detector.render(&model, &image, result);
  let annotated = match save_annotated(&annotated, &output_path) {
    Ok(()) => {
      writeln!(out, "标注图像已保存到: {}", output_path.display())?;
      Some(output_path)
    }
    Err(e) => {
      warn!("保存标注图像失败: {}", e);
      writeln!(out, "无法保存标注图像: {}", e)?;
      None
    }
  };

  if params.save_txt
    && let Some(image_path) = annotated.as_deref()
  {
    let record = Record {
      label_with_name: true,
    };
    match record.record(&detections, image_path) {
      Ok(path) => writeln!(out, "检测记录已保存到: {}", path.display())?,
      Err(e) => {
        warn!("保存检测记录失败: {}", e);
        writeln!(out, "无法保存检测记录: {}", e)?;
      }
    }
  }

  Ok(DetectOutcome {
    detections,
    annotated,
  })
}

fn save_annotated(image: &image::RgbImage, path: &Path) -> Result<(), image::ImageError> {
  if let Some(parent) = path.parent()
    && !parent.as_os_str().is_empty()
  {
    std::fs::create_dir_all(parent).map_err(image::ImageError::IoError)?;
  }
  image.save(path)?;
  info!("保存图像到文件: {}", path.display());
  Ok(())
}
