// 该文件是 Chejian （车检） 项目的一部分。
// src/export.rs - 模型导出流程
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
use tracing::{debug, info};

/// 面向移动端的导出格式
pub const EXPORT_FORMAT: &str = "tflite";

/// 导出请求
#[derive(Debug, Clone, PartialEq)]
pub struct ExportRequest {
  pub format: &'static str,
  pub imgsz: u32,
  /// 将 NMS 固化进导出图
  pub nms: bool,
  /// INT8 量化
  pub int8: bool,
}

/// 模型导出提供者
pub trait Exporter {
  type Handle;
  type Error: std::error::Error + Send + Sync + 'static;

  fn probe(&self) -> Result<(), Self::Error>;

  fn load(&self, weights: &Path) -> Result<Self::Handle, Self::Error>;

  /// 导出模型，返回产物路径
  fn export(&self, handle: &Self::Handle, request: &ExportRequest) -> Result<PathBuf, Self::Error>;
}

/// 导出运行参数
#[derive(Debug, Clone, PartialEq)]
pub struct ExportParams {
  pub weights: PathBuf,
  pub imgsz: u32,
  pub int8: bool,
  /// 导出产物的复制目标
  pub out: Option<PathBuf>,
}

impl ExportParams {
  pub fn request(&self) -> ExportRequest {
    ExportRequest {
      format: EXPORT_FORMAT,
      imgsz: self.imgsz,
      nms: true,
      int8: self.int8,
    }
  }
}

#[derive(Error, Debug)]
pub enum ExportError {
  #[error("导出后端不可用: {0}")]
  BackendUnavailable(#[source] Box<dyn std::error::Error + Send + Sync>),
  #[error("权重文件不存在: {}", .0.display())]
  WeightsNotFound(PathBuf),
  #[error("导出产物不存在: {}", .0.display())]
  ArtifactMissing(PathBuf),
  #[error("复制导出产物到 {target:?} 失败: {source}")]
  CopyFailed {
    target: PathBuf,
    #[source]
    source: std::io::Error,
  },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExportOutcome {
  pub artifact: PathBuf,
  pub copied_to: Option<PathBuf>,
}

/// 判断两个路径是否指向同一位置；不存在的路径按绝对路径比较
pub fn same_location(a: &Path, b: &Path) -> bool {
  fn resolve(path: &Path) -> PathBuf {
    path
      .canonicalize()
      .or_else(|_| std::path::absolute(path))
      .unwrap_or_else(|_| path.to_path_buf())
  }
  resolve(a) == resolve(b)
}

/// 复制导出产物，目标与产物相同时不写入
pub fn copy_artifact(artifact: &Path, out: &Path) -> Result<Option<PathBuf>, ExportError> {
  if same_location(artifact, out) {
    debug!("输出路径与导出产物相同，跳过复制");
    return Ok(None);
  }
  if let Some(parent) = out.parent()
    && !parent.as_os_str().is_empty()
  {
    std::fs::create_dir_all(parent).map_err(|source| ExportError::CopyFailed {
      target: out.to_path_buf(),
      source,
    })?;
  }
  std::fs::copy(artifact, out).map_err(|source| ExportError::CopyFailed {
    target: out.to_path_buf(),
    source,
  })?;
  Ok(Some(out.to_path_buf()))
}

/// 运行一次导出，任何失败都会中止
pub fn run_export<E, W>(exporter: &E, params: &ExportParams, out: &mut W) -> anyhow::Result<ExportOutcome>
where
  E: Exporter,
  W: Write,
{
  exporter
    .probe()
    .map_err(|e| ExportError::BackendUnavailable(Box::new(e)))?;
  if !params.weights.is_file() {
    return Err(ExportError::WeightsNotFound(params.weights.clone()).into());
  }

  let model = exporter.load(&params.weights)?;
  let request = params.request();
  writeln!(
    out,
    "正在导出 {} -> {} (@{}{}) ...",
    params.weights.display(),
    request.format,
    request.imgsz,
    if request.int8 { ", int8" } else { "" }
  )?;

  let artifact = exporter.export(&model, &request)?;
  writeln!(out, "导出完成: {}", artifact.display())?;
  if !artifact.exists() {
    return Err(ExportError::ArtifactMissing(artifact).into());
  }
  info!("导出产物: {}", artifact.display());

  let copied_to = match params.out.as_deref() {
    Some(target) => copy_artifact(&artifact, target)?,
    None => None,
  };
  if let Some(target) = &copied_to {
    writeln!(out, "已复制到: {}", target.display())?;
  }

  Ok(ExportOutcome {
    artifact,
    copied_to,
  })
}
