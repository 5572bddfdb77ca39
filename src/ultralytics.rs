// 该文件是 Chejian （车检） 项目的一部分。
// src/ultralytics.rs - 基于 Python ultralytics 的模型导出
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
  io::{BufRead, BufReader, ErrorKind},
  path::{Path, PathBuf},
  process::{Command, Stdio},
};

use thiserror::Error;
use tracing::{debug, error, info};

use crate::export::{ExportRequest, Exporter};

const DEFAULT_PYTHON: &str = "python3";
const ARTIFACT_MARKER: &str = "CHEJIAN_ARTIFACT=";

// argv: weights format imgsz nms int8
const EXPORT_SCRIPT: &str = r#"
import sys
from ultralytics import YOLO

weights, fmt, imgsz, nms, int8 = sys.argv[1:6]
path = YOLO(weights).export(format=fmt, imgsz=int(imgsz), nms=nms == "1", int8=int8 == "1")
print("CHEJIAN_ARTIFACT=" + str(path), flush=True)
"#;

#[derive(Error, Debug)]
pub enum UltralyticsError {
  #[error("未找到 Python 解释器 `{0}`，请安装 Python 3 后执行: pip install ultralytics")]
  PythonNotFound(String),
  #[error("需要 ultralytics，请执行: pip install ultralytics\n原始错误: {0}")]
  Unavailable(String),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("导出失败 ({0})，详见上方 ultralytics 输出")]
  ExportFailed(String),
  #[error("导出输出中没有产物路径")]
  NoArtifact,
}

/// 通过 Python 调用 ultralytics 导出模型
#[derive(Debug, Clone)]
pub struct UltralyticsExporter {
  python: String,
}

impl Default for UltralyticsExporter {
  fn default() -> Self {
    Self {
      python: DEFAULT_PYTHON.to_string(),
    }
  }
}

impl UltralyticsExporter {
  pub fn with_python(python: impl Into<String>) -> Self {
    Self {
      python: python.into(),
    }
  }

  fn command(&self, args: &[&str]) -> Command {
    debug!("执行 {} {:?}", self.python, args);
    let mut command = Command::new(&self.python);
    command.args(args);
    command
  }

  fn spawn_error(&self, e: std::io::Error) -> UltralyticsError {
    if e.kind() == ErrorKind::NotFound {
      UltralyticsError::PythonNotFound(self.python.clone())
    } else {
      UltralyticsError::IoError(e)
    }
  }
}

/// 取最后 `n` 行
fn tail(text: &str, n: usize) -> String {
  let lines: Vec<&str> = text.lines().collect();
  lines[lines.len().saturating_sub(n)..].join("\n")
}

fn artifact_in_line(line: &str) -> Option<PathBuf> {
  line
    .trim()
    .strip_prefix(ARTIFACT_MARKER)
    .filter(|path| !path.is_empty())
    .map(PathBuf::from)
}

/// 逐行转发脚本标准输出到日志，返回最后一个标记行中的产物路径
pub fn follow_export_output<R: BufRead>(reader: R) -> std::io::Result<Option<PathBuf>> {
  let mut artifact = None;
  for line in reader.lines() {
    let line = line?;
    match artifact_in_line(&line) {
      Some(path) => artifact = Some(path),
      None if !line.trim().is_empty() => info!("ultralytics: {}", line.trim_end()),
      None => {}
    }
  }
  Ok(artifact)
}

impl Exporter for UltralyticsExporter {
  type Handle = PathBuf;
  type Error = UltralyticsError;

  fn probe(&self) -> Result<(), Self::Error> {
    let output = self
      .command(&["-c", "import ultralytics"])
      .output()
      .map_err(|e| self.spawn_error(e))?;
    if output.status.success() {
      Ok(())
    } else {
      let stderr = String::from_utf8_lossy(&output.stderr);
      Err(UltralyticsError::Unavailable(tail(&stderr, 1)))
    }
  }

  fn load(&self, weights: &Path) -> Result<Self::Handle, Self::Error> {
    let weights = weights.canonicalize()?;
    info!("使用权重文件: {}", weights.display());
    Ok(weights)
  }

  fn export(&self, handle: &Self::Handle, request: &ExportRequest) -> Result<PathBuf, Self::Error> {
    let weights = handle.to_string_lossy();
    let imgsz = request.imgsz.to_string();
    let flag = |on: bool| if on { "1" } else { "0" };

    // 导出可能持续数分钟，stderr 直接透传，stdout 边读边转发
    let mut child = self
      .command(&[
        "-c",
        EXPORT_SCRIPT,
        &*weights,
        request.format,
        imgsz.as_str(),
        flag(request.nms),
        flag(request.int8),
      ])
      .stdout(Stdio::piped())
      .stderr(Stdio::inherit())
      .spawn()
      .map_err(|e| self.spawn_error(e))?;

    let artifact = match child.stdout.take() {
      Some(stdout) => follow_export_output(BufReader::new(stdout))?,
      None => None,
    };
    let status = child.wait()?;
    if !status.success() {
      error!("ultralytics 导出失败: {}", status);
      return Err(UltralyticsError::ExportFailed(status.to_string()));
    }

    artifact.ok_or(UltralyticsError::NoArtifact)
  }
}

#[cfg(test)]
mod tests {
  use std::io::Cursor;

  use super::*;

  fn follow(stdout: &str) -> Option<PathBuf> {
    follow_export_output(Cursor::new(stdout)).unwrap()
  }

  #[test]
  fn parses_last_marker_line() {
    let stdout = "Ultralytics 8.3.0\nCHEJIAN_ARTIFACT=old.tflite\nTensorFlow Lite: export success\nCHEJIAN_ARTIFACT=yolo26n_saved_model/yolo26n_float32.tflite\n";
    assert_eq!(
      follow(stdout),
      Some(PathBuf::from("yolo26n_saved_model/yolo26n_float32.tflite"))
    );
  }

  #[test]
  fn missing_marker_yields_none() {
    assert_eq!(follow("export success\n"), None);
    assert_eq!(follow("CHEJIAN_ARTIFACT=\n"), None);
    assert_eq!(follow(""), None);
  }

  #[test]
  fn marker_without_trailing_newline_is_read() {
    assert_eq!(follow("progress 100%\nCHEJIAN_ARTIFACT=a.tflite"), Some(PathBuf::from("a.tflite")));
  }

  #[test]
  fn tail_keeps_last_lines() {
    assert_eq!(tail("a\nb\nc", 2), "b\nc");
    assert_eq!(tail("a", 5), "a");
    assert_eq!(tail("", 3), "");
  }

  #[test]
  fn missing_interpreter_is_reported() {
    let exporter = UltralyticsExporter::with_python("chejian-no-such-python");
    let err = exporter.probe().unwrap_err();
    assert!(matches!(err, UltralyticsError::PythonNotFound(_)));
  }

  #[test]
  fn script_marker_matches_parser() {
    assert!(EXPORT_SCRIPT.contains(ARTIFACT_MARKER));
  }
}
