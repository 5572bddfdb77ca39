// 该文件是 Chejian （车检） 项目的一部分。
// src/model/yolo26.rs - RKNN YOLO26 模型
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
  ffi::OsStr,
  path::{Path, PathBuf},
};

use image::RgbImage;
use rknpu::{Context, InitFlags, TensorType};
use thiserror::Error;
use tracing::{debug, error, info};

use crate::{
  draw::Draw,
  frame::RgbNhwcFrame,
  model::{
    DetectResult, Detector, PredictParams, coco_label,
    decode::{DecodeError, YOLO26_NUM_OUTPUTS, decode_yolo26, is_valid_input_size},
  },
};

const YOLO26_NUM_INPUTS: u32 = 1;

const RKNN_RUNTIME_LIB: &str = "librknnrt.so";
const LD_SO_CONF: &str = "/etc/ld.so.conf";
const LD_SO_CONF_DIR: &str = "/etc/ld.so.conf.d";
// 动态链接器的默认搜索目录
const SYSTEM_LIB_DIRS: [&str; 10] = [
  "/lib",
  "/lib64",
  "/usr/lib",
  "/usr/lib64",
  "/usr/local/lib",
  "/usr/local/lib64",
  "/lib/aarch64-linux-gnu",
  "/usr/lib/aarch64-linux-gnu",
  "/lib/arm-linux-gnueabihf",
  "/usr/lib/arm-linux-gnueabihf",
];

#[derive(Error, Debug)]
pub enum Yolo26Error {
  #[error("RKNN 运行时不可用: 未找到 {0}。请安装 rknpu2 运行时 (https://github.com/airockchip/rknn-toolkit2)")]
  RuntimeUnavailable(&'static str),
  #[error("模型加载错误: {0}")]
  ModelLoadError(#[from] std::io::Error),
  #[error("模型无效: {0}, 错误: {1}")]
  ModelInvalid(String, rknpu::Error),
  #[error("RKNN 错误: {0}")]
  RknnError(rknpu::Error),
  #[error("推理尺寸 {0} 无效，必须为 32 的正整数倍")]
  InvalidInputSize(u32),
  #[error("无法读取第 {0} 个模型输出")]
  MissingOutput(usize),
  #[error("模型输出解码失败: {0}")]
  DecodeError(#[from] DecodeError),
}

impl From<rknpu::Error> for Yolo26Error {
  fn from(err: rknpu::Error) -> Self {
    Yolo26Error::RknnError(err)
  }
}

impl Yolo26Error {
  pub fn invalid(msg: &str, e: rknpu::Error) -> Self {
    Yolo26Error::ModelInvalid(msg.to_string(), e)
  }
}

pub struct Yolo26 {
  context: Context,
}

pub struct Yolo26Builder {
  model_path: PathBuf,
}

impl Yolo26Builder {
  pub fn new(model_path: impl Into<PathBuf>) -> Self {
    Self {
      model_path: model_path.into(),
    }
  }

  pub fn build(self) -> Result<Yolo26, Yolo26Error> {
    info!("加载模型文件: {}", self.model_path.display());
    let model_data = std::fs::read(&self.model_path)?;
    debug!(
      "模型文件大小: {:.2} MB",
      model_data.len() as f64 / (1024.0 * 1024.0)
    );

    info!("创建 RKNN 推理上下文");
    let context = Context::new(&model_data, InitFlags::default())?;

    match context.sdk_version() {
      Ok(version) => {
        if let Ok(api_ver) = version.api_version() {
          debug!("模型 API 版本: {}", api_ver);
        }
        if let Ok(drv_ver) = version.driver_version() {
          debug!("模型驱动版本: {}", drv_ver);
        }
      }
      Err(e) => {
        error!("查询 SDK 版本失败: {}", e);
        return Err(Yolo26Error::invalid("无法查询 SDK 版本", e));
      }
    }

    let num_inputs = context
      .num_inputs()
      .map_err(|e| Yolo26Error::invalid("无法获取输入数量", e))?;
    let num_outputs = context
      .num_outputs()
      .map_err(|e| Yolo26Error::invalid("无法获取输出数量", e))?;

    if num_inputs != YOLO26_NUM_INPUTS {
      return Err(Yolo26Error::invalid(
        &format!("预期模型输入数量为 {}, 实际为 {}", YOLO26_NUM_INPUTS, num_inputs),
        rknpu::Error::InvalidModel,
      ));
    }

    if num_outputs as usize != YOLO26_NUM_OUTPUTS {
      return Err(Yolo26Error::invalid(
        &format!("预期模型输出数量为 {}, 实际为 {}", YOLO26_NUM_OUTPUTS, num_outputs),
        rknpu::Error::InvalidModel,
      ));
    }

    info!("模型加载完成");
    Ok(Yolo26 { context })
  }
}

impl Yolo26 {
  pub fn infer(&self, frame: &RgbNhwcFrame, params: &PredictParams) -> Result<DetectResult, Yolo26Error> {
    debug!("设置模型输入 {}x{}", frame.width(), frame.height());
    self.context.set_input(
      0,
      frame.as_nhwc(),
      rknpu::TensorFormat::NHWC,
      TensorType::UInt8,
    )?;

    debug!("执行模型推理");
    self.context.run()?;

    let output = self.context.get_outputs()?;

    let mut tensors = Vec::with_capacity(YOLO26_NUM_OUTPUTS);
    for idx in 0..YOLO26_NUM_OUTPUTS {
      match output.get_f32(idx) {
        Ok(data) => tensors.push(data),
        Err(e) => {
          error!("获取第 {} 个输出失败: {}", idx, e);
          return Err(Yolo26Error::MissingOutput(idx));
        }
      }
    }

    let slices: Vec<&[f32]> = tensors.iter().map(|t| &t[..]).collect();
    Ok(decode_yolo26(&slices, params.imgsz, params.conf)?)
  }
}

/// 解析 ld.so.conf 格式的内容，返回其中的目录，`include` 行由调用方展开
fn parse_ld_so_conf(text: &str) -> Vec<PathBuf> {
  text
    .lines()
    .map(|line| line.split('#').next().unwrap_or_default().trim())
    .filter(|line| !line.is_empty() && !line.starts_with("include"))
    .map(PathBuf::from)
    .collect()
}

/// 读取 /etc/ld.so.conf 与 /etc/ld.so.conf.d/*.conf 中登记的目录
fn ld_so_conf_dirs() -> Vec<PathBuf> {
  let mut files = vec![PathBuf::from(LD_SO_CONF)];
  if let Ok(entries) = std::fs::read_dir(LD_SO_CONF_DIR) {
    let mut confs: Vec<PathBuf> = entries
      .filter_map(|entry| entry.ok().map(|e| e.path()))
      .filter(|path| path.extension().is_some_and(|ext| ext == "conf"))
      .collect();
    confs.sort();
    files.extend(confs);
  }
  files
    .iter()
    .filter_map(|file| std::fs::read_to_string(file).ok())
    .flat_map(|text| parse_ld_so_conf(&text))
    .collect()
}

/// 按动态链接器的顺序列出运行时库的搜索目录：
/// LD_LIBRARY_PATH，ld.so.conf 登记的目录，最后是系统默认目录
fn runtime_search_dirs(ld_library_path: Option<&OsStr>, conf_dirs: Vec<PathBuf>) -> Vec<PathBuf> {
  let mut dirs: Vec<PathBuf> = ld_library_path
    .map(|paths| {
      std::env::split_paths(paths)
        .filter(|dir| !dir.as_os_str().is_empty())
        .collect()
    })
    .unwrap_or_default();
  dirs.extend(conf_dirs);
  dirs.extend(SYSTEM_LIB_DIRS.iter().map(PathBuf::from));
  dirs
}

fn find_runtime(dirs: &[PathBuf]) -> Option<PathBuf> {
  dirs
    .iter()
    .map(|dir| dir.join(RKNN_RUNTIME_LIB))
    .find(|path| path.is_file())
}

/// 基于 RKNPU 的 YOLO26 检测提供者
#[derive(Debug, Default, Clone, Copy)]
pub struct Yolo26Provider;

impl Detector for Yolo26Provider {
  type Handle = Yolo26;
  type Error = Yolo26Error;

  fn probe(&self) -> Result<(), Self::Error> {
    let ld_library_path = std::env::var_os("LD_LIBRARY_PATH");
    let dirs = runtime_search_dirs(ld_library_path.as_deref(), ld_so_conf_dirs());
    match find_runtime(&dirs) {
      Some(path) => {
        debug!("RKNN 运行时: {}", path.display());
        Ok(())
      }
      None => Err(Yolo26Error::RuntimeUnavailable(RKNN_RUNTIME_LIB)),
    }
  }

  fn load(&self, weights: &Path) -> Result<Self::Handle, Self::Error> {
    Yolo26Builder::new(weights).build()
  }

  fn predict(
    &self,
    handle: &Self::Handle,
    image: &RgbImage,
    params: &PredictParams,
  ) -> Result<Vec<DetectResult>, Self::Error> {
    if !is_valid_input_size(params.imgsz) {
      return Err(Yolo26Error::InvalidInputSize(params.imgsz));
    }
    let frame = RgbNhwcFrame::resized_from(image, params.imgsz);
    let now = std::time::Instant::now();
    let result = handle.infer(&frame, params)?;
    info!("推理完成，耗时: {:.2?}", now.elapsed());
    Ok(vec![result])
  }

  fn render(&self, _handle: &Self::Handle, image: &RgbImage, result: &DetectResult) -> RgbImage {
    Draw::default().draw_detections(image, result, |id| {
      coco_label(id).map_or_else(|| id.to_string(), str::to_string)
    })
  }

  fn label(&self, _handle: &Self::Handle, class_id: u32) -> Option<String> {
    coco_label(class_id).map(str::to_string)
  }
}
