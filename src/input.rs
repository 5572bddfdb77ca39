// 该文件是 Chejian （车检） 项目的一部分。
// src/input.rs - 图像文件输入
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

use std::path::Path;

use image::{ImageReader, RgbImage};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum ImageFileInputError {
  #[error("I/O error: {0}")]
  IoError(#[from] std::io::Error),
  #[error("Image loading error: {0}")]
  ImageLoadError(#[from] image::ImageError),
}

/// 读取并解码图像文件，统一转为 RGB8
pub fn load_image(path: &Path) -> Result<RgbImage, ImageFileInputError> {
  let image = ImageReader::open(path)?.with_guessed_format()?.decode()?;
  debug!(
    "图像已解码: {} ({}x{})",
    path.display(),
    image.width(),
    image.height()
  );
  Ok(image.to_rgb8())
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::Rgb;

  #[test]
  fn decodes_png_into_rgb() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pixel.png");
    RgbImage::from_pixel(3, 2, Rgb([9, 8, 7])).save(&path).unwrap();

    let image = load_image(&path).unwrap();
    assert_eq!(image.dimensions(), (3, 2));
    assert_eq!(image.get_pixel(2, 1), &Rgb([9, 8, 7]));
  }

  #[test]
  fn missing_file_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = load_image(&dir.path().join("nope.jpg")).unwrap_err();
    assert!(matches!(err, ImageFileInputError::IoError(_)));
  }

  #[test]
  fn garbage_is_decode_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.jpg");
    std::fs::write(&path, b"not an image").unwrap();
    let err = load_image(&path).unwrap_err();
    assert!(matches!(err, ImageFileInputError::ImageLoadError(_)));
  }
}
