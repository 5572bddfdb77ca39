// 该文件是 Chejian （车检） 项目的一部分。
// src/draw.rs - 目标检测结果可视化
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
  fs::File,
  io::{BufWriter, Write},
  path::{Path, PathBuf},
};

use ab_glyph::{FontRef, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;

use crate::{detect::Detection, model::DetectResult};

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 20.0;
const LABEL_TEXT_HEIGHT: i32 = 24;
const LABEL_CHAR_WIDTH: f32 = 11.0; // 每字符平均宽度（粗略估计）
const LABEL_TEXT_VERTICAL_PADDING: i32 = 2;
const LABEL_COLOR: [u8; 3] = [0, 0, 255]; // 蓝色
const BOX_THICKNESS: i32 = 2;

pub struct Draw<'a> {
  font_size: f32,
  label_text_height: i32,
  label_char_width: f32,
  label_text_vertical_padding: i32,
  font: FontRef<'a>,
  label_color: [u8; 3],
}

impl Default for Draw<'static> {
  fn default() -> Self {
    let font_data = include_bytes!("../assets/font.ttf");
    let font = FontRef::try_from_slice(font_data).expect("无法加载嵌入的字体文件");

    Self {
      font_size: LABEL_FONT_SIZE,
      label_text_height: LABEL_TEXT_HEIGHT,
      label_char_width: LABEL_CHAR_WIDTH,
      label_text_vertical_padding: LABEL_TEXT_VERTICAL_PADDING,
      label_color: LABEL_COLOR,
      font,
    }
  }
}

impl Draw<'_> {
  // 在图像上绘制一个矩形边框，bbox 为归一化坐标 [x_min, y_min, x_max, y_max]
  fn draw_bbox_with_label(&self, image: &mut RgbImage, bbox: &[f32; 4], label: &str) {
    let (w, h) = (image.width() as f32, image.height() as f32);
    if image.width() == 0 || image.height() == 0 {
      return;
    }

    let x_min = ((bbox[0] * w).floor() as i32).clamp(0, w as i32 - 1);
    let y_min = ((bbox[1] * h).floor() as i32).clamp(0, h as i32 - 1);
    let x_max = ((bbox[2] * w).ceil() as i32).clamp(0, w as i32 - 1);
    let y_max = ((bbox[3] * h).ceil() as i32).clamp(0, h as i32 - 1);

    if x_min >= x_max || y_min >= y_max {
      return;
    }

    let color = Rgb(self.label_color);

    // 绘制边框（逐层内缩加粗）
    for thickness in 0..BOX_THICKNESS {
      let width = x_max - x_min - 2 * thickness;
      let height = y_max - y_min - 2 * thickness;
      if width <= 0 || height <= 0 {
        break;
      }
      let rect = Rect::at(x_min + thickness, y_min + thickness).of_size(width as u32 + 1, height as u32 + 1);
      draw_hollow_rect_mut(image, rect, color);
    }

    // 估算文本大小（粗略估计）
    let text_width = (label.chars().count() as f32 * self.label_char_width) as i32;
    let text_height = self.label_text_height;

    // 标签背景在边框上方，超出顶部时贴边
    let label_x = x_min;
    let label_y = (y_min - text_height).max(0);

    let max_width = (w as i32 - label_x).max(0);
    let label_width = text_width.min(max_width) as u32;
    let label_height = text_height as u32;

    if label_width > 0 && label_height > 0 {
      let rect = Rect::at(label_x, label_y).of_size(label_width, label_height);
      draw_filled_rect_mut(image, rect, color);

      draw_text_mut(
        image,
        Rgb([255u8, 255u8, 255u8]),
        label_x,
        label_y + self.label_text_vertical_padding,
        PxScale::from(self.font_size),
        &self.font,
        label,
      );
    }
  }

  /// 在图像副本上绘制全部检测结果
  pub fn draw_detections<L>(&self, image: &RgbImage, result: &DetectResult, label_of: L) -> RgbImage
  where
    L: Fn(u32) -> String,
  {
    let mut canvas = image.clone();
    for item in result.items.iter() {
      let label = format!("{} {:.2}", label_of(item.class_id), item.score);
      self.draw_bbox_with_label(&mut canvas, &item.bbox, &label);
    }
    canvas
  }
}

/// 检测结果文本记录
pub struct Record {
  pub label_with_name: bool,
}

impl Record {
  /// 记录文件与图像同名，扩展名为 txt
  pub fn record_path(image_path: &Path) -> PathBuf {
    image_path.with_extension("txt")
  }

  pub fn format_line(&self, detection: &Detection) -> String {
    let name = if self.label_with_name {
      detection.name.clone()
    } else {
      detection.class_id.to_string()
    };
    let [x1, y1, x2, y2] = detection.bbox;
    format!(
      "{}, {:.4}, {:.1}, {:.1}, {:.1}, {:.1}",
      name, detection.score, x1, y1, x2, y2
    )
  }

  pub fn record(&self, detections: &[Detection], image_path: &Path) -> Result<PathBuf, std::io::Error> {
    let path = Self::record_path(image_path);
    let mut file = BufWriter::new(File::create(&path)?);
    for detection in detections {
      writeln!(file, "{}", self.format_line(detection))?;
    }
    file.flush()?;
    Ok(path)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::DetectItem;

  fn car(score: f32, bbox: [f32; 4]) -> Detection {
    Detection {
      bbox,
      score,
      class_id: 2,
      name: "car".to_string(),
    }
  }

  #[test]
  fn draws_box_edges_in_label_color() {
    let image = RgbImage::from_pixel(100, 100, Rgb([0, 0, 0]));
    let result = DetectResult::from(vec![DetectItem {
      class_id: 2,
      score: 0.9,
      bbox: [0.5, 0.5, 0.9, 0.9],
    }]);

    let drawn = Draw::default().draw_detections(&image, &result, |_| "car".to_string());

    assert_eq!(drawn.get_pixel(50, 70), &Rgb(LABEL_COLOR));
    assert_eq!(drawn.get_pixel(70, 90), &Rgb(LABEL_COLOR));
    // 框内部保持原样
    assert_eq!(drawn.get_pixel(70, 70), &Rgb([0, 0, 0]));
    // 原图不被修改
    assert_eq!(image.get_pixel(50, 70), &Rgb([0, 0, 0]));
  }

  #[test]
  fn degenerate_boxes_are_skipped() {
    let image = RgbImage::from_pixel(10, 10, Rgb([1, 1, 1]));
    let result = DetectResult::from(vec![DetectItem {
      class_id: 0,
      score: 0.5,
      bbox: [0.5, 0.5, 0.5, 0.5],
    }]);
    let drawn = Draw::default().draw_detections(&image, &result, |id| id.to_string());
    assert_eq!(drawn, image);
  }

  #[test]
  fn record_lines_use_name_or_id() {
    let detection = car(0.91, [10.0, 20.04, 30.0, 40.0]);
    let by_name = Record { label_with_name: true };
    let by_id = Record { label_with_name: false };
    assert_eq!(by_name.format_line(&detection), "car, 0.9100, 10.0, 20.0, 30.0, 40.0");
    assert_eq!(by_id.format_line(&detection), "2, 0.9100, 10.0, 20.0, 30.0, 40.0");
  }

  #[test]
  fn record_written_next_to_image() {
    let dir = tempfile::tempdir().unwrap();
    let image_path = dir.path().join("annotated_car.jpg");
    let record = Record { label_with_name: true };

    let path = record
      .record(&[car(0.5, [1.0, 2.0, 3.0, 4.0]), car(0.25, [5.0, 6.0, 7.0, 8.0])], &image_path)
      .unwrap();

    assert_eq!(path, dir.path().join("annotated_car.txt"));
    let text = std::fs::read_to_string(path).unwrap();
    assert_eq!(
      text,
      "car, 0.5000, 1.0, 2.0, 3.0, 4.0\ncar, 0.2500, 5.0, 6.0, 7.0, 8.0\n"
    );
  }
}
