// 该文件是 Chejian （车检） 项目的一部分。
// src/model/decode.rs - YOLO26 检测头解码
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

use thiserror::Error;
use tracing::{debug, error};

use crate::model::{DetectItem, DetectResult};

pub const YOLO26_CLASS_NUM: usize = 80;
pub const YOLO26_STRIDES: [u32; 3] = [8, 16, 32];
pub const YOLO26_NUM_OUTPUTS: usize = 2 * YOLO26_STRIDES.len();

#[derive(Error, Debug, PartialEq)]
pub enum DecodeError {
  #[error("缺少检测头 {0} 的输出")]
  MissingHead(usize),
  #[error("模型输入尺寸为 {model}，与推理尺寸 {requested} 不一致")]
  InputSizeMismatch { model: u32, requested: u32 },
  #[error("检测头 {head} 输出大小不匹配: 实际 {got:?}, 期望 {expected:?}")]
  OutputShapeMismatch {
    head: usize,
    got: (usize, usize),
    expected: (usize, usize),
  },
}

/// 输入尺寸必须能被最大步长整除
pub fn is_valid_input_size(imgsz: u32) -> bool {
  let max_stride = YOLO26_STRIDES[YOLO26_STRIDES.len() - 1];
  imgsz > 0 && imgsz % max_stride == 0
}

/// 各检测头的特征图尺寸 (h, w)
pub fn head_sizes(imgsz: u32) -> [(usize, usize); 3] {
  YOLO26_STRIDES.map(|stride| {
    let side = (imgsz / stride) as usize;
    (side, side)
  })
}

/// 由第一个检测头的回归张量反推模型编译时的输入尺寸
pub fn model_input_size(outputs: &[&[f32]]) -> Option<u32> {
  let (Some(a), Some(b)) = (outputs.first(), outputs.get(1)) else {
    return None;
  };
  let reg_len = a.len().min(b.len());
  if reg_len == 0 || reg_len % 4 != 0 {
    return None;
  }
  let spatial = reg_len / 4;
  let side = (spatial as f64).sqrt().round() as usize;
  if side * side != spatial {
    return None;
  }
  u32::try_from(side).ok().map(|side| side * YOLO26_STRIDES[0])
}

/// 根据张量大小匹配回归和分类输出
/// 返回 (reg, cls) 元组，如果大小不匹配则返回错误
fn match_reg_cls_tensors<'a>(
  tensor1: &'a [f32],
  tensor2: &'a [f32],
  reg_expected: usize,
  cls_expected: usize,
  head_idx: usize,
) -> Result<(&'a [f32], &'a [f32]), DecodeError> {
  if tensor1.len() == reg_expected && tensor2.len() == cls_expected {
    Ok((tensor1, tensor2))
  } else if tensor1.len() == cls_expected && tensor2.len() == reg_expected {
    debug!("检测头 {}: 输出顺序交换", head_idx);
    Ok((tensor2, tensor1))
  } else {
    error!(
      "检测头 {}: 输出大小不匹配 - 张量1: {}, 张量2: {}, 期望回归: {}, 期望分类: {}",
      head_idx,
      tensor1.len(),
      tensor2.len(),
      reg_expected,
      cls_expected
    );
    Err(DecodeError::OutputShapeMismatch {
      head: head_idx,
      got: (tensor1.len(), tensor2.len()),
      expected: (reg_expected, cls_expected),
    })
  }
}

/// 解码 YOLO26 端到端检测头输出
///
/// `outputs` 依次为三个检测头的 (回归, 分类) 张量，每头两个，顺序可交换。
/// 回归为到网格中心的 `ltrb` 距离（以步长为单位），分类为未归一化的 logit。
/// 得分不高于 `conf` 的候选被丢弃；输出框为相对输入尺寸归一化的 `xyxy`。
/// 任一检测头缺失或大小与 `imgsz` 不符时返回错误，不产生部分结果。
pub fn decode_yolo26(outputs: &[&[f32]], imgsz: u32, conf: f32) -> Result<DetectResult, DecodeError> {
  if let Some(model) = model_input_size(outputs)
    && model != imgsz
  {
    error!("模型输入尺寸 {} 与推理尺寸 {} 不一致", model, imgsz);
    return Err(DecodeError::InputSizeMismatch {
      model,
      requested: imgsz,
    });
  }

  let input_size = imgsz as f32;
  let mut items = Vec::new();

  for (head_idx, (&(map_h, map_w), stride)) in
    head_sizes(imgsz).iter().zip(YOLO26_STRIDES).enumerate()
  {
    let stride = stride as f32;
    let spatial = map_h * map_w;
    let reg_expected = 4 * spatial;
    let cls_expected = YOLO26_CLASS_NUM * spatial;

    let (Some(tensor1), Some(tensor2)) = (outputs.get(head_idx * 2), outputs.get(head_idx * 2 + 1))
    else {
      error!("缺少检测头 {} 的输出", head_idx);
      return Err(DecodeError::MissingHead(head_idx));
    };

    let (reg, cls) = match_reg_cls_tensors(tensor1, tensor2, reg_expected, cls_expected, head_idx)?;

    for h in 0..map_h {
      for w in 0..map_w {
        let idx = h * map_w + w;

        let (score, class_id) = {
          let mut max_logit = f32::MIN;
          let mut cls_idx = 0usize;
          for c in 0..YOLO26_CLASS_NUM {
            let logit = cls[c * spatial + idx];
            if logit > max_logit {
              max_logit = logit;
              cls_idx = c;
            }
          }
          (sigmoid(max_logit), cls_idx as u32)
        };

        if score <= conf {
          continue;
        }

        let left = reg[idx];
        let top = reg[spatial + idx];
        let right = reg[2 * spatial + idx];
        let bottom = reg[3 * spatial + idx];

        let grid_x = (w as f32) + 0.5;
        let grid_y = (h as f32) + 0.5;

        let xmin = ((grid_x - left) * stride).clamp(0.0, input_size);
        let ymin = ((grid_y - top) * stride).clamp(0.0, input_size);
        let xmax = ((grid_x + right) * stride).clamp(0.0, input_size);
        let ymax = ((grid_y + bottom) * stride).clamp(0.0, input_size);

        if xmin >= xmax || ymin >= ymax {
          continue;
        }

        items.push(DetectItem {
          class_id,
          score,
          bbox: [
            xmin / input_size,
            ymin / input_size,
            xmax / input_size,
            ymax / input_size,
          ],
        });
      }
    }
  }

  debug!("检测到 {} 个物体", items.len());

  Ok(DetectResult::from(items))
}

fn sigmoid(x: f32) -> f32 {
  1.0 / (1.0 + (-x).exp())
}

#[cfg(test)]
mod tests {
  use super::*;

  const IMGSZ: u32 = 64;

  fn heads_for(imgsz: u32) -> Vec<(Vec<f32>, Vec<f32>)> {
    head_sizes(imgsz)
      .iter()
      .map(|&(h, w)| {
        let spatial = h * w;
        (vec![0.0; 4 * spatial], vec![-10.0; YOLO26_CLASS_NUM * spatial])
      })
      .collect()
  }

  fn empty_heads() -> Vec<(Vec<f32>, Vec<f32>)> {
    heads_for(IMGSZ)
  }

  fn as_outputs(heads: &[(Vec<f32>, Vec<f32>)]) -> Vec<&[f32]> {
    heads
      .iter()
      .flat_map(|(reg, cls)| [reg.as_slice(), cls.as_slice()])
      .collect()
  }

  #[test]
  fn input_size_must_align_to_largest_stride() {
    assert!(is_valid_input_size(640));
    assert!(is_valid_input_size(320));
    assert!(!is_valid_input_size(0));
    assert!(!is_valid_input_size(600));
  }

  #[test]
  fn head_sizes_follow_strides() {
    assert_eq!(head_sizes(640), [(80, 80), (40, 40), (20, 20)]);
  }

  #[test]
  fn low_scores_produce_nothing() {
    let heads = empty_heads();
    let result = decode_yolo26(&as_outputs(&heads), IMGSZ, 0.25).unwrap();
    assert!(result.is_empty());
  }

  #[test]
  fn decodes_single_cell_into_normalized_box() {
    let mut heads = empty_heads();
    let (map_h, map_w) = head_sizes(IMGSZ)[0];
    let spatial = map_h * map_w;
    let idx = 2 * map_w + 3;
    {
      let (reg, cls) = &mut heads[0];
      for k in 0..4 {
        reg[k * spatial + idx] = 1.0;
      }
      cls[2 * spatial + idx] = 5.0;
    }

    let result = decode_yolo26(&as_outputs(&heads), IMGSZ, 0.25).unwrap();
    assert_eq!(result.len(), 1);
    let item = &result.items[0];
    assert_eq!(item.class_id, 2);
    assert!(item.score > 0.99);
    assert_eq!(item.bbox, [0.3125, 0.1875, 0.5625, 0.4375]);
  }

  #[test]
  fn swapped_head_outputs_are_recognized() {
    let mut heads = empty_heads();
    let (map_h, map_w) = head_sizes(IMGSZ)[1];
    let spatial = map_h * map_w;
    {
      let (reg, cls) = &mut heads[1];
      for k in 0..4 {
        reg[k * spatial] = 0.5;
      }
      cls[7 * spatial] = 3.0;
    }
    let mut outputs = as_outputs(&heads);
    outputs.swap(2, 3);

    let result = decode_yolo26(&outputs, IMGSZ, 0.25).unwrap();
    assert_eq!(result.len(), 1);
    assert_eq!(result.items[0].class_id, 7);
    assert_eq!(result.items[0].bbox, [0.0, 0.0, 0.25, 0.25]);
  }

  #[test]
  fn threshold_is_exclusive() {
    let mut heads = empty_heads();
    let spatial = 4;
    for k in 0..4 {
      heads[2].0[k * spatial] = 1.0;
    }
    heads[2].1[0] = 0.0; // sigmoid(0) = 0.5
    let outputs = as_outputs(&heads);
    assert!(decode_yolo26(&outputs, IMGSZ, 0.5).unwrap().is_empty());
    assert_eq!(decode_yolo26(&outputs, IMGSZ, 0.4).unwrap().len(), 1);
  }

  #[test]
  fn model_size_is_recovered_from_first_head() {
    let heads = heads_for(640);
    assert_eq!(model_input_size(&as_outputs(&heads)), Some(640));
    assert_eq!(model_input_size(&[]), None);
  }

  #[test]
  fn mismatched_inference_size_is_an_error() {
    let mut heads = heads_for(640);
    for (reg, cls) in heads.iter_mut() {
      reg.fill(1.0);
      cls.fill(5.0);
    }
    let outputs = as_outputs(&heads);

    assert_eq!(decode_yolo26(&outputs, 640, 0.25).unwrap().len(), 8400);
    assert_eq!(
      decode_yolo26(&outputs, 320, 0.25).unwrap_err(),
      DecodeError::InputSizeMismatch {
        model: 640,
        requested: 320,
      }
    );
  }

  #[test]
  fn missing_heads_are_an_error() {
    assert_eq!(decode_yolo26(&[], IMGSZ, 0.25).unwrap_err(), DecodeError::MissingHead(0));

    let heads = empty_heads();
    let outputs = as_outputs(&heads);
    assert_eq!(
      decode_yolo26(&outputs[..4], IMGSZ, 0.25).unwrap_err(),
      DecodeError::MissingHead(2)
    );
  }

  #[test]
  fn wrong_sized_head_is_an_error() {
    let mut heads = empty_heads();
    heads[2].1.truncate(10);
    let outputs = as_outputs(&heads);

    assert_eq!(
      decode_yolo26(&outputs, IMGSZ, 0.25).unwrap_err(),
      DecodeError::OutputShapeMismatch {
        head: 2,
        got: (16, 10),
        expected: (16, 320),
      }
    );
  }
}
