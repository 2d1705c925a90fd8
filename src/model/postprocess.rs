// 该文件是 Jiannan （剑南春雨） 项目的一部分。
// src/model/postprocess.rs - 检测后处理
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
use tracing::debug;

use crate::model::DetectItem;

/// 每个候选行的头部字段数: cx, cy, w, h, objectness
const CANDIDATE_HEADER: usize = 5;

/// 后处理配置
///
/// 与推理引擎无关，只描述原始张量的行布局和过滤阈值。
#[derive(Debug, Clone)]
pub struct PostprocessConfig {
  pub num_classes: usize,
  pub score_threshold: f32,
  pub iou_threshold: f32,
}

#[derive(Error, Debug)]
pub enum DecodeError {
  #[error("张量形状错误: 长度 {len} 无法按每候选 {stride} 个值划分")]
  ShapeMismatch { len: usize, stride: usize },
}

/// 解码原始输出张量
///
/// 张量为平铺的候选行，每行 `5 + num_classes` 个值:
/// `[cx, cy, w, h, objectness, class_0, .., class_{n-1}]`，坐标为归一化值。
/// 每行取最高类别分数，置信度 = objectness × 类别分数，
/// 低于阈值的候选丢弃，其余转换为 [x_min, y_min, x_max, y_max] 角点坐标。
pub fn decode_candidates(
  raw: &[f32],
  config: &PostprocessConfig,
) -> Result<Vec<DetectItem>, DecodeError> {
  let stride = CANDIDATE_HEADER + config.num_classes;
  if raw.len() % stride != 0 {
    return Err(DecodeError::ShapeMismatch {
      len: raw.len(),
      stride,
    });
  }

  let mut items = Vec::new();

  for row in raw.chunks_exact(stride) {
    let objectness = row[4];
    // 类别分数不超过 1，objectness 低于阈值时置信度必然低于阈值
    if objectness < config.score_threshold {
      continue;
    }

    let mut best_score = 0.0f32;
    let mut best_class = 0usize;
    for (class_id, &class_score) in row[CANDIDATE_HEADER..].iter().enumerate() {
      if class_score > best_score {
        best_score = class_score;
        best_class = class_id;
      }
    }

    let score = objectness * best_score;
    if score < config.score_threshold {
      continue;
    }

    let (cx, cy, w, h) = (row[0], row[1], row[2], row[3]);

    let x_min = (cx - w / 2.0).clamp(0.0, 1.0);
    let y_min = (cy - h / 2.0).clamp(0.0, 1.0);
    let x_max = (cx + w / 2.0).clamp(0.0, 1.0);
    let y_max = (cy + h / 2.0).clamp(0.0, 1.0);

    if x_min >= x_max || y_min >= y_max {
      continue;
    }

    items.push(DetectItem {
      class_id: best_class as u32,
      score,
      bbox: [x_min, y_min, x_max, y_max],
    });
  }

  debug!("解码得到 {} 个候选", items.len());

  Ok(items)
}

/// 计算两个角点编码边界框的 IoU
pub fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
  let x1 = a[0].max(b[0]);
  let y1 = a[1].max(b[1]);
  let x2 = a[2].min(b[2]);
  let y2 = a[3].min(b[3]);

  let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
  let area_a = (a[2] - a[0]) * (a[3] - a[1]);
  let area_b = (b[2] - b[0]) * (b[3] - b[1]);
  let union = area_a + area_b - intersection;

  if union > 0.0 {
    intersection / union
  } else {
    0.0
  }
}

/// 按类别做非极大值抑制
///
/// 先按置信度降序稳定排序（同分保持出现顺序），再贪心保留每类中
/// 置信度最高的框，抑制与其 IoU 超过阈值的同类框。不同类别互不抑制。
pub fn non_max_suppression(mut items: Vec<DetectItem>, iou_threshold: f32) -> Vec<DetectItem> {
  items.sort_by(|a, b| b.score.total_cmp(&a.score));

  let mut result = Vec::new();

  while !items.is_empty() {
    let best = items.remove(0);

    items.retain(|item| {
      if item.class_id != best.class_id {
        return true;
      }
      iou(&item.bbox, &best.bbox) <= iou_threshold
    });

    result.push(best);
  }

  debug!("非极大值抑制后剩余 {} 个检测", result.len());

  result
}

#[cfg(test)]
mod tests {
  use super::*;

  fn config() -> PostprocessConfig {
    PostprocessConfig {
      num_classes: 3,
      score_threshold: 0.3,
      iou_threshold: 0.45,
    }
  }

  fn candidate(cx: f32, cy: f32, w: f32, h: f32, objectness: f32, scores: [f32; 3]) -> Vec<f32> {
    let mut row = vec![cx, cy, w, h, objectness];
    row.extend_from_slice(&scores);
    row
  }

  fn item(class_id: u32, score: f32, bbox: [f32; 4]) -> DetectItem {
    DetectItem {
      class_id,
      score,
      bbox,
    }
  }

  #[test]
  fn empty_tensor_gives_empty_output() {
    let items = decode_candidates(&[], &config()).unwrap();
    assert!(items.is_empty());
  }

  #[test]
  fn wrong_shape_is_decode_error() {
    let raw = vec![0.5f32; 13];
    let err = decode_candidates(&raw, &config()).unwrap_err();
    assert!(matches!(
      err,
      DecodeError::ShapeMismatch { len: 13, stride: 8 }
    ));
  }

  #[test]
  fn single_candidate_keeps_coordinates() {
    let raw = candidate(0.5, 0.5, 0.2, 0.4, 0.9, [0.1, 0.8, 0.1]);
    let items = decode_candidates(&raw, &config()).unwrap();

    assert_eq!(items.len(), 1);
    assert_eq!(items[0].class_id, 1);
    assert!((items[0].score - 0.9 * 0.8).abs() < 1e-6);

    let [x_min, y_min, x_max, y_max] = items[0].bbox;
    assert!((x_min - 0.4).abs() < 1e-6);
    assert!((y_min - 0.3).abs() < 1e-6);
    assert!((x_max - 0.6).abs() < 1e-6);
    assert!((y_max - 0.7).abs() < 1e-6);
  }

  #[test]
  fn every_output_is_above_threshold() {
    let mut raw = candidate(0.5, 0.5, 0.2, 0.2, 0.9, [0.9, 0.05, 0.05]);
    raw.extend(candidate(0.3, 0.3, 0.2, 0.2, 0.5, [0.4, 0.3, 0.3])); // 0.5 * 0.4 = 0.2
    raw.extend(candidate(0.7, 0.7, 0.2, 0.2, 0.2, [0.9, 0.05, 0.05])); // objectness 过低

    let items = decode_candidates(&raw, &config()).unwrap();
    assert_eq!(items.len(), 1);
    for item in &items {
      assert!(item.score >= 0.3);
    }
  }

  #[test]
  fn coordinates_are_clamped() {
    let raw = candidate(0.05, 0.95, 0.3, 0.3, 0.9, [0.9, 0.0, 0.0]);
    let items = decode_candidates(&raw, &config()).unwrap();

    assert_eq!(items.len(), 1);
    let [x_min, y_min, x_max, y_max] = items[0].bbox;
    assert_eq!(x_min, 0.0);
    assert_eq!(y_max, 1.0);
    assert!(x_max > x_min && y_min < y_max);
  }

  #[test]
  fn iou_of_identical_boxes_is_one() {
    let bbox = [0.1, 0.1, 0.5, 0.5];
    assert!((iou(&bbox, &bbox) - 1.0).abs() < 1e-6);
  }

  #[test]
  fn iou_of_disjoint_boxes_is_zero() {
    let a = [0.0, 0.0, 0.2, 0.2];
    let b = [0.5, 0.5, 0.9, 0.9];
    assert_eq!(iou(&a, &b), 0.0);
  }

  #[test]
  fn same_class_overlap_keeps_higher_score() {
    let items = vec![
      item(0, 0.6, [0.10, 0.10, 0.50, 0.50]),
      item(0, 0.9, [0.11, 0.11, 0.51, 0.51]),
    ];

    let kept = non_max_suppression(items, 0.45);
    assert_eq!(kept.len(), 1);
    assert!((kept[0].score - 0.9).abs() < 1e-6);
  }

  #[test]
  fn different_classes_do_not_suppress() {
    let bbox = [0.2, 0.2, 0.6, 0.6];
    let items = vec![item(0, 0.9, bbox), item(1, 0.8, bbox)];

    let kept = non_max_suppression(items, 0.45);
    assert_eq!(kept.len(), 2);
  }

  #[test]
  fn survivors_respect_iou_bound() {
    let items = vec![
      item(0, 0.9, [0.10, 0.10, 0.50, 0.50]),
      item(0, 0.8, [0.15, 0.15, 0.55, 0.55]),
      item(0, 0.7, [0.60, 0.60, 0.90, 0.90]),
      item(1, 0.6, [0.12, 0.12, 0.52, 0.52]),
    ];

    let kept = non_max_suppression(items, 0.45);

    for (i, a) in kept.iter().enumerate() {
      for b in kept.iter().skip(i + 1) {
        if a.class_id == b.class_id {
          assert!(iou(&a.bbox, &b.bbox) <= 0.45);
        }
      }
    }
  }

  #[test]
  fn output_is_sorted_by_descending_score() {
    let items = vec![
      item(0, 0.5, [0.0, 0.0, 0.1, 0.1]),
      item(1, 0.9, [0.3, 0.3, 0.4, 0.4]),
      item(2, 0.7, [0.6, 0.6, 0.7, 0.7]),
    ];

    let kept = non_max_suppression(items, 0.45);
    let scores: Vec<f32> = kept.iter().map(|item| item.score).collect();
    assert_eq!(scores, vec![0.9, 0.7, 0.5]);
  }

  #[test]
  fn equal_scores_keep_encounter_order() {
    let items = vec![
      item(0, 0.8, [0.00, 0.00, 0.10, 0.10]),
      item(0, 0.8, [0.50, 0.50, 0.60, 0.60]),
    ];

    let kept = non_max_suppression(items, 0.45);
    assert_eq!(kept.len(), 2);
    assert_eq!(kept[0].bbox, [0.00, 0.00, 0.10, 0.10]);
    assert_eq!(kept[1].bbox, [0.50, 0.50, 0.60, 0.60]);
  }
}
