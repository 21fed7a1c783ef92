// 该文件是 Kanjian （看见） 项目的一部分。
// src/model/filter.rs - 检测结果阈值过滤
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use tracing::debug;

use super::{DetectItem, DetectResult, WithLabel};

/// 模型输出中的单个候选框，坐标为模型输入像素坐标
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawDetection {
  pub label: i64,
  pub score: f32,
  pub bbox: [f32; 4],
}

impl RawDetection {
  /// 由并列的 boxes / scores / labels 数组组装候选框，多余元素被忽略
  pub fn zip(boxes: &[f32], scores: &[f32], labels: &[i64]) -> Vec<RawDetection> {
    boxes
      .chunks_exact(4)
      .zip(scores)
      .zip(labels)
      .map(|((bbox, &score), &label)| RawDetection {
        label,
        score,
        bbox: [bbox[0], bbox[1], bbox[2], bbox[3]],
      })
      .collect()
  }
}

/// 保留 `score >= threshold` 的候选框
///
/// 设置 `limit` 时按分数降序保留前 `limit` 个；`input_size` 为模型输入的
/// (宽, 高)，用于将坐标归一化到 [0, 1]。
pub fn filter_detections<T: WithLabel>(
  raw: &[RawDetection],
  threshold: f32,
  limit: Option<usize>,
  input_size: (usize, usize),
) -> DetectResult<T> {
  let (width, height) = (input_size.0.max(1) as f32, input_size.1.max(1) as f32);

  let mut kept: Vec<&RawDetection> = raw.iter().filter(|d| d.score >= threshold).collect();

  if let Some(limit) = limit {
    kept.sort_by(|a, b| b.score.total_cmp(&a.score));
    kept.truncate(limit);
  }

  debug!(
    "阈值 {} 过滤后保留 {} / {} 个候选框",
    threshold,
    kept.len(),
    raw.len()
  );

  kept
    .into_iter()
    .map(|d| DetectItem {
      kind: T::from_label_id(d.label.max(0) as u32),
      score: d.score,
      bbox: [
        (d.bbox[0] / width).clamp(0.0, 1.0),
        (d.bbox[1] / height).clamp(0.0, 1.0),
        (d.bbox[2] / width).clamp(0.0, 1.0),
        (d.bbox[3] / height).clamp(0.0, 1.0),
      ],
    })
    .collect::<Vec<_>>()
    .into()
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::CocoLabel;

  fn raw(label: i64, score: f32) -> RawDetection {
    RawDetection {
      label,
      score,
      bbox: [10.0, 20.0, 60.0, 80.0],
    }
  }

  #[test]
  fn keeps_scores_at_or_above_threshold() {
    let input = [raw(1, 0.69), raw(2, 0.7), raw(3, 0.95)];
    let result: DetectResult<CocoLabel> = filter_detections(&input, 0.7, None, (100, 100));
    let scores: Vec<f32> = result.items.iter().map(|i| i.score).collect();
    assert_eq!(scores, vec![0.7, 0.95]);
  }

  #[test]
  fn order_is_preserved_without_limit() {
    let input = [raw(1, 0.8), raw(2, 0.9)];
    let result: DetectResult<CocoLabel> = filter_detections(&input, 0.5, None, (100, 100));
    assert_eq!(result.items[0].kind.to_label_id(), 1);
    assert_eq!(result.items[1].kind.to_label_id(), 2);
  }

  #[test]
  fn limit_keeps_highest_scores() {
    let input = [raw(1, 0.8), raw(2, 0.99), raw(3, 0.9), raw(4, 0.85)];
    let result: DetectResult<CocoLabel> = filter_detections(&input, 0.5, Some(2), (100, 100));
    let labels: Vec<u32> = result.items.iter().map(|i| i.kind.to_label_id()).collect();
    assert_eq!(labels, vec![2, 3]);
  }

  #[test]
  fn zero_limit_drops_everything() {
    let input = [raw(1, 0.9)];
    let result: DetectResult<CocoLabel> = filter_detections(&input, 0.5, Some(0), (100, 100));
    assert!(result.is_empty());
  }

  #[test]
  fn boxes_are_normalized_and_clamped() {
    let input = [RawDetection {
      label: 1,
      score: 0.9,
      bbox: [-5.0, 25.0, 100.0, 250.0],
    }];
    let result: DetectResult<CocoLabel> = filter_detections(&input, 0.5, None, (200, 100));
    assert_eq!(result.items[0].bbox, [0.0, 0.25, 0.5, 1.0]);
  }

  #[test]
  fn labels_map_through_coco_table() {
    let input = [raw(18, 0.9)];
    let result: DetectResult<CocoLabel> = filter_detections(&input, 0.5, None, (100, 100));
    assert_eq!(result.items[0].kind.to_label_str(), "dog");
  }

  #[test]
  fn zip_ignores_trailing_values() {
    let boxes = [0.0, 0.0, 1.0, 1.0, 2.0, 2.0, 3.0, 3.0, 9.0];
    let detections = RawDetection::zip(&boxes, &[0.5, 0.6, 0.7], &[1, 2]);
    assert_eq!(detections.len(), 2);
    assert_eq!(detections[1].bbox, [2.0, 2.0, 3.0, 3.0]);
    assert_eq!(detections[1].label, 2);
  }
}
