// 该文件是 MapBench （扰动精度评测） 项目的一部分。
// src/metric/coco.rs - COCO 评测流程：逐图匹配、累积与汇总
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

use std::collections::BTreeSet;

use crate::{label::Target, metric::MetricsRecord, prediction::Prediction};

const AREA_ALL: usize = 0;
const AREA_SMALL: usize = 1;
const AREA_MEDIUM: usize = 2;
const AREA_LARGE: usize = 3;

/// 评测参数
#[derive(Debug, Clone)]
pub struct MetricParams {
  pub iou_thrs: Vec<f64>,
  pub rec_thrs: Vec<f64>,
  /// 升序，最后一个用于逐图匹配
  pub max_dets: [usize; 3],
  /// all, small, medium, large
  pub area_rngs: [[f64; 2]; 4],
}

impl Default for MetricParams {
  fn default() -> Self {
    Self {
      iou_thrs: (0..10).map(|i| 0.5 + 0.05 * i as f64).collect(),
      rec_thrs: (0..=100).map(|i| i as f64 / 100.0).collect(),
      max_dets: [1, 10, 100],
      area_rngs: [
        [0.0, 1e10],
        [0.0, 32f64.powi(2)],
        [32f64.powi(2), 96f64.powi(2)],
        [96f64.powi(2), 1e10],
      ],
    }
  }
}

impl MetricParams {
  fn iou_index(&self, iou: f64) -> Option<usize> {
    self.iou_thrs.iter().position(|&t| (t - iou).abs() < 1e-9)
  }
}

fn box_area(b: &[f64; 4]) -> f64 {
  (b[2] - b[0]).max(0.0) * (b[3] - b[1]).max(0.0)
}

fn box_iou(a: &[f64; 4], b: &[f64; 4]) -> f64 {
  let w = (a[2].min(b[2]) - a[0].max(b[0])).max(0.0);
  let h = (a[3].min(b[3]) - a[1].max(b[1])).max(0.0);
  let inter = w * h;
  let union = box_area(a) + box_area(b) - inter;
  if union <= 0.0 { 0.0 } else { inter / union }
}

/// 单幅图像、单个类别、单个面积段的匹配结果
#[derive(Debug)]
struct EvalImage {
  /// 降序，已截断到最大检测数
  dt_scores: Vec<f64>,
  /// [阈值][检测]
  dt_matched: Vec<Vec<bool>>,
  dt_ignore: Vec<Vec<bool>>,
  /// 未忽略的真值数量
  num_gt: usize,
}

fn evaluate_image(
  params: &MetricParams,
  gts: &[[f64; 4]],
  dts: &[([f64; 4], f64)],
  area_rng: [f64; 2],
) -> Option<EvalImage> {
  if gts.is_empty() && dts.is_empty() {
    return None;
  }

  let out_of_range = |b: &[f64; 4]| {
    let a = box_area(b);
    a < area_rng[0] || a > area_rng[1]
  };

  // 未忽略的真值排在前面
  let mut gt_order: Vec<usize> = (0..gts.len()).collect();
  gt_order.sort_by_key(|&g| out_of_range(&gts[g]));
  let gt_ignore: Vec<bool> = gt_order.iter().map(|&g| out_of_range(&gts[g])).collect();

  let max_det = params.max_dets[params.max_dets.len() - 1];
  let mut dt_order: Vec<usize> = (0..dts.len()).collect();
  dt_order.sort_by(|&a, &b| dts[b].1.total_cmp(&dts[a].1));
  dt_order.truncate(max_det);

  let ious: Vec<Vec<f64>> = dt_order
    .iter()
    .map(|&d| {
      gt_order
        .iter()
        .map(|&g| box_iou(&dts[d].0, &gts[g]))
        .collect()
    })
    .collect();

  let nd = dt_order.len();
  let ng = gt_order.len();
  let mut dt_matched = vec![vec![false; nd]; params.iou_thrs.len()];
  let mut dt_ignore = vec![vec![false; nd]; params.iou_thrs.len()];

  for (t, &thr) in params.iou_thrs.iter().enumerate() {
    let mut gt_matched = vec![false; ng];
    for d in 0..nd {
      let mut best_iou = thr.min(1.0 - 1e-10);
      let mut best: Option<usize> = None;
      for g in 0..ng {
        if gt_matched[g] {
          continue;
        }
        // 已匹配到有效真值后不再考虑被忽略的真值
        if let Some(m) = best
          && !gt_ignore[m]
          && gt_ignore[g]
        {
          break;
        }
        if ious[d][g] < best_iou {
          continue;
        }
        best_iou = ious[d][g];
        best = Some(g);
      }

      match best {
        Some(g) => {
          gt_matched[g] = true;
          dt_matched[t][d] = true;
          dt_ignore[t][d] = gt_ignore[g];
        }
        None => {
          dt_ignore[t][d] = out_of_range(&dts[dt_order[d]].0);
        }
      }
    }
  }

  Some(EvalImage {
    dt_scores: dt_order.iter().map(|&d| dts[d].1).collect(),
    dt_matched,
    dt_ignore,
    num_gt: gt_ignore.iter().filter(|&&ig| !ig).count(),
  })
}

/// 精度数组 [T x R x K x A x M] 与召回数组 [T x K x A x M]，未定义处为 -1
#[derive(Debug)]
pub(crate) struct Accumulated {
  precision: Vec<f64>,
  recall: Vec<f64>,
  t: usize,
  r: usize,
  k: usize,
  a: usize,
  m: usize,
}

impl Accumulated {
  fn precision_idx(&self, t: usize, r: usize, k: usize, a: usize, m: usize) -> usize {
    (((t * self.r + r) * self.k + k) * self.a + a) * self.m + m
  }

  fn recall_idx(&self, t: usize, k: usize, a: usize, m: usize) -> usize {
    ((t * self.k + k) * self.a + a) * self.m + m
  }

  fn mean_valid(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values
      .filter(|&v| v > -1.0)
      .fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    if count == 0 { -1.0 } else { sum / count as f64 }
  }

  fn average_precision(&self, iou: Option<usize>, a: usize, m: usize) -> f64 {
    let thresholds: Vec<usize> = match iou {
      Some(t) => vec![t],
      None => (0..self.t).collect(),
    };
    Self::mean_valid(thresholds.iter().flat_map(|&t| {
      (0..self.r).flat_map(move |r| {
        (0..self.k).map(move |k| self.precision[self.precision_idx(t, r, k, a, m)])
      })
    }))
  }

  fn average_recall(&self, a: usize, m: usize) -> f64 {
    Self::mean_valid(
      (0..self.t).flat_map(|t| (0..self.k).map(move |k| self.recall[self.recall_idx(t, k, a, m)])),
    )
  }

  pub(crate) fn summarize(&self, params: &MetricParams) -> MetricsRecord {
    let last = self.m - 1;
    let ap_at = |iou: f64| match params.iou_index(iou) {
      Some(t) => self.average_precision(Some(t), AREA_ALL, last),
      None => -1.0,
    };

    MetricsRecord {
      map: self.average_precision(None, AREA_ALL, last),
      map_50: ap_at(0.5),
      map_75: ap_at(0.75),
      map_small: self.average_precision(None, AREA_SMALL, last),
      map_medium: self.average_precision(None, AREA_MEDIUM, last),
      map_large: self.average_precision(None, AREA_LARGE, last),
      mar_1: self.average_recall(AREA_ALL, 0),
      mar_10: self.average_recall(AREA_ALL, 1),
      mar_100: self.average_recall(AREA_ALL, last),
      mar_small: self.average_recall(AREA_SMALL, last),
      mar_medium: self.average_recall(AREA_MEDIUM, last),
      mar_large: self.average_recall(AREA_LARGE, last),
    }
  }
}

/// 对全部图像逐类别、逐面积段匹配并累积
pub(crate) fn evaluate(
  params: &MetricParams,
  predictions: &[Prediction],
  targets: &[Target],
) -> Accumulated {
  let classes: BTreeSet<u32> = targets
    .iter()
    .flat_map(|t| t.labels.iter().copied())
    .chain(predictions.iter().flat_map(|p| p.labels.iter().copied()))
    .collect();

  let t = params.iou_thrs.len();
  let r = params.rec_thrs.len();
  let k = classes.len();
  let a = params.area_rngs.len();
  let m = params.max_dets.len();

  let mut acc = Accumulated {
    precision: vec![-1.0; t * r * k * a * m],
    recall: vec![-1.0; t * k * a * m],
    t,
    r,
    k,
    a,
    m,
  };

  for (k_idx, &class) in classes.iter().enumerate() {
    let per_image: Vec<(Vec<[f64; 4]>, Vec<([f64; 4], f64)>)> = predictions
      .iter()
      .zip(targets)
      .map(|(prediction, target)| {
        let gts = target
          .boxes
          .iter()
          .zip(&target.labels)
          .filter(|&(_, &label)| label == class)
          .map(|(b, _)| *b)
          .collect();
        let dts = prediction
          .boxes
          .iter()
          .zip(&prediction.labels)
          .zip(&prediction.scores)
          .filter(|&((_, &label), _)| label == class)
          .map(|((b, _), &score)| (*b, score))
          .collect();
        (gts, dts)
      })
      .collect();

    for (a_idx, &area_rng) in params.area_rngs.iter().enumerate() {
      let images: Vec<EvalImage> = per_image
        .iter()
        .filter_map(|(gts, dts)| evaluate_image(params, gts, dts, area_rng))
        .collect();

      for (m_idx, &max_det) in params.max_dets.iter().enumerate() {
        accumulate_one(&mut acc, params, &images, k_idx, a_idx, m_idx, max_det);
      }
    }
  }

  acc
}

fn accumulate_one(
  acc: &mut Accumulated,
  params: &MetricParams,
  images: &[EvalImage],
  k_idx: usize,
  a_idx: usize,
  m_idx: usize,
  max_det: usize,
) {
  let num_gt: usize = images.iter().map(|e| e.num_gt).sum();
  if num_gt == 0 {
    return;
  }

  let mut scores = Vec::new();
  let mut source: Vec<(usize, usize)> = Vec::new();
  for (i, image) in images.iter().enumerate() {
    let nd = image.dt_scores.len().min(max_det);
    scores.extend_from_slice(&image.dt_scores[..nd]);
    source.extend((0..nd).map(|d| (i, d)));
  }

  // 稳定排序，得分相同时保持图像顺序
  let mut order: Vec<usize> = (0..scores.len()).collect();
  order.sort_by(|&x, &y| scores[y].total_cmp(&scores[x]));
  let nd = order.len();

  for t_idx in 0..params.iou_thrs.len() {
    let mut tp = 0.0;
    let mut fp = 0.0;
    let mut rc = Vec::with_capacity(nd);
    let mut pr = Vec::with_capacity(nd);
    for &o in &order {
      let (i, d) = source[o];
      if images[i].dt_ignore[t_idx][d] {
        // 被忽略的检测既不算命中也不算误检
      } else if images[i].dt_matched[t_idx][d] {
        tp += 1.0;
      } else {
        fp += 1.0;
      }
      rc.push(tp / num_gt as f64);
      pr.push(tp / (tp + fp + f64::EPSILON));
    }

    let recall_idx = acc.recall_idx(t_idx, k_idx, a_idx, m_idx);
    acc.recall[recall_idx] = rc.last().copied().unwrap_or(0.0);

    // 精度从右向左取最大值，使其单调不增
    for d in (1..nd).rev() {
      if pr[d - 1] < pr[d] {
        pr[d - 1] = pr[d];
      }
    }

    let mut ptr = 0;
    for (r_idx, &rec_thr) in params.rec_thrs.iter().enumerate() {
      while ptr < nd && rc[ptr] < rec_thr {
        ptr += 1;
      }
      let p_idx = acc.precision_idx(t_idx, r_idx, k_idx, a_idx, m_idx);
      acc.precision[p_idx] = if ptr < nd { pr[ptr] } else { 0.0 };
    }
  }
}
