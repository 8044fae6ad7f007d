// 该文件是 MapBench （扰动精度评测） 项目的一部分。
// src/metric.rs - 平均精度均值 (mAP) 计算
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

//! COCO 协议的边界框 mAP：IoU 阈值 0.50:0.05:0.95，101 个召回点，
//! 最大检测数 1/10/100，面积分段 all/small/medium/large。
//! 无法定义的指标取 -1。

use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::{label::Target, prediction::Prediction};

mod coco;

pub use self::coco::MetricParams;

#[derive(Error, Debug)]
pub enum MetricError {
  #[error("预测数量 ({predictions}) 与真值数量 ({targets}) 不一致")]
  LengthMismatch { predictions: usize, targets: usize },
  #[error("第 {index} 幅图像的{kind}各字段长度不一致")]
  ShapeMismatch { index: usize, kind: &'static str },
}

/// 单个变体的评测结果
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MetricsRecord {
  pub map: f64,
  pub map_50: f64,
  pub map_75: f64,
  pub map_small: f64,
  pub map_medium: f64,
  pub map_large: f64,
  pub mar_1: f64,
  pub mar_10: f64,
  pub mar_100: f64,
  pub mar_small: f64,
  pub mar_medium: f64,
  pub mar_large: f64,
}

/// 累积预测与真值，一次性计算 mAP
#[derive(Debug, Default)]
pub struct MeanAveragePrecision {
  params: MetricParams,
  predictions: Vec<Prediction>,
  targets: Vec<Target>,
}

impl MeanAveragePrecision {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_params(params: MetricParams) -> Self {
    Self {
      params,
      ..Default::default()
    }
  }

  /// 追加一批按图像对齐的预测与真值
  pub fn update(
    &mut self,
    predictions: Vec<Prediction>,
    targets: Vec<Target>,
  ) -> Result<(), MetricError> {
    if predictions.len() != targets.len() {
      return Err(MetricError::LengthMismatch {
        predictions: predictions.len(),
        targets: targets.len(),
      });
    }

    let offset = self.targets.len();
    for (i, (prediction, target)) in predictions.iter().zip(&targets).enumerate() {
      if prediction.labels.len() != prediction.boxes.len()
        || prediction.scores.len() != prediction.boxes.len()
      {
        return Err(MetricError::ShapeMismatch {
          index: offset + i,
          kind: "预测",
        });
      }
      if target.labels.len() != target.boxes.len() {
        return Err(MetricError::ShapeMismatch {
          index: offset + i,
          kind: "真值",
        });
      }
    }

    self.predictions.extend(predictions);
    self.targets.extend(targets);
    Ok(())
  }

  pub fn compute(&self) -> MetricsRecord {
    debug!("计算 mAP: {} 幅图像", self.targets.len());
    let accumulated = coco::evaluate(&self.params, &self.predictions, &self.targets);
    accumulated.summarize(&self.params)
  }
}
