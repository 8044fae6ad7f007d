// 该文件是 MapBench （扰动精度评测） 项目的一部分。
// src/evaluate.rs - 单个变体目录的评测
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

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};

use crate::{
  detector::{DetectionConfig, Detector},
  label::{LabelError, load_targets},
  metric::{MeanAveragePrecision, MetricError, MetricParams, MetricsRecord},
  prediction::{PredictionError, align_predictions},
};

#[derive(Error, Debug)]
pub enum EvaluateError {
  #[error("真值读取失败: {0}")]
  LabelError(#[from] LabelError),
  #[error("检测失败 ({path}): {source}")]
  DetectorError {
    path: PathBuf,
    #[source]
    source: Box<dyn std::error::Error + Send + Sync>,
  },
  #[error("预测对齐失败: {0}")]
  PredictionError(#[from] PredictionError),
  #[error("指标计算失败: {0}")]
  MetricError(#[from] MetricError),
}

/// 使用同一个检测器与检测参数，逐个评测变体目录
///
/// 所有变体共享同一份真值标注目录。
pub struct VariantEvaluator<'a, D> {
  detector: &'a D,
  config: &'a DetectionConfig,
  label_dir: PathBuf,
  params: MetricParams,
}

impl<'a, D> VariantEvaluator<'a, D>
where
  D: Detector,
  D::Error: std::error::Error + Send + Sync + 'static,
{
  pub fn new(detector: &'a D, config: &'a DetectionConfig, label_dir: impl Into<PathBuf>) -> Self {
    Self {
      detector,
      config,
      label_dir: label_dir.into(),
      params: MetricParams::default(),
    }
  }

  pub fn with_params(mut self, params: MetricParams) -> Self {
    self.params = params;
    self
  }

  pub fn label_dir(&self) -> &Path {
    &self.label_dir
  }

  /// 评测一个图像目录，返回该变体的指标
  pub fn evaluate(&self, image_dir: &Path) -> Result<MetricsRecord, EvaluateError> {
    info!("评测变体: {}", image_dir.display());

    let pairs = load_targets(image_dir, &self.label_dir)?;
    let (frames, targets): (Vec<_>, Vec<_>) = pairs.into_iter().unzip();
    let indices: Vec<u32> = frames.iter().map(|frame| frame.index).collect();

    let now = std::time::Instant::now();
    let detections =
      self
        .detector
        .detect(&frames, self.config)
        .map_err(|source| EvaluateError::DetectorError {
          path: image_dir.to_path_buf(),
          source: Box::new(source),
        })?;
    debug!(
      "检测完成: {} 帧有结果，耗时 {:.2?}",
      detections.len(),
      now.elapsed()
    );

    let predictions = align_predictions(&detections, &indices)?;

    let mut metric = MeanAveragePrecision::with_params(self.params.clone());
    metric.update(predictions, targets)?;
    let record = metric.compute();

    info!(
      "{}: map={:.4} map_50={:.4} map_75={:.4}",
      image_dir.display(),
      record.map,
      record.map_50,
      record.map_75
    );
    if let Ok(dump) = serde_json::to_string(&record) {
      debug!("完整指标: {}", dump);
    }

    Ok(record)
  }
}
