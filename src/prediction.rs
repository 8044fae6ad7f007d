// 该文件是 MapBench （扰动精度评测） 项目的一部分。
// src/prediction.rs - 检测结果到预测结构的转换
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

use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;

use thiserror::Error;
use tracing::debug;

/// 原始检测元组的字段数: (class, x1, y1, x2, y2, confidence)
pub const RAW_DETECTION_ARITY: usize = 6;

#[derive(Error, Debug)]
pub enum PredictionError {
  #[error("检测结果 JSON 解析错误: {0}")]
  JsonError(#[from] serde_json::Error),
  #[error("帧索引无效: '{0}'")]
  InvalidFrameIndex(String),
  #[error("帧索引重复: {0}")]
  DuplicateFrame(u32),
  #[error("帧 {frame} 第 {position} 个检测字段数为 {arity}, 期望 {}", RAW_DETECTION_ARITY)]
  InvalidArity {
    frame: u32,
    position: usize,
    arity: usize,
  },
  #[error("帧 {frame} 第 {position} 个检测类别无效: {value}")]
  InvalidClass {
    frame: u32,
    position: usize,
    value: f64,
  },
  #[error("检测结果包含真值中不存在的帧: {0:?}")]
  UnexpectedFrame(Vec<u32>),
}

/// 检测器输出的单个目标，像素坐标
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawDetection {
  pub class_id: u32,
  pub bbox: [f64; 4],
  pub confidence: f64,
}

impl RawDetection {
  fn from_tuple(frame: u32, position: usize, tuple: &[f64]) -> Result<Self, PredictionError> {
    let &[class, x1, y1, x2, y2, confidence] = tuple else {
      return Err(PredictionError::InvalidArity {
        frame,
        position,
        arity: tuple.len(),
      });
    };

    if !class.is_finite() || class < 0.0 || class.fract() != 0.0 || class > u32::MAX as f64 {
      return Err(PredictionError::InvalidClass {
        frame,
        position,
        value: class,
      });
    }

    Ok(RawDetection {
      class_id: class as u32,
      bbox: [x1, y1, x2, y2],
      confidence,
    })
  }
}

/// 按帧索引排序的检测结果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawDetections(BTreeMap<u32, Vec<RawDetection>>);

impl RawDetections {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn insert(&mut self, frame: u32, detections: Vec<RawDetection>) -> Option<Vec<RawDetection>> {
    self.0.insert(frame, detections)
  }

  pub fn get(&self, frame: u32) -> Option<&[RawDetection]> {
    self.0.get(&frame).map(Vec::as_slice)
  }

  pub fn frames(&self) -> impl Iterator<Item = u32> + '_ {
    self.0.keys().copied()
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  pub fn iter_mut(&mut self) -> impl Iterator<Item = (&u32, &mut Vec<RawDetection>)> {
    self.0.iter_mut()
  }

  /// 从字符串键的映射转换，键按整数解析
  pub fn from_string_keyed(
    raw: HashMap<String, Vec<Vec<f64>>>,
  ) -> Result<Self, PredictionError> {
    let mut detections = BTreeMap::new();
    for (key, tuples) in raw {
      let frame: u32 = key
        .trim()
        .parse()
        .map_err(|_| PredictionError::InvalidFrameIndex(key.clone()))?;
      let items = tuples
        .iter()
        .enumerate()
        .map(|(position, tuple)| RawDetection::from_tuple(frame, position, tuple))
        .collect::<Result<Vec<_>, _>>()?;
      if detections.insert(frame, items).is_some() {
        return Err(PredictionError::DuplicateFrame(frame));
      }
    }
    Ok(RawDetections(detections))
  }

  pub fn from_reader<R: std::io::Read>(reader: R) -> Result<Self, PredictionError> {
    let raw: HashMap<String, Vec<Vec<f64>>> = serde_json::from_reader(reader)?;
    Self::from_string_keyed(raw)
  }
}

impl FromStr for RawDetections {
  type Err = PredictionError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let raw: HashMap<String, Vec<Vec<f64>>> = serde_json::from_str(s)?;
    Self::from_string_keyed(raw)
  }
}

impl FromIterator<(u32, Vec<RawDetection>)> for RawDetections {
  fn from_iter<T: IntoIterator<Item = (u32, Vec<RawDetection>)>>(iter: T) -> Self {
    RawDetections(iter.into_iter().collect())
  }
}

/// 单幅图像的预测，三个序列等长
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Prediction {
  pub boxes: Vec<[f64; 4]>,
  pub labels: Vec<u32>,
  pub scores: Vec<f64>,
}

impl Prediction {
  pub fn len(&self) -> usize {
    self.boxes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.boxes.is_empty()
  }
}

impl From<&[RawDetection]> for Prediction {
  fn from(items: &[RawDetection]) -> Self {
    let mut prediction = Prediction {
      boxes: Vec::with_capacity(items.len()),
      labels: Vec::with_capacity(items.len()),
      scores: Vec::with_capacity(items.len()),
    };
    for item in items {
      prediction.boxes.push(item.bbox);
      prediction.labels.push(item.class_id);
      prediction.scores.push(item.confidence);
    }
    prediction
  }
}

/// 按真值的帧顺序对齐预测
///
/// 真值中存在而检测结果中缺失的帧视为空预测；检测结果中多出的帧返回错误。
pub fn align_predictions(
  detections: &RawDetections,
  frames: &[u32],
) -> Result<Vec<Prediction>, PredictionError> {
  let unexpected: Vec<u32> = detections
    .frames()
    .filter(|frame| !frames.contains(frame))
    .collect();
  if !unexpected.is_empty() {
    return Err(PredictionError::UnexpectedFrame(unexpected));
  }

  let predictions = frames
    .iter()
    .map(|&frame| match detections.get(frame) {
      Some(items) => Prediction::from(items),
      None => {
        debug!("帧 {} 没有检测结果, 按空预测处理", frame);
        Prediction::default()
      }
    })
    .collect();

  Ok(predictions)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn frames_sort_numerically() {
    let detections: RawDetections = r#"{
      "10": [[1, 0, 0, 5, 5, 0.9]],
      "2": [[2, 0, 0, 5, 5, 0.8]],
      "1": [[3, 0, 0, 5, 5, 0.7]]
    }"#
    .parse()
    .unwrap();

    assert_eq!(detections.frames().collect::<Vec<_>>(), vec![1, 2, 10]);
    let aligned = align_predictions(&detections, &[1, 2, 10]).unwrap();
    assert_eq!(aligned[0].labels, vec![3]);
    assert_eq!(aligned[1].labels, vec![2]);
    assert_eq!(aligned[2].labels, vec![1]);
  }

  #[test]
  fn tuple_unpacks_positionally() {
    let detections: RawDetections = r#"{"0": [[4, 1.5, 2.5, 10.0, 20.0, 0.25]]}"#.parse().unwrap();
    let prediction = Prediction::from(detections.get(0).unwrap());
    assert_eq!(prediction.boxes, vec![[1.5, 2.5, 10.0, 20.0]]);
    assert_eq!(prediction.labels, vec![4]);
    assert_eq!(prediction.scores, vec![0.25]);
  }

  #[test]
  fn arity_error_names_expected_width() {
    let err = r#"{"0": [[1, 0, 0, 5]]}"#.parse::<RawDetections>().unwrap_err();
    assert!(err.to_string().ends_with(&format!("期望 {RAW_DETECTION_ARITY}")));
  }

  #[test]
  fn wrong_arity_fails() {
    let err = r#"{"3": [[1, 0, 0, 5, 5, 0.9], [1, 0, 0, 5, 5]]}"#
      .parse::<RawDetections>()
      .unwrap_err();
    assert!(matches!(
      err,
      PredictionError::InvalidArity {
        frame: 3,
        position: 1,
        arity: 5
      }
    ));
  }

  #[test]
  fn non_numeric_frame_fails() {
    let err = r#"{"abc": []}"#.parse::<RawDetections>().unwrap_err();
    assert!(matches!(err, PredictionError::InvalidFrameIndex(_)));
  }

  #[test]
  fn duplicate_numeric_frame_fails() {
    let err = r#"{"1": [], "01": []}"#.parse::<RawDetections>().unwrap_err();
    assert!(matches!(err, PredictionError::DuplicateFrame(1)));
  }

  #[test]
  fn fractional_class_fails() {
    let err = r#"{"0": [[1.5, 0, 0, 5, 5, 0.9]]}"#
      .parse::<RawDetections>()
      .unwrap_err();
    assert!(matches!(err, PredictionError::InvalidClass { .. }));
  }

  #[test]
  fn missing_frame_becomes_empty_prediction() {
    let detections: RawDetections = r#"{"0": [[1, 0, 0, 5, 5, 0.9]], "2": []}"#.parse().unwrap();
    let aligned = align_predictions(&detections, &[0, 1, 2]).unwrap();
    assert_eq!(aligned.len(), 3);
    assert_eq!(aligned[0].len(), 1);
    assert!(aligned[1].is_empty());
    assert!(aligned[2].is_empty());
  }

  #[test]
  fn extra_frame_is_rejected() {
    let detections: RawDetections = r#"{"0": [], "7": []}"#.parse().unwrap();
    let err = align_predictions(&detections, &[0, 1]).unwrap_err();
    assert!(matches!(err, PredictionError::UnexpectedFrame(frames) if frames == vec![7]));
  }
}
