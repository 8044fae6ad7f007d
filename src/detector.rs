// 该文件是 MapBench （扰动精度评测） 项目的一部分。
// src/detector.rs - 外部检测器接口
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

//! 检测器在整个运行过程中只构建一次。构建参数 ([`DetectorOptions`]) 在构建时
//! 被消费，之后每次调用只携带 [`DetectionConfig`]。
//!
//! 具体实现由 URL 方案选择：
//!
//! - `exec:///path/to/detect?arg=...` 调用外部检测程序
//! - `record://?file=detections.json` 读取图像目录中预先记录的检测结果

use std::path::PathBuf;

use thiserror::Error;
use url::Url;

use crate::{FromUrl, frame::Frame, prediction::RawDetections};

#[cfg(feature = "exec_detector")]
mod exec_detector;
#[cfg(feature = "exec_detector")]
pub use self::exec_detector::{ExecDetector, ExecDetectorBuilder, ExecDetectorError};

#[cfg(feature = "record_detector")]
mod record_detector;
#[cfg(feature = "record_detector")]
pub use self::record_detector::{RecordDetector, RecordDetectorBuilder, RecordDetectorError};

pub trait Detector {
  type Error;

  /// 对一组帧运行检测，结果以帧索引为键
  fn detect(&self, frames: &[Frame], config: &DetectionConfig)
  -> Result<RawDetections, Self::Error>;
}

/// 构建检测器所需的参数，只在构建时使用一次
#[derive(Debug, Clone, PartialEq)]
pub struct DetectorOptions {
  pub weights: Option<PathBuf>,
  pub data: Option<PathBuf>,
  pub imgsz: u32,
  pub device: String,
  pub half: bool,
  pub dnn: bool,
}

impl Default for DetectorOptions {
  fn default() -> Self {
    Self {
      weights: None,
      data: None,
      imgsz: 640,
      device: String::new(),
      half: false,
      dnn: false,
    }
  }
}

/// 每次检测调用使用的参数，整个运行期间不变
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionConfig {
  pub conf_thres: f64,
  pub iou_thres: f64,
  pub max_det: usize,
  pub classes: Option<Vec<u32>>,
  pub agnostic_nms: bool,
  pub augment: bool,
}

impl Default for DetectionConfig {
  fn default() -> Self {
    Self {
      conf_thres: 0.25,
      iou_thres: 0.45,
      max_det: 1000,
      classes: None,
      agnostic_nms: false,
      augment: false,
    }
  }
}

impl DetectionConfig {
  /// 按置信度阈值、类别和每帧最大数量过滤检测结果
  pub fn filter(&self, detections: &mut RawDetections) {
    for (_, items) in detections.iter_mut() {
      items.retain(|item| {
        item.confidence >= self.conf_thres
          && self
            .classes
            .as_ref()
            .is_none_or(|classes| classes.contains(&item.class_id))
      });
      if items.len() > self.max_det {
        items.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        items.truncate(self.max_det);
      }
    }
  }
}

#[derive(Error, Debug)]
pub enum DetectorError {
  #[cfg(feature = "exec_detector")]
  #[error("外部检测程序错误: {0}")]
  ExecDetectorError(#[from] ExecDetectorError),
  #[cfg(feature = "record_detector")]
  #[error("检测记录错误: {0}")]
  RecordDetectorError(#[from] RecordDetectorError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

pub enum DetectorBuilder {
  #[cfg(feature = "exec_detector")]
  Exec(ExecDetectorBuilder),
  #[cfg(feature = "record_detector")]
  Record(RecordDetectorBuilder),
}

impl FromUrl for DetectorBuilder {
  type Error = DetectorError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    #[cfg(any(feature = "exec_detector", feature = "record_detector"))]
    use crate::FromUrlWithScheme;

    match url.scheme() {
      #[cfg(feature = "exec_detector")]
      ExecDetectorBuilder::SCHEME => {
        Ok(DetectorBuilder::Exec(ExecDetectorBuilder::from_url(url)?))
      }
      #[cfg(feature = "record_detector")]
      RecordDetectorBuilder::SCHEME => Ok(DetectorBuilder::Record(
        RecordDetectorBuilder::from_url(url)?,
      )),
      other => Err(DetectorError::SchemeMismatch(other.to_string())),
    }
  }
}

impl DetectorBuilder {
  pub fn build(self, options: DetectorOptions) -> Result<DetectorWrapper, DetectorError> {
    match self {
      #[cfg(feature = "exec_detector")]
      DetectorBuilder::Exec(builder) => Ok(DetectorWrapper::Exec(builder.build(options)?)),
      #[cfg(feature = "record_detector")]
      DetectorBuilder::Record(builder) => Ok(DetectorWrapper::Record(builder.build(options)?)),
    }
  }
}

pub enum DetectorWrapper {
  #[cfg(feature = "exec_detector")]
  Exec(ExecDetector),
  #[cfg(feature = "record_detector")]
  Record(RecordDetector),
}

impl Detector for DetectorWrapper {
  type Error = DetectorError;

  fn detect(
    &self,
    frames: &[Frame],
    config: &DetectionConfig,
  ) -> Result<RawDetections, Self::Error> {
    match self {
      #[cfg(feature = "exec_detector")]
      DetectorWrapper::Exec(detector) => detector
        .detect(frames, config)
        .map_err(DetectorError::from),
      #[cfg(feature = "record_detector")]
      DetectorWrapper::Record(detector) => detector
        .detect(frames, config)
        .map_err(DetectorError::from),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::prediction::RawDetection;

  fn item(class_id: u32, confidence: f64) -> RawDetection {
    RawDetection {
      class_id,
      bbox: [0.0, 0.0, 1.0, 1.0],
      confidence,
    }
  }

  #[test]
  fn filter_applies_threshold_classes_and_max_det() {
    let mut detections: RawDetections = [(
      0,
      vec![item(0, 0.9), item(1, 0.8), item(0, 0.1), item(0, 0.5), item(0, 0.7)],
    )]
    .into_iter()
    .collect();

    let config = DetectionConfig {
      conf_thres: 0.3,
      max_det: 2,
      classes: Some(vec![0]),
      ..Default::default()
    };
    config.filter(&mut detections);

    let kept = detections.get(0).unwrap();
    assert_eq!(kept.len(), 2);
    assert_eq!(kept[0].confidence, 0.9);
    assert_eq!(kept[1].confidence, 0.7);
  }

  #[test]
  fn unknown_scheme_is_rejected() {
    let url = Url::parse("onnx:///model.onnx").unwrap();
    assert!(matches!(
      DetectorBuilder::from_url(&url),
      Err(DetectorError::SchemeMismatch(scheme)) if scheme == "onnx"
    ));
  }
}
