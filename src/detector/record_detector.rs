// 该文件是 MapBench （扰动精度评测） 项目的一部分。
// src/detector/record_detector.rs - 预先记录的检测结果
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

use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

use thiserror::Error;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  detector::{DetectionConfig, Detector, DetectorOptions},
  frame::Frame,
  prediction::{PredictionError, RawDetections},
};

const DEFAULT_RECORD_FILE: &str = "detections.json";

#[derive(Error, Debug)]
pub enum RecordDetectorError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("无法打开检测记录 {path}: {source}")]
  IoError {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("检测记录无效 {path}: {source}")]
  InvalidRecord {
    path: PathBuf,
    #[source]
    source: PredictionError,
  },
  #[error("帧不在同一目录中: {0}")]
  MixedDirectories(PathBuf),
}

pub struct RecordDetectorBuilder {
  file_name: String,
}

impl FromUrlWithScheme for RecordDetectorBuilder {
  const SCHEME: &'static str = "record";
}

impl FromUrl for RecordDetectorBuilder {
  type Error = RecordDetectorError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(RecordDetectorError::SchemeMismatch);
    }

    let file_name = url
      .query_pairs()
      .find(|(k, _)| k == "file")
      .map(|(_, v)| v.into_owned())
      .unwrap_or_else(|| DEFAULT_RECORD_FILE.to_string());

    Ok(RecordDetectorBuilder { file_name })
  }
}

impl Default for RecordDetectorBuilder {
  fn default() -> Self {
    Self {
      file_name: DEFAULT_RECORD_FILE.to_string(),
    }
  }
}

impl RecordDetectorBuilder {
  pub fn file_name(mut self, file_name: impl Into<String>) -> Self {
    self.file_name = file_name.into();
    self
  }

  pub fn build(self, options: DetectorOptions) -> Result<RecordDetector, RecordDetectorError> {
    if options.weights.is_some() {
      warn!("检测记录模式忽略权重参数");
    }
    info!("读取预先记录的检测结果: {}", self.file_name);
    Ok(RecordDetector {
      file_name: self.file_name,
    })
  }
}

/// 从图像目录中的记录文件读取检测结果
pub struct RecordDetector {
  file_name: String,
}

impl Detector for RecordDetector {
  type Error = RecordDetectorError;

  fn detect(
    &self,
    frames: &[Frame],
    config: &DetectionConfig,
  ) -> Result<RawDetections, Self::Error> {
    let Some(directory) = frames.first().and_then(|frame| frame.path.parent()) else {
      return Ok(RawDetections::new());
    };
    if let Some(frame) = frames
      .iter()
      .find(|frame| frame.path.parent() != Some(directory))
    {
      return Err(RecordDetectorError::MixedDirectories(frame.path.clone()));
    }

    let path = directory.join(&self.file_name);
    debug!("读取检测记录 {}", path.display());
    let file = File::open(&path).map_err(|source| RecordDetectorError::IoError {
      path: path.clone(),
      source,
    })?;
    let mut detections = RawDetections::from_reader(BufReader::new(file))
      .map_err(|source| RecordDetectorError::InvalidRecord { path, source })?;

    config.filter(&mut detections);
    Ok(detections)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn frame(dir: &std::path::Path, index: u32) -> Frame {
    Frame {
      index,
      path: dir.join(format!("{index:03}.png")),
      image: image::RgbImage::new(1, 1),
    }
  }

  #[test]
  fn url_selects_record_file() {
    let url = Url::parse("record://?file=dets.json").unwrap();
    let builder = RecordDetectorBuilder::from_url(&url).unwrap();
    assert_eq!(builder.file_name, "dets.json");

    let url = Url::parse("record://").unwrap();
    let builder = RecordDetectorBuilder::from_url(&url).unwrap();
    assert_eq!(builder.file_name, DEFAULT_RECORD_FILE);
  }

  #[test]
  fn reads_and_filters_record() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
      dir.path().join(DEFAULT_RECORD_FILE),
      r#"{"0": [[0, 0, 0, 10, 10, 0.9], [0, 0, 0, 10, 10, 0.1]], "1": []}"#,
    )
    .unwrap();

    let detector = RecordDetectorBuilder::default()
      .build(DetectorOptions::default())
      .unwrap();
    let frames = vec![frame(dir.path(), 0), frame(dir.path(), 1)];
    let detections = detector.detect(&frames, &DetectionConfig::default()).unwrap();
    assert_eq!(detections.get(0).unwrap().len(), 1);
    assert!(detections.get(1).unwrap().is_empty());
  }

  #[test]
  fn empty_frame_list_yields_nothing() {
    let detector = RecordDetectorBuilder::default()
      .build(DetectorOptions::default())
      .unwrap();
    let detections = detector.detect(&[], &DetectionConfig::default()).unwrap();
    assert!(detections.is_empty());
  }

  #[test]
  fn missing_record_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let detector = RecordDetectorBuilder::default()
      .build(DetectorOptions::default())
      .unwrap();
    let frames = vec![frame(dir.path(), 0)];
    assert!(matches!(
      detector.detect(&frames, &DetectionConfig::default()),
      Err(RecordDetectorError::IoError { .. })
    ));
  }
}
