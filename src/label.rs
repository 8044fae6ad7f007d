// 该文件是 MapBench （扰动精度评测） 项目的一部分。
// src/label.rs - 标注文件读取与坐标转换
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

//! 标注文件每行一个目标：`class x_center y_center width height`，
//! 除类别外均为相对图像尺寸归一化的值。读取后转换为像素坐标下的
//! `[x1, y1, x2, y2]` 角点框。

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};

use crate::frame::{Frame, FrameError, has_extension, list_image_files, list_sorted_files};

const LABEL_EXTENSION: &str = "txt";
const LABEL_FIELDS: usize = 5;

#[derive(Error, Debug)]
pub enum LabelError {
  #[error("图像与标注文件不匹配 (索引 {index}): 图像 {image:?}, 标注 {label:?}")]
  PairingMismatch {
    index: usize,
    image: Option<String>,
    label: Option<String>,
  },
  #[error("标注格式错误 {path}:{line}: {reason}")]
  MalformedLabelLine {
    path: PathBuf,
    line: usize,
    reason: String,
  },
  #[error("I/O 错误: {path}: {source}")]
  IoError {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("图像读取错误: {0}")]
  FrameError(#[from] FrameError),
}

/// 单行标注
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LabelRecord {
  pub class_id: u32,
  pub x_center: f64,
  pub y_center: f64,
  pub width: f64,
  pub height: f64,
}

impl LabelRecord {
  /// 解析一行标注，字段数必须为 5
  pub fn parse(line: &str) -> Result<Self, String> {
    let fields = line
      .split_whitespace()
      .map(|field| {
        field
          .parse::<f64>()
          .map_err(|e| format!("无法解析数值 '{}': {}", field, e))
      })
      .collect::<Result<Vec<_>, _>>()?;

    let &[class, x_center, y_center, width, height] = fields.as_slice() else {
      return Err(format!(
        "期望 {} 个字段, 实际 {} 个",
        LABEL_FIELDS,
        fields.len()
      ));
    };

    if !class.is_finite() || class < 0.0 || class > u32::MAX as f64 {
      return Err(format!("类别无效: {}", class));
    }

    Ok(LabelRecord {
      class_id: class.trunc() as u32,
      x_center,
      y_center,
      width,
      height,
    })
  }

  /// 转换为像素坐标的 `[x1, y1, x2, y2]`
  pub fn to_corners(&self, image_width: f64, image_height: f64) -> [f64; 4] {
    let x = self.x_center * image_width;
    let y = self.y_center * image_height;
    let w = self.width * image_width;
    let h = self.height * image_height;
    [x - w / 2.0, y - h / 2.0, x + w / 2.0, y + h / 2.0]
  }
}

/// 单幅图像的真值
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Target {
  pub boxes: Vec<[f64; 4]>,
  pub labels: Vec<u32>,
}

impl Target {
  pub fn len(&self) -> usize {
    self.boxes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.boxes.is_empty()
  }

  pub fn push(&mut self, bbox: [f64; 4], label: u32) {
    self.boxes.push(bbox);
    self.labels.push(label);
  }
}

/// 读取一个标注文件并转换到给定图像尺寸
pub fn read_target(path: &Path, image_width: u32, image_height: u32) -> Result<Target, LabelError> {
  let content = std::fs::read_to_string(path).map_err(|source| LabelError::IoError {
    path: path.to_path_buf(),
    source,
  })?;

  let (w, h) = (image_width as f64, image_height as f64);
  let mut target = Target::default();
  for (line_no, line) in content.lines().enumerate() {
    if line.trim().is_empty() {
      continue;
    }
    let record = LabelRecord::parse(line).map_err(|reason| LabelError::MalformedLabelLine {
      path: path.to_path_buf(),
      line: line_no + 1,
      reason,
    })?;
    target.push(record.to_corners(w, h), record.class_id);
  }

  Ok(target)
}

pub fn list_label_files(dir: &Path) -> Result<Vec<PathBuf>, LabelError> {
  Ok(list_sorted_files(dir, |p| has_extension(p, &[LABEL_EXTENSION]))?)
}

fn stem_of(path: Option<&PathBuf>) -> Option<String> {
  path
    .and_then(|p| p.file_stem())
    .map(|s| s.to_string_lossy().into_owned())
}

/// 按文件名排序后逐一配对图像与标注，返回索引对齐的 (帧, 真值) 序列
pub fn load_targets(
  image_dir: &Path,
  label_dir: &Path,
) -> Result<Vec<(Frame, Target)>, LabelError> {
  let image_files = list_image_files(image_dir)?;
  let label_files = list_label_files(label_dir)?;

  info!(
    "读取 {} 幅图像 ({}) 与 {} 个标注 ({})",
    image_files.len(),
    image_dir.display(),
    label_files.len(),
    label_dir.display()
  );

  let count = image_files.len().max(label_files.len());
  let mut pairs = Vec::with_capacity(count);
  for index in 0..count {
    let image = stem_of(image_files.get(index));
    let label = stem_of(label_files.get(index));
    let (Some(image_path), Some(label_path)) = (image_files.get(index), label_files.get(index))
    else {
      return Err(LabelError::PairingMismatch {
        index,
        image,
        label,
      });
    };
    if image != label {
      return Err(LabelError::PairingMismatch {
        index,
        image,
        label,
      });
    }

    let frame = Frame::open(index as u32, image_path)?;
    let target = read_target(label_path, frame.width(), frame.height())?;
    debug!("{}: {} 个真值框", label_path.display(), target.len());
    pairs.push((frame, target));
  }

  Ok(pairs)
}

#[cfg(test)]
mod tests {
  use super::*;
  use approx::assert_relative_eq;
  use image::{Rgb, RgbImage};

  #[test]
  fn parse_accepts_float_class() {
    let record = LabelRecord::parse("2.0 0.5 0.5 0.25 0.1").unwrap();
    assert_eq!(record.class_id, 2);
    assert_relative_eq!(record.width, 0.25);
  }

  #[test]
  fn parse_rejects_wrong_arity() {
    assert!(LabelRecord::parse("0 0.5 0.5 0.25").is_err());
    assert!(LabelRecord::parse("0 0.5 0.5 0.25 0.1 0.9").is_err());
  }

  #[test]
  fn parse_rejects_non_numeric() {
    assert!(LabelRecord::parse("car 0.5 0.5 0.25 0.1").is_err());
    assert!(LabelRecord::parse("-1 0.5 0.5 0.25 0.1").is_err());
  }

  #[test]
  fn corners_follow_center_format() {
    let record = LabelRecord {
      class_id: 0,
      x_center: 0.5,
      y_center: 0.25,
      width: 0.2,
      height: 0.1,
    };
    let [x1, y1, x2, y2] = record.to_corners(640.0, 480.0);
    assert_relative_eq!(x1, 0.5 * 640.0 - 0.2 * 640.0 / 2.0);
    assert_relative_eq!(x2 - x1, 0.2 * 640.0, epsilon = 1e-9);
    assert_relative_eq!(y2 - y1, 0.1 * 480.0, epsilon = 1e-9);
    assert!(x1 < x2 && y1 < y2);
  }

  #[test]
  fn corners_hold_over_a_grid_of_labels() {
    let steps = [0.05, 0.2, 0.5, 0.75, 1.0];
    for &xc in &steps {
      for &w in &steps {
        let record = LabelRecord {
          class_id: 0,
          x_center: xc,
          y_center: xc,
          width: w,
          height: w,
        };
        let [x1, y1, x2, y2] = record.to_corners(333.0, 127.0);
        assert_relative_eq!(x1, xc * 333.0 - w * 333.0 / 2.0, epsilon = 1e-9);
        assert_relative_eq!(x2 - x1, w * 333.0, epsilon = 1e-9);
        assert!(x1 < x2);
        assert!(y1 < y2);
      }
    }
  }

  fn write_pair(image_dir: &Path, label_dir: &Path, stem: &str, label: &str) {
    RgbImage::from_pixel(100, 50, Rgb([0, 0, 0]))
      .save(image_dir.join(format!("{stem}.png")))
      .unwrap();
    std::fs::write(label_dir.join(format!("{stem}.txt")), label).unwrap();
  }

  #[test]
  fn load_targets_pairs_in_sorted_order() {
    let images = tempfile::tempdir().unwrap();
    let labels = tempfile::tempdir().unwrap();
    write_pair(images.path(), labels.path(), "002", "1 0.5 0.5 0.2 0.2\n");
    write_pair(images.path(), labels.path(), "001", "0 0.5 0.5 1.0 1.0\n\n3 0.1 0.1 0.1 0.1\n");
    write_pair(images.path(), labels.path(), "003", "");

    let pairs = load_targets(images.path(), labels.path()).unwrap();
    assert_eq!(pairs.len(), 3);
    assert_eq!(pairs[0].0.stem(), Some("001"));
    assert_eq!(pairs[0].1.labels, vec![0, 3]);
    assert_eq!(pairs[0].1.boxes[0], [0.0, 0.0, 100.0, 50.0]);
    assert_eq!(pairs[1].1.labels, vec![1]);
    assert!(pairs[2].1.is_empty());
  }

  #[test]
  fn load_targets_rejects_mismatched_stems() {
    let images = tempfile::tempdir().unwrap();
    let labels = tempfile::tempdir().unwrap();
    write_pair(images.path(), labels.path(), "001", "0 0.5 0.5 0.2 0.2\n");
    RgbImage::from_pixel(8, 8, Rgb([0, 0, 0]))
      .save(images.path().join("002.png"))
      .unwrap();
    std::fs::write(labels.path().join("009.txt"), "").unwrap();

    match load_targets(images.path(), labels.path()) {
      Err(LabelError::PairingMismatch { index, image, label }) => {
        assert_eq!(index, 1);
        assert_eq!(image.as_deref(), Some("002"));
        assert_eq!(label.as_deref(), Some("009"));
      }
      other => panic!("unexpected result: {other:?}"),
    }
  }

  #[test]
  fn load_targets_rejects_missing_label() {
    let images = tempfile::tempdir().unwrap();
    let labels = tempfile::tempdir().unwrap();
    write_pair(images.path(), labels.path(), "001", "0 0.5 0.5 0.2 0.2\n");
    RgbImage::from_pixel(8, 8, Rgb([0, 0, 0]))
      .save(images.path().join("002.png"))
      .unwrap();

    assert!(matches!(
      load_targets(images.path(), labels.path()),
      Err(LabelError::PairingMismatch { index: 1, label: None, .. })
    ));
  }

  #[test]
  fn malformed_line_reports_position() {
    let images = tempfile::tempdir().unwrap();
    let labels = tempfile::tempdir().unwrap();
    write_pair(images.path(), labels.path(), "001", "0 0.5 0.5 0.2 0.2\n0 0.5 x 0.2 0.2\n");

    assert!(matches!(
      load_targets(images.path(), labels.path()),
      Err(LabelError::MalformedLabelLine { line: 2, .. })
    ));
  }
}
