// 该文件是 MapBench （扰动精度评测） 项目的一部分。
// src/args.rs - 项目参数配置
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

use std::path::PathBuf;

use clap::Parser;
use url::Url;

use mapbench::detector::{DetectionConfig, DetectorOptions};

/// MapBench 项目参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 实验根目录
  #[arg(long, default_value = "./runs/experiment", value_name = "DIR")]
  pub root: PathBuf,

  /// 检测器
  /// 支持格式:
  /// - exec:///path/to/detect?arg=...
  /// - record://?file=detections.json
  #[arg(long, value_name = "URL")]
  pub detector: Url,

  /// 模型权重文件
  #[arg(long, value_name = "FILE")]
  pub weights: Option<PathBuf>,

  /// 数据集描述文件
  #[arg(long, value_name = "FILE")]
  pub data: Option<PathBuf>,

  /// 推理尺寸
  #[arg(long, default_value = "640", value_name = "PIXELS")]
  pub imgsz: u32,

  /// 推理设备，例如 cpu 或 0
  #[arg(long, default_value = "", value_name = "DEVICE")]
  pub device: String,

  /// 半精度推理
  #[arg(long)]
  pub half: bool,

  /// 使用 OpenCV DNN 后端
  #[arg(long)]
  pub dnn: bool,

  /// 置信度阈值 (0.0 - 1.0)
  #[arg(long, default_value = "0.25", value_name = "THRESHOLD")]
  pub conf_thres: f64,

  /// NMS IOU 阈值 (0.0 - 1.0)
  #[arg(long, default_value = "0.45", value_name = "THRESHOLD")]
  pub iou_thres: f64,

  /// 每幅图像最大检测数
  #[arg(long, default_value = "1000", value_name = "COUNT")]
  pub max_det: usize,

  /// 只保留这些类别
  #[arg(long, num_args = 1.., value_name = "CLASS")]
  pub classes: Option<Vec<u32>>,

  /// 类别无关的 NMS
  #[arg(long)]
  pub agnostic_nms: bool,

  /// 测试时增强
  #[arg(long)]
  pub augment: bool,

  /// 报告输出目录
  #[arg(long, default_value = ".", value_name = "DIR")]
  pub output: PathBuf,

  /// 图中文字使用的 TrueType 字体
  #[arg(long, value_name = "FILE")]
  pub font: Option<PathBuf>,
}

impl Args {
  pub fn detector_options(&self) -> DetectorOptions {
    DetectorOptions {
      weights: self.weights.clone(),
      data: self.data.clone(),
      imgsz: self.imgsz,
      device: self.device.clone(),
      half: self.half,
      dnn: self.dnn,
    }
  }

  pub fn detection_config(&self) -> DetectionConfig {
    DetectionConfig {
      conf_thres: self.conf_thres,
      iou_thres: self.iou_thres,
      max_det: self.max_det,
      classes: self.classes.clone(),
      agnostic_nms: self.agnostic_nms,
      augment: self.augment,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn defaults_match_detection_config() {
    let args = Args::parse_from(["mapbench", "--detector", "record://"]);
    assert_eq!(args.root, PathBuf::from("./runs/experiment"));
    assert_eq!(args.detection_config(), DetectionConfig::default());
    assert_eq!(args.detector_options(), DetectorOptions::default());
  }

  #[test]
  fn classes_accept_multiple_values() {
    let args = Args::parse_from([
      "mapbench",
      "--detector",
      "exec:///usr/bin/detect",
      "--classes",
      "0",
      "2",
      "--half",
    ]);
    assert_eq!(args.detection_config().classes, Some(vec![0, 2]));
    assert!(args.detector_options().half);
  }
}
