// 该文件是 MapBench （扰动精度评测） 项目的一部分。
// src/detector/exec_detector.rs - 外部检测程序
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

//! 每个变体调用一次外部程序。标准输入为图像路径的 JSON 数组，数组下标即帧索引；
//! 程序需在标准输出写出 `{"帧索引": [[class, x1, y1, x2, y2, conf], ...]}`。

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;

use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  detector::{DetectionConfig, Detector, DetectorOptions},
  frame::Frame,
  prediction::{PredictionError, RawDetections},
};

#[derive(Error, Debug)]
pub enum ExecDetectorError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("检测程序不存在: {0}")]
  ProgramNotFound(PathBuf),
  #[error("权重文件不存在: {0}")]
  WeightsNotFound(PathBuf),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("JSON 编码错误: {0}")]
  JsonError(#[from] serde_json::Error),
  #[error("检测程序退出异常 ({status}): {stderr}")]
  ProgramFailed { status: String, stderr: String },
  #[error("检测输出无效: {0}")]
  InvalidOutput(#[from] PredictionError),
}

pub struct ExecDetectorBuilder {
  program: PathBuf,
  extra_args: Vec<String>,
}

impl FromUrlWithScheme for ExecDetectorBuilder {
  const SCHEME: &'static str = "exec";
}

impl FromUrl for ExecDetectorBuilder {
  type Error = ExecDetectorError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ExecDetectorError::SchemeMismatch);
    }

    let extra_args = url
      .query_pairs()
      .filter(|(k, _)| k == "arg")
      .map(|(_, v)| v.into_owned())
      .collect();

    Ok(ExecDetectorBuilder {
      program: PathBuf::from(url.path()),
      extra_args,
    })
  }
}

impl ExecDetectorBuilder {
  pub fn new(program: impl Into<PathBuf>) -> Self {
    Self {
      program: program.into(),
      extra_args: Vec::new(),
    }
  }

  pub fn arg(mut self, arg: impl Into<String>) -> Self {
    self.extra_args.push(arg.into());
    self
  }

  pub fn build(self, options: DetectorOptions) -> Result<ExecDetector, ExecDetectorError> {
    if !self.program.exists() {
      return Err(ExecDetectorError::ProgramNotFound(self.program));
    }
    if let Some(weights) = &options.weights
      && !weights.exists()
    {
      return Err(ExecDetectorError::WeightsNotFound(weights.clone()));
    }

    let mut fixed_args = self.extra_args;
    fixed_args.extend(option_args(&options));

    info!("外部检测程序: {}", self.program.display());
    debug!("固定参数: {:?}", fixed_args);

    Ok(ExecDetector {
      program: self.program,
      fixed_args,
    })
  }
}

/// 构建参数转换为命令行参数
fn option_args(options: &DetectorOptions) -> Vec<String> {
  let mut args = Vec::new();
  if let Some(weights) = &options.weights {
    args.push("--weights".to_string());
    args.push(weights.display().to_string());
  }
  if let Some(data) = &options.data {
    args.push("--data".to_string());
    args.push(data.display().to_string());
  }
  args.push("--imgsz".to_string());
  args.push(options.imgsz.to_string());
  if !options.device.is_empty() {
    args.push("--device".to_string());
    args.push(options.device.clone());
  }
  if options.half {
    args.push("--half".to_string());
  }
  if options.dnn {
    args.push("--dnn".to_string());
  }
  args
}

/// 每次调用的参数转换为命令行参数
fn config_args(config: &DetectionConfig) -> Vec<String> {
  let mut args = vec![
    "--conf-thres".to_string(),
    config.conf_thres.to_string(),
    "--iou-thres".to_string(),
    config.iou_thres.to_string(),
    "--max-det".to_string(),
    config.max_det.to_string(),
  ];
  if let Some(classes) = &config.classes {
    args.push("--classes".to_string());
    args.extend(classes.iter().map(u32::to_string));
  }
  if config.agnostic_nms {
    args.push("--agnostic-nms".to_string());
  }
  if config.augment {
    args.push("--augment".to_string());
  }
  args
}

pub struct ExecDetector {
  program: PathBuf,
  fixed_args: Vec<String>,
}

impl ExecDetector {
  fn command_args(&self, config: &DetectionConfig) -> Vec<String> {
    let mut args = self.fixed_args.clone();
    args.extend(config_args(config));
    args
  }
}

impl Detector for ExecDetector {
  type Error = ExecDetectorError;

  fn detect(
    &self,
    frames: &[Frame],
    config: &DetectionConfig,
  ) -> Result<RawDetections, Self::Error> {
    let mut ordered: Vec<&Frame> = frames.iter().collect();
    ordered.sort_by_key(|frame| frame.index);
    let paths: Vec<&Path> = ordered.iter().map(|frame| frame.path.as_path()).collect();

    let args = self.command_args(config);
    debug!("运行检测程序: {} {:?}", self.program.display(), args);

    let mut child = Command::new(&self.program)
      .args(&args)
      .stdin(Stdio::piped())
      .stdout(Stdio::piped())
      .stderr(Stdio::piped())
      .spawn()?;

    // 标准输入在单独的线程中写入，与读取标准输出、标准错误同时进行
    let payload = serde_json::to_vec(&paths)?;
    let writer = child.stdin.take().map(|mut stdin| {
      thread::spawn(move || -> std::io::Result<()> {
        stdin.write_all(&payload)?;
        stdin.flush()
      })
    });

    let output = child.wait_with_output()?;
    let written = match writer {
      Some(handle) => handle
        .join()
        .unwrap_or_else(|_| Err(std::io::Error::other("写入标准输入的线程异常退出"))),
      None => Ok(()),
    };

    if !output.status.success() {
      let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
      error!("检测程序失败: {}", stderr);
      return Err(ExecDetectorError::ProgramFailed {
        status: output.status.to_string(),
        stderr,
      });
    }

    written?;

    let detections = RawDetections::from_reader(output.stdout.as_slice())?;

    // 程序按数组下标给出帧索引，这里换回真实的帧索引
    let detections = detections
      .frames()
      .map(|position| {
        let frame = ordered
          .get(position as usize)
          .map(|frame| frame.index)
          .unwrap_or(position);
        let items = detections.get(position).unwrap_or_default().to_vec();
        (frame, items)
      })
      .collect();

    Ok(detections)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn url_query_becomes_extra_args() {
    let url = Url::parse("exec:///opt/detect/run.py?arg=--verbose&arg=--fast&other=1").unwrap();
    let builder = ExecDetectorBuilder::from_url(&url).unwrap();
    assert_eq!(builder.program, PathBuf::from("/opt/detect/run.py"));
    assert_eq!(builder.extra_args, vec!["--verbose", "--fast"]);
  }

  #[test]
  fn missing_program_fails_to_build() {
    let builder = ExecDetectorBuilder::new("/nonexistent/detector");
    assert!(matches!(
      builder.build(DetectorOptions::default()),
      Err(ExecDetectorError::ProgramNotFound(_))
    ));
  }

  #[test]
  fn options_are_rendered_once() {
    let options = DetectorOptions {
      weights: Some(PathBuf::from("yolov5s.pt")),
      data: None,
      imgsz: 320,
      device: "cpu".to_string(),
      half: true,
      dnn: false,
    };
    assert_eq!(
      option_args(&options),
      vec!["--weights", "yolov5s.pt", "--imgsz", "320", "--device", "cpu", "--half"]
    );
  }

  #[test]
  fn config_args_include_classes() {
    let config = DetectionConfig {
      classes: Some(vec![0, 2]),
      agnostic_nms: true,
      ..Default::default()
    };
    let args = config_args(&config);
    assert_eq!(
      args,
      vec![
        "--conf-thres",
        "0.25",
        "--iou-thres",
        "0.45",
        "--max-det",
        "1000",
        "--classes",
        "0",
        "2",
        "--agnostic-nms"
      ]
    );
  }

  #[cfg(unix)]
  #[test]
  fn runs_program_and_parses_stdout() {
    let dir = tempfile::tempdir().unwrap();
    let script = dir.path().join("detect.sh");
    std::fs::write(
      &script,
      "cat > /dev/null\necho '{\"1\": [[0, 1, 2, 3, 4, 0.5]], \"0\": []}'\n",
    )
    .unwrap();

    let detector = ExecDetectorBuilder::new("/bin/sh")
      .arg(script.display().to_string())
      .build(DetectorOptions::default())
      .unwrap();
    let frames: Vec<Frame> = (0..2)
      .map(|index| Frame {
        index,
        path: dir.path().join(format!("{index}.png")),
        image: image::RgbImage::new(1, 1),
      })
      .collect();

    let detections = detector.detect(&frames, &DetectionConfig::default()).unwrap();
    assert_eq!(detections.frames().collect::<Vec<_>>(), vec![0, 1]);
    assert_eq!(detections.get(1).unwrap()[0].bbox, [1.0, 2.0, 3.0, 4.0]);
  }

  #[cfg(unix)]
  #[test]
  fn large_frame_list_with_verbose_program_completes() {
    let dir = tempfile::tempdir().unwrap();
    let script = dir.path().join("detect.sh");
    // 先向标准错误写出超过管道容量的日志，再读取标准输入
    std::fs::write(
      &script,
      "head -c 200000 /dev/zero >&2\ncat > /dev/null\necho '{}'\n",
    )
    .unwrap();

    let detector = ExecDetectorBuilder::new("/bin/sh")
      .arg(script.display().to_string())
      .build(DetectorOptions::default())
      .unwrap();
    let long_name = "x".repeat(120);
    let frames: Vec<Frame> = (0..2000)
      .map(|index| Frame {
        index,
        path: dir.path().join(format!("{long_name}_{index:05}.png")),
        image: image::RgbImage::new(1, 1),
      })
      .collect();

    let detections = detector.detect(&frames, &DetectionConfig::default()).unwrap();
    assert!(detections.is_empty());
  }

  #[cfg(unix)]
  #[test]
  fn failing_program_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let script = dir.path().join("detect.sh");
    std::fs::write(&script, "cat > /dev/null\necho boom >&2\nexit 3\n").unwrap();

    let detector = ExecDetectorBuilder::new("/bin/sh")
      .arg(script.display().to_string())
      .build(DetectorOptions::default())
      .unwrap();
    let err = detector.detect(&[], &DetectionConfig::default()).unwrap_err();
    assert!(matches!(err, ExecDetectorError::ProgramFailed { stderr, .. } if stderr.contains("boom")));
  }
}
