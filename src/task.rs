// 该文件是 MapBench （扰动精度评测） 项目的一部分。
// src/task.rs - 实验目录发现与整体评测流程
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
use tracing::{info, warn};

use crate::{
  aggregate::{AggregateError, AggregatedTable, VariantGroup, aggregate},
  detector::Detector,
  evaluate::{EvaluateError, VariantEvaluator},
  metric::MetricsRecord,
  report::{ReportError, Reporter},
};

#[derive(Error, Debug)]
pub enum TaskError {
  #[error("真值标注目录不存在: {0}")]
  LabelDirMissing(PathBuf),
  #[error("无法读取目录 {path}: {source}")]
  IoError {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("变体评测失败: {0}")]
  EvaluateError(#[from] EvaluateError),
  #[error("结果汇总失败: {0}")]
  AggregateError(#[from] AggregateError),
  #[error("报告输出失败: {0}")]
  ReportError(#[from] ReportError),
}

pub trait Task<I, M, O>: Sized {
  type Output;
  type Error;
  fn run_task(self, input: I, model: M, output: O) -> Result<Self::Output, Self::Error>;
}

/// 一个待评测的变体目录
#[derive(Debug, Clone, PartialEq)]
pub struct Variant {
  /// 相对实验根目录，形如 `./<group>/<subdir>/`，倒数第二段为比例目录
  pub key: String,
  pub group: VariantGroup,
  pub image_dir: PathBuf,
}

/// 实验目录布局
///
/// ```text
/// <root>/original/image/*   <root>/original/label/*
/// <root>/mod/<ratio>/*      <root>/random/<ratio>/*
/// <root>/adv/*
/// ```
#[derive(Debug, Clone)]
pub struct ExperimentLayout {
  root: PathBuf,
}

impl ExperimentLayout {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  pub fn label_dir(&self) -> PathBuf {
    self.root.join("original").join("label")
  }

  pub fn original_image_dir(&self) -> PathBuf {
    self.root.join("original").join("image")
  }

  /// 变体键只包含根目录之下的部分，根目录名不参与分组
  fn key(segments: &[&str]) -> String {
    let mut key = String::from(".");
    for segment in segments {
      key.push('/');
      key.push_str(segment);
    }
    key.push('/');
    key
  }

  fn sorted_subdirs(dir: &Path) -> Result<Vec<String>, TaskError> {
    let entries = std::fs::read_dir(dir).map_err(|source| TaskError::IoError {
      path: dir.to_path_buf(),
      source,
    })?;

    let mut names = Vec::new();
    for entry in entries {
      let entry = entry.map_err(|source| TaskError::IoError {
        path: dir.to_path_buf(),
        source,
      })?;
      if entry.path().is_dir() {
        names.push(entry.file_name().to_string_lossy().into_owned());
      }
    }
    names.sort();
    Ok(names)
  }

  /// 按 original、mod、random、adv 的顺序列出全部变体
  pub fn discover(&self) -> Result<Vec<Variant>, TaskError> {
    let label_dir = self.label_dir();
    if !label_dir.is_dir() {
      return Err(TaskError::LabelDirMissing(label_dir));
    }

    let mut variants = Vec::new();

    let original = self.original_image_dir();
    if original.is_dir() {
      variants.push(Variant {
        key: Self::key(&["original", "image"]),
        group: VariantGroup::Original,
        image_dir: original,
      });
    } else {
      warn!("原始图像目录不存在: {}", original.display());
    }

    for group in [VariantGroup::Mod, VariantGroup::Random] {
      let dir = self.root.join(group.name());
      if !dir.is_dir() {
        warn!("{} 目录不存在，跳过: {}", group, dir.display());
        continue;
      }
      for name in Self::sorted_subdirs(&dir)? {
        variants.push(Variant {
          key: Self::key(&[group.name(), &name]),
          group,
          image_dir: dir.join(&name),
        });
      }
    }

    let adv = self.root.join(VariantGroup::Adv.name());
    if adv.is_dir() {
      variants.push(Variant {
        key: Self::key(&[VariantGroup::Adv.name()]),
        group: VariantGroup::Adv,
        image_dir: adv,
      });
    } else {
      warn!("adv 目录不存在，跳过: {}", adv.display());
    }

    info!("发现 {} 个变体", variants.len());
    Ok(variants)
  }
}

/// 评测全部变体、汇总并输出报告
#[derive(Debug, Default)]
pub struct BenchmarkTask;

impl BenchmarkTask {
  pub fn evaluate_all<D>(
    &self,
    variants: &[Variant],
    evaluator: &VariantEvaluator<'_, D>,
  ) -> Result<Vec<(String, MetricsRecord)>, TaskError>
  where
    D: Detector,
    D::Error: std::error::Error + Send + Sync + 'static,
  {
    let mut results = Vec::with_capacity(variants.len());
    for (i, variant) in variants.iter().enumerate() {
      info!("({}/{}) {}", i + 1, variants.len(), variant.key);
      let record = evaluator.evaluate(&variant.image_dir)?;
      results.push((variant.key.clone(), record));
    }
    Ok(results)
  }
}

impl<D> Task<&ExperimentLayout, &VariantEvaluator<'_, D>, &Reporter> for BenchmarkTask
where
  D: Detector,
  D::Error: std::error::Error + Send + Sync + 'static,
{
  type Output = AggregatedTable;
  type Error = TaskError;

  fn run_task(
    self,
    input: &ExperimentLayout,
    model: &VariantEvaluator<'_, D>,
    output: &Reporter,
  ) -> Result<Self::Output, Self::Error> {
    info!("开始评测: {}", input.root().display());
    let now = std::time::Instant::now();

    let variants = input.discover()?;
    let results = self.evaluate_all(&variants, model)?;
    info!("全部变体评测完成，耗时: {:.2?}", now.elapsed());

    let table = aggregate(&results)?;
    info!("汇总表共 {} 行", table.len());

    for path in output.report(&table)? {
      info!("输出文件: {}", path.display());
    }
    Ok(table)
  }
}
