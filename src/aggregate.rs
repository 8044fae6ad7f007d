// 该文件是 MapBench （扰动精度评测） 项目的一部分。
// src/aggregate.rs - 按扰动比例汇总各变体指标
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

//! `mod` 与 `random` 两组按比例外连接，`original` 与 `adv` 两组作为常数列
//! 广播到每一行，最终按比例升序排列。

use std::fmt;

use thiserror::Error;
use tracing::{debug, warn};

use crate::metric::MetricsRecord;

#[derive(Error, Debug)]
pub enum AggregateError {
  #[error("无法从路径解析扰动比例 {path}: {reason}")]
  RatioParse { path: String, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VariantGroup {
  Mod,
  Random,
  Original,
  Adv,
}

/// 分组规则，按声明顺序匹配，首个命中的规则生效
pub const CLASSIFICATION_RULES: &[(&str, VariantGroup)] = &[
  ("mod", VariantGroup::Mod),
  ("random", VariantGroup::Random),
  ("original", VariantGroup::Original),
  ("adv", VariantGroup::Adv),
];

impl VariantGroup {
  pub const ALL: [VariantGroup; 4] = [
    VariantGroup::Mod,
    VariantGroup::Random,
    VariantGroup::Original,
    VariantGroup::Adv,
  ];

  /// 列名后缀，同时也是实验目录名
  pub fn name(&self) -> &'static str {
    match self {
      VariantGroup::Mod => "mod",
      VariantGroup::Random => "random",
      VariantGroup::Original => "original",
      VariantGroup::Adv => "adv",
    }
  }
}

impl fmt::Display for VariantGroup {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.name())
  }
}

pub fn classify(path: &str) -> Option<VariantGroup> {
  CLASSIFICATION_RULES
    .iter()
    .find(|(pattern, _)| path.contains(pattern))
    .map(|&(_, group)| group)
}

/// 倒数第二个 `/` 分段即比例目录
pub fn parse_ratio(path: &str) -> Result<f64, AggregateError> {
  let segments: Vec<&str> = path.split('/').collect();
  let Some(segment) = segments.len().checked_sub(2).map(|i| segments[i]) else {
    return Err(AggregateError::RatioParse {
      path: path.to_string(),
      reason: "路径分段不足".to_string(),
    });
  };

  segment
    .trim()
    .parse::<f64>()
    .map_err(|e| AggregateError::RatioParse {
      path: path.to_string(),
      reason: format!("'{}': {}", segment, e),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricTier {
  Map,
  Map50,
  Map75,
}

impl MetricTier {
  pub const ALL: [MetricTier; 3] = [MetricTier::Map, MetricTier::Map50, MetricTier::Map75];

  pub fn name(&self) -> &'static str {
    match self {
      MetricTier::Map => "map",
      MetricTier::Map50 => "map_50",
      MetricTier::Map75 => "map_75",
    }
  }

  /// 例如 `map_50_random`
  pub fn column(&self, group: VariantGroup) -> String {
    format!("{}_{}", self.name(), group.name())
  }
}

/// 汇总表中保留的指标
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricRow {
  pub map: f64,
  pub map_50: f64,
  pub map_75: f64,
}

impl MetricRow {
  pub fn get(&self, tier: MetricTier) -> f64 {
    match tier {
      MetricTier::Map => self.map,
      MetricTier::Map50 => self.map_50,
      MetricTier::Map75 => self.map_75,
    }
  }
}

impl From<&MetricsRecord> for MetricRow {
  fn from(record: &MetricsRecord) -> Self {
    Self {
      map: record.map,
      map_50: record.map_50,
      map_75: record.map_75,
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedRow {
  pub ratio: f64,
  pub modified: Option<MetricRow>,
  pub random: Option<MetricRow>,
  pub original: Option<MetricRow>,
  pub adv: Option<MetricRow>,
}

impl AggregatedRow {
  pub fn group(&self, group: VariantGroup) -> Option<&MetricRow> {
    match group {
      VariantGroup::Mod => self.modified.as_ref(),
      VariantGroup::Random => self.random.as_ref(),
      VariantGroup::Original => self.original.as_ref(),
      VariantGroup::Adv => self.adv.as_ref(),
    }
  }

  pub fn value(&self, tier: MetricTier, group: VariantGroup) -> Option<f64> {
    self.group(group).map(|row| row.get(tier))
  }

  /// 与 [`AggregatedTable::columns`] 同序，不含 `ratio`
  pub fn values(&self) -> Vec<Option<f64>> {
    VariantGroup::ALL
      .iter()
      .flat_map(|&group| MetricTier::ALL.iter().map(move |&tier| self.value(tier, group)))
      .collect()
  }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregatedTable {
  pub rows: Vec<AggregatedRow>,
}

impl AggregatedTable {
  pub fn columns() -> Vec<String> {
    std::iter::once("ratio".to_string())
      .chain(
        VariantGroup::ALL
          .iter()
          .flat_map(|&group| MetricTier::ALL.iter().map(move |tier| tier.column(group))),
      )
      .collect()
  }

  pub fn len(&self) -> usize {
    self.rows.len()
  }

  pub fn is_empty(&self) -> bool {
    self.rows.is_empty()
  }

  pub fn ratios(&self) -> impl Iterator<Item = f64> + '_ {
    self.rows.iter().map(|row| row.ratio)
  }

  /// 某一组某一指标随比例变化的序列
  pub fn series(&self, tier: MetricTier, group: VariantGroup) -> Vec<(f64, Option<f64>)> {
    self
      .rows
      .iter()
      .map(|row| (row.ratio, row.value(tier, group)))
      .collect()
  }

  /// 固定组的取值，各行相同，取第一行
  pub fn constant(&self, tier: MetricTier, group: VariantGroup) -> Option<f64> {
    self.rows.first().and_then(|row| row.value(tier, group))
  }
}

fn warn_duplicates(group: VariantGroup, rows: &[(f64, MetricRow)]) {
  let mut ratios: Vec<f64> = rows.iter().map(|(ratio, _)| *ratio).collect();
  ratios.sort_by(f64::total_cmp);
  ratios.dedup_by(|a, b| {
    let duplicate = a.total_cmp(b).is_eq();
    if duplicate {
      warn!("{} 组中比例 {} 出现多次，将输出全部配对", group, a);
    }
    duplicate
  });
}

/// 将 (变体路径, 指标) 列表汇总为一张按比例排序的表
pub fn aggregate(results: &[(String, MetricsRecord)]) -> Result<AggregatedTable, AggregateError> {
  let mut modified: Vec<(f64, MetricRow)> = Vec::new();
  let mut random: Vec<(f64, MetricRow)> = Vec::new();
  let mut original: Option<MetricRow> = None;
  let mut adv: Option<MetricRow> = None;

  for (path, record) in results {
    let Some(group) = classify(path) else {
      warn!("无法归类的变体路径，跳过: {}", path);
      continue;
    };
    debug!("{} -> {}", path, group);

    let row = MetricRow::from(record);
    match group {
      VariantGroup::Mod => modified.push((parse_ratio(path)?, row)),
      VariantGroup::Random => random.push((parse_ratio(path)?, row)),
      VariantGroup::Original | VariantGroup::Adv => {
        let slot = if group == VariantGroup::Original {
          &mut original
        } else {
          &mut adv
        };
        if slot.is_some() {
          warn!("{} 组存在多条结果，保留第一条，忽略 {}", group, path);
        } else {
          *slot = Some(row);
        }
      }
    }
  }

  warn_duplicates(VariantGroup::Mod, &modified);
  warn_duplicates(VariantGroup::Random, &random);
  if original.is_none() {
    warn!("缺少 original 组结果，对应列为空");
  }
  if adv.is_none() {
    warn!("缺少 adv 组结果，对应列为空");
  }

  // 外连接：两侧都有的比例输出全部配对，只在一侧出现的比例另一侧为空
  let mut keys: Vec<f64> = Vec::new();
  for &(ratio, _) in modified.iter().chain(&random) {
    if !keys.iter().any(|k| k.total_cmp(&ratio).is_eq()) {
      keys.push(ratio);
    }
  }

  let mut rows = Vec::new();
  for ratio in keys {
    let lefts: Vec<Option<MetricRow>> = modified
      .iter()
      .filter(|(r, _)| r.total_cmp(&ratio).is_eq())
      .map(|&(_, row)| Some(row))
      .collect();
    let rights: Vec<Option<MetricRow>> = random
      .iter()
      .filter(|(r, _)| r.total_cmp(&ratio).is_eq())
      .map(|&(_, row)| Some(row))
      .collect();
    let lefts = if lefts.is_empty() { vec![None] } else { lefts };
    let rights = if rights.is_empty() { vec![None] } else { rights };

    for &left in &lefts {
      for &right in &rights {
        rows.push(AggregatedRow {
          ratio,
          modified: left,
          random: right,
          original,
          adv,
        });
      }
    }
  }

  rows.sort_by(|a, b| a.ratio.total_cmp(&b.ratio));
  Ok(AggregatedTable { rows })
}
