// 该文件是 MapBench （扰动精度评测） 项目的一部分。
// src/report.rs - 汇总表导出与对比图绘制
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

use thiserror::Error;
use tracing::info;

use crate::aggregate::AggregatedTable;

#[cfg(feature = "render_chart")]
mod chart;
mod table;
#[cfg(feature = "xlsx_table")]
mod xlsx;

#[cfg(feature = "render_chart")]
pub use self::chart::{ChartStyle, load_font, render_chart};
pub use self::table::write_table;
#[cfg(feature = "xlsx_table")]
pub use self::xlsx::write_workbook;

#[derive(Error, Debug)]
pub enum ReportError {
  #[error("I/O 错误 {path}: {source}")]
  IoError {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("CSV 写入错误: {0}")]
  CsvError(#[from] csv::Error),
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[cfg(feature = "xlsx_table")]
  #[error("xlsx 写入错误: {0}")]
  XlsxError(#[from] rust_xlsxwriter::XlsxError),
  #[error("无法加载字体 {path}: {reason}")]
  FontError { path: PathBuf, reason: String },
}

/// 本次运行的时间戳，作为输出文件名
pub fn timestamp_stem() -> String {
  chrono::Local::now().format("%Y-%m-%d_%H-%M-%S").to_string()
}

/// 将汇总结果写入输出目录，文件名共享同一个时间戳
pub struct Reporter {
  output_dir: PathBuf,
  stem: String,
  font: Option<PathBuf>,
}

impl Reporter {
  pub fn new(output_dir: impl Into<PathBuf>) -> Self {
    Self {
      output_dir: output_dir.into(),
      stem: timestamp_stem(),
      font: None,
    }
  }

  pub fn with_stem(mut self, stem: impl Into<String>) -> Self {
    self.stem = stem.into();
    self
  }

  pub fn with_font(mut self, font: Option<PathBuf>) -> Self {
    self.font = font;
    self
  }

  pub fn table_path(&self) -> PathBuf {
    self.output_dir.join(format!("{}.csv", self.stem))
  }

  pub fn workbook_path(&self) -> PathBuf {
    self.output_dir.join(format!("{}.xlsx", self.stem))
  }

  pub fn chart_path(&self) -> PathBuf {
    self.output_dir.join(format!("{}_plots.png", self.stem))
  }

  fn prepare_dir(&self) -> Result<(), ReportError> {
    if !self.output_dir.as_os_str().is_empty() {
      std::fs::create_dir_all(&self.output_dir).map_err(|source| ReportError::IoError {
        path: self.output_dir.clone(),
        source,
      })?;
    }
    Ok(())
  }

  pub fn export_table(&self, table: &AggregatedTable) -> Result<PathBuf, ReportError> {
    self.prepare_dir()?;
    let path = self.table_path();
    let file = std::fs::File::create(&path).map_err(|source| ReportError::IoError {
      path: path.clone(),
      source,
    })?;
    write_table(table, file)?;
    info!("汇总表已保存: {}", path.display());
    Ok(path)
  }

  #[cfg(feature = "xlsx_table")]
  pub fn export_workbook(&self, table: &AggregatedTable) -> Result<PathBuf, ReportError> {
    self.prepare_dir()?;
    let path = self.workbook_path();
    write_workbook(table, &path)?;
    info!("汇总表已保存: {}", path.display());
    Ok(path)
  }

  #[cfg(feature = "render_chart")]
  pub fn export_chart(&self, table: &AggregatedTable) -> Result<PathBuf, ReportError> {
    self.prepare_dir()?;
    let font = load_font(self.font.as_deref())?;
    let image = render_chart(table, font.as_ref(), &ChartStyle::default());
    let path = self.chart_path();
    image.save(&path)?;
    info!("对比图已保存: {}", path.display());
    Ok(path)
  }

  /// 导出全部结果，返回写出的文件
  pub fn report(&self, table: &AggregatedTable) -> Result<Vec<PathBuf>, ReportError> {
    let mut written = vec![self.export_table(table)?];
    #[cfg(feature = "xlsx_table")]
    written.push(self.export_workbook(table)?);
    #[cfg(feature = "render_chart")]
    written.push(self.export_chart(table)?);
    Ok(written)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::aggregate::{AggregatedRow, MetricRow};

  fn table() -> AggregatedTable {
    let row = MetricRow {
      map: 0.5,
      map_50: 0.7,
      map_75: 0.4,
    };
    AggregatedTable {
      rows: vec![
        AggregatedRow {
          ratio: 0.1,
          modified: Some(row),
          random: None,
          original: Some(row),
          adv: None,
        },
        AggregatedRow {
          ratio: 0.2,
          modified: None,
          random: Some(row),
          original: Some(row),
          adv: None,
        },
      ],
    }
  }

  #[test]
  fn file_names_share_stem() {
    let reporter = Reporter::new("/tmp/out").with_stem("run");
    assert_eq!(reporter.table_path(), PathBuf::from("/tmp/out/run.csv"));
    assert_eq!(reporter.workbook_path(), PathBuf::from("/tmp/out/run.xlsx"));
    assert_eq!(reporter.chart_path(), PathBuf::from("/tmp/out/run_plots.png"));
  }

  #[test]
  fn timestamp_has_no_path_separators() {
    let stem = timestamp_stem();
    assert!(!stem.contains('/'));
    assert!(!stem.contains(' '));
  }

  #[test]
  fn report_writes_all_outputs() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("nested");
    let reporter = Reporter::new(&output).with_stem("run");
    let written = reporter.report(&table()).unwrap();

    assert!(reporter.table_path().is_file());
    assert!(written.contains(&reporter.table_path()));
    #[cfg(feature = "xlsx_table")]
    assert!(written.contains(&reporter.workbook_path()));
    #[cfg(feature = "render_chart")]
    assert!(reporter.chart_path().is_file());
  }
}
