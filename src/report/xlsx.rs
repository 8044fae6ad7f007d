// 该文件是 MapBench （扰动精度评测） 项目的一部分。
// src/report/xlsx.rs - 汇总表 xlsx 导出
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

use std::path::Path;

use rust_xlsxwriter::Workbook;

use crate::{aggregate::AggregatedTable, report::ReportError};

/// 与 CSV 相同的列布局，空值不写入单元格
fn build_workbook(table: &AggregatedTable) -> Result<Workbook, ReportError> {
  let mut workbook = Workbook::new();
  let sheet = workbook.add_worksheet();

  for (col, name) in AggregatedTable::columns().iter().enumerate() {
    sheet.write_string(0, col as u16, name.as_str())?;
  }

  for (i, row) in table.rows.iter().enumerate() {
    let line = i as u32 + 1;
    sheet.write_number(line, 0, row.ratio)?;
    for (col, value) in row.values().into_iter().enumerate() {
      if let Some(value) = value {
        sheet.write_number(line, col as u16 + 1, value)?;
      }
    }
  }

  Ok(workbook)
}

pub fn write_workbook(table: &AggregatedTable, path: &Path) -> Result<(), ReportError> {
  let mut workbook = build_workbook(table)?;
  workbook.save(path)?;
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::aggregate::{AggregatedRow, MetricRow};

  #[test]
  fn workbook_is_a_zip_archive() {
    let table = AggregatedTable {
      rows: vec![AggregatedRow {
        ratio: 0.1,
        modified: Some(MetricRow {
          map: 0.5,
          map_50: 0.75,
          map_75: 0.25,
        }),
        random: None,
        original: None,
        adv: None,
      }],
    };

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("run.xlsx");
    write_workbook(&table, &path).unwrap();

    let bytes = std::fs::read(&path).unwrap();
    assert!(bytes.starts_with(b"PK"));
  }

  #[test]
  fn empty_table_still_saves() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("empty.xlsx");
    write_workbook(&AggregatedTable::default(), &path).unwrap();
    assert!(path.is_file());
  }
}
