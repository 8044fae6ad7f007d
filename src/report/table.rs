// 该文件是 MapBench （扰动精度评测） 项目的一部分。
// src/report/table.rs - 汇总表 CSV 导出
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

use std::io::Write;

use csv::Writer;

use crate::{aggregate::AggregatedTable, report::ReportError};

/// 首列为 `ratio`，空值输出为空单元格
pub fn write_table<W: Write>(table: &AggregatedTable, writer: W) -> Result<(), ReportError> {
  let mut writer = Writer::from_writer(writer);
  writer.write_record(AggregatedTable::columns())?;

  for row in &table.rows {
    let record = std::iter::once(row.ratio.to_string()).chain(
      row
        .values()
        .into_iter()
        .map(|value| value.map(|v| v.to_string()).unwrap_or_default()),
    );
    writer.write_record(record)?;
  }

  writer.flush().map_err(csv::Error::from)?;
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::aggregate::{AggregatedRow, MetricRow};

  #[test]
  fn writes_header_and_empty_cells() {
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

    let mut buffer = Vec::new();
    write_table(&table, &mut buffer).unwrap();
    let text = String::from_utf8(buffer).unwrap();
    let lines: Vec<&str> = text.lines().collect();

    assert_eq!(lines.len(), 2);
    assert!(lines[0].starts_with("ratio,map_mod,map_50_mod,map_75_mod,map_random,"));
    assert!(lines[0].ends_with("map_adv,map_50_adv,map_75_adv"));
    assert_eq!(lines[1], "0.1,0.5,0.75,0.25,,,,,,,,,");
  }

  #[test]
  fn empty_table_has_only_header() {
    let mut buffer = Vec::new();
    write_table(&AggregatedTable::default(), &mut buffer).unwrap();
    assert_eq!(String::from_utf8(buffer).unwrap().lines().count(), 1);
  }
}
