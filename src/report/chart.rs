// 该文件是 MapBench （扰动精度评测） 项目的一部分。
// src/report/chart.rs - 三联对比折线图
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

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{
  draw_filled_rect_mut, draw_hollow_rect_mut, draw_line_segment_mut, draw_text_mut, text_size,
};
use imageproc::rect::Rect;
use tracing::{debug, warn};

use crate::{
  aggregate::{AggregatedTable, MetricTier, VariantGroup},
  report::ReportError,
};

const BACKGROUND: Rgb<u8> = Rgb([255, 255, 255]);
const FOREGROUND: Rgb<u8> = Rgb([0, 0, 0]);
const GRID: Rgb<u8> = Rgb([225, 225, 225]);

/// 找不到 `--font` 时依次尝试的系统字体
const SYSTEM_FONTS: &[&str] = &[
  "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
  "/usr/share/fonts/dejavu/DejaVuSans.ttf",
  "/usr/share/fonts/TTF/DejaVuSans.ttf",
  "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
  "/usr/share/fonts/liberation/LiberationSans-Regular.ttf",
  "/Library/Fonts/Arial.ttf",
  "/System/Library/Fonts/Supplemental/Arial.ttf",
  "C:\\Windows\\Fonts\\arial.ttf",
];

pub fn group_color(group: VariantGroup) -> Rgb<u8> {
  match group {
    VariantGroup::Mod => Rgb([0, 0, 255]),
    VariantGroup::Random => Rgb([255, 0, 0]),
    VariantGroup::Original => Rgb([0, 160, 0]),
    VariantGroup::Adv => Rgb([230, 200, 0]),
  }
}

fn read_font(path: &Path) -> Result<FontArc, ReportError> {
  let data = std::fs::read(path).map_err(|source| ReportError::IoError {
    path: path.to_path_buf(),
    source,
  })?;
  FontArc::try_from_vec(data).map_err(|e| ReportError::FontError {
    path: path.to_path_buf(),
    reason: e.to_string(),
  })
}

/// 加载标注文字用的字体
///
/// 指定的字体无法加载时返回错误；未指定时查找常见系统字体，都找不到则不绘制文字。
pub fn load_font(path: Option<&Path>) -> Result<Option<FontArc>, ReportError> {
  if let Some(path) = path {
    return read_font(path).map(Some);
  }

  for candidate in SYSTEM_FONTS.iter().map(PathBuf::from) {
    if candidate.is_file()
      && let Ok(font) = read_font(&candidate)
    {
      debug!("使用系统字体: {}", candidate.display());
      return Ok(Some(font));
    }
  }

  warn!("未找到可用字体，图中将不绘制文字，可使用 --font 指定");
  Ok(None)
}

/// 单幅子图的尺寸与留白
#[derive(Debug, Clone)]
pub struct ChartStyle {
  pub panel_width: u32,
  pub panel_height: u32,
  pub margin_left: u32,
  pub margin_right: u32,
  pub margin_top: u32,
  pub margin_bottom: u32,
  pub font_size: f32,
  pub ticks: usize,
}

impl Default for ChartStyle {
  fn default() -> Self {
    Self {
      panel_width: 1000,
      panel_height: 500,
      margin_left: 80,
      margin_right: 30,
      margin_top: 50,
      margin_bottom: 60,
      font_size: 18.0,
      ticks: 5,
    }
  }
}

/// 数值区间到像素区间的线性映射
#[derive(Debug, Clone, Copy)]
struct Axis {
  min: f64,
  max: f64,
  from_px: f32,
  to_px: f32,
}

impl Axis {
  fn new(values: impl Iterator<Item = f64>, from_px: f32, to_px: f32, pad: f64) -> Self {
    let (mut min, mut max) = values
      .filter(|v| v.is_finite())
      .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(v), hi.max(v))
      });
    if min > max {
      (min, max) = (0.0, 1.0);
    }
    if (max - min).abs() < 1e-12 {
      min -= 0.5;
      max += 0.5;
    } else {
      let span = max - min;
      min -= span * pad;
      max += span * pad;
    }
    Self {
      min,
      max,
      from_px,
      to_px,
    }
  }

  fn map(&self, value: f64) -> f32 {
    let t = ((value - self.min) / (self.max - self.min)) as f32;
    self.from_px + t * (self.to_px - self.from_px)
  }

  fn ticks(&self, count: usize) -> impl Iterator<Item = f64> + '_ {
    let steps = count.max(2) - 1;
    (0..=steps).map(move |i| self.min + (self.max - self.min) * i as f64 / steps as f64)
  }
}

fn thick_line(image: &mut RgbImage, start: (f32, f32), end: (f32, f32), color: Rgb<u8>) {
  for offset in [-1.0, 0.0, 1.0] {
    draw_line_segment_mut(
      image,
      (start.0, start.1 + offset),
      (end.0, end.1 + offset),
      color,
    );
  }
}

fn marker(image: &mut RgbImage, center: (f32, f32), color: Rgb<u8>) {
  let rect = Rect::at(center.0 as i32 - 3, center.1 as i32 - 3).of_size(7, 7);
  draw_filled_rect_mut(image, rect, color);
}

struct Panel<'a> {
  style: &'a ChartStyle,
  font: Option<&'a FontArc>,
  top: u32,
}

impl Panel<'_> {
  fn text(&self, image: &mut RgbImage, x: i32, y: i32, text: &str) {
    if let Some(font) = self.font {
      let scale = PxScale::from(self.style.font_size);
      draw_text_mut(image, FOREGROUND, x, y, scale, font, text);
    }
  }

  fn text_width(&self, text: &str) -> i32 {
    self
      .font
      .map(|font| text_size(PxScale::from(self.style.font_size), font, text).0 as i32)
      .unwrap_or(0)
  }

  fn draw(&self, image: &mut RgbImage, table: &AggregatedTable, tier: MetricTier) {
    let style = self.style;
    let left = style.margin_left as f32;
    let right = (style.panel_width - style.margin_right) as f32;
    let top = (self.top + style.margin_top) as f32;
    let bottom = (self.top + style.panel_height - style.margin_bottom) as f32;

    let x_axis = Axis::new(table.ratios(), left, right, 0.05);
    let y_values = VariantGroup::ALL
      .iter()
      .flat_map(|&group| table.series(tier, group))
      .filter_map(|(_, value)| value);
    let y_axis = Axis::new(y_values, bottom, top, 0.1);

    // 网格与刻度
    for tick in x_axis.ticks(style.ticks) {
      let x = x_axis.map(tick);
      draw_line_segment_mut(image, (x, top), (x, bottom), GRID);
      let label = format!("{:.2}", tick);
      self.text(
        image,
        x as i32 - self.text_width(&label) / 2,
        bottom as i32 + 6,
        &label,
      );
    }
    for tick in y_axis.ticks(style.ticks) {
      let y = y_axis.map(tick);
      draw_line_segment_mut(image, (left, y), (right, y), GRID);
      let label = format!("{:.3}", tick);
      self.text(
        image,
        left as i32 - self.text_width(&label) - 6,
        y as i32 - style.font_size as i32 / 2,
        &label,
      );
    }

    // 固定组画水平参考线
    for group in [VariantGroup::Original, VariantGroup::Adv] {
      if let Some(value) = table.constant(tier, group) {
        let y = y_axis.map(value);
        thick_line(image, (left, y), (right, y), group_color(group));
      }
    }

    // 比例组画折线，空值处断开
    for group in [VariantGroup::Mod, VariantGroup::Random] {
      let color = group_color(group);
      let mut previous: Option<(f32, f32)> = None;
      for (ratio, value) in table.series(tier, group) {
        let Some(value) = value else {
          previous = None;
          continue;
        };
        let point = (x_axis.map(ratio), y_axis.map(value));
        if let Some(previous) = previous {
          thick_line(image, previous, point, color);
        }
        marker(image, point, color);
        previous = Some(point);
      }
    }

    let frame = Rect::at(left as i32, top as i32)
      .of_size((right - left) as u32 + 1, (bottom - top) as u32 + 1);
    draw_hollow_rect_mut(image, frame, FOREGROUND);

    // 图例位于左上角
    let line_height = style.font_size as i32 + 6;
    for (i, group) in VariantGroup::ALL.iter().enumerate() {
      let y = top as i32 + 12 + i as i32 * line_height;
      let x = left as i32 + 12;
      let mid = (y + line_height / 2 - 3) as f32;
      thick_line(image, (x as f32, mid), (x as f32 + 28.0, mid), group_color(*group));
      self.text(image, x + 36, y, &tier.column(*group));
    }

    let title = format!(
      "{} vs {}",
      tier.column(VariantGroup::Mod),
      tier.column(VariantGroup::Random)
    );
    self.text(
      image,
      (style.panel_width as i32 - self.text_width(&title)) / 2,
      self.top as i32 + (style.margin_top as i32 - style.font_size as i32) / 2,
      &title,
    );
    self.text(
      image,
      ((left + right) / 2.0) as i32 - self.text_width("Ratio") / 2,
      bottom as i32 + 6 + line_height,
      "Ratio",
    );
    self.text(image, 8, top as i32 - line_height, "MAP");
  }
}

/// 依次绘制 map、map_50、map_75 三幅子图，纵向排列
pub fn render_chart(
  table: &AggregatedTable,
  font: Option<&FontArc>,
  style: &ChartStyle,
) -> RgbImage {
  let tiers = MetricTier::ALL;
  let mut image = RgbImage::from_pixel(
    style.panel_width,
    style.panel_height * tiers.len() as u32,
    BACKGROUND,
  );

  for (i, tier) in tiers.iter().enumerate() {
    let panel = Panel {
      style,
      font,
      top: i as u32 * style.panel_height,
    };
    panel.draw(&mut image, table, *tier);
  }

  image
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::aggregate::{AggregatedRow, MetricRow};

  fn metric(map: f64) -> Option<MetricRow> {
    Some(MetricRow {
      map,
      map_50: map,
      map_75: map,
    })
  }

  fn count(image: &RgbImage, color: Rgb<u8>) -> usize {
    image.pixels().filter(|&&p| p == color).count()
  }

  #[test]
  fn axis_maps_range_to_pixels() {
    let axis = Axis::new([0.0, 1.0].into_iter(), 100.0, 200.0, 0.0);
    assert_eq!(axis.map(0.0), 100.0);
    assert_eq!(axis.map(0.5), 150.0);
    assert_eq!(axis.map(1.0), 200.0);
  }

  #[test]
  fn flat_or_empty_axis_is_widened() {
    let axis = Axis::new([0.3].into_iter(), 0.0, 10.0, 0.1);
    assert!(axis.min < 0.3 && axis.max > 0.3);
    let axis = Axis::new(std::iter::empty(), 0.0, 10.0, 0.1);
    assert!(axis.max > axis.min);
  }

  #[test]
  fn renders_three_panels_with_series_colors() {
    let table = AggregatedTable {
      rows: vec![
        AggregatedRow {
          ratio: 0.1,
          modified: metric(0.6),
          random: metric(0.5),
          original: metric(0.9),
          adv: metric(0.1),
        },
        AggregatedRow {
          ratio: 0.3,
          modified: metric(0.4),
          random: metric(0.3),
          original: metric(0.9),
          adv: metric(0.1),
        },
      ],
    };

    let style = ChartStyle::default();
    let image = render_chart(&table, None, &style);
    assert_eq!(image.width(), style.panel_width);
    assert_eq!(image.height(), style.panel_height * 3);
    for group in VariantGroup::ALL {
      assert!(count(&image, group_color(group)) > 0, "{group} 未绘制");
    }
  }

  #[test]
  fn explicit_missing_font_is_an_error() {
    assert!(load_font(Some(Path::new("/nonexistent/font.ttf"))).is_err());
  }

  #[test]
  fn empty_table_still_renders() {
    let image = render_chart(&AggregatedTable::default(), None, &ChartStyle::default());
    assert!(count(&image, BACKGROUND) > 0);
  }
}
