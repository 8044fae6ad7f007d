// 该文件是 MapBench （扰动精度评测） 项目的一部分。
// src/main.rs - 项目主程序
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

mod args;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use mapbench::{
  FromUrl,
  detector::DetectorBuilder,
  evaluate::VariantEvaluator,
  report::Reporter,
  task::{BenchmarkTask, ExperimentLayout, Task},
};

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = args::Args::parse();

  info!("实验根目录: {}", args.root.display());
  info!("检测器: {}", args.detector);
  info!("输出目录: {}", args.output.display());

  let config = args.detection_config();
  let detector = DetectorBuilder::from_url(&args.detector)?
    .build(args.detector_options())
    .with_context(|| format!("无法构建检测器 {}", args.detector))?;
  info!("检测器加载完成");

  let layout = ExperimentLayout::new(&args.root);
  let evaluator = VariantEvaluator::new(&detector, &config, layout.label_dir());
  let reporter = Reporter::new(&args.output).with_font(args.font.clone());

  let table = BenchmarkTask
    .run_task(&layout, &evaluator, &reporter)
    .with_context(|| format!("评测失败: {}", args.root.display()))?;

  info!("处理完成! 共 {} 个比例", table.len());
  Ok(())
}
