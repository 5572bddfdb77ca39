// 该文件是 Chejian （车检） 项目的一部分。
// src/bin/export_model.rs - 导出移动端模型
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

use anyhow::Result;
use clap::Parser;
use tracing::info;

use chejian::{
  args::ExportArgs,
  export::{ExportParams, run_export},
  ultralytics::UltralyticsExporter,
};

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = ExportArgs::parse();
  let params = ExportParams::from(&args);
  let exporter = UltralyticsExporter::with_python(args.python);

  let mut stdout = std::io::stdout().lock();
  let outcome = run_export(&exporter, &params, &mut stdout)?;
  info!("导出产物: {}", outcome.artifact.display());

  Ok(())
}
