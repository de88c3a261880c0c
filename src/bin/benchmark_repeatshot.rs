// 该文件是 Shijue （视觉） 项目的一部分。
// src/bin/benchmark_repeatshot.rs - 同一图像重复推理，测量平均耗时
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
use url::Url;

use shijue::{
  FromUrl, FromUrlWithScheme,
  input::InputWrapper,
  model::{DeepLabV3PlusBuilder, YoloV5Builder},
  output::OutputWrapper,
  task::{REPEAT_TIMES, REPEAT_WARM_UP, RepeatShotTask, Task},
};
use tracing::info;

/// Shijue 重复推理基准参数
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型输出路径，如 yolov5:///path/out.bin 或 deeplab:///path/out.bin
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 输入来源
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 输出路径
  #[arg(long, value_name = "OUTPUT")]
  pub output: Url,
  /// 重复次数
  #[arg(long, default_value_t = REPEAT_TIMES)]
  pub repeat: usize,
  /// 不计入平均值的预热次数
  #[arg(long, default_value_t = REPEAT_WARM_UP)]
  pub warm_up: usize,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型路径: {}", args.model);
  info!("输入来源: {}", args.input);
  info!("输出路径: {}", args.output);

  let input = InputWrapper::from_url(&args.input)?;
  let output = OutputWrapper::from_url(&args.output)?;
  let task = RepeatShotTask::default()
    .with_repeat_times(args.repeat)
    .with_warm_up(args.warm_up);

  match args.model.scheme() {
    YoloV5Builder::SCHEME => {
      let model = YoloV5Builder::from_url(&args.model)?.build()?;
      task.run_task(input, model, output)?;
    }
    DeepLabV3PlusBuilder::SCHEME => {
      let model = DeepLabV3PlusBuilder::from_url(&args.model)?.build()?;
      task.run_task(input, model, output)?;
    }
    other => anyhow::bail!("不支持的模型方案: {}", other),
  }

  Ok(())
}
