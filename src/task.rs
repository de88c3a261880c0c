// 该文件是 Shijue （视觉） 项目的一部分。
// src/task.rs - 推理任务
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

use std::{thread, time::Duration};
use tracing::{info, warn};

use crate::{model::Model, output::Render};

pub trait Task<I, M, O>: Sized {
  type Error;
  fn run_task(self, input: I, model: M, output: O) -> Result<(), Self::Error>;
}

pub struct OneShotTask;

impl<
  F,
  D,
  ME: std::error::Error + Sync + Send + 'static,
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = F>,
  M: Model<Input = F, Output = D, Error = ME>,
  O: Render<F, D, Error = RE>,
> Task<I, M, O> for OneShotTask
{
  type Error = anyhow::Error;

  fn run_task(self, mut input: I, model: M, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let frame = input.next().ok_or_else(|| anyhow::anyhow!("没有输入帧"))?;
    info!("输入帧获取成功，开始推理...");
    let now = std::time::Instant::now();
    let result = model.infer(&frame)?;
    let inferred = now.elapsed();
    info!("推理完成，耗时: {:.2?}", inferred);
    output.render_result(&frame, &result)?;
    info!("渲染完成，耗时: {:.2?}", now.elapsed() - inferred);

    Ok(())
  }
}

pub const REPEAT_TIMES: usize = 1000;
pub const REPEAT_WARM_UP: usize = 2;

/// 对同一帧重复推理，统计平均耗时
#[derive(Debug, Clone)]
pub struct RepeatShotTask {
  repeat_times: usize,
  warm_up: usize,
}

impl Default for RepeatShotTask {
  fn default() -> Self {
    Self {
      repeat_times: REPEAT_TIMES,
      warm_up: REPEAT_WARM_UP,
    }
  }
}

impl RepeatShotTask {
  pub fn with_repeat_times(mut self, repeat_times: usize) -> Self {
    self.repeat_times = repeat_times;
    self
  }

  pub fn with_warm_up(mut self, warm_up: usize) -> Self {
    self.warm_up = warm_up;
    self
  }
}

/// 去掉预热轮次后的平均耗时；轮次不足时退回到全部轮次
pub fn average_duration(times: &[Duration], warm_up: usize) -> Option<Duration> {
  let measured = if times.len() > warm_up {
    &times[warm_up..]
  } else {
    times
  };
  if measured.is_empty() {
    return None;
  }
  Some(measured.iter().sum::<Duration>() / measured.len() as u32)
}

impl<
  F,
  D,
  ME: std::error::Error + Sync + Send + 'static,
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = F>,
  M: Model<Input = F, Output = D, Error = ME>,
  O: Render<F, D, Error = RE>,
> Task<I, M, O> for RepeatShotTask
{
  type Error = anyhow::Error;

  fn run_task(self, mut input: I, model: M, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let frame = input.next().ok_or_else(|| anyhow::anyhow!("没有输入帧"))?;
    info!("输入帧获取成功，开始推理...");
    let mut times = Vec::with_capacity(self.repeat_times);
    for i in 0..self.repeat_times {
      let now = std::time::Instant::now();
      let result = model.infer(&frame)?;
      let elapsed = now.elapsed();
      info!("({})推理完成，耗时: {:.2?}", i, elapsed);
      output.render_result(&frame, &result)?;
      info!("({})渲染完成，耗时: {:.2?}", i, now.elapsed() - elapsed);
      times.push(elapsed);
    }

    match average_duration(&times, self.warm_up) {
      Some(average) => warn!("平均推理时间: {:.2?}", average),
      None => warn!("没有执行推理"),
    }

    Ok(())
  }
}

#[derive(Default, Debug)]
pub struct ContinuousTask {
  frame_number: Option<usize>,
}

impl ContinuousTask {
  pub fn with_frame_number(mut self, frame_number: Option<usize>) -> Self {
    self.frame_number = frame_number;
    self
  }
}

impl<
  F,
  D,
  ME: std::error::Error + Sync + Send + 'static,
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = F>,
  M: Model<Input = F, Output = D, Error = ME>,
  O: Render<F, D, Error = RE>,
> Task<I, M, O> for ContinuousTask
{
  type Error = anyhow::Error;

  fn run_task(self, input: I, model: M, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let (tx, rx) = std::sync::mpsc::channel();

    // 进程内只能注册一次中断处理
    if let Err(e) = ctrlc::set_handler(move || {
      info!("收到中断信号，准备退出...");
      let _ = tx.send(());
      thread::spawn(|| {
        thread::sleep(Duration::from_secs(30));
        warn!("强制退出程序");
        std::process::exit(1);
      });
    }) {
      warn!("无法注册中断处理: {}", e);
    }

    let mut frame_index = 0usize;
    let mut now = std::time::Instant::now();
    for frame in input {
      frame_index = frame_index.wrapping_add(1);
      info!("处理第 {} 帧图像", frame_index);
      let result = model.infer(&frame)?;
      let elapsed_a = now.elapsed();
      output.render_result(&frame, &result)?;
      let elapsed_b = now.elapsed();
      now = std::time::Instant::now();
      info!("推理完成，耗时: {:.2?} / {:.2?}", elapsed_a, elapsed_b);
      if self.frame_number.is_some_and(|n| frame_index >= n) {
        info!("达到指定帧数 {}, 退出任务循环", frame_index);
        break;
      }
      if rx.try_recv().is_ok() {
        warn!("中断信号接收，退出任务循环");
        break;
      }
    }

    info!("任务完成，共处理 {} 帧", frame_index);
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::cell::{Cell, RefCell};
  use thiserror::Error;

  #[derive(Error, Debug)]
  #[error("测试错误")]
  struct TestError;

  /// 把输入数字加倍的模型，可指定在第几次调用时失败
  struct Doubler {
    calls: Cell<usize>,
    fail_at: Option<usize>,
  }

  impl Doubler {
    fn new() -> Self {
      Self {
        calls: Cell::new(0),
        fail_at: None,
      }
    }
  }

  impl Model for Doubler {
    type Input = u32;
    type Output = u32;
    type Error = TestError;

    fn infer(&self, input: &u32) -> Result<u32, TestError> {
      let call = self.calls.get() + 1;
      self.calls.set(call);
      if self.fail_at == Some(call) {
        return Err(TestError);
      }
      Ok(input * 2)
    }

    fn postprocess(&self, output: &[f32]) -> Result<u32, TestError> {
      Ok(output.len() as u32)
    }
  }

  #[derive(Default)]
  struct Collect(RefCell<Vec<(u32, u32)>>);

  impl Render<u32, u32> for &Collect {
    type Error = TestError;

    fn render_result(&self, frame: &u32, result: &u32) -> Result<(), TestError> {
      self.0.borrow_mut().push((*frame, *result));
      Ok(())
    }
  }

  #[test]
  fn one_shot_uses_first_frame() {
    let out = Collect::default();
    OneShotTask
      .run_task(vec![3, 4].into_iter(), Doubler::new(), &out)
      .unwrap();
    assert_eq!(*out.0.borrow(), vec![(3, 6)]);
  }

  #[test]
  fn one_shot_without_input_fails() {
    let out = Collect::default();
    let result = OneShotTask.run_task(Vec::<u32>::new().into_iter(), Doubler::new(), &out);
    assert!(result.is_err());
  }

  #[test]
  fn repeat_shot_repeats_and_propagates_errors() {
    let out = Collect::default();
    RepeatShotTask::default()
      .with_repeat_times(5)
      .run_task(vec![7].into_iter(), Doubler::new(), &out)
      .unwrap();
    assert_eq!(out.0.borrow().len(), 5);

    let model = Doubler {
      calls: Cell::new(0),
      fail_at: Some(3),
    };
    let out = Collect::default();
    let result = RepeatShotTask::default()
      .with_repeat_times(5)
      .run_task(vec![7].into_iter(), model, &out);
    assert!(result.is_err());
    assert_eq!(out.0.borrow().len(), 2);
  }

  #[test]
  fn average_skips_warm_up_rounds() {
    let times = [
      Duration::from_millis(100),
      Duration::from_millis(80),
      Duration::from_millis(10),
      Duration::from_millis(20),
    ];
    assert_eq!(average_duration(&times, 2), Some(Duration::from_millis(15)));
    // 轮次不足时使用全部数据
    assert_eq!(
      average_duration(&times[..2], 2),
      Some(Duration::from_millis(90))
    );
    assert_eq!(average_duration(&[], 2), None);
  }

  #[test]
  fn continuous_stops_at_frame_number() {
    let out = Collect::default();
    ContinuousTask::default()
      .with_frame_number(Some(3))
      .run_task(1..=10, Doubler::new(), &out)
      .unwrap();
    assert_eq!(*out.0.borrow(), vec![(1, 2), (2, 4), (3, 6)]);

    let out = Collect::default();
    ContinuousTask::default()
      .run_task(1..=4, Doubler::new(), &out)
      .unwrap();
    assert_eq!(out.0.borrow().len(), 4);
  }
}
