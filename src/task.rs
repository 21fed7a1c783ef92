// 该文件是 Kanjian （看见） 项目的一部分。
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

use std::{
  sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
  },
  thread,
  time::{Duration, Instant},
};
use tracing::{debug, info, warn};

use crate::{
  frame::RgbNhwcFrame,
  input::CaptureSource,
  model::{DetectResult, Model},
  output::Render,
};

const FPS_LOG_INTERVAL: usize = 30;
const FORCE_EXIT_AFTER: Duration = Duration::from_secs(30);

/// 无法打开输入或读不到首帧时的错误信息
pub const CAPTURE_INIT_ERROR: &str = "Failed to initialize video capture";

pub trait Task<I, M, O>: Sized {
  type Output;
  type Error;
  fn run_task(self, input: I, model: M, output: O) -> Result<Self::Output, Self::Error>;
}

/// 注册 Ctrl-C 处理函数，返回收到中断后置位的标志
///
/// 中断后 30 秒仍未退出时强制结束进程。
pub fn interrupt_flag() -> Result<Arc<AtomicBool>, ctrlc::Error> {
  let flag = Arc::new(AtomicBool::new(false));
  let handler_flag = flag.clone();

  ctrlc::set_handler(move || {
    info!("收到中断信号，准备退出...");
    handler_flag.store(true, Ordering::SeqCst);
    thread::spawn(|| {
      thread::sleep(FORCE_EXIT_AFTER);
      warn!("强制退出程序");
      std::process::exit(1);
    });
  })?;

  Ok(flag)
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
  type Output = D;
  type Error = anyhow::Error;

  fn run_task(self, mut input: I, model: M, output: O) -> Result<D, Self::Error> {
    info!("开始任务...");
    let frame = input.next().ok_or_else(|| anyhow::anyhow!("没有输入帧"))?;
    info!("输入帧获取成功，开始推理...");
    let now = Instant::now();
    let result = model.infer(&frame)?;
    info!("推理完成，耗时: {:.2?}", now.elapsed());
    output.render_result(&frame, &result)?;
    info!("渲染完成，耗时: {:.2?}", now.elapsed());

    Ok(result)
  }
}

/// 连续推理的统计
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TaskSummary {
  pub frames: usize,
  pub detections: usize,
}

/// 推理循环：取帧、推理、渲染，直到输入结束、达到帧数或收到停止信号
#[derive(Default, Debug)]
pub struct ContinuousTask {
  frame_number: Option<usize>,
  warmup_frames: usize,
  stop_flags: Vec<Arc<AtomicBool>>,
}

impl ContinuousTask {
  pub fn with_frame_number(mut self, frame_number: Option<usize>) -> Self {
    self.frame_number = frame_number;
    self
  }

  /// 摄像头打开后丢弃的帧数
  pub fn with_warmup_frames(mut self, warmup_frames: usize) -> Self {
    self.warmup_frames = warmup_frames;
    self
  }

  /// 任一标志置位后在下一帧前退出循环
  pub fn with_stop_flag(mut self, flag: Arc<AtomicBool>) -> Self {
    self.stop_flags.push(flag);
    self
  }

  fn stop_requested(&self) -> bool {
    self.stop_flags.iter().any(|flag| flag.load(Ordering::SeqCst))
  }
}

impl<
  T,
  ME: std::error::Error + Sync + Send + 'static,
  RE: std::error::Error + Sync + Send + 'static,
  I: CaptureSource,
  M: Model<Input = RgbNhwcFrame, Output = DetectResult<T>, Error = ME>,
  O: Render<RgbNhwcFrame, DetectResult<T>, Error = RE>,
> Task<I, M, O> for ContinuousTask
{
  type Output = TaskSummary;
  type Error = anyhow::Error;

  fn run_task(self, mut input: I, model: M, output: O) -> Result<TaskSummary, Self::Error> {
    info!("开始任务...");

    let Some(first) = input.next() else {
      anyhow::bail!(CAPTURE_INIT_ERROR);
    };
    info!("输入已就绪: {}x{}", first.width(), first.height());

    // 摄像头的首帧与预热帧曝光不稳定，全部丢弃
    let mut pending = if input.is_camera() {
      let discarded = input.by_ref().take(self.warmup_frames).count();
      debug!("预热丢弃 {} 帧", discarded + 1);
      None
    } else {
      Some(first)
    };

    let mut summary = TaskSummary::default();
    let mut window_start = Instant::now();

    loop {
      if self.stop_requested() {
        warn!("收到停止信号，退出任务循环");
        break;
      }

      let Some(frame) = pending.take().or_else(|| input.next()) else {
        info!("输入结束");
        break;
      };

      let now = Instant::now();
      let result = model.infer(&frame)?;
      let infer_elapsed = now.elapsed();
      output.render_result(&frame, &result)?;
      debug!(
        "第 {} 帧: {} 个目标，推理 {:.2?} / 总计 {:.2?}",
        summary.frames + 1,
        result.len(),
        infer_elapsed,
        now.elapsed()
      );

      summary.frames += 1;
      summary.detections += result.len();

      if summary.frames % FPS_LOG_INTERVAL == 0 {
        let elapsed = window_start.elapsed().as_secs_f64();
        if elapsed > 0.0 {
          info!(
            "已处理 {} 帧，最近 {} 帧 {:.2} fps",
            summary.frames,
            FPS_LOG_INTERVAL,
            FPS_LOG_INTERVAL as f64 / elapsed
          );
        }
        window_start = Instant::now();
      }

      if self.frame_number.is_some_and(|n| summary.frames >= n) {
        info!("达到指定帧数 {}, 退出任务循环", summary.frames);
        break;
      }
    }

    info!(
      "任务完成: 共 {} 帧, {} 个目标",
      summary.frames, summary.detections
    );
    Ok(summary)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::{CocoLabel, DetectItem, WithLabel};
  use std::{cell::RefCell, convert::Infallible, rc::Rc};

  struct FakeSource {
    frames: std::vec::IntoIter<RgbNhwcFrame>,
    camera: bool,
  }

  impl FakeSource {
    // 第 i 帧宽度为 i + 1，便于识别
    fn new(count: usize, camera: bool) -> Self {
      let frames: Vec<_> = (0..count)
        .map(|i| RgbNhwcFrame::with_shape(1, i + 1))
        .collect();
      Self {
        frames: frames.into_iter(),
        camera,
      }
    }
  }

  impl Iterator for FakeSource {
    type Item = RgbNhwcFrame;

    fn next(&mut self) -> Option<Self::Item> {
      self.frames.next()
    }
  }

  impl CaptureSource for FakeSource {
    fn is_camera(&self) -> bool {
      self.camera
    }
  }

  /// 每帧返回宽度个检测框
  struct FakeModel;

  impl Model for FakeModel {
    type Input = RgbNhwcFrame;
    type Output = DetectResult<CocoLabel>;
    type Error = Infallible;

    fn infer(&self, input: &RgbNhwcFrame) -> Result<Self::Output, Self::Error> {
      let items = (0..input.width())
        .map(|_| DetectItem {
          kind: CocoLabel::from_label_id(1),
          score: 0.9,
          bbox: [0.0, 0.0, 1.0, 1.0],
        })
        .collect::<Vec<_>>();
      Ok(items.into())
    }
  }

  /// 记录渲染过的帧宽度，达到 `stop_after` 帧后置位停止标志
  #[derive(Clone, Default)]
  struct Recorder {
    widths: Rc<RefCell<Vec<usize>>>,
    stop: Option<(usize, Arc<AtomicBool>)>,
  }

  impl Render<RgbNhwcFrame, DetectResult<CocoLabel>> for Recorder {
    type Error = Infallible;

    fn render_result(
      &self,
      frame: &RgbNhwcFrame,
      _result: &DetectResult<CocoLabel>,
    ) -> Result<(), Self::Error> {
      let mut widths = self.widths.borrow_mut();
      widths.push(frame.width());
      if let Some((after, flag)) = &self.stop
        && widths.len() >= *after
      {
        flag.store(true, Ordering::SeqCst);
      }
      Ok(())
    }
  }

  #[test]
  fn empty_source_fails_to_initialize() {
    let err = ContinuousTask::default()
      .run_task(FakeSource::new(0, false), FakeModel, Recorder::default())
      .unwrap_err();
    assert_eq!(err.to_string(), CAPTURE_INIT_ERROR);
  }

  #[test]
  fn file_source_processes_every_frame() {
    let recorder = Recorder::default();
    let summary = ContinuousTask::default()
      .with_warmup_frames(5)
      .run_task(FakeSource::new(3, false), FakeModel, recorder.clone())
      .unwrap();
    assert_eq!(
      summary,
      TaskSummary {
        frames: 3,
        detections: 1 + 2 + 3
      }
    );
    assert_eq!(*recorder.widths.borrow(), vec![1, 2, 3]);
  }

  #[test]
  fn camera_discards_first_and_warmup_frames() {
    let recorder = Recorder::default();
    let summary = ContinuousTask::default()
      .with_warmup_frames(2)
      .run_task(FakeSource::new(6, true), FakeModel, recorder.clone())
      .unwrap();
    assert_eq!(summary.frames, 3);
    assert_eq!(*recorder.widths.borrow(), vec![4, 5, 6]);
  }

  #[test]
  fn frame_limit_stops_the_loop() {
    let summary = ContinuousTask::default()
      .with_frame_number(Some(2))
      .run_task(FakeSource::new(10, false), FakeModel, Recorder::default())
      .unwrap();
    assert_eq!(summary.frames, 2);
  }

  #[test]
  fn stop_flag_set_before_start_processes_nothing() {
    let flag = Arc::new(AtomicBool::new(true));
    let summary = ContinuousTask::default()
      .with_stop_flag(flag)
      .run_task(FakeSource::new(4, false), FakeModel, Recorder::default())
      .unwrap();
    assert_eq!(summary, TaskSummary::default());
  }

  #[test]
  fn stop_flag_from_output_ends_loop_cleanly() {
    let flag = Arc::new(AtomicBool::new(false));
    let recorder = Recorder {
      stop: Some((2, flag.clone())),
      ..Default::default()
    };
    let summary = ContinuousTask::default()
      .with_stop_flag(flag)
      .run_task(FakeSource::new(8, false), FakeModel, recorder.clone())
      .unwrap();
    assert_eq!(summary.frames, 2);
    assert_eq!(*recorder.widths.borrow(), vec![1, 2]);
  }

  #[test]
  fn one_shot_returns_result_of_first_frame() {
    let recorder = Recorder::default();
    let result = OneShotTask
      .run_task(FakeSource::new(3, false), FakeModel, recorder.clone())
      .unwrap();
    assert_eq!(result.len(), 1);
    assert_eq!(result.items[0].kind.to_label_str(), "person");
    assert_eq!(*recorder.widths.borrow(), vec![1]);
  }
}
