// 该文件是 Anquan （安全） 项目的一部分。
// src/stream.rs - 视频流采集控制器
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

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::annotate::Annotator;
use crate::catalog::ClassCatalog;
use crate::detect::Detector;
use crate::input::{DeviceError, FrameSource};
use crate::output::FrameSink;

/// 流水线状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
  /// 空闲：未持有采集设备，循环未运行
  Idle,
  /// 运行：设备已打开，采集循环逐帧工作
  Running,
  /// 停止中：已请求停止，循环在下一个节拍边界退出
  Stopping,
}

const STATE_IDLE: u8 = 0;
const STATE_RUNNING: u8 = 1;
const STATE_STOPPING: u8 = 2;

impl StreamState {
  fn from_u8(value: u8) -> Self {
    match value {
      STATE_RUNNING => StreamState::Running,
      STATE_STOPPING => StreamState::Stopping,
      _ => StreamState::Idle,
    }
  }
}

/// 控制器与控制句柄共享的会话状态
///
/// 状态归属于单个控制器实例，不使用全局量，多路并行流互不影响。
struct Shared {
  state: AtomicU8,
  stop_requested: AtomicBool,
}

/// 流控制句柄
///
/// 可克隆、可跨线程，只承载 start/stop 之外的 stop 信号与状态查询。
/// 停止是协作式的：正在进行的推理允许完成，循环在节拍边界退出。
#[derive(Clone)]
pub struct StreamControl {
  shared: Arc<Shared>,
}

impl StreamControl {
  /// 当前状态
  pub fn state(&self) -> StreamState {
    StreamState::from_u8(self.shared.state.load(Ordering::SeqCst))
  }

  /// 请求停止
  ///
  /// 空闲状态下是空操作，不会留下悬挂的停止请求影响下一次启动。
  pub fn stop(&self) {
    if self
      .shared
      .state
      .compare_exchange(
        STATE_RUNNING,
        STATE_STOPPING,
        Ordering::SeqCst,
        Ordering::SeqCst,
      )
      .is_ok()
    {
      self.shared.stop_requested.store(true, Ordering::SeqCst);
      info!("收到停止信号, 将在当前节拍结束后退出");
    } else {
      debug!("停止信号被忽略: 流不在运行状态");
    }
  }
}

/// 流会话的结束方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
  /// 外部停止信号
  Stopped,
  /// 输入源正常结束
  EndOfStream,
  /// 达到帧数上限
  FrameLimit,
  /// 流已在运行，本次启动为空操作
  AlreadyRunning,
}

/// 流会话汇总
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSummary {
  pub frames_read: u64,
  pub frames_published: u64,
  pub outcome: StreamOutcome,
}

/// 流会话错误
#[derive(Error, Debug)]
pub enum StreamError {
  #[error("设备错误: {0}")]
  Device(#[from] DeviceError),
}

/// 视频流采集控制器
///
/// 拥有一条阻塞顺序执行的采集循环：读取一帧、推理、标注、发布，
/// 完成后才进入下一节拍，同一时刻最多一帧在途，发布顺序即采集顺序。
/// 推理失败只影响当前帧；设备读取失败结束本次会话。
pub struct StreamController<M, S> {
  detector: M,
  annotator: Annotator<'static>,
  catalog: ClassCatalog,
  sink: S,
  max_frames: Option<u64>,
  shared: Arc<Shared>,
}

impl<M: Detector, S: FrameSink> StreamController<M, S> {
  pub fn new(detector: M, annotator: Annotator<'static>, catalog: ClassCatalog, sink: S) -> Self {
    Self {
      detector,
      annotator,
      catalog,
      sink,
      max_frames: None,
      shared: Arc::new(Shared {
        state: AtomicU8::new(STATE_IDLE),
        stop_requested: AtomicBool::new(false),
      }),
    }
  }

  /// 限制本会话处理的最大帧数（None 表示无限制）
  pub fn with_max_frames(mut self, max_frames: Option<u64>) -> Self {
    self.max_frames = max_frames;
    self
  }

  /// 获取控制句柄
  pub fn control(&self) -> StreamControl {
    StreamControl {
      shared: self.shared.clone(),
    }
  }

  /// 当前状态
  pub fn state(&self) -> StreamState {
    StreamState::from_u8(self.shared.state.load(Ordering::SeqCst))
  }

  /// 启动采集循环，阻塞直至会话结束
  ///
  /// 设备由 `open` 在本函数作用域内获取，任何退出路径（停止信号、
  /// 流结束、设备故障）都会释放设备并把状态复位为空闲。
  /// 已在运行时重复启动是空操作。
  pub fn start<F, O>(&mut self, open: O) -> Result<StreamSummary, StreamError>
  where
    F: FrameSource,
    O: FnOnce() -> Result<F, DeviceError>,
  {
    if self
      .shared
      .state
      .compare_exchange(
        STATE_IDLE,
        STATE_RUNNING,
        Ordering::SeqCst,
        Ordering::SeqCst,
      )
      .is_err()
    {
      info!("流已在运行, 忽略重复的启动信号");
      return Ok(StreamSummary {
        frames_read: 0,
        frames_published: 0,
        outcome: StreamOutcome::AlreadyRunning,
      });
    }

    let result = match open() {
      Ok(mut source) => {
        info!("输入源已打开: {}x{}", source.width(), source.height());
        self.run_loop(&mut source)
      }
      Err(e) => {
        error!("设备打开失败: {}", e);
        Err(StreamError::Device(e))
      }
    };
    // 设备在此处随作用域释放

    self.shared.stop_requested.store(false, Ordering::SeqCst);
    self.shared.state.store(STATE_IDLE, Ordering::SeqCst);
    info!("流会话结束, 状态回到空闲");

    result
  }

  fn run_loop<F: FrameSource>(&mut self, source: &mut F) -> Result<StreamSummary, StreamError> {
    let mut frames_read = 0u64;
    let mut frames_published = 0u64;

    let outcome = loop {
      // 节拍边界：协作式取消检查
      if self.shared.stop_requested.load(Ordering::SeqCst) {
        info!("停止请求生效, 退出采集循环");
        break StreamOutcome::Stopped;
      }

      if let Some(max) = self.max_frames {
        if frames_read >= max {
          info!("达到帧数上限 {}, 退出采集循环", max);
          break StreamOutcome::FrameLimit;
        }
      }

      let mut frame = match source.read_frame() {
        Ok(Some(frame)) => frame,
        Ok(None) => {
          info!("输入源结束");
          break StreamOutcome::EndOfStream;
        }
        Err(e) => {
          // 设备故障对本会话致命，交由 start 统一复位与释放
          error!("读取帧失败: {}", e);
          return Err(StreamError::Device(e));
        }
      };
      frames_read += 1;

      let detections = match self.detector.detect(&frame.image) {
        Ok(detections) => detections,
        Err(e) => {
          warn!("第 {} 帧推理失败, 本帧按无检测发布: {}", frame.index, e);
          Vec::new()
        }
      };

      let summary = self.annotator.annotate(&mut frame.image, &detections, &self.catalog);
      debug!(
        "第 {} 帧: 绘制 {} 个检测, 跳过 {} 个",
        frame.index, summary.drawn, summary.skipped
      );

      // 发布不要求确认, 失败只告警不终止会话
      match self.sink.publish(&frame, &detections) {
        Ok(()) => frames_published += 1,
        Err(e) => warn!("第 {} 帧发布失败: {}", frame.index, e),
      }
    };

    if let Err(e) = self.sink.finish() {
      warn!("输出收尾失败: {}", e);
    }

    Ok(StreamSummary {
      frames_read,
      frames_published,
      outcome,
    })
  }
}

#[cfg(test)]
mod tests {
  use std::collections::VecDeque;
  use std::sync::Mutex;
  use std::sync::atomic::AtomicUsize;

  use anyhow::Result;
  use image::RgbImage;

  use super::*;
  use crate::detect::{Detection, ModelInferenceError};
  use crate::input::Frame;

  enum Event {
    Frame,
    Fail,
  }

  /// 按脚本产帧的测试输入源
  struct ScriptedSource {
    events: VecDeque<Event>,
    endless: bool,
    reads: Arc<AtomicUsize>,
    next_index: u64,
    drop_flag: Arc<AtomicBool>,
  }

  impl ScriptedSource {
    fn new(events: Vec<Event>) -> Self {
      Self {
        events: events.into(),
        endless: false,
        reads: Arc::new(AtomicUsize::new(0)),
        next_index: 0,
        drop_flag: Arc::new(AtomicBool::new(false)),
      }
    }

    fn endless() -> Self {
      let mut source = Self::new(Vec::new());
      source.endless = true;
      source
    }

    fn reads(&self) -> Arc<AtomicUsize> {
      self.reads.clone()
    }

    fn drop_flag(&self) -> Arc<AtomicBool> {
      self.drop_flag.clone()
    }

    fn make_frame(&mut self) -> Frame {
      let index = self.next_index;
      self.next_index += 1;
      Frame {
        image: RgbImage::new(16, 16),
        index,
        timestamp_ms: index * 33,
      }
    }
  }

  impl Drop for ScriptedSource {
    fn drop(&mut self) {
      self.drop_flag.store(true, Ordering::SeqCst);
    }
  }

  impl FrameSource for ScriptedSource {
    fn read_frame(&mut self) -> Result<Option<Frame>, DeviceError> {
      self.reads.fetch_add(1, Ordering::SeqCst);
      match self.events.pop_front() {
        Some(Event::Frame) => Ok(Some(self.make_frame())),
        Some(Event::Fail) => Err(DeviceError::Read("模拟读取失败".to_string())),
        None if self.endless => Ok(Some(self.make_frame())),
        None => Ok(None),
      }
    }

    fn width(&self) -> u32 {
      16
    }

    fn height(&self) -> u32 {
      16
    }
  }

  /// 固定结果（或固定失败）的测试检测器
  struct StaticDetector {
    detections: Vec<Detection>,
    fail: bool,
  }

  impl StaticDetector {
    fn empty() -> Self {
      Self {
        detections: Vec::new(),
        fail: false,
      }
    }

    fn failing() -> Self {
      Self {
        detections: Vec::new(),
        fail: true,
      }
    }
  }

  impl Detector for StaticDetector {
    fn detect(&self, _image: &RgbImage) -> Result<Vec<Detection>, ModelInferenceError> {
      if self.fail {
        Err(ModelInferenceError::MalformedOutput(
          "模拟推理失败".to_string(),
        ))
      } else {
        Ok(self.detections.clone())
      }
    }
  }

  /// 收集发布帧索引的测试输出
  struct CollectSink {
    published: Arc<Mutex<Vec<u64>>>,
    stop_after: Option<usize>,
    control: Arc<Mutex<Option<StreamControl>>>,
  }

  impl CollectSink {
    fn new() -> (Self, Arc<Mutex<Vec<u64>>>) {
      let published = Arc::new(Mutex::new(Vec::new()));
      (
        Self {
          published: published.clone(),
          stop_after: None,
          control: Arc::new(Mutex::new(None)),
        },
        published,
      )
    }

    fn with_stop_after(mut self, count: usize) -> (Self, Arc<Mutex<Option<StreamControl>>>) {
      self.stop_after = Some(count);
      let slot = self.control.clone();
      (self, slot)
    }
  }

  impl FrameSink for CollectSink {
    fn publish(&mut self, frame: &Frame, _detections: &[Detection]) -> Result<()> {
      let mut published = self.published.lock().unwrap();
      published.push(frame.index);

      if let Some(count) = self.stop_after {
        if published.len() >= count {
          if let Some(control) = self.control.lock().unwrap().as_ref() {
            control.stop();
          }
        }
      }
      Ok(())
    }
  }

  fn controller(
    detector: StaticDetector,
    sink: CollectSink,
  ) -> StreamController<StaticDetector, CollectSink> {
    StreamController::new(detector, Annotator::default(), ClassCatalog::ppe(), sink)
  }

  #[test]
  fn stop_while_idle_is_noop() {
    let (sink, published) = CollectSink::new();
    let mut controller = controller(StaticDetector::empty(), sink);
    let control = controller.control();

    control.stop();
    assert_eq!(control.state(), StreamState::Idle);
    assert!(!controller.shared.stop_requested.load(Ordering::SeqCst));

    // 之前的 stop 不得影响后续会话
    let summary = controller
      .start(|| Ok(ScriptedSource::new(vec![Event::Frame, Event::Frame])))
      .unwrap();
    assert_eq!(summary.outcome, StreamOutcome::EndOfStream);
    assert_eq!(published.lock().unwrap().len(), 2);
  }

  #[test]
  fn start_while_running_is_noop() {
    let (sink, _published) = CollectSink::new();
    let mut controller = controller(StaticDetector::empty(), sink);
    controller
      .shared
      .state
      .store(STATE_RUNNING, Ordering::SeqCst);

    let opened = AtomicBool::new(false);
    let summary = controller
      .start(|| {
        opened.store(true, Ordering::SeqCst);
        Ok(ScriptedSource::endless())
      })
      .unwrap();

    assert_eq!(summary.outcome, StreamOutcome::AlreadyRunning);
    assert!(!opened.load(Ordering::SeqCst));
    // 重复启动不得篡改会话状态
    assert_eq!(controller.state(), StreamState::Running);
  }

  #[test]
  fn eof_on_first_tick_returns_to_idle_without_publishing() {
    let (sink, published) = CollectSink::new();
    let mut controller = controller(StaticDetector::empty(), sink);

    let source = ScriptedSource::new(Vec::new());
    let reads = source.reads();

    let summary = controller.start(move || Ok(source)).unwrap();
    assert_eq!(summary.outcome, StreamOutcome::EndOfStream);
    assert_eq!(summary.frames_read, 0);
    assert_eq!(summary.frames_published, 0);
    assert_eq!(published.lock().unwrap().len(), 0);
    assert_eq!(reads.load(Ordering::SeqCst), 1);
    assert_eq!(controller.state(), StreamState::Idle);
  }

  #[test]
  fn read_failure_ends_session_and_releases_device() {
    let (sink, published) = CollectSink::new();
    let mut controller = controller(StaticDetector::empty(), sink);

    let source = ScriptedSource::new(vec![Event::Frame, Event::Fail]);
    let reads = source.reads();
    let dropped = source.drop_flag();

    let result = controller.start(move || Ok(source));
    assert!(matches!(result, Err(StreamError::Device(_))));
    assert_eq!(published.lock().unwrap().as_slice(), &[0]);
    // 故障后同一会话内不再调用 read
    assert_eq!(reads.load(Ordering::SeqCst), 2);
    assert!(dropped.load(Ordering::SeqCst));
    assert_eq!(controller.state(), StreamState::Idle);
  }

  #[test]
  fn open_failure_surfaces_and_resets_state() {
    let (sink, _published) = CollectSink::new();
    let mut controller = controller(StaticDetector::empty(), sink);

    let result = controller.start(|| {
      Err::<ScriptedSource, _>(DeviceError::Open("模拟打开失败".to_string()))
    });
    assert!(matches!(result, Err(StreamError::Device(_))));
    assert_eq!(controller.state(), StreamState::Idle);
  }

  #[test]
  fn inference_failure_does_not_stop_the_loop() {
    let (sink, published) = CollectSink::new();
    let mut controller = controller(StaticDetector::failing(), sink);

    let summary = controller
      .start(|| {
        Ok(ScriptedSource::new(vec![
          Event::Frame,
          Event::Frame,
          Event::Frame,
        ]))
      })
      .unwrap();

    assert_eq!(summary.outcome, StreamOutcome::EndOfStream);
    assert_eq!(summary.frames_published, 3);
    assert_eq!(published.lock().unwrap().as_slice(), &[0, 1, 2]);
  }

  #[test]
  fn frames_publish_in_acquisition_order() {
    let (sink, published) = CollectSink::new();
    let mut controller = controller(StaticDetector::empty(), sink);

    let events = vec![
      Event::Frame,
      Event::Frame,
      Event::Frame,
      Event::Frame,
      Event::Frame,
    ];
    controller
      .start(|| Ok(ScriptedSource::new(events)))
      .unwrap();

    assert_eq!(published.lock().unwrap().as_slice(), &[0, 1, 2, 3, 4]);
  }

  #[test]
  fn stop_signal_ends_session_and_releases_device() {
    let (sink, published) = CollectSink::new();
    // 推理持续失败也不能妨碍停止与设备释放
    let (sink, control_slot) = sink.with_stop_after(3);
    let mut controller = controller(StaticDetector::failing(), sink);
    *control_slot.lock().unwrap() = Some(controller.control());

    let source = ScriptedSource::endless();
    let dropped = source.drop_flag();

    let summary = controller.start(move || Ok(source)).unwrap();
    assert_eq!(summary.outcome, StreamOutcome::Stopped);
    assert_eq!(published.lock().unwrap().len(), 3);
    assert!(dropped.load(Ordering::SeqCst));
    assert_eq!(controller.state(), StreamState::Idle);
    assert!(!controller.shared.stop_requested.load(Ordering::SeqCst));

    // 停止后可以重新启动新的会话
    let summary = controller
      .start(|| Ok(ScriptedSource::new(vec![Event::Frame])))
      .unwrap();
    assert_eq!(summary.outcome, StreamOutcome::EndOfStream);
    assert_eq!(summary.frames_published, 1);
  }

  #[test]
  fn frame_limit_ends_session() {
    let (sink, published) = CollectSink::new();
    let mut controller = controller(StaticDetector::empty(), sink).with_max_frames(Some(2));

    let summary = controller
      .start(|| Ok(ScriptedSource::endless()))
      .unwrap();

    assert_eq!(summary.outcome, StreamOutcome::FrameLimit);
    assert_eq!(summary.frames_read, 2);
    assert_eq!(published.lock().unwrap().len(), 2);
  }
}
