//! 实时前端
//!
//! 传感器回调 -> 同步器 -> 位姿 -> 单槽队列；调度器另起一个循环从队列取数据。
//! [Runner] 是进程内唯一的上下文对象，传输层和调度器都通过它交换数据。

pub(crate) mod clock;
mod dispatcher;
pub(crate) mod observation;
mod slot;

pub use clock::{Clock, MonotonicClock};
pub use dispatcher::{DispatchMode, DispatcherConfig, KeyframeDispatcher, TickOutcome};
pub use observation::FusedObservation;
pub use slot::{ObservationSlot, SlotEntry};

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Context;
use parking_lot::{Mutex, RwLock};

use crate::camera::Calibration;
use crate::codec;
use crate::config::{RunnerConfig, StreamConfig};
use crate::dataset::SensorSink;
use crate::engine::MappingEngine;
use crate::global_types::{CameraInfoMsg, ImagePayload, OdometryMsg};
use crate::signal::ShutdownToken;
use crate::sync::RgbdOdomSync;
use crate::utility::Utility;

pub struct Runner {
    calibration: RwLock<Calibration>,
    sync: Mutex<RgbdOdomSync>,
    slot: Arc<ObservationSlot>,
    clock: Arc<dyn Clock>,
    depth_factor: f64,
    /// 本地帧计数
    frame_count: AtomicUsize,
    dispatcher_config: DispatcherConfig,
}

impl Runner {
    pub fn new(config: &RunnerConfig, stream: &StreamConfig, clock: Arc<dyn Clock>) -> Self {
        let calibration = Calibration::from_stream_config(stream);
        let dispatcher_config = DispatcherConfig {
            world_transform: Utility::world_transform(
                config.world_roll,
                config.world_pitch,
                config.world_yaw,
            ),
            extrinsics: calibration.extrinsics,
            mode: DispatchMode::from_parallel_flag(config.use_parallel),
            use_end_process: config.use_end_process,
            stall_timeout: config.stall_timeout,
        };
        Self {
            calibration: RwLock::new(calibration),
            sync: Mutex::new(RgbdOdomSync::new(config.sync_threshold, config.sync_queue_size)),
            slot: Arc::new(ObservationSlot::new()),
            clock,
            depth_factor: stream.depth_factor(),
            frame_count: AtomicUsize::new(0),
            dispatcher_config,
        }
    }

    pub fn slot(&self) -> Arc<ObservationSlot> {
        self.slot.clone()
    }

    pub fn intrinsics(&self) -> Option<nalgebra::Matrix3<f64>> {
        self.calibration.read().intrinsics
    }

    pub fn frame_count(&self) -> usize {
        self.frame_count.load(Ordering::SeqCst)
    }

    /// 同步器丢弃的消息数
    pub fn sync_dropped(&self) -> usize {
        self.sync.lock().dropped()
    }

    /// 构造共享同一个队列的调度器
    pub fn dispatcher<E: MappingEngine>(
        &self,
        engine: E,
        shutdown: ShutdownToken,
    ) -> KeyframeDispatcher<E> {
        KeyframeDispatcher::new(
            engine,
            self.slot.clone(),
            shutdown,
            self.dispatcher_config.clone(),
        )
    }

    /// 同步成功后的回调：解码、缩放深度、构造位姿、入队
    fn on_synced(
        &self,
        color: ImagePayload,
        depth: ImagePayload,
        odom: OdometryMsg,
    ) -> anyhow::Result<()> {
        let timestamp = color.stamp().as_sec();
        let color_img = codec::color_from_payload(&color)
            .with_context(|| format!("color frame at {:.3}", timestamp))?;
        let depth_img = codec::depth_from_payload(&depth, self.depth_factor)
            .with_context(|| format!("depth frame at {:.3}", timestamp))?;
        if color_img.shape()[..2] != depth_img.shape()[..2] {
            log::warn!(
                "[Runner] color {:?} and depth {:?} sizes differ at {:.3}",
                color_img.shape(),
                depth_img.shape(),
                timestamp
            );
        }

        let pose = Utility::build_pose(&odom.position, &odom.orientation);
        let index = self.frame_count.fetch_add(1, Ordering::SeqCst);
        let observation = FusedObservation::new(
            index,
            timestamp,
            color_img,
            depth_img,
            self.intrinsics(),
            pose,
        );
        if let Some(stale) = self.slot.push(observation, self.clock.now()) {
            log::debug!(
                "[Runner] observation {} replaced before dispatch",
                stale.observation.index
            );
        }
        Ok(())
    }

    fn handle_synced(&self, triple: Option<(ImagePayload, ImagePayload, OdometryMsg)>) {
        if let Some((color, depth, odom)) = triple {
            if let Err(e) = self.on_synced(color, depth, odom) {
                log::warn!("[Runner] dropping observation: {:#}", e);
            }
        }
    }
}

impl SensorSink for Runner {
    fn on_color(&self, msg: ImagePayload) {
        let triple = self.sync.lock().push_a(msg);
        self.handle_synced(triple);
    }

    fn on_depth(&self, msg: ImagePayload) {
        let triple = self.sync.lock().push_b(msg);
        self.handle_synced(triple);
    }

    fn on_odometry(&self, msg: OdometryMsg) {
        let triple = self.sync.lock().push_c(msg);
        self.handle_synced(triple);
    }

    fn on_camera_info(&self, msg: CameraInfoMsg) {
        if self.calibration.read().intrinsics.is_some() {
            return;
        }
        self.calibration.write().bind_camera_info(&msg);
    }
}
