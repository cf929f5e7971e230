//! 传输层
//!
//! 与中间件无关的订阅接口。适配器把各自的消息转换成 [crate::global_types]
//! 里的类型，然后调用 [SensorSink] 的回调。
//!
//! - [ChannelTransport]：进程内发布/订阅，每个话题一个回调线程
//! - [ReplayTransport]：回放 EuRoC 风格目录，按时间戳节奏发布到 [ChannelTransport]
mod channel;
mod replay;

pub use channel::{ChannelPublisher, ChannelTransport, TransportMessage};
pub use replay::{ReplayDataset, ReplayTransport};

use std::sync::Arc;
use std::thread::JoinHandle;

use crate::config::{RunnerConfig, StreamConfig};
use crate::error::RunnerError;
use crate::global_types::{CameraInfoMsg, ImagePayload, OdometryMsg};
use crate::signal::ShutdownToken;

/// 订阅回调
pub trait SensorSink: Send + Sync {
    fn on_color(&self, msg: ImagePayload);
    fn on_depth(&self, msg: ImagePayload);
    fn on_odometry(&self, msg: OdometryMsg);
    fn on_camera_info(&self, msg: CameraInfoMsg);
}

pub trait TransportTrait {
    fn name(&self) -> &'static str;

    /// 开始投递消息，返回回调线程句柄；线程在 shutdown 后退出
    fn start(
        self: Box<Self>,
        sink: Arc<dyn SensorSink>,
        shutdown: ShutdownToken,
    ) -> anyhow::Result<Vec<JoinHandle<()>>>;
}

pub const SUPPORTED_TRANSPORTS: &[&str] = &["replay"];

/// 根据配置选择传输层，找不到时启动失败
pub fn detect_transport(
    config: &RunnerConfig,
    stream: &StreamConfig,
) -> Result<Box<dyn TransportTrait>, RunnerError> {
    stream.check_topics()?;
    match config.transport.as_str() {
        "replay" => {
            let root = &config.replay.root;
            if !root.is_dir() {
                return Err(RunnerError::TransportUnavailable(format!(
                    "replay root {:?} does not exist",
                    root
                )));
            }
            let dataset = ReplayDataset::open(root, &stream.ros_topics)
                .map_err(|e| RunnerError::TransportUnavailable(format!("{:#}", e)))?;
            log::warn!("[Transport] Detected replay dataset at {:?}", root);
            Ok(Box::new(ReplayTransport::new(
                dataset,
                stream.ros_topics.clone(),
                config.replay.rate,
                config.use_compressed_topic,
            )))
        }
        other => Err(RunnerError::TransportUnavailable(format!(
            "unknown transport `{}`, expected one of {:?}",
            other, SUPPORTED_TRANSPORTS
        ))),
    }
}
