use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::Context;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};

use super::{SensorSink, TransportTrait};
use crate::global_types::{CameraInfoMsg, ImagePayload, OdometryMsg};
use crate::signal::ShutdownToken;

/// 检查退出标志的间隔
const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub enum TransportMessage {
    Color(ImagePayload),
    Depth(ImagePayload),
    Odometry(OdometryMsg),
    CameraInfo(CameraInfoMsg),
}

/// 发布端，可克隆给多个生产者
#[derive(Debug, Clone)]
pub struct ChannelPublisher {
    color: Sender<ImagePayload>,
    depth: Sender<ImagePayload>,
    odom: Sender<OdometryMsg>,
    camera_info: Sender<CameraInfoMsg>,
}

impl ChannelPublisher {
    /// 订阅端队列满时丢弃新消息，返回是否投递成功
    pub fn publish(&self, msg: TransportMessage) -> bool {
        match msg {
            TransportMessage::Color(msg) => try_send(&self.color, msg, "color"),
            TransportMessage::Depth(msg) => try_send(&self.depth, msg, "depth"),
            TransportMessage::Odometry(msg) => try_send(&self.odom, msg, "odom"),
            TransportMessage::CameraInfo(msg) => try_send(&self.camera_info, msg, "camera_info"),
        }
    }
}

fn try_send<T>(tx: &Sender<T>, msg: T, topic: &str) -> bool {
    match tx.try_send(msg) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            log::debug!("[Transport] {} queue full, dropping message", topic);
            false
        }
        Err(TrySendError::Disconnected(_)) => false,
    }
}

/// 进程内的发布/订阅，每个话题一个回调线程
#[derive(Debug)]
pub struct ChannelTransport {
    color: Receiver<ImagePayload>,
    depth: Receiver<ImagePayload>,
    odom: Receiver<OdometryMsg>,
    camera_info: Receiver<CameraInfoMsg>,
}

impl ChannelTransport {
    pub fn new(capacity: usize) -> (Self, ChannelPublisher) {
        let capacity = capacity.max(1);
        let (color_tx, color) = crossbeam_channel::bounded(capacity);
        let (depth_tx, depth) = crossbeam_channel::bounded(capacity);
        let (odom_tx, odom) = crossbeam_channel::bounded(capacity);
        let (camera_info_tx, camera_info) = crossbeam_channel::bounded(capacity);
        (
            Self {
                color,
                depth,
                odom,
                camera_info,
            },
            ChannelPublisher {
                color: color_tx,
                depth: depth_tx,
                odom: odom_tx,
                camera_info: camera_info_tx,
            },
        )
    }
}

/// 订阅线程：收到消息就回调，发布端全部断开或请求退出时结束
fn spawn_subscriber<T, F>(
    topic: &str,
    rx: Receiver<T>,
    shutdown: ShutdownToken,
    callback: F,
) -> anyhow::Result<JoinHandle<()>>
where
    T: Send + 'static,
    F: Fn(T) + Send + 'static,
{
    thread::Builder::new()
        .name(format!("sub-{}", topic))
        .spawn(move || {
            while !shutdown.is_requested() {
                match rx.recv_timeout(POLL_INTERVAL) {
                    Ok(msg) => callback(msg),
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
        })
        .with_context(|| format!("failed to spawn subscriber for {}", topic))
}

impl TransportTrait for ChannelTransport {
    fn name(&self) -> &'static str {
        "channel"
    }

    fn start(
        self: Box<Self>,
        sink: Arc<dyn SensorSink>,
        shutdown: ShutdownToken,
    ) -> anyhow::Result<Vec<JoinHandle<()>>> {
        let ChannelTransport {
            color,
            depth,
            odom,
            camera_info,
        } = *self;

        let mut handles = Vec::with_capacity(4);
        let s = sink.clone();
        handles.push(spawn_subscriber("color", color, shutdown.clone(), move |msg| {
            s.on_color(msg)
        })?);
        let s = sink.clone();
        handles.push(spawn_subscriber("depth", depth, shutdown.clone(), move |msg| {
            s.on_depth(msg)
        })?);
        let s = sink.clone();
        handles.push(spawn_subscriber("odom", odom, shutdown.clone(), move |msg| {
            s.on_odometry(msg)
        })?);
        handles.push(spawn_subscriber("camera_info", camera_info, shutdown, move |msg| {
            sink.on_camera_info(msg)
        })?);
        Ok(handles)
    }
}
