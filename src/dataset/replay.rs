use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context};
use opencv::imgcodecs;

use super::{ChannelPublisher, ChannelTransport, SensorSink, TransportMessage, TransportTrait};
use crate::config::{TopicConfig, COMPRESSED_DEPTH_HEADER_LEN};
use crate::global_cast::mat_to_image_msg;
use crate::global_types::{
    CameraInfoMsg, CompressedImageMsg, Header, ImagePayload, OdometryMsg, Timestamp,
};
use crate::signal::ShutdownToken;

/// 回放通道的缓存长度
const REPLAY_QUEUE_SIZE: usize = 64;
/// sleep 的最大分片，保证能及时响应退出
const SLEEP_SLICE: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct ImageRecord {
    pub stamp: Timestamp,
    pub path: PathBuf,
}

/// EuRoC 风格的录制目录
///
/// ```text
/// root/
///   camera/color/
///     data.csv          # timestamp [ns],filename
///     data/xxx.png
///   camera/depth/...
///   odom/data.csv       # timestamp [ns],px,py,pz,qx,qy,qz,qw
///   camera/info/data.csv  # timestamp [ns],fx,fy,cx,cy（可选）
/// ```
#[derive(Debug, Default)]
pub struct ReplayDataset {
    pub rgb: Vec<ImageRecord>,
    pub depth: Vec<ImageRecord>,
    pub odom: Vec<OdometryMsg>,
    pub camera_info: Vec<CameraInfoMsg>,
}

impl ReplayDataset {
    const DATA_CSV: &'static str = "data.csv";
    const DATA_DIR: &'static str = "data";

    /// 话题名去掉开头的 `/` 作为子目录
    pub fn topic_dir(root: &Path, topic: &str) -> PathBuf {
        root.join(topic.trim_start_matches('/'))
    }

    fn reader(dir: &Path) -> anyhow::Result<csv::Reader<std::fs::File>> {
        let csv_path = dir.join(Self::DATA_CSV);
        csv::ReaderBuilder::new()
            .has_headers(false)
            .comment(Some(b'#'))
            .trim(csv::Trim::All)
            .from_path(&csv_path)
            .with_context(|| format!("failed to open {:?}", csv_path))
    }

    pub fn read_images(dir: &Path, frame_id: &str) -> anyhow::Result<Vec<ImageRecord>> {
        let data_path = dir.join(Self::DATA_DIR);
        let mut reader = Self::reader(dir)?;
        let mut images = Vec::new();
        for record in reader.records() {
            let record = record.with_context(|| format!("bad record in {:?}", dir))?;
            let stamp = Timestamp::from_nanos(field(&record, 0, dir)?);
            let name = record
                .get(1)
                .ok_or_else(|| anyhow!("missing filename in {:?}", dir))?;
            images.push(ImageRecord {
                stamp,
                path: data_path.join(name),
            });
        }
        log::info!("[Replay] {} images for {}", images.len(), frame_id);
        Ok(images)
    }

    pub fn read_odometry(dir: &Path, frame_id: &str) -> anyhow::Result<Vec<OdometryMsg>> {
        let mut reader = Self::reader(dir)?;
        let mut odoms = Vec::new();
        for record in reader.records() {
            let record = record.with_context(|| format!("bad record in {:?}", dir))?;
            let mut values = [0.0; 7];
            for (i, v) in values.iter_mut().enumerate() {
                *v = field(&record, i + 1, dir)?;
            }
            odoms.push(OdometryMsg {
                header: header(field(&record, 0, dir)?, frame_id),
                position: [values[0], values[1], values[2]],
                orientation: [values[3], values[4], values[5], values[6]],
            });
        }
        Ok(odoms)
    }

    pub fn read_camera_info(dir: &Path, frame_id: &str) -> anyhow::Result<Vec<CameraInfoMsg>> {
        let mut reader = Self::reader(dir)?;
        let mut infos = Vec::new();
        for record in reader.records() {
            let record = record.with_context(|| format!("bad record in {:?}", dir))?;
            let fx: f64 = field(&record, 1, dir)?;
            let fy: f64 = field(&record, 2, dir)?;
            let cx: f64 = field(&record, 3, dir)?;
            let cy: f64 = field(&record, 4, dir)?;
            infos.push(CameraInfoMsg {
                header: header(field(&record, 0, dir)?, frame_id),
                width: 0,
                height: 0,
                k: [fx, 0.0, cx, 0.0, fy, cy, 0.0, 0.0, 1.0],
            });
        }
        Ok(infos)
    }

    pub fn open(root: &Path, topics: &TopicConfig) -> anyhow::Result<Self> {
        let rgb = Self::read_images(&Self::topic_dir(root, &topics.rgb), &topics.rgb)?;
        let depth = Self::read_images(&Self::topic_dir(root, &topics.depth), &topics.depth)?;
        let odom = Self::read_odometry(&Self::topic_dir(root, &topics.odom), &topics.odom)?;

        // camera_info 可选
        let camera_info = if topics.camera_info.is_empty() {
            Vec::new()
        } else {
            let dir = Self::topic_dir(root, &topics.camera_info);
            if dir.join(Self::DATA_CSV).is_file() {
                Self::read_camera_info(&dir, &topics.camera_info)?
            } else {
                log::warn!("[Replay] no camera info recorded under {:?}", dir);
                Vec::new()
            }
        };

        Ok(Self {
            rgb,
            depth,
            odom,
            camera_info,
        })
    }

    /// 所有数据流中最早的时间戳
    pub fn first_stamp(&self) -> Option<Timestamp> {
        let images = self.rgb.iter().chain(self.depth.iter()).map(|r| r.stamp);
        let odoms = self.odom.iter().map(|m| m.header.stamp);
        let infos = self.camera_info.iter().map(|m| m.header.stamp);
        images.chain(odoms).chain(infos).min()
    }
}

fn header(ns: i64, frame_id: &str) -> Header {
    Header {
        stamp: Timestamp::from_nanos(ns),
        frame_id: frame_id.to_string(),
    }
}

fn field<T>(record: &csv::StringRecord, i: usize, dir: &Path) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let text = record
        .get(i)
        .ok_or_else(|| anyhow!("missing column {} in {:?}", i, dir))?;
    text.parse::<T>()
        .with_context(|| format!("bad value `{}` in column {} of {:?}", text, i, dir))
}

/// 读取一帧图像
///
/// 压缩模式直接转发文件字节，深度图补上固定长度的头；原始模式用 OpenCV 读入。
fn load_image(
    record: &ImageRecord,
    frame_id: &str,
    is_depth: bool,
    use_compressed: bool,
) -> anyhow::Result<ImagePayload> {
    let header = Header {
        stamp: record.stamp,
        frame_id: frame_id.to_string(),
    };
    if use_compressed {
        let bytes = std::fs::read(&record.path)
            .with_context(|| format!("failed to read {:?}", record.path))?;
        let ext = record
            .path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("png")
            .to_string();
        let (format, data) = if is_depth {
            let mut data = vec![0u8; COMPRESSED_DEPTH_HEADER_LEN];
            data.extend_from_slice(&bytes);
            (format!("16UC1; compressedDepth {}", ext), data)
        } else {
            (ext, bytes)
        };
        return Ok(ImagePayload::Compressed(CompressedImageMsg {
            header,
            format,
            data,
        }));
    }

    let path = record
        .path
        .to_str()
        .ok_or_else(|| anyhow!("non utf-8 path {:?}", record.path))?;
    let flags = if is_depth {
        imgcodecs::IMREAD_UNCHANGED
    } else {
        imgcodecs::IMREAD_COLOR
    };
    let mat = imgcodecs::imread(path, flags)?;
    Ok(ImagePayload::Raw(mat_to_image_msg(&mat, header)?))
}

/// 按录制时间戳的节奏发布
#[derive(Debug, Clone)]
struct Pacer {
    origin: Timestamp,
    started: Instant,
    rate: f64,
    shutdown: ShutdownToken,
}

impl Pacer {
    /// 等到该时间戳应当发布的时刻；期间收到退出请求返回 false
    fn wait_for(&self, stamp: Timestamp) -> bool {
        let offset = stamp.duration_since(&self.origin).max(0.0) / self.rate;
        let Some(due) = Duration::try_from_secs_f64(offset)
            .ok()
            .and_then(|delay| self.started.checked_add(delay))
        else {
            log::warn!(
                "[Replay] message at {:.3} is out of reach at rate {}, stopping",
                stamp.as_sec(),
                self.rate
            );
            return false;
        };
        loop {
            if self.shutdown.is_requested() {
                return false;
            }
            let now = Instant::now();
            if now >= due {
                return true;
            }
            thread::sleep((due - now).min(SLEEP_SLICE));
        }
    }
}

fn spawn_publisher<T, F>(
    topic: String,
    items: Vec<T>,
    pacer: Pacer,
    publisher: ChannelPublisher,
    stamp_of: fn(&T) -> Timestamp,
    to_message: F,
) -> anyhow::Result<JoinHandle<()>>
where
    T: Send + 'static,
    F: Fn(&T) -> anyhow::Result<TransportMessage> + Send + 'static,
{
    thread::Builder::new()
        .name(format!("replay-{}", topic.trim_start_matches('/')))
        .spawn(move || {
            for item in &items {
                if !pacer.wait_for(stamp_of(item)) {
                    break;
                }
                match to_message(item) {
                    Ok(msg) => {
                        publisher.publish(msg);
                    }
                    Err(e) => log::warn!("[Replay] {}: {:#}", topic, e),
                }
            }
            log::info!("[Replay] {} finished", topic);
        })
        .with_context(|| format!("failed to spawn replay thread for {}", topic))
}

/// 回放录制目录
#[derive(Debug)]
pub struct ReplayTransport {
    dataset: ReplayDataset,
    topics: TopicConfig,
    rate: f64,
    use_compressed: bool,
}

impl ReplayTransport {
    pub fn new(dataset: ReplayDataset, topics: TopicConfig, rate: f64, use_compressed: bool) -> Self {
        Self {
            dataset,
            topics,
            rate,
            use_compressed,
        }
    }
}

impl TransportTrait for ReplayTransport {
    fn name(&self) -> &'static str {
        "replay"
    }

    fn start(
        self: Box<Self>,
        sink: Arc<dyn SensorSink>,
        shutdown: ShutdownToken,
    ) -> anyhow::Result<Vec<JoinHandle<()>>> {
        let ReplayTransport {
            dataset,
            topics,
            rate,
            use_compressed,
        } = *self;

        let (channel, publisher) = ChannelTransport::new(REPLAY_QUEUE_SIZE);
        let mut handles = Box::new(channel).start(sink, shutdown.clone())?;

        let Some(origin) = dataset.first_stamp() else {
            log::warn!("[Replay] dataset is empty");
            return Ok(handles);
        };
        let pacer = Pacer {
            origin,
            started: Instant::now(),
            rate,
            shutdown,
        };

        let frame_id = topics.rgb.clone();
        handles.push(spawn_publisher(
            topics.rgb,
            dataset.rgb,
            pacer.clone(),
            publisher.clone(),
            |r| r.stamp,
            move |r| {
                load_image(r, &frame_id, false, use_compressed).map(TransportMessage::Color)
            },
        )?);
        let frame_id = topics.depth.clone();
        handles.push(spawn_publisher(
            topics.depth,
            dataset.depth,
            pacer.clone(),
            publisher.clone(),
            |r| r.stamp,
            move |r| load_image(r, &frame_id, true, use_compressed).map(TransportMessage::Depth),
        )?);
        handles.push(spawn_publisher(
            topics.odom,
            dataset.odom,
            pacer.clone(),
            publisher.clone(),
            |m| m.header.stamp,
            |m| Ok(TransportMessage::Odometry(m.clone())),
        )?);
        if !dataset.camera_info.is_empty() {
            handles.push(spawn_publisher(
                topics.camera_info,
                dataset.camera_info,
                pacer,
                publisher,
                |m| m.header.stamp,
                |m| Ok(TransportMessage::CameraInfo(m.clone())),
            )?);
        }
        log::info!("[Replay] started at {}x", rate);
        Ok(handles)
    }
}
