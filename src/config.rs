//! 运行配置
//!
//! 两份 JSON 配置：runner 配置（同步、调度、世界系旋转）和数据流配置
//! （话题名、内参、外参、深度缩放）。

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::engine::KeyframePolicyConfig;
use crate::error::RunnerError;

/// 每个数据流在同步器里最多缓存的消息数
pub const SYNC_QUEUE_SIZE: usize = 10;
/// 压缩深度图的固定头长度
pub const COMPRESSED_DEPTH_HEADER_LEN: usize = 12;
/// 深度缩放，毫米 -> 米
pub const DEFAULT_DEPTH_FACTOR: f64 = 1000.0;
/// 超过该时间没有新数据则认为数据流结束（秒）
pub const STALL_TIMEOUT: f64 = 20.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// 世界系旋转（角度）
    pub world_roll: f64,
    pub world_pitch: f64,
    pub world_yaw: f64,

    /// 同步容差（秒）
    pub sync_threshold: f64,
    pub sync_queue_size: usize,

    /// 数据流停止后是否调用 end_process
    pub use_end_process: bool,
    pub stall_timeout: f64,

    /// 调度频率（Hz）
    pub ros_rate: f64,
    pub use_compressed_topic: bool,
    /// 并行处理 or 顺序处理
    pub use_parallel: bool,

    pub stream_config_path: PathBuf,
    pub transport: String,
    pub replay: ReplayConfig,

    /// 退出时等待调度线程的时间（秒）
    pub shutdown_grace_period: f64,
    pub force_exit: bool,

    /// 关键帧输出目录
    pub output_path: Option<PathBuf>,
    pub keyframe: KeyframePolicyConfig,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            world_roll: 0.0,
            world_pitch: 0.0,
            world_yaw: 0.0,
            sync_threshold: 0.05,
            sync_queue_size: SYNC_QUEUE_SIZE,
            use_end_process: true,
            stall_timeout: STALL_TIMEOUT,
            ros_rate: 10.0,
            use_compressed_topic: false,
            use_parallel: false,
            stream_config_path: PathBuf::from("configs/stream.json"),
            transport: "replay".to_string(),
            replay: ReplayConfig::default(),
            shutdown_grace_period: 3.0,
            force_exit: true,
            output_path: None,
            keyframe: KeyframePolicyConfig::default(),
        }
    }
}

impl RunnerConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read runner config {:?}", path))?;
        let config: Self = serde_json::from_str(&text)
            .with_context(|| format!("failed to parse runner config {:?}", path))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), RunnerError> {
        check_rate("ros_rate", self.ros_rate)?;
        if !(self.sync_threshold >= 0.0) {
            return Err(RunnerError::Config(format!(
                "sync_threshold must not be negative, got {}",
                self.sync_threshold
            )));
        }
        if self.sync_queue_size == 0 {
            return Err(RunnerError::Config("sync_queue_size must be at least 1".into()));
        }
        check_rate("replay.rate", self.replay.rate)?;
        if !(self.stall_timeout.is_finite() && self.stall_timeout > 0.0) {
            return Err(RunnerError::Config(format!(
                "stall_timeout must be a positive number of seconds, got {}",
                self.stall_timeout
            )));
        }
        Ok(())
    }
}

/// 频率必须为正，且周期 1/rate 可以表示为 Duration
fn check_rate(name: &str, rate: f64) -> Result<(), RunnerError> {
    let period = 1.0 / rate;
    if rate > 0.0 && rate.is_finite() && period.is_finite() && period < u64::MAX as f64 {
        return Ok(());
    }
    Err(RunnerError::Config(format!(
        "{} must be a positive finite rate, got {}",
        name, rate
    )))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    /// 录制数据的根目录
    pub root: PathBuf,
    /// 回放倍速
    pub rate: f64,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("data"),
            rate: 1.0,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TopicConfig {
    pub rgb: String,
    pub depth: String,
    pub odom: String,
    pub camera_info: String,
}

/// 数据流配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub ros_topics: TopicConfig,
    // intrinsic
    pub fx: Option<f64>,
    pub fy: Option<f64>,
    pub cx: Option<f64>,
    pub cy: Option<f64>,
    /// camera -> base 外参，4x4；形状在加载标定时检查
    pub extrinsics: Option<serde_json::Value>,
    pub depth_factor: Option<f64>,
}

impl StreamConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read stream config {:?}", path))?;
        serde_json::from_str(&text)
            .with_context(|| format!("failed to parse stream config {:?}", path))
    }

    pub fn depth_factor(&self) -> f64 {
        self.depth_factor.unwrap_or(DEFAULT_DEPTH_FACTOR)
    }

    /// rgb / depth / odom 话题必须配置
    pub fn check_topics(&self) -> Result<(), RunnerError> {
        if self.ros_topics.rgb.is_empty() {
            return Err(RunnerError::MissingTopic("rgb"));
        }
        if self.ros_topics.depth.is_empty() {
            return Err(RunnerError::MissingTopic("depth"));
        }
        if self.ros_topics.odom.is_empty() {
            return Err(RunnerError::MissingTopic("odom"));
        }
        Ok(())
    }
}
