//! 多数据流时间同步
//!
//! 彩色、深度、里程计三路消息按时间戳近似对齐。

mod approximate_time;

pub use approximate_time::ApproximateTimeSync;

use crate::global_types::{ImagePayload, OdometryMsg, Timestamp};

/// 带时间戳的消息
pub trait Stamped {
    fn stamp(&self) -> Timestamp;
}

impl Stamped for ImagePayload {
    fn stamp(&self) -> Timestamp {
        ImagePayload::stamp(self)
    }
}

impl Stamped for OdometryMsg {
    fn stamp(&self) -> Timestamp {
        self.header.stamp
    }
}

/// 彩色 + 深度 + 里程计
pub type RgbdOdomSync = ApproximateTimeSync<ImagePayload, ImagePayload, OdometryMsg>;
