//! 传输层消息类型
//!
//! 与具体中间件无关的消息结构，传输适配器负责把各自的消息转换成这些类型。

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timestamp(i64);
impl Timestamp {
    pub fn from_nanos(ns: i64) -> Self {
        Self(ns)
    }
    #[cfg(test)]
    pub fn from_sec(sec: f64) -> Self {
        Self((sec * 1e9).round() as i64)
    }
    #[cfg(test)]
    pub fn as_nanos(&self) -> i64 {
        self.0
    }
    pub fn as_sec(&self) -> f64 {
        self.0 as f64 / 1e9
    }
    /// dt
    pub fn duration_since(&self, other: &Timestamp) -> f64 {
        (self.0 - other.0) as f64 / 1e9
    }
}

#[derive(Debug, Clone, Default)]
pub struct Header {
    pub stamp: Timestamp,
    pub frame_id: String,
}

/// 未压缩图像
#[derive(Debug, Clone, Default)]
pub struct ImageMsg {
    pub header: Header,
    pub height: u32,
    pub width: u32,
    /// rgb8, bgr8, 16UC1 ...
    pub encoding: String,
    /// 每行字节数
    pub step: u32,
    pub data: Vec<u8>,
}

/// 压缩图像，data 为 jpeg/png 编码（深度图带 12 字节头）
#[derive(Debug, Clone, Default)]
pub struct CompressedImageMsg {
    pub header: Header,
    pub format: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone)]
pub enum ImagePayload {
    Raw(ImageMsg),
    Compressed(CompressedImageMsg),
}

impl ImagePayload {
    pub fn stamp(&self) -> Timestamp {
        match self {
            ImagePayload::Raw(msg) => msg.header.stamp,
            ImagePayload::Compressed(msg) => msg.header.stamp,
        }
    }
}

/// 里程计
#[derive(Debug, Clone, Default)]
pub struct OdometryMsg {
    pub header: Header,
    pub position: [f64; 3],
    /// x, y, z, w
    pub orientation: [f64; 4],
}

#[derive(Debug, Clone, Default)]
pub struct CameraInfoMsg {
    pub header: Header,
    pub width: u32,
    pub height: u32,
    /// 3x3 内参，行优先
    pub k: [f64; 9],
}

#[test]
fn test_timestamp() {
    let t1 = Timestamp::from_nanos(1_000_000_000);
    let t2 = Timestamp::from_sec(1.5);
    assert_eq!(t2.as_nanos(), 1_500_000_000);
    assert!((t2.duration_since(&t1) - 0.5).abs() < 1e-12);
    assert!(t1 < t2);
}
