//! 错误类型
//!
//! 解码、配置、传输层的错误。调度循环里的错误统一用 [anyhow] 处理。

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RunnerError {
    /// 压缩图像无法解码
    #[error("failed to decode {kind} payload ({len} bytes)")]
    Decode { kind: &'static str, len: usize },

    /// 不支持的原始图像编码
    #[error("unsupported image encoding: {0}")]
    UnsupportedEncoding(String),

    /// 图像尺寸和数据长度不一致
    #[error("invalid image: {0}")]
    InvalidImage(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    /// 找不到可用的传输层
    #[error("no usable transport: {0}")]
    TransportUnavailable(String),

    #[error("required topic `{0}` is not configured")]
    MissingTopic(&'static str),

    #[error(transparent)]
    OpenCv(#[from] opencv::Error),
}

pub type Result<T> = std::result::Result<T, RunnerError>;
