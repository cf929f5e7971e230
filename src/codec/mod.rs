//! 图像解码
//!
//! 压缩图像走 OpenCV imdecode；原始图像直接按编码拷贝到 ndarray。
//! 深度图最后统一除以 depth_factor 转成米。

mod raw;

pub use raw::{raw_to_color, raw_to_depth, RawDepthImage};

use ndarray::Axis;
use opencv::core::{Mat, Vector};
use opencv::imgcodecs;
use opencv::imgproc::{self, COLOR_BGR2RGB};
use opencv::prelude::*;

use crate::config::COMPRESSED_DEPTH_HEADER_LEN;
use crate::error::{Result, RunnerError};
use crate::global_cast::{mat_to_color, mat_to_raw_depth, ColorImage, DepthImage, RawDepth};
use crate::global_types::ImagePayload;

#[derive(Debug, Clone)]
pub enum Decoded {
    Color(ColorImage),
    Depth(RawDepth),
}

/// 解码压缩图像
///
/// - 深度：跳过 12 字节头，按原样解码（不做颜色转换）
/// - 彩色：解码为 BGR 再转 RGB
pub fn decode(data: &[u8], is_depth: bool) -> Result<Decoded> {
    if is_depth {
        decode_depth(data).map(Decoded::Depth)
    } else {
        decode_color(data).map(Decoded::Color)
    }
}

pub fn decode_color(data: &[u8]) -> Result<ColorImage> {
    let bgr = imdecode(data, imgcodecs::IMREAD_COLOR, "color")?;
    let mut rgb = Mat::default();
    imgproc::cvt_color(&bgr, &mut rgb, COLOR_BGR2RGB, 0)?;
    mat_to_color(&rgb)
}

pub fn decode_depth(data: &[u8]) -> Result<RawDepth> {
    if data.len() <= COMPRESSED_DEPTH_HEADER_LEN {
        return Err(RunnerError::Decode {
            kind: "depth",
            len: data.len(),
        });
    }
    let mat = imdecode(
        &data[COMPRESSED_DEPTH_HEADER_LEN..],
        imgcodecs::IMREAD_UNCHANGED,
        "depth",
    )?;
    mat_to_raw_depth(&mat)
}

fn imdecode(data: &[u8], flags: i32, kind: &'static str) -> Result<Mat> {
    let buf = Vector::<u8>::from_slice(data);
    // 无法解析时 imdecode 可能返回空 Mat，也可能直接报错
    let mat = imgcodecs::imdecode(&buf, flags).map_err(|e| {
        log::debug!("[Codec] imdecode failed: {}", e);
        RunnerError::Decode {
            kind,
            len: data.len(),
        }
    })?;
    if mat.empty() {
        return Err(RunnerError::Decode {
            kind,
            len: data.len(),
        });
    }
    Ok(mat)
}

/// 原始深度 / depth_factor -> 米，H x W x 1
pub fn scale_depth(raw: &RawDepth, depth_factor: f64) -> DepthImage {
    let factor = depth_factor as f32;
    raw.mapv(|d| d as f32 / factor).insert_axis(Axis(2))
}

/// 任意彩色消息 -> RGB
pub fn color_from_payload(payload: &ImagePayload) -> Result<ColorImage> {
    match payload {
        ImagePayload::Compressed(msg) => match decode(&msg.data, false)? {
            Decoded::Color(color) => Ok(color),
            Decoded::Depth(_) => Err(RunnerError::InvalidImage("expected color".into())),
        },
        ImagePayload::Raw(msg) => raw_to_color(msg),
    }
}

/// 任意深度消息 -> 米
pub fn depth_from_payload(payload: &ImagePayload, depth_factor: f64) -> Result<DepthImage> {
    let raw = match payload {
        ImagePayload::Compressed(msg) => match decode(&msg.data, true)? {
            Decoded::Depth(raw) => raw,
            Decoded::Color(_) => return Err(RunnerError::InvalidImage("expected depth".into())),
        },
        ImagePayload::Raw(msg) => match raw_to_depth(msg)? {
            RawDepthImage::Millimeters(raw) => raw,
            RawDepthImage::Meters(depth) => return Ok(depth.insert_axis(Axis(2))),
        },
    };
    Ok(scale_depth(&raw, depth_factor))
}
