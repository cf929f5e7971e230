use ndarray::{Array2, Array3};

use crate::error::{Result, RunnerError};
use crate::global_cast::{ColorImage, RawDepth};
use crate::global_types::ImageMsg;

/// 原始深度图：16 位整数需要缩放，32 位浮点已经是米
#[derive(Debug, Clone)]
pub enum RawDepthImage {
    Millimeters(RawDepth),
    Meters(Array2<f32>),
}

/// 检查 step 和数据长度，返回每行字节数
fn row_stride(msg: &ImageMsg, bytes_per_pixel: usize) -> Result<usize> {
    let width = msg.width as usize;
    let height = msg.height as usize;
    if width == 0 || height == 0 {
        return Err(RunnerError::InvalidImage(format!("empty image {}x{}", width, height)));
    }
    let step = if msg.step == 0 {
        width * bytes_per_pixel
    } else {
        msg.step as usize
    };
    if step < width * bytes_per_pixel || msg.data.len() < step * height {
        return Err(RunnerError::InvalidImage(format!(
            "{} image {}x{} step {} with {} bytes",
            msg.encoding,
            width,
            height,
            step,
            msg.data.len()
        )));
    }
    Ok(step)
}

pub fn raw_to_color(msg: &ImageMsg) -> Result<ColorImage> {
    // (每像素字节数, RGB 在像素内的偏移)
    let (bpp, offsets): (usize, [usize; 3]) = match msg.encoding.as_str() {
        "rgb8" => (3, [0, 1, 2]),
        "bgr8" => (3, [2, 1, 0]),
        "rgba8" => (4, [0, 1, 2]),
        "bgra8" => (4, [2, 1, 0]),
        "mono8" => (1, [0, 0, 0]),
        other => return Err(RunnerError::UnsupportedEncoding(other.to_string())),
    };
    let step = row_stride(msg, bpp)?;
    let data = &msg.data;
    Ok(Array3::from_shape_fn(
        (msg.height as usize, msg.width as usize, 3),
        |(row, col, c)| data[row * step + col * bpp + offsets[c]],
    ))
}

pub fn raw_to_depth(msg: &ImageMsg) -> Result<RawDepthImage> {
    let shape = (msg.height as usize, msg.width as usize);
    match msg.encoding.as_str() {
        "16UC1" | "mono16" => {
            let step = row_stride(msg, 2)?;
            let data = &msg.data;
            Ok(RawDepthImage::Millimeters(Array2::from_shape_fn(
                shape,
                |(row, col)| {
                    let i = row * step + col * 2;
                    u16::from_le_bytes([data[i], data[i + 1]])
                },
            )))
        }
        "32FC1" => {
            let step = row_stride(msg, 4)?;
            let data = &msg.data;
            Ok(RawDepthImage::Meters(Array2::from_shape_fn(shape, |(row, col)| {
                let i = row * step + col * 4;
                f32::from_le_bytes([data[i], data[i + 1], data[i + 2], data[i + 3]])
            })))
        }
        other => Err(RunnerError::UnsupportedEncoding(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(encoding: &str, width: u32, height: u32, step: u32, data: Vec<u8>) -> ImageMsg {
        ImageMsg {
            width,
            height,
            step,
            encoding: encoding.to_string(),
            data,
            ..Default::default()
        }
    }

    #[test]
    fn bgr8_is_swapped_to_rgb() {
        let msg = image("bgr8", 2, 1, 6, vec![1, 2, 3, 4, 5, 6]);
        let rgb = raw_to_color(&msg).unwrap();
        assert_eq!(rgb.as_slice().unwrap(), &[3, 2, 1, 6, 5, 4]);
    }

    #[test]
    fn row_padding_is_skipped() {
        // 每行 1 个像素 + 2 字节填充
        let msg = image("rgb8", 1, 2, 5, vec![1, 2, 3, 0, 0, 4, 5, 6, 0, 0]);
        let rgb = raw_to_color(&msg).unwrap();
        assert_eq!(rgb.as_slice().unwrap(), &[1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn mono16_depth() {
        let msg = image("16UC1", 2, 1, 0, [2000u16, 500].iter().flat_map(|d| d.to_le_bytes()).collect());
        match raw_to_depth(&msg).unwrap() {
            RawDepthImage::Millimeters(depth) => assert_eq!(depth.as_slice().unwrap(), &[2000, 500]),
            RawDepthImage::Meters(_) => panic!("expected integer depth"),
        }
    }

    #[test]
    fn short_buffer_is_rejected() {
        let msg = image("rgb8", 2, 2, 6, vec![0; 6]);
        assert!(matches!(raw_to_color(&msg), Err(RunnerError::InvalidImage(_))));
        let msg = image("yuv422", 2, 2, 4, vec![0; 8]);
        assert!(matches!(raw_to_color(&msg), Err(RunnerError::UnsupportedEncoding(_))));
    }
}
