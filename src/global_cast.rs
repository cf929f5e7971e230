//! 全局类型转换
//!
//! OpenCV [Mat] 与 ndarray 图像缓冲、传输消息之间的转换。
//!

use ndarray::{Array2, Array3};
use opencv::core::{Mat, CV_16UC1, CV_8UC3};
use opencv::prelude::*;

use crate::error::{Result, RunnerError};
use crate::global_types::{Header, ImageMsg};

/// H x W x 3, RGB
pub type ColorImage = Array3<u8>;
/// H x W x 1, 米
pub type DepthImage = Array3<f32>;
/// H x W, 原始深度（通常为毫米）
pub type RawDepth = Array2<u16>;

/// 保证数据连续，否则复制一份
fn continuous(mat: &Mat) -> Result<std::borrow::Cow<'_, Mat>> {
    if mat.is_continuous() {
        Ok(std::borrow::Cow::Borrowed(mat))
    } else {
        Ok(std::borrow::Cow::Owned(mat.try_clone()?))
    }
}

fn shape_of(mat: &Mat) -> Result<(usize, usize)> {
    let rows = mat.rows();
    let cols = mat.cols();
    if rows <= 0 || cols <= 0 {
        return Err(RunnerError::InvalidImage(format!("empty mat {}x{}", rows, cols)));
    }
    Ok((rows as usize, cols as usize))
}

/// 8UC3 [Mat] -> [ColorImage]，不做通道转换
pub fn mat_to_color(mat: &Mat) -> Result<ColorImage> {
    if mat.typ() != CV_8UC3 {
        return Err(RunnerError::InvalidImage(format!(
            "expected CV_8UC3 color mat, got type {}",
            mat.typ()
        )));
    }
    let (rows, cols) = shape_of(mat)?;
    let mat = continuous(mat)?;
    let data = mat.data_bytes()?.to_vec();
    Array3::from_shape_vec((rows, cols, 3), data)
        .map_err(|e| RunnerError::InvalidImage(e.to_string()))
}

/// 16UC1 [Mat] -> [RawDepth]
pub fn mat_to_raw_depth(mat: &Mat) -> Result<RawDepth> {
    if mat.typ() != CV_16UC1 {
        return Err(RunnerError::InvalidImage(format!(
            "expected CV_16UC1 depth mat, got type {}",
            mat.typ()
        )));
    }
    let (rows, cols) = shape_of(mat)?;
    let mat = continuous(mat)?;
    let data = mat.data_typed::<u16>()?.to_vec();
    Array2::from_shape_vec((rows, cols), data)
        .map_err(|e| RunnerError::InvalidImage(e.to_string()))
}

/// imread 读到的 [Mat] -> 原始图像消息（bgr8 / 16UC1）
pub fn mat_to_image_msg(mat: &Mat, header: Header) -> Result<ImageMsg> {
    let (rows, cols) = shape_of(mat)?;
    let (encoding, bytes_per_pixel) = match mat.typ() {
        CV_8UC3 => ("bgr8", 3),
        CV_16UC1 => ("16UC1", 2),
        other => {
            return Err(RunnerError::UnsupportedEncoding(format!("cv type {}", other)));
        }
    };
    let mat = continuous(mat)?;
    Ok(ImageMsg {
        header,
        height: rows as u32,
        width: cols as u32,
        encoding: encoding.to_string(),
        step: (cols * bytes_per_pixel) as u32,
        data: mat.data_bytes()?.to_vec(),
    })
}

#[test]
fn test_mat_to_color() {
    let mat = Mat::new_rows_cols_with_default(2, 3, CV_8UC3, opencv::core::Scalar::new(1.0, 2.0, 3.0, 0.0))
        .unwrap();
    let color = mat_to_color(&mat).unwrap();
    assert_eq!(color.shape(), &[2, 3, 3]);
    assert_eq!(color[[1, 2, 0]], 1);
    assert_eq!(color[[1, 2, 2]], 3);
}

#[test]
fn test_mat_to_raw_depth() {
    let mat = Mat::new_rows_cols_with_default(4, 5, CV_16UC1, opencv::core::Scalar::all(2000.0))
        .unwrap();
    let depth = mat_to_raw_depth(&mat).unwrap();
    assert_eq!(depth.dim(), (4, 5));
    assert!(depth.iter().all(|&d| d == 2000));
    assert!(mat_to_color(&mat).is_err());
}

#[test]
fn test_mat_to_image_msg() {
    let mat = Mat::new_rows_cols_with_default(2, 2, CV_16UC1, opencv::core::Scalar::all(7.0)).unwrap();
    let msg = mat_to_image_msg(&mat, Header::default()).unwrap();
    assert_eq!(msg.encoding, "16UC1");
    assert_eq!(msg.step, 4);
    assert_eq!(msg.data.len(), 8);
}
