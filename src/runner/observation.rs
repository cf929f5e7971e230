use nalgebra::{Matrix3, Matrix4};

use crate::global_cast::{ColorImage, DepthImage};

/// 一组同步后的 RGB-D + 位姿观测
#[derive(Debug, Clone)]
pub struct FusedObservation {
    /// 彩色图时间戳（秒）
    pub timestamp: f64,
    /// H x W x 3, RGB
    pub color: ColorImage,
    /// H x W x 1, 米
    pub depth: DepthImage,
    /// 内参，可能还没收到
    pub intrinsics: Option<Matrix3<f64>>,
    /// 4x4 位姿
    pub pose: Matrix4<f64>,
    /// 入队时为本地计数，调度时改写为关键帧编号
    pub index: usize,
    pub color_name: String,
}

impl FusedObservation {
    pub fn new(
        index: usize,
        timestamp: f64,
        color: ColorImage,
        depth: DepthImage,
        intrinsics: Option<Matrix3<f64>>,
        pose: Matrix4<f64>,
    ) -> Self {
        Self {
            timestamp,
            color,
            depth,
            intrinsics,
            pose,
            index,
            color_name: timestamp.to_string(),
        }
    }

    /// (height, width)
    pub fn image_size(&self) -> (usize, usize) {
        let shape = self.color.shape();
        (shape[0], shape[1])
    }
}

#[cfg(test)]
pub(crate) fn blank_observation(index: usize, timestamp: f64, pose: Matrix4<f64>) -> FusedObservation {
    FusedObservation::new(
        index,
        timestamp,
        ColorImage::zeros((2, 2, 3)),
        DepthImage::zeros((2, 2, 1)),
        None,
        pose,
    )
}

#[test]
fn color_name_defaults_to_timestamp() {
    let obs = blank_observation(3, 12.5, Matrix4::identity());
    assert_eq!(obs.color_name, "12.5");
    assert_eq!(obs.image_size(), (2, 2));
}
