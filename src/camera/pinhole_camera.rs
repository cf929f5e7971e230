use nalgebra::Matrix3;

use crate::config::StreamConfig;
use crate::global_types::CameraInfoMsg;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PinholeParameters {
    // size
    pub image_width: u32,
    pub image_height: u32,
    // intrinsic
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
    pub skew: f64,
}

impl PinholeParameters {
    /// fx, fy, cx, cy 必须全部给出
    pub fn from_stream_config(config: &StreamConfig) -> Option<Self> {
        match (config.fx, config.fy, config.cx, config.cy) {
            (Some(fx), Some(fy), Some(cx), Some(cy)) => Some(Self {
                fx,
                fy,
                cx,
                cy,
                ..Default::default()
            }),
            _ => None,
        }
    }

    /// K = [fx, s, cx, 0, fy, cy, 0, 0, 1]，行优先
    pub fn from_camera_info(msg: &CameraInfoMsg) -> Self {
        Self {
            image_width: msg.width,
            image_height: msg.height,
            fx: msg.k[0],
            fy: msg.k[4],
            cx: msg.k[2],
            cy: msg.k[5],
            skew: msg.k[1],
        }
    }

    pub fn intrinsic_matrix(&self) -> Matrix3<f64> {
        Matrix3::new(
            self.fx, self.skew, self.cx, //
            0.0, self.fy, self.cy, //
            0.0, 0.0, 1.0,
        )
    }
}

#[test]
fn camera_info_to_parameters() {
    let msg = CameraInfoMsg {
        width: 640,
        height: 480,
        k: [600.0, 0.0, 320.0, 0.0, 601.0, 240.0, 0.0, 0.0, 1.0],
        ..Default::default()
    };
    let parameters = PinholeParameters::from_camera_info(&msg);
    assert_eq!(parameters.fy, 601.0);
    assert_eq!(parameters.cy, 240.0);
    assert_eq!(parameters.image_width, 640);
    assert_eq!(
        parameters.intrinsic_matrix(),
        Matrix3::from_row_slice(&msg.k)
    );
}

#[test]
fn camera_info_keeps_skew() {
    let msg = CameraInfoMsg {
        k: [600.0, 0.5, 320.0, 0.0, 601.0, 240.0, 0.0, 0.0, 1.0],
        ..Default::default()
    };
    let parameters = PinholeParameters::from_camera_info(&msg);
    assert_eq!(parameters.skew, 0.5);
    assert_eq!(
        parameters.intrinsic_matrix(),
        Matrix3::from_row_slice(&msg.k)
    );
}
