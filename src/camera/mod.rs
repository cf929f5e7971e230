//! 相机标定
//!
//! 内参从数据流配置读取，缺失时等待 camera_info 消息补上（只绑定一次）。
//! 外参 camera -> base，格式不对时退化为单位阵。

mod pinhole_camera;
pub use pinhole_camera::PinholeParameters;

use nalgebra::{Matrix3, Matrix4};

use crate::config::StreamConfig;
use crate::global_types::CameraInfoMsg;

/// 标定状态：启动时加载，之后只允许一次 camera_info 补全内参
#[derive(Debug, Clone)]
pub struct Calibration {
    pub intrinsics: Option<Matrix3<f64>>,
    pub extrinsics: Matrix4<f64>,
}

impl Calibration {
    pub fn from_stream_config(config: &StreamConfig) -> Self {
        Self {
            intrinsics: load_intrinsics(config),
            extrinsics: load_extrinsics(config),
        }
    }

    /// 返回是否更新了内参
    pub fn bind_camera_info(&mut self, msg: &CameraInfoMsg) -> bool {
        if self.intrinsics.is_some() {
            return false;
        }
        let parameters = PinholeParameters::from_camera_info(msg);
        self.intrinsics = Some(parameters.intrinsic_matrix());
        log::warn!(
            "[Calibration] Camera intrinsics received and stored ({}x{}).",
            parameters.image_width,
            parameters.image_height
        );
        true
    }
}

pub fn load_intrinsics(config: &StreamConfig) -> Option<Matrix3<f64>> {
    match PinholeParameters::from_stream_config(config) {
        Some(parameters) => {
            log::info!(
                "[Calibration] intrinsics fx={} fy={} cx={} cy={}",
                parameters.fx,
                parameters.fy,
                parameters.cx,
                parameters.cy
            );
            Some(parameters.intrinsic_matrix())
        }
        None => {
            log::warn!("[Calibration] No intrinsics in stream config, waiting for camera_info.");
            None
        }
    }
}

pub fn load_extrinsics(config: &StreamConfig) -> Matrix4<f64> {
    let Some(value) = &config.extrinsics else {
        log::warn!("[Calibration] No extrinsics in stream config, using identity.");
        return Matrix4::identity();
    };
    match parse_extrinsics(value) {
        Some(matrix) => matrix,
        None => {
            log::warn!(
                "[Calibration] Extrinsics is not a 4x4 numeric matrix ({}), using identity.",
                value
            );
            Matrix4::identity()
        }
    }
}

fn parse_extrinsics(value: &serde_json::Value) -> Option<Matrix4<f64>> {
    let rows = value.as_array()?;
    if rows.len() != 4 {
        return None;
    }
    let mut matrix = Matrix4::zeros();
    for (i, row) in rows.iter().enumerate() {
        let row = row.as_array()?;
        if row.len() != 4 {
            return None;
        }
        for (j, cell) in row.iter().enumerate() {
            matrix[(i, j)] = cell.as_f64()?;
        }
    }
    Some(matrix)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream_config(json: &str) -> StreamConfig {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn intrinsics_from_config() {
        let config = stream_config(r#"{ "fx": 500.0, "fy": 501.0, "cx": 320.0, "cy": 240.0 }"#);
        let k = load_intrinsics(&config).unwrap();
        assert_eq!(
            k,
            Matrix3::new(500.0, 0.0, 320.0, 0.0, 501.0, 240.0, 0.0, 0.0, 1.0)
        );
    }

    #[test]
    fn partial_intrinsics_are_unset() {
        let config = stream_config(r#"{ "fx": 500.0, "fy": 501.0 }"#);
        assert!(load_intrinsics(&config).is_none());
    }

    #[test]
    fn extrinsics_verbatim() {
        let config = stream_config(
            r#"{ "extrinsics": [[0,-1,0,0.1],[1,0,0,0.2],[0,0,1,0.3],[0,0,0,1]] }"#,
        );
        let t = load_extrinsics(&config);
        assert_eq!(t[(0, 1)], -1.0);
        assert_eq!(t[(1, 0)], 1.0);
        assert_eq!(t[(2, 3)], 0.3);
    }

    #[test]
    fn malformed_extrinsics_degrade_to_identity() {
        let missing = stream_config("{}");
        assert_eq!(load_extrinsics(&missing), Matrix4::identity());

        let short = stream_config(r#"{ "extrinsics": [[1,0,0],[0,1,0],[0,0,1]] }"#);
        assert_eq!(load_extrinsics(&short), Matrix4::identity());

        let ragged = stream_config(r#"{ "extrinsics": [[1,0,0,0],[0,1,0],[0,0,1,0],[0,0,0,1]] }"#);
        assert_eq!(load_extrinsics(&ragged), Matrix4::identity());

        let named = stream_config(r#"{ "extrinsics": "identity" }"#);
        assert_eq!(load_extrinsics(&named), Matrix4::identity());

        let text_cell =
            stream_config(r#"{ "extrinsics": [[1,0,0,"0.5"],[0,1,0,0],[0,0,1,0],[0,0,0,1]] }"#);
        assert_eq!(load_extrinsics(&text_cell), Matrix4::identity());

        let null_cell =
            stream_config(r#"{ "extrinsics": [[1,0,0,null],[0,1,0,0],[0,0,1,0],[0,0,0,1]] }"#);
        assert_eq!(load_extrinsics(&null_cell), Matrix4::identity());
    }

    #[test]
    fn camera_info_binds_once() {
        let mut calibration = Calibration::from_stream_config(&StreamConfig::default());
        assert!(calibration.intrinsics.is_none());

        let first = CameraInfoMsg {
            k: [400.0, 0.0, 200.0, 0.0, 400.0, 100.0, 0.0, 0.0, 1.0],
            ..Default::default()
        };
        assert!(calibration.bind_camera_info(&first));

        let second = CameraInfoMsg {
            k: [1.0, 0.0, 1.0, 0.0, 1.0, 1.0, 0.0, 0.0, 1.0],
            ..Default::default()
        };
        assert!(!calibration.bind_camera_info(&second));
        assert_eq!(calibration.intrinsics.unwrap()[(0, 0)], 400.0);
    }

    #[test]
    fn camera_info_skew_is_kept() {
        let mut calibration = Calibration::from_stream_config(&StreamConfig::default());
        let msg = CameraInfoMsg {
            k: [400.0, 1.5, 200.0, 0.0, 400.0, 100.0, 0.0, 0.0, 1.0],
            ..Default::default()
        };
        assert!(calibration.bind_camera_info(&msg));
        assert_eq!(calibration.intrinsics, Some(Matrix3::from_row_slice(&msg.k)));
    }
}
