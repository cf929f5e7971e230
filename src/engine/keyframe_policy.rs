use nalgebra::{Matrix3, Matrix4, Rotation3, Vector3};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyframePolicyConfig {
    /// 平移阈值（米）
    pub min_translation: f64,
    /// 旋转阈值（角度）
    pub min_rotation: f64,
    /// 超过该时间强制关键帧（秒）
    pub max_interval: f64,
}

impl Default for KeyframePolicyConfig {
    fn default() -> Self {
        Self {
            min_translation: 0.1,
            min_rotation: 10.0,
            max_interval: 1.0,
        }
    }
}

/// 按运动量和时间间隔选关键帧
///
/// 相对上一关键帧：平移超过阈值、旋转超过阈值或时间间隔超过上限。
/// 时间戳不大于上一关键帧的观测一律拒绝。
#[derive(Debug, Default)]
pub struct KeyframePolicy {
    config: KeyframePolicyConfig,
    last: Option<(f64, Matrix4<f64>)>,
}

impl KeyframePolicy {
    pub fn new(config: KeyframePolicyConfig) -> Self {
        Self { config, last: None }
    }

    pub fn check(&mut self, timestamp: f64, pose: &Matrix4<f64>) -> bool {
        let Some((last_time, last_pose)) = &self.last else {
            self.last = Some((timestamp, *pose));
            return true;
        };
        if timestamp <= *last_time {
            return false;
        }

        let dt = timestamp - last_time;
        let translation: Vector3<f64> =
            pose.fixed_view::<3, 1>(0, 3) - last_pose.fixed_view::<3, 1>(0, 3);
        let last_rot: Matrix3<f64> = last_pose.fixed_view::<3, 3>(0, 0).into_owned();
        let rot: Matrix3<f64> = pose.fixed_view::<3, 3>(0, 0).into_owned();
        let relative = Rotation3::from_matrix(&(last_rot.transpose() * rot));
        let angle = relative.angle().to_degrees();

        let accept = dt >= self.config.max_interval
            || translation.norm() >= self.config.min_translation
            || angle >= self.config.min_rotation;
        if accept {
            self.last = Some((timestamp, *pose));
        }
        accept
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utility::Utility;

    #[test]
    fn first_is_keyframe() {
        let mut policy = KeyframePolicy::new(KeyframePolicyConfig::default());
        assert!(policy.check(0.0, &Matrix4::identity()));
        // 静止且间隔短
        assert!(!policy.check(0.1, &Matrix4::identity()));
        // 相同时间戳
        assert!(!policy.check(0.0, &Matrix4::identity()));
    }

    #[test]
    fn motion_and_time_thresholds() {
        let mut policy = KeyframePolicy::new(KeyframePolicyConfig::default());
        policy.check(0.0, &Matrix4::identity());

        let moved = Utility::build_pose(&[0.2, 0.0, 0.0], &[0.0, 0.0, 0.0, 1.0]);
        assert!(policy.check(0.1, &moved));

        // 绕 z 转 20 度
        let half = 10f64.to_radians();
        let turned = Utility::build_pose(&[0.2, 0.0, 0.0], &[0.0, 0.0, half.sin(), half.cos()]);
        assert!(policy.check(0.2, &turned));

        assert!(!policy.check(0.3, &turned));
        assert!(policy.check(1.3, &turned));
    }
}
