use nalgebra::{Isometry3, Matrix4, Quaternion, Rotation3, Translation3, UnitQuaternion, Vector3};

pub struct Utility {}

impl Utility {
    /// 平移 + 四元数 (x, y, z, w) -> 4x4 齐次变换
    ///
    /// 非单位四元数会被归一化；零四元数没有定义旋转，按单位旋转处理。
    pub fn build_pose(translation: &[f64; 3], quaternion: &[f64; 4]) -> Matrix4<f64> {
        let [x, y, z, w] = *quaternion;
        let q = Quaternion::new(w, x, y, z);
        let norm = q.norm();
        let rotation = if !(norm > f64::EPSILON) {
            log::warn!("[Pose] degenerate quaternion {:?}, using identity rotation", quaternion);
            UnitQuaternion::identity()
        } else {
            if (norm - 1.0).abs() > 1e-6 {
                log::warn!("[Pose] quaternion norm {:.6}, normalized", norm);
            }
            UnitQuaternion::from_quaternion(q)
        };
        let translation = Translation3::new(translation[0], translation[1], translation[2]);
        Isometry3::from_parts(translation, rotation).to_homogeneous()
    }

    /// 世界系旋转 R = Rz * Ry * Rx，输入为角度，平移为 0
    pub fn world_transform(roll_deg: f64, pitch_deg: f64, yaw_deg: f64) -> Matrix4<f64> {
        let rx = Rotation3::from_axis_angle(&Vector3::x_axis(), roll_deg.to_radians());
        let ry = Rotation3::from_axis_angle(&Vector3::y_axis(), pitch_deg.to_radians());
        let rz = Rotation3::from_axis_angle(&Vector3::z_axis(), yaw_deg.to_radians());
        (rz * ry * rx).to_homogeneous()
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use nalgebra::{Matrix3, Matrix4, RowVector4, Vector3};

    use super::Utility;

    fn assert_orthonormal(m: &Matrix4<f64>) {
        let r: Matrix3<f64> = m.fixed_view::<3, 3>(0, 0).into_owned();
        assert_relative_eq!(r * r.transpose(), Matrix3::identity(), epsilon = 1e-12);
        assert_relative_eq!(r.determinant(), 1.0, epsilon = 1e-12);
        assert_eq!(m.row(3).into_owned(), RowVector4::new(0.0, 0.0, 0.0, 1.0));
    }

    #[test]
    fn world_transform_zero_is_identity() {
        assert_relative_eq!(Utility::world_transform(0.0, 0.0, 0.0), Matrix4::identity());
    }

    #[test]
    fn world_transform_is_rotation() {
        for (roll, pitch, yaw) in [(90.0, 0.0, 0.0), (10.0, -35.0, 170.0), (-180.0, 89.0, 45.0)] {
            let t = Utility::world_transform(roll, pitch, yaw);
            assert_orthonormal(&t);
            assert_eq!(t.fixed_view::<3, 1>(0, 3).into_owned(), Vector3::zeros());
        }
    }

    #[test]
    fn world_transform_composition_order() {
        // yaw 90: x -> y
        let t = Utility::world_transform(0.0, 0.0, 90.0);
        let p = t * nalgebra::Vector4::new(1.0, 0.0, 0.0, 1.0);
        assert_relative_eq!(p, nalgebra::Vector4::new(0.0, 1.0, 0.0, 1.0), epsilon = 1e-12);

        // roll 而后 yaw：Rz * Rx
        let t = Utility::world_transform(90.0, 0.0, 90.0);
        let p = t * nalgebra::Vector4::new(0.0, 1.0, 0.0, 1.0);
        // Rx(90): y -> z, Rz(90): z 不变
        assert_relative_eq!(p, nalgebra::Vector4::new(0.0, 0.0, 1.0, 1.0), epsilon = 1e-12);
    }

    #[test]
    fn identity_quaternion_gives_translation_only() {
        let pose = Utility::build_pose(&[1.0, -2.0, 3.5], &[0.0, 0.0, 0.0, 1.0]);
        let mut expected = Matrix4::identity();
        expected[(0, 3)] = 1.0;
        expected[(1, 3)] = -2.0;
        expected[(2, 3)] = 3.5;
        assert_relative_eq!(pose, expected);
    }

    #[test]
    fn unit_quaternion_gives_rigid_transform() {
        let half = (std::f64::consts::FRAC_PI_4 / 2.0).sin();
        let w = (std::f64::consts::FRAC_PI_4 / 2.0).cos();
        let pose = Utility::build_pose(&[0.3, 0.2, 0.1], &[half, 0.0, 0.0, w]);
        assert_orthonormal(&pose);
        assert_relative_eq!(pose[(0, 3)], 0.3);
    }

    #[test]
    fn non_unit_quaternion_is_normalized() {
        let pose = Utility::build_pose(&[0.0; 3], &[0.0, 0.0, 2.0, 2.0]);
        assert_orthonormal(&pose);
        // 绕 z 旋转 90 度
        assert_relative_eq!(pose[(1, 0)], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn zero_quaternion_falls_back_to_identity() {
        let pose = Utility::build_pose(&[1.0, 0.0, 0.0], &[0.0; 4]);
        assert_orthonormal(&pose);
        assert_relative_eq!(pose.fixed_view::<3, 3>(0, 0).into_owned(), Matrix3::identity());
    }
}
