//! Math type aliases and transform helpers.
//!
//! Thin aliases over `nalgebra` plus the TRS compose/decompose routines the
//! node and skin resolvers need. Quaternions are `[x, y, z, w]` in memory.

pub use nalgebra;

/// 3D vector (f32).
pub type Vec3 = nalgebra::Vector3<f32>;

/// 4D vector (f32).
pub type Vec4 = nalgebra::Vector4<f32>;

/// 4x4 matrix (f32).
pub type Mat4 = nalgebra::Matrix4<f32>;

/// Quaternion (f32). Use [`quat_from_xyzw`] to construct from glTF order.
pub type Quat = nalgebra::Quaternion<f32>;

/// Build a quaternion from glTF `[x, y, z, w]` component order.
pub fn quat_from_xyzw(q: [f32; 4]) -> Quat {
    Quat::new(q[3], q[0], q[1], q[2])
}

/// Build a 4x4 TRS matrix from scale, rotation (quaternion), and translation.
pub fn mat4_from_scale_rotation_translation(
    scale: Vec3,
    rotation: Quat,
    translation: Vec3,
) -> Mat4 {
    let r = nalgebra::UnitQuaternion::new_normalize(rotation);
    let m = r.to_rotation_matrix();
    let rm = m.matrix();
    #[rustfmt::skip]
    let result = Mat4::new(
        rm[(0, 0)] * scale.x, rm[(0, 1)] * scale.y, rm[(0, 2)] * scale.z, translation.x,
        rm[(1, 0)] * scale.x, rm[(1, 1)] * scale.y, rm[(1, 2)] * scale.z, translation.y,
        rm[(2, 0)] * scale.x, rm[(2, 1)] * scale.y, rm[(2, 2)] * scale.z, translation.z,
        0.0,                  0.0,                  0.0,                  1.0,
    );
    result
}

/// Build a column-major `Mat4` from a flat glTF matrix array.
pub fn mat4_from_column_slice(m: &[f32; 16]) -> Mat4 {
    Mat4::from_column_slice(m)
}

/// Decompose a TRS matrix into translation, rotation quaternion, and scale.
///
/// Mirrors the usual decomposition: translation from the last column, scale
/// from basis column lengths (x negated when the basis is left-handed),
/// rotation from the normalized basis.
pub fn decompose_trs(m: &Mat4) -> (Vec3, Quat, Vec3) {
    let translation = Vec3::new(m[(0, 3)], m[(1, 3)], m[(2, 3)]);

    let col = |c: usize| Vec3::new(m[(0, c)], m[(1, c)], m[(2, c)]);
    let (bx, by, bz) = (col(0), col(1), col(2));

    let mut scale = Vec3::new(bx.norm(), by.norm(), bz.norm());
    let det = bx.dot(&by.cross(&bz));
    if det < 0.0 {
        scale.x = -scale.x;
    }

    let safe = |v: f32| if v.abs() < f32::EPSILON { 1.0 } else { v };
    let rot = nalgebra::Matrix3::from_columns(&[
        bx / safe(scale.x),
        by / safe(scale.y),
        bz / safe(scale.z),
    ]);
    let rotation = nalgebra::UnitQuaternion::from_rotation_matrix(
        &nalgebra::Rotation3::from_matrix_unchecked(rot),
    );

    (translation, *rotation.quaternion(), scale)
}

/// Invert a matrix, falling back to identity for singular input.
pub fn invert_or_identity(m: &Mat4) -> Mat4 {
    m.try_inverse().unwrap_or_else(Mat4::identity)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compose_decompose_round_trip() {
        let t = Vec3::new(1.0, 2.0, 3.0);
        let r = quat_from_xyzw([0.0, 0.7071068, 0.0, 0.7071068]);
        let s = Vec3::new(2.0, 2.0, 2.0);

        let m = mat4_from_scale_rotation_translation(s, r, t);
        let (t2, r2, s2) = decompose_trs(&m);

        assert!((t - t2).norm() < 1e-5);
        assert!((s - s2).norm() < 1e-5);
        // q and -q encode the same rotation
        let dot = r.coords.dot(&r2.coords).abs();
        assert!(dot > 0.9999, "rotation mismatch: {dot}");
    }

    #[test]
    fn decompose_identity() {
        let (t, r, s) = decompose_trs(&Mat4::identity());
        assert_eq!(t, Vec3::zeros());
        assert_eq!(s, Vec3::new(1.0, 1.0, 1.0));
        assert!((r.coords - Vec4::new(0.0, 0.0, 0.0, 1.0)).norm() < 1e-6);
    }

    #[test]
    fn invert_singular_is_identity() {
        let m = Mat4::zeros();
        assert_eq!(invert_or_identity(&m), Mat4::identity());
    }
}
