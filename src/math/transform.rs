//! Conversions between glam matrices and the device instance transform layout

use crate::core::types::Mat4;

/// Row-major 3x4 identity
pub const IDENTITY_3X4: [f32; 12] = [
    1.0, 0.0, 0.0, 0.0,
    0.0, 1.0, 0.0, 0.0,
    0.0, 0.0, 1.0, 0.0,
];

/// Top three rows of `m` in row-major order.
///
/// The device expects instance transforms as a 3x4 row-major affine matrix,
/// so the translation lands in elements 3, 7 and 11.
pub fn to_row_major_3x4(m: &Mat4) -> [f32; 12] {
    let r0 = m.row(0);
    let r1 = m.row(1);
    let r2 = m.row(2);
    [
        r0.x, r0.y, r0.z, r0.w,
        r1.x, r1.y, r1.z, r1.w,
        r2.x, r2.y, r2.z, r2.w,
    ]
}
