// q_shared.rs — vector math and small helpers shared by the renderer

// ============================================================
// Basic types
// ============================================================

pub type Vec3 = [f32; 3];

/// Row-major 3x4 affine transform: rotation/scale in the first three
/// columns, translation in the fourth.
pub type Matrix3x4 = [[f32; 4]; 3];

pub const MATRIX3X4_IDENTITY: Matrix3x4 = [
    [1.0, 0.0, 0.0, 0.0],
    [0.0, 1.0, 0.0, 0.0],
    [0.0, 0.0, 1.0, 0.0],
];

// Angle indexes
pub const PITCH: usize = 0; // up / down
pub const YAW: usize = 1; // left / right
pub const ROLL: usize = 2; // fall over

// ============================================================
// Limits
// ============================================================

pub const MAX_LIGHTSTYLES: usize = 256;

// ============================================================
// Plane
// ============================================================

#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[repr(C)]
pub struct CPlane {
    pub normal: Vec3,
    pub dist: f32,
}

impl CPlane {
    pub fn new(normal: Vec3, dist: f32) -> Self {
        Self { normal, dist }
    }

    /// Signed distance from `p` to the plane.
    #[inline]
    pub fn distance(&self, p: &Vec3) -> f32 {
        dot_product(&self.normal, p) - self.dist
    }
}

// ============================================================
// MATHLIB — Vector operations
// ============================================================

#[inline]
pub fn dot_product(a: &Vec3, b: &Vec3) -> f32 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

#[inline]
pub fn vector_subtract(a: &Vec3, b: &Vec3) -> Vec3 {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

/// veca + scale * vecb
pub fn vector_ma(veca: &Vec3, scale: f32, vecb: &Vec3) -> Vec3 {
    [
        veca[0] + scale * vecb[0],
        veca[1] + scale * vecb[1],
        veca[2] + scale * vecb[2],
    ]
}

pub fn vector_length(v: &Vec3) -> f32 {
    (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt()
}

pub fn vector_scale(v: &Vec3, scale: f32) -> Vec3 {
    [v[0] * scale, v[1] * scale, v[2] * scale]
}

/// Largest of the three components.
pub fn vector_max(v: &Vec3) -> f32 {
    v[0].max(v[1]).max(v[2])
}

pub fn vector_is_zero(v: &Vec3) -> bool {
    v[0] == 0.0 && v[1] == 0.0 && v[2] == 0.0
}

// ============================================================
// Matrix operations
// ============================================================

pub fn matrix3x4_transform_point(m: &Matrix3x4, p: &Vec3) -> Vec3 {
    [
        m[0][0] * p[0] + m[0][1] * p[1] + m[0][2] * p[2] + m[0][3],
        m[1][0] * p[0] + m[1][1] * p[1] + m[1][2] * p[2] + m[1][3],
        m[2][0] * p[0] + m[2][1] * p[1] + m[2][2] * p[2] + m[2][3],
    ]
}

/// Apply only the rotation/scale part.
pub fn matrix3x4_rotate_vector(m: &Matrix3x4, v: &Vec3) -> Vec3 {
    [
        m[0][0] * v[0] + m[0][1] * v[1] + m[0][2] * v[2],
        m[1][0] * v[0] + m[1][1] * v[1] + m[1][2] * v[2],
        m[2][0] * v[0] + m[2][1] * v[1] + m[2][2] * v[2],
    ]
}

pub fn matrix3x4_origin(m: &Matrix3x4) -> Vec3 {
    [m[0][3], m[1][3], m[2][3]]
}

// ============================================================
// Angle functions
// ============================================================

/// Returns (forward, right, up) for the given pitch/yaw/roll in degrees.
pub fn angle_vectors(angles: &Vec3) -> (Vec3, Vec3, Vec3) {
    let angle_yaw = angles[YAW].to_radians();
    let sy = angle_yaw.sin();
    let cy = angle_yaw.cos();

    let angle_pitch = angles[PITCH].to_radians();
    let sp = angle_pitch.sin();
    let cp = angle_pitch.cos();

    let angle_roll = angles[ROLL].to_radians();
    let sr = angle_roll.sin();
    let cr = angle_roll.cos();

    let forward = [cp * cy, cp * sy, -sp];
    let right = [
        -sr * sp * cy + -cr * -sy,
        -sr * sp * sy + -cr * cy,
        -sr * cp,
    ];
    let up = [
        cr * sp * cy + -sr * -sy,
        cr * sp * sy + -sr * cy,
        cr * cp,
    ];
    (forward, right, up)
}

// ============================================================
// Tests
// ============================================================
