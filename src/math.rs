use nalgebra::Vector3;

/// Signed angle in radians between two forward vectors, projected onto the
/// ground plane. Positive when `b` lies counter-clockwise of `a`.
pub fn yaw_diff(a: &Vector3<f32>, b: &Vector3<f32>) -> f32 {
    let na = a.norm();
    let nb = b.norm();
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    let cos = (a.dot(b) / (na * nb)).clamp(-1.0, 1.0);
    let theta = cos.acos();
    if a.cross(b).z < 0.0 {
        -theta
    } else {
        theta
    }
}

/// Speed from a velocity vector, in m/s, or km/h when `kmh` is set.
pub fn speed(velocity: &Vector3<f32>, kmh: bool) -> f32 {
    let v = velocity.norm();
    if kmh {
        v * 3.6
    } else {
        v
    }
}

/// Sign of `v` as ±1.0. Zero maps to +1.0.
pub fn sign(v: f32) -> f32 {
    if v < 0.0 {
        -1.0
    } else {
        1.0
    }
}
