//! Rotation between the stage ("real") frame and the lab frame.
//!
//! The rotation is composed as roll (about Z) · yaw (about Y, `theta`) · pitch
//! (about X), all in degrees. Results are rounded to six decimal places so
//! that demands sent to the controller are stable across platforms.

use serde::{Deserialize, Serialize};

const DECIMAL_PLACES: i32 = 6;

/// A point in either frame, in µm.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Point3 {
    /// Create a point from its three coordinates.
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

impl From<(f64, f64, f64)> for Point3 {
    fn from((x, y, z): (f64, f64, f64)) -> Self {
        Self { x, y, z }
    }
}

/// Angles for a single transform call.
///
/// `theta: None` means "use the transform's stored rotation".
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Orientation {
    pub theta: Option<f64>,
    pub pitch: f64,
    pub roll: f64,
}

impl Orientation {
    /// Pure yaw about Y.
    pub fn yaw(theta: f64) -> Self {
        Self {
            theta: Some(theta),
            ..Default::default()
        }
    }
}

/// Converts coordinates between the stage and lab frames.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CoordinateTransform {
    theta: f64,
}

impl CoordinateTransform {
    /// Create a transform with a stored yaw of `theta` degrees.
    pub fn new(theta: f64) -> Self {
        Self { theta }
    }

    /// Stored yaw in degrees.
    pub fn theta(&self) -> f64 {
        self.theta
    }

    /// Replace the stored yaw.
    pub fn set_theta(&mut self, theta: f64) {
        self.theta = theta;
    }

    /// Stage frame to lab frame using the stored yaw.
    pub fn forward(&self, real: Point3) -> Point3 {
        self.forward_with(real, Orientation::default())
    }

    /// Lab frame to stage frame using the stored yaw.
    pub fn inverse(&self, lab: Point3) -> Point3 {
        self.inverse_with(lab, Orientation::default())
    }

    /// Stage frame to lab frame with explicit angles.
    pub fn forward_with(&self, real: Point3, orientation: Orientation) -> Point3 {
        let m = self.matrix(orientation);
        let v = [real.x, real.y, real.z];
        Point3 {
            x: round(dot(m[0], v)),
            y: round(dot(m[1], v)),
            z: round(dot(m[2], v)),
        }
    }

    /// Lab frame to stage frame with explicit angles.
    pub fn inverse_with(&self, lab: Point3, orientation: Orientation) -> Point3 {
        let m = self.matrix(orientation);
        let v = [lab.x, lab.y, lab.z];
        let column = |c: usize| [m[0][c], m[1][c], m[2][c]];
        Point3 {
            x: round(dot(column(0), v)),
            y: round(dot(column(1), v)),
            z: round(dot(column(2), v)),
        }
    }

    fn matrix(&self, orientation: Orientation) -> [[f64; 3]; 3] {
        let k = orientation.roll.to_radians();
        let p = orientation.theta.unwrap_or(self.theta).to_radians();
        let o = orientation.pitch.to_radians();
        let (sk, ck) = k.sin_cos();
        let (sp, cp) = p.sin_cos();
        let (so, co) = o.sin_cos();

        [
            [ck * cp, ck * sp * so - sk * co, ck * sp * co + sk * so],
            [sk * cp, sk * sp * so + ck * co, sk * sp * co - ck * so],
            [-sp, cp * so, cp * co],
        ]
    }
}

fn dot(a: [f64; 3], b: [f64; 3]) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

fn round(value: f64) -> f64 {
    let scale = 10f64.powi(DECIMAL_PLACES);
    (value * scale).round() / scale
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOLERANCE: f64 = 1e-6 + 1e-9;

    fn assert_close(a: Point3, b: Point3) {
        assert!(
            (a.x - b.x).abs() <= TOLERANCE
                && (a.y - b.y).abs() <= TOLERANCE
                && (a.z - b.z).abs() <= TOLERANCE,
            "{a:?} != {b:?}"
        );
    }

    #[test]
    fn zero_rotation_is_identity() {
        let t = CoordinateTransform::default();
        let p = Point3::new(1.5, -2.25, 3.0);
        assert_eq!(t.forward(p), p);
        assert_eq!(t.inverse(p), p);
    }

    #[test]
    fn quarter_turn_about_y() {
        let t = CoordinateTransform::new(90.0);
        let lab = t.forward(Point3::new(1.0, 0.0, 0.0));
        assert_close(lab, Point3::new(0.0, 0.0, -1.0));
        // Y is the rotation axis
        assert_close(t.forward(Point3::new(0.0, 2.0, 0.0)), Point3::new(0.0, 2.0, 0.0));
    }

    #[test]
    fn explicit_theta_overrides_stored_value() {
        let t = CoordinateTransform::new(45.0);
        let p = Point3::new(3.0, 1.0, -7.0);
        assert_eq!(t.forward_with(p, Orientation::yaw(0.0)), p);
    }

    #[test]
    fn inverse_undoes_forward_for_all_angles() {
        let points = [
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(150.0, 150.0, 150.0),
            Point3::new(-12.345678, 0.5, 299.999999),
            Point3::new(1.0, -1.0, 0.25),
        ];
        let t = CoordinateTransform::default();
        for theta in (-360..=360).step_by(15) {
            for pitch in [0.0, 10.0, -33.0] {
                for roll in [0.0, 5.0, 170.0] {
                    let o = Orientation {
                        theta: Some(f64::from(theta)),
                        pitch,
                        roll,
                    };
                    for p in points {
                        assert_close(t.inverse_with(t.forward_with(p, o), o), p);
                    }
                }
            }
        }
    }

    #[test]
    fn results_are_rounded_to_six_places() {
        let t = CoordinateTransform::new(30.0);
        let lab = t.forward(Point3::new(1.0, 0.0, 0.0));
        assert_eq!(lab.x, 0.866025);
        assert_eq!(lab.z, -0.5);
    }

    #[test]
    fn set_theta_changes_default_rotation() {
        let mut t = CoordinateTransform::default();
        t.set_theta(180.0);
        assert_eq!(t.theta(), 180.0);
        assert_close(t.forward(Point3::new(2.0, 0.0, 0.0)), Point3::new(-2.0, 0.0, 0.0));
    }
}
