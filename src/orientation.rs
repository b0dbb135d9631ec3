//! Quaternion → Euler conversion (ZYX, aerospace convention).

use nalgebra::UnitQuaternion;
use serde::{Deserialize, Serialize};

use crate::types::Quaternion;

/// Roll, pitch and yaw in radians.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EulerAngles {
    pub roll: f64,
    pub pitch: f64,
    pub yaw: f64,
}

impl EulerAngles {
    pub fn to_degrees(self) -> EulerAngles {
        EulerAngles {
            roll: self.roll.to_degrees(),
            pitch: self.pitch.to_degrees(),
            yaw: self.yaw.to_degrees(),
        }
    }
}

pub fn euler_from_quaternion(q: &Quaternion) -> EulerAngles {
    let Quaternion { w, x, y, z } = *q;

    let roll = (2.0 * (w * x + y * z)).atan2(1.0 - 2.0 * (x * x + y * y));
    // Clamp: rounding can push the argument just past ±1 near gimbal lock
    let pitch = (2.0 * (w * y - z * x)).clamp(-1.0, 1.0).asin();
    let yaw = (2.0 * (w * z + x * y)).atan2(1.0 - 2.0 * (y * y + z * z));

    EulerAngles { roll, pitch, yaw }
}

pub fn quaternion_from_euler(roll: f64, pitch: f64, yaw: f64) -> Quaternion {
    UnitQuaternion::from_euler_angles(roll, pitch, yaw).into()
}

/// Yaw in degrees, rounded to two decimals. Range (-180, 180].
pub fn yaw_degrees(q: &Quaternion) -> f64 {
    round_centi(euler_from_quaternion(q).yaw.to_degrees())
}

fn round_centi(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Legacy warm-up heuristic: a tag whose filter has not moved decodes to
/// exactly 0.00°. A genuinely north-facing tag decodes the same way, so
/// this is kept for diagnostics only.
pub fn is_warm_up_yaw(yaw_degrees: f64) -> bool {
    yaw_degrees == 0.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_identity_is_zero() {
        let e = euler_from_quaternion(&Quaternion::IDENTITY);
        assert_eq!(e, EulerAngles::default());
        assert_eq!(yaw_degrees(&Quaternion::IDENTITY), 0.0);
        assert!(is_warm_up_yaw(yaw_degrees(&Quaternion::IDENTITY)));
    }

    #[test]
    fn test_pure_yaw() {
        let half = 45f64.to_radians() / 2.0;
        let q = Quaternion::new(half.cos(), 0.0, 0.0, half.sin());
        assert_eq!(yaw_degrees(&q), 45.0);

        let q = Quaternion::new(half.cos(), 0.0, 0.0, -half.sin());
        assert_eq!(yaw_degrees(&q), -45.0);
    }

    #[test]
    fn test_round_trip_within_hundredth_degree() {
        let mut angles = Vec::new();
        for roll in [-170.0, -90.0, -12.5, 0.0, 33.3, 120.0, 179.0] {
            for pitch in [-88.9, -45.0, -1.0, 0.0, 10.0, 60.0, 88.9] {
                for yaw in [-179.0, -100.0, -0.5, 0.0, 42.42, 135.0, 179.9] {
                    angles.push((roll, pitch, yaw));
                }
            }
        }

        for (roll, pitch, yaw) in angles {
            let q = quaternion_from_euler(
                f64::to_radians(roll),
                f64::to_radians(pitch),
                f64::to_radians(yaw),
            );
            assert_relative_eq!(q.norm(), 1.0, epsilon = 1e-12);

            let e = euler_from_quaternion(&q).to_degrees();
            assert!((e.roll - roll).abs() < 0.01, "roll {roll} -> {}", e.roll);
            assert!((e.pitch - pitch).abs() < 0.01, "pitch {pitch} -> {}", e.pitch);
            assert!((e.yaw - yaw).abs() < 0.01, "yaw {yaw} -> {}", e.yaw);
        }
    }

    #[test]
    fn test_pitch_clamped_at_gimbal_lock() {
        // Slightly over-unit input must not produce NaN
        let s = std::f64::consts::FRAC_1_SQRT_2 + 1e-12;
        let q = Quaternion::new(s, 0.0, s, 0.0);
        let e = euler_from_quaternion(&q);
        assert!(e.pitch.is_finite());
        assert_relative_eq!(e.pitch, std::f64::consts::FRAC_PI_2, epsilon = 1e-5);
    }

    #[test]
    fn test_yaw_rounded_to_two_decimals() {
        let q = quaternion_from_euler(0.0, 0.0, 12.345678f64.to_radians());
        assert_eq!(yaw_degrees(&q), 12.35);
    }
}
