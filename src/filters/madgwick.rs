/// Madgwick gradient-descent AHRS filter
///
/// State: unit quaternion (w, x, y, z), identity at start.
///
/// Each update integrates the gyroscope rate and applies one normalised
/// steepest-descent step that pulls the estimate toward the measured gravity
/// and magnetic-field directions. `beta` weighs that correction against the
/// gyro integration.
use serde::{Deserialize, Serialize};

use crate::types::{Quaternion, Vec3};

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MadgwickConfig {
    /// Seconds between updates.
    pub sample_period: f64,
    /// Correction gain.
    pub beta: f64,
}

impl Default for MadgwickConfig {
    fn default() -> Self {
        Self {
            sample_period: 0.1,
            beta: 3.0,
        }
    }
}

pub struct FusionEngine {
    q: Quaternion,
    sample_period: f64,
    beta: f64,
    fused_updates: u64,
    skipped_updates: u64,
}

impl FusionEngine {
    pub fn new(sample_period: f64, beta: f64) -> Self {
        Self {
            q: Quaternion::IDENTITY,
            sample_period,
            beta,
            fused_updates: 0,
            skipped_updates: 0,
        }
    }

    pub fn from_config(config: &MadgwickConfig) -> Self {
        Self::new(config.sample_period, config.beta)
    }

    pub fn quaternion(&self) -> Quaternion {
        self.q
    }

    pub fn sample_period(&self) -> f64 {
        self.sample_period
    }

    pub fn beta(&self) -> f64 {
        self.beta
    }

    /// Updates that changed the estimate.
    pub fn fused_updates(&self) -> u64 {
        self.fused_updates
    }

    /// Updates absorbed by the degenerate-input guard.
    pub fn skipped_updates(&self) -> u64 {
        self.skipped_updates
    }

    pub fn reset(&mut self) {
        self.q = Quaternion::IDENTITY;
        self.fused_updates = 0;
        self.skipped_updates = 0;
    }

    pub fn update_vectors(&mut self, gyro: Vec3, accel: Vec3, mag: Vec3) {
        self.update(
            gyro.x, gyro.y, gyro.z, accel.x, accel.y, accel.z, mag.x, mag.y, mag.z,
        );
    }

    /// One filter step.
    ///
    /// Gyroscope in rad/s; accelerometer and magnetometer in any calibrated
    /// units. A zero-norm accelerometer or magnetometer vector, or any
    /// non-finite reading, leaves the estimate untouched.
    #[allow(clippy::too_many_arguments)]
    pub fn update(
        &mut self,
        gx: f64,
        gy: f64,
        gz: f64,
        ax: f64,
        ay: f64,
        az: f64,
        mx: f64,
        my: f64,
        mz: f64,
    ) {
        let Quaternion {
            w: q1,
            x: q2,
            y: q3,
            z: q4,
        } = self.q;

        if !(gx.is_finite() && gy.is_finite() && gz.is_finite()) {
            self.skipped_updates += 1;
            return;
        }

        // Normalise accelerometer measurement
        let norm = (ax * ax + ay * ay + az * az).sqrt();
        if norm == 0.0 || !norm.is_finite() {
            self.skipped_updates += 1;
            return;
        }
        let recip = 1.0 / norm;
        let (ax, ay, az) = (ax * recip, ay * recip, az * recip);

        // Normalise magnetometer measurement
        let norm = (mx * mx + my * my + mz * mz).sqrt();
        if norm == 0.0 || !norm.is_finite() {
            self.skipped_updates += 1;
            return;
        }
        let recip = 1.0 / norm;
        let (mx, my, mz) = (mx * recip, my * recip, mz * recip);

        // Auxiliary variables to avoid repeated arithmetic
        let two_q1 = 2.0 * q1;
        let two_q2 = 2.0 * q2;
        let two_q3 = 2.0 * q3;
        let two_q4 = 2.0 * q4;
        let two_q1q3 = 2.0 * q1 * q3;
        let two_q3q4 = 2.0 * q3 * q4;
        let q1q1 = q1 * q1;
        let q1q2 = q1 * q2;
        let q1q3 = q1 * q3;
        let q1q4 = q1 * q4;
        let q2q2 = q2 * q2;
        let q2q3 = q2 * q3;
        let q2q4 = q2 * q4;
        let q3q3 = q3 * q3;
        let q3q4 = q3 * q4;
        let q4q4 = q4 * q4;

        // Reference direction of Earth's magnetic field
        let two_q1mx = 2.0 * q1 * mx;
        let two_q1my = 2.0 * q1 * my;
        let two_q1mz = 2.0 * q1 * mz;
        let two_q2mx = 2.0 * q2 * mx;
        let hx = mx * q1q1 - two_q1my * q4 + two_q1mz * q3 + mx * q2q2 + two_q2 * my * q3
            + two_q2 * mz * q4
            - mx * q3q3
            - mx * q4q4;
        let hy = two_q1mx * q4 + my * q1q1 - two_q1mz * q2 + two_q2mx * q3 - my * q2q2 + my * q3q3
            + two_q3 * mz * q4
            - my * q4q4;
        let two_bx = (hx * hx + hy * hy).sqrt();
        let two_bz = -two_q1mx * q3 + two_q1my * q2 + mz * q1q1 + two_q2mx * q4 - mz * q2q2
            + two_q3 * my * q4
            - mz * q3q3
            + mz * q4q4;
        let four_bx = 2.0 * two_bx;
        let four_bz = 2.0 * two_bz;

        // Objective-function residuals (predicted minus measured)
        let f_ax = 2.0 * q2q4 - two_q1q3 - ax;
        let f_ay = 2.0 * q1q2 + two_q3q4 - ay;
        let f_az = 1.0 - 2.0 * q2q2 - 2.0 * q3q3 - az;
        let f_mx = two_bx * (0.5 - q3q3 - q4q4) + two_bz * (q2q4 - q1q3) - mx;
        let f_my = two_bx * (q2q3 - q1q4) + two_bz * (q1q2 + q3q4) - my;
        let f_mz = two_bx * (q1q3 + q2q4) + two_bz * (0.5 - q2q2 - q3q3) - mz;

        // Gradient descent corrective step
        let s1 = -two_q3 * f_ax + two_q2 * f_ay - two_bz * q3 * f_mx
            + (-two_bx * q4 + two_bz * q2) * f_my
            + two_bx * q3 * f_mz;
        let s2 = two_q4 * f_ax + two_q1 * f_ay - 4.0 * q2 * f_az
            + two_bz * q4 * f_mx
            + (two_bx * q3 + two_bz * q1) * f_my
            + (two_bx * q4 - four_bz * q2) * f_mz;
        let s3 = -two_q1 * f_ax + two_q4 * f_ay - 4.0 * q3 * f_az
            + (-four_bx * q3 - two_bz * q1) * f_mx
            + (two_bx * q2 + two_bz * q4) * f_my
            + (two_bx * q1 - four_bz * q3) * f_mz;
        let s4 = two_q2 * f_ax + two_q3 * f_ay
            + (-four_bx * q4 + two_bz * q2) * f_mx
            + (-two_bx * q1 + two_bz * q3) * f_my
            + two_bx * q2 * f_mz;

        // Normalise step magnitude; an exactly aligned estimate has no step
        let norm = (s1 * s1 + s2 * s2 + s3 * s3 + s4 * s4).sqrt();
        let (s1, s2, s3, s4) = if norm > 0.0 {
            let recip = 1.0 / norm;
            (s1 * recip, s2 * recip, s3 * recip, s4 * recip)
        } else {
            (0.0, 0.0, 0.0, 0.0)
        };

        // Rate of change of quaternion: 0.5 * q ⊗ (0, g) - beta * step
        let q_dot1 = 0.5 * (-q2 * gx - q3 * gy - q4 * gz) - self.beta * s1;
        let q_dot2 = 0.5 * (q1 * gx + q3 * gz - q4 * gy) - self.beta * s2;
        let q_dot3 = 0.5 * (q1 * gy - q2 * gz + q4 * gx) - self.beta * s3;
        let q_dot4 = 0.5 * (q1 * gz + q2 * gy - q3 * gx) - self.beta * s4;

        // Integrate to yield quaternion
        let q1 = q1 + q_dot1 * self.sample_period;
        let q2 = q2 + q_dot2 * self.sample_period;
        let q3 = q3 + q_dot3 * self.sample_period;
        let q4 = q4 + q_dot4 * self.sample_period;

        let recip = 1.0 / (q1 * q1 + q2 * q2 + q3 * q3 + q4 * q4).sqrt();
        self.q = Quaternion {
            w: q1 * recip,
            x: q2 * recip,
            y: q3 * recip,
            z: q4 * recip,
        };
        self.fused_updates += 1;
    }
}
