//! Attitude quaternion shared by the filter and the extractor.

use nalgebra::UnitQuaternion;
use serde::{Deserialize, Serialize};

/// Quaternion `(w, x, y, z)`.
///
/// The fusion engine keeps it unit-norm after every mutation; values built
/// elsewhere are normalised through [`Quaternion::normalized`].
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Quaternion {
    pub w: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Quaternion {
    pub const IDENTITY: Quaternion = Quaternion {
        w: 1.0,
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub fn new(w: f64, x: f64, y: f64, z: f64) -> Self {
        Self { w, x, y, z }
    }

    pub fn norm(&self) -> f64 {
        (self.w * self.w + self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    /// Unit-length copy. A zero quaternion falls back to identity.
    pub fn normalized(&self) -> Self {
        let norm = self.norm();
        if norm == 0.0 || !norm.is_finite() {
            return Self::IDENTITY;
        }
        let recip = 1.0 / norm;
        Self {
            w: self.w * recip,
            x: self.x * recip,
            y: self.y * recip,
            z: self.z * recip,
        }
    }

    pub fn is_identity(&self) -> bool {
        *self == Self::IDENTITY
    }
}

impl Default for Quaternion {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl From<UnitQuaternion<f64>> for Quaternion {
    fn from(q: UnitQuaternion<f64>) -> Self {
        // nalgebra stores coords as [i, j, k, w]
        let c = q.into_inner().coords;
        Quaternion {
            w: c[3],
            x: c[0],
            y: c[1],
            z: c[2],
        }
    }
}

impl From<Quaternion> for UnitQuaternion<f64> {
    fn from(q: Quaternion) -> Self {
        UnitQuaternion::from_quaternion(nalgebra::Quaternion::new(q.w, q.x, q.y, q.z))
    }
}
