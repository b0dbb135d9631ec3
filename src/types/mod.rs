pub mod quaternion;
pub mod tick;

pub use quaternion::*;
pub use tick::*;

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Identifier of a wearable tag (typically its BLE address).
pub type TagId = String;

/// 3-axis reading in physical units.
///
/// An all-zero value is the placeholder held before the first hardware
/// sample arrives; it cannot be told apart from a genuine zero reading.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3 { x: 0.0, y: 0.0, z: 0.0 };

    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn norm(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    pub fn is_unpopulated(&self) -> bool {
        self.x == 0.0 && self.y == 0.0 && self.z == 0.0
    }

    pub fn scale(self, factor: f64) -> Self {
        Self {
            x: self.x * factor,
            y: self.y * factor,
            z: self.z * factor,
        }
    }
}

/// Sensor modality carried by a movement notification.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    Gyroscope,
    Accelerometer,
    Magnetometer,
}

impl Modality {
    /// Order of the triples inside a combined movement frame.
    pub const ALL: [Modality; 3] = [
        Modality::Gyroscope,
        Modality::Accelerometer,
        Modality::Magnetometer,
    ];
}

impl Display for Modality {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            Modality::Gyroscope => write!(f, "gyroscope"),
            Modality::Accelerometer => write!(f, "accelerometer"),
            Modality::Magnetometer => write!(f, "magnetometer"),
        }
    }
}

/// Calibrated reading for one modality.
///
/// Units: gyroscope rad/s, accelerometer g, magnetometer µT.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SensorSample {
    pub modality: Modality,
    pub value: Vec3,
}
