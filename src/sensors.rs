//! Raw movement-sensor payloads to calibrated samples.
//!
//! The tag's movement service reports little-endian signed 16-bit triples,
//! either one notification per modality (6 bytes) or a combined frame of
//! nine values ordered gyro, accel, mag (18 bytes). Each modality has a
//! fixed decoder slot; the latest decoded value overwrites the previous one.

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

use crate::error::SensorError;
use crate::types::{Modality, SensorSample, Vec3};

/// Gyroscope: raw → deg/s.
pub const GYRO_SCALE: f64 = 500.0 / 65536.0;
/// Accelerometer: raw → g.
pub const ACCEL_SCALE: f64 = 8.0 / 32768.0;
/// Magnetometer: raw → µT (MPU-9250 register map v1.4).
pub const MAG_SCALE: f64 = 4912.0 / 32760.0;

pub const TRIPLE_LEN: usize = 6;
pub const MOVEMENT_FRAME_LEN: usize = 3 * TRIPLE_LEN;

/// A single hardware notification as delivered by the transport.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Notification {
    /// One 6-byte triple for one modality.
    Triple { modality: Modality, payload: Vec<u8> },
    /// Combined 18-byte movement frame.
    MovementFrame { payload: Vec<u8> },
}

impl Notification {
    pub fn triple(modality: Modality, raw: [i16; 3]) -> Self {
        Notification::Triple {
            modality,
            payload: encode_triple(raw).to_vec(),
        }
    }

    pub fn movement_frame(gyro: [i16; 3], accel: [i16; 3], mag: [i16; 3]) -> Self {
        let mut payload = Vec::with_capacity(MOVEMENT_FRAME_LEN);
        for raw in [gyro, accel, mag] {
            payload.extend_from_slice(&encode_triple(raw));
        }
        Notification::MovementFrame { payload }
    }
}

/// Decode one little-endian i16 triple. The payload must be exactly 6 bytes.
pub fn decode_triple(modality: Modality, payload: &[u8]) -> Result<[i16; 3], SensorError> {
    if payload.len() != TRIPLE_LEN {
        return Err(SensorError::PayloadLength {
            modality,
            expected: TRIPLE_LEN,
            actual: payload.len(),
        });
    }
    Ok([
        i16::from_le_bytes([payload[0], payload[1]]),
        i16::from_le_bytes([payload[2], payload[3]]),
        i16::from_le_bytes([payload[4], payload[5]]),
    ])
}

pub fn encode_triple(raw: [i16; 3]) -> [u8; TRIPLE_LEN] {
    let mut out = [0u8; TRIPLE_LEN];
    for (chunk, value) in out.chunks_exact_mut(2).zip(raw.iter()) {
        chunk.copy_from_slice(&value.to_le_bytes());
    }
    out
}

/// Scale a raw triple into the unit the fusion engine expects.
pub fn calibrate(modality: Modality, raw: [i16; 3]) -> Vec3 {
    let [x, y, z] = raw.map(f64::from);
    let v = Vec3::new(x, y, z);
    match modality {
        Modality::Gyroscope => v.scale(GYRO_SCALE).scale(PI / 180.0),
        Modality::Accelerometer => v.scale(ACCEL_SCALE),
        Modality::Magnetometer => v.scale(MAG_SCALE),
    }
}

/// Split and calibrate an 18-byte movement frame.
pub fn decode_movement_frame(payload: &[u8]) -> Result<[SensorSample; 3], SensorError> {
    if payload.len() != MOVEMENT_FRAME_LEN {
        return Err(SensorError::FrameLength {
            expected: MOVEMENT_FRAME_LEN,
            actual: payload.len(),
        });
    }
    let mut samples = [SensorSample {
        modality: Modality::Gyroscope,
        value: Vec3::ZERO,
    }; 3];
    for ((slot, modality), chunk) in samples
        .iter_mut()
        .zip(Modality::ALL)
        .zip(payload.chunks_exact(TRIPLE_LEN))
    {
        let raw = decode_triple(modality, chunk)?;
        *slot = SensorSample {
            modality,
            value: calibrate(modality, raw),
        };
    }
    Ok(samples)
}

/// Latest value for one modality.
#[derive(Clone, Copy, Debug)]
struct ModalitySlot {
    modality: Modality,
    latest: Vec3,
    updates: u64,
}

impl ModalitySlot {
    fn new(modality: Modality) -> Self {
        Self {
            modality,
            latest: Vec3::ZERO,
            updates: 0,
        }
    }

    fn decode(&mut self, payload: &[u8]) -> Result<(), SensorError> {
        let raw = decode_triple(self.modality, payload)?;
        self.store(calibrate(self.modality, raw));
        Ok(())
    }

    fn store(&mut self, value: Vec3) {
        self.latest = value;
        self.updates += 1;
    }
}

/// Per-tag sensor stream: one statically wired slot per modality,
/// freshest value wins.
#[derive(Clone, Debug)]
pub struct SensorStream {
    gyro: ModalitySlot,
    accel: ModalitySlot,
    mag: ModalitySlot,
    rejected: u64,
}

impl SensorStream {
    pub fn new() -> Self {
        Self {
            gyro: ModalitySlot::new(Modality::Gyroscope),
            accel: ModalitySlot::new(Modality::Accelerometer),
            mag: ModalitySlot::new(Modality::Magnetometer),
            rejected: 0,
        }
    }

    fn slot_mut(&mut self, modality: Modality) -> &mut ModalitySlot {
        match modality {
            Modality::Gyroscope => &mut self.gyro,
            Modality::Accelerometer => &mut self.accel,
            Modality::Magnetometer => &mut self.mag,
        }
    }

    fn slot(&self, modality: Modality) -> &ModalitySlot {
        match modality {
            Modality::Gyroscope => &self.gyro,
            Modality::Accelerometer => &self.accel,
            Modality::Magnetometer => &self.mag,
        }
    }

    /// Apply a notification. Malformed payloads are counted and returned as
    /// errors; the previously stored samples stay untouched.
    pub fn apply(&mut self, notification: &Notification) -> Result<(), SensorError> {
        let result = match notification {
            Notification::Triple { modality, payload } => self.slot_mut(*modality).decode(payload),
            Notification::MovementFrame { payload } => {
                decode_movement_frame(payload).map(|samples| {
                    for sample in samples {
                        self.store(sample);
                    }
                })
            }
        };
        if result.is_err() {
            self.rejected += 1;
        }
        result
    }

    pub fn store(&mut self, sample: SensorSample) {
        self.slot_mut(sample.modality).store(sample.value);
    }

    pub fn latest(&self, modality: Modality) -> Vec3 {
        self.slot(modality).latest
    }

    /// `(gyro rad/s, accel g, mag µT)` as currently held.
    pub fn triple(&self) -> (Vec3, Vec3, Vec3) {
        (self.gyro.latest, self.accel.latest, self.mag.latest)
    }

    pub fn updates(&self, modality: Modality) -> u64 {
        self.slot(modality).updates
    }

    pub fn rejected(&self) -> u64 {
        self.rejected
    }
}

impl Default for SensorStream {
    fn default() -> Self {
        Self::new()
    }
}

/// Accelerometer range selection bits of the movement control word.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccelRange {
    G2,
    G4,
    G8,
    G16,
}

/// Movement-service configuration the transport writes before subscribing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementConfig {
    pub gyro: bool,
    pub accel: bool,
    pub mag: bool,
    pub accel_range: AccelRange,
    /// Notification period in 10 ms units.
    pub period_10ms: u8,
}

impl MovementConfig {
    pub const GYRO_XYZ: u16 = 0b111;
    pub const ACCEL_XYZ: u16 = 0b111 << 3;
    pub const MAG_XYZ: u16 = 1 << 6;

    pub fn control_bits(&self) -> u16 {
        let mut bits = 0;
        if self.gyro {
            bits |= Self::GYRO_XYZ;
        }
        if self.accel {
            bits |= Self::ACCEL_XYZ;
        }
        if self.mag {
            bits |= Self::MAG_XYZ;
        }
        let range: u16 = match self.accel_range {
            AccelRange::G2 => 0,
            AccelRange::G4 => 1,
            AccelRange::G8 => 2,
            AccelRange::G16 => 3,
        };
        bits | (range << 8)
    }

    pub fn control_payload(&self) -> [u8; 2] {
        self.control_bits().to_le_bytes()
    }

    pub fn period_payload(&self) -> [u8; 2] {
        u16::from(self.period_10ms).to_le_bytes()
    }
}

impl Default for MovementConfig {
    fn default() -> Self {
        Self {
            gyro: true,
            accel: true,
            mag: true,
            accel_range: AccelRange::G4,
            period_10ms: 0x0A,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_decode_little_endian() {
        let raw = decode_triple(Modality::Gyroscope, &[0x01, 0x00, 0xff, 0xff, 0x00, 0x80]).unwrap();
        assert_eq!(raw, [1, -1, i16::MIN]);
        assert_eq!(encode_triple(raw), [0x01, 0x00, 0xff, 0xff, 0x00, 0x80]);
    }

    #[test]
    fn test_short_payload_rejected() {
        let err = decode_triple(Modality::Magnetometer, &[0, 1, 2, 3]).unwrap_err();
        assert_eq!(
            err,
            SensorError::PayloadLength { modality: Modality::Magnetometer, expected: 6, actual: 4 }
        );
        assert!(decode_movement_frame(&[0u8; 17]).is_err());
    }

    #[test]
    fn test_scale_factors() {
        let accel = calibrate(Modality::Accelerometer, [4096, -4096, 0]);
        assert_eq!(accel, Vec3::new(1.0, -1.0, 0.0));

        let mag = calibrate(Modality::Magnetometer, [32760, 0, -100]);
        assert_relative_eq!(mag.x, 4912.0, epsilon = 1e-9);
        assert_relative_eq!(mag.z, -100.0 * 4912.0 / 32760.0, epsilon = 1e-12);

        // 131.072 raw per deg/s
        let gyro = calibrate(Modality::Gyroscope, [13107, 0, 0]);
        assert_relative_eq!(gyro.x, 13107.0 * 500.0 / 65536.0 * PI / 180.0, epsilon = 1e-12);
        assert_relative_eq!(gyro.x.to_degrees(), 99.9985, epsilon = 1e-3);
    }

    #[test]
    fn test_movement_frame_split() {
        let n = Notification::movement_frame([131, 0, 0], [0, 0, 4096], [100, 200, 300]);
        let Notification::MovementFrame { payload } = &n else {
            panic!("expected movement frame");
        };
        let samples = decode_movement_frame(payload).unwrap();
        assert_eq!(samples[0].modality, Modality::Gyroscope);
        assert_eq!(samples[1].value, Vec3::new(0.0, 0.0, 1.0));
        assert_eq!(samples[2].modality, Modality::Magnetometer);
        assert_relative_eq!(samples[2].value.y, 200.0 * MAG_SCALE, epsilon = 1e-12);
    }

    #[test]
    fn test_stream_overwrites_latest() {
        let mut stream = SensorStream::new();
        assert!(stream.latest(Modality::Accelerometer).is_unpopulated());

        stream.apply(&Notification::triple(Modality::Accelerometer, [4096, 0, 0])).unwrap();
        stream.apply(&Notification::triple(Modality::Accelerometer, [0, 0, 4096])).unwrap();

        assert_eq!(stream.latest(Modality::Accelerometer), Vec3::new(0.0, 0.0, 1.0));
        assert_eq!(stream.updates(Modality::Accelerometer), 2);
        assert!(stream.latest(Modality::Gyroscope).is_unpopulated());
    }

    #[test]
    fn test_stream_keeps_previous_on_malformed() {
        let mut stream = SensorStream::new();
        stream.apply(&Notification::triple(Modality::Magnetometer, [10, 20, 30])).unwrap();
        let before = stream.latest(Modality::Magnetometer);

        let bad = Notification::Triple { modality: Modality::Magnetometer, payload: vec![1, 2, 3] };
        assert!(stream.apply(&bad).is_err());
        assert!(stream.apply(&Notification::MovementFrame { payload: vec![0; 6] }).is_err());

        assert_eq!(stream.latest(Modality::Magnetometer), before);
        assert_eq!(stream.rejected(), 2);
    }

    #[test]
    fn test_movement_frame_updates_all_slots() {
        let mut stream = SensorStream::new();
        stream.apply(&Notification::movement_frame([1, 2, 3], [4, 5, 6], [7, 8, 9])).unwrap();
        for modality in Modality::ALL {
            assert_eq!(stream.updates(modality), 1);
            assert!(!stream.latest(modality).is_unpopulated());
        }
    }

    #[test]
    fn test_movement_config_bits() {
        let config = MovementConfig::default();
        assert_eq!(config.control_bits(), 0b111 | (0b111 << 3) | (1 << 6) | (1 << 8));
        assert_eq!(config.control_payload(), [0x7f, 0x01]);
        assert_eq!(config.period_payload(), [0x0a, 0x00]);

        let gyro_only = MovementConfig {
            accel: false,
            mag: false,
            accel_range: AccelRange::G2,
            ..MovementConfig::default()
        };
        assert_eq!(gyro_only.control_bits(), 0b111);
    }
}
