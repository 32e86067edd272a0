//! Common Types for the sidelink stack
//!
//! Defines fundamental types used throughout the simulated protocol stack

use serde::{Deserialize, Serialize};
use num_derive::{FromPrimitive, ToPrimitive};
use std::fmt;
use std::ops::{Add, Mul, Sub};

/// Radio Network Temporary Identifier (RNTI)
///
/// Each sidelink device carries one RNTI, used both as the MAC address of
/// transport blocks and as the beamforming target key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Rnti(pub u16);

impl Rnti {
    /// Create a new RNTI
    pub fn new(value: u16) -> Self {
        Self(value)
    }

    /// Get the RNTI value
    pub fn value(&self) -> u16 {
        self.0
    }
}

impl fmt::Display for Rnti {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Index of a node (device + mobility) inside a simulation session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node{}", self.0)
    }
}

/// Subcarrier spacing values in kHz
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive, Serialize, Deserialize)]
pub enum SubcarrierSpacing {
    /// 15 kHz
    Scs15 = 15,
    /// 30 kHz
    Scs30 = 30,
    /// 60 kHz
    Scs60 = 60,
    /// 120 kHz
    Scs120 = 120,
    /// 240 kHz
    Scs240 = 240,
    /// 480 kHz
    Scs480 = 480,
}

impl SubcarrierSpacing {
    /// Highest numerology index supported by the frame structure
    pub const MAX_NUMEROLOGY: u8 = 5;

    /// Map a numerology index (0-5) to its subcarrier spacing
    pub fn from_numerology(numerology: u8) -> Option<Self> {
        if numerology > Self::MAX_NUMEROLOGY {
            return None;
        }
        num_traits::FromPrimitive::from_u32(15u32 << numerology)
    }

    /// Subcarrier spacing in Hz
    pub fn as_hz(&self) -> f64 {
        (*self as u32) as f64 * 1_000.0
    }
}

/// Timing cursor: frame, subframe and slot counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SfnSf {
    pub frame: u32,
    pub subframe: u8,
    pub slot: u8,
}

impl SfnSf {
    pub fn new(frame: u32, subframe: u8, slot: u8) -> Self {
        Self { frame, subframe, slot }
    }

    /// Advance by one slot, wrapping slot into subframe and subframe into frame
    pub fn advance(&mut self, slots_per_subframe: u8, subframes_per_frame: u8) {
        self.slot += 1;
        if self.slot >= slots_per_subframe {
            self.slot = 0;
            self.subframe += 1;
            if self.subframe >= subframes_per_frame {
                self.subframe = 0;
                self.frame = self.frame.wrapping_add(1);
            }
        }
    }
}

impl fmt::Display for SfnSf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.frame, self.subframe, self.slot)
    }
}

/// Cartesian vector in meters (positions) or meters per second (velocities)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vector3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vector3 {
    pub const ZERO: Self = Self { x: 0.0, y: 0.0, z: 0.0 };

    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn dot(&self, other: &Vector3) -> f64 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    pub fn norm(&self) -> f64 {
        self.dot(self).sqrt()
    }

    /// Horizontal (x-y plane) length
    pub fn norm_2d(&self) -> f64 {
        (self.x * self.x + self.y * self.y).sqrt()
    }

    pub fn distance(&self, other: &Vector3) -> f64 {
        (*other - *self).norm()
    }

    /// Unit vector pointing along spherical angles, both in radians
    /// (`zenith` measured from +z, `azimuth` from +x)
    pub fn from_spherical(azimuth: f64, zenith: f64) -> Self {
        Self {
            x: zenith.sin() * azimuth.cos(),
            y: zenith.sin() * azimuth.sin(),
            z: zenith.cos(),
        }
    }
}

impl Add for Vector3 {
    type Output = Vector3;
    fn add(self, rhs: Vector3) -> Vector3 {
        Vector3::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for Vector3 {
    type Output = Vector3;
    fn sub(self, rhs: Vector3) -> Vector3 {
        Vector3::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Mul<f64> for Vector3 {
    type Output = Vector3;
    fn mul(self, rhs: f64) -> Vector3 {
        Vector3::new(self.x * rhs, self.y * rhs, self.z * rhs)
    }
}
