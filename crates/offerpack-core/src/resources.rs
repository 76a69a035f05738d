//! Multi-dimensional resource accounting.
//!
//! A [`ResourceVector`] is an immutable tuple of scalar capacities. All
//! comparisons are dimension-wise: a usage fits only if it fits in every
//! dimension, and no dimension is ever treated as unconstrained.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Float tolerance applied when comparing dimensions.
///
/// A usage exceeding the remaining capacity by no more than this amount is
/// treated as fitting, and the resulting component is clamped to zero.
pub const RESOURCE_EPSILON: f64 = 1e-6;

/// A resource component that is negative, NaN or infinite.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("resource `{dimension}` must be finite and non-negative, got {value}")]
pub struct InvalidResource {
    pub dimension: &'static str,
    pub value: f64,
}

/// A scalar resource vector: CPU cores, memory, disk and GPUs.
///
/// Deserialization rejects negative and non-finite components.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawResourceVector")]
pub struct ResourceVector {
    pub cpu: f64,
    pub mem_mb: f64,
    pub disk_mb: f64,
    pub gpu: f64,
}

#[derive(Default, Deserialize)]
#[serde(default)]
struct RawResourceVector {
    cpu: f64,
    mem_mb: f64,
    disk_mb: f64,
    gpu: f64,
}

impl TryFrom<RawResourceVector> for ResourceVector {
    type Error = InvalidResource;

    fn try_from(raw: RawResourceVector) -> Result<Self, Self::Error> {
        let v = ResourceVector::new(raw.cpu, raw.mem_mb, raw.disk_mb, raw.gpu);
        v.validate()?;
        Ok(v)
    }
}

const DIMENSIONS: [&str; 4] = ["cpu", "mem_mb", "disk_mb", "gpu"];

fn valid_component(v: f64) -> bool {
    v.is_finite() && v >= 0.0
}

impl ResourceVector {
    pub const ZERO: ResourceVector = ResourceVector {
        cpu: 0.0,
        mem_mb: 0.0,
        disk_mb: 0.0,
        gpu: 0.0,
    };

    pub fn new(cpu: f64, mem_mb: f64, disk_mb: f64, gpu: f64) -> Self {
        Self {
            cpu,
            mem_mb,
            disk_mb,
            gpu,
        }
    }

    /// Shorthand for a CPU + memory vector with no disk or GPU.
    pub fn cpu_mem(cpu: f64, mem_mb: f64) -> Self {
        Self::new(cpu, mem_mb, 0.0, 0.0)
    }

    fn dims(&self) -> [f64; 4] {
        [self.cpu, self.mem_mb, self.disk_mb, self.gpu]
    }

    fn from_dims(d: [f64; 4]) -> Self {
        Self::new(d[0], d[1], d[2], d[3])
    }

    /// First component that is negative or non-finite.
    pub fn validate(&self) -> Result<(), InvalidResource> {
        match DIMENSIONS.iter().zip(self.dims()).find(|(_, v)| !valid_component(*v)) {
            Some((dimension, value)) => Err(InvalidResource {
                dimension: *dimension,
                value,
            }),
            None => Ok(()),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.dims().iter().all(|v| valid_component(*v))
    }

    /// Whether `usage` fits in every dimension of `self`.
    ///
    /// A usage with a negative or non-finite component never fits.
    pub fn contains(&self, usage: &ResourceVector) -> bool {
        self.dims()
            .iter()
            .zip(usage.dims())
            .all(|(have, need)| valid_component(need) && need - have <= RESOURCE_EPSILON)
    }

    /// Subtract `usage` from `self`, or `None` if any dimension is short.
    ///
    /// On success every component of the result is `self[i] - usage[i]`
    /// and never negative.
    pub fn try_subtract(&self, usage: &ResourceVector) -> Option<ResourceVector> {
        if !self.contains(usage) {
            return None;
        }
        let have = self.dims();
        let need = usage.dims();
        let mut out = [0.0; 4];
        for i in 0..4 {
            out[i] = (have[i] - need[i]).max(0.0);
        }
        Some(Self::from_dims(out))
    }

    /// Subtract returning `(new_remaining, ok)`.
    ///
    /// When `ok` is false the returned vector is `self`, unchanged.
    pub fn subtract(&self, usage: &ResourceVector) -> (ResourceVector, bool) {
        match self.try_subtract(usage) {
            Some(rest) => (rest, true),
            None => (*self, false),
        }
    }

    /// Dimension-wise sum.
    pub fn add(&self, other: &ResourceVector) -> ResourceVector {
        let a = self.dims();
        let b = other.dims();
        Self::from_dims([a[0] + b[0], a[1] + b[1], a[2] + b[2], a[3] + b[3]])
    }

    /// Scale every dimension by `n`.
    pub fn times(&self, n: usize) -> ResourceVector {
        let k = n as f64;
        let d = self.dims();
        Self::from_dims([d[0] * k, d[1] * k, d[2] * k, d[3] * k])
    }

    pub fn is_zero(&self) -> bool {
        self.dims().iter().all(|v| v.abs() <= RESOURCE_EPSILON)
    }

    /// Copy with `-0.0` normalized so equal vectors serialize identically.
    pub(crate) fn normalized(&self) -> ResourceVector {
        let d = self.dims();
        Self::from_dims([d[0] + 0.0, d[1] + 0.0, d[2] + 0.0, d[3] + 0.0])
    }
}

impl fmt::Display for ResourceVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cpu={} mem_mb={} disk_mb={} gpu={}",
            self.cpu, self.mem_mb, self.disk_mb, self.gpu
        )
    }
}
