//! Conversion between the engine's atomic units and the potential's units.
//!
//! Internal units are Hartree atomic units (Bohr, Hartree).
//! External units are the potential's native Angstrom / electronvolt system.
//! Every factor used anywhere in the crate lives in this module.

use nalgebra::{Matrix3, Vector3};

// --- Constants ---

/// Bohr radius in Angstrom.
pub const BOHR_IN_ANGSTROM: f64 = 0.529_177_21;
/// Hartree in electronvolt.
pub const HARTREE_IN_EV: f64 = 27.211_386;

/// A family of physical quantities sharing one scalar conversion factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quantity {
    /// Angstrom <-> Bohr
    Length,
    /// eV <-> Hartree
    Energy,
    /// eV/Å <-> Hartree/Bohr
    Force,
    /// eV/Å³ <-> Hartree/Bohr³
    EnergyDensity,
}

impl Quantity {
    /// Number of internal units in one external unit.
    #[inline]
    pub fn factor(self) -> f64 {
        let length = 1.0 / BOHR_IN_ANGSTROM;
        let energy = 1.0 / HARTREE_IN_EV;
        match self {
            Quantity::Length => length,
            Quantity::Energy => energy,
            Quantity::Force => energy / length,
            Quantity::EnergyDensity => energy / (length * length * length),
        }
    }
}

// --- Scalars ---

#[inline]
pub fn to_internal(q: Quantity, value: f64) -> f64 {
    value * q.factor()
}

#[inline]
pub fn to_external(q: Quantity, value: f64) -> f64 {
    value / q.factor()
}

// --- Elementwise helpers ---

pub fn vec_to_internal(q: Quantity, v: &Vector3<f64>) -> Vector3<f64> {
    v * q.factor()
}

pub fn vec_to_external(q: Quantity, v: &Vector3<f64>) -> Vector3<f64> {
    v / q.factor()
}

pub fn mat_to_internal(q: Quantity, m: &Matrix3<f64>) -> Matrix3<f64> {
    m * q.factor()
}

pub fn mat_to_external(q: Quantity, m: &Matrix3<f64>) -> Matrix3<f64> {
    m / q.factor()
}

pub fn slice_to_internal(q: Quantity, values: &[f64]) -> Vec<f64> {
    let f = q.factor();
    values.iter().map(|v| v * f).collect()
}

pub fn slice_to_external(q: Quantity, values: &[f64]) -> Vec<f64> {
    let f = q.factor();
    values.iter().map(|v| v / f).collect()
}
