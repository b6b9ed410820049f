use nalgebra::{Matrix3, Point3, Vector3};
use serde::{Deserialize, Serialize};

use crate::error::{DriverError, DriverResult};

// --- Physics Types ---

/// A single atom of the template. The symbol is fixed for the driver's lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Atom {
    pub symbol: String,
    pub position: Point3<f64>, // Å
}

/// Periodic cell in the potential's convention.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lattice {
    pub vectors: Matrix3<f64>, // Rows are a, b, c (Å)
}

impl Lattice {
    pub fn from_rows(a: Vector3<f64>, b: Vector3<f64>, c: Vector3<f64>) -> Self {
        Self {
            vectors: Matrix3::from_rows(&[a.transpose(), b.transpose(), c.transpose()]),
        }
    }

    pub fn volume(&self) -> f64 {
        self.vectors.determinant().abs()
    }
}

// --- The Core Entity ---

/// The atomic configuration handed to the potential, in external units.
///
/// Atom count and species are set once by the template; only positions and
/// the cell change afterwards, and they change in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AtomicStructure {
    pub atoms: Vec<Atom>,
    pub lattice: Option<Lattice>,
    pub pbc: [bool; 3],
}

impl AtomicStructure {
    pub fn new(atoms: Vec<Atom>, lattice: Option<Lattice>, pbc: [bool; 3]) -> Self {
        Self { atoms, lattice, pbc }
    }

    pub fn len(&self) -> usize {
        self.atoms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.atoms.is_empty()
    }

    pub fn symbols(&self) -> Vec<&str> {
        self.atoms.iter().map(|a| a.symbol.as_str()).collect()
    }

    pub fn positions(&self) -> Vec<Point3<f64>> {
        self.atoms.iter().map(|a| a.position).collect()
    }

    /// Overwrites every position in place. The slice must hold exactly one
    /// entry per atom.
    pub fn set_positions(&mut self, positions: &[Vector3<f64>]) -> DriverResult<()> {
        if positions.len() != self.atoms.len() {
            return Err(DriverError::ShapeMismatch {
                what: "positions",
                expected: self.atoms.len() * 3,
                got: positions.len() * 3,
            });
        }
        for (atom, p) in self.atoms.iter_mut().zip(positions) {
            atom.position = Point3::from(*p);
        }
        Ok(())
    }

    /// Replaces the cell. `rows` holds the lattice vectors row-wise.
    pub fn set_cell(&mut self, rows: Matrix3<f64>) {
        match &mut self.lattice {
            Some(lat) => lat.vectors = rows,
            None => self.lattice = Some(Lattice { vectors: rows }),
        }
    }
}
