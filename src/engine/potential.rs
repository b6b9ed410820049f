use anyhow::Result;
use nalgebra::{Matrix3, Vector3};

use crate::core::domain::AtomicStructure;
use crate::error::{DriverError, DriverResult};

/// Committee (ensemble) predictions. Units are eV and eV/Å.
#[derive(Debug, Clone, PartialEq)]
pub struct EnsembleResults {
    /// One energy per committee member (length M).
    pub energies: Vec<f64>,
    /// One flattened 3N force vector per committee member (length M).
    pub forces: Vec<Vec<f64>>,
}

/// The result set of one potential evaluation, in external units.
///
/// Energy and forces are always present. Stress and ensemble data depend on
/// the model and are independent of each other.
#[derive(Debug, Clone, PartialEq)]
pub struct RawResults {
    /// eV
    pub energy: f64,
    /// Flattened 3N, row-major per atom (eV/Å).
    pub forces: Vec<f64>,
    /// eV/Å³, in the potential's tensor layout.
    pub stress: Option<Matrix3<f64>>,
    pub ensemble: Option<EnsembleResults>,
}

impl RawResults {
    pub fn new(energy: f64, forces: Vec<f64>) -> Self {
        Self {
            energy,
            forces,
            stress: None,
            ensemble: None,
        }
    }

    pub fn with_stress(mut self, stress: Matrix3<f64>) -> Self {
        self.stress = Some(stress);
        self
    }

    pub fn with_ensemble(mut self, energies: Vec<f64>, forces: Vec<Vec<f64>>) -> Self {
        self.ensemble = Some(EnsembleResults { energies, forces });
        self
    }
}

/// A machine-learned potential bound to one structure.
///
/// `calculate` runs the model on the structure's current geometry and
/// replaces the stored result set; `results` reads it back.
pub trait Potential: Send {
    fn calculate(&mut self, structure: &AtomicStructure) -> Result<()>;

    /// Results of the last successful `calculate`, if any.
    fn results(&self) -> Option<&RawResults>;

    /// Returns the name of the backend (e.g., "apax-calculator (pipe)").
    fn name(&self) -> &str;
}

/// Reshapes a flattened 3N vector into N rows, preserving atom order.
pub fn reshape_rows(what: &'static str, flat: &[f64], n_atoms: usize) -> DriverResult<Vec<Vector3<f64>>> {
    if flat.len() != n_atoms * 3 {
        return Err(DriverError::ShapeMismatch {
            what,
            expected: n_atoms * 3,
            got: flat.len(),
        });
    }
    Ok(flat
        .chunks_exact(3)
        .map(|c| Vector3::new(c[0], c[1], c[2]))
        .collect())
}
