use anyhow::Result;
use nalgebra::{Matrix3, Vector3};

use crate::core::domain::AtomicStructure;
use crate::engine::potential::{Potential, RawResults};
use crate::error::DriverResult;

/// The driver's single structure together with the potential bound to it.
///
/// Geometry is overwritten in place on every step and the potential is never
/// rebuilt. Not reentrant: callers must not overlap `update` / `compute`.
pub struct StructureState {
    structure: AtomicStructure,
    potential: Box<dyn Potential>,
}

impl StructureState {
    pub fn new(structure: AtomicStructure, potential: Box<dyn Potential>) -> Self {
        Self { structure, potential }
    }

    pub fn structure(&self) -> &AtomicStructure {
        &self.structure
    }

    pub fn potential_name(&self) -> &str {
        self.potential.name()
    }

    /// Writes new geometry (external units, row-wise cell) into the structure.
    pub fn update(&mut self, cell_rows: Matrix3<f64>, positions: &[Vector3<f64>]) -> DriverResult<()> {
        self.structure.set_positions(positions)?;
        self.structure.set_cell(cell_rows);
        Ok(())
    }

    /// Runs the potential on the current geometry.
    pub fn compute(&mut self) -> Result<()> {
        self.potential.calculate(&self.structure)
    }

    pub fn results(&self) -> Option<&RawResults> {
        self.potential.results()
    }
}
