use std::path::Path;

use log::{debug, info};
use nalgebra::{Matrix3, Vector3};

use crate::config::DriverConfig;
use crate::core::domain::AtomicStructure;
use crate::core::template;
use crate::core::units::{self, Quantity};
use crate::engine::backend;
use crate::engine::extras::{self, CommitteeExtras, Extras};
use crate::engine::external::subprocess::SubprocessPotential;
use crate::engine::potential::{reshape_rows, Potential};
use crate::engine::state::StructureState;
use crate::error::{DriverError, DriverResult};

/// What the engine receives for one step. All values are in internal units.
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutput {
    pub energy: f64,
    /// One row per atom, in template order.
    pub forces: Vec<Vector3<f64>>,
    /// Zero when the potential reports no stress.
    pub virial: Matrix3<f64>,
    pub extras: Extras,
}

/// Splits an i-PI style parameter string (`"model_dir,template.xyz"`).
pub fn split_param_string(param: &str) -> Vec<String> {
    if param.trim().is_empty() {
        return Vec::new();
    }
    param.split(',').map(|s| s.trim().to_string()).collect()
}

/// Translates engine requests into potential calls and back.
pub struct PotentialAdapter {
    state: StructureState,
}

impl PotentialAdapter {
    pub fn new(state: StructureState) -> Self {
        Self { state }
    }

    /// Builds the driver from `[checkpoint, template]`.
    ///
    /// The argument count is checked before anything is read, and `bind` is
    /// only called once the template has been loaded.
    pub fn from_args<S, F>(args: &[S], bind: F) -> DriverResult<Self>
    where
        S: AsRef<str>,
        F: FnOnce(&Path, &AtomicStructure) -> DriverResult<Box<dyn Potential>>,
    {
        if args.len() != 2 {
            return Err(DriverError::Usage { got: args.len() });
        }
        let checkpoint = Path::new(args[0].as_ref());
        let template_path = Path::new(args[1].as_ref());

        let structure = template::read_first_frame(template_path)?;
        info!(
            "Loaded template {} ({} atoms)",
            template_path.display(),
            structure.len()
        );

        let potential = bind(checkpoint, &structure)?;
        let state = StructureState::new(structure, potential);
        info!("Bound potential: {}", state.potential_name());

        Ok(Self::new(state))
    }

    /// Probes the backend, then builds the driver around a subprocess potential.
    pub fn launch<S: AsRef<str>>(args: &[S], config: &DriverConfig) -> DriverResult<Self> {
        backend::probe(&config.backend).require(&config.backend)?;
        Self::from_args(args, |checkpoint, _| {
            let potential = SubprocessPotential::spawn(&config.backend, checkpoint)?;
            Ok(Box::new(potential) as Box<dyn Potential>)
        })
    }

    pub fn structure(&self) -> &AtomicStructure {
        self.state.structure()
    }

    pub fn potential_name(&self) -> &str {
        self.state.potential_name()
    }

    /// Stress of the last evaluation in internal energy-density units.
    pub fn last_stress(&self) -> Option<Matrix3<f64>> {
        let stress = self.state.results()?.stress?;
        Some(units::mat_to_internal(Quantity::EnergyDensity, &stress))
    }

    /// Evaluates one step.
    ///
    /// `cell` holds the lattice vectors as columns and `positions` is the
    /// flattened N×3 array, both in internal units. Failures of the potential
    /// are returned as [`DriverError::Computation`] without retry.
    pub fn evaluate(&mut self, cell: &Matrix3<f64>, positions: &[f64]) -> DriverResult<StepOutput> {
        let n = self.state.structure().len();

        // 1. Geometry into potential units; the potential wants row vectors
        let positions: Vec<Vector3<f64>> = reshape_rows("positions", positions, n)?
            .iter()
            .map(|p| units::vec_to_external(Quantity::Length, p))
            .collect();
        let cell_rows = units::mat_to_external(Quantity::Length, &cell.transpose());

        // 2. In-place update and evaluation
        self.state.update(cell_rows, &positions)?;
        self.state.compute().map_err(DriverError::Computation)?;
        let raw = self.state.results().ok_or(DriverError::MissingResults)?;

        // 3. Virial: transposed stress, or exactly zero
        let virial_source = match &raw.stress {
            Some(stress) => stress.transpose(),
            None => Matrix3::zeros(),
        };

        // 4. Back to internal units
        let energy = units::to_internal(Quantity::Energy, raw.energy);
        let forces: Vec<Vector3<f64>> = reshape_rows("forces", &raw.forces, n)?
            .iter()
            .map(|f| units::vec_to_internal(Quantity::Force, f))
            .collect();
        let virial = units::mat_to_internal(Quantity::Energy, &virial_source);

        // 5. Committee extras
        let committee = match &raw.ensemble {
            Some(ensemble) => {
                if ensemble.forces.len() != ensemble.energies.len() {
                    return Err(DriverError::ShapeMismatch {
                        what: "committee forces",
                        expected: ensemble.energies.len(),
                        got: ensemble.forces.len(),
                    });
                }
                let committee_force = ensemble
                    .forces
                    .iter()
                    .map(|member| -> DriverResult<Vec<[f64; 3]>> {
                        let rows = reshape_rows("committee forces", member, n)?;
                        Ok(rows
                            .iter()
                            .map(|f| {
                                let f = units::vec_to_internal(Quantity::Force, f);
                                [f.x, f.y, f.z]
                            })
                            .collect())
                    })
                    .collect::<DriverResult<Vec<_>>>()?;
                Some(CommitteeExtras {
                    committee_pot: units::slice_to_internal(Quantity::Energy, &ensemble.energies),
                    committee_force,
                })
            }
            None => None,
        };

        debug!(
            "Step: E = {:.8} Ha, stress = {}, committee = {}",
            energy,
            raw.stress.is_some(),
            committee.as_ref().map_or(0, |c| c.committee_pot.len())
        );

        let extras = extras::serialize(committee.as_ref())?;

        Ok(StepOutput {
            energy,
            forces,
            virial,
            extras,
        })
    }
}
