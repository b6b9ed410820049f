use std::cell::Cell;

use approx::assert_relative_eq;
use apax_driver::config::{BackendConfig, DriverConfig};
use apax_driver::core::units::{self, Quantity};
use apax_driver::engine::adapter::{split_param_string, PotentialAdapter};
use apax_driver::engine::extras::Extras;
use apax_driver::engine::potential::{Potential, RawResults};
use apax_driver::error::DriverError;
use nalgebra::{Matrix3, Vector3};
use serde_json::Value;

use crate::common::{adapter_with, write_h2_template, FailingPotential, ScriptedPotential, SequencePotential};

mod common;

fn box_cell() -> Matrix3<f64> {
    Matrix3::identity() * 10.0
}

const ZERO_POSITIONS: [f64; 6] = [0.0; 6];

#[test]
fn test_energy_forces_without_stress_or_committee() {
    let raw = RawResults::new(1.0, vec![0.0; 6]);
    let (mut adapter, _tmp) = adapter_with(ScriptedPotential::new(raw));

    let out = adapter.evaluate(&box_cell(), &ZERO_POSITIONS).unwrap();

    assert_relative_eq!(out.energy, units::to_internal(Quantity::Energy, 1.0));
    assert_relative_eq!(out.energy, 1.0 / 27.211_386, max_relative = 1e-12);
    assert_eq!(out.forces, vec![Vector3::zeros(); 2]);
    assert_eq!(out.virial, Matrix3::zeros());
    assert_eq!(out.extras, Extras::None);
    assert_eq!(out.extras.as_wire_str(), "");
    assert!(adapter.last_stress().is_none());
}

#[test]
fn test_virial_is_transposed_stress() {
    let constant = Matrix3::repeat(2.0);
    let raw = RawResults::new(1.0, vec![0.0; 6]).with_stress(constant);
    let (mut adapter, _tmp) = adapter_with(ScriptedPotential::new(raw));

    let out = adapter.evaluate(&box_cell(), &ZERO_POSITIONS).unwrap();
    let expected = units::mat_to_internal(Quantity::Energy, &constant.transpose());
    assert_relative_eq!(out.virial, expected);

    // Asymmetric stress exposes the transpose
    let stress = Matrix3::new(1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0);
    let raw = RawResults::new(1.0, vec![0.0; 6]).with_stress(stress);
    let (mut adapter, _tmp) = adapter_with(ScriptedPotential::new(raw));

    let out = adapter.evaluate(&box_cell(), &ZERO_POSITIONS).unwrap();
    let f = units::to_internal(Quantity::Energy, 1.0);
    for i in 0..3 {
        for j in 0..3 {
            assert_relative_eq!(out.virial[(i, j)], stress[(j, i)] * f);
        }
    }
    assert_relative_eq!(
        adapter.last_stress().unwrap(),
        units::mat_to_internal(Quantity::EnergyDensity, &stress)
    );
}

#[test]
fn test_committee_extras_are_serialized() {
    let member_forces: Vec<Vec<f64>> = (0..3)
        .map(|m| (0..6).map(|k| (m * 6 + k) as f64).collect())
        .collect();
    let raw = RawResults::new(1.0, vec![0.0; 6]).with_ensemble(vec![0.9, 1.0, 1.1], member_forces);
    let (mut adapter, _tmp) = adapter_with(ScriptedPotential::new(raw));

    let out = adapter.evaluate(&box_cell(), &ZERO_POSITIONS).unwrap();
    let text = match &out.extras {
        Extras::Committee(s) => s.clone(),
        Extras::None => panic!("expected committee extras"),
    };

    let decoded: Value = serde_json::from_str(&text).unwrap();
    let map = decoded.as_object().unwrap();
    assert_eq!(map.len(), 2);

    let pot = map["committee_pot"].as_array().unwrap();
    assert_eq!(pot.len(), 3);
    assert_relative_eq!(pot[2].as_f64().unwrap(), units::to_internal(Quantity::Energy, 1.1));

    let force = map["committee_force"].as_array().unwrap();
    assert_eq!(force.len(), 3);
    for member in force {
        let rows = member.as_array().unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.as_array().unwrap().len() == 3));
    }
    // Member 1, atom 1, z component was 11 eV/Å
    assert_relative_eq!(
        force[1][1][2].as_f64().unwrap(),
        units::to_internal(Quantity::Force, 11.0)
    );
}

#[test]
fn test_committee_length_mismatch_is_rejected() {
    let raw = RawResults::new(1.0, vec![0.0; 6]).with_ensemble(vec![1.0, 2.0], vec![vec![0.0; 6]]);
    let (mut adapter, _tmp) = adapter_with(ScriptedPotential::new(raw));

    let err = adapter.evaluate(&box_cell(), &ZERO_POSITIONS).unwrap_err();
    assert!(matches!(err, DriverError::ShapeMismatch { what: "committee forces", .. }));
}

#[test]
fn test_forces_are_converted_per_atom() {
    let raw = RawResults::new(-2.0, vec![1.0, 2.0, 3.0, -4.0, -5.0, -6.0]);
    let (mut adapter, _tmp) = adapter_with(ScriptedPotential::new(raw));

    let out = adapter.evaluate(&box_cell(), &ZERO_POSITIONS).unwrap();
    let f = units::to_internal(Quantity::Force, 1.0);
    assert_relative_eq!(out.forces[0], Vector3::new(1.0, 2.0, 3.0) * f);
    assert_relative_eq!(out.forces[1], Vector3::new(-4.0, -5.0, -6.0) * f);
}

#[test]
fn test_geometry_reaches_potential_in_external_units() {
    let potential = ScriptedPotential::new(RawResults::new(0.0, vec![0.0; 6]));
    let seen = potential.seen.clone();
    let (mut adapter, _tmp) = adapter_with(potential);

    // Columns are the engine's lattice vectors
    let a = Vector3::new(10.0, 0.0, 0.0);
    let b = Vector3::new(2.0, 10.0, 0.0);
    let c = Vector3::new(1.0, 3.0, 10.0);
    let cell = Matrix3::from_columns(&[a, b, c]);
    let positions = [1.0, 0.0, 0.0, 0.0, 2.0, 0.0];

    adapter.evaluate(&cell, &positions).unwrap();
    adapter.evaluate(&cell, &positions).unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 2, "every step re-runs the potential");

    let s = &seen[0];
    let bohr = units::to_external(Quantity::Length, 1.0);
    let lat = s.lattice.as_ref().unwrap();
    assert_relative_eq!(lat.vectors.row(1).transpose(), b * bohr, max_relative = 1e-12);
    assert_relative_eq!(s.atoms[0].position.coords, Vector3::new(bohr, 0.0, 0.0), max_relative = 1e-12);
    assert_relative_eq!(s.atoms[1].position.coords, Vector3::new(0.0, 2.0 * bohr, 0.0), max_relative = 1e-12);
    assert_eq!(s.symbols(), vec!["H", "H"]);
}

#[test]
fn test_wrong_position_count_is_rejected() {
    let (mut adapter, _tmp) = adapter_with(ScriptedPotential::new(RawResults::new(0.0, vec![0.0; 6])));
    let err = adapter.evaluate(&box_cell(), &[0.0; 9]).unwrap_err();
    assert!(matches!(err, DriverError::ShapeMismatch { what: "positions", .. }));
}

#[test]
fn test_computation_errors_propagate() {
    let (mut adapter, _tmp) = adapter_with(FailingPotential);
    let err = adapter.evaluate(&box_cell(), &ZERO_POSITIONS).unwrap_err();
    match err {
        DriverError::Computation(e) => assert!(e.to_string().contains("model diverged")),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_wrong_argument_count_builds_nothing() {
    for args in [vec![], vec!["model"], vec!["model", "missing.xyz", "extra"]] {
        let bound = Cell::new(false);
        let result = PotentialAdapter::from_args(&args, |_, _| {
            bound.set(true);
            Ok(Box::new(FailingPotential) as Box<dyn Potential>)
        });
        assert!(matches!(result, Err(DriverError::Usage { got }) if got == args.len()));
        assert!(!bound.get());
    }
}

#[test]
fn test_missing_template_is_a_template_error() {
    let result = PotentialAdapter::from_args(&["model", "/nonexistent/template.xyz"], |_, _| {
        Ok(Box::new(FailingPotential) as Box<dyn Potential>)
    });
    assert!(matches!(result, Err(DriverError::Template(_))));
}

#[test]
fn test_unavailable_backend_fails_before_arguments() {
    let config = DriverConfig {
        backend: BackendConfig {
            command: "apax-driver-test-no-such-backend".into(),
            ..Default::default()
        },
    };
    let no_args: [&str; 0] = [];
    let result = PotentialAdapter::launch(&no_args, &config);
    assert!(matches!(result, Err(DriverError::BackendUnavailable { .. })));
}

fn shell_config(script: &str) -> DriverConfig {
    DriverConfig {
        backend: BackendConfig {
            command: "sh".into(),
            args: vec!["-c".into(), script.into()],
            ..Default::default()
        },
    }
}

#[test]
fn test_failing_backend_is_rejected_at_launch() {
    let template = write_h2_template();
    let args = ["model_dir", template.path().to_str().unwrap()];

    let result = PotentialAdapter::launch(&args, &shell_config("exit 1"));
    assert!(matches!(result, Err(DriverError::BackendUnavailable { .. })));

    // Starts for the probe but cannot load the model
    let loader_fails = r#"[ "$0" = "--help" ] && exit 0; echo 'ImportError: no apax' >&2; exit 1"#;
    let result = PotentialAdapter::launch(&args, &shell_config(loader_fails));
    assert!(matches!(result, Err(DriverError::BackendUnavailable { .. })));
}

#[test]
fn test_launch_and_evaluate_through_backend() {
    let template = write_h2_template();
    let args = ["model_dir", template.path().to_str().unwrap()];
    let server = r#"[ "$0" = "--help" ] && exit 0
echo '{"ready": true}'
while read line; do echo '{"energy": 2.0, "forces": [[1,0,0],[0,0,-1]]}'; done"#;

    let mut adapter = PotentialAdapter::launch(&args, &shell_config(server)).unwrap();
    assert_eq!(adapter.potential_name(), "sh (pipe)");

    let out = adapter.evaluate(&box_cell(), &ZERO_POSITIONS).unwrap();
    assert_relative_eq!(out.energy, units::to_internal(Quantity::Energy, 2.0));
    assert_relative_eq!(out.forces[1], Vector3::new(0.0, 0.0, -units::to_internal(Quantity::Force, 1.0)));
    assert_eq!(out.virial, Matrix3::zeros());
    assert!(out.extras.is_none());
}

#[test]
fn test_stress_and_committee_together() {
    let stress = Matrix3::new(1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0);
    let raw = RawResults::new(1.0, vec![0.0; 6])
        .with_stress(stress)
        .with_ensemble(vec![0.5, 1.5], vec![vec![1.0; 6], vec![-1.0; 6]]);
    let (mut adapter, _tmp) = adapter_with(ScriptedPotential::new(raw));
    assert_eq!(adapter.potential_name(), "Scripted Potential");

    let out = adapter.evaluate(&box_cell(), &ZERO_POSITIONS).unwrap();
    assert_relative_eq!(out.virial, units::mat_to_internal(Quantity::Energy, &stress.transpose()));

    let decoded: Value = serde_json::from_str(out.extras.as_wire_str()).unwrap();
    let map = decoded.as_object().unwrap();
    assert_eq!(map.len(), 2);
    assert_eq!(map["committee_pot"].as_array().unwrap().len(), 2);
    let force = map["committee_force"].as_array().unwrap();
    assert_eq!(force.len(), 2);
    assert_relative_eq!(force[1][0][0].as_f64().unwrap(), -units::to_internal(Quantity::Force, 1.0));
}

#[test]
fn test_failed_step_does_not_serve_stale_results() {
    let first = RawResults::new(1.0, vec![0.0; 6]).with_stress(Matrix3::repeat(2.0));
    let third = RawResults::new(3.0, vec![0.0; 6]);
    let potential = SequencePotential::new(vec![Some(first), None, Some(third)]);
    let (mut adapter, _tmp) = adapter_with(potential);

    adapter.evaluate(&box_cell(), &ZERO_POSITIONS).unwrap();
    assert!(adapter.last_stress().is_some());

    let err = adapter.evaluate(&box_cell(), &ZERO_POSITIONS).unwrap_err();
    assert!(matches!(err, DriverError::Computation(_)));
    assert!(adapter.last_stress().is_none());

    let out = adapter.evaluate(&box_cell(), &ZERO_POSITIONS).unwrap();
    assert_relative_eq!(out.energy, units::to_internal(Quantity::Energy, 3.0));
    assert_eq!(out.virial, Matrix3::zeros());
}

#[test]
fn test_split_param_string() {
    assert_eq!(split_param_string("run/exp1,template.xyz"), vec!["run/exp1", "template.xyz"]);
    assert_eq!(split_param_string("a, b ,c").len(), 3);
    assert!(split_param_string("").is_empty());
}
