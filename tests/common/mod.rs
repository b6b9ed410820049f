#![allow(dead_code)]

use std::collections::VecDeque;
use std::io::Write;
use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};
use apax_driver::core::domain::AtomicStructure;
use apax_driver::engine::adapter::PotentialAdapter;
use apax_driver::engine::potential::{Potential, RawResults};
use tempfile::NamedTempFile;

/// Returns a fixed result set and records every geometry it is shown.
pub struct ScriptedPotential {
    response: RawResults,
    results: Option<RawResults>,
    pub seen: Arc<Mutex<Vec<AtomicStructure>>>,
}

impl ScriptedPotential {
    pub fn new(response: RawResults) -> Self {
        Self {
            response,
            results: None,
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl Potential for ScriptedPotential {
    fn calculate(&mut self, structure: &AtomicStructure) -> Result<()> {
        self.seen.lock().unwrap().push(structure.clone());
        self.results = Some(self.response.clone());
        Ok(())
    }

    fn results(&self) -> Option<&RawResults> {
        self.results.as_ref()
    }

    fn name(&self) -> &str {
        "Scripted Potential"
    }
}

/// Always fails, like a model that diverges.
pub struct FailingPotential;

impl Potential for FailingPotential {
    fn calculate(&mut self, _structure: &AtomicStructure) -> Result<()> {
        bail!("model diverged")
    }

    fn results(&self) -> Option<&RawResults> {
        None
    }

    fn name(&self) -> &str {
        "Failing Potential"
    }
}

/// Plays back a fixed sequence of steps; `None` entries fail.
pub struct SequencePotential {
    steps: VecDeque<Option<RawResults>>,
    results: Option<RawResults>,
}

impl SequencePotential {
    pub fn new(steps: Vec<Option<RawResults>>) -> Self {
        Self {
            steps: steps.into(),
            results: None,
        }
    }
}

impl Potential for SequencePotential {
    fn calculate(&mut self, _structure: &AtomicStructure) -> Result<()> {
        self.results = None;
        match self.steps.pop_front().flatten() {
            Some(r) => {
                self.results = Some(r);
                Ok(())
            }
            None => bail!("model diverged"),
        }
    }

    fn results(&self) -> Option<&RawResults> {
        self.results.as_ref()
    }

    fn name(&self) -> &str {
        "Sequence Potential"
    }
}

/// Two hydrogen atoms at the origin in a 10 Å cubic box.
pub fn write_h2_template() -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "2").unwrap();
    writeln!(file, r#"Lattice="10 0 0 0 10 0 0 0 10" pbc="T T T""#).unwrap();
    writeln!(file, "H 0.0 0.0 0.0").unwrap();
    writeln!(file, "H 0.0 0.0 0.0").unwrap();
    file.flush().unwrap();
    file
}

/// Builds an adapter over the H2 template bound to `potential`.
pub fn adapter_with<P: Potential + 'static>(potential: P) -> (PotentialAdapter, NamedTempFile) {
    let template = write_h2_template();
    let path = template.path().to_str().unwrap().to_string();
    let adapter = PotentialAdapter::from_args(&["model_dir".to_string(), path], move |_, _| {
        Ok(Box::new(potential) as Box<dyn Potential>)
    })
    .unwrap();
    (adapter, template)
}
