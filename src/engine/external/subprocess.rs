use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

use anyhow::{anyhow, bail, Context, Result};
use log::{debug, info, warn};
use nalgebra::Matrix3;
use serde::{Deserialize, Serialize};

use crate::config::BackendConfig;
use crate::core::domain::AtomicStructure;
use crate::engine::potential::{Potential, RawResults};
use crate::error::{DriverError, DriverResult};

/// A long-lived model server driven over stdin/stdout.
///
/// The process is started once with the checkpoint path as its last argument
/// and kept alive, so the model is loaded a single time. Once the model is
/// loaded the backend prints `{"ready": true}` (or `{"error": "..."}`). Each
/// evaluation is then one JSON request line followed by one JSON response line.
pub struct SubprocessPotential {
    label: String,
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    results: Option<RawResults>,
}

#[derive(Serialize)]
struct Request<'a> {
    symbols: Vec<&'a str>,
    cell: Option<[[f64; 3]; 3]>,
    pbc: [bool; 3],
    positions: Vec<[f64; 3]>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ForceArray {
    Nested(Vec<[f64; 3]>),
    Flat(Vec<f64>),
}

impl ForceArray {
    fn into_flat(self) -> Vec<f64> {
        match self {
            ForceArray::Nested(rows) => rows.into_iter().flatten().collect(),
            ForceArray::Flat(v) => v,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StressArray {
    Full([[f64; 3]; 3]),
    /// xx, yy, zz, yz, xz, xy
    Voigt([f64; 6]),
}

impl StressArray {
    fn into_matrix(self) -> Matrix3<f64> {
        match self {
            StressArray::Full(m) => Matrix3::from_fn(|i, j| m[i][j]),
            StressArray::Voigt([xx, yy, zz, yz, xz, xy]) => {
                Matrix3::new(xx, xy, xz, xy, yy, yz, xz, yz, zz)
            }
        }
    }
}

#[derive(Deserialize)]
struct Ready {
    #[serde(default)]
    ready: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct Response {
    #[serde(default)]
    error: Option<String>,
    energy: Option<f64>,
    forces: Option<ForceArray>,
    #[serde(default)]
    stress: Option<StressArray>,
    #[serde(default)]
    energy_ensemble: Option<Vec<f64>>,
    #[serde(default)]
    forces_ensemble: Option<Vec<ForceArray>>,
}

impl Response {
    fn into_results(self) -> Result<RawResults> {
        if let Some(msg) = self.error {
            bail!("Backend reported an error: {}", msg);
        }
        let energy = self.energy.ok_or_else(|| anyhow!("Response has no 'energy'"))?;
        let forces = self
            .forces
            .ok_or_else(|| anyhow!("Response has no 'forces'"))?
            .into_flat();

        let mut results = RawResults::new(energy, forces);
        if let Some(stress) = self.stress {
            results = results.with_stress(stress.into_matrix());
        }
        if let Some(energies) = self.energy_ensemble {
            let forces = self
                .forces_ensemble
                .ok_or_else(|| anyhow!("Response has 'energy_ensemble' but no 'forces_ensemble'"))?
                .into_iter()
                .map(ForceArray::into_flat)
                .collect();
            results = results.with_ensemble(energies, forces);
        }
        Ok(results)
    }
}

impl SubprocessPotential {
    /// Starts the backend and loads the checkpoint.
    ///
    /// # Arguments
    /// * `config` - Executable and extra arguments.
    /// * `checkpoint` - Model directory, appended as the last argument.
    pub fn spawn(config: &BackendConfig, checkpoint: &Path) -> DriverResult<Self> {
        let mut child = Command::new(&config.command)
            .args(&config.args)
            .arg(checkpoint)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(DriverError::Spawn)?;

        // Both pipes were requested above.
        let (stdin, stdout) = match (child.stdin.take(), child.stdout.take()) {
            (Some(i), Some(o)) => (i, o),
            _ => {
                let _ = child.kill();
                return Err(DriverError::Spawn(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    "backend pipes unavailable",
                )));
            }
        };

        let mut potential = Self {
            label: format!("{} (pipe)", config.command),
            child,
            stdin,
            stdout: BufReader::new(stdout),
            results: None,
        };

        // Model loading failures surface here, before any step is attempted
        if let Err(reason) = potential.await_ready() {
            return Err(DriverError::BackendUnavailable {
                command: config.command.clone(),
                reason: format!("{:#}", reason),
            });
        }

        info!(
            "Started backend '{}' (pid {}) with checkpoint {}",
            config.command,
            potential.child.id(),
            checkpoint.display()
        );
        Ok(potential)
    }

    fn await_ready(&mut self) -> Result<()> {
        let mut line = String::new();
        let read = self
            .stdout
            .read_line(&mut line)
            .context("Failed to read backend ready line")?;
        if read == 0 {
            bail!("Backend exited while loading the model");
        }
        let ready: Ready = serde_json::from_str(line.trim())
            .with_context(|| format!("Unexpected backend ready line: {}", line.trim()))?;
        if let Some(msg) = ready.error {
            bail!("Backend failed to load the model: {}", msg);
        }
        if !ready.ready {
            bail!("Backend did not report ready: {}", line.trim());
        }
        Ok(())
    }

    fn generate_request(structure: &AtomicStructure) -> Result<String> {
        let request = Request {
            symbols: structure.symbols(),
            cell: structure.lattice.as_ref().map(|lat| {
                let v = lat.vectors;
                // Rows are lattice vectors
                [
                    [v[(0, 0)], v[(0, 1)], v[(0, 2)]],
                    [v[(1, 0)], v[(1, 1)], v[(1, 2)]],
                    [v[(2, 0)], v[(2, 1)], v[(2, 2)]],
                ]
            }),
            pbc: structure.pbc,
            positions: structure
                .atoms
                .iter()
                .map(|a| [a.position.x, a.position.y, a.position.z])
                .collect(),
        };
        serde_json::to_string(&request).context("Failed to encode backend request")
    }

    fn exchange(&mut self, request: &str) -> Result<String> {
        self.stdin
            .write_all(request.as_bytes())
            .and_then(|_| self.stdin.write_all(b"\n"))
            .and_then(|_| self.stdin.flush())
            .context("Failed to write to backend stdin")?;

        let mut line = String::new();
        let read = self
            .stdout
            .read_line(&mut line)
            .context("Failed to read backend output")?;
        if read == 0 {
            bail!("Backend closed its output before answering");
        }
        Ok(line)
    }
}

impl Potential for SubprocessPotential {
    fn name(&self) -> &str {
        &self.label
    }

    fn calculate(&mut self, structure: &AtomicStructure) -> Result<()> {
        self.results = None;

        let request = Self::generate_request(structure)?;
        let reply = self.exchange(&request)?;

        let response: Response = serde_json::from_str(reply.trim())
            .with_context(|| format!("Malformed backend response: {}", reply.trim()))?;
        let results = response.into_results()?;

        debug!("Backend returned energy {:.6} eV", results.energy);
        self.results = Some(results);
        Ok(())
    }

    fn results(&self) -> Option<&RawResults> {
        self.results.as_ref()
    }
}

impl Drop for SubprocessPotential {
    fn drop(&mut self) {
        // Best-effort shutdown of the backend
        if let Err(e) = self.child.kill() {
            warn!("Failed to stop backend: {}", e);
        }
        let _ = self.child.wait();
    }
}
