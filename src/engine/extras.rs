use serde::{Deserialize, Serialize};

use crate::error::DriverResult;

/// Committee predictions in internal units, in the layout the engine expects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitteeExtras {
    /// One energy per member (length M).
    pub committee_pot: Vec<f64>,
    /// One N×3 force matrix per member (length M).
    pub committee_force: Vec<Vec<[f64; 3]>>,
}

/// Extra per-step data handed back alongside energy, forces and virial.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Extras {
    #[default]
    None,
    /// A serialized JSON object with exactly the committee keys.
    Committee(String),
}

impl Extras {
    pub fn is_none(&self) -> bool {
        matches!(self, Extras::None)
    }

    /// The string sent over the wire. `None` is the empty string.
    pub fn as_wire_str(&self) -> &str {
        match self {
            Extras::None => "",
            Extras::Committee(s) => s,
        }
    }
}

/// Serializes committee data, or yields [`Extras::None`] when there is none.
///
/// A present mapping always produces a JSON object, even when its sequences
/// are empty.
pub fn serialize(committee: Option<&CommitteeExtras>) -> DriverResult<Extras> {
    match committee {
        None => Ok(Extras::None),
        Some(c) => Ok(Extras::Committee(serde_json::to_string(c)?)),
    }
}
