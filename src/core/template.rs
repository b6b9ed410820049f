use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

use nalgebra::{Point3, Vector3};
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

use crate::core::domain::{Atom, AtomicStructure, Lattice};

static KEY_VALUE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(\w+)=(?:"([^"]*)"|(\S+))"#).unwrap());

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("Parse error on line {line}: {kind}")]
    Parse { line: usize, kind: ParseErrorKind },
    #[error("File ended after {found} of {expected} atom lines")]
    Truncated { expected: usize, found: usize },
}

#[derive(Debug, Error)]
pub enum ParseErrorKind {
    #[error("Invalid atom count '{0}'")]
    InvalidCount(String),
    #[error("Invalid float (value: '{0}')")]
    InvalidFloat(String),
    #[error("Atom line needs a symbol and three coordinates")]
    MissingColumns,
    #[error("Lattice needs 9 values, got {0}")]
    InvalidLattice(usize),
    #[error("Invalid pbc flag '{0}'")]
    InvalidPbc(String),
    #[error("Unsupported Properties '{0}' (needs species:S:1 and pos:R:3)")]
    InvalidProperties(String),
}

/// Column offsets of the fields read from each atom line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Columns {
    species: usize,
    pos: usize,
}

impl Default for Columns {
    fn default() -> Self {
        Self { species: 0, pos: 1 }
    }
}

impl Columns {
    fn width(&self) -> usize {
        (self.species + 1).max(self.pos + 3)
    }
}

struct Header {
    lattice: Option<Lattice>,
    pbc: [bool; 3],
    columns: Columns,
}

fn parse_err(line: usize, kind: ParseErrorKind) -> TemplateError {
    TemplateError::Parse { line, kind }
}

fn parse_float(line: usize, token: &str) -> Result<f64, TemplateError> {
    token
        .parse::<f64>()
        .map_err(|_| parse_err(line, ParseErrorKind::InvalidFloat(token.to_string())))
}

/// Reads the first frame of an XYZ or extended-XYZ file.
pub fn read_first_frame(path: impl AsRef<Path>) -> Result<AtomicStructure, TemplateError> {
    let file = File::open(path.as_ref())?;
    read_first_frame_from(&mut BufReader::new(file))
}

/// Same as [`read_first_frame`], from any buffered reader. Reading stops
/// after the first frame's atom lines.
pub fn read_first_frame_from(reader: &mut impl BufRead) -> Result<AtomicStructure, TemplateError> {
    let mut lines = reader.lines();

    // 1. Atom count
    let count_line = lines.next().transpose()?.unwrap_or_default();
    let n: usize = count_line
        .trim()
        .parse()
        .ok()
        .filter(|&n| n > 0)
        .ok_or_else(|| parse_err(1, ParseErrorKind::InvalidCount(count_line.trim().to_string())))?;

    // 2. Comment line (extended XYZ metadata)
    let comment = lines.next().transpose()?.unwrap_or_default();
    let header = parse_comment(&comment)?;
    let cols = header.columns;

    // 3. Atoms
    let mut atoms = Vec::with_capacity(n);
    for i in 0..n {
        let line_no = i + 3;
        let line = match lines.next().transpose()? {
            Some(l) => l,
            None => return Err(TemplateError::Truncated { expected: n, found: i }),
        };
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < cols.width() {
            return Err(parse_err(line_no, ParseErrorKind::MissingColumns));
        }
        let x = parse_float(line_no, parts[cols.pos])?;
        let y = parse_float(line_no, parts[cols.pos + 1])?;
        let z = parse_float(line_no, parts[cols.pos + 2])?;
        atoms.push(Atom {
            symbol: parts[cols.species].to_string(),
            position: Point3::new(x, y, z),
        });
    }

    Ok(AtomicStructure::new(atoms, header.lattice, header.pbc))
}

/// Locates the species and position columns in a `Properties` value such as
/// `species:S:1:pos:R:3:forces:R:3`.
fn parse_properties(value: &str) -> Result<Columns, TemplateError> {
    let invalid = || parse_err(2, ParseErrorKind::InvalidProperties(value.to_string()));

    let fields: Vec<&str> = value.split(':').collect();
    if fields.is_empty() || fields.len() % 3 != 0 {
        return Err(invalid());
    }

    let mut offset = 0;
    let mut species = None;
    let mut pos = None;
    for entry in fields.chunks_exact(3) {
        let count: usize = entry[2].parse().map_err(|_| invalid())?;
        match (entry[0].to_ascii_lowercase().as_str(), entry[1]) {
            ("species", "S") if count == 1 => species = Some(offset),
            ("pos", "R") if count == 3 => pos = Some(offset),
            ("species", _) | ("pos", _) => return Err(invalid()),
            _ => {}
        }
        offset += count;
    }

    match (species, pos) {
        (Some(species), Some(pos)) => Ok(Columns { species, pos }),
        _ => Err(invalid()),
    }
}

fn parse_comment(comment: &str) -> Result<Header, TemplateError> {
    const LINE: usize = 2;

    let mut lattice = None;
    let mut pbc = None;
    let mut columns = Columns::default();

    for cap in KEY_VALUE.captures_iter(comment) {
        let key = cap[1].to_ascii_lowercase();
        let value = cap.get(2).or_else(|| cap.get(3)).map_or("", |m| m.as_str());
        match key.as_str() {
            "lattice" => {
                let v = value
                    .split_whitespace()
                    .map(|t| parse_float(LINE, t))
                    .collect::<Result<Vec<_>, _>>()?;
                if v.len() != 9 {
                    return Err(parse_err(LINE, ParseErrorKind::InvalidLattice(v.len())));
                }
                lattice = Some(Lattice::from_rows(
                    Vector3::new(v[0], v[1], v[2]),
                    Vector3::new(v[3], v[4], v[5]),
                    Vector3::new(v[6], v[7], v[8]),
                ));
            }
            "pbc" => {
                let flags = value
                    .split_whitespace()
                    .map(|t| match t {
                        "T" | "t" | "True" | "true" | "1" => Ok(true),
                        "F" | "f" | "False" | "false" | "0" => Ok(false),
                        other => Err(parse_err(LINE, ParseErrorKind::InvalidPbc(other.to_string()))),
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                if flags.len() != 3 {
                    return Err(parse_err(LINE, ParseErrorKind::InvalidPbc(value.to_string())));
                }
                pbc = Some([flags[0], flags[1], flags[2]]);
            }
            "properties" => columns = parse_properties(value)?,
            _ => {}
        }
    }

    // A lattice without explicit pbc means fully periodic.
    let pbc = pbc.unwrap_or(if lattice.is_some() { [true; 3] } else { [false; 3] });
    Ok(Header { lattice, pbc, columns })
}
