//! Binary persistence of the value and policy grids
//!
//! Format (all integers little-endian):
//! - Header (20 bytes):
//!   - Magic: "VIGRID" (6 bytes)
//!   - Version: u8 (1 byte)
//!   - Element type: u8 (1 byte, 1 = f64, 2 = i8)
//!   - Shape: 3 x u32 (nx, ny, n_theta)
//! - Cell data: nx * ny * n_theta elements in row-major [x][y][theta] order

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tracing::info;

use crate::common::{PlannerError, PlannerResult};

use super::state::{Action, Grid3};

/// Magic bytes for grid files
const MAGIC: &[u8; 6] = b"VIGRID";

/// Current format version
const VERSION: u8 = 1;

/// Header size in bytes
const HEADER_SIZE: usize = 20;

/// Element types that can be stored in a grid file
pub trait GridElement: Copy + Sized {
    /// Type tag written to the header
    const DTYPE: u8;
    /// Encoded size in bytes
    const SIZE: usize;

    fn write_le(self, out: &mut Vec<u8>);
    fn read_le(bytes: &[u8]) -> Self;
}

impl GridElement for f64 {
    const DTYPE: u8 = 1;
    const SIZE: usize = 8;

    fn write_le(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_le_bytes());
    }

    fn read_le(bytes: &[u8]) -> Self {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(bytes);
        f64::from_le_bytes(buf)
    }
}

impl GridElement for i8 {
    const DTYPE: u8 = 2;
    const SIZE: usize = 1;

    fn write_le(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_le_bytes());
    }

    fn read_le(bytes: &[u8]) -> Self {
        i8::from_le_bytes([bytes[0]])
    }
}

/// Write a grid to a writer in grid-file format
pub fn write_grid<T: GridElement, W: Write>(grid: &Grid3<T>, writer: &mut W) -> PlannerResult<()> {
    let mut header = [0u8; HEADER_SIZE];
    header[0..6].copy_from_slice(MAGIC);
    header[6] = VERSION;
    header[7] = T::DTYPE;
    for (k, &dim) in grid.shape().iter().enumerate() {
        let dim = u32::try_from(dim)
            .map_err(|_| PlannerError::Format(format!("dimension {} does not fit in u32", dim)))?;
        header[8 + 4 * k..12 + 4 * k].copy_from_slice(&dim.to_le_bytes());
    }
    writer.write_all(&header)?;

    let mut data = Vec::with_capacity(grid.len() * T::SIZE);
    for &cell in grid.as_slice() {
        cell.write_le(&mut data);
    }
    writer.write_all(&data)?;
    Ok(())
}

/// Read a grid written by `write_grid`
///
/// With `expected_shape` set, a header announcing any other shape is rejected
/// before cell data is read. Cell data is buffered only as it arrives, so a
/// header claiming more cells than the stream holds fails as truncated.
pub fn read_grid<T: GridElement, R: Read>(
    reader: &mut R,
    expected_shape: Option<[usize; 3]>,
) -> PlannerResult<Grid3<T>> {
    let mut header = [0u8; HEADER_SIZE];
    reader
        .read_exact(&mut header)
        .map_err(|e| PlannerError::Format(format!("truncated header: {}", e)))?;

    if &header[0..6] != MAGIC {
        return Err(PlannerError::Format("bad magic bytes".to_string()));
    }
    if header[6] != VERSION {
        return Err(PlannerError::Format(format!(
            "version mismatch: expected {}, found {}",
            VERSION, header[6]
        )));
    }
    if header[7] != T::DTYPE {
        return Err(PlannerError::Format(format!(
            "element type mismatch: expected {}, found {}",
            T::DTYPE, header[7]
        )));
    }

    let mut shape = [0usize; 3];
    for (k, dim) in shape.iter_mut().enumerate() {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(&header[8 + 4 * k..12 + 4 * k]);
        *dim = u32::from_le_bytes(buf) as usize;
    }

    if let Some(expected) = expected_shape {
        if shape != expected {
            return Err(PlannerError::Format(format!(
                "grid has shape {:?}, expected {:?}",
                shape, expected
            )));
        }
    }

    let byte_len = shape[0]
        .checked_mul(shape[1])
        .and_then(|n| n.checked_mul(shape[2]))
        .and_then(|n| n.checked_mul(T::SIZE))
        .and_then(|n| u64::try_from(n).ok())
        .ok_or_else(|| PlannerError::Format(format!("grid shape {:?} is too large", shape)))?;
    let mut bytes = Vec::new();
    reader.by_ref().take(byte_len).read_to_end(&mut bytes)?;
    if (bytes.len() as u64) != byte_len {
        return Err(PlannerError::Format(format!(
            "truncated cell data: expected {} bytes, found {}",
            byte_len,
            bytes.len()
        )));
    }
    let data = bytes.chunks_exact(T::SIZE).map(T::read_le).collect();
    Grid3::from_vec(shape, data)
}

pub fn save_grid<T: GridElement>(grid: &Grid3<T>, path: &Path) -> PlannerResult<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    write_grid(grid, &mut writer)?;
    writer.flush()?;
    Ok(())
}

pub fn load_grid<T: GridElement>(path: &Path, expected_shape: Option<[usize; 3]>) -> PlannerResult<Grid3<T>> {
    let mut reader = BufReader::new(File::open(path)?);
    read_grid(&mut reader, expected_shape)
}

/// Locations of the persisted value and policy grids
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelPaths {
    pub values: PathBuf,
    pub policy: PathBuf,
}

impl ModelPaths {
    pub fn new(values: impl Into<PathBuf>, policy: impl Into<PathBuf>) -> Self {
        Self {
            values: values.into(),
            policy: policy.into(),
        }
    }

    /// `v.vigrid` and `policy.vigrid` inside `dir`
    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join("v.vigrid"), dir.join("policy.vigrid"))
    }

    pub fn exist(&self) -> bool {
        self.values.exists() && self.policy.exists()
    }
}

impl Default for ModelPaths {
    fn default() -> Self {
        Self::new("v.vigrid", "policy.vigrid")
    }
}

/// `<path>.tmp`, next to the final file so the rename stays on one filesystem
fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

/// Write both grids to staging files, then rename them into place
///
/// If either write fails, both staging files are removed and the existing
/// pair on disk is left untouched.
pub fn save_model(values: &Grid3<f64>, policy: &Grid3<i8>, paths: &ModelPaths) -> PlannerResult<()> {
    info!(values = %paths.values.display(), policy = %paths.policy.display(), "saving model");
    let values_tmp = staging_path(&paths.values);
    let policy_tmp = staging_path(&paths.policy);

    let staged = save_grid(values, &values_tmp).and_then(|_| save_grid(policy, &policy_tmp));
    if let Err(e) = staged {
        for tmp in [&values_tmp, &policy_tmp] {
            if tmp.exists() {
                let _ = fs::remove_file(tmp);
            }
        }
        return Err(e);
    }

    fs::rename(&values_tmp, &paths.values)?;
    fs::rename(&policy_tmp, &paths.policy)?;
    Ok(())
}

/// Load both grids; `Ok(None)` when either file is missing
///
/// Both grids must have `expected_shape` and every policy cell must be a
/// valid action id or -1.
pub fn load_model(
    paths: &ModelPaths,
    expected_shape: [usize; 3],
) -> PlannerResult<Option<(Grid3<f64>, Grid3<i8>)>> {
    if !paths.exist() {
        info!("model files not found");
        return Ok(None);
    }
    info!(values = %paths.values.display(), policy = %paths.policy.display(), "loading model");

    let values: Grid3<f64> = load_grid(&paths.values, Some(expected_shape))?;
    let policy: Grid3<i8> = load_grid(&paths.policy, Some(expected_shape))?;
    if let Some(&bad) = policy
        .as_slice()
        .iter()
        .find(|&&p| Action::from_policy_value(p).is_err())
    {
        return Err(PlannerError::Format(format!("policy grid holds invalid action id {}", bad)));
    }
    Ok(Some((values, policy)))
}
