use rayon::prelude::*;
use std::{
    collections::{BTreeMap, BTreeSet},
    fs::File,
    io::{BufRead, BufReader},
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::{debug, warn};

pub const RAM_COEFFICIENT: f64 = 0.00505193;
pub const RAM_EXPONENT: f64 = 0.72578813;
const KB_PER_GB: f64 = (1u64 << 20) as f64;

#[derive(Debug, Error)]
pub enum EstimateError {
    #[error("Failed to read aperture map {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Aperture map {0:?} contains no data")]
    EmptyMap(PathBuf),
    #[error(
        "Aperture map {map:?} needs an estimated {required:.3} GB of RAM, \
         {shortfall:.3} GB more than the budget of {budget:.3} GB",
        shortfall = .required - .budget
    )]
    Exhausted {
        map: PathBuf,
        required: f64,
        budget: f64,
    },
}

/// Read the extent of an aperture map as `(nx, nz)`. Rows are the non-empty
/// lines, columns the comma or whitespace separated values of the first row.
pub fn map_extent(path: &Path) -> Result<(usize, usize), EstimateError> {
    let read_error = |source| EstimateError::Read {
        path: path.to_path_buf(),
        source,
    };
    let reader = BufReader::new(File::open(path).map_err(read_error)?);

    let mut nx = 0;
    let mut nz = 0;

    for line in reader.lines() {
        let line = line.map_err(read_error)?;
        let line = line.trim();

        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if nz == 0 {
            nx = line
                .split(|c: char| c == ',' || c.is_whitespace())
                .filter(|value| !value.is_empty())
                .count();
        }
        nz += 1;
    }

    if nx == 0 || nz == 0 {
        return Err(EstimateError::EmptyMap(path.to_path_buf()));
    }

    Ok((nx, nz))
}

/// empirical power law `c1 * cells^c2` in KB, returned in GB
pub fn estimate_cells(cells: usize) -> f64 {
    RAM_COEFFICIENT * (cells as f64).powf(RAM_EXPONENT) / KB_PER_GB
}

/// estimated RAM in GB for a single map
pub fn estimate(path: &Path) -> Result<f64, EstimateError> {
    let (nx, nz) = map_extent(path)?;
    let ram = estimate_cells(nx * nz);

    debug!(map = ?path, nx, nz, ram, "Estimated RAM requirement");

    Ok(ram)
}

/// Estimate every map, reading each distinct file only once. Estimates above
/// `budget` fail the whole call unless `suppress_errors` is set, in which case
/// they are returned as is.
pub fn estimate_all<P: AsRef<Path> + Sync>(
    maps: &[P],
    budget: f64,
    suppress_errors: bool,
) -> Result<Vec<f64>, EstimateError> {
    let distinct: BTreeSet<&Path> = maps.iter().map(AsRef::as_ref).collect();

    let estimates = distinct
        .into_par_iter()
        .map(|map| estimate(map).map(|ram| (map, ram)))
        .collect::<Result<BTreeMap<_, _>, _>>()?;

    for (map, &required) in &estimates {
        if required > budget {
            if suppress_errors {
                warn!(
                    map = ?map,
                    required,
                    budget,
                    "RAM estimate exceeds the budget, jobs for this map will never start"
                );
            } else {
                return Err(EstimateError::Exhausted {
                    map: map.to_path_buf(),
                    required,
                    budget,
                });
            }
        }
    }

    Ok(maps
        .iter()
        .map(|map| estimates[map.as_ref()])
        .collect())
}
