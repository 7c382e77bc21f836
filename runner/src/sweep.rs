use crate::{
    collector::collect_maps,
    config::{value_lists, ConfigErrors, SweepConfig},
    deck::{template, FilenameFormats, JobConfig},
    ram::{estimate_all, EstimateError},
};
use itertools::Itertools;
use std::{collections::BTreeMap, path::PathBuf};
use thiserror::Error;
use tracing::{debug, info};

/// deck keyword holding the aperture map path
pub const MAP_KEYWORD: &str = "APER-MAP";
/// format argument holding the aperture map file stem
pub const MAP_NAME: &str = "apmap";

/// parameter name -> candidate values
pub type ParamLists = BTreeMap<String, Vec<String>>;
/// parameter name -> concrete value
pub type ParamSet = BTreeMap<String, String>;
/// rendered case identifier -> parameter overrides
pub type CaseOverrides = BTreeMap<String, ParamLists>;

#[derive(Debug, Error)]
pub enum SweepError {
    #[error(transparent)]
    Config(#[from] ConfigErrors),
    #[error(transparent)]
    Estimate(#[from] EstimateError),
}

/// Cartesian product of all non-empty value lists in sorted key order, one map
/// per combination. Parameters with an empty list are dropped, no remaining
/// parameter means no combination at all.
pub fn combine_parameters(lists: &ParamLists) -> Vec<ParamSet> {
    let used = lists
        .iter()
        .filter(|(_, values)| !values.is_empty())
        .collect_vec();

    if used.is_empty() {
        return Vec::new();
    }

    used.iter()
        .map(|(_, values)| values.iter())
        .multi_cartesian_product()
        .map(|combination| {
            used.iter()
                .map(|(key, _)| (*key).clone())
                .zip(combination.into_iter().cloned())
                .collect()
        })
        .collect()
}

/// overlay `overrides` on `base`, empty override lists keep the base values
pub fn merge_parameters(base: &ParamLists, overrides: &ParamLists) -> ParamLists {
    let mut merged = base.clone();

    for (key, values) in overrides {
        if !values.is_empty() {
            merged.insert(key.clone(), values.clone());
        }
    }

    merged
}

/// Parameter sets for every case. Without an identifier the defaults are the
/// only case, otherwise one case per rendered identifier with the identifier
/// parameters pinned and matching overrides applied.
fn cases(
    defaults: &ParamLists,
    case_identifier: Option<&str>,
    case_overrides: &CaseOverrides,
) -> Result<Vec<ParamLists>, ConfigErrors> {
    let Some(identifier) = case_identifier.filter(|identifier| !identifier.is_empty()) else {
        return Ok(vec![defaults.clone()]);
    };

    let mut restricted = ParamLists::new();
    for key in template::placeholders(identifier) {
        match defaults.get(&key) {
            Some(values) => {
                restricted.insert(key, values.clone());
            }
            None => {
                return Err(ConfigErrors::MissingFormatKey {
                    key,
                    template: identifier.to_string(),
                })
            }
        }
    }

    combine_parameters(&restricted)
        .into_iter()
        .map(|combination| {
            let name = template::render(identifier, |key| combination.get(key).cloned())
                .map_err(|missing| ConfigErrors::MissingFormatKey {
                    key: missing.0,
                    template: identifier.to_string(),
                })?;

            let mut case = defaults.clone();
            for (key, value) in &combination {
                case.insert(key.clone(), vec![value.clone()]);
            }

            match case_overrides.get(&name) {
                Some(overrides) => {
                    debug!(case = %name, "Applying case specific parameters");
                    Ok(merge_parameters(&case, overrides))
                }
                None => Ok(case),
            }
        })
        .collect()
}

/// Clone `template` once per parameter combination of every case, apply the
/// combination and render the output paths.
pub fn generate_jobs(
    template: &JobConfig,
    defaults: &ParamLists,
    formats: &FilenameFormats,
    case_identifier: Option<&str>,
    case_overrides: &CaseOverrides,
) -> Result<Vec<JobConfig>, ConfigErrors> {
    let mut jobs = Vec::new();

    for case in cases(defaults, case_identifier, case_overrides)? {
        for combination in combine_parameters(&case) {
            let mut job = template.clone_with_formats(Some(formats));
            job.apply_parameters(&combination);
            job.render_output_paths(false)?;

            jobs.push(job);
        }
    }

    Ok(jobs)
}

/// Expand a whole sweep file into jobs annotated with their RAM requirement.
pub fn plan_jobs(
    config: &SweepConfig,
    template: &JobConfig,
    ram_budget: f64,
) -> Result<Vec<JobConfig>, SweepError> {
    let defaults = value_lists(&config.defaults.parameters)?;
    let case_overrides = config
        .case_parameters
        .iter()
        .map(|(name, params)| Ok((name.clone(), value_lists(params)?)))
        .collect::<Result<CaseOverrides, ConfigErrors>>()?;

    let mut jobs = Vec::new();
    let mut maps: Vec<PathBuf> = Vec::new();

    for entry in &config.maps {
        let overrides = value_lists(&entry.parameters)?;
        let mut formats = config.defaults.formats.clone();
        formats.extend(entry.formats.clone());

        for map in collect_maps(&entry.path, &config.base_dir)? {
            let mut params = merge_parameters(&defaults, &overrides);
            params.insert(
                MAP_KEYWORD.to_string(),
                vec![map.to_string_lossy().into_owned()],
            );
            params.insert(
                MAP_NAME.to_string(),
                vec![map
                    .file_stem()
                    .map(|stem| stem.to_string_lossy().into_owned())
                    .unwrap_or_default()],
            );

            let generated = generate_jobs(
                template,
                &params,
                &formats,
                config.case_identifier.as_deref(),
                &case_overrides,
            )?;

            debug!(map = ?map, jobs = generated.len(), "Generated jobs for map");
            maps.extend(std::iter::repeat(map).take(generated.len()));
            jobs.extend(generated);
        }
    }

    let estimates = estimate_all(&maps, ram_budget, config.executor.suppress_ram_errors)?;
    for (job, ram) in jobs.iter_mut().zip(estimates) {
        job.set_ram_requirement(ram);
    }

    info!(jobs = jobs.len(), maps = config.maps.len(), "Planned sweep");

    Ok(jobs)
}
