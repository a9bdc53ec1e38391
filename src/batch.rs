/**************************************************************************/
/*  This file is part of NFGEN.                                           */
/*                                                                        */
/*  Copyright (C) 2025                                                    */
/*    CEA (Commissariat à l'énergie atomique et aux énergies              */
/*         alternatives)                                                  */
/*                                                                        */
/*  you can redistribute it and/or modify it under the terms of the GNU   */
/*  Lesser General Public License as published by the Free Software       */
/*  Foundation, version 2.1.                                              */
/*                                                                        */
/*  It is distributed in the hope that it will be useful,                 */
/*  but WITHOUT ANY WARRANTY; without even the implied warranty of        */
/*  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the         */
/*  GNU Lesser General Public License for more details.                   */
/*                                                                        */
/*  See the GNU Lesser General Public License version 2.1                 */
/*  for more details (enclosed in the file licenses/LGPLv2.1).            */
/*                                                                        */
/**************************************************************************/

//! Generating a range of factoring instances

use crate::cnf::{check_instance, CnfHeader};
use crate::config::Labels;
use crate::generator::{CnfGenerator, Outcome};
use anyhow::Context;
use itertools::Itertools;
use rayon::prelude::*;
use serde::Serialize;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, trace, warn};

/// The integers `bottom..top` to generate instances for. Empty when `bottom >= top`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FactorRange {
    /// first integer, included
    pub bottom: i64,
    /// last integer, excluded
    pub top: i64,
}

impl FactorRange {
    /// `bottom..top`
    pub fn new(bottom: i64, top: i64) -> Self {
        FactorRange { bottom, top }
    }

    /// Whether no instance is to be generated
    pub fn is_empty(&self) -> bool {
        self.bottom >= self.top
    }

    /// Number of instances, `top - bottom` or 0
    pub fn len(&self) -> u64 {
        if self.is_empty() {
            0
        } else {
            self.top.wrapping_sub(self.bottom) as u64
        }
    }

    /// The integers in ascending order
    pub fn iter(&self) -> std::ops::Range<i64> {
        if self.bottom <= self.top {
            self.bottom..self.top
        } else {
            0..0
        }
    }
}

/// Knobs of a batch
#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// where instances are written
    pub output_dir: PathBuf,
    /// number of instances generated at the same time
    pub jobs: usize,
    /// check that outputs have a DIMACS header
    pub validate: bool,
}

impl Default for BatchOptions {
    fn default() -> Self {
        BatchOptions {
            output_dir: ".".into(),
            jobs: 1,
            validate: false,
        }
    }
}

/// What happened to one integer of the range
#[derive(Debug, Clone, Serialize)]
pub struct InstanceReport {
    /// the number to factor
    pub n: i64,
    /// the file holding the instance
    pub path: PathBuf,
    /// how generation went
    pub outcome: Outcome,
    /// wall clock time spent generating
    pub duration_ms: u64,
    /// only with [BatchOptions::validate]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub header: Option<CnfHeader>,
}

/// What happened to a whole range
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    /// labels used for every instance
    pub labels: Labels,
    /// the range
    pub range: FactorRange,
    /// one per integer, by increasing `n`
    pub instances: Vec<InstanceReport>,
}

impl BatchReport {
    /// Number of successfully generated instances
    pub fn succeeded(&self) -> usize {
        self.instances
            .iter()
            .filter(|i| i.outcome.is_success())
            .count()
    }

    /// Instances which could not be generated
    pub fn failures(&self) -> impl Iterator<Item = &InstanceReport> {
        self.instances.iter().filter(|i| !i.outcome.is_success())
    }

    /// Fails unless every instance was generated successfully.
    pub fn ensure_success(&self) -> anyhow::Result<()> {
        let failed: Vec<i64> = self.failures().map(|i| i.n).collect();
        anyhow::ensure!(
            failed.is_empty(),
            "{} of {} instances could not be generated: {}",
            failed.len(),
            self.instances.len(),
            failed.iter().format(", ")
        );
        Ok(())
    }
}

impl std::fmt::Display for BatchReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{} instances generated ({}, {})",
            self.succeeded(),
            self.instances.len(),
            self.labels.encoding,
            self.labels.multiplier
        )
    }
}

fn generate_one<G: CnfGenerator + ?Sized>(
    n: i64,
    labels: Labels,
    generator: &G,
    options: &BatchOptions,
) -> anyhow::Result<InstanceReport> {
    let _span = tracing::trace_span!("instance", n, timing = true).entered();
    let path = options.output_dir.join(labels.file_name(n));
    let start = Instant::now();
    // created before the generator runs, so it exists even if the generator cannot be launched
    let mut outcome = match File::create(&path) {
        Ok(output) => generator
            .generate(n, labels, output)
            .with_context(|| format!("generating instance for {}", n))?,
        Err(e) => Outcome::OutputFailed {
            error: format!("creating {}: {}", path.display(), e),
        },
    };
    let duration_ms = start.elapsed().as_millis() as u64;
    let mut header = None;
    if options.validate && outcome.is_success() {
        match check_instance(&path) {
            Ok(h) => header = Some(h),
            Err(e) => {
                outcome = Outcome::InvalidOutput {
                    error: format!("{:#}", e),
                }
            }
        }
    }
    if outcome.is_success() {
        trace!(n, path = %path.display(), duration_ms, "generated instance");
    } else {
        warn!(n, path = %path.display(), "instance {}", outcome);
    }
    trace!(instance_ms = duration_ms, stats = true);
    Ok(InstanceReport {
        n,
        path,
        outcome,
        duration_ms,
        header,
    })
}

/// Writes one instance per integer of `range` to `options.output_dir`, named
/// `nf.<n>.<encoding>.<multiplier>.cnf`, whatever the outcome of each instance.
/// Instances that could not be generated are only logged; use
/// [BatchReport::ensure_success] to treat them as errors.
///
/// `Err` is only returned for problems on our side (output directory, options).
pub fn generate<G: CnfGenerator + ?Sized>(
    range: FactorRange,
    labels: Labels,
    generator: &G,
    options: &BatchOptions,
) -> anyhow::Result<BatchReport> {
    anyhow::ensure!(options.jobs > 0, "at least one job is needed");
    let mut report = BatchReport {
        labels,
        range,
        instances: Vec::new(),
    };
    if range.is_empty() {
        debug!(bottom = range.bottom, top = range.top, "empty range, nothing to do");
        return Ok(report);
    }
    ensure_dir(&options.output_dir)?;
    let _span = tracing::debug_span!("batch", timing = true).entered();
    report.instances = if options.jobs == 1 {
        range
            .iter()
            .map(|n| generate_one(n, labels, generator, options))
            .collect::<anyhow::Result<Vec<_>>>()?
    } else {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(options.jobs)
            .build()
            .context("creating worker pool")?;
        pool.install(|| {
            range
                .iter()
                .into_par_iter()
                .map(|n| generate_one(n, labels, generator, options))
                .collect::<anyhow::Result<Vec<_>>>()
        })?
    };
    report.instances.sort_by_key(|i| i.n);
    trace!(
        instances = report.instances.len() as u64,
        failed = report.failures().count() as u64,
        stats = true
    );
    Ok(report)
}

fn ensure_dir(dir: &Path) -> anyhow::Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("creating output directory {}", dir.display()))
}
