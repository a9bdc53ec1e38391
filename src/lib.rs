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

#![warn(missing_docs)]

//! Generates number factoring CNF benchmarks by running `nftocnf` on a range of integers

pub mod batch;
pub mod cnf;
pub mod config;
pub mod generator;
pub mod stats;
pub mod utils;

use anyhow::Context;
use batch::{BatchOptions, BatchReport, FactorRange};
use chrono::Duration;
use config::{Encoding, Labels, MultiplierScheme};
use generator::Nftocnf;
use nix::sys::resource::{getrusage, UsageWho};
use std::cell::RefCell;
use std::fs::File;
use std::ops::DerefMut;
use std::path::PathBuf;
use std::time::Instant;
use structopt::clap::AppSettings;
use structopt::StructOpt;

fn parse_duration(txt: &str) -> anyhow::Result<Duration> {
    let n: i64 = txt.parse()?;
    anyhow::ensure!(n > 0, "timeout must be a positive number of milliseconds");
    let duration = Duration::try_milliseconds(n).context("timeout out of range")?;
    anyhow::ensure!(
        chrono::Utc::now().checked_add_signed(duration).is_some(),
        "timeout too far in the future"
    );
    Ok(duration)
}

#[derive(Debug)]
/// Writes the batch report in json to a file.
pub struct ResultWriter {
    file: RefCell<File>,
    path: PathBuf,
}

impl ResultWriter {
    fn write(&self, report: &BatchReport) -> anyhow::Result<()> {
        serde_json::to_writer_pretty(self.file.borrow_mut().deref_mut(), report)
            .with_context(|| format!("writing report to {}", self.path.display()))
    }
}

impl From<&std::ffi::OsStr> for ResultWriter {
    fn from(path: &std::ffi::OsStr) -> ResultWriter {
        let path: PathBuf = path.into();
        let file = match File::create(&path) {
            Ok(f) => RefCell::new(f),
            Err(e) => {
                tracing::error!(
                    "failed to open {} to write the report (--json option): {}",
                    path.display(),
                    e
                );
                std::process::exit(1);
            }
        };
        ResultWriter { path, file }
    }
}

/// Configuration options
#[derive(Debug, StructOpt)]
#[structopt(
    name = "nfgen",
    about = "Generates number factoring CNF instances nf.<n>.<encoding>.<multiplier>.cnf with nftocnf",
    setting = AppSettings::AllowNegativeNumbers
)]
pub struct Opt {
    /// First number to factor (included)
    bottom: i64,

    /// Last number to factor (excluded). Nothing is done if it is not above bottom.
    top: i64,

    #[structopt(possible_values = Encoding::VARIANTS, case_insensitive = true, default_value = "n-bit", short, long)]
    /// How nftocnf represents the number
    encoding: Encoding,

    #[structopt(possible_values = MultiplierScheme::VARIANTS, case_insensitive = true, default_value = "carry-save", short, long)]
    /// Which multiplier circuit nftocnf builds
    multiplier: MultiplierScheme,

    /// Directory where instances are written, created if needed
    #[structopt(short, long, parse(from_os_str), default_value = ".")]
    output_dir: PathBuf,

    /// nftocnf executable
    #[structopt(long, parse(from_os_str), default_value = "nftocnf")]
    program: PathBuf,

    /// Fail (with nonzero exit code) if some instance could not be generated.
    ///
    /// By default, failures of nftocnf are only logged.
    #[structopt(long)]
    strict: bool,

    /// Number of nftocnf processes running at the same time
    #[structopt(short, long, default_value = "1")]
    jobs: usize,

    /// Kill nftocnf after this many milliseconds, for each instance
    #[structopt(long, parse(try_from_str = parse_duration))]
    instance_timeout: Option<Duration>,

    /// Global timeout, in milliseconds. Return code is 42 on timeout.
    #[structopt(short = "T", long, parse(try_from_str = parse_duration))]
    timeout: Option<Duration>,

    /// Check that each instance starts with a DIMACS `p cnf` header
    #[structopt(long)]
    validate: bool,

    /// JSON report to the specified file
    #[structopt(long, parse(from_os_str))]
    json: Option<ResultWriter>,

    /// Enable debug output
    #[structopt(short, long)]
    debug: bool,

    /// Output some stats to this file
    #[structopt(long, parse(from_os_str))]
    stats: Option<PathBuf>,
}

impl Opt {
    fn labels(&self) -> Labels {
        Labels {
            encoding: self.encoding,
            multiplier: self.multiplier,
        }
    }

    fn generator(&self) -> anyhow::Result<Nftocnf> {
        let timeout = match self.instance_timeout {
            Some(t) => Some(t.to_std().context("negative --instance-timeout")?),
            None => None,
        };
        Ok(Nftocnf {
            program: self.program.clone().into_os_string(),
            timeout,
        })
    }

    fn batch_options(&self) -> BatchOptions {
        BatchOptions {
            output_dir: self.output_dir.clone(),
            jobs: self.jobs,
            validate: self.validate,
        }
    }
}

fn setup_tracing(opt: &Opt) -> anyhow::Result<Option<stats::StatsLayer>> {
    use tracing::Level;
    use tracing_subscriber::filter::LevelFilter;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::prelude::*;
    let min_level = if opt.debug { Level::TRACE } else { Level::INFO };
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(LevelFilter::from_level(min_level));
    let subscriber = tracing_subscriber::Registry::default().with(fmt_layer);
    #[cfg(feature = "tracy")]
    let subscriber = subscriber.with(tracing_tracy::TracyLayer::new());
    let subscriber_with_stats: Box<dyn tracing::Subscriber + 'static + Send + Sync>;
    let stats_layer = match opt.stats.as_ref() {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("cannot open {} for writing stats", path.display()))?;
            let stats_layer = stats::StatsLayer::new(file);
            subscriber_with_stats = Box::new(subscriber.with(stats_layer.clone()));
            Some(stats_layer)
        }
        None => {
            subscriber_with_stats = Box::new(subscriber);
            None
        }
    };
    tracing::subscriber::set_global_default(subscriber_with_stats)
        .context("setting default tracing collector")?;
    Ok(stats_layer)
}

/// entrypoint of the binary
pub fn run() -> anyhow::Result<()> {
    let opt = Opt::from_args();
    let start_time = Instant::now();
    let stats = setup_tracing(&opt)?;
    let timer_stats = stats.clone();
    let global_stats = move || {
        // max rss of the largest child, so presumably the biggest nftocnf run
        let max_rss_nftocnf_kb = match getrusage(UsageWho::RUSAGE_CHILDREN) {
            Ok(usage) => usage.max_rss(),
            Err(e) => {
                tracing::warn!("failed to get children memory usage: {}", e);
                0
            }
        };
        tracing::trace!(
            wall_time_ms = start_time.elapsed().as_millis() as u64,
            max_rss_nftocnf_kb,
            stats = true
        );
    };
    let timer = opt.timeout.map(|duration| {
        let timer = timer::Timer::new();
        let giveup = move || {
            global_stats();
            tracing::warn!(timeout = true, stats = true);
            if let Some(s) = timer_stats.as_ref() {
                s.dump()
            }
            std::process::exit(42)
        };
        // the guard returned by schedule_with_delay must be ignored otherwise it is cancelled on
        // drop
        timer.schedule_with_delay(duration, giveup).ignore();
        // the timer must not be dropped, otherwise everything is cancelled
        timer
    });
    let range = FactorRange::new(opt.bottom, opt.top);
    let report = batch::generate(
        range,
        opt.labels(),
        &opt.generator()?,
        &opt.batch_options(),
    )
    .with_context(|| format!("generating instances for {}..{}", opt.bottom, opt.top))?;
    drop(timer);
    global_stats();
    tracing::trace!(timeout = false, stats = true);
    if let Some(s) = stats {
        s.dump()
    }
    if let Some(writer) = &opt.json {
        writer.write(&report)?;
    } else if !range.is_empty() {
        println!("{}", report);
    }
    if opt.strict {
        report.ensure_success()?;
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    fn parse(args: &[&str]) -> Result<Opt, structopt::clap::Error> {
        Opt::from_iter_safe(std::iter::once("nfgen").chain(args.iter().copied()))
    }

    #[test]
    fn defaults() {
        let opt = parse(&["3", "6"]).unwrap();
        assert_eq!((opt.bottom, opt.top), (3, 6));
        assert_eq!(opt.labels(), Labels::default());
        assert_eq!(opt.labels().encoding, Encoding::NBit);
        assert_eq!(opt.labels().multiplier, MultiplierScheme::CarrySave);
        assert_eq!(opt.program, PathBuf::from("nftocnf"));
        assert_eq!(opt.output_dir, PathBuf::from("."));
        assert!(!opt.strict);
        let options = opt.batch_options();
        assert_eq!(options.jobs, 1);
        assert!(!options.validate);
        assert!(opt.generator().unwrap().timeout.is_none());
    }

    #[test]
    fn bounds_must_be_integers() {
        assert!(parse(&["abc", "5"]).is_err());
        assert!(parse(&["1", "5.5"]).is_err());
        assert!(parse(&["1"]).is_err());
        assert!(parse(&[]).is_err());
        assert!(parse(&["1", "2", "3"]).is_err());
    }

    #[test]
    fn negative_bounds() {
        let opt = parse(&["-3", "2"]).unwrap();
        assert_eq!((opt.bottom, opt.top), (-3, 2));
        let opt = parse(&["-10", "-20"]).unwrap();
        assert_eq!((opt.bottom, opt.top), (-10, -20));
    }

    #[test]
    fn labels() {
        let opt = parse(&["1", "2", "-e", "FAST", "--multiplier", "Wallace"]).unwrap();
        assert_eq!(
            opt.labels(),
            Labels {
                encoding: Encoding::Fast,
                multiplier: MultiplierScheme::Wallace
            }
        );
        assert!(parse(&["1", "2", "-e", "slow"]).is_err());
        assert!(parse(&["1", "2", "-m", "booth"]).is_err());
    }

    #[test]
    fn timeouts() {
        let opt = parse(&["1", "2", "--instance-timeout", "250", "-T", "1000"]).unwrap();
        assert_eq!(
            opt.generator().unwrap().timeout,
            Some(std::time::Duration::from_millis(250))
        );
        assert_eq!(opt.timeout, Some(Duration::milliseconds(1000)));
        assert!(parse(&["1", "2", "-T", "0"]).is_err());
        assert!(parse(&["1", "2", "-T", "-5"]).is_err());
        assert!(parse(&["1", "2", "-T", &i64::MIN.to_string()]).is_err());
        assert!(parse(&["1", "2", "-T", &i64::MAX.to_string()]).is_err());
        assert!(parse(&["1", "2", "--instance-timeout", "soon"]).is_err());
    }

    #[test]
    fn batch_options() {
        let opt = parse(&["1", "2", "-j", "4", "--validate", "-o", "out", "--strict"]).unwrap();
        let options = opt.batch_options();
        assert_eq!(options.jobs, 4);
        assert!(options.validate);
        assert_eq!(options.output_dir, PathBuf::from("out"));
        assert!(opt.strict);
    }
}
