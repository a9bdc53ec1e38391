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

//! Producing one CNF instance with an external generator

use crate::config::Labels;
use crate::utils::LastLines;
use anyhow::Context;
use serde::Serialize;
use std::ffi::OsString;
use std::fs::File;
use std::os::unix::process::CommandExt;
use std::os::unix::process::ExitStatusExt;
use std::process::{Command, ExitStatus, Stdio};
use std::time::Duration;
use tracing::trace;

/// How generating one instance went.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    /// exited with status 0
    Success,
    /// exited with nonzero status, or was killed by a signal
    Failed {
        /// exit code if any
        code: Option<i32>,
        /// signal if any
        signal: Option<i32>,
        /// last bytes written on stderr
        stderr: String,
    },
    /// still running after the per instance timeout, and killed
    TimedOut,
    /// could not be started at all
    LaunchFailed {
        /// why
        error: String,
    },
    /// the output file could not be created, the generator was not run
    OutputFailed {
        /// why
        error: String,
    },
    /// exited successfully but the output has no CNF header
    InvalidOutput {
        /// why
        error: String,
    },
}

impl Outcome {
    /// true for [Outcome::Success]
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success)
    }

    fn from_status(status: ExitStatus, stderr: String) -> Self {
        if status.success() {
            Outcome::Success
        } else {
            Outcome::Failed {
                code: status.code(),
                signal: status.signal(),
                stderr,
            }
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Success => write!(f, "success"),
            Outcome::Failed {
                code,
                signal,
                stderr,
            } => write!(
                f,
                "failed with code {:?} signal {:?}: {}",
                code, signal, stderr
            ),
            Outcome::TimedOut => write!(f, "timed out"),
            Outcome::LaunchFailed { error } => write!(f, "could not be launched: {}", error),
            Outcome::OutputFailed { error } => write!(f, "has no output file: {}", error),
            Outcome::InvalidOutput { error } => write!(f, "produced invalid CNF: {}", error),
        }
    }
}

/// Something that writes the CNF encoding of the factoring of `n` to a file.
pub trait CnfGenerator: Sync {
    /// Writes the instance for `n` to `output`.
    ///
    /// Failures of the generator itself are reported in the [Outcome]; `Err`
    /// is reserved for failures of the caller's side.
    fn generate(&self, n: i64, labels: Labels, output: File) -> anyhow::Result<Outcome>;
}

/// Runs `nftocnf <n> <encoding> <multiplier>` with stdout redirected to the output file.
#[derive(Debug, Clone)]
pub struct Nftocnf {
    /// executable, looked up in `PATH` if it has no slash
    pub program: OsString,
    /// kill the process when it runs longer than this
    pub timeout: Option<Duration>,
}

impl Default for Nftocnf {
    fn default() -> Self {
        Nftocnf {
            program: "nftocnf".into(),
            timeout: None,
        }
    }
}

impl Nftocnf {
    /// The command line for instance `n`. No shell is involved.
    pub fn command(&self, n: i64, labels: Labels) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg(n.to_string())
            .arg(labels.encoding.as_str())
            .arg(labels.multiplier.as_str());
        cmd
    }
}

impl CnfGenerator for Nftocnf {
    fn generate(&self, n: i64, labels: Labels, output: File) -> anyhow::Result<Outcome> {
        let mut cmd = self.command(n, labels);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::from(output))
            .stderr(Stdio::piped());
        unsafe {
            cmd.pre_exec(|| prctl::set_death_signal(9).map_err(std::io::Error::from_raw_os_error))
        };
        trace!(?cmd, "starting nftocnf");
        let mut process = match cmd.spawn() {
            Ok(p) => p,
            Err(e) => {
                trace!(n, "failed to run {:?}: {}", &self.program, e);
                return Ok(Outcome::LaunchFailed {
                    error: e.to_string(),
                });
            }
        };
        let stderr = LastLines::new(process.stderr.take().context("nftocnf stderr")?);
        let status = match self.timeout {
            None => Some(process.wait().context("waiting for nftocnf")?),
            Some(t) => crate::utils::try_wait_timeout(&mut process, t)
                .context("waiting for nftocnf")?,
        };
        let status = match status {
            Some(s) => s,
            None => {
                process.kill().context("killing nftocnf")?;
                process.wait().context("reaping nftocnf")?;
                // grandchildren may still hold the pipe, do not wait for EOF
                drop(stderr);
                return Ok(Outcome::TimedOut);
            }
        };
        let stderr = stderr.finish();
        if crate::utils::would_log(tracing::Level::DEBUG) && !stderr.is_empty() {
            tracing::debug!(n, "nftocnf stderr: {}", stderr);
        }
        Ok(Outcome::from_status(status, stderr))
    }
}

/// In-process generator writing `f(n, labels)` verbatim, or failing for the
/// integers listed in `failing`. Meant for tests.
pub struct FnGenerator<F> {
    /// produces the contents of the instance
    pub f: F,
    /// these integers are reported as failed, after writing their contents
    pub failing: Vec<i64>,
}

impl<F: Fn(i64, Labels) -> Vec<u8> + Sync> CnfGenerator for FnGenerator<F> {
    fn generate(&self, n: i64, labels: Labels, mut output: File) -> anyhow::Result<Outcome> {
        use std::io::Write;
        output
            .write_all(&(self.f)(n, labels))
            .with_context(|| format!("writing instance {}", n))?;
        if self.failing.contains(&n) {
            Ok(Outcome::Failed {
                code: Some(1),
                signal: None,
                stderr: format!("cannot factor {}", n),
            })
        } else {
            Ok(Outcome::Success)
        }
    }
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use std::io::Write;
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};

    /// Writes an executable shell script named `nftocnf` in `dir` and returns its path.
    pub(crate) fn fake_nftocnf(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("nftocnf");
        let mut f = File::create(&path).unwrap();
        write!(f, "#!/bin/sh\n{}\n", body).unwrap();
        drop(f);
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn run(gen: &Nftocnf, dir: &Path, n: i64) -> (Outcome, String) {
        let path = dir.join("out.cnf");
        let out = File::create(&path).unwrap();
        let outcome = gen.generate(n, Labels::default(), out).unwrap();
        (outcome, std::fs::read_to_string(&path).unwrap())
    }

    #[test]
    fn arguments_and_stdout() {
        let dir = tempfile::tempdir().unwrap();
        let script = fake_nftocnf(dir.path(), r#"echo "c $1 $2 $3"; echo "p cnf 3 0""#);
        let gen = Nftocnf {
            program: script.into(),
            timeout: None,
        };
        let (outcome, text) = run(&gen, dir.path(), 21);
        assert_eq!(outcome, Outcome::Success);
        assert_eq!(text, "c 21 n-bit carry-save\np cnf 3 0\n");
    }

    #[test]
    fn stderr_not_in_output() {
        let dir = tempfile::tempdir().unwrap();
        let script = fake_nftocnf(dir.path(), "echo partial; echo oops >&2; exit 3");
        let gen = Nftocnf {
            program: script.into(),
            timeout: None,
        };
        let (outcome, text) = run(&gen, dir.path(), 4);
        assert_eq!(text, "partial\n");
        assert_eq!(
            outcome,
            Outcome::Failed {
                code: Some(3),
                signal: None,
                stderr: "oops".into()
            }
        );
    }

    #[test]
    fn missing_program() {
        let dir = tempfile::tempdir().unwrap();
        let gen = Nftocnf {
            program: dir.path().join("does-not-exist").into(),
            timeout: None,
        };
        let (outcome, text) = run(&gen, dir.path(), 4);
        assert!(matches!(outcome, Outcome::LaunchFailed { .. }));
        assert_eq!(text, "");
    }

    #[test]
    fn timeout() {
        let dir = tempfile::tempdir().unwrap();
        let script = fake_nftocnf(dir.path(), "echo start; exec sleep 10");
        let gen = Nftocnf {
            program: script.into(),
            timeout: Some(Duration::from_millis(200)),
        };
        let (outcome, text) = run(&gen, dir.path(), 4);
        assert_eq!(outcome, Outcome::TimedOut);
        assert_eq!(text, "start\n");
    }

    #[test]
    fn command_line() {
        let gen = Nftocnf::default();
        let cmd = gen.command(
            35,
            Labels {
                encoding: crate::config::Encoding::Fast,
                multiplier: crate::config::MultiplierScheme::Recursive,
            },
        );
        assert_eq!(cmd.get_program(), "nftocnf");
        let args: Vec<_> = cmd.get_args().collect();
        assert_eq!(args, ["35", "fast", "recursive"]);
    }
}
