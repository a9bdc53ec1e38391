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

//! Misc utils.

use std::io::Read;
use std::process::{Child, ExitStatus};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

const SIZE: usize = 1024;

/// A buffer that contains at least the 512 last bytes read.
struct RingBuffer {
    data: [u8; SIZE],
    end: usize,
    error: Option<std::io::ErrorKind>,
}

impl RingBuffer {
    fn new() -> Self {
        Self {
            data: [0; SIZE],
            end: 0,
            error: None,
        }
    }

    /// Appends `chunk`, forgetting the oldest half when full.
    fn push(&mut self, chunk: &[u8]) {
        let half = SIZE / 2;
        if self.end + chunk.len() > SIZE {
            let keep = half.min(self.end);
            self.data.copy_within((self.end - keep)..self.end, 0);
            self.end = keep;
        }
        self.data[self.end..(self.end + chunk.len())].copy_from_slice(chunk);
        self.end += chunk.len();
    }
}

/// Drains the reading end of a pipe (typically the stderr of a child) on a
/// thread, so that the child never blocks on a full pipe. Only the 512 to
/// 1024 last bytes and the first error are kept.
pub struct LastLines {
    buf: Arc<Mutex<RingBuffer>>,
    thread: Option<JoinHandle<()>>,
}

impl LastLines {
    /// Spawns a thread consuming `read` until EOF or error.
    pub fn new<R: Read + Send + 'static>(mut read: R) -> Self {
        let buf = Arc::new(Mutex::new(RingBuffer::new()));
        let shared = buf.clone();
        let thread = std::thread::spawn(move || {
            let mut chunk = [0; SIZE / 2];
            loop {
                let res = read.read(&mut chunk);
                let mut inner = shared.lock().expect("poisoned lock");
                match res {
                    Ok(0) => break,
                    Ok(n) => inner.push(&chunk[..n]),
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                    Err(e) => {
                        inner.error = Some(e.kind());
                        break;
                    }
                }
            }
        });
        Self {
            buf,
            thread: Some(thread),
        }
    }

    /// peek at the currently last bytes read.
    pub fn get(&self) -> (Vec<u8>, std::io::Result<()>) {
        let inner = self.buf.lock().expect("poisoned lock");
        let err = match inner.error {
            None => Ok(()),
            Some(kind) => Err(kind.into()),
        };
        (inner.data[..inner.end].to_owned(), err)
    }

    /// Waits for the reader to reach EOF, then returns the last bytes as text.
    /// The writing end must be closed (child exited or killed) or this blocks.
    pub fn finish(mut self) -> String {
        if let Some(t) = self.thread.take() {
            let _ignore = t.join();
        }
        let (text, _) = self.get();
        String::from_utf8_lossy(&text).trim_end().to_owned()
    }
}

/// Waits for a process for at most the specified duration.
/// Returns `None` if it is still running at the deadline.
pub fn try_wait_timeout(
    process: &mut Child,
    timeout: Duration,
) -> std::io::Result<Option<ExitStatus>> {
    let start = Instant::now();
    let interval = Duration::from_millis(50);
    loop {
        if let Some(status) = process.try_wait()? {
            return Ok(Some(status));
        }
        let waited = start.elapsed();
        if waited >= timeout {
            return Ok(None);
        }
        std::thread::sleep(interval.min(timeout - waited));
    }
}

/// Returns whether a message with this level would be printed
pub fn would_log(level: tracing::Level) -> bool {
    level <= tracing::level_filters::LevelFilter::current()
}

#[cfg(test)]
mod test {
    use super::*;

    /// yields `0\n1\n...count\n` in small reads
    struct Counter {
        next: usize,
        count: usize,
        pending: Vec<u8>,
    }

    impl Read for Counter {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.pending.is_empty() {
                if self.next > self.count {
                    return Ok(0);
                }
                self.pending = format!("{}\n", self.next).into_bytes();
                self.next += 1;
            }
            let n = buf.len().min(self.pending.len());
            buf[..n].copy_from_slice(&self.pending[..n]);
            self.pending.drain(..n);
            Ok(n)
        }
    }

    #[test]
    fn last_lines() {
        let lines = LastLines::new(Counter {
            next: 0,
            count: 100_000,
            pending: Vec::new(),
        });
        let txt = lines.finish();
        assert!(txt.ends_with("99999\n100000"));
        assert!(txt.len() <= SIZE);
    }

    #[test]
    fn last_lines_short() {
        let lines = LastLines::new(&b"nftocnf: bad multiplier\n"[..]);
        assert_eq!(lines.finish(), "nftocnf: bad multiplier");
    }

    #[test]
    fn wait_timeout() {
        let mut child = std::process::Command::new("sleep")
            .arg("5")
            .spawn()
            .unwrap();
        let res = try_wait_timeout(&mut child, Duration::from_millis(100)).unwrap();
        assert!(res.is_none());
        child.kill().unwrap();
        child.wait().unwrap();
        let mut child = std::process::Command::new("true").spawn().unwrap();
        let res = try_wait_timeout(&mut child, Duration::from_secs(5)).unwrap();
        assert!(res.unwrap().success());
    }
}
