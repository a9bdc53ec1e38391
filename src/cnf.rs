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

//! Checks that a generated instance looks like a DIMACS CNF file.

use anyhow::Context;
use serde::Serialize;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use varisat_dimacs::{DimacsHeader, DimacsParser};

/// The `p cnf <vars> <clauses>` line of a generated instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CnfHeader {
    /// number of variables
    pub var_count: usize,
    /// number of clauses
    pub clause_count: usize,
}

impl From<DimacsHeader> for CnfHeader {
    fn from(h: DimacsHeader) -> Self {
        CnfHeader {
            var_count: h.var_count,
            clause_count: h.clause_count,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct FoundHeader(DimacsHeader);

impl std::fmt::Display for FoundHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> Result<(), std::fmt::Error> {
        write!(f, "{:?}", self)
    }
}

impl std::error::Error for FoundHeader {}

/// aborts parsing as soon as the header is known
fn found_header(p: &mut DimacsParser) -> anyhow::Result<()> {
    match p.header() {
        Some(h) => Err(FoundHeader(h).into()),
        None => Ok(()),
    }
}

/// Returns the header of the CNF formula in argument, but stops parsing as soon as possible.
pub fn read_header_only(read: impl Read) -> anyhow::Result<CnfHeader> {
    match DimacsParser::parse_incremental(read, found_header) {
        Ok(finished) => Ok(finished
            .header()
            .context("no `p cnf` header in formula")?
            .into()),
        Err(e) => match e.downcast_ref::<FoundHeader>() {
            Some(FoundHeader(h)) => Ok((*h).into()),
            None => Err(e),
        },
    }
}

/// Reads the header of the instance stored at `path`.
pub fn check_instance(path: &Path) -> anyhow::Result<CnfHeader> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    read_header_only(BufReader::new(file))
        .with_context(|| format!("parsing CNF header of {}", path.display()))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn header_of_instance() {
        let h = read_header_only(&b"c factoring 15\np cnf 12 13\n1 -2 0\n"[..]).unwrap();
        assert_eq!(
            h,
            CnfHeader {
                var_count: 12,
                clause_count: 13
            }
        );
    }

    #[test]
    fn missing_header() {
        assert!(read_header_only(&b""[..]).is_err());
        assert!(read_header_only(&b"sh: 1: nftocnf: not found\n"[..]).is_err());
    }
}
