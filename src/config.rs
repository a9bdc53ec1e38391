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

//! Labels selecting how `nftocnf` encodes a factoring instance.

use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Bit representation of the number to factor
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum Encoding {
    /// `n-bit`
    #[serde(rename = "n-bit")]
    NBit,
    /// `fast`
    #[serde(rename = "fast")]
    Fast,
}

/// Construction of the multiplier circuit
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum MultiplierScheme {
    /// `carry-save`
    #[serde(rename = "carry-save")]
    CarrySave,
    /// `wallace`
    #[serde(rename = "wallace")]
    Wallace,
    /// `recursive`
    #[serde(rename = "recursive")]
    Recursive,
}

impl Encoding {
    /// Spellings accepted on the command line, also passed verbatim to `nftocnf`.
    pub const VARIANTS: &'static [&'static str] = &["n-bit", "fast"];

    /// the label as `nftocnf` expects it
    pub fn as_str(self) -> &'static str {
        match self {
            Encoding::NBit => "n-bit",
            Encoding::Fast => "fast",
        }
    }
}

impl MultiplierScheme {
    /// Spellings accepted on the command line, also passed verbatim to `nftocnf`.
    pub const VARIANTS: &'static [&'static str] = &["carry-save", "wallace", "recursive"];

    /// the label as `nftocnf` expects it
    pub fn as_str(self) -> &'static str {
        match self {
            MultiplierScheme::CarrySave => "carry-save",
            MultiplierScheme::Wallace => "wallace",
            MultiplierScheme::Recursive => "recursive",
        }
    }
}

impl Default for Encoding {
    fn default() -> Self {
        Encoding::NBit
    }
}

impl Default for MultiplierScheme {
    fn default() -> Self {
        MultiplierScheme::CarrySave
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for MultiplierScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Encoding {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "n-bit" => Ok(Encoding::NBit),
            "fast" => Ok(Encoding::Fast),
            x => anyhow::bail!(
                "unknown encoding {}, expected one of {:?}",
                x,
                Self::VARIANTS
            ),
        }
    }
}

impl FromStr for MultiplierScheme {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "carry-save" => Ok(MultiplierScheme::CarrySave),
            "wallace" => Ok(MultiplierScheme::Wallace),
            "recursive" => Ok(MultiplierScheme::Recursive),
            x => anyhow::bail!(
                "unknown multiplier scheme {}, expected one of {:?}",
                x,
                Self::VARIANTS
            ),
        }
    }
}

/// The two labels parameterizing every `nftocnf` invocation of a batch.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, Serialize)]
pub struct Labels {
    /// bit representation
    pub encoding: Encoding,
    /// multiplier circuit
    pub multiplier: MultiplierScheme,
}

impl Labels {
    /// Name of the file holding the instance for `n`: `nf.<n>.<encoding>.<multiplier>.cnf`
    pub fn file_name(&self, n: i64) -> String {
        format!("nf.{}.{}.{}.cnf", n, self.encoding, self.multiplier)
    }
}

#[test]
fn file_names() {
    let labels = Labels::default();
    assert_eq!(labels.file_name(3), "nf.3.n-bit.carry-save.cnf");
    assert_eq!(labels.file_name(-2), "nf.-2.n-bit.carry-save.cnf");
    let labels = Labels {
        encoding: Encoding::Fast,
        multiplier: MultiplierScheme::Wallace,
    };
    assert_eq!(labels.file_name(143), "nf.143.fast.wallace.cnf");
}

#[test]
fn parse_labels() {
    assert_eq!("N-Bit".parse::<Encoding>().unwrap(), Encoding::NBit);
    assert_eq!(
        "recursive".parse::<MultiplierScheme>().unwrap(),
        MultiplierScheme::Recursive
    );
    assert!("slow".parse::<Encoding>().is_err());
    assert!("booth".parse::<MultiplierScheme>().is_err());
    for v in Encoding::VARIANTS {
        assert_eq!(&v.parse::<Encoding>().unwrap().to_string(), v);
    }
    for v in MultiplierScheme::VARIANTS {
        assert_eq!(&v.parse::<MultiplierScheme>().unwrap().to_string(), v);
    }
}
