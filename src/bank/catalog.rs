//! Instrument-catalog file loader (§6: line-based ASCII format).
//!
//! ```text
//! V 001 000 000 000 000
//! L lsb msb pc 0 layout NAME
//! P lsb msb pc 0 0 NAME
//! M lsb msb pc 0 layout NAME
//! D lsb msb pc 0 layout NAME
//! N lsb msb pc note layout NAME
//! ```
//!
//! Fields are whitespace-separated decimals 0..255; `pc` is 1-based in the
//! file and stored 0-based; `layout` is the module id. Lines starting with
//! `#` or blank lines are ignored. Only `M` and `D` lines produce
//! [`InstrumentEntry`]s — `L`, `P`, `N` are catalog bookkeeping outside the
//! instrument lookup this crate performs.

use super::{Bank, InstrumentEntry};
use crate::error::CatalogError;
use rayon::prelude::*;
use std::path::Path;

const EXPECTED_VERSION: &str = "001 000 000 000 000";

fn parse_line(line: &str, bank: &mut Bank) -> Result<(), CatalogError> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Ok(());
    }

    let mut fields = trimmed.split_whitespace();
    let tag = fields
        .next()
        .ok_or_else(|| CatalogError::ParseError("empty record".to_string()))?;

    match tag {
        "V" => {
            let rest: Vec<&str> = fields.collect();
            let joined = rest.join(" ");
            if joined != EXPECTED_VERSION {
                return Err(CatalogError::UnsupportedVersion(joined));
            }
            Ok(())
        }
        "M" | "D" => {
            let nums: Vec<u32> = fields
                .by_ref()
                .take(3)
                .map(|s| {
                    s.parse::<u32>()
                        .map_err(|_| CatalogError::ParseError(format!("bad field: {s}")))
                })
                .collect::<Result<_, _>>()?;
            if nums.len() < 3 {
                return Err(CatalogError::ParseError(
                    "instrument record missing fields".to_string(),
                ));
            }
            let lsb = nums[0] as u8;
            let msb = nums[1] as u8;
            let pc_1based = nums[2];
            if pc_1based == 0 {
                return Err(CatalogError::ParseError("pc field must be >= 1".to_string()));
            }
            let pc = (pc_1based - 1) as u8;

            // skip the `0` placeholder field, then `layout`
            let rest: Vec<&str> = fields.collect();
            if rest.len() < 2 {
                return Err(CatalogError::ParseError(
                    "instrument record missing layout/name".to_string(),
                ));
            }
            let layout: u8 = rest[1]
                .parse()
                .map_err(|_| CatalogError::ParseError(format!("bad layout field: {}", rest[1])))?;
            let name = rest[2..].join(" ");

            let program = if tag == "D" { pc | 0x80 } else { pc };
            bank.insert(
                program,
                InstrumentEntry {
                    bank_msb: msb,
                    bank_lsb: lsb,
                    module_id: layout,
                    display_name: name,
                },
            );
            Ok(())
        }
        "L" | "P" | "N" => Ok(()),
        other => Err(CatalogError::ParseError(format!("unknown record tag: {other}"))),
    }
}

/// Loads a single catalog file into a fresh [`Bank`].
pub fn load_catalog_file(path: &Path) -> Result<Bank, CatalogError> {
    let text = std::fs::read_to_string(path)?;
    let mut bank = Bank::new();
    for line in text.lines() {
        parse_line(line, &mut bank)?;
    }
    Ok(bank)
}

/// Loads every `.ins` file in a directory and merges them into one bank.
/// Files are parsed in parallel (independent, read-only), then merged
/// sequentially to preserve the duplicate-suppressing merge semantics of
/// [`Bank::merge_into`].
pub fn load_catalog_dir(dir: &Path) -> Result<Bank, CatalogError> {
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some("ins") {
            paths.push(path);
        }
    }

    let parsed: Vec<Bank> = paths
        .par_iter()
        .map(|p| load_catalog_file(p))
        .collect::<Result<Vec<_>, _>>()?;

    let mut merged = Bank::new();
    for bank in &parsed {
        merged.merge_into(bank);
    }
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_melody_and_drum_lines() {
        let mut bank = Bank::new();
        parse_line("V 001 000 000 000 000", &mut bank).unwrap();
        parse_line("M 0 0 1 0 16 Acoustic Grand Piano", &mut bank).unwrap();
        parse_line("D 0 0 1 0 16 Standard Kit", &mut bank).unwrap();
        assert_eq!(bank.program_entries(0).len(), 1);
        assert_eq!(bank.program_entries(0x80).len(), 1);
        assert_eq!(bank.program_entries(0)[0].display_name, "Acoustic Grand Piano");
    }

    #[test]
    fn rejects_unsupported_version() {
        let mut bank = Bank::new();
        let err = parse_line("V 002 000 000 000 000", &mut bank).unwrap_err();
        assert!(matches!(err, CatalogError::UnsupportedVersion(_)));
    }

    #[test]
    fn ignores_comments_and_blank_lines() {
        let mut bank = Bank::new();
        parse_line("# a comment", &mut bank).unwrap();
        parse_line("   ", &mut bank).unwrap();
        assert_eq!(bank.program_entries(0).len(), 0);
    }
}
