//! Instrument Bank (§4.1): an in-memory catalog keyed by
//! `(program, bankMSB, bankLSB, moduleID) -> instrument data`.
//!
//! Programs 0x00..0x7F are melody instruments; 0x80..0xFF are drum kits (the
//! low 7 bits identify the kit), per the single-keyspace instrument
//! identifier in §3.

pub mod catalog;

use serde::{Deserialize, Serialize};

pub use catalog::{load_catalog_dir, load_catalog_file};

/// One instrument entry: a program's availability on a specific module,
/// under a specific bank MSB/LSB.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstrumentEntry {
    pub bank_msb: u8,
    pub bank_lsb: u8,
    /// Packed module-id byte this entry belongs to.
    pub module_id: u8,
    pub display_name: String,
}

/// The full catalog for one program (0..=255, drum kits use bit 7).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProgramEntries {
    pub entries: Vec<InstrumentEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bank {
    pub max_bank_msb: u8,
    pub max_bank_lsb: u8,
    pub max_drum_kit: u8,
    programs: Vec<ProgramEntries>,
}

impl Default for Bank {
    fn default() -> Self {
        Bank {
            max_bank_msb: 0,
            max_bank_lsb: 0,
            max_drum_kit: 0,
            programs: vec![ProgramEntries::default(); 0x100],
        }
    }
}

impl Bank {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts one catalog entry, updating the `max_*` summaries used by
    /// ignore-mask heuristics in the playback engine.
    pub fn insert(&mut self, program: u8, entry: InstrumentEntry) {
        if entry.bank_msb != 0xFF && entry.bank_msb > self.max_bank_msb {
            self.max_bank_msb = entry.bank_msb;
        }
        if entry.bank_lsb != 0xFF && entry.bank_lsb > self.max_bank_lsb {
            self.max_bank_lsb = entry.bank_lsb;
        }
        if program & 0x80 != 0 {
            let kit = program & 0x7F;
            if kit > self.max_drum_kit {
                self.max_drum_kit = kit;
            }
        }
        self.programs[program as usize].entries.push(entry);
    }

    pub fn program_entries(&self, program: u8) -> &[InstrumentEntry] {
        &self.programs[program as usize].entries
    }

    /// `lookupExact`: first an entry with `moduleId == maxModuleId`, else the
    /// highest `moduleId <= maxModuleId`. `0xFF` on MSB/LSB acts as a
    /// wildcard. Ties broken by first-encountered order.
    pub fn lookup_exact(
        &self,
        program: u8,
        msb: u8,
        lsb: u8,
        max_module_id: u8,
    ) -> Option<&InstrumentEntry> {
        let candidates: Vec<&InstrumentEntry> = self
            .program_entries(program)
            .iter()
            .filter(|e| (msb == 0xFF || e.bank_msb == 0xFF || e.bank_msb == msb))
            .filter(|e| (lsb == 0xFF || e.bank_lsb == 0xFF || e.bank_lsb == lsb))
            .collect();

        if let Some(exact) = candidates.iter().find(|e| e.module_id == max_module_id) {
            return Some(exact);
        }

        let mut best: Option<&InstrumentEntry> = None;
        for e in candidates {
            if e.module_id <= max_module_id {
                match best {
                    Some(b) if b.module_id >= e.module_id => {}
                    _ => best = Some(e),
                }
            }
        }
        best
    }

    /// `moduleMask` (GS): bitmask of GS module ids that can render `program`
    /// under `msb`, for any LSB. A model is assumed to inherit every smaller
    /// model's tones once the bank's highest observed LSB is within reach of
    /// an entry here, so the mask extends above `max_bank_lsb` rather than
    /// only back-filling below its own locally observed top bit.
    pub fn module_mask(&self, program: u8, msb: u8) -> u8 {
        let mut mask: u8 = 0;
        for e in self.program_entries(program) {
            if msb == 0xFF || e.bank_msb == msb {
                let shift = e.bank_lsb.min(8) as u32;
                mask |= (1u16 << shift).wrapping_sub(1) as u8;
            }
        }
        let max_lsb_mask: u8 = 1u8.checked_shl(self.max_bank_lsb.min(8) as u32).unwrap_or(0);
        if mask & (max_lsb_mask >> 1) != 0 {
            mask |= !(max_lsb_mask.wrapping_sub(1));
        }
        mask
    }

    /// `mergeInto`: duplicate-suppressing merge of `src` into `self`.
    pub fn merge_into(&mut self, src: &Bank) {
        for program in 0..=0xFFu16 {
            let program = program as u8;
            for e in src.program_entries(program) {
                let dup = self.program_entries(program).iter().any(|existing| {
                    existing.bank_msb == e.bank_msb
                        && existing.bank_lsb == e.bank_lsb
                        && existing.module_id == e.module_id
                });
                if !dup {
                    self.insert(program, e.clone());
                }
            }
            if program == 0xFF {
                break;
            }
        }
    }

    /// `filteredCopy`: a new bank containing only entries belonging to
    /// `module_id` (or everything, if `module_id == 0xFF`).
    pub fn filtered_copy(&self, module_id: u8) -> Bank {
        let mut out = Bank::new();
        for program in 0..=0xFFu16 {
            let program = program as u8;
            for e in self.program_entries(program) {
                if module_id == 0xFF || e.module_id == module_id {
                    out.insert(program, e.clone());
                }
            }
            if program == 0xFF {
                break;
            }
        }
        out
    }

    /// `PatchInstrumentBank`: force-patches MSB and/or LSB across every
    /// entry in the bank. `flags` bit 0 patches MSB, bit 1 patches LSB.
    pub fn patch(&mut self, flags: u8, msb: u8, lsb: u8) {
        for p in self.programs.iter_mut() {
            for e in p.entries.iter_mut() {
                if flags & 0x01 != 0 {
                    e.bank_msb = msb;
                }
                if flags & 0x02 != 0 {
                    e.bank_lsb = lsb;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(msb: u8, lsb: u8, module_id: u8, name: &str) -> InstrumentEntry {
        InstrumentEntry {
            bank_msb: msb,
            bank_lsb: lsb,
            module_id,
            display_name: name.to_string(),
        }
    }

    #[test]
    fn lookup_exact_prefers_requested_module() {
        let mut bank = Bank::new();
        bank.insert(0, entry(0, 0, 0x10, "SC-55 Piano"));
        bank.insert(0, entry(0, 0, 0x11, "SC-88 Piano"));
        let found = bank.lookup_exact(0, 0, 0, 0x11).unwrap();
        assert_eq!(found.display_name, "SC-88 Piano");
    }

    #[test]
    fn lookup_exact_falls_back_to_highest_below() {
        let mut bank = Bank::new();
        bank.insert(0, entry(0, 0, 0x10, "SC-55 Piano"));
        let found = bank.lookup_exact(0, 0, 0, 0x13).unwrap();
        assert_eq!(found.display_name, "SC-55 Piano");
    }

    #[test]
    fn wildcard_msb_lsb_match_anything() {
        let mut bank = Bank::new();
        bank.insert(0, entry(0xFF, 0xFF, 0x10, "Any"));
        assert!(bank.lookup_exact(0, 5, 9, 0x10).is_some());
    }

    #[test]
    fn merge_is_idempotent() {
        let mut a = Bank::new();
        a.insert(0, entry(0, 0, 0x10, "Piano"));
        let snapshot = a.clone();
        a.merge_into(&snapshot);
        assert_eq!(a.program_entries(0).len(), 1);
    }

    #[test]
    fn module_mask_inherits_higher_bits() {
        let mut bank = Bank::new();
        bank.insert(0, entry(0, 2, 0x10, "x"));
        let mask = bank.module_mask(0, 0);
        assert_eq!(mask & 0b111, 0b111);
    }
}
