//! Instrument resolution (§4.5 "Instrument & Capital-Tone Fallback
//! Remapping"): two-pass lookup — `get_original` against the source module's
//! bank, `get_remapped` against the destination module's bank with
//! per-family CTF fallback when the exact (MSB, LSB, program) triple isn't
//! present there.
//!
//! Grounded on `MidiPlay.cpp`'s `GetOriginalIns`/`GetRemappedIns` and the
//! family-specific fallback branches that follow them.

use super::channel::{BNKIGN_INS, BNKIGN_LSB, BNKIGN_MSB};
use crate::bank::{Bank, InstrumentEntry};
use crate::module_type::{Family, ModuleType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InsKey {
    pub bank_msb: u8,
    pub bank_lsb: u8,
    /// 0x00..0x7F melody, 0x80..0xFF drum kit.
    pub program: u8,
}

impl InsKey {
    pub fn is_drum(self) -> bool {
        self.program & 0x80 != 0
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedIns {
    pub key: InsKey,
    pub entry: Option<InstrumentEntry>,
    /// Set when the destination required a CTF fallback to find anything at
    /// all, i.e. the original (MSB, LSB, program) wasn't present.
    pub used_fallback: bool,
}

/// The `bnkIgn` mask for `GetOriginal`: which of MSB/LSB/program to
/// wildcard during the source-bank lookup, based on the source family and
/// the drum flag. MT-32/CM-64 have no bank concept at all, so both MSB and
/// LSB are ignored (and, on drum channels, the kit number collapses to the
/// module's single generic rhythm map); plain GM has one implicit bank, so
/// MSB/LSB are ignored there too. GS and XG sources carry real bank
/// variations that matter for retargeting, so nothing is ignored.
pub fn compute_bank_ignore(source: ModuleType, is_drum: bool) -> u8 {
    match source.family() {
        Family::Other => BNKIGN_MSB | BNKIGN_LSB | if is_drum { BNKIGN_INS } else { 0 },
        Family::Gm => BNKIGN_MSB | BNKIGN_LSB,
        Family::Gs | Family::Xg => 0,
    }
}

/// `GetOriginalIns`: resolve the note's instrument against the *source*
/// module's bank, wildcarding fields per `bank_ignore` (see
/// [`compute_bank_ignore`]) and retrying through CTF if the initial lookup
/// misses.
pub fn get_original(bank: &Bank, key: InsKey, source: ModuleType, bank_ignore: u8) -> Option<InstrumentEntry> {
    let lookup = InsKey {
        bank_msb: if bank_ignore & BNKIGN_MSB != 0 { 0xFF } else { key.bank_msb },
        bank_lsb: if bank_ignore & BNKIGN_LSB != 0 { 0xFF } else { key.bank_lsb },
        program: if bank_ignore & BNKIGN_INS != 0 && key.is_drum() {
            0x80
        } else {
            key.program
        },
    };
    if let Some(e) = bank.lookup_exact(lookup.program, lookup.bank_msb, lookup.bank_lsb, source.to_byte()) {
        return Some(e.clone());
    }
    for fallback_key in ctf_fallback_sequence(lookup, source) {
        if let Some(e) =
            bank.lookup_exact(fallback_key.program, fallback_key.bank_msb, fallback_key.bank_lsb, source.to_byte())
        {
            return Some(e.clone());
        }
    }
    None
}

/// Bank LSB a GS module uses to select its MT-32-compatible capital-tone map.
const GS_MT32_MAP_LSB: u8 = 0x01;

/// `HandleIns_CommonPatches`: the destination-specific adjustments
/// `GetRemapped` applies to `insOrg` before the destination-bank lookup.
pub fn apply_common_patches(key: InsKey, source: ModuleType, dest: ModuleType, midi_chn: u8, dest_bank: &Bank) -> InsKey {
    let mut key = key;
    match dest.family() {
        Family::Gs if source.family() == Family::Other => {
            key.bank_lsb = GS_MT32_MAP_LSB;
            if key.is_drum() {
                key.program = 0x80 | 0x7F;
            } else if midi_chn < 10 {
                key.bank_msb = 0x7F;
            } else {
                key.bank_msb = 0x7E;
            }
        }
        Family::Gs => {
            if source.family() != Family::Gs || key.bank_lsb == 0 {
                let model_idx = match dest {
                    ModuleType::Sc8850 => ModuleType::Sc88Pro.gs_model_index(),
                    _ => dest.gs_model_index(),
                }
                .unwrap_or(0);
                key.bank_lsb = 1 + model_idx;
            }
            if key.is_drum() && dest_bank.program_entries(key.program).is_empty() {
                key.program = 0x80;
            }
        }
        Family::Xg => {
            if source.family() != Family::Xg {
                key.bank_msb = if key.is_drum() { 0x7F } else { 0x00 };
            } else if key.is_drum() {
                if key.bank_msb != 0x7E && key.bank_msb != 0x7F {
                    key.bank_msb = 0x7F;
                }
            } else if key.bank_msb >= 0x7E {
                key.bank_msb = 0x00;
            }
        }
        Family::Other => {
            key.bank_msb = 0xFF;
            key.bank_lsb = 0xFF;
        }
        Family::Gm => {}
    }
    key
}

/// `GetRemappedIns`: resolve the same instrument against the *destination*
/// module's bank, applying family-specific Capital Tone Fallback when the
/// exact triple is absent there.
pub fn get_remapped(bank: &Bank, key: InsKey, dest: ModuleType) -> ResolvedIns {
    if let Some(entry) = bank.lookup_exact(key.program, key.bank_msb, key.bank_lsb, dest.to_byte())
    {
        return ResolvedIns {
            key,
            entry: Some(entry.clone()),
            used_fallback: false,
        };
    }

    for fallback_key in ctf_fallback_sequence(key, dest) {
        if let Some(entry) =
            bank.lookup_exact(fallback_key.program, fallback_key.bank_msb, fallback_key.bank_lsb, dest.to_byte())
        {
            return ResolvedIns {
                key: fallback_key,
                entry: Some(entry.clone()),
                used_fallback: true,
            };
        }
    }

    ResolvedIns {
        key,
        entry: None,
        used_fallback: false,
    }
}

/// The ordered sequence of fallback keys to try, per the destination
/// family's Capital Tone Fallback rule. Earlier entries are tried first.
fn ctf_fallback_sequence(key: InsKey, dest: ModuleType) -> Vec<InsKey> {
    match dest.family() {
        // SC-55 is the only GS model that ever needed CTF — SC-88 and later
        // carry the full tone map, so later GS models get an empty sequence.
        Family::Gs if matches!(dest, ModuleType::Sc55) => sc55_fallback(key),
        Family::Gs if matches!(dest, ModuleType::Tg300B) => tg300b_fallback(key),
        Family::Xg => xg_fallback(key, dest),
        _ => Vec::new(),
    }
}

/// SC-55 CTF: melody falls back by masking the low 3 bits of the bank MSB,
/// then to MSB 0 outright. Drum kits fall back by masking the low 3 bits of
/// the kit number (the "capital tone" of a kit group), down to kit 0.
fn sc55_fallback(key: InsKey) -> Vec<InsKey> {
    let mut out = Vec::new();
    if key.is_drum() {
        // Drum CTF is a single masked-program lookup, unlike melody's
        // two-stage fallback — there's no secondary "kit 0" stage.
        let mut kit = key.program & 0x7F;
        while kit & 0x07 != 0 {
            kit &= !0x07;
            out.push(InsKey {
                program: 0x80 | kit,
                ..key
            });
        }
    } else {
        let mut msb = key.bank_msb;
        while msb & 0x07 != 0 {
            msb &= !0x07;
            out.push(InsKey { bank_msb: msb, ..key });
        }
        if key.bank_msb != 0 {
            out.push(InsKey {
                bank_msb: 0,
                ..key
            });
        }
    }
    out
}

/// TG300B CTF: always forces bank MSB to 0 regardless of the requested
/// variation.
fn tg300b_fallback(key: InsKey) -> Vec<InsKey> {
    if key.bank_msb == 0 {
        Vec::new()
    } else {
        vec![InsKey { bank_msb: 0, ..key }]
    }
}

/// XG CTF: drop the bank LSB (the "voice variation") to 0, except when the
/// MSB selects user voices (0x3F) or a PLG-board map (nibble-pairs in
/// 0x20-0x60/0x01-0x03, e.g. 0x21/0x23), where the variation is structural
/// rather than a tone fallback and is left alone.
fn xg_fallback(key: InsKey, _dest: ModuleType) -> Vec<InsKey> {
    if key.bank_lsb == 0 || key.bank_msb == 0x3F {
        return Vec::new();
    }
    let msb_nib_h = key.bank_msb & 0xF0;
    let msb_nib_l = key.bank_msb & 0x0F;
    if (0x20..=0x60).contains(&msb_nib_h) && (0x01..=0x03).contains(&msb_nib_l) {
        return Vec::new();
    }
    vec![InsKey { bank_lsb: 0, ..key }]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bank::InstrumentEntry;

    fn entry(msb: u8, lsb: u8, module_id: u8, name: &str) -> InstrumentEntry {
        InstrumentEntry {
            bank_msb: msb,
            bank_lsb: lsb,
            module_id,
            display_name: name.to_string(),
        }
    }

    #[test]
    fn exact_hit_needs_no_fallback() {
        let mut bank = Bank::new();
        bank.insert(0, entry(8, 0, ModuleType::Sc55.to_byte(), "Piano Var"));
        let key = InsKey {
            bank_msb: 8,
            bank_lsb: 0,
            program: 0,
        };
        let resolved = get_remapped(&bank, key, ModuleType::Sc55);
        assert!(!resolved.used_fallback);
        assert_eq!(resolved.entry.unwrap().display_name, "Piano Var");
    }

    #[test]
    fn sc55_melody_falls_back_to_msb_zero() {
        let mut bank = Bank::new();
        bank.insert(0, entry(0, 0, ModuleType::Sc55.to_byte(), "Grand Piano"));
        let key = InsKey {
            bank_msb: 9,
            bank_lsb: 0,
            program: 0,
        };
        let resolved = get_remapped(&bank, key, ModuleType::Sc55);
        assert!(resolved.used_fallback);
        assert_eq!(resolved.entry.unwrap().display_name, "Grand Piano");
    }

    #[test]
    fn sc55_drum_kit_falls_back_by_group() {
        let mut bank = Bank::new();
        bank.insert(0x88, entry(0xFF, 0xFF, ModuleType::Sc55.to_byte(), "Standard Kit"));
        let key = InsKey {
            bank_msb: 0,
            bank_lsb: 0,
            program: 0x80 | 0x09,
        };
        let resolved = get_remapped(&bank, key, ModuleType::Sc55);
        assert!(resolved.used_fallback);
        assert_eq!(resolved.entry.unwrap().display_name, "Standard Kit");
    }

    #[test]
    fn sc55_drum_kit_has_no_secondary_kit_zero_fallback() {
        let mut bank = Bank::new();
        bank.insert(0x80, entry(0xFF, 0xFF, ModuleType::Sc55.to_byte(), "Standard Kit"));
        let key = InsKey {
            bank_msb: 0,
            bank_lsb: 0,
            program: 0x80 | 0x09,
        };
        let resolved = get_remapped(&bank, key, ModuleType::Sc55);
        assert!(resolved.entry.is_none());
    }

    #[test]
    fn tg300b_always_lands_on_msb_zero() {
        let mut bank = Bank::new();
        bank.insert(0, entry(0, 0, ModuleType::Tg300B.to_byte(), "Piano"));
        let key = InsKey {
            bank_msb: 64,
            bank_lsb: 0,
            program: 0,
        };
        let resolved = get_remapped(&bank, key, ModuleType::Tg300B);
        assert!(resolved.used_fallback);
        assert_eq!(resolved.entry.unwrap().display_name, "Piano");
    }

    #[test]
    fn xg_plg_board_map_is_not_ctf_adjusted() {
        let key = InsKey {
            bank_msb: 0x3F,
            bank_lsb: 5,
            program: 0,
        };
        assert!(ctf_fallback_sequence(key, ModuleType::Mu100).is_empty());
    }

    #[test]
    fn xg_plg_nibble_pair_is_not_ctf_adjusted() {
        let key = InsKey {
            bank_msb: 0x21,
            bank_lsb: 2,
            program: 0,
        };
        assert!(ctf_fallback_sequence(key, ModuleType::Mu100).is_empty());
    }

    #[test]
    fn get_original_ignores_bank_for_mt32_source() {
        let mut bank = Bank::new();
        bank.insert(0, entry(0xFF, 0xFF, ModuleType::Mt32.to_byte(), "MT-32 Piano"));
        let key = InsKey {
            bank_msb: 12,
            bank_lsb: 34,
            program: 0,
        };
        let ignore = compute_bank_ignore(ModuleType::Mt32, key.is_drum());
        let found = get_original(&bank, key, ModuleType::Mt32, ignore).unwrap();
        assert_eq!(found.display_name, "MT-32 Piano");
    }

    #[test]
    fn common_patches_mt32_source_on_gs_dest_melody() {
        let key = InsKey {
            bank_msb: 0,
            bank_lsb: 0,
            program: 0,
        };
        let dest_bank = Bank::new();
        let patched = apply_common_patches(key, ModuleType::Mt32, ModuleType::Sc55, 0, &dest_bank);
        assert_eq!(patched.bank_msb, 0x7F);
        assert_eq!(patched.bank_lsb, 0x01);
    }

    #[test]
    fn xg_variation_falls_back_to_lsb_zero() {
        let mut bank = Bank::new();
        bank.insert(0, entry(0, 0, ModuleType::Mu100.to_byte(), "Base Voice"));
        let key = InsKey {
            bank_msb: 0,
            bank_lsb: 3,
            program: 0,
        };
        let resolved = get_remapped(&bank, key, ModuleType::Mu100);
        assert!(resolved.used_fallback);
        assert_eq!(resolved.entry.unwrap().display_name, "Base Voice");
    }

    #[test]
    fn no_match_anywhere_reports_none() {
        let bank = Bank::new();
        let key = InsKey {
            bank_msb: 0,
            bank_lsb: 0,
            program: 0,
        };
        let resolved = get_remapped(&bank, key, ModuleType::Sc55);
        assert!(resolved.entry.is_none());
    }
}
