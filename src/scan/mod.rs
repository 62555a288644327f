//! Bank-Scan Analyzer (§4.3): a single-pass scanner over a parsed MIDI file
//! that deduces the source module family and model from bank-select
//! patterns, SysEx resets, drum-kit choices and instrument-map selections.
//!
//! Grounded directly on the reference `MidiBankScan` pass: the feature
//! bitmasks of the original (`FMBALL_*`/`FMBGS_*`/`FMBXG_*` flat integers)
//! are reimplemented here as named fields on [`ScanDetails`] rather than
//! magic bit positions, per the tagged-sum-types design note — the
//! resolution logic that reads and combines them is translated condition
//! for condition.

mod gs;
mod mt32;
mod xg;

use crate::bank::Bank;
use crate::midifile::{EventKind, MidiFile};
use crate::module_type::ModuleType;
use std::collections::BTreeSet;

/// GM/GS/XG model index within `ins_set` (bit position).
pub const MTGM_LVL1: u8 = 0;
pub const MTGM_LVL2: u8 = 1;
pub const MTGS_SC55: u8 = 0;
pub const MTGS_SC88: u8 = 1;
pub const MTGS_SC88PRO: u8 = 2;
pub const MTGS_SC8850: u8 = 3;
pub const MTXG_MU50: u8 = 0;
pub const MTXG_MU80: u8 = 1;
#[allow(dead_code)]
pub const MTXG_MU90: u8 = 2;
pub const MTXG_MU100: u8 = 3;
#[allow(dead_code)]
pub const MTXG_MU128: u8 = 4;
#[allow(dead_code)]
pub const MTXG_MU1000: u8 = 5;

pub(crate) const PART_ORDER: [u8; 0x10] =
    [0x9, 0x0, 0x1, 0x2, 0x3, 0x4, 0x5, 0x6, 0x7, 0x8, 0xA, 0xB, 0xC, 0xD, 0xE, 0xF];

/// Per-family "which models can render this instrument" vote set, plus a
/// catch-all "saw something unrenderable" flag. Mirrors the original's
/// packed `fmGM`/`fmGS`/`fmXG` integers' `INSSET`/`BAD_INS` bits.
#[derive(Debug, Clone, Copy, Default)]
pub struct FeatureSet {
    pub ins_set: u8,
    pub bad_ins: bool,
}

impl FeatureSet {
    fn vote(&mut self, model_idx: u8) {
        self.ins_set |= 1 << model_idx;
    }
}

/// Read-only external context: the catalogs used while scanning. Threaded
/// through the scan call rather than registered process-wide (§9: "no
/// global singletons").
#[derive(Default)]
pub struct ScanContext<'a> {
    pub gm2_bank: Option<&'a Bank>,
    pub gs_bank: Option<&'a Bank>,
    pub xg_bank: Option<&'a Bank>,
}

#[derive(Debug, Clone, Default)]
pub struct ScanDetails {
    pub fm_gm: FeatureSet,
    pub fm_gs: FeatureSet,
    pub fm_xg: FeatureSet,
    pub gs_def_map: bool,
    pub gs_sc_map: bool,
    pub gs_sc_reset: bool,
    pub gs_gs_reset: bool,
    pub gs_user_ins: bool,
    pub gs_user_drm: bool,
    pub gs_max_lsb: u8,
    pub gsim_all_map: FeatureSet,
    pub gsim_not: u8,
    pub xg_gm_map: bool,
    pub xg_mu100_map: bool,
    pub xg_basic_map: bool,
    pub xg_panel: bool,
    pub xg_plg_vl: bool,
    pub xg_plg_dx: bool,
    pub xg_needs_ctf: bool,
    pub xg_user_ins: bool,
    pub xg_reset_flag: bool,
    pub xg_all_reset_flag: bool,
    pub xg_map_sel: Option<u8>,
    pub gm_l1_reset: bool,
    pub gm_l2_reset: bool,
    pub max_drum_kit: u8,
    pub max_drum_msb: u8,
    pub chn_use_mask: u16,
    pub text_disp: bool,
    pub pixel_art: bool,
    pub mt_reset: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SpecialFeatures {
    pub karaoke: bool,
}

#[derive(Debug, Clone)]
pub struct ScanResult {
    pub mod_type: ModuleType,
    pub has_reset: Option<ModuleType>,
    pub gs_min: u8,
    pub gs_opt: u8,
    pub xg_opt: u8,
    pub num_ports: u32,
    pub spc_feature: SpecialFeatures,
    pub details: ScanDetails,
}

/// Per-channel, per-track scratch state for one scan pass.
struct ScanVars {
    port_ids: BTreeSet<u8>,
    drum_chn_mask: u16,
    chn_use_mask: u16,
    ins_bank_buf: [[u8; 2]; 16],
    ins_bank: [[u8; 3]; 16],
    pending_check: [bool; 16],
    last_port_id: u8,
    cur_port_id: u8,
    syx_reset: Option<ModuleType>,
    ins_chk_on_note: bool,
}

impl ScanVars {
    fn new(ignore_empty_chns: bool) -> Self {
        ScanVars {
            port_ids: BTreeSet::new(),
            drum_chn_mask: 1 << 9,
            chn_use_mask: 0,
            ins_bank_buf: [[0; 2]; 16],
            ins_bank: [[0; 3]; 16],
            pending_check: [false; 16],
            last_port_id: 0xFF,
            cur_port_id: 0,
            syx_reset: None,
            ins_chk_on_note: ignore_empty_chns,
        }
    }
}

fn get_ms_bit(value: u8) -> u8 {
    let mut v = value >> 1;
    let mut cur_bit = 0u8;
    while v > 0 {
        cur_bit += 1;
        v >>= 1;
    }
    cur_bit
}

fn ins_mask_to_module_id(fs: &FeatureSet, not_ins_mask: u8) -> u8 {
    let mut mod_id = get_ms_bit(fs.ins_set);
    while (1u8.checked_shl(mod_id as u32).unwrap_or(0)) & not_ins_mask != 0 && mod_id < 7 {
        mod_id += 1;
    }
    if fs.bad_ins {
        mod_id |= 0x80;
    }
    mod_id
}

fn get_ins_module_id(bank: Option<&Bank>, ins: u8, msb: u8, lsb: u8) -> Option<u8> {
    let bank = bank?;
    bank.program_entries(ins)
        .iter()
        .find(|e| (msb == 0xFF || e.bank_msb == msb) && (lsb == 0xFF || e.bank_lsb == lsb))
        .map(|e| e.module_id)
}

fn get_gs_ins_module_mask(bank: Option<&Bank>, ins: u8, msb: u8) -> u8 {
    let Some(bank) = bank else { return 0 };
    let mut ins_mask: u8 = 0;
    for e in bank.program_entries(ins) {
        if msb == 0xFF || e.bank_msb == msb {
            let shift = e.bank_lsb.min(8) as u32;
            ins_mask |= (1u16 << shift).wrapping_sub(1) as u8;
        }
    }
    let max_lsb_mask: u8 = 1u8.checked_shl(bank.max_bank_lsb.min(8) as u32).unwrap_or(0);
    if ins_mask & (max_lsb_mask >> 1) != 0 {
        ins_mask |= !(max_lsb_mask.wrapping_sub(1));
    }
    ins_mask
}

fn do_instrument_check(ctx: &ScanContext, d: &mut ScanDetails, ins: u8, msb: u8, lsb: u8) {
    if (msb == 0x00 || msb == 0xFF) && (lsb == 0x00 || lsb == 0xFF) {
        d.fm_gm.vote(MTGM_LVL1);
    } else if msb == 0x78 || msb == 0x79 {
        d.fm_gm.vote(MTGM_LVL2);
    } else {
        d.fm_gm.bad_ins = true;
    }

    gs::do_ins_check_gs(ctx, d, ins, msb, lsb);
    xg::do_ins_check_xg(ctx, d, ins, msb, lsb);

    if ins & 0x80 != 0 {
        if (ins & 0x7F) > d.max_drum_kit {
            d.max_drum_kit = ins & 0x7F;
        }
        if msb != 0xFF && d.max_drum_msb < msb {
            d.max_drum_msb = msb;
        }
    }
}

fn may_do_ins_check(ctx: &ScanContext, d: &mut ScanDetails, sv: &mut ScanVars, evt_chn: u8, mut is_note: bool) {
    let chn = evt_chn as usize;

    if sv.ins_chk_on_note {
        if !is_note && (sv.chn_use_mask & (1 << evt_chn)) != 0 {
            is_note = true;
            sv.pending_check[chn] = true;
            sv.chn_use_mask &= !(1 << evt_chn);
        }
    }
    if !is_note && sv.ins_chk_on_note {
        sv.pending_check[chn] = true;
        return;
    }
    if is_note && !sv.pending_check[chn] {
        return;
    }
    sv.pending_check[chn] = false;

    let ins_data = sv.ins_bank[chn];
    if sv.drum_chn_mask & (1 << evt_chn) != 0 {
        do_instrument_check(ctx, d, 0x80 | ins_data[2], ins_data[0], ins_data[1]);
    } else {
        do_instrument_check(ctx, d, ins_data[2], ins_data[0], ins_data[1]);
    }
}

/// Performs the single-pass scan and final resolution (§4.3 steps 1-10).
pub fn scan(midi: &MidiFile, ignore_empty_chns: bool, ctx: &ScanContext) -> ScanResult {
    let mut d = ScanDetails::default();
    let mut spc_feature = SpecialFeatures::default();
    let mut sv = ScanVars::new(ignore_empty_chns);
    let mut mod_text_flags: u8 = 0;
    let mut strings: Vec<String> = Vec::new();

    for track in &midi.tracks {
        sv.last_port_id = 0xFF;
        sv.cur_port_id = 0;
        sv.ins_bank_buf = [[0; 2]; 16];
        sv.ins_bank_buf[9][0] = 0xFF;

        for ev in &track.events {
            let evt_chn = ev.channel;
            match ev.kind {
                EventKind::NoteOn if ev.data2 > 0 => {
                    if sv.cur_port_id != sv.last_port_id {
                        sv.last_port_id = sv.cur_port_id;
                        sv.port_ids.insert(sv.cur_port_id);
                    }
                    sv.chn_use_mask |= 1 << evt_chn;
                    d.chn_use_mask |= 1 << evt_chn;
                    may_do_ins_check(ctx, &mut d, &mut sv, evt_chn, true);
                }
                EventKind::NoteOn => {} // velocity 0: a Note-Off
                EventKind::ControlChange => match ev.data1 {
                    0x00 => sv.ins_bank_buf[evt_chn as usize][0] = ev.data2,
                    0x20 => sv.ins_bank_buf[evt_chn as usize][1] = ev.data2,
                    _ => {}
                },
                EventKind::ProgramChange => {
                    let chn = evt_chn as usize;
                    sv.ins_bank[chn][0] = sv.ins_bank_buf[chn][0];
                    sv.ins_bank[chn][1] = sv.ins_bank_buf[chn][1];
                    sv.ins_bank[chn][2] = ev.data1;
                    if sv.ins_chk_on_note && sv.drum_chn_mask & (1 << evt_chn) != 0 {
                        let msb = sv.ins_bank[chn][0];
                        if msb != 0xFF && d.max_drum_msb < msb {
                            d.max_drum_msb = msb;
                        }
                    }
                    may_do_ins_check(ctx, &mut d, &mut sv, evt_chn, false);
                }
                EventKind::SysEx => {
                    let mut data: &[u8] = &ev.data;
                    while data.first() == Some(&0xF0) {
                        data = &data[1..];
                    }
                    if data.len() < 3 {
                        continue;
                    }
                    match data[0] {
                        0x41 if data.len() >= 8 && data[3] == 0x12 => match data[2] {
                            0x16 => mt32::handle_sysex_mt32(data, &mut d, &mut sv),
                            0x42 => gs::handle_sysex_gs(data, &mut d, ctx, &mut sv),
                            0x45 => {
                                if data[4] == 0x10 {
                                    if data[5] == 0x00 {
                                        d.text_disp = true;
                                    } else if data[5] < 0x10 {
                                        d.pixel_art = true;
                                    }
                                }
                            }
                            _ => {}
                        },
                        0x43 if data.len() >= 6 => {
                            if data[2] == 0x4C {
                                xg::handle_sysex_xg(data, &mut d, ctx, &mut sv);
                            } else if data[2] == 0x49 && data[3] == 0x00 && data[4] == 0x00 && data[5] == 0x12 {
                                if let Some(&vv) = data.get(6) {
                                    d.xg_map_sel = Some(vv);
                                }
                            }
                        }
                        0x7E if data.len() >= 4 => {
                            if data[1] == 0x7F && data[2] == 0x09 {
                                if data[3] == 0x01 {
                                    if sv.syx_reset.is_none()
                                        || sv.syx_reset.map(|m| m.family()) == Some(crate::module_type::Family::Gm)
                                    {
                                        sv.syx_reset = Some(ModuleType::Gm1);
                                    }
                                    d.gm_l1_reset = true;
                                } else if data[3] == 0x03 {
                                    if sv.syx_reset.is_none()
                                        || sv.syx_reset.map(|m| m.family()) == Some(crate::module_type::Family::Gm)
                                    {
                                        sv.syx_reset = Some(ModuleType::Gm2);
                                    }
                                    d.gm_l2_reset = true;
                                }
                            }
                        }
                        _ => {}
                    }
                }
                EventKind::Meta => match ev.data1 {
                    0x01 => {
                        if let Ok(text) = std::str::from_utf8(&ev.data) {
                            if text == "@KMIDI KARAOKE FILE" {
                                spc_feature.karaoke = true;
                            }
                            strings.push(text.to_string());
                        }
                    }
                    0x21 => {
                        if let Some(&port) = ev.data.first() {
                            if port != sv.cur_port_id {
                                sv.drum_chn_mask = 1 << 9;
                                sv.ins_bank = [[0; 3]; 16];
                                sv.cur_port_id = port;
                            }
                        }
                    }
                    _ => {}
                },
                _ => {}
            }
        }
    }

    for s in &strings {
        if s.contains("SC-55") || s.contains("SC-88") {
            mod_text_flags |= 0x01;
        }
        if let Some(pos) = s.find("MU") {
            if let Some(c) = s.as_bytes().get(pos + 2) {
                if c.is_ascii_digit() {
                    mod_text_flags |= 0x02;
                }
            }
        }
        if s.contains("S-YXG") {
            mod_text_flags |= 0x10;
        }
        if s.contains("TG300B") {
            mod_text_flags |= 0x20;
        }
    }

    let _ = ctx.gm2_bank; // reserved for GM2-level catalog checks used by callers of ScanResult

    let gs_min = ins_mask_to_module_id(&d.gsim_all_map, 0x00);
    let mut gs_opt = ins_mask_to_module_id(&d.fm_gs, d.gsim_not);
    if d.gs_sc_reset && gs_opt < MTGS_SC88 {
        gs_opt = MTGS_SC88;
    }

    if d.gs_sc_map {
        let mut def_lsb: u8 = if d.gs_def_map { 1 } else { 0 };
        if d.gs_max_lsb >= 0x04 {
            def_lsb = 0;
        } else if d.gs_max_lsb == 0x03 {
            def_lsb = 0;
        }
        let mut min_gs = d.gs_max_lsb.saturating_sub(1).saturating_add(def_lsb);
        if min_gs > MTGS_SC8850 {
            min_gs = MTGS_SC8850;
        }
        if min_gs > gs_opt {
            gs_opt = min_gs;
        }
    }

    let mut xg_opt = ins_mask_to_module_id(&d.fm_xg, 0x00);
    if let Some(sel) = d.xg_map_sel {
        if sel > 0x00 && xg_opt < MTXG_MU100 {
            xg_opt = MTXG_MU100;
        }
    }
    if d.xg_basic_map && d.xg_gm_map && xg_opt < MTXG_MU100 {
        xg_opt = MTXG_MU100;
    }

    let xg_drum = d.max_drum_msb == 0x7F;
    let has_reset = sv.syx_reset;

    const MT_UNKNOWN: u8 = 0x08;
    if gs_opt > MT_UNKNOWN {
        gs_opt = MT_UNKNOWN;
    }
    if xg_opt > MT_UNKNOWN {
        xg_opt = MT_UNKNOWN;
    }

    if xg_drum && !d.fm_xg.bad_ins {
        d.fm_gm.bad_ins = true;
        d.fm_gs.bad_ins = true;
    } else if sv.syx_reset == Some(ModuleType::Gm1) {
        let mut not_gm = 0u8;
        if d.fm_gm.bad_ins {
            not_gm |= 0x01;
        }
        if d.max_drum_kit > 0x00 {
            not_gm |= 0x02;
        }
        if not_gm != 0 && gs_opt == MTGS_SC55 {
            sv.syx_reset = Some(ModuleType::Sc55);
        }
    }

    let mut mod_type = if let Some(reset) = sv.syx_reset {
        if reset == ModuleType::Sc55 {
            ModuleType::gs_from_index(gs_opt & 0x7F)
        } else if reset == ModuleType::Mu50 {
            ModuleType::xg_from_index(xg_opt & 0x7F)
        } else if reset == ModuleType::Mt32 {
            if d.chn_use_mask & 0xFC00 != 0 {
                ModuleType::Cm64
            } else {
                ModuleType::Mt32
            }
        } else if (d.gs_gs_reset || d.gs_sc_reset) && gs_opt != MT_UNKNOWN {
            ModuleType::gs_from_index(gs_opt & 0x7F)
        } else if reset == ModuleType::Gm1 && (d.fm_gm.ins_set & (1 << MTGM_LVL2)) != 0 {
            ModuleType::Gm2
        } else {
            reset
        }
    } else if !d.fm_gm.bad_ins {
        if d.fm_gm.ins_set & (1 << MTGM_LVL2) != 0 {
            ModuleType::Gm2
        } else {
            ModuleType::Gm1
        }
    } else if !d.fm_gs.bad_ins {
        ModuleType::gs_from_index(gs_opt & 0x7F)
    } else if !d.fm_xg.bad_ins {
        ModuleType::xg_from_index(xg_opt & 0x7F)
    } else {
        ModuleType::UnknownIn(crate::module_type::Family::Other)
    };

    // "MMASK_TYPE(result->modType)" in the original: only non-GM results are
    // eligible to be overridden to TG300B by song-text hints.
    if mod_type.family() != crate::module_type::Family::Gm && mod_text_flags & 0x30 != 0 {
        mod_type = ModuleType::Tg300B;
    }

    let num_ports = if sv.port_ids.is_empty() { 1 } else { sv.port_ids.len() as u32 };

    ScanResult {
        mod_type,
        has_reset,
        gs_min,
        gs_opt,
        xg_opt,
        num_ports,
        spc_feature,
        details: d,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::midifile::{EventKind, MidiEvent, MidiFile, MidiTrack};

    fn evt(tick: u32, kind: EventKind, channel: u8, d1: u8, d2: u8) -> MidiEvent {
        MidiEvent {
            tick,
            kind,
            channel,
            data1: d1,
            data2: d2,
            data: Vec::new(),
        }
    }

    #[test]
    fn plain_gm1_file_detected() {
        let track = MidiTrack {
            events: vec![
                evt(0, EventKind::ControlChange, 0, 0x00, 0x00),
                evt(0, EventKind::ControlChange, 0, 0x20, 0x00),
                evt(0, EventKind::ProgramChange, 0, 0x00, 0),
                evt(0, EventKind::NoteOn, 0, 60, 100),
            ],
        };
        let midi = MidiFile {
            ticks_per_quarter: 480,
            tracks: vec![track],
        };
        let ctx = ScanContext::default();
        let result = scan(&midi, false, &ctx);
        assert_eq!(result.mod_type, ModuleType::Gm1);
        assert!(result.has_reset.is_none());
    }

    #[test]
    fn gs_min_never_exceeds_gs_opt() {
        let midi = MidiFile {
            ticks_per_quarter: 480,
            tracks: vec![MidiTrack { events: vec![] }],
        };
        let ctx = ScanContext::default();
        let result = scan(&midi, false, &ctx);
        assert!(result.gs_min & 0x7F <= result.gs_opt & 0x7F);
    }

    #[test]
    fn num_ports_defaults_to_one() {
        let midi = MidiFile {
            ticks_per_quarter: 480,
            tracks: vec![MidiTrack { events: vec![] }],
        };
        let ctx = ScanContext::default();
        let result = scan(&midi, false, &ctx);
        assert_eq!(result.num_ports, 1);
    }

    #[test]
    fn roland_checksum_does_not_panic_scan() {
        // F0 is stripped by the caller before reaching `data`; the scanner
        // receives everything after the leading F0 byte.
        let sysex = vec![0x41, 0x10, 0x42, 0x12, 0x40, 0x00, 0x7F, 0x00, 0x40];
        let track = MidiTrack {
            events: vec![MidiEvent {
                tick: 0,
                kind: EventKind::SysEx,
                channel: 0,
                data1: 0,
                data2: 0,
                data: sysex,
            }],
        };
        let midi = MidiFile {
            ticks_per_quarter: 480,
            tracks: vec![track],
        };
        let ctx = ScanContext::default();
        let _ = scan(&midi, false, &ctx);
    }
}
