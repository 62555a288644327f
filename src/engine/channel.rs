//! Per-channel state (§3 "Channel state"), grounded on `MidiPlay.hpp`'s
//! `ChannelState`/`InstrumentInfo`.

/// What the MIDI file asked for, or what's actually on the wire — two
/// parallel copies of the same shape (`insOrg` / `insSend` in the
/// original).
#[derive(Debug, Clone, Copy, Default)]
pub struct InstrumentInfo {
    /// `[0]` = bank MSB, `[1]` = bank LSB (current/patched state).
    pub bank: [u8; 2],
    /// 0x00..0x7F melody, 0x80..0xFF drum kit, per the single-keyspace
    /// instrument identifier (§3).
    pub ins: u8,
    /// Bitmask of which of MSB/LSB/ins to treat as wildcards during lookup.
    pub bank_ignore: u8,
    /// Resolved catalog entry, if any (an index into the destination bank's
    /// per-program entry list rather than a raw pointer — §9 ownership
    /// note).
    pub bank_entry: Option<usize>,
}

pub const BNKIGN_MSB: u8 = 0x01;
pub const BNKIGN_LSB: u8 = 0x02;
pub const BNKIGN_INS: u8 = 0x04;

#[derive(Debug, Clone, Copy)]
pub struct RunningNote {
    pub note: u8,
    pub velocity: u8,
    pub source_track: u16,
}

#[derive(Debug, Clone)]
pub struct ChannelState {
    pub mid_chn: u8,
    pub port_id: u8,
    pub is_drum: bool,
    /// Default GS/XG instrument map; `0xFF` = use the global default.
    pub default_ins_map: u8,

    pub ins_org: InstrumentInfo,
    pub ins_send: InstrumentInfo,
    /// Last `(MSB, LSB, program)` actually transmitted to the device.
    pub ins_state: [u8; 3],
    pub cur_ins: u8,
    /// `None` = not a user instrument.
    pub user_ins_id: Option<u8>,

    pub ctrls: [u8; 0x80],
    /// For devices that misbehave when CC1/CC2 are reprogrammed (SC-8850
    /// quirk, §4.5): maps a source CC to the software-remapped one.
    pub cc_remap: [Option<u8>; 2],

    /// `[0]` = MSB, `[1]` = LSB; high bit distinguishes RPN (clear) from
    /// NRPN (set).
    pub rpn_selector: [u8; 2],
    pub had_drum_nrpn: bool,
    pub pb_range: i8,
    pub pb_range_unscaled: i8,
    pub tune_coarse: i8,
    /// 8.8 fixed point.
    pub tune_fine: i16,

    pub running_notes: Vec<RunningNote>,

    /// Pending bank-select staging; committed on Program-Change (§3
    /// invariant: "at most one instrument change is in-flight per
    /// channel").
    pub pending_bank: [Option<u8>; 2],

    pub sustain: bool,
    pub sostenuto: bool,
}

pub const RUNNING_NOTES_CAP: usize = 128;
pub const RUNNING_NOTES_TRIM_TO: usize = 32;

impl Default for ChannelState {
    fn default() -> Self {
        ChannelState {
            mid_chn: 0,
            port_id: 0,
            is_drum: false,
            default_ins_map: 0xFF,
            ins_org: InstrumentInfo::default(),
            ins_send: InstrumentInfo::default(),
            ins_state: [0, 0, 0],
            cur_ins: 0,
            user_ins_id: None,
            ctrls: [0; 0x80],
            cc_remap: [None, None],
            rpn_selector: [0x7F, 0x7F],
            had_drum_nrpn: false,
            pb_range: 2,
            pb_range_unscaled: 2,
            tune_coarse: 0,
            tune_fine: 0,
            running_notes: Vec::new(),
            pending_bank: [None, None],
            sustain: false,
            sostenuto: false,
        }
    }
}

impl ChannelState {
    pub fn new(mid_chn: u8, port_id: u8) -> Self {
        ChannelState {
            mid_chn,
            port_id,
            is_drum: mid_chn % 16 == 9,
            ..Default::default()
        }
    }

    pub fn add_running_note(&mut self, note: u8, velocity: u8, source_track: u16) {
        self.running_notes.push(RunningNote {
            note,
            velocity,
            source_track,
        });
        if self.running_notes.len() >= RUNNING_NOTES_CAP {
            let cut = self.running_notes.len() - RUNNING_NOTES_TRIM_TO;
            self.running_notes.drain(0..cut);
        }
    }

    pub fn remove_running_note(&mut self, note: u8) {
        if let Some(pos) = self.running_notes.iter().position(|n| n.note == note) {
            self.running_notes.remove(pos);
        }
    }

    /// Resets controller/bank/tuning state to defaults without destroying
    /// the container (§3 lifecycle note).
    pub fn reset_to_defaults(&mut self) {
        let mid_chn = self.mid_chn;
        let port_id = self.port_id;
        let is_drum = self.is_drum;
        *self = ChannelState {
            mid_chn,
            port_id,
            is_drum,
            ..Default::default()
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_nine_defaults_to_drum() {
        let chn = ChannelState::new(9, 0);
        assert!(chn.is_drum);
        let chn = ChannelState::new(0, 0);
        assert!(!chn.is_drum);
    }

    #[test]
    fn running_notes_trim_to_32_on_overflow() {
        let mut chn = ChannelState::new(9, 0);
        for i in 0..200u16 {
            chn.add_running_note((i % 128) as u8, 100, i);
        }
        assert!(chn.running_notes.len() <= RUNNING_NOTES_CAP);
    }

    #[test]
    fn reset_preserves_identity_fields() {
        let mut chn = ChannelState::new(3, 2);
        chn.ctrls[7] = 99;
        chn.reset_to_defaults();
        assert_eq!(chn.mid_chn, 3);
        assert_eq!(chn.port_id, 2);
        assert_eq!(chn.ctrls[7], 0);
    }
}
