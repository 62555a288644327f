//! Note Visualization State (§4.2): per-channel running-notes lists with
//! drum-group aging and pitch/volume modifiers, observable by an external
//! visualization sink.
//!
//! Grounded directly on the reference implementation's `NoteVisualization`
//! class: the drum mutual-exclusion groups and per-note maximum ages below
//! are its `DRUM_GROUP`/`DRUM_AGE` tables, reimplemented literally per the
//! open question in the design notes ("reimplement the table literally").

/// Mutual-exclusion group per MIDI drum note (0..=0x7F). `0` means "no
/// group" (only same-pitch instances retire each other).
const DRUM_GROUP: [u8; 0x80] = [
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, // 0x00-0x0F
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 7, 7, 0, // 0x10-0x1F
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1, 0, 1, 0, 1, 0, // 0x20-0x2F
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, // 0x30-0x3F
    0, 0, 0, 0, 0, 0, 0, 2, 2, 3, 3, 0, 0, 0, 4, 4, // 0x40-0x4F
    5, 5, 0, 0, 0, 0, 6, 6, 0, 0, 0, 0, 0, 0, 0, 0, // 0x50-0x5F
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, // 0x60-0x6F
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, // 0x70-0x7F
];

/// Maximum age (milliseconds) for drum notes by pitch, before automatic
/// removal.
const DRUM_AGE: [u32; 0x80] = {
    let mut ages = [150u32; 0x80];
    ages[0x2A] = 80; // closed hi-hat
    ages[0x2C] = 80;
    ages[0x2E] = 300; // open hi-hat
    ages[0x31] = 600; // crash 1
    ages[0x33] = 300;
    ages[0x35] = 300;
    ages[0x37] = 600;
    ages[0x39] = 600;
    ages
};

#[derive(Debug, Clone, Copy, Default)]
pub struct MidiModifiers {
    pub volume: u8,
    pub expression: u8,
    pub pan: i8,
    /// [0] = pitch bend, [1] = RPN tuning.
    pub detune: [i16; 2],
}

#[derive(Debug, Clone, Copy)]
pub struct NoteInfo {
    pub height: u8,
    pub velocity: u8,
    pub cur_age: u32,
    pub max_age: u32,
}

#[derive(Debug, Clone)]
pub struct ChnInfo {
    pub drum: bool,
    pub attr: MidiModifiers,
    pub pb_range: u8,
    pub transpose: i8,
    pub detune: i8,
    notes: Vec<NoteInfo>,
}

impl Default for ChnInfo {
    fn default() -> Self {
        ChnInfo {
            drum: false,
            attr: MidiModifiers {
                volume: 100,
                expression: 0x7F,
                pan: 0,
                detune: [0, 0],
            },
            pb_range: 2,
            transpose: 0,
            detune: 0,
            notes: Vec::new(),
        }
    }
}

impl ChnInfo {
    pub fn add_note(&mut self, note: u8, vel: u8) -> &NoteInfo {
        let note = note & 0x7F;
        let max_age = if self.drum {
            self.drum_note_prepare(note);
            DRUM_AGE[note as usize]
        } else {
            0
        };
        self.notes.push(NoteInfo {
            height: note,
            velocity: vel,
            cur_age: 0,
            max_age,
        });

        // bound worst-case memory against malformed files (§3 invariant,
        // §4.2): cap at 128, trim oldest down to a 32-entry margin.
        if self.notes.len() >= 0x80 {
            let cut = self.notes.len() - 0x20;
            self.notes.drain(0..cut);
        }

        self.notes.last().unwrap()
    }

    fn drum_note_prepare(&mut self, note: u8) {
        let group = DRUM_GROUP[note as usize];
        if group == 0 {
            self.notes.retain(|n| n.height != note);
        } else {
            self.notes.retain(|n| DRUM_GROUP[n.height as usize] != group);
        }
    }

    pub fn remove_note(&mut self, note: u8) {
        if let Some(pos) = self.notes.iter().position(|n| n.height == note && n.max_age == 0) {
            self.notes.remove(pos);
        }
    }

    pub fn clear_notes(&mut self) {
        self.notes.clear();
    }

    pub fn notes(&self) -> &[NoteInfo] {
        &self.notes
    }

    pub fn advance_age(&mut self, dt_ms: u32) {
        for n in self.notes.iter_mut() {
            n.cur_age = n.cur_age.saturating_add(dt_ms);
        }
        self.notes.retain(|n| n.max_age == 0 || n.cur_age < n.max_age);
    }

    /// Applies pitch/volume modifiers for display, combining channel and
    /// module-wide attributes. Drum channels get no pitch correction.
    pub fn processed_notes(&self, module_attr: &MidiModifiers) -> Vec<NoteInfo> {
        self.notes
            .iter()
            .map(|n| {
                let height = if self.drum {
                    n.height
                } else {
                    let mut pitch = (n.height as i32) << 8;
                    pitch += self.attr.detune[0] as i32 + self.attr.detune[1] as i32;
                    pitch += module_attr.detune[0] as i32 + module_attr.detune[1] as i32;
                    pitch = (pitch + 0x80) >> 8;
                    pitch.clamp(0, 0x7F) as u8
                };
                NoteInfo {
                    height,
                    velocity: n.velocity,
                    cur_age: 0,
                    max_age: 0,
                }
            })
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct NoteVisualization {
    mod_attrs: MidiModifiers,
    channels: Vec<ChnInfo>,
}

impl NoteVisualization {
    pub fn new(chn_groups: u8) -> Self {
        let mut nv = NoteVisualization {
            mod_attrs: MidiModifiers {
                volume: 0x7F,
                expression: 0x7F,
                pan: 0,
                detune: [0, 0],
            },
            channels: Vec::new(),
        };
        nv.initialize(chn_groups);
        nv
    }

    pub fn initialize(&mut self, chn_groups: u8) {
        self.channels = (0..(chn_groups as usize * 0x10))
            .map(|i| {
                let mut c = ChnInfo::default();
                if i % 0x10 == 9 {
                    c.drum = true;
                }
                c
            })
            .collect();
    }

    pub fn reset(&mut self) {
        let groups = (self.channels.len() / 0x10) as u8;
        self.initialize(groups);
    }

    pub fn channel(&self, chn: usize) -> &ChnInfo {
        &self.channels[chn]
    }

    pub fn channel_mut(&mut self, chn: usize) -> &mut ChnInfo {
        &mut self.channels[chn]
    }

    pub fn attributes(&self) -> &MidiModifiers {
        &self.mod_attrs
    }

    pub fn attributes_mut(&mut self) -> &mut MidiModifiers {
        &mut self.mod_attrs
    }

    pub fn advance_age(&mut self, dt_ms: u32) {
        for c in self.channels.iter_mut() {
            c.advance_age(dt_ms);
        }
    }

    /// Read-only snapshot for a UI thread (§5: "MUST consume a snapshot").
    pub fn snapshot(&self) -> Vec<Vec<NoteInfo>> {
        self.channels.iter().map(|c| c.notes().to_vec()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drum_channel_detected_on_init() {
        let nv = NoteVisualization::new(1);
        assert!(nv.channel(9).drum);
        assert!(!nv.channel(0).drum);
    }

    #[test]
    fn hi_hat_group_retires_previous() {
        let mut chn = ChnInfo {
            drum: true,
            ..Default::default()
        };
        chn.add_note(42, 100); // closed hi-hat
        chn.add_note(46, 100); // open hi-hat, same group
        assert_eq!(chn.notes().len(), 1);
        assert_eq!(chn.notes()[0].height, 46);
    }

    #[test]
    fn melody_note_has_no_age_cap() {
        let mut chn = ChnInfo::default();
        chn.add_note(60, 100);
        chn.advance_age(1_000_000);
        assert_eq!(chn.notes().len(), 1);
    }

    #[test]
    fn overflow_trims_to_32() {
        let mut chn = ChnInfo::default();
        for i in 0..200u32 {
            chn.add_note((i % 128) as u8, 100);
        }
        assert!(chn.notes().len() <= 0x80);
    }

    #[test]
    fn drum_note_ages_out() {
        let mut chn = ChnInfo {
            drum: true,
            ..Default::default()
        };
        chn.add_note(0x2A, 100); // closed hi-hat, 80ms
        chn.advance_age(100);
        assert!(chn.notes().is_empty());
    }
}
