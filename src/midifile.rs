//! Parsed-MIDI-file surface consumed by the bank-scan analyzer and the
//! playback engine.
//!
//! The actual SMF parser is an external collaborator (out of scope per the
//! system overview); what the analyzer and engine need is just the
//! tracks-and-events view described in §6: each event carries `kind`,
//! `data1`, `data2`, raw `data[]` (for SysEx/meta) and a `tick`. This module
//! defines that minimal surface plus an adapter from `midly`, which is the
//! concrete parser this crate links against for its own CLI entry point.

use midly::{MetaMessage, MidiMessage, Smf, Timing, TrackEventKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    NoteOff,
    NoteOn,
    PolyAftertouch,
    ControlChange,
    ProgramChange,
    ChannelAftertouch,
    PitchBend,
    SysEx,
    /// Meta event; `data1` holds the meta type byte.
    Meta,
}

#[derive(Debug, Clone)]
pub struct MidiEvent {
    pub tick: u32,
    pub kind: EventKind,
    pub channel: u8,
    pub data1: u8,
    pub data2: u8,
    /// Raw payload for SysEx (without the leading F0, per convention of the
    /// original library) and Meta events (the meta payload bytes).
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Default)]
pub struct MidiTrack {
    pub events: Vec<MidiEvent>,
}

#[derive(Debug, Clone)]
pub struct MidiFile {
    pub ticks_per_quarter: u16,
    pub tracks: Vec<MidiTrack>,
}

impl MidiFile {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, String> {
        let smf = Smf::parse(bytes).map_err(|e| e.to_string())?;
        let ticks_per_quarter = match smf.header.timing {
            Timing::Metrical(n) => n.as_int(),
            Timing::Timecode(_, _) => return Err("SMPTE timing not supported".to_string()),
        };

        let mut tracks = Vec::with_capacity(smf.tracks.len());
        for trk in &smf.tracks {
            let mut tick: u32 = 0;
            let mut events = Vec::new();
            for ev in trk {
                tick = tick.saturating_add(ev.delta.as_int());
                match ev.kind {
                    TrackEventKind::Midi { channel, message } => {
                        let channel = channel.as_int();
                        let (kind, data1, data2) = match message {
                            MidiMessage::NoteOff { key, vel } => {
                                (EventKind::NoteOff, key.as_int(), vel.as_int())
                            }
                            MidiMessage::NoteOn { key, vel } => {
                                (EventKind::NoteOn, key.as_int(), vel.as_int())
                            }
                            MidiMessage::Aftertouch { key, vel } => {
                                (EventKind::PolyAftertouch, key.as_int(), vel.as_int())
                            }
                            MidiMessage::Controller { controller, value } => {
                                (EventKind::ControlChange, controller.as_int(), value.as_int())
                            }
                            MidiMessage::ProgramChange { program } => {
                                (EventKind::ProgramChange, program.as_int(), 0)
                            }
                            MidiMessage::ChannelAftertouch { vel } => {
                                (EventKind::ChannelAftertouch, vel.as_int(), 0)
                            }
                            MidiMessage::PitchBend { bend } => {
                                let raw = bend.0.as_int();
                                ((EventKind::PitchBend), (raw & 0x7F) as u8, (raw >> 7) as u8)
                            }
                        };
                        events.push(MidiEvent {
                            tick,
                            kind,
                            channel,
                            data1,
                            data2,
                            data: Vec::new(),
                        });
                    }
                    TrackEventKind::SysEx(data) => {
                        events.push(MidiEvent {
                            tick,
                            kind: EventKind::SysEx,
                            channel: 0,
                            data1: 0,
                            data2: 0,
                            data: data.to_vec(),
                        });
                    }
                    TrackEventKind::Meta(meta) => {
                        let (ty, payload): (u8, Vec<u8>) = match meta {
                            MetaMessage::Text(t) => (0x01, t.to_vec()),
                            MetaMessage::MidiChannel(c) => (0x20, vec![c.as_int()]),
                            MetaMessage::MidiPort(p) => (0x21, vec![p.as_int()]),
                            MetaMessage::EndOfTrack => (0x2F, Vec::new()),
                            MetaMessage::Tempo(t) => (0x51, t.as_int().to_be_bytes()[1..].to_vec()),
                            MetaMessage::TimeSignature(n, d, c, b) => {
                                (0x58, vec![n, d, c, b])
                            }
                            MetaMessage::KeySignature(sf, mi) => {
                                (0x59, vec![sf as u8, mi as u8])
                            }
                            _ => (0xFF, Vec::new()),
                        };
                        events.push(MidiEvent {
                            tick,
                            kind: EventKind::Meta,
                            channel: 0,
                            data1: ty,
                            data2: 0,
                            data: payload,
                        });
                    }
                    TrackEventKind::Escape(_) => {}
                }
            }
            tracks.push(MidiTrack { events });
        }

        Ok(MidiFile {
            ticks_per_quarter,
            tracks,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_has_no_tracks_by_default() {
        let f = MidiFile {
            ticks_per_quarter: 480,
            tracks: Vec::new(),
        };
        assert!(f.tracks.is_empty());
    }
}
