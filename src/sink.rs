//! Output-sink abstraction. Each sink exposes only send-short/send-long, per
//! the system overview's "output-port adapters ... expose only send-short-msg
//! and send-long-msg" framing — concrete transports (platform MIDI drivers)
//! are out of scope; this crate ships a couple of trivial sinks useful for
//! tests and offline rendering.

use tracing::debug;

/// A MIDI output transport. Implementations are assumed non-blocking at the
/// wire (§5); if the transport buffers, the engine is unaffected.
pub trait OutputSink: std::fmt::Debug {
    /// A 2- or 3-byte channel voice message (`status, data1[, data2]`).
    fn send_short(&mut self, status: u8, data1: u8, data2: Option<u8>);
    /// A complete `F0 ... F7` SysEx message.
    fn send_long(&mut self, data: &[u8]);
}

/// Records every message sent, in order. Used by tests and by the CLI's
/// offline-render mode.
#[derive(Debug, Default, Clone)]
pub struct RecordingSink {
    pub messages: Vec<RecordedMessage>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedMessage {
    Short(u8, u8, Option<u8>),
    Long(Vec<u8>),
}

impl OutputSink for RecordingSink {
    fn send_short(&mut self, status: u8, data1: u8, data2: Option<u8>) {
        self.messages.push(RecordedMessage::Short(status, data1, data2));
    }

    fn send_long(&mut self, data: &[u8]) {
        self.messages.push(RecordedMessage::Long(data.to_vec()));
    }
}

/// Discards everything; useful when only the note-visualization side
/// effects of a tick matter.
#[derive(Debug, Default)]
pub struct NullSink;

impl OutputSink for NullSink {
    fn send_short(&mut self, status: u8, data1: u8, data2: Option<u8>) {
        debug!(status, data1, ?data2, "discarding short message (null sink)");
    }

    fn send_long(&mut self, data: &[u8]) {
        debug!(len = data.len(), "discarding long message (null sink)");
    }
}

/// UI-facing observer (§9 "Coroutines / callbacks → explicit state
/// machine"): the source notifies a UI via a raw callback pointer
/// (`_evtCbFunc`); here the engine instead pushes snapshots through an
/// interface the UI pulls from, with no callback re-entering engine state.
pub trait EngineObserver {
    fn on_instrument_change(&mut self, channel: usize, bank_msb: u8, bank_lsb: u8, program: u8);
    fn on_note_on(&mut self, channel: usize, note: u8, velocity: u8);
    fn on_note_off(&mut self, channel: usize, note: u8);
    fn on_meta(&mut self, kind: u8, payload: &[u8]);
}

/// Drops every notification; the default when nothing is watching
/// playback.
#[derive(Debug, Default)]
pub struct NullObserver;

impl EngineObserver for NullObserver {
    fn on_instrument_change(&mut self, _channel: usize, _bank_msb: u8, _bank_lsb: u8, _program: u8) {}
    fn on_note_on(&mut self, _channel: usize, _note: u8, _velocity: u8) {}
    fn on_note_off(&mut self, _channel: usize, _note: u8) {}
    fn on_meta(&mut self, _kind: u8, _payload: &[u8]) {}
}

/// Records every notification, in order; used by tests and by any embedder
/// that wants a pull-based snapshot instead of implementing its own
/// observer.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    pub events: Vec<ObserverEvent>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObserverEvent {
    InstrumentChange { channel: usize, bank_msb: u8, bank_lsb: u8, program: u8 },
    NoteOn { channel: usize, note: u8, velocity: u8 },
    NoteOff { channel: usize, note: u8 },
    Meta { kind: u8, payload: Vec<u8> },
}

impl EngineObserver for RecordingObserver {
    fn on_instrument_change(&mut self, channel: usize, bank_msb: u8, bank_lsb: u8, program: u8) {
        self.events.push(ObserverEvent::InstrumentChange {
            channel,
            bank_msb,
            bank_lsb,
            program,
        });
    }
    fn on_note_on(&mut self, channel: usize, note: u8, velocity: u8) {
        self.events.push(ObserverEvent::NoteOn { channel, note, velocity });
    }
    fn on_note_off(&mut self, channel: usize, note: u8) {
        self.events.push(ObserverEvent::NoteOff { channel, note });
    }
    fn on_meta(&mut self, kind: u8, payload: &[u8]) {
        self.events.push(ObserverEvent::Meta {
            kind,
            payload: payload.to_vec(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_sink_preserves_order() {
        let mut sink = RecordingSink::default();
        sink.send_short(0x90, 60, Some(100));
        sink.send_long(&[0xF0, 0x7E, 0x7F, 0x09, 0x01, 0xF7]);
        assert_eq!(sink.messages.len(), 2);
        assert_eq!(sink.messages[0], RecordedMessage::Short(0x90, 60, Some(100)));
    }
}
