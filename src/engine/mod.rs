//! Playback Engine (§4): a single-threaded cooperative scheduler that walks
//! a parsed MIDI file tick by tick, remapping instruments/CTF/pan/drum
//! modes per the bank-scan result and dispatching tempo-accurate output.
//!
//! Grounded on `MidiPlay.hpp`/`MidiPlay.cpp`'s `MidiPlayer` class: a
//! `tickOnce`/`DoPlaybackStep` driven-by-the-caller loop rather than an
//! internal thread, so embedders control their own clock source (§5
//! Concurrency & Resource Model — "caller owns the clock").

pub mod channel;
pub mod instrument;
pub mod reset;
pub mod sysex;

use crate::bank::Bank;
use crate::error::EngineError;
use crate::midifile::{EventKind, MidiEvent, MidiFile};
use crate::module_type::{Family, ModuleType};
use crate::port::PortFanout;
use crate::sink::{EngineObserver, NullObserver};

use channel::ChannelState;
use instrument::InsKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Stopped,
    Playing,
    Paused,
}

#[derive(Debug, Clone, Copy)]
struct TempoEntry {
    tick: u32,
    usec_per_qn: u32,
}

/// A merged, globally tick-ordered cursor position: which track an event
/// came from (for port routing) and its index within that track.
#[derive(Debug, Clone, Copy)]
struct QueuedRef {
    tick: u32,
    track: usize,
    index: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct PlaybackOptions {
    pub ignore_empty_chns: bool,
    pub loop_limit: Option<u32>,
}

impl Default for PlaybackOptions {
    fn default() -> Self {
        PlaybackOptions {
            ignore_empty_chns: false,
            loop_limit: None,
        }
    }
}

struct FadeState {
    start_ms: u64,
    duration_ms: u64,
}

pub struct Engine {
    file: MidiFile,
    source_bank: Bank,
    dest_bank: Bank,
    source_module: ModuleType,
    dest_module: ModuleType,
    options: PlaybackOptions,

    /// One `ChannelState` per (port, MIDI channel) pair, port-major.
    channels: Vec<ChannelState>,
    num_ports: usize,
    track_port: Vec<u8>,

    tempo_map: Vec<TempoEntry>,
    merged: Vec<QueuedRef>,
    cursor: usize,

    port_fanout: PortFanout,
    observer: Box<dyn EngineObserver>,

    state: PlaybackState,
    elapsed_ms: u64,
    loop_count: u32,
    fade: Option<FadeState>,
    master_volume: u8,
}

const DEFAULT_USEC_PER_QN: u32 = 500_000;

impl Engine {
    pub fn new(
        file: MidiFile,
        source_bank: Bank,
        dest_bank: Bank,
        source_module: ModuleType,
        dest_module: ModuleType,
        num_ports: usize,
        options: PlaybackOptions,
    ) -> Result<Self, EngineError> {
        if file.tracks.is_empty() {
            return Err(EngineError::NoTracks);
        }
        let num_ports = num_ports.max(1);
        let mut channels = Vec::with_capacity(num_ports * 16);
        for port in 0..num_ports {
            for chn in 0..16u8 {
                channels.push(ChannelState::new(chn, port as u8));
            }
        }

        let track_port = Self::assign_track_ports(&file, num_ports);
        let tempo_map = Self::build_tempo_map(&file);
        let merged = Self::merge_tracks(&file);

        Ok(Engine {
            file,
            source_bank,
            dest_bank,
            source_module,
            dest_module,
            options,
            channels,
            num_ports,
            track_port,
            tempo_map,
            merged,
            cursor: 0,
            port_fanout: PortFanout::new(),
            observer: Box::new(NullObserver),
            state: PlaybackState::Stopped,
            elapsed_ms: 0,
            loop_count: 0,
            fade: None,
            master_volume: 127,
        })
    }

    pub fn set_output_ports(&mut self, fanout: PortFanout) -> Result<(), EngineError> {
        if fanout.port_count() == 0 {
            return Err(EngineError::NoOutputPorts);
        }
        self.port_fanout = fanout;
        Ok(())
    }

    /// Installs a UI-facing observer; the engine pushes note/instrument/meta
    /// notifications to it as it processes events (§9 observer design note).
    pub fn set_observer(&mut self, observer: Box<dyn EngineObserver>) {
        self.observer = observer;
    }

    /// `MidiPort` meta events assign a track to a logical port; tracks with
    /// none stay on port 0.
    fn assign_track_ports(file: &MidiFile, num_ports: usize) -> Vec<u8> {
        file.tracks
            .iter()
            .map(|trk| {
                let port = trk
                    .events
                    .iter()
                    .find(|e| e.kind == EventKind::Meta && e.data1 == 0x21)
                    .and_then(|e| e.data.first().copied())
                    .unwrap_or(0);
                (port as usize % num_ports) as u8
            })
            .collect()
    }

    fn build_tempo_map(file: &MidiFile) -> Vec<TempoEntry> {
        let mut map = vec![TempoEntry {
            tick: 0,
            usec_per_qn: DEFAULT_USEC_PER_QN,
        }];
        let mut raw: Vec<TempoEntry> = file
            .tracks
            .iter()
            .flat_map(|t| t.events.iter())
            .filter(|e| e.kind == EventKind::Meta && e.data1 == 0x51 && e.data.len() == 3)
            .map(|e| TempoEntry {
                tick: e.tick,
                usec_per_qn: ((e.data[0] as u32) << 16) | ((e.data[1] as u32) << 8) | (e.data[2] as u32),
            })
            .collect();
        raw.sort_by_key(|t| t.tick);
        for t in raw {
            if t.tick == 0 {
                map[0].usec_per_qn = t.usec_per_qn;
            } else {
                map.push(t);
            }
        }
        map
    }

    fn merge_tracks(file: &MidiFile) -> Vec<QueuedRef> {
        let mut merged: Vec<QueuedRef> = file
            .tracks
            .iter()
            .enumerate()
            .flat_map(|(track, t)| {
                t.events.iter().enumerate().map(move |(index, e)| QueuedRef {
                    tick: e.tick,
                    track,
                    index,
                })
            })
            .collect();
        merged.sort_by_key(|r| (r.tick, r.track, r.index));
        merged
    }

    /// Converts an absolute tick into milliseconds by integrating through
    /// the tempo map (the "tempo list", per §4.2).
    fn tick_to_ms(&self, tick: u32) -> u64 {
        let mut ms = 0.0f64;
        let mut last_tick = 0u32;
        let mut last_usec = DEFAULT_USEC_PER_QN;
        for entry in &self.tempo_map {
            if entry.tick >= tick {
                break;
            }
            let span = (entry.tick - last_tick) as f64;
            ms += span * last_usec as f64 / (self.file.ticks_per_quarter as f64 * 1000.0);
            last_tick = entry.tick;
            last_usec = entry.usec_per_qn;
        }
        let span = (tick - last_tick) as f64;
        ms += span * last_usec as f64 / (self.file.ticks_per_quarter as f64 * 1000.0);
        ms.round() as u64
    }

    pub fn get_song_length(&self) -> u64 {
        self.merged.last().map(|r| self.tick_to_ms(r.tick)).unwrap_or(0)
    }

    pub fn get_playback_pos(&self) -> u64 {
        self.elapsed_ms
    }

    pub fn get_state(&self) -> PlaybackState {
        self.state
    }

    pub fn set_loop_limit(&mut self, limit: Option<u32>) {
        self.options.loop_limit = limit;
    }

    pub fn fade_out(&mut self, seconds: f64) {
        self.fade = Some(FadeState {
            start_ms: self.elapsed_ms,
            duration_ms: (seconds * 1000.0) as u64,
        });
    }

    /// `Start`: resets every channel and sends the destination module's
    /// reset sequence before playback begins (§4.7).
    pub fn start(&mut self) -> Result<(), EngineError> {
        if self.port_fanout.port_count() == 0 {
            return Err(EngineError::NoOutputPorts);
        }
        for chn in self.channels.iter_mut() {
            chn.reset_to_defaults();
        }
        self.send_reset_sequence();
        self.cursor = 0;
        self.elapsed_ms = 0;
        self.loop_count = 0;
        self.fade = None;
        self.state = PlaybackState::Playing;
        Ok(())
    }

    pub fn stop(&mut self) {
        self.state = PlaybackState::Stopped;
        self.all_notes_stop();
    }

    /// `pause`: Note-Off every running note, then release Sustain/Sostenuto
    /// if held. Running notes themselves are kept (not cleared) so `resume`
    /// can replay them.
    pub fn pause(&mut self) {
        if self.state != PlaybackState::Playing {
            return;
        }
        self.state = PlaybackState::Paused;
        let now = self.elapsed_ms;
        for idx in 0..self.channels.len() {
            let port = idx / 16;
            let midi_chn = (idx % 16) as u8;
            let notes: Vec<u8> = self.channels[idx].running_notes.iter().map(|n| n.note).collect();
            for note in notes {
                self.port_fanout.send_short(port, now, 0x80 | midi_chn, note, Some(0));
            }
            if self.channels[idx].sustain {
                self.port_fanout.send_short(port, now, 0xB0 | midi_chn, 0x40, Some(0));
            }
            if self.channels[idx].sostenuto {
                self.port_fanout.send_short(port, now, 0xB0 | midi_chn, 0x42, Some(0));
            }
        }
    }

    /// `resume`: restore held pedals, replay running notes (drum channels
    /// excluded — they have no meaningful resume semantics), then go back
    /// to playing.
    pub fn resume(&mut self) {
        if self.state != PlaybackState::Paused {
            return;
        }
        let now = self.elapsed_ms;
        for idx in 0..self.channels.len() {
            let port = idx / 16;
            let midi_chn = (idx % 16) as u8;
            if self.channels[idx].sustain {
                self.port_fanout.send_short(port, now, 0xB0 | midi_chn, 0x40, Some(0x7F));
            }
            if self.channels[idx].sostenuto {
                self.port_fanout.send_short(port, now, 0xB0 | midi_chn, 0x42, Some(0x7F));
            }
            if self.channels[idx].is_drum {
                continue;
            }
            let notes: Vec<(u8, u8)> = self.channels[idx]
                .running_notes
                .iter()
                .map(|n| (n.note, n.velocity))
                .collect();
            for (note, velocity) in notes {
                self.port_fanout.send_short(port, now, 0x90 | midi_chn, note, Some(velocity));
            }
        }
        self.state = PlaybackState::Playing;
    }

    fn send_reset_sequence(&mut self) {
        let now = self.elapsed_ms;
        let mut sequences: Vec<&[u8]> = Vec::new();
        let voice_map;
        match self.dest_module.family() {
            Family::Gm if self.dest_module == ModuleType::Gm2 => sequences.push(&reset::GM2_RESET),
            Family::Gm => sequences.push(&reset::GM1_RESET),
            Family::Gs => {
                sequences.push(&reset::GS_RESET);
                if matches!(
                    self.dest_module,
                    ModuleType::Sc88 | ModuleType::Sc88Pro | ModuleType::Sc8850
                ) {
                    sequences.push(&reset::SC_MODE_SET);
                }
            }
            Family::Xg => {
                sequences.push(&reset::GM1_RESET);
                sequences.push(&reset::XG_RESET);
                sequences.push(&reset::XG_ALL_PARAMS);
                let needs_voice_map = self
                    .dest_module
                    .xg_model_index()
                    .is_some_and(|idx| idx >= crate::scan::MTXG_MU100);
                if needs_voice_map {
                    let vv = if self.source_module.family() == Family::Xg { 1 } else { 0 };
                    voice_map = reset::xg_voice_map(vv);
                    sequences.push(&voice_map);
                }
            }
            Family::Other => return,
        }
        for port in 0..self.num_ports {
            for bytes in &sequences {
                self.port_fanout.send_long(port, now, bytes);
            }
        }
    }

    /// `AllInsRefresh`: re-resolves every channel's instrument against a
    /// newly detected source module, for a mid-song source-family change.
    pub fn set_source_module(&mut self, source_module: ModuleType) {
        self.source_module = source_module;
        for idx in 0..self.channels.len() {
            let port = idx / 16;
            let midi_chn = (idx % 16) as u8;
            self.channels[idx].ins_state = [0xFF, 0xFF, 0xFF];
            self.retrigger_instrument(idx, port, midi_chn);
        }
    }

    /// Channel refresh: for a mid-song destination-family change, resends
    /// the reset sequence then re-emits every channel's controllers,
    /// instrument and RPN state.
    pub fn set_dest_module(&mut self, dest_module: ModuleType) {
        self.dest_module = dest_module;
        self.send_reset_sequence();
        for idx in 0..self.channels.len() {
            self.channel_refresh(idx);
        }
    }

    fn channel_refresh(&mut self, idx: usize) {
        let port = idx / 16;
        let midi_chn = (idx % 16) as u8;
        let now = self.elapsed_ms;

        for cc in 0..0x80usize {
            if cc == 6 || cc == 7 || cc == 10 {
                continue;
            }
            let val = self.channels[idx].ctrls[cc];
            self.port_fanout.send_short(port, now, 0xB0 | midi_chn, cc as u8, Some(val));
        }

        self.channels[idx].ins_state = [0xFF, 0xFF, 0xFF];
        self.retrigger_instrument(idx, port, midi_chn);

        let pb_range = self.channels[idx].pb_range as u8;
        let tune_coarse = (self.channels[idx].tune_coarse + 64) as u8;
        let tune_fine = self.channels[idx].tune_fine;
        let selector = self.channels[idx].rpn_selector;

        self.port_fanout.send_short(port, now, 0xB0 | midi_chn, 0x65, Some(0x00));
        self.port_fanout.send_short(port, now, 0xB0 | midi_chn, 0x64, Some(0x00));
        self.port_fanout.send_short(port, now, 0xB0 | midi_chn, 0x06, Some(pb_range as u8));

        self.port_fanout.send_short(port, now, 0xB0 | midi_chn, 0x65, Some(0x00));
        self.port_fanout.send_short(port, now, 0xB0 | midi_chn, 0x64, Some(0x02));
        self.port_fanout.send_short(port, now, 0xB0 | midi_chn, 0x06, Some(tune_coarse));

        self.port_fanout.send_short(port, now, 0xB0 | midi_chn, 0x65, Some(0x00));
        self.port_fanout.send_short(port, now, 0xB0 | midi_chn, 0x64, Some(0x01));
        self.port_fanout
            .send_short(port, now, 0xB0 | midi_chn, 0x06, Some(((tune_fine >> 8) & 0x7F) as u8));
        self.port_fanout
            .send_short(port, now, 0xB0 | midi_chn, 0x26, Some((tune_fine & 0x7F) as u8));

        self.port_fanout.send_short(port, now, 0xB0 | midi_chn, 0x65, Some(selector[0]));
        self.port_fanout.send_short(port, now, 0xB0 | midi_chn, 0x64, Some(selector[1]));
    }

    /// `AllNotesStop`: forces every channel's running notes off without
    /// waiting for their original Note Off events.
    pub fn all_notes_stop(&mut self) {
        let now = self.elapsed_ms;
        for (idx, chn) in self.channels.iter_mut().enumerate() {
            let port = idx / 16;
            let midi_chn = (idx % 16) as u8;
            let notes: Vec<u8> = chn.running_notes.iter().map(|n| n.note).collect();
            chn.running_notes.clear();
            for note in notes {
                self.port_fanout
                    .send_short(port, now, 0x80 | midi_chn, note, Some(0));
            }
        }
    }

    /// `DoPlaybackStep`/`tickOnce`: advance the wall clock by `delta_ms` and
    /// process every event now due. Returns `true` while there is more to
    /// play (taking loop limit into account).
    pub fn tick_once(&mut self, delta_ms: u64) -> bool {
        if self.state != PlaybackState::Playing {
            return self.state != PlaybackState::Stopped;
        }
        self.elapsed_ms += delta_ms;
        self.apply_fade();

        while self.cursor < self.merged.len() {
            let qref = self.merged[self.cursor];
            if self.tick_to_ms(qref.tick) > self.elapsed_ms {
                break;
            }
            let event = self.file.tracks[qref.track].events[qref.index].clone();
            let port = self.track_port[qref.track] as usize % self.num_ports;
            self.dispatch_event(&event, port);
            self.cursor += 1;
        }

        if self.cursor >= self.merged.len() {
            return self.handle_end_of_song();
        }
        true
    }

    fn handle_end_of_song(&mut self) -> bool {
        self.loop_count += 1;
        match self.options.loop_limit {
            Some(limit) if self.loop_count >= limit => {
                self.state = PlaybackState::Stopped;
                self.all_notes_stop();
                false
            }
            Some(_) => {
                self.cursor = 0;
                self.elapsed_ms = 0;
                true
            }
            None => {
                self.state = PlaybackState::Stopped;
                self.all_notes_stop();
                false
            }
        }
    }

    fn apply_fade(&mut self) {
        let Some(fade) = &self.fade else { return };
        let elapsed = self.elapsed_ms.saturating_sub(fade.start_ms);
        if elapsed >= fade.duration_ms {
            self.state = PlaybackState::Stopped;
            self.all_notes_stop();
        }
    }

    /// Multiplicative fade scale in `[0.0, 1.0]`, applied to outgoing
    /// Note-On velocity and CC7 (Main Volume) restatement while a fade is
    /// in progress. `1.0` when there is no active fade.
    fn fade_scale(&self) -> f64 {
        match &self.fade {
            Some(fade) if fade.duration_ms > 0 => {
                let elapsed = self.elapsed_ms.saturating_sub(fade.start_ms) as f64;
                (1.0 - elapsed / fade.duration_ms as f64).clamp(0.0, 1.0)
            }
            Some(_) => 0.0,
            None => 1.0,
        }
    }

    fn dispatch_event(&mut self, event: &MidiEvent, port: usize) {
        match event.kind {
            EventKind::NoteOn if event.data2 > 0 => self.handle_note_on(event, port),
            EventKind::NoteOn | EventKind::NoteOff => self.handle_note_off(event, port),
            EventKind::ControlChange => self.handle_control_change(event, port),
            EventKind::ProgramChange => self.handle_program_change(event, port),
            EventKind::PitchBend => self.forward_short(
                port,
                0xE0 | (event.channel & 0x0F),
                event.data1,
                Some(event.data2),
            ),
            EventKind::PolyAftertouch => self.forward_short(
                port,
                0xA0 | (event.channel & 0x0F),
                event.data1,
                Some(event.data2),
            ),
            EventKind::ChannelAftertouch => {
                self.forward_short(port, 0xD0 | (event.channel & 0x0F), event.data1, None)
            }
            EventKind::SysEx => self.handle_sysex(event, port),
            EventKind::Meta => self.observer.on_meta(event.data1, &event.data),
        }
    }

    fn chn_index(&self, port: usize, midi_chn: u8) -> usize {
        port * 16 + (midi_chn as usize % 16)
    }

    fn handle_note_on(&mut self, event: &MidiEvent, port: usize) {
        let idx = self.chn_index(port, event.channel);
        let velocity = (event.data2 as f64 * self.fade_scale()).round().clamp(0.0, 127.0) as u8;
        self.channels[idx].add_running_note(event.data1, velocity, 0);
        self.forward_short(port, 0x90 | (event.channel & 0x0F), event.data1, Some(velocity));
        self.observer.on_note_on(idx, event.data1, velocity);
    }

    fn handle_note_off(&mut self, event: &MidiEvent, port: usize) {
        let idx = self.chn_index(port, event.channel);
        self.channels[idx].remove_running_note(event.data1);
        self.forward_short(port, 0x80 | (event.channel & 0x0F), event.data1, Some(0));
        self.observer.on_note_off(idx, event.data1);
    }

    fn handle_control_change(&mut self, event: &MidiEvent, port: usize) {
        let idx = self.chn_index(port, event.channel);
        let cc = event.data1;
        let val = event.data2;
        self.channels[idx].ctrls[cc as usize] = val;

        match cc {
            0x00 => self.channels[idx].ins_org.bank[0] = val,
            0x20 => self.channels[idx].ins_org.bank[1] = val,
            0x40 => self.channels[idx].sustain = val >= 0x40,
            0x42 => self.channels[idx].sostenuto = val >= 0x40,
            0x62 | 0x63 => self.channels[idx].rpn_selector = [0xFF, 0xFF], // NRPN select, deferred
            0x64 => self.channels[idx].rpn_selector[1] = val,
            0x65 => self.channels[idx].rpn_selector[0] = val,
            0x06 | 0x26 => self.apply_rpn_data(idx, cc == 0x06, val),
            _ => {}
        }

        let remapped_cc = match cc {
            0x01 => self.channels[idx].cc_remap[0].unwrap_or(cc),
            0x02 => self.channels[idx].cc_remap[1].unwrap_or(cc),
            _ => cc,
        };
        // CC7 (Main Volume) restatement is scaled while a fade-out is active.
        let out_val = if cc == 0x07 {
            (val as f64 * self.fade_scale()).round().clamp(0.0, 127.0) as u8
        } else {
            val
        };
        self.forward_short(port, 0xB0 | (event.channel & 0x0F), remapped_cc, Some(out_val));
    }

    fn apply_rpn_data(&mut self, idx: usize, is_msb: bool, val: u8) {
        let selector = self.channels[idx].rpn_selector;
        if selector == [0x00, 0x00] {
            if is_msb {
                self.channels[idx].pb_range = val as i8;
                self.channels[idx].pb_range_unscaled = val as i8;
            }
        } else if selector == [0x00, 0x01] {
            if is_msb {
                self.channels[idx].tune_fine = (self.channels[idx].tune_fine & 0x00FF)
                    | ((val as i16) << 8);
            } else {
                self.channels[idx].tune_fine = (self.channels[idx].tune_fine & 0xFF00) | val as i16;
            }
        } else if selector == [0x00, 0x02] && is_msb {
            self.channels[idx].tune_coarse = val as i8 - 64;
        }
    }

    fn handle_program_change(&mut self, event: &MidiEvent, port: usize) {
        let idx = self.chn_index(port, event.channel);
        let is_drum = self.channels[idx].is_drum;
        self.channels[idx].ins_org.ins = event.data1 | if is_drum { 0x80 } else { 0 };
        self.retrigger_instrument(idx, port, event.channel & 0x0F);
    }

    /// Two-pass instrument resolution (§4.5): `GetOriginal` tags the
    /// instrument against the source bank (with its `bnkIgn` wildcard mask
    /// recorded on the channel), then the family-pair common patches are
    /// applied before `GetRemapped` resolves against the destination bank.
    fn retrigger_instrument(&mut self, idx: usize, port: usize, midi_chn: u8) {
        let key = InsKey {
            bank_msb: self.channels[idx].ins_org.bank[0],
            bank_lsb: self.channels[idx].ins_org.bank[1],
            program: self.channels[idx].ins_org.ins,
        };
        let new_state = [key.bank_msb, key.bank_lsb, key.program & 0x7F];
        if self.channels[idx].ins_state == new_state {
            return;
        }
        self.channels[idx].ins_state = new_state;

        let bank_ignore = instrument::compute_bank_ignore(self.source_module, key.is_drum());
        self.channels[idx].ins_org.bank_ignore = bank_ignore;
        let _original = instrument::get_original(&self.source_bank, key, self.source_module, bank_ignore);

        let patched =
            instrument::apply_common_patches(key, self.source_module, self.dest_module, midi_chn, &self.dest_bank);
        let resolved = instrument::get_remapped(&self.dest_bank, patched, self.dest_module);
        self.channels[idx].cur_ins = resolved.key.program;

        self.forward_short(port, 0xB0 | midi_chn, 0x00, Some(resolved.key.bank_msb));
        self.forward_short(port, 0xB0 | midi_chn, 0x20, Some(resolved.key.bank_lsb));
        self.forward_short(port, 0xC0 | midi_chn, resolved.key.program & 0x7F, None);
        self.observer.on_instrument_change(
            idx,
            resolved.key.bank_msb,
            resolved.key.bank_lsb,
            resolved.key.program & 0x7F,
        );
    }

    fn handle_sysex(&mut self, event: &MidiEvent, port: usize) {
        let now = self.elapsed_ms;
        let data = &event.data;
        if data.len() >= 4 && data[0] == 0x41 {
            // Strip `41 dev 42 12` (manufacturer/device/model/command), leaving
            // the address-through-checksum span `handle_sysex_gs` expects.
            let port_range = self.chn_range(port);
            let actions = sysex::handle_sysex_gs(&data[4..], &mut self.channels[port_range]);
            self.apply_sysex_actions(actions, port);
        } else if data.len() >= 3 && data[0] == 0x43 {
            // Strip `43 1n 4C` (manufacturer/device/model), leaving the
            // address-through-data span `handle_sysex_xg` expects.
            let port_range = self.chn_range(port);
            let actions = sysex::handle_sysex_xg(&data[3..], &mut self.channels[port_range]);
            self.apply_sysex_actions(actions, port);
        } else {
            let mut full = vec![0xF0];
            full.extend_from_slice(data);
            full.push(0xF7);
            self.port_fanout.send_long(port, now, &full);
        }
    }

    fn chn_range(&self, port: usize) -> std::ops::Range<usize> {
        (port * 16)..(port * 16 + 16)
    }

    fn apply_sysex_actions(&mut self, actions: Vec<sysex::SysExAction>, port: usize) {
        for action in actions {
            if let sysex::SysExAction::RetriggerInstrument(local_chn) = action {
                let idx = self.chn_index(port, local_chn as u8);
                self.retrigger_instrument(idx, port, local_chn as u8);
            }
        }
    }

    fn forward_short(&mut self, port: usize, status: u8, d1: u8, d2: Option<u8>) {
        let now = self.elapsed_ms;
        self.port_fanout.send_short(port, now, status, d1, d2);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::midifile::{EventKind, MidiEvent, MidiFile, MidiTrack};
    use crate::sink::RecordingSink;

    fn one_track_file() -> MidiFile {
        MidiFile {
            ticks_per_quarter: 480,
            tracks: vec![MidiTrack {
                events: vec![
                    MidiEvent {
                        tick: 0,
                        kind: EventKind::NoteOn,
                        channel: 0,
                        data1: 60,
                        data2: 100,
                        data: Vec::new(),
                    },
                    MidiEvent {
                        tick: 480,
                        kind: EventKind::NoteOff,
                        channel: 0,
                        data1: 60,
                        data2: 0,
                        data: Vec::new(),
                    },
                ],
            }],
        }
    }

    fn engine_with_one_port(file: MidiFile) -> Engine {
        let mut engine = Engine::new(
            file,
            Bank::new(),
            Bank::new(),
            ModuleType::Gm1,
            ModuleType::Gm1,
            1,
            PlaybackOptions::default(),
        )
        .unwrap();
        let mut fanout = PortFanout::new();
        fanout.add_port(Box::new(RecordingSink::default()), 0);
        engine.set_output_ports(fanout).unwrap();
        engine
    }

    #[test]
    fn rejects_file_with_no_tracks() {
        let file = MidiFile {
            ticks_per_quarter: 480,
            tracks: Vec::new(),
        };
        let err = Engine::new(
            file,
            Bank::new(),
            Bank::new(),
            ModuleType::Gm1,
            ModuleType::Gm1,
            1,
            PlaybackOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::NoTracks));
    }

    #[test]
    fn start_requires_output_port() {
        let file = one_track_file();
        let mut engine = Engine::new(
            file,
            Bank::new(),
            Bank::new(),
            ModuleType::Gm1,
            ModuleType::Gm1,
            1,
            PlaybackOptions::default(),
        )
        .unwrap();
        assert!(matches!(engine.start(), Err(EngineError::NoOutputPorts)));
    }

    #[test]
    fn playback_reaches_end_and_stops_without_loop() {
        let mut engine = engine_with_one_port(one_track_file());
        engine.start().unwrap();
        let mut still_playing = true;
        for _ in 0..10 {
            still_playing = engine.tick_once(200);
        }
        assert!(!still_playing);
        assert_eq!(engine.get_state(), PlaybackState::Stopped);
    }

    #[test]
    fn loop_limit_restarts_song() {
        let mut engine = engine_with_one_port(one_track_file());
        engine.set_loop_limit(Some(2));
        engine.start().unwrap();
        for _ in 0..30 {
            if engine.get_state() == PlaybackState::Stopped {
                break;
            }
            engine.tick_once(100);
        }
        assert_eq!(engine.get_state(), PlaybackState::Stopped);
    }

    #[test]
    fn song_length_matches_last_event_tick() {
        let engine = engine_with_one_port(one_track_file());
        assert!(engine.get_song_length() > 0);
    }
}
