//! Port Fan-out (§4.6): maps logical MIDI ports (as embedded in the file) to
//! physical output sinks, applying per-port optional delay.
//!
//! Grounded on `MidiPlay.hpp`'s `_outPorts`/`_outPortDelay`/`_midiEvtQueue`:
//! the original queues timestamped events per output port and drains them
//! as the wall clock passes each queued time, which is how per-port delay is
//! realized without blocking the scheduler. This module keeps the same
//! queue-and-drain shape.

use crate::sink::OutputSink;
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy)]
pub enum QueuedMessage {
    Short(u8, u8, Option<u8>),
    Long(usize, usize), // (offset, len) into a side buffer, to avoid per-event allocation
}

struct QueuedEvent {
    due_time_ms: u64,
    message: QueuedMessage,
}

/// One physical output sink plus its delay queue.
pub struct PortQueue {
    pub sink: Box<dyn OutputSink>,
    delay_ms: u32,
    pending: VecDeque<QueuedEvent>,
    long_buf: Vec<u8>,
}

impl std::fmt::Debug for PortQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortQueue")
            .field("delay_ms", &self.delay_ms)
            .field("pending", &self.pending.len())
            .finish()
    }
}

impl PortQueue {
    pub fn new(sink: Box<dyn OutputSink>, delay_ms: u32) -> Self {
        PortQueue {
            sink,
            delay_ms,
            pending: VecDeque::new(),
            long_buf: Vec::new(),
        }
    }

    fn enqueue(&mut self, now_ms: u64, message: QueuedMessage) {
        if self.delay_ms == 0 {
            self.dispatch(message);
        } else {
            self.pending.push_back(QueuedEvent {
                due_time_ms: now_ms + self.delay_ms as u64,
                message,
            });
        }
    }

    fn dispatch(&mut self, message: QueuedMessage) {
        match message {
            QueuedMessage::Short(status, d1, d2) => self.sink.send_short(status, d1, d2),
            QueuedMessage::Long(offset, len) => {
                let data = self.long_buf[offset..offset + len].to_vec();
                self.sink.send_long(&data);
            }
        }
    }

    /// Drains every message whose due time has passed.
    pub fn drain_due(&mut self, now_ms: u64) {
        while let Some(front) = self.pending.front() {
            if front.due_time_ms > now_ms {
                break;
            }
            let ev = self.pending.pop_front().unwrap();
            self.dispatch(ev.message);
        }
    }
}

/// The ordered list of output sinks, and the table mapping a track's
/// logical port id to a sink index.
#[derive(Default)]
pub struct PortFanout {
    ports: Vec<PortQueue>,
    track_port_map: Vec<usize>,
}

impl std::fmt::Debug for PortFanout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortFanout")
            .field("ports", &self.ports.len())
            .field("track_port_map", &self.track_port_map)
            .finish()
    }
}

impl PortFanout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_port(&mut self, sink: Box<dyn OutputSink>, delay_ms: u32) {
        self.ports.push(PortQueue::new(sink, delay_ms));
    }

    pub fn set_track_port_map(&mut self, map: Vec<usize>) {
        self.track_port_map = map;
    }

    pub fn port_count(&self) -> usize {
        self.ports.len()
    }

    /// Maps a logical port id (as embedded in the file) through the
    /// user-supplied table to a sink index, clamped to the first sink on
    /// overflow.
    pub fn resolve_sink(&self, logical_port: u8) -> usize {
        if self.ports.is_empty() {
            return 0;
        }
        self.track_port_map
            .get(logical_port as usize)
            .copied()
            .filter(|&idx| idx < self.ports.len())
            .unwrap_or(0)
    }

    pub fn send_short(&mut self, sink_idx: usize, now_ms: u64, status: u8, d1: u8, d2: Option<u8>) {
        if let Some(port) = self.ports.get_mut(sink_idx) {
            port.enqueue(now_ms, QueuedMessage::Short(status, d1, d2));
        }
    }

    pub fn send_long(&mut self, sink_idx: usize, now_ms: u64, data: &[u8]) {
        if let Some(port) = self.ports.get_mut(sink_idx) {
            let offset = port.long_buf.len();
            port.long_buf.extend_from_slice(data);
            port.enqueue(now_ms, QueuedMessage::Long(offset, data.len()));
        }
    }

    pub fn drain_due(&mut self, now_ms: u64) {
        for port in self.ports.iter_mut() {
            port.drain_due(now_ms);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::RecordingSink;

    #[test]
    fn zero_delay_dispatches_immediately() {
        let mut fanout = PortFanout::new();
        fanout.add_port(Box::new(RecordingSink::default()), 0);
        fanout.send_short(0, 0, 0x90, 60, Some(100));
        // with zero delay the message has already reached the sink; we
        // can't downcast here, but drain_due should be a no-op.
        fanout.drain_due(0);
    }

    #[test]
    fn overflow_port_clamps_to_first_sink() {
        let mut fanout = PortFanout::new();
        fanout.add_port(Box::new(RecordingSink::default()), 0);
        fanout.set_track_port_map(vec![0]);
        assert_eq!(fanout.resolve_sink(5), 0);
    }

    #[test]
    fn delayed_message_waits_for_due_time() {
        let mut fanout = PortFanout::new();
        fanout.add_port(Box::new(RecordingSink::default()), 50);
        fanout.send_short(0, 0, 0x90, 60, Some(100));
        fanout.drain_due(10);
        fanout.drain_due(60);
    }
}
