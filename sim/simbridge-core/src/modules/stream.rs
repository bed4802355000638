//! The hardware-facing half of every transport: a byte-wide valid/ready
//! stream in each direction, clocked one beat per rising edge.

use crate::{
    error::{LinkError, ModuleError},
    framing::MAX_FRAME_LEN,
    pads::{PadList, Signal},
    queues::SharedQueue,
};
use std::mem;

pub const SINK_DATA: &str = "sink_data";
pub const SINK_VALID: &str = "sink_valid";
pub const SINK_READY: &str = "sink_ready";
pub const SINK_FIRST: &str = "sink_first";
pub const SINK_LAST: &str = "sink_last";
pub const SOURCE_DATA: &str = "source_data";
pub const SOURCE_VALID: &str = "source_valid";
pub const SOURCE_READY: &str = "source_ready";
pub const SOURCE_FIRST: &str = "source_first";
pub const SOURCE_LAST: &str = "source_last";
pub const SYS_CLK: &str = "sys_clk";

/// The wires of one stream interface.
///
/// `sink` carries data into the hardware, `source` carries data out of it.
/// The first/last qualifiers are optional on both sides.
#[derive(Debug, Clone)]
pub struct StreamPads {
    pub sink_data: Signal,
    pub sink_valid: Signal,
    pub sink_ready: Signal,
    pub sink_first: Option<Signal>,
    pub sink_last: Option<Signal>,
    pub source_data: Signal,
    pub source_valid: Signal,
    pub source_ready: Signal,
    pub source_first: Option<Signal>,
    pub source_last: Option<Signal>,
}

impl StreamPads {
    pub fn bind(list: &PadList) -> Result<Self, ModuleError> {
        Ok(Self {
            sink_data: list.require(SINK_DATA)?,
            sink_valid: list.require(SINK_VALID)?,
            sink_ready: list.require(SINK_READY)?,
            sink_first: list.pad(SINK_FIRST).cloned(),
            sink_last: list.pad(SINK_LAST).cloned(),
            source_data: list.require(SOURCE_DATA)?,
            source_valid: list.require(SOURCE_VALID)?,
            source_ready: list.require(SOURCE_READY)?,
            source_first: list.pad(SOURCE_FIRST).cloned(),
            source_last: list.pad(SOURCE_LAST).cloned(),
        })
    }
}

/// Fails unless `slot` was filled from the pad list `interface`, whose
/// first mandatory pad is `pad`.
pub(crate) fn ensure_bound<T>(
    slot: &Option<T>,
    interface: &str,
    pad: &str,
) -> Result<(), ModuleError> {
    match slot {
        Some(_) => Ok(()),
        None => Err(ModuleError::Binding {
            interface: interface.to_string(),
            pad: pad.to_string(),
        }),
    }
}

fn set_optional(signal: &Option<Signal>, value: bool) {
    if let Some(signal) = signal {
        signal.set_bool(value);
    }
}

/// Collects bytes the hardware drives on the source side into frames.
#[derive(Debug, Default)]
pub struct TxAssembler {
    buf: Vec<u8>,
    prev_valid: bool,
}

impl TxAssembler {
    pub fn new() -> Self {
        Default::default()
    }

    /// Bytes collected for the frame in progress.
    pub fn pending(&self) -> &[u8] {
        &self.buf
    }

    /// One beat of raw Ethernet framing: the frame ends on the first edge
    /// source valid is low. Hardware that never drops valid between two
    /// frames runs them together, and the result is rejected once it
    /// outgrows the largest frame.
    pub fn clock_until_idle(&mut self, pads: &StreamPads) -> Result<Option<Vec<u8>>, LinkError> {
        pads.source_ready.set_bool(true);
        if pads.source_valid.is_high() {
            self.push(pads.source_data.get() as u8)?;
            Ok(None)
        } else if !self.buf.is_empty() {
            Ok(Some(mem::take(&mut self.buf)))
        } else {
            Ok(None)
        }
    }

    /// One beat of qualified framing, used by the serial transports.
    ///
    /// With explicit first/last pads the hardware marks the boundaries.
    /// Without them, a frame starts on the beat valid rises and is complete
    /// on the beat valid falls.
    ///
    /// # Panics
    ///
    /// A completed frame must hold at least one byte.
    pub fn clock_framed(&mut self, pads: &StreamPads) -> Result<Option<Vec<u8>>, LinkError> {
        pads.source_ready.set_bool(true);
        let valid = pads.source_valid.is_high();
        let first = match &pads.source_first {
            Some(first) => valid && first.is_high(),
            None => !self.prev_valid && valid,
        };
        let last = match &pads.source_last {
            Some(last) => valid && last.is_high(),
            None => self.prev_valid && !valid,
        };
        self.prev_valid = valid;

        if first {
            self.buf.clear();
        }
        if valid {
            self.push(pads.source_data.get() as u8)?;
        }
        if last {
            assert!(
                !self.buf.is_empty(),
                "streams can't represent a zero-length frame"
            );
            return Ok(Some(mem::take(&mut self.buf)));
        }
        Ok(None)
    }

    fn push(&mut self, byte: u8) -> Result<(), LinkError> {
        if self.buf.len() >= MAX_FRAME_LEN {
            let len = self.buf.len() + 1;
            self.buf.clear();
            Err(LinkError::Oversized {
                len,
                max: MAX_FRAME_LEN,
            })?
        }
        self.buf.push(byte);
        Ok(())
    }
}

/// Presents queued frames to the hardware on the sink side, one byte per
/// beat, one frame at a time.
///
/// Loading a frame from the queue takes a beat of its own with sink valid
/// low, so consecutive frames are always separated by an idle beat.
#[derive(Debug, Default)]
pub struct RxFeeder {
    frame: Vec<u8>,
    sent: usize,
}

impl RxFeeder {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn in_flight(&self) -> bool {
        !self.frame.is_empty()
    }

    /// The frame currently being delivered.
    pub fn frame(&self) -> &[u8] {
        &self.frame
    }

    /// Advances one beat. Returns whether a new frame was taken from `queue`
    /// on this beat.
    pub fn clock(&mut self, pads: &StreamPads, queue: &SharedQueue) -> bool {
        pads.sink_valid.set_bool(false);
        set_optional(&pads.sink_first, false);
        set_optional(&pads.sink_last, false);

        if !self.frame.is_empty() {
            pads.sink_valid.set_bool(true);
            pads.sink_data.set(self.frame[self.sent] as u64);
            set_optional(&pads.sink_first, self.sent == 0);
            set_optional(&pads.sink_last, self.sent + 1 == self.frame.len());
            if pads.sink_ready.is_high() {
                self.sent += 1;
            }
            if self.sent == self.frame.len() {
                self.frame.clear();
                self.sent = 0;
            }
            false
        } else {
            match queue.borrow_mut().get() {
                Some(frame) => {
                    self.frame = frame;
                    self.sent = 0;
                    self.in_flight()
                }
                None => false,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{pads::Pad, queues::FrameQueue};

    fn pads(qualifiers: bool) -> (PadList, StreamPads) {
        let mut list = vec![
            Pad::new(SINK_DATA, Signal::new(8)),
            Pad::new(SINK_VALID, Signal::new(1)),
            Pad::new(SINK_READY, Signal::new(1)),
            Pad::new(SOURCE_DATA, Signal::new(8)),
            Pad::new(SOURCE_VALID, Signal::new(1)),
            Pad::new(SOURCE_READY, Signal::new(1)),
        ];
        if qualifiers {
            for name in [SINK_FIRST, SINK_LAST, SOURCE_FIRST, SOURCE_LAST] {
                list.push(Pad::new(name, Signal::new(1)));
            }
        }
        let list = PadList::new("serial", 0, list);
        let bound = StreamPads::bind(&list).unwrap();
        (list, bound)
    }

    /// Drives `bytes` out of the hardware, then idles for `idle` beats.
    fn drive(
        tx: &mut TxAssembler,
        pads: &StreamPads,
        bytes: &[u8],
        idle: usize,
        framed: bool,
    ) -> Vec<Vec<u8>> {
        let mut frames = Vec::new();
        let mut beat = |tx: &mut TxAssembler| {
            let out = if framed {
                tx.clock_framed(pads)
            } else {
                tx.clock_until_idle(pads)
            };
            frames.extend(out.unwrap());
        };
        for (i, &byte) in bytes.iter().enumerate() {
            pads.source_valid.set_bool(true);
            pads.source_data.set(byte as u64);
            if let Some(first) = &pads.source_first {
                first.set_bool(i == 0);
            }
            if let Some(last) = &pads.source_last {
                last.set_bool(i + 1 == bytes.len());
            }
            beat(tx);
        }
        pads.source_valid.set_bool(false);
        for _ in 0..idle {
            beat(tx);
        }
        frames
    }

    #[test]
    fn binding_requires_the_handshake_pads() {
        let list = PadList::new("eth", 0, vec![Pad::new(SINK_DATA, Signal::new(8))]);
        assert!(matches!(
            StreamPads::bind(&list),
            Err(ModuleError::Binding { pad, .. }) if pad == SINK_VALID
        ));
        let (_, bound) = pads(false);
        assert!(bound.sink_first.is_none());
        let (_, bound) = pads(true);
        assert!(bound.source_last.is_some());
    }

    #[test]
    fn raw_frame_ends_when_valid_drops() {
        let (_list, pads) = pads(false);
        let mut tx = TxAssembler::new();
        let frames = drive(&mut tx, &pads, b"hello", 3, false);
        assert_eq!(frames, vec![b"hello".to_vec()]);
        assert!(pads.source_ready.is_high());
        assert!(tx.pending().is_empty());
    }

    #[test]
    fn inferred_boundaries_frame_each_burst() {
        let (_list, pads) = pads(false);
        let mut tx = TxAssembler::new();
        let mut frames = drive(&mut tx, &pads, &[1, 2, 3], 1, true);
        frames.extend(drive(&mut tx, &pads, &[4], 2, true));
        assert_eq!(frames, vec![vec![1, 2, 3], vec![4]]);
    }

    #[test]
    fn explicit_qualifiers_split_back_to_back_frames() {
        let (_list, pads) = pads(true);
        let mut tx = TxAssembler::new();
        let mut frames = drive(&mut tx, &pads, &[1, 2], 0, true);
        frames.extend(drive(&mut tx, &pads, &[3, 4, 5], 0, true));
        assert_eq!(frames, vec![vec![1, 2], vec![3, 4, 5]]);
    }

    #[test]
    fn endless_valid_is_rejected() {
        let (_list, pads) = pads(false);
        let mut tx = TxAssembler::new();
        pads.source_valid.set_bool(true);
        for _ in 0..MAX_FRAME_LEN {
            assert!(tx.clock_until_idle(&pads).unwrap().is_none());
        }
        assert!(matches!(
            tx.clock_until_idle(&pads),
            Err(LinkError::Oversized { len: 2001, max: 2000 })
        ));
    }

    #[test]
    fn feeder_separates_frames_by_one_idle_beat() {
        let (_list, pads) = pads(true);
        pads.sink_ready.set_bool(true);
        let queue = FrameQueue::shared(None);
        queue.borrow_mut().put(vec![0xa, 0xb]);
        queue.borrow_mut().put(vec![0xc]);
        let mut rx = RxFeeder::new();

        let mut beats = Vec::new();
        for _ in 0..7 {
            let loaded = rx.clock(&pads, &queue);
            beats.push((
                loaded,
                pads.sink_valid.is_high(),
                pads.sink_data.get(),
                pads.sink_first.as_ref().unwrap().is_high(),
                pads.sink_last.as_ref().unwrap().is_high(),
            ));
        }
        assert_eq!(
            beats,
            [
                (true, false, 0, false, false),
                (false, true, 0xa, true, false),
                (false, true, 0xb, false, true),
                (true, false, 0xb, false, false),
                (false, true, 0xc, true, true),
                (false, false, 0xc, false, false),
                (false, false, 0xc, false, false),
            ]
        );
    }

    #[test]
    fn feeder_holds_a_byte_until_ready() {
        let (_list, pads) = pads(false);
        let queue = FrameQueue::shared(None);
        queue.borrow_mut().put(vec![7, 8]);
        let mut rx = RxFeeder::new();
        rx.clock(&pads, &queue);
        for _ in 0..3 {
            rx.clock(&pads, &queue);
            assert!(pads.sink_valid.is_high());
            assert_eq!(pads.sink_data.get(), 7);
        }
        pads.sink_ready.set_bool(true);
        rx.clock(&pads, &queue);
        rx.clock(&pads, &queue);
        assert_eq!(pads.sink_data.get(), 8);
        assert!(!rx.in_flight());
    }

    #[test]
    fn qualifiers_are_stable_while_a_byte_waits() {
        let (_list, pads) = pads(true);
        let queue = FrameQueue::shared(None);
        queue.borrow_mut().put(vec![1, 2]);
        let mut rx = RxFeeder::new();
        let first = pads.sink_first.clone().unwrap();
        let last = pads.sink_last.clone().unwrap();
        rx.clock(&pads, &queue);

        for _ in 0..2 {
            rx.clock(&pads, &queue);
            assert_eq!((pads.sink_data.get(), first.is_high(), last.is_high()), (1, true, false));
        }
        pads.sink_ready.set_bool(true);
        rx.clock(&pads, &queue);
        pads.sink_ready.set_bool(false);
        for _ in 0..2 {
            rx.clock(&pads, &queue);
            assert!(pads.sink_valid.is_high());
            assert_eq!((pads.sink_data.get(), first.is_high(), last.is_high()), (2, false, true));
        }
        pads.sink_ready.set_bool(true);
        rx.clock(&pads, &queue);
        assert!(last.is_high());
        assert!(!rx.in_flight());
    }
}
