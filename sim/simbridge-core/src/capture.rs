//! Passive recording of frames crossing the simulation boundary.
//!
//! Frames are written in the classic pcap format with nanosecond
//! timestamps taken from simulation time, so a capture lines up with the
//! waveform dump of the same run.

use std::{
    fs::File,
    io::{self, BufWriter, Write},
    path::Path,
};

/// Magic number of a little-endian, nanosecond-resolution capture.
pub const PCAP_MAGIC_NANOS: u32 = 0xa1b2_3c4d;
pub const LINKTYPE_ETHERNET: u32 = 1;
pub const SNAPLEN: u32 = 65535;

const PCAP_VERSION: (u16, u16) = (2, 4);

pub struct PcapWriter<W: Write> {
    out: W,
    records: u64,
}

impl PcapWriter<BufWriter<File>> {
    /// Creates (or truncates) the capture file at `path`.
    pub fn create(path: impl AsRef<Path>) -> io::Result<Self> {
        Self::new(BufWriter::new(File::create(path)?))
    }
}

impl<W: Write> PcapWriter<W> {
    /// Writes the global header to `out`.
    pub fn new(mut out: W) -> io::Result<Self> {
        out.write_all(&PCAP_MAGIC_NANOS.to_le_bytes())?;
        out.write_all(&PCAP_VERSION.0.to_le_bytes())?;
        out.write_all(&PCAP_VERSION.1.to_le_bytes())?;
        // thiszone and sigfigs
        out.write_all(&0i32.to_le_bytes())?;
        out.write_all(&0u32.to_le_bytes())?;
        out.write_all(&SNAPLEN.to_le_bytes())?;
        out.write_all(&LINKTYPE_ETHERNET.to_le_bytes())?;
        Ok(Self { out, records: 0 })
    }

    /// Appends one frame observed at simulation time `time_ps`.
    pub fn record(&mut self, time_ps: u64, frame: &[u8]) -> io::Result<()> {
        let nanos = time_ps / 1_000;
        let seconds = (nanos / 1_000_000_000) as u32;
        let subsec = (nanos % 1_000_000_000) as u32;
        let captured = frame.len().min(SNAPLEN as usize);
        self.out.write_all(&seconds.to_le_bytes())?;
        self.out.write_all(&subsec.to_le_bytes())?;
        self.out.write_all(&(captured as u32).to_le_bytes())?;
        self.out.write_all(&(frame.len() as u32).to_le_bytes())?;
        self.out.write_all(&frame[..captured])?;
        self.records += 1;
        Ok(())
    }

    pub fn records(&self) -> u64 {
        self.records
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}
