//! The `ethernet` module bridges a byte-wide MAC interface to a TAP device.

use super::{
    arp,
    stream::{ensure_bound, RxFeeder, StreamPads, TxAssembler, SINK_DATA, SYS_CLK},
};
use crate::{
    args::ModuleArgs,
    capture::PcapWriter,
    clock::ClockEdge,
    device::{FrameDevice, TapDevice},
    error::{LinkError, ModuleError},
    framing::pad_to_minimum,
    logging::{frame_event, session_event, Direction},
    module::{IoModule, IoSession},
    multiplexer::MuxHandle,
    pads::{PadList, Signal},
    queues::{FrameQueue, PutStat, SharedQueue},
};
use std::{
    fs::File,
    io::BufWriter,
    net::Ipv4Addr,
    path::PathBuf,
    rc::Rc,
};
use tokio::task::JoinHandle;

const MODULE: &str = "ethernet";

/// Name of the pad list carrying the MAC stream.
pub const INTERFACE: &str = "eth";

/// Hardware address given to the host side of the TAP link.
pub const MAC_ADDRESS: [u8; 6] = [0xaa, 0xb6, 0x24, 0x69, 0x77, 0x21];

#[derive(Debug, Default)]
pub struct Ethernet {
    mux: Option<MuxHandle>,
}

impl Ethernet {
    pub fn new() -> Self {
        Default::default()
    }
}

impl IoModule for Ethernet {
    fn name(&self) -> &'static str {
        MODULE
    }

    fn start(&mut self, mux: &MuxHandle) -> Result<(), ModuleError> {
        self.mux = Some(mux.clone());
        Ok(())
    }

    #[tracing::instrument(name = "Ethernet::new_session", skip_all, fields(args = %args.raw()))]
    fn new_session(&mut self, args: &ModuleArgs) -> Result<Box<dyn IoSession>, ModuleError> {
        let mux = self.mux.as_ref().ok_or(ModuleError::NotStarted(MODULE))?;
        let interface = args.required("interface")?;
        let options = EthernetOptions::from_args(args)?;

        let tap = TapDevice::open(&interface)
            .map_err(ModuleError::resource(format!("TAP device {}", interface)))?;
        tap.configure(options.ip, MAC_ADDRESS)
            .map_err(ModuleError::resource(format!("configuration of {}", interface)))?;
        let session = EthernetSession::open(mux, Rc::new(tap), options)?;
        session_event(MODULE, "opened", &interface);
        Ok(Box::new(session))
    }
}

/// Session settings other than the device itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EthernetOptions {
    /// Address of the host side of the link.
    pub ip: Ipv4Addr,
    /// Where to record a capture of every frame crossing the link.
    pub capture: Option<PathBuf>,
    /// Answer ARP requests for `ip` on behalf of the host.
    pub arp_proxy: bool,
}

impl EthernetOptions {
    pub fn new(ip: Ipv4Addr) -> Self {
        Self {
            ip,
            capture: None,
            arp_proxy: cfg!(target_os = "macos"),
        }
    }

    pub fn from_args(args: &ModuleArgs) -> Result<Self, ModuleError> {
        let mut options = Self::new(args.parse_required("ip")?);
        options.capture = args.parse_optional("pcap")?;
        if let Some(arp_proxy) = args.parse_optional("arp_proxy")? {
            options.arp_proxy = arp_proxy;
        }
        Ok(options)
    }
}

pub struct EthernetSession {
    device: Option<Rc<dyn FrameDevice>>,
    reader: Option<JoinHandle<()>>,
    inbound: SharedQueue,
    capture: Option<PcapWriter<BufWriter<File>>>,
    ip: Ipv4Addr,
    arp_proxy: bool,
    pads: Option<StreamPads>,
    clk: Option<Signal>,
    edge: ClockEdge,
    tx: TxAssembler,
    rx: RxFeeder,
}

impl EthernetSession {
    /// Bridges `device` and starts reading frames from it.
    pub fn open(
        mux: &MuxHandle,
        device: Rc<dyn FrameDevice>,
        options: EthernetOptions,
    ) -> Result<Self, ModuleError> {
        let capture = match &options.capture {
            Some(path) => Some(PcapWriter::create(path).map_err(ModuleError::resource(
                format!("capture file {}", path.display()),
            ))?),
            None => None,
        };

        let inbound = FrameQueue::shared(mux.config().queue_capacity);
        let sink = inbound.clone();
        let reader = mux.watch_device(MODULE, device.clone(), move |mut frame| {
            pad_to_minimum(&mut frame);
            if sink.borrow_mut().put(frame) == PutStat::Dropped {
                tracing::warn!(module = MODULE, "Inbound queue full, dropping frame");
            }
        })?;

        Ok(Self {
            device: Some(device),
            reader: Some(reader),
            inbound,
            capture,
            ip: options.ip,
            arp_proxy: options.arp_proxy,
            pads: None,
            clk: None,
            edge: ClockEdge::new(),
            tx: TxAssembler::new(),
            rx: RxFeeder::new(),
        })
    }

    /// Frames waiting to be delivered to the hardware.
    pub fn inbound(&self) -> &SharedQueue {
        &self.inbound
    }

    fn flush(&mut self, time_ps: u64, mut frame: Vec<u8>) -> Result<(), ModuleError> {
        pad_to_minimum(&mut frame);
        let device = self.device.as_ref().ok_or(ModuleError::Unbound("TAP device"))?;
        let written = device.write_frame(&frame).map_err(LinkError::Io)?;
        if written != frame.len() {
            Err(LinkError::ShortWrite {
                written,
                expected: frame.len(),
            })?
        }
        frame_event(MODULE, Direction::Outbound, time_ps, &frame);
        record(&mut self.capture, time_ps, &frame);

        if self.arp_proxy {
            if let Some(reply) = arp::reply_to(&frame, self.ip, MAC_ADDRESS) {
                session_event(MODULE, "answered ARP request for", &self.ip);
                if self.inbound.borrow_mut().put(reply) == PutStat::Dropped {
                    tracing::warn!(module = MODULE, "Inbound queue full, dropping ARP reply");
                }
            }
        }
        Ok(())
    }
}

fn record(capture: &mut Option<PcapWriter<BufWriter<File>>>, time_ps: u64, frame: &[u8]) {
    if let Some(writer) = capture {
        if let Err(e) = writer.record(time_ps, frame) {
            tracing::warn!(module = MODULE, "Stopping capture: {}", e);
            *capture = None;
        }
    }
}

impl IoSession for EthernetSession {
    #[tracing::instrument(name = "EthernetSession::add_pads", skip_all, fields(list = pads.name()))]
    fn add_pads(&mut self, pads: &PadList) -> Result<(), ModuleError> {
        match pads.name() {
            INTERFACE => self.pads = Some(StreamPads::bind(pads)?),
            SYS_CLK => self.clk = Some(pads.require(SYS_CLK)?),
            other => tracing::debug!(module = MODULE, "Ignoring pad list {}", other),
        }
        Ok(())
    }

    fn check_bound(&self) -> Result<(), ModuleError> {
        ensure_bound(&self.pads, INTERFACE, SINK_DATA)?;
        ensure_bound(&self.clk, SYS_CLK, SYS_CLK)
    }

    fn tick(&mut self, time_ps: u64) -> Result<(), ModuleError> {
        let clk = self.clk.as_ref().ok_or(ModuleError::Unbound(SYS_CLK))?;
        if !self.edge.rising(clk) {
            return Ok(());
        }

        let outbound = {
            let pads = self.pads.as_ref().ok_or(ModuleError::Unbound(INTERFACE))?;
            self.tx.clock_until_idle(pads)?
        };
        if let Some(frame) = outbound {
            self.flush(time_ps, frame)?;
        }

        let pads = self.pads.as_ref().ok_or(ModuleError::Unbound(INTERFACE))?;
        if self.rx.clock(pads, &self.inbound) {
            frame_event(MODULE, Direction::Inbound, time_ps, self.rx.frame());
            record(&mut self.capture, time_ps, self.rx.frame());
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), ModuleError> {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        self.device = None;
        if let Some(mut capture) = self.capture.take() {
            capture
                .flush()
                .map_err(ModuleError::resource("capture file"))?;
            session_event(MODULE, "capture closed, frames", &capture.records());
        }
        Ok(())
    }
}

impl Drop for EthernetSession {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!(module = MODULE, "Error closing session: {}", e);
        }
    }
}
