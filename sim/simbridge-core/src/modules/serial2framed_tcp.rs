//! The `serial2framed_tcp` module carries a qualified byte stream over TCP,
//! one length-prefixed message per frame.
//!
//! Without a `connect_ip` the session listens on `bind_ip:port` and serves
//! the first peer to connect. With one, it connects to `connect_ip:port`.

use super::stream::{ensure_bound, RxFeeder, StreamPads, TxAssembler, SINK_DATA, SYS_CLK};
use crate::{
    args::{self, ModuleArgs},
    clock::ClockEdge,
    error::{LinkError, ModuleError},
    framing::{encode_length_prefixed, read_length_prefixed},
    logging::{frame_event, session_event, Direction},
    module::{IoModule, IoSession},
    multiplexer::{MuxHandle, ReaderContext},
    pads::{PadList, Signal},
    queues::{FrameQueue, PutStat, SharedQueue},
};
use std::{
    cell::RefCell,
    io::{self, Write},
    net::{self, Ipv4Addr, SocketAddr, SocketAddrV4},
    rc::Rc,
};
use tokio::{net::TcpStream, task::JoinHandle};

const MODULE: &str = "serial2framed_tcp";

/// Name of the pad list carrying the serial stream.
pub const INTERFACE: &str = "serial_framed_tcp";

/// The write side of the connection. Writes happen synchronously from the
/// tick, so they go straight to the socket rather than through the
/// multiplexer.
type Writer = Rc<RefCell<Option<net::TcpStream>>>;

#[derive(Debug, Default)]
pub struct FramedTcp {
    mux: Option<MuxHandle>,
}

impl FramedTcp {
    pub fn new() -> Self {
        Default::default()
    }
}

impl IoModule for FramedTcp {
    fn name(&self) -> &'static str {
        MODULE
    }

    fn start(&mut self, mux: &MuxHandle) -> Result<(), ModuleError> {
        self.mux = Some(mux.clone());
        Ok(())
    }

    #[tracing::instrument(name = "FramedTcp::new_session", skip_all, fields(args = %args.raw()))]
    fn new_session(&mut self, args: &ModuleArgs) -> Result<Box<dyn IoSession>, ModuleError> {
        let mux = self.mux.as_ref().ok_or(ModuleError::NotStarted(MODULE))?;
        let port = args::port(args)?;
        let bind_ip: Ipv4Addr = args
            .parse_optional("bind_ip")?
            .unwrap_or(Ipv4Addr::UNSPECIFIED);
        let connect_ip: Option<Ipv4Addr> = args.parse_optional("connect_ip")?;

        let session = match connect_ip {
            Some(ip) => FramedTcpSession::connect(mux, SocketAddrV4::new(ip, port))?,
            None => FramedTcpSession::listen(mux, SocketAddrV4::new(bind_ip, port))?,
        };
        Ok(Box::new(session))
    }
}

pub struct FramedTcpSession {
    writer: Writer,
    reader: Option<JoinHandle<()>>,
    local_addr: SocketAddr,
    inbound: SharedQueue,
    pads: Option<StreamPads>,
    clk: Option<Signal>,
    edge: ClockEdge,
    tx: TxAssembler,
    rx: RxFeeder,
}

impl FramedTcpSession {
    /// Listens on `addr` and serves the first connection made to it.
    pub fn listen(mux: &MuxHandle, addr: SocketAddrV4) -> Result<Self, ModuleError> {
        let listener = net::TcpListener::bind(addr)
            .map_err(ModuleError::resource(format!("TCP listener on {}", addr)))?;
        listener
            .set_nonblocking(true)
            .map_err(ModuleError::resource("non-blocking listener"))?;
        let local_addr = listener
            .local_addr()
            .map_err(ModuleError::resource("listener address"))?;
        let listener = {
            let _guard = mux.enter();
            tokio::net::TcpListener::from_std(listener)
                .map_err(ModuleError::resource("listener registration"))?
        };
        session_event(MODULE, "listening on", &local_addr);

        let inbound = FrameQueue::shared(mux.config().queue_capacity);
        let writer = Writer::default();
        let reader = mux.spawn(serve(
            listener,
            writer.clone(),
            inbound.clone(),
            mux.reader_context(),
        ));
        Ok(Self::new(writer, reader, local_addr, inbound))
    }

    /// Connects to a listening peer at `addr`.
    pub fn connect(mux: &MuxHandle, addr: SocketAddrV4) -> Result<Self, ModuleError> {
        let stream = net::TcpStream::connect(addr)
            .map_err(ModuleError::resource(format!("TCP connection to {}", addr)))?;
        let local_addr = stream
            .local_addr()
            .map_err(ModuleError::resource("connection address"))?;
        session_event(MODULE, "connected to", &addr);

        let inbound = FrameQueue::shared(mux.config().queue_capacity);
        let (read_half, write_half) = {
            let _guard = mux.enter();
            split(stream).map_err(ModuleError::resource("connection registration"))?
        };
        let writer = Rc::new(RefCell::new(Some(write_half)));
        let reader = mux.spawn(receive(read_half, inbound.clone(), mux.reader_context()));
        Ok(Self::new(writer, reader, local_addr, inbound))
    }

    fn new(
        writer: Writer,
        reader: JoinHandle<()>,
        local_addr: SocketAddr,
        inbound: SharedQueue,
    ) -> Self {
        Self {
            writer,
            reader: Some(reader),
            local_addr,
            inbound,
            pads: None,
            clk: None,
            edge: ClockEdge::new(),
            tx: TxAssembler::new(),
            rx: RxFeeder::new(),
        }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Whether a peer is connected.
    pub fn is_connected(&self) -> bool {
        self.writer.borrow().is_some()
    }

    pub fn inbound(&self) -> &SharedQueue {
        &self.inbound
    }

    fn send(&mut self, time_ps: u64, frame: Vec<u8>) -> Result<(), ModuleError> {
        let wire = encode_length_prefixed(&frame);
        let mut writer = self.writer.borrow_mut();
        let stream = writer.as_mut().ok_or(LinkError::NoPeer)?;
        let written = match stream.write(&wire) {
            Ok(written) => written,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => 0,
            Err(e) => Err(LinkError::Io(e))?,
        };
        if written != wire.len() {
            Err(LinkError::ShortWrite {
                written,
                expected: wire.len(),
            })?
        }
        frame_event(MODULE, Direction::Outbound, time_ps, &frame);
        Ok(())
    }
}

/// Splits a connected std stream into a multiplexer-registered read side and
/// a synchronous write side. Must run inside the runtime context.
fn split(stream: net::TcpStream) -> io::Result<(TcpStream, net::TcpStream)> {
    stream.set_nonblocking(true)?;
    if let Err(e) = stream.set_nodelay(true) {
        tracing::debug!(module = MODULE, "Could not disable Nagle: {}", e);
    }
    let write_half = stream.try_clone()?;
    Ok((TcpStream::from_std(stream)?, write_half))
}

async fn serve(
    listener: tokio::net::TcpListener,
    writer: Writer,
    inbound: SharedQueue,
    ctx: ReaderContext,
) {
    let (stream, peer) = match listener.accept().await {
        Ok(accepted) => accepted,
        Err(e) => return ctx.link_lost(MODULE, &LinkError::Io(e)),
    };
    // Only one peer is served; later connection attempts are refused.
    drop(listener);
    session_event(MODULE, "accepted connection from", &peer);

    let halves = stream.into_std().and_then(split);
    let (read_half, write_half) = match halves {
        Ok(halves) => halves,
        Err(e) => return ctx.link_lost(MODULE, &LinkError::Io(e)),
    };
    *writer.borrow_mut() = Some(write_half);
    receive(read_half, inbound, ctx).await
}

async fn receive(mut stream: TcpStream, inbound: SharedQueue, ctx: ReaderContext) {
    loop {
        match tokio::time::timeout(ctx.read_timeout(), stream.readable()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return ctx.link_lost(MODULE, &LinkError::Io(e)),
            Err(_) => {
                tracing::trace!(module = MODULE, "No data within the read timeout");
                continue;
            }
        }
        match read_length_prefixed(&mut stream).await {
            Ok(frame) => {
                if inbound.borrow_mut().put(frame) == PutStat::Dropped {
                    tracing::warn!(module = MODULE, "Inbound queue full, dropping frame");
                }
            }
            Err(e) => return ctx.link_lost(MODULE, &e),
        }
    }
}

impl IoSession for FramedTcpSession {
    #[tracing::instrument(name = "FramedTcpSession::add_pads", skip_all, fields(list = pads.name()))]
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
            self.tx.clock_framed(pads)?
        };
        if let Some(frame) = outbound {
            self.send(time_ps, frame)?;
        }

        let pads = self.pads.as_ref().ok_or(ModuleError::Unbound(INTERFACE))?;
        if self.rx.clock(pads, &self.inbound) {
            frame_event(MODULE, Direction::Inbound, time_ps, self.rx.frame());
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), ModuleError> {
        if let Some(reader) = self.reader.take() {
            reader.abort();
            session_event(MODULE, "closed", &self.local_addr);
        }
        if let Some(stream) = self.writer.borrow_mut().take() {
            if let Err(e) = stream.shutdown(net::Shutdown::Both) {
                tracing::debug!(module = MODULE, "Shutdown of the connection failed: {}", e);
            }
        }
        Ok(())
    }
}

impl Drop for FramedTcpSession {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!(module = MODULE, "Error closing session: {}", e);
        }
    }
}
