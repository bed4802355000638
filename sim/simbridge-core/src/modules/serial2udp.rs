//! The `serial2udp` module carries a qualified byte stream over UDP, one
//! datagram per frame.
//!
//! Outbound datagrams go to whoever sent the most recent inbound one. Until
//! a datagram has arrived they go to `connect_ip:connect_port`, if given.

use super::stream::{ensure_bound, RxFeeder, StreamPads, TxAssembler, SINK_DATA, SYS_CLK};
use crate::{
    args::{self, ModuleArgs},
    clock::ClockEdge,
    error::{LinkError, ModuleError},
    framing::MAX_FRAME_LEN,
    logging::{frame_event, session_event, Direction},
    module::{IoModule, IoSession},
    multiplexer::{MuxHandle, ReaderContext},
    pads::{PadList, Signal},
    queues::{FrameQueue, PutStat, SharedQueue},
};
use std::{
    cell::Cell,
    io,
    net::{self, Ipv4Addr, SocketAddr, SocketAddrV4},
    rc::Rc,
};
use tokio::{net::UdpSocket, task::JoinHandle};

const MODULE: &str = "serial2udp";

/// Names of the pad lists carrying the serial stream.
pub const INTERFACES: [&str; 2] = ["serial_udp", "serial2spi_udp"];

#[derive(Debug, Default)]
pub struct UdpBridge {
    mux: Option<MuxHandle>,
}

impl UdpBridge {
    pub fn new() -> Self {
        Default::default()
    }
}

impl IoModule for UdpBridge {
    fn name(&self) -> &'static str {
        MODULE
    }

    fn start(&mut self, mux: &MuxHandle) -> Result<(), ModuleError> {
        self.mux = Some(mux.clone());
        Ok(())
    }

    #[tracing::instrument(name = "UdpBridge::new_session", skip_all, fields(args = %args.raw()))]
    fn new_session(&mut self, args: &ModuleArgs) -> Result<Box<dyn IoSession>, ModuleError> {
        let mux = self.mux.as_ref().ok_or(ModuleError::NotStarted(MODULE))?;
        let port = args::port(args)?;
        let bind_ip: Ipv4Addr = args
            .parse_optional("bind_ip")?
            .unwrap_or(Ipv4Addr::UNSPECIFIED);
        let connect_ip: Option<Ipv4Addr> = args.parse_optional("connect_ip")?;
        let connect_port: u16 = args.parse_optional("connect_port")?.unwrap_or(port);

        let peer = connect_ip.map(|ip| SocketAddr::V4(SocketAddrV4::new(ip, connect_port)));
        let session = UdpBridgeSession::bind(mux, SocketAddrV4::new(bind_ip, port), peer)?;
        Ok(Box::new(session))
    }
}

pub struct UdpBridgeSession {
    socket: Option<net::UdpSocket>,
    peer: Rc<Cell<Option<SocketAddr>>>,
    reader: Option<JoinHandle<()>>,
    local_addr: SocketAddr,
    inbound: SharedQueue,
    pads: Option<StreamPads>,
    clk: Option<Signal>,
    edge: ClockEdge,
    tx: TxAssembler,
    rx: RxFeeder,
}

impl UdpBridgeSession {
    /// Binds `addr`. `peer` is where frames go before any datagram arrives.
    pub fn bind(
        mux: &MuxHandle,
        addr: SocketAddrV4,
        peer: Option<SocketAddr>,
    ) -> Result<Self, ModuleError> {
        let socket = net::UdpSocket::bind(addr)
            .map_err(ModuleError::resource(format!("UDP socket on {}", addr)))?;
        socket
            .set_nonblocking(true)
            .map_err(ModuleError::resource("non-blocking socket"))?;
        let local_addr = socket
            .local_addr()
            .map_err(ModuleError::resource("socket address"))?;
        let receiver = {
            let _guard = mux.enter();
            socket
                .try_clone()
                .and_then(UdpSocket::from_std)
                .map_err(ModuleError::resource("socket registration"))?
        };
        session_event(MODULE, "bound to", &local_addr);

        let inbound = FrameQueue::shared(mux.config().queue_capacity);
        let peer = Rc::new(Cell::new(peer));
        let reader = mux.spawn(receive(
            receiver,
            inbound.clone(),
            peer.clone(),
            mux.reader_context(),
        ));
        Ok(Self {
            socket: Some(socket),
            peer,
            reader: Some(reader),
            local_addr,
            inbound,
            pads: None,
            clk: None,
            edge: ClockEdge::new(),
            tx: TxAssembler::new(),
            rx: RxFeeder::new(),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Where the next outbound datagram goes.
    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer.get()
    }

    pub fn inbound(&self) -> &SharedQueue {
        &self.inbound
    }

    fn send(&mut self, time_ps: u64, frame: Vec<u8>) -> Result<(), ModuleError> {
        let socket = self.socket.as_ref().ok_or(ModuleError::Unbound("UDP socket"))?;
        let peer = match self.peer.get() {
            Some(peer) => peer,
            None => {
                tracing::warn!(
                    module = MODULE,
                    len = frame.len(),
                    "No peer known yet, dropping frame"
                );
                return Ok(());
            }
        };
        let written = socket.send_to(&frame, peer).map_err(LinkError::Io)?;
        if written != frame.len() {
            Err(LinkError::ShortWrite {
                written,
                expected: frame.len(),
            })?
        }
        frame_event(MODULE, Direction::Outbound, time_ps, &frame);
        Ok(())
    }
}

async fn receive(
    socket: UdpSocket,
    inbound: SharedQueue,
    peer: Rc<Cell<Option<SocketAddr>>>,
    ctx: ReaderContext,
) {
    // One spare byte tells an oversized datagram apart from a full one.
    let mut buf = vec![0u8; MAX_FRAME_LEN + 1];
    loop {
        let received = tokio::time::timeout(ctx.read_timeout(), socket.recv_from(&mut buf));
        match received.await {
            Ok(Ok((0, from))) => {
                tracing::debug!(module = MODULE, %from, "Ignoring empty datagram");
            }
            Ok(Ok((len, from))) if len > MAX_FRAME_LEN => {
                tracing::warn!(module = MODULE, %from, "Dropping datagram over {} bytes", MAX_FRAME_LEN);
            }
            Ok(Ok((len, from))) => {
                peer.set(Some(from));
                if inbound.borrow_mut().put(buf[..len].to_vec()) == PutStat::Dropped {
                    tracing::warn!(module = MODULE, "Inbound queue full, dropping frame");
                }
            }
            // ICMP errors from an earlier send surface here on some platforms.
            Ok(Err(e))
                if matches!(
                    e.kind(),
                    io::ErrorKind::ConnectionRefused | io::ErrorKind::ConnectionReset
                ) =>
            {
                tracing::warn!(module = MODULE, "Peer unreachable: {}", e);
            }
            Ok(Err(e)) => return ctx.link_lost(MODULE, &LinkError::Io(e)),
            Err(_) => {
                tracing::trace!(module = MODULE, "No datagram within the read timeout");
            }
        }
    }
}

impl IoSession for UdpBridgeSession {
    #[tracing::instrument(name = "UdpBridgeSession::add_pads", skip_all, fields(list = pads.name()))]
    fn add_pads(&mut self, pads: &PadList) -> Result<(), ModuleError> {
        match pads.name() {
            name if INTERFACES.contains(&name) => self.pads = Some(StreamPads::bind(pads)?),
            SYS_CLK => self.clk = Some(pads.require(SYS_CLK)?),
            other => tracing::debug!(module = MODULE, "Ignoring pad list {}", other),
        }
        Ok(())
    }

    fn check_bound(&self) -> Result<(), ModuleError> {
        ensure_bound(&self.pads, INTERFACES[0], SINK_DATA)?;
        ensure_bound(&self.clk, SYS_CLK, SYS_CLK)
    }

    fn tick(&mut self, time_ps: u64) -> Result<(), ModuleError> {
        let clk = self.clk.as_ref().ok_or(ModuleError::Unbound(SYS_CLK))?;
        if !self.edge.rising(clk) {
            return Ok(());
        }

        let outbound = {
            let pads = self.pads.as_ref().ok_or(ModuleError::Unbound("serial_udp"))?;
            self.tx.clock_framed(pads)?
        };
        if let Some(frame) = outbound {
            self.send(time_ps, frame)?;
        }

        let pads = self.pads.as_ref().ok_or(ModuleError::Unbound("serial_udp"))?;
        if self.rx.clock(pads, &self.inbound) {
            frame_event(MODULE, Direction::Inbound, time_ps, self.rx.frame());
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), ModuleError> {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        if self.socket.take().is_some() {
            session_event(MODULE, "closed", &self.local_addr);
        }
        Ok(())
    }
}

impl Drop for UdpBridgeSession {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!(module = MODULE, "Error closing session: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Multiplexer, StatusCode};
    use tracing_test::traced_test;

    #[test]
    fn bind_ip_must_be_an_address() {
        let mux = Multiplexer::new(Default::default()).unwrap();
        let mut module = UdpBridge::new();
        module.start(&mux.handle()).unwrap();
        let result = module.new_session(
            &ModuleArgs::parse(r#"{"port": 9001, "bind_ip": "0.0.0"}"#).unwrap(),
        );
        assert_eq!(StatusCode::from(&result), StatusCode::ConfigParse);
    }

    #[test]
    fn connect_address_seeds_the_peer() {
        let mux = Multiplexer::new(Default::default()).unwrap();
        let target: SocketAddr = "127.0.0.1:9".parse().unwrap();
        let session =
            UdpBridgeSession::bind(&mux.handle(), SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0), Some(target))
                .unwrap();
        assert_eq!(session.peer(), Some(target));
        assert_ne!(session.local_addr().port(), 0);
    }

    #[traced_test]
    #[test]
    fn frames_without_a_peer_are_dropped() {
        let mux = Multiplexer::new(Default::default()).unwrap();
        let mut session =
            UdpBridgeSession::bind(&mux.handle(), SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0), None)
                .unwrap();
        session.send(0, vec![1, 2, 3]).unwrap();
        assert!(logs_contain("No peer known yet"));
        session.close().unwrap();
    }
}
