mod common;

use common::{wait_for, Hardware, TIMEOUT};
use etherparse::PacketBuilder;
use simbridge_core::{
    capture::PCAP_MAGIC_NANOS,
    modules::ethernet::{EthernetOptions, EthernetSession, INTERFACE, MAC_ADDRESS},
    IoSession, Multiplexer, MuxConfig, Readiness,
};
use std::{
    net::Ipv4Addr,
    os::unix::net::UnixDatagram,
    path::PathBuf,
    rc::Rc,
};

const HOST_IP: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 100);
const HW_MAC: [u8; 6] = [0x10, 0xe2, 0xd5, 0x00, 0x00, 0x00];

struct Bench {
    mux: Multiplexer,
    host: UnixDatagram,
    session: EthernetSession,
    hw: Hardware,
}

fn bench_with(readiness: Readiness, options: EthernetOptions) -> Bench {
    let mux = Multiplexer::new(MuxConfig {
        device_readiness: readiness,
        poll_interval_ms: 1,
        ..Default::default()
    })
    .unwrap();
    let (host, sim) = UnixDatagram::pair().unwrap();
    sim.set_nonblocking(true).unwrap();
    host.set_read_timeout(Some(TIMEOUT)).unwrap();
    let mut session = EthernetSession::open(&mux.handle(), Rc::new(sim), options).unwrap();
    let hw = Hardware::new();
    hw.attach(&mut session, INTERFACE, false).unwrap();
    Bench {
        mux,
        host,
        session,
        hw,
    }
}

fn bench() -> Bench {
    let mut options = EthernetOptions::new(HOST_IP);
    options.arp_proxy = false;
    bench_with(Readiness::default(), options)
}

/// An Ethernet/IPv4/UDP frame carrying `payload`.
fn udp_frame(payload: &[u8]) -> Vec<u8> {
    let builder = PacketBuilder::ethernet2(HW_MAC, MAC_ADDRESS)
        .ipv4([192, 168, 1, 50], HOST_IP.octets(), 64)
        .udp(5000, 6000);
    let mut frame = Vec::with_capacity(builder.size(payload.len()));
    builder.write(&mut frame, payload).unwrap();
    frame
}

fn host_recv(host: &UnixDatagram) -> Vec<u8> {
    let mut buf = [0u8; 2048];
    let len = host.recv(&mut buf).unwrap();
    buf[..len].to_vec()
}

#[test]
fn short_outbound_frames_are_padded() {
    let mut bench = bench();
    let frame = udp_frame(b"ping");
    assert_eq!(frame.len(), 46);

    bench.hw.send(&mut bench.session, &frame).unwrap();
    let written = host_recv(&bench.host);
    assert_eq!(written.len(), 60);
    assert_eq!(&written[..46], frame.as_slice());
    assert!(written[46..].iter().all(|&b| b == 0));
    assert!(bench.hw.source_ready.is_high());
}

#[test]
fn full_size_outbound_frames_are_untouched() {
    let mut bench = bench();
    let frame = udp_frame(&[0x5a; 1400]);
    bench.hw.send(&mut bench.session, &frame).unwrap();
    assert_eq!(host_recv(&bench.host), frame);
}

fn inbound_frames_arrive_in_order(readiness: Readiness) {
    let mut bench = bench_with(readiness, EthernetOptions::new(HOST_IP));
    let short = udp_frame(&[]);
    let long = udp_frame(&[7; 100]);
    bench.host.send(&short).unwrap();
    bench.host.send(&long).unwrap();
    let queue = bench.session.inbound().clone();
    wait_for(&bench.mux, "two inbound frames", || queue.borrow().len() == 2);

    let frames = bench.hw.receive(&mut bench.session, 250).unwrap();
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0].len(), 60);
    assert_eq!(&frames[0][..42], short.as_slice());
    assert_eq!(frames[1], long);
}

#[test]
fn inbound_frames_arrive_in_order_with_notification() {
    inbound_frames_arrive_in_order(Readiness::Notify);
}

#[test]
fn inbound_frames_arrive_in_order_with_polling() {
    inbound_frames_arrive_in_order(Readiness::Poll);
}

#[test]
fn ticks_without_a_rising_edge_change_nothing() {
    let mut bench = bench();
    bench.session.inbound().borrow_mut().put(udp_frame(b"hold"));
    // Load the frame and present its first byte.
    bench.hw.cycle(&mut bench.session).unwrap();
    bench.hw.cycle(&mut bench.session).unwrap();
    let before = bench.hw.snapshot();
    assert!(bench.hw.sink_valid.is_high());

    // Clock held high, then falling, then held low.
    for level in [1, 1, 0, 0] {
        bench.hw.clk.set(level);
        bench.session.tick(bench.hw.time_ps).unwrap();
        assert_eq!(bench.hw.snapshot(), before);
    }
}

#[test]
fn proxy_answers_arp_for_the_host() {
    let mut options = EthernetOptions::new(HOST_IP);
    options.arp_proxy = true;
    let mut bench = bench_with(Readiness::default(), options);

    let mut request = vec![0xff; 6];
    request.extend_from_slice(&HW_MAC);
    request.extend_from_slice(&[0x08, 0x06, 0, 1, 0x08, 0, 6, 4, 0, 1]);
    request.extend_from_slice(&HW_MAC);
    request.extend_from_slice(&[192, 168, 1, 50]);
    request.extend_from_slice(&[0; 6]);
    request.extend_from_slice(&HOST_IP.octets());

    bench.hw.send(&mut bench.session, &request).unwrap();
    // The request still reaches the host.
    assert_eq!(&host_recv(&bench.host)[..42], request.as_slice());

    let frames = bench.hw.receive(&mut bench.session, 70).unwrap();
    assert_eq!(frames.len(), 1);
    let reply = &frames[0];
    assert_eq!(reply.len(), 60);
    assert_eq!(&reply[0..6], &HW_MAC);
    assert_eq!(&reply[6..12], &MAC_ADDRESS);
    // Operation: reply.
    assert_eq!(&reply[20..22], &[0, 2]);
    assert_eq!(&reply[28..32], &HOST_IP.octets());
    assert_eq!(&reply[38..42], &[192, 168, 1, 50]);
}

#[test]
fn capture_records_both_directions() -> anyhow::Result<()> {
    let path: PathBuf = std::env::temp_dir().join(format!(
        "simbridge-capture-{}.pcap",
        std::process::id()
    ));
    let mut options = EthernetOptions::new(HOST_IP);
    options.capture = Some(path.clone());
    options.arp_proxy = false;
    let mut bench = bench_with(Readiness::default(), options);

    bench.hw.send(&mut bench.session, &udp_frame(b"out"))?;
    host_recv(&bench.host);
    bench.session.inbound().borrow_mut().put(udp_frame(&[1; 64]));
    bench.hw.receive(&mut bench.session, 120)?;
    bench.session.close()?;
    // Closing again is harmless.
    bench.session.close()?;

    let bytes = std::fs::read(&path)?;
    std::fs::remove_file(&path)?;
    assert_eq!(u32::from_le_bytes(bytes[0..4].try_into()?), PCAP_MAGIC_NANOS);
    let first_len = u32::from_le_bytes(bytes[32..36].try_into()?) as usize;
    assert_eq!(first_len, 60);
    let second = 24 + 16 + first_len;
    let second_len = u32::from_le_bytes(bytes[second + 8..second + 12].try_into()?) as usize;
    assert_eq!(second_len, udp_frame(&[1; 64]).len());
    assert_eq!(bytes.len(), second + 16 + second_len);
    Ok(())
}

#[test]
fn closed_session_stops_reading() {
    let mut bench = bench();
    bench.session.close().unwrap();
    bench.host.send(&udp_frame(b"late")).unwrap();
    bench.mux.run_for(std::time::Duration::from_millis(20));
    assert!(bench.session.inbound().borrow().is_empty());
    assert_eq!(bench.mux.exit_status(), None);
}
