//! The built-in I/O modules.

pub mod stream;

pub mod arp;

pub mod ethernet;
pub use ethernet::Ethernet;

pub mod serial2framed_tcp;
pub use serial2framed_tcp::FramedTcp;

pub mod serial2udp;
pub use serial2udp::UdpBridge;

pub mod clocker;
pub use clocker::Clocker;
