//! Frame-oriented devices: the host side of the Ethernet transport.
//!
//! A [`FrameDevice`] moves exactly one frame per read or write call. The
//! production device is a Linux TAP interface; a connected `UnixDatagram`
//! pair behaves the same way and stands in for it where no TAP is available.

#[cfg(target_os = "linux")]
use std::fs::OpenOptions;
use std::{
    fs::File,
    io::{self, Read, Write},
    net::Ipv4Addr,
    os::unix::{
        io::{AsRawFd, RawFd},
        net::UnixDatagram,
    },
    process::Command,
};

pub trait FrameDevice: AsRawFd {
    /// Reads one frame. Fails with `WouldBlock` when none is pending.
    fn read_frame(&self, buf: &mut [u8]) -> io::Result<usize>;

    /// Writes one frame, returning how many bytes were accepted.
    fn write_frame(&self, frame: &[u8]) -> io::Result<usize>;
}

impl FrameDevice for UnixDatagram {
    fn read_frame(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.recv(buf)
    }

    fn write_frame(&self, frame: &[u8]) -> io::Result<usize> {
        self.send(frame)
    }
}

/// A layer 2 TAP interface.
#[derive(Debug)]
pub struct TapDevice {
    file: File,
    name: String,
}

#[cfg(target_os = "linux")]
mod tun {
    pub const IFF_TAP: i16 = 0x0002;
    pub const IFF_NO_PI: i16 = 0x1000;
    pub const TUNSETIFF: libc::c_ulong = 0x400454ca;

    #[repr(C)]
    pub struct IfReq {
        pub name: [u8; 16],
        pub flags: i16,
        pub pad: [u8; 22],
    }
}

impl TapDevice {
    /// Attaches to (creating if necessary) the TAP interface `name` and
    /// switches it to non-blocking mode.
    #[cfg(target_os = "linux")]
    pub fn open(name: &str) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open("/dev/net/tun")?;

        let name_bytes = name.as_bytes();
        if name_bytes.is_empty() || name_bytes.len() > 15 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("Invalid TAP interface name {:?}", name),
            ));
        }
        let mut req = tun::IfReq {
            name: [0; 16],
            flags: tun::IFF_TAP | tun::IFF_NO_PI,
            pad: [0; 22],
        };
        req.name[..name_bytes.len()].copy_from_slice(name_bytes);

        let fd = file.as_raw_fd();
        // SAFETY: `req` is a properly sized, initialized ifreq and `fd` is an
        // open tun control file for the duration of both calls.
        unsafe {
            if libc::ioctl(fd, tun::TUNSETIFF as _, &mut req) < 0 {
                return Err(io::Error::last_os_error());
            }
            let flags = libc::fcntl(fd, libc::F_GETFL);
            if flags < 0 || libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) < 0 {
                return Err(io::Error::last_os_error());
            }
        }

        Ok(Self {
            file,
            name: name.to_string(),
        })
    }

    #[cfg(not(target_os = "linux"))]
    pub fn open(_name: &str) -> io::Result<Self> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "TAP devices are only supported on Linux",
        ))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Gives the host side of the interface `mac` and `ip/24`, brings the
    /// link up and disables IPv6 on it.
    pub fn configure(&self, ip: Ipv4Addr, mac: [u8; 6]) -> io::Result<()> {
        let mac = mac
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect::<Vec<_>>()
            .join(":");
        let address = format!("{}/24", ip);
        ip_command(&["link", "set", "dev", &self.name, "address", &mac])?;
        ip_command(&["addr", "add", &address, "dev", &self.name])?;
        ip_command(&["link", "set", "dev", &self.name, "up"])?;

        // Router solicitations would otherwise be the first thing the
        // hardware receives.
        let sysctl = format!("/proc/sys/net/ipv6/conf/{}/disable_ipv6", self.name);
        if let Err(e) = std::fs::write(&sysctl, "1") {
            tracing::warn!("Could not disable IPv6 through {}: {}", sysctl, e);
        }
        Ok(())
    }
}

fn ip_command(args: &[&str]) -> io::Result<()> {
    let output = Command::new("ip").args(args).output()?;
    if output.status.success() {
        Ok(())
    } else {
        Err(io::Error::new(
            io::ErrorKind::Other,
            format!(
                "`ip {}` failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        ))
    }
}

impl AsRawFd for TapDevice {
    fn as_raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}

impl FrameDevice for TapDevice {
    fn read_frame(&self, buf: &mut [u8]) -> io::Result<usize> {
        (&self.file).read(buf)
    }

    fn write_frame(&self, frame: &[u8]) -> io::Result<usize> {
        (&self.file).write(frame)
    }
}
