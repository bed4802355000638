//! The event multiplexer.
//!
//! A single-threaded readiness loop over every session's socket or device.
//! Reader tasks run on a current-thread runtime inside a [`LocalSet`], and
//! only make progress while the host is inside [`Multiplexer::poll`] (or one
//! of the blocking helpers). Ticks run strictly between polls, so the
//! inbound queues the reader tasks fill are never touched by both sides at
//! once.

use crate::{
    device::FrameDevice,
    error::{LinkError, ModuleError},
    framing::MAX_FRAME_LEN,
    shutdown::{ExitStatus, Shutdown},
};
use serde::Deserialize;
use std::{
    fmt::{self, Debug},
    future::Future,
    io,
    os::unix::io::{AsRawFd, RawFd},
    rc::Rc,
    time::{Duration, Instant},
};
use tokio::{
    io::unix::AsyncFd,
    runtime::{self, EnterGuard, Runtime},
    task::{JoinHandle, LocalSet},
};

/// How the multiplexer learns that a frame device has data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Readiness {
    /// Wait for the OS to report the device readable.
    Notify,
    /// Drain the device on a fixed interval, for platforms whose TAP driver
    /// never reports readiness.
    Poll,
}

impl Default for Readiness {
    fn default() -> Self {
        if cfg!(target_os = "linux") {
            Readiness::Notify
        } else {
            Readiness::Poll
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MuxConfig {
    pub device_readiness: Readiness,
    /// Period of the drain timer in [`Readiness::Poll`] mode.
    pub poll_interval_ms: u64,
    /// How long a reader waits for readiness before logging that its link
    /// is idle and waiting again.
    pub read_timeout_ms: u64,
    /// Maximum frames held per inbound queue. `None` is unbounded.
    pub queue_capacity: Option<usize>,
}

impl Default for MuxConfig {
    fn default() -> Self {
        Self {
            device_readiness: Readiness::default(),
            poll_interval_ms: 10,
            read_timeout_ms: 10_000,
            queue_capacity: None,
        }
    }
}

impl MuxConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms.max(1))
    }
}

pub struct Multiplexer {
    // Dropped before the runtime so reader tasks release their sockets while
    // the I/O driver still exists.
    local: Rc<LocalSet>,
    runtime: Runtime,
    shutdown: Shutdown,
    config: MuxConfig,
}

impl Multiplexer {
    pub fn new(config: MuxConfig) -> io::Result<Self> {
        let runtime = runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        Ok(Self {
            local: Rc::new(LocalSet::new()),
            runtime,
            shutdown: Shutdown::new(),
            config,
        })
    }

    /// A handle modules keep to register their readers.
    pub fn handle(&self) -> MuxHandle {
        MuxHandle {
            runtime: self.runtime.handle().clone(),
            local: self.local.clone(),
            shutdown: self.shutdown.clone(),
            config: self.config.clone(),
        }
    }

    pub fn config(&self) -> &MuxConfig {
        &self.config
    }

    pub fn shutdown(&self) -> &Shutdown {
        &self.shutdown
    }

    /// Set once a reader (or a tick) lost its link.
    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.shutdown.status()
    }

    /// Dispatches every readiness event that is already pending, without
    /// waiting for new ones. Called by the host once per time step.
    pub fn poll(&self) {
        self.runtime.block_on(self.local.run_until(settle()));
    }

    /// Runs the loop for `duration`, waiting on readiness.
    pub fn run_for(&self, duration: Duration) {
        self.runtime
            .block_on(self.local.run_until(tokio::time::sleep(duration)));
    }

    /// Runs the loop until `done` holds or `timeout` passes. Returns whether
    /// `done` held.
    pub fn run_until(&self, timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            self.poll();
            if done() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            self.run_for(Duration::from_millis(1));
        }
    }
}

impl Debug for Multiplexer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Multiplexer")
            .field("config", &self.config)
            .field("exit_status", &self.exit_status())
            .finish()
    }
}

/// Yields twice: the first yield lets the I/O driver collect readiness and
/// wake readers, the second lets the woken readers run.
async fn settle() {
    tokio::task::yield_now().await;
    tokio::task::yield_now().await;
}

/// A cloneable reference to the [`Multiplexer`] for modules and sessions.
#[derive(Clone)]
pub struct MuxHandle {
    runtime: runtime::Handle,
    local: Rc<LocalSet>,
    shutdown: Shutdown,
    config: MuxConfig,
}

impl MuxHandle {
    pub fn config(&self) -> &MuxConfig {
        &self.config
    }

    pub fn shutdown(&self) -> &Shutdown {
        &self.shutdown
    }

    /// Enters the runtime context, which is required to turn std sockets
    /// into tokio ones.
    pub fn enter(&self) -> EnterGuard<'_> {
        self.runtime.enter()
    }

    /// Spawns a reader task. It only runs while the multiplexer is polled.
    pub fn spawn<F>(&self, task: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + 'static,
    {
        self.local.spawn_local(task)
    }

    /// Reports a dead link and asks the host loop to exit.
    pub fn link_lost(&self, module: &'static str, error: &LinkError) {
        self.reader_context().link_lost(module, error);
    }

    /// What reader tasks keep of the multiplexer. Tasks must not hold the
    /// handle itself, since it owns the set the tasks live in.
    pub fn reader_context(&self) -> ReaderContext {
        ReaderContext {
            shutdown: self.shutdown.clone(),
            read_timeout: self.config.read_timeout(),
            poll_interval: self.config.poll_interval(),
        }
    }

    /// Registers `device` for reading with the configured readiness strategy.
    /// Every frame read is handed to `on_frame`.
    pub fn watch_device(
        &self,
        module: &'static str,
        device: Rc<dyn FrameDevice>,
        on_frame: impl FnMut(Vec<u8>) + 'static,
    ) -> Result<JoinHandle<()>, ModuleError> {
        match self.config.device_readiness {
            Readiness::Notify => {
                let _guard = self.enter();
                let fd = AsyncFd::new(DeviceFd(device))
                    .map_err(ModuleError::resource("device readiness notification"))?;
                Ok(self.spawn(notify_reader(module, fd, on_frame, self.reader_context())))
            }
            Readiness::Poll => Ok(self.spawn(poll_reader(
                module,
                device,
                on_frame,
                self.reader_context(),
            ))),
        }
    }
}

impl Debug for MuxHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MuxHandle")
            .field("config", &self.config)
            .finish()
    }
}

/// The parts of the multiplexer a reader task uses.
#[derive(Debug, Clone)]
pub struct ReaderContext {
    shutdown: Shutdown,
    read_timeout: Duration,
    poll_interval: Duration,
}

impl ReaderContext {
    /// Bound on a single wait for readiness.
    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    /// Reports a dead link and asks the host loop to exit.
    pub fn link_lost(&self, module: &'static str, error: &LinkError) {
        tracing::error!(module, "Link lost: {}", error);
        self.shutdown.shut_down_with_status(ExitStatus::LinkLost);
    }
}

struct DeviceFd(Rc<dyn FrameDevice>);

impl AsRawFd for DeviceFd {
    fn as_raw_fd(&self) -> RawFd {
        self.0.as_raw_fd()
    }
}

async fn notify_reader(
    module: &'static str,
    fd: AsyncFd<DeviceFd>,
    mut on_frame: impl FnMut(Vec<u8>),
    ctx: ReaderContext,
) {
    let mut buf = vec![0u8; MAX_FRAME_LEN];
    loop {
        let mut guard = match tokio::time::timeout(ctx.read_timeout, fd.readable()).await
        {
            Ok(Ok(guard)) => guard,
            Ok(Err(e)) => return ctx.link_lost(module, &LinkError::Io(e)),
            Err(_) => {
                tracing::trace!(module, "No device activity within the read timeout");
                continue;
            }
        };
        match guard.try_io(|inner| inner.get_ref().0.read_frame(&mut buf)) {
            Ok(Ok(0)) => return ctx.link_lost(module, &LinkError::Disconnected),
            Ok(Ok(len)) => on_frame(buf[..len].to_vec()),
            Ok(Err(e)) if e.kind() == io::ErrorKind::Interrupted => {}
            Ok(Err(e)) => return ctx.link_lost(module, &LinkError::Io(e)),
            Err(_would_block) => {}
        }
    }
}

async fn poll_reader(
    module: &'static str,
    device: Rc<dyn FrameDevice>,
    mut on_frame: impl FnMut(Vec<u8>),
    ctx: ReaderContext,
) {
    let mut interval = tokio::time::interval(ctx.poll_interval);
    let mut buf = vec![0u8; MAX_FRAME_LEN];
    loop {
        interval.tick().await;
        // Drain everything that arrived since the last tick.
        loop {
            match device.read_frame(&mut buf) {
                Ok(0) => return ctx.link_lost(module, &LinkError::Disconnected),
                Ok(len) => on_frame(buf[..len].to_vec()),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return ctx.link_lost(module, &LinkError::Io(e)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queues::FrameQueue;
    use std::os::unix::net::UnixDatagram;

    fn device_pair() -> (UnixDatagram, Rc<dyn FrameDevice>) {
        let (host, sim) = UnixDatagram::pair().unwrap();
        sim.set_nonblocking(true).unwrap();
        (host, Rc::new(sim))
    }

    fn reads_frames_in_order(readiness: Readiness) {
        let mux = Multiplexer::new(MuxConfig {
            device_readiness: readiness,
            poll_interval_ms: 1,
            ..Default::default()
        })
        .unwrap();
        let (host, device) = device_pair();
        let queue = FrameQueue::shared(None);
        let sink = queue.clone();
        mux.handle()
            .watch_device("test", device, move |frame| {
                sink.borrow_mut().put(frame);
            })
            .unwrap();

        host.send(&[1; 10]).unwrap();
        host.send(&[2; 20]).unwrap();
        assert!(mux.run_until(Duration::from_secs(5), || queue.borrow().len() == 2));
        let mut queue = queue.borrow_mut();
        assert_eq!(queue.get(), Some(vec![1; 10]));
        assert_eq!(queue.get(), Some(vec![2; 20]));
        assert_eq!(mux.exit_status(), None);
    }

    #[test]
    fn notify_strategy_reads_frames_in_order() {
        reads_frames_in_order(Readiness::Notify);
    }

    #[test]
    fn poll_strategy_drains_all_pending_frames() {
        reads_frames_in_order(Readiness::Poll);
    }

    #[test]
    fn poll_without_events_returns() {
        let mux = Multiplexer::new(MuxConfig::default()).unwrap();
        mux.poll();
        assert_eq!(mux.exit_status(), None);
    }

    #[test]
    fn lost_link_requests_exit() {
        let mux = Multiplexer::new(MuxConfig::default()).unwrap();
        mux.handle().link_lost("test", &LinkError::Disconnected);
        assert_eq!(mux.exit_status(), Some(ExitStatus::LinkLost));
    }

    #[test]
    fn config_defaults_fill_missing_fields() {
        let config: MuxConfig =
            serde_json::from_str(r#"{"device_readiness": "poll", "poll_interval_ms": 5}"#)
                .unwrap();
        assert_eq!(config.device_readiness, Readiness::Poll);
        assert_eq!(config.poll_interval(), Duration::from_millis(5));
        assert_eq!(config.read_timeout(), Duration::from_secs(10));
        assert_eq!(config.queue_capacity, None);
    }
}
