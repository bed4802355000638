use std::rc::Rc;
use tokio::sync::watch;

/// A struct which can be used to stop the host loop.
/// You can create multiple connected shutdowns by cloning.
///
/// Only the first status sent sticks; later requests are ignored so the
/// original cause of the shutdown is what the host sees.
#[derive(Debug, Clone)]
pub struct Shutdown {
    /// This channel can be used to tell the host loop to exit.
    notify: Rc<watch::Sender<Option<ExitStatus>>>,
}

impl Shutdown {
    /// Creates a new active shutdown.
    pub fn new() -> Self {
        let (notify, _) = watch::channel(None);
        Self {
            notify: Rc::new(notify),
        }
    }

    /// Sends `ExitStatus::Exited` to all `Shutdowns` cloned from this one.
    pub fn shut_down(&self) {
        self.shut_down_with_status(ExitStatus::Exited);
    }

    /// Sends `status` to all `Shutdowns` cloned from this one.
    pub fn shut_down_with_status(&self, status: ExitStatus) {
        let changed = self.notify.send_if_modified(|current| match current {
            Some(_) => false,
            None => {
                *current = Some(status);
                true
            }
        });
        if changed {
            tracing::info!(?status, "shutdown requested");
        }
    }

    /// The status sent so far, if any.
    pub fn status(&self) -> Option<ExitStatus> {
        *self.notify.borrow()
    }

    /// Waits to receive a shutdown status.
    pub async fn wait_for_shutdown(&self) -> ExitStatus {
        let mut recv = self.notify.subscribe();
        loop {
            if let Some(status) = *recv.borrow_and_update() {
                return status;
            }
            // We hold the sender, so the channel cannot close under us.
            if recv.changed().await.is_err() {
                unreachable!()
            }
        }
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ExitStatus {
    Status(u32),
    Exited,
    /// A network link failed and hardware-visible data can no longer be kept
    /// in step with it.
    LinkLost,
    TimedOut,
}
