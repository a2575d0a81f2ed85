//! Delayed server control commands.
//!
//! Restart and quit are requested from inside a request worker, but must not
//! run there: the confirmation page has to reach the client first. The admin
//! stage schedules them here and the server loop picks them up.

use std::time::Duration;

use tokio::sync::mpsc;

/// Delay before an admin-requested restart or quit takes effect.
pub const ADMIN_ACTION_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    /// Stop both listeners, rebuild pool and pipelines, start again.
    Restart,
    /// Stop both listeners and return from the server loop.
    Quit,
}

/// Sending side, held by the server context.
#[derive(Debug, Clone)]
pub struct ControlHandle {
    tx: mpsc::UnboundedSender<ControlCommand>,
}

/// Receiving side, consumed by the server loop.
#[derive(Debug)]
pub struct ControlReceiver {
    rx: mpsc::UnboundedReceiver<ControlCommand>,
}

impl ControlHandle {
    pub fn channel() -> (ControlHandle, ControlReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ControlHandle { tx }, ControlReceiver { rx })
    }

    /// Deliver `command` now.
    pub fn send(&self, command: ControlCommand) {
        if self.tx.send(command).is_err() {
            tracing::warn!(?command, "Server loop is gone, control command dropped");
        }
    }

    /// Deliver `command` after `delay`, off the calling thread.
    ///
    /// Uses the current tokio runtime when there is one, otherwise a
    /// short-lived thread.
    pub fn schedule(&self, command: ControlCommand, delay: Duration) {
        tracing::info!(?command, delay_ms = delay.as_millis() as u64, "Control command scheduled");
        let handle = self.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    tokio::time::sleep(delay).await;
                    handle.send(command);
                });
            }
            Err(_) => {
                let spawned = std::thread::Builder::new()
                    .name("control".into())
                    .spawn(move || {
                        std::thread::sleep(delay);
                        handle.send(command);
                    });
                if let Err(e) = spawned {
                    tracing::error!(?command, error = %e, "Cannot schedule control command");
                }
            }
        }
    }
}

impl ControlReceiver {
    /// Next command, or `None` once every handle is dropped.
    pub async fn recv(&mut self) -> Option<ControlCommand> {
        self.rx.recv().await
    }

    /// A command that is already waiting, without blocking.
    pub fn try_recv(&mut self) -> Option<ControlCommand> {
        self.rx.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scheduled_command_arrives_after_delay() {
        let (handle, mut receiver) = ControlHandle::channel();
        handle.schedule(ControlCommand::Restart, Duration::from_millis(100));

        assert_eq!(receiver.try_recv(), None);
        let command = tokio::time::timeout(Duration::from_secs(2), receiver.recv())
            .await
            .unwrap();
        assert_eq!(command, Some(ControlCommand::Restart));
    }

    #[test]
    fn schedule_works_without_runtime() {
        let (handle, mut receiver) = ControlHandle::channel();
        handle.schedule(ControlCommand::Quit, Duration::from_millis(10));
        std::thread::sleep(Duration::from_millis(200));
        assert_eq!(receiver.try_recv(), Some(ControlCommand::Quit));
    }
}
