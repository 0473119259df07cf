//! SIGCHLD reconciliation, reimagined for async Rust: instead of a raw
//! signal handler, every spawned child's `Child::wait()` future is
//! multiplexed in the main loop's `FuturesUnordered`. A child can also be
//! asked to die early (via `kill`) through a oneshot trigger raced
//! against `wait()` in the same future, so `start_kill` still runs on the
//! single loop task rather than from whatever task issued the `kill` RPC.

use crate::types::{ContainerId, Pid};
use std::future::Future;
use std::pin::Pin;
use tokio::process::Child;
use tokio::sync::oneshot;

pub struct ReapedChild {
    pub container_uuid: ContainerId,
    pub pid: Pid,
    pub status: Option<std::process::ExitStatus>,
}

pub type ReapFuture = Pin<Box<dyn Future<Output = ReapedChild>>>;

/// Build the future the main loop's `FuturesUnordered` polls for one
/// freshly spawned child. Returns the future plus the kill-trigger sender
/// the daemon state should remember for this pid.
pub fn spawn_reap_future(
    container_uuid: ContainerId,
    pid: Pid,
    mut child: Child,
) -> (ReapFuture, oneshot::Sender<()>) {
    let (kill_tx, kill_rx) = oneshot::channel::<()>();

    let fut = Box::pin(async move {
        let status = tokio::select! {
            status = child.wait() => status.ok(),
            _ = kill_rx => {
                let _ = child.start_kill();
                child.wait().await.ok()
            }
        };
        ReapedChild {
            container_uuid,
            pid,
            status,
        }
    });

    (fut, kill_tx)
}
