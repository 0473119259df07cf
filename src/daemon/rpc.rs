//! Upstream RPC connection handler (§4.1, §4.8): one TCP connection per
//! client, demultiplexed by a server-assigned `ClientId` — the idiomatic
//! stand-in for a ROUTER socket's routing frame over a plain TCP listener
//! (see design notes).

use super::dispatch::{encode_publish, handle_rpc_request};
use super::reconcile::spawn_reap_future;
use super::state::{ContainerProfileStart, DaemonState};
use crate::message::frame::{read_frame, write_frame};
use crate::message::schema::{decode_rpc_request, encode_rpc_reply};
use crate::message::types::RpcReply;
use crate::recovery::with_recovery_async;
use std::cell::RefCell;
use std::rc::Rc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

pub async fn handle_rpc_connection(
    state: Rc<RefCell<DaemonState>>,
    stream: TcpStream,
    max_frame_bytes: u32,
    reap_tx: mpsc::UnboundedSender<super::reconcile::ReapFuture>,
) {
    let (mut read_half, write_half) = stream.into_split();
    let (frame_tx, mut frame_rx) = mpsc::unbounded_channel::<Vec<u8>>();

    let client_id = state.borrow_mut().register_client(frame_tx.clone());

    tokio::task::spawn_local(async move {
        let mut write_half = write_half;
        while let Some(frame) = frame_rx.recv().await {
            if write_frame(&mut write_half, &frame).await.is_err() {
                break;
            }
        }
    });

    loop {
        let frame = match read_frame(&mut read_half, max_frame_bytes).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(error = %e, "rpc frame read failed, dropping connection");
                break;
            }
        };

        let request = match decode_rpc_request(&frame) {
            Ok(req) => req,
            Err(e) => {
                tracing::warn!(error = %e, "schema violation on rpc channel");
                continue;
            }
        };

        let state_clone = state.clone();
        let client_clone = client_id.clone();
        let result = with_recovery_async(
            || handle_rpc_request(state_clone, client_clone, request),
            "rpc_dispatch",
        )
        .await;

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(error = %e, "rpc handler failed");
                continue;
            }
        };

        if let Some(publish) = outcome.container_start_publish {
            if let Some((container_uuid, _, _)) = &outcome.spawned {
                let now = state.borrow().now_secs();
                let energy_joules = {
                    let state_ref = state.borrow();
                    state_ref.sensors.raw_energy_joules_total().await
                }
                .ok();
                state.borrow_mut().record_profile_start_if_absent(
                    container_uuid.clone(),
                    ContainerProfileStart { time: now, energy_joules },
                );
            }
            match encode_publish(&publish) {
                Ok(bytes) => state.borrow_mut().publish(bytes),
                Err(e) => tracing::error!(error = %e, "failed to encode container_start publish"),
            }
        }

        if let Some((container_uuid, pid, mut child)) = outcome.spawned {
            if let Some(stdout) = child.stdout.take() {
                spawn_output_forwarder(state.clone(), client_id.clone(), container_uuid.clone(), stdout, false);
            }
            if let Some(stderr) = child.stderr.take() {
                spawn_output_forwarder(state.clone(), client_id.clone(), container_uuid.clone(), stderr, true);
            }
            let (reap_future, kill_tx) = spawn_reap_future(container_uuid, pid, child);
            state.borrow_mut().register_kill_trigger(pid, kill_tx);
            let _ = reap_tx.send(reap_future);
        }

        match encode_rpc_reply(&outcome.reply) {
            Ok(bytes) => {
                let _ = frame_tx.send(bytes);
            }
            Err(e) => tracing::error!(error = %e, "failed to encode rpc reply"),
        }
    }

    state.borrow_mut().unregister_client(&client_id);
}

/// Spawns a stdout/stderr forwarder for a freshly started process: reads
/// lines from the child's piped stream and relays them to the owning
/// client as `RpcReply::Stdout`/`Stderr` frames (§4.8's `run` handling).
pub fn spawn_output_forwarder<R>(
    state: Rc<RefCell<DaemonState>>,
    client: crate::types::ClientId,
    container_uuid: crate::types::ContainerId,
    reader: R,
    is_stderr: bool,
) where
    R: AsyncRead + Unpin + 'static,
{
    tokio::task::spawn_local(async move {
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let reply = if is_stderr {
                        RpcReply::Stderr {
                            container_uuid: container_uuid.clone(),
                            payload: line,
                        }
                    } else {
                        RpcReply::Stdout {
                            container_uuid: container_uuid.clone(),
                            payload: line,
                        }
                    };
                    match encode_rpc_reply(&reply) {
                        Ok(bytes) => state.borrow().send_to_client(&client, bytes),
                        Err(e) => tracing::error!(error = %e, "failed to encode output frame"),
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "output forwarder read failed");
                    break;
                }
            }
        }
    });
}
