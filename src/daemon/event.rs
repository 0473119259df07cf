//! Downstream event connection handler (§4.1, §4.8): one Unix-domain
//! socket connection per instrumented application. Request-only — no
//! reply frame is ever written back; the only output is whatever
//! publishes a handler produces as a side effect (`progress`,
//! `performance` mirrors onto the upstream publish channel).

use super::dispatch::handle_downstream_event;
use super::state::DaemonState;
use crate::message::frame::read_frame;
use crate::message::schema::{decode_downstream_event, encode_publish};
use crate::recovery::with_recovery_async;
use std::cell::RefCell;
use std::rc::Rc;
use tokio::net::UnixStream;

pub async fn handle_event_connection(
    state: Rc<RefCell<DaemonState>>,
    mut stream: UnixStream,
    max_frame_bytes: u32,
) {
    loop {
        let frame = match read_frame(&mut stream, max_frame_bytes).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(error = %e, "downstream frame read failed, dropping connection");
                break;
            }
        };

        let event = match decode_downstream_event(&frame) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(error = %e, "schema violation on downstream channel");
                continue;
            }
        };

        let state_clone = state.clone();
        let result = with_recovery_async(
            || handle_downstream_event(state_clone, event),
            "downstream_dispatch",
        )
        .await;

        match result {
            Ok(publishes) => {
                for publish in publishes {
                    match encode_publish(&publish) {
                        Ok(bytes) => state.borrow_mut().publish(bytes),
                        Err(e) => tracing::error!(error = %e, "failed to encode downstream publish"),
                    }
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "downstream event handler failed");
            }
        }
    }
}
