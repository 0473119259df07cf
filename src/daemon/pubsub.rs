//! Upstream publish (§4.1, §6): plain TCP broadcast to every connected
//! subscriber. The spec's "LINGER=0 and no high-water-mark throttle on
//! publish" (§4.1) becomes, over a plain TCP listener: an unbounded
//! per-subscriber channel (a slow reader never blocks the publisher) and
//! no retained backlog (a subscriber that disconnects simply stops
//! receiving frames, nothing is buffered on its behalf beyond the OS
//! socket buffer).

use super::state::DaemonState;
use crate::message::frame::write_frame;
use std::cell::RefCell;
use std::rc::Rc;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;

/// Register a freshly accepted subscriber and spawn the two tasks that
/// keep it alive: a writer draining its frame queue, and a reader whose
/// only job is to notice the connection has gone away (a PUB/SUB-style
/// subscriber never sends anything meaningful; EOF/error is the only
/// signal a plain socket gives us).
pub fn handle_subscriber_connection(state: Rc<RefCell<DaemonState>>, stream: TcpStream) {
    let (mut read_half, mut write_half) = stream.into_split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
    state.borrow_mut().add_subscriber(tx);

    tokio::task::spawn_local(async move {
        let mut discard = [0u8; 64];
        loop {
            match read_half.read(&mut discard).await {
                Ok(0) | Err(_) => break,
                Ok(_) => continue,
            }
        }
    });

    tokio::task::spawn_local(async move {
        while let Some(frame) = rx.recv().await {
            if write_frame(&mut write_half, &frame).await.is_err() {
                break;
            }
        }
    });
}
