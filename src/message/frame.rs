//! Length-prefixed framing for the two TCP channels (upstream RPC and
//! upstream publish) and the local IPC channel (downstream event).
//!
//! Every frame is `[u32 big-endian length][payload bytes]`, payload being
//! the UTF-8 JSON document described by [`super::schema`]. A ROUTER
//! socket's routing frame has no equivalent on a plain TCP connection;
//! the daemon substitutes a server-assigned `ClientId` per accepted
//! connection instead of exchanging one on the wire (see `daemon::rpc`).

use crate::types::{Error, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Read a single length-prefixed frame. Returns `Ok(None)` on clean EOF
/// before any bytes of the length prefix were read.
pub async fn read_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
    max_frame_bytes: u32,
) -> Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(Error::Io(e)),
    }
    let len = u32::from_be_bytes(len_buf);
    if len > max_frame_bytes {
        return Err(Error::schema_violation(format!(
            "frame of {len} bytes exceeds max_frame_bytes {max_frame_bytes}"
        )));
    }
    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload).await.map_err(Error::Io)?;
    Ok(Some(payload))
}

pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, payload: &[u8]) -> Result<()> {
    let len = u32::try_from(payload.len())
        .map_err(|_| Error::internal("frame payload exceeds u32::MAX bytes"))?;
    writer.write_all(&len.to_be_bytes()).await.map_err(Error::Io)?;
    writer.write_all(payload).await.map_err(Error::Io)?;
    writer.flush().await.map_err(Error::Io)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn roundtrips_a_frame() {
        let mut buf = Vec::new();
        write_frame(&mut buf, b"hello").await.unwrap();

        let mut cursor = Cursor::new(buf);
        let frame = read_frame(&mut cursor, 1024).await.unwrap().unwrap();
        assert_eq!(frame, b"hello");
    }

    #[tokio::test]
    async fn clean_eof_before_length_prefix_is_none() {
        let mut cursor = Cursor::new(Vec::<u8>::new());
        let frame = read_frame(&mut cursor, 1024).await.unwrap();
        assert!(frame.is_none());
    }

    #[tokio::test]
    async fn oversized_frame_is_rejected() {
        let mut buf = Vec::new();
        write_frame(&mut buf, &vec![0u8; 100]).await.unwrap();
        let mut cursor = Cursor::new(buf);
        let err = read_frame(&mut cursor, 10).await.unwrap_err();
        assert!(matches!(err, Error::SchemaViolation(_)));
    }

    /// A real socket can hand back the length prefix and the payload in
    /// separate reads; `read_frame` must reassemble them correctly rather
    /// than assuming one read yields a whole frame.
    #[tokio::test]
    async fn reassembles_a_frame_delivered_across_several_reads() {
        let mut mock = tokio_test::io::Builder::new()
            .read(&5u32.to_be_bytes())
            .read(b"he")
            .read(b"llo")
            .build();
        let frame = read_frame(&mut mock, 1024).await.unwrap().unwrap();
        assert_eq!(frame, b"hello");
    }
}
