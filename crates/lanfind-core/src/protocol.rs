//! Lookup wire format.
//!
//! Every message is one frame: a u32 big-endian length followed by the
//! bincode encoding of a [`LookupQuery`] or [`LookupResult`]. A connection
//! carries any number of query/result pairs in order.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::{Error, ErrorKind};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Queries and results are tiny; anything bigger is garbage.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct LookupQuery {
    /// Hex-encoded fingerprint.
    pub fingerprint: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct LookupResult {
    /// Path of the matching file on the responder, if it has one.
    pub locator: Option<String>,
    /// Responder's own address on the connection.
    pub responder: String,
    /// Address the responder saw the query come from.
    pub requester: String,
}

impl LookupResult {
    pub fn is_found(&self) -> bool {
        self.locator.is_some()
    }
}

pub async fn write_frame<T: AsyncWrite + Unpin + Send>(
    transport: &mut T,
    data: &[u8],
) -> std::io::Result<()> {
    if data.len() > MAX_FRAME_LEN {
        return Err(Error::new(ErrorKind::InvalidInput, "frame too large"));
    }
    transport.write_all(&(data.len() as u32).to_be_bytes()).await?;
    transport.write_all(data).await?;
    transport.flush().await?;
    Ok(())
}

/// Read one frame. `None` means the peer closed the connection between frames.
pub async fn read_frame<T: AsyncRead + Unpin + Send>(
    transport: &mut T,
) -> std::io::Result<Option<Vec<u8>>> {
    let mut lenb = [0u8; 4];
    match transport.read_exact(&mut lenb).await {
        Ok(_) => {}
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }

    let len = u32::from_be_bytes(lenb) as usize;
    if len > MAX_FRAME_LEN {
        return Err(Error::new(ErrorKind::InvalidData, "frame too large"));
    }

    let mut buf = vec![0u8; len];
    transport.read_exact(&mut buf).await?;
    Ok(Some(buf))
}

pub async fn send_message<T, M>(transport: &mut T, msg: &M) -> std::io::Result<()>
where
    T: AsyncWrite + Unpin + Send,
    M: Serialize,
{
    let bytes = bincode::serialize(msg).map_err(|e| Error::new(ErrorKind::InvalidData, e))?;
    write_frame(transport, &bytes).await
}

pub async fn recv_message<T, M>(transport: &mut T) -> std::io::Result<Option<M>>
where
    T: AsyncRead + Unpin + Send,
    M: DeserializeOwned,
{
    let Some(bytes) = read_frame(transport).await? else {
        return Ok(None);
    };
    bincode::deserialize(&bytes)
        .map(Some)
        .map_err(|e| Error::new(ErrorKind::InvalidData, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_query_over_duplex() -> std::io::Result<()> {
        let (mut a, mut b) = tokio::io::duplex(1024);
        let query = LookupQuery {
            fingerprint: "ab".repeat(32),
        };

        send_message(&mut a, &query).await?;
        drop(a);

        let received: Option<LookupQuery> = recv_message(&mut b).await?;
        assert_eq!(received, Some(query));
        // Clean close after the last frame.
        let next: Option<LookupQuery> = recv_message(&mut b).await?;
        assert_eq!(next, None);
        Ok(())
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let (mut a, mut b) = tokio::io::duplex(64);
        tokio::spawn(async move {
            let _ = a.write_all(&(u32::MAX).to_be_bytes()).await;
        });

        let err = read_frame(&mut b).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn test_garbage_payload_is_invalid_data() -> std::io::Result<()> {
        let (mut a, mut b) = tokio::io::duplex(64);
        write_frame(&mut a, &[0xff, 0xff]).await?;

        let err = recv_message::<_, LookupResult>(&mut b).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
        Ok(())
    }
}
