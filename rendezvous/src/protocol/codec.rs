//! Framing of protocol messages.
//!
//! Frames use a 4-byte big-endian length prefix followed by a JSON body.
//! Frames longer than [`MAX_FRAME_LENGTH`] are rejected while decoding.

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use crate::error::RendezvousResult;

/// Largest accepted frame body, in bytes.
pub const MAX_FRAME_LENGTH: usize = 1024 * 1024;

/// A byte stream split into protocol frames.
pub type FramedIo<T> = Framed<T, LengthDelimitedCodec>;

/// Wraps `io` in the protocol's length-delimited framing.
pub fn framed<T>(io: T) -> FramedIo<T>
where
    T: AsyncRead + AsyncWrite,
{
    LengthDelimitedCodec::builder()
        .max_frame_length(MAX_FRAME_LENGTH)
        .new_framed(io)
}

/// Serializes `message` into a frame body.
pub fn encode<M: Serialize>(message: &M) -> RendezvousResult<Bytes> {
    Ok(Bytes::from(serde_json::to_vec(message)?))
}

/// Parses a frame body.
pub fn decode<M: DeserializeOwned>(frame: &[u8]) -> RendezvousResult<M> {
    Ok(serde_json::from_slice(frame)?)
}

/// Writes `message` as one frame and flushes it.
pub async fn send<T, M>(io: &mut FramedIo<T>, message: &M) -> RendezvousResult<()>
where
    T: AsyncRead + AsyncWrite + Unpin,
    M: Serialize,
{
    io.send(encode(message)?).await?;
    Ok(())
}

/// Reads the next frame and parses it.
///
/// Returns `Ok(None)` when the peer closed the connection cleanly between frames.
pub async fn recv<T, M>(io: &mut FramedIo<T>) -> RendezvousResult<Option<M>>
where
    T: AsyncRead + AsyncWrite + Unpin,
    M: DeserializeOwned,
{
    match io.next().await {
        Some(frame) => Ok(Some(decode(&frame?)?)),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncWriteExt, duplex};

    use super::*;
    use crate::error::ErrorKind;
    use crate::protocol::{Request, Response};
    use crate::types::PartitionKey;

    #[tokio::test]
    async fn frames_carry_one_message_each() {
        let (client, server) = duplex(4096);
        let mut client = framed(client);
        let mut server = framed(server);

        let request = Request::GetBarrier {
            key: PartitionKey::new("2024-01-01", "2024-01-02"),
        };
        send(&mut client, &request).await.unwrap();
        send(&mut client, &Request::Status { handle: crate::types::HandleId(1) })
            .await
            .unwrap();

        let first: Request = recv(&mut server).await.unwrap().unwrap();
        let second: Request = recv(&mut server).await.unwrap().unwrap();
        assert_eq!(first, request);
        assert_eq!(second.name(), "status");

        send(&mut server, &Response::Ok).await.unwrap();
        let response: Response = recv(&mut client).await.unwrap().unwrap();
        assert_eq!(response, Response::Ok);
    }

    #[tokio::test]
    async fn clean_close_yields_none() {
        let (client, server) = duplex(64);
        let mut server = framed(server);
        drop(client);

        let received: Option<Request> = recv(&mut server).await.unwrap();
        assert!(received.is_none());
    }

    #[tokio::test]
    async fn malformed_body_is_a_deserialization_error() {
        let (client, server) = duplex(64);
        let mut client = framed(client);
        let mut server = framed(server);

        client.send(Bytes::from_static(b"{oops")).await.unwrap();

        let err = recv::<_, Request>(&mut server).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DeserializationError);
    }

    #[tokio::test]
    async fn oversized_frames_are_rejected() {
        let (mut client, server) = duplex(64);
        let mut server = framed(server);

        let length = (MAX_FRAME_LENGTH as u32 + 1).to_be_bytes();
        client.write_all(&length).await.unwrap();

        let err = recv::<_, Request>(&mut server).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IoError);
    }
}
