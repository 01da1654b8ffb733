//! Length-prefixed bincode frames: a 4-byte big-endian payload length, then
//! the payload.

use std::io;

use bincode::config;
use byteorder::{BigEndian, ByteOrder};
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("frame of {0} bytes exceeds the {MAX_FRAME_LEN} byte limit")]
    TooLarge(usize),

    #[error("encode error: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("decode error: {0}")]
    Decode(#[from] bincode::error::DecodeError),
}

pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>, CodecError> {
    let payload = bincode::serde::encode_to_vec(message, config::standard())?;
    if payload.len() > MAX_FRAME_LEN {
        return Err(CodecError::TooLarge(payload.len()));
    }
    let mut frame = vec![0u8; 4];
    BigEndian::write_u32(&mut frame, payload.len() as u32);
    frame.extend_from_slice(&payload);
    Ok(frame)
}

pub fn decode<T: DeserializeOwned>(payload: &[u8]) -> Result<T, CodecError> {
    let (message, _) = bincode::serde::decode_from_slice(payload, config::standard())?;
    Ok(message)
}

pub async fn write_frame<W, T>(writer: &mut W, message: &T) -> Result<(), CodecError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let frame = encode(message)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one frame. `Ok(None)` means the peer closed the stream between frames.
pub async fn read_frame<R, T>(reader: &mut R) -> Result<Option<T>, CodecError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let len = BigEndian::read_u32(&len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(CodecError::TooLarge(len));
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    decode(&payload).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use paxos_types::{Heartbeat, Reply, ReplicaError, Request, Transaction};

    #[test]
    fn frame_starts_with_payload_length() {
        let frame = encode(&Request::Ping(Heartbeat { node_id: 7 })).unwrap();
        let len = BigEndian::read_u32(&frame[..4]) as usize;
        assert_eq!(len, frame.len() - 4);
        let decoded: Request = decode(&frame[4..]).unwrap();
        assert_eq!(decoded, Request::Ping(Heartbeat { node_id: 7 }));
    }

    #[tokio::test]
    async fn frames_stream_back_to_back() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        let replies: Vec<Result<Reply, ReplicaError>> = vec![
            Ok(Reply::Ack),
            Err(ReplicaError::ShuttingDown),
            Ok(Reply::Heartbeat(Heartbeat { node_id: 2 })),
        ];
        for reply in &replies {
            write_frame(&mut a, reply).await.unwrap();
        }
        drop(a);

        let mut read = Vec::new();
        while let Some(reply) = read_frame::<_, Result<Reply, ReplicaError>>(&mut b)
            .await
            .unwrap()
        {
            read.push(reply);
        }
        assert_eq!(read, replies);
    }

    #[tokio::test]
    async fn oversized_length_is_rejected() {
        let (mut a, mut b) = tokio::io::duplex(64);
        let mut header = [0u8; 4];
        BigEndian::write_u32(&mut header, (MAX_FRAME_LEN + 1) as u32);
        a.write_all(&header).await.unwrap();

        let err = read_frame::<_, Request>(&mut b).await.unwrap_err();
        assert!(matches!(err, CodecError::TooLarge(n) if n == MAX_FRAME_LEN + 1));
    }

    #[tokio::test]
    async fn truncated_payload_is_an_error() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        let frame = encode(&Transaction::deposit(1, 10)).unwrap();
        a.write_all(&frame[..frame.len() - 1]).await.unwrap();
        drop(a);

        let err = read_frame::<_, Transaction>(&mut b).await.unwrap_err();
        assert!(matches!(err, CodecError::Io(_)));
    }
}
