//! Length-prefixed message channel over a buffered byte stream.
//!
//! # Wire format
//!
//! ```text
//! FRAME:      [8 bytes LE: payload_len][payload_len bytes: bincode Envelope]
//! BULK PHASE: [size bytes: raw file data], size declared by the preceding frame
//! ```
//!
//! Frames and bulk bytes share one ordered stream. A caller must finish a
//! declared bulk phase before sending or receiving the next frame.

use bytes::{BufMut, Bytes, BytesMut};
use std::io;
use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter,
    ReadHalf, WriteHalf,
};

use super::constants::{BUFFER_SIZE, FRAME_HEADER_LEN, MAX_MESSAGE_SIZE};
use super::protocol::{Envelope, Response};
use crate::error::{ChannelError, TransferError};

/// Encode an envelope into a complete frame (prefix + payload)
pub fn encode_frame(envelope: &Envelope) -> Result<Bytes, ChannelError> {
    let payload = bincode::serialize(envelope).map_err(ChannelError::Encode)?;
    if payload.len() > MAX_MESSAGE_SIZE {
        return Err(ChannelError::FrameTooLarge {
            len: payload.len() as u64,
            max: MAX_MESSAGE_SIZE,
        });
    }

    let mut buf = BytesMut::with_capacity(FRAME_HEADER_LEN + payload.len());
    buf.put_u64_le(payload.len() as u64);
    buf.put_slice(&payload);
    Ok(buf.freeze())
}

/// Decode a frame payload (without its prefix)
pub fn decode_payload(payload: &[u8]) -> Result<Envelope, ChannelError> {
    bincode::deserialize(payload).map_err(ChannelError::Decode)
}

/// Framed envelopes plus raw bulk-byte access on the same buffered stream
pub struct MessageChannel<S> {
    reader: BufReader<ReadHalf<S>>,
    writer: BufWriter<WriteHalf<S>>,
}

impl<S: AsyncRead + AsyncWrite> MessageChannel<S> {
    pub fn new(stream: S) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);
        Self {
            reader: BufReader::with_capacity(BUFFER_SIZE, read_half),
            writer: BufWriter::with_capacity(BUFFER_SIZE, write_half),
        }
    }

    /// Write one framed envelope and flush it
    pub async fn send(&mut self, envelope: &Envelope) -> Result<(), ChannelError> {
        let frame = encode_frame(envelope)?;
        self.writer.write_all(&frame).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Read exactly one framed envelope.
    ///
    /// Returns `ChannelError::Closed` when the peer closed the stream on a
    /// frame boundary; EOF anywhere inside a frame is an I/O error.
    pub async fn receive(&mut self) -> Result<Envelope, ChannelError> {
        if self.reader.fill_buf().await?.is_empty() {
            return Err(ChannelError::Closed);
        }

        let len = self.reader.read_u64_le().await?;
        if len > MAX_MESSAGE_SIZE as u64 {
            return Err(ChannelError::FrameTooLarge {
                len,
                max: MAX_MESSAGE_SIZE,
            });
        }

        let mut payload = vec![0u8; len as usize];
        self.reader.read_exact(&mut payload).await?;
        decode_payload(&payload)
    }

    /// Receive and expect a plain `Response`
    pub async fn receive_response(&mut self) -> Result<Response, TransferError> {
        match self.receive().await? {
            Envelope::Response(response) => Ok(response),
            other => Err(TransferError::UnexpectedMessage {
                expected: "Response",
                got: other.kind(),
            }),
        }
    }

    /// Receive and expect a `ChecksumVerification`
    pub async fn receive_checksum(&mut self) -> Result<Vec<u8>, TransferError> {
        match self.receive().await? {
            Envelope::ChecksumVerification { checksum } => Ok(checksum),
            other => Err(TransferError::UnexpectedMessage {
                expected: "ChecksumVerification",
                got: other.kind(),
            }),
        }
    }

    /// Fill `buf` completely with raw bytes, bypassing framing
    pub async fn read_exact_raw(&mut self, buf: &mut [u8]) -> io::Result<()> {
        self.reader.read_exact(buf).await.map(|_| ())
    }

    /// Queue raw bytes, bypassing framing. Call `flush` to push them out.
    pub async fn write_raw(&mut self, buf: &[u8]) -> io::Result<()> {
        self.writer.write_all(buf).await
    }

    pub async fn flush(&mut self) -> io::Result<()> {
        self.writer.flush().await
    }

    /// Buffered read side, for bulk copies
    pub fn raw_reader(&mut self) -> &mut BufReader<ReadHalf<S>> {
        &mut self.reader
    }

    /// Buffered write side, for bulk copies
    pub fn raw_writer(&mut self) -> &mut BufWriter<WriteHalf<S>> {
        &mut self.writer
    }

    /// Flush pending bytes and close the write side
    pub async fn shutdown(&mut self) -> io::Result<()> {
        self.writer.shutdown().await
    }
}
