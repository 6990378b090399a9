//! Message framing on an ordered byte stream.
//!
//! Every datagram travels as a 2-byte big-endian length followed by that many
//! bytes of RFC 7252 message. Frames are handed out undecoded so that a
//! malformed message can be dropped without losing the stream position.

use bytes::{Bytes, BytesMut};
use log::{trace, warn};
use tokio::io::{self, AsyncRead, AsyncReadExt};
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

const LENGTH_FIELD_LEN: usize = 2;

/// Largest body the 2-byte length field can describe.
pub const MAX_FRAME_LEN: usize = u16::MAX as usize;

pub struct FrameCodec {
    frames: LengthDelimitedCodec,
}

impl FrameCodec {
    /// Limits above `MAX_FRAME_LEN` are clamped to it.
    pub fn new(max_packet_size: usize) -> FrameCodec {
        FrameCodec {
            frames: LengthDelimitedCodec::builder()
                .length_field_length(LENGTH_FIELD_LEN)
                .max_frame_length(max_packet_size.min(MAX_FRAME_LEN))
                .new_codec(),
        }
    }
}

impl Decoder for FrameCodec {
    type Item = BytesMut;
    type Error = io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<BytesMut>, io::Error> {
        self.frames.decode(buf)
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = io::Error;

    fn encode(&mut self, frame: Bytes, buf: &mut BytesMut) -> Result<(), io::Error> {
        self.frames.encode(frame, buf)
    }
}

/// Reads whole frames from the read half of a transport.
///
/// Bytes already read stay buffered across calls, so a `read_frame` future
/// may be dropped (for example when a deadline fires) without losing data.
pub struct FrameReader<R> {
    reader: R,
    buf: BytesMut,
    codec: FrameCodec,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R, max_packet_size: usize) -> FrameReader<R> {
        FrameReader {
            reader,
            buf: BytesMut::with_capacity(max_packet_size.min(MAX_FRAME_LEN) + LENGTH_FIELD_LEN),
            codec: FrameCodec::new(max_packet_size),
        }
    }

    /// Returns the next frame, or `None` once the peer has closed the stream.
    ///
    /// A partial frame left over at end of stream is discarded.
    pub async fn read_frame(&mut self) -> io::Result<Option<BytesMut>> {
        loop {
            if let Some(frame) = self.buffered_frame()? {
                return Ok(Some(frame));
            }
            if self.fill().await? == 0 {
                return Ok(None);
            }
        }
    }

    /// Takes a complete frame out of the bytes read so far, if there is one.
    pub fn buffered_frame(&mut self) -> io::Result<Option<BytesMut>> {
        let frame = self.codec.decode(&mut self.buf)?;
        if let Some(frame) = &frame {
            trace!("frame of {} bytes: {:02x?}", frame.len(), &frame[..]);
        }
        Ok(frame)
    }

    /// Reads whatever the transport has next and returns the byte count;
    /// `0` means end of stream, at which point any partial frame is dropped.
    pub async fn fill(&mut self) -> io::Result<usize> {
        let n = self.reader.read_buf(&mut self.buf).await?;
        if n == 0 && !self.buf.is_empty() {
            warn!("discarding {} bytes of incomplete frame at end of stream", self.buf.len());
            self.buf.clear();
        }
        Ok(n)
    }
}
