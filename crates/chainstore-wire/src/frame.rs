//! Length-prefixed framing.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::{WireError, WireResult};

/// Size of the frame header: a big-endian `u32` payload length.
pub const FRAME_HEADER_SIZE: usize = 4;

/// Maximum accepted payload size. Frames above this are rejected rather
/// than buffered, bounding memory per connection.
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// A single wire frame: an opaque payload with a length prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    payload: Bytes,
}

impl Frame {
    pub fn new(payload: Bytes) -> Self {
        Self { payload }
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Attempts to decode one frame from the front of `buf`.
    ///
    /// Returns `Ok(None)` when the buffer does not yet hold a complete
    /// frame; the caller keeps reading and retries. Consumed bytes are
    /// removed from `buf`.
    pub fn decode(buf: &mut BytesMut) -> WireResult<Option<Frame>> {
        if buf.len() < FRAME_HEADER_SIZE {
            return Ok(None);
        }

        let mut header = [0u8; FRAME_HEADER_SIZE];
        header.copy_from_slice(&buf[..FRAME_HEADER_SIZE]);
        let len = u32::from_be_bytes(header) as usize;

        if len > MAX_FRAME_SIZE {
            return Err(WireError::FrameTooLarge(len));
        }
        if buf.len() < FRAME_HEADER_SIZE + len {
            return Ok(None);
        }

        buf.advance(FRAME_HEADER_SIZE);
        let payload = buf.split_to(len).freeze();
        Ok(Some(Frame { payload }))
    }

    /// Appends the encoded frame to `buf`.
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.reserve(FRAME_HEADER_SIZE + self.payload.len());
        buf.put_u32(self.payload.len() as u32);
        buf.put_slice(&self.payload);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let frame = Frame::new(Bytes::from_static(b"hello"));
        let mut buf = BytesMut::new();
        frame.encode(&mut buf);

        let decoded = Frame::decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded.payload(), b"hello");
        assert!(buf.is_empty());
    }

    #[test]
    fn partial_header_is_incomplete() {
        let mut buf = BytesMut::from(&[0u8, 0][..]);
        assert!(Frame::decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 2);
    }

    #[test]
    fn partial_body_is_incomplete() {
        let frame = Frame::new(Bytes::from_static(b"hello"));
        let mut buf = BytesMut::new();
        frame.encode(&mut buf);
        let _ = buf.split_off(buf.len() - 1);

        assert!(Frame::decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn two_frames_decode_in_order() {
        let mut buf = BytesMut::new();
        Frame::new(Bytes::from_static(b"one")).encode(&mut buf);
        Frame::new(Bytes::from_static(b"two")).encode(&mut buf);

        assert_eq!(Frame::decode(&mut buf).unwrap().unwrap().payload(), b"one");
        assert_eq!(Frame::decode(&mut buf).unwrap().unwrap().payload(), b"two");
        assert!(Frame::decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn oversized_frame_rejected() {
        let mut buf = BytesMut::new();
        buf.put_u32((MAX_FRAME_SIZE + 1) as u32);
        buf.put_slice(b"x");

        assert!(matches!(
            Frame::decode(&mut buf),
            Err(WireError::FrameTooLarge(_))
        ));
    }
}
