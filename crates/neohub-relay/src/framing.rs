//! Local wire framing.
//!
//! Every frame on a relay connection is a 2-byte little-endian length
//! followed by that many payload bytes, in both directions. A frame longer
//! than the configured maximum is a protocol error and ends the connection.

use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

/// Width of the length prefix in bytes.
pub const LENGTH_FIELD_LEN: usize = 2;

/// Largest payload a frame can carry under `max_message_len`.
pub fn max_frame_len(max_message_len: usize) -> usize {
    max_message_len.min(u16::MAX as usize)
}

/// Codec for relay frames of at most `max_message_len` bytes.
pub fn codec(max_message_len: usize) -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_length(LENGTH_FIELD_LEN)
        .little_endian()
        .max_frame_length(max_frame_len(max_message_len))
        .new_codec()
}

/// A framed relay connection.
pub type FramedConnection = Framed<TcpStream, LengthDelimitedCodec>;

pub fn framed(stream: TcpStream, max_message_len: usize) -> FramedConnection {
    Framed::new(stream, codec(max_message_len))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::{Bytes, BytesMut};
    use tokio_util::codec::{Decoder, Encoder};

    #[test]
    fn test_prefix_is_little_endian() {
        let mut codec = codec(8192);
        let mut out = BytesMut::new();
        codec.encode(Bytes::from_static(b"<x/>"), &mut out).unwrap();
        assert_eq!(&out[..], b"\x04\x00<x/>");
    }

    #[test]
    fn test_decode_waits_for_whole_frame() {
        let mut codec = codec(8192);
        let mut buf = BytesMut::from(&b"\x05\x00hel"[..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(b"lo\x01\x00!");
        assert_eq!(&codec.decode(&mut buf).unwrap().unwrap()[..], b"hello");
        assert_eq!(&codec.decode(&mut buf).unwrap().unwrap()[..], b"!");
    }

    #[test]
    fn test_oversized_frame_is_rejected() {
        let mut codec = codec(16);
        let mut buf = BytesMut::from(&b"\x11\x00"[..]);
        buf.extend_from_slice(&[b'a'; 17]);
        assert!(codec.decode(&mut buf).is_err());

        let mut out = BytesMut::new();
        assert!(codec
            .encode(Bytes::from(vec![b'a'; 17]), &mut out)
            .is_err());
    }
}
