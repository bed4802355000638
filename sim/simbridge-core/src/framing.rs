//! Network-side framing shared by the transports.
//!
//! - Raw Ethernet (TAP) and UDP: one read or write call per frame, no added
//!   framing. Ethernet frames are padded to the 60 byte minimum.
//! - Framed TCP: every message carries a 4 byte big-endian length prefix.

use crate::error::LinkError;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Largest frame any transport moves in either direction.
pub const MAX_FRAME_LEN: usize = 2000;

/// Minimum Ethernet frame length, not counting the FCS.
pub const ETH_MIN_FRAME_LEN: usize = 60;

pub const LENGTH_PREFIX_LEN: usize = 4;

/// Zero-pads `frame` up to the Ethernet minimum frame size.
pub fn pad_to_minimum(frame: &mut Vec<u8>) {
    if frame.len() < ETH_MIN_FRAME_LEN {
        frame.resize(ETH_MIN_FRAME_LEN, 0);
    }
}

/// Serializes `payload` as one length-prefixed message.
///
/// # Panics
///
/// A byte stream cannot represent a zero-length message, so an empty payload
/// is a contract violation.
pub fn encode_length_prefixed(payload: &[u8]) -> Vec<u8> {
    assert!(
        !payload.is_empty(),
        "streams can't represent a zero-length frame"
    );
    let len = payload.len() as u32;
    let mut wire = Vec::with_capacity(LENGTH_PREFIX_LEN + payload.len());
    wire.extend_from_slice(&len.to_be_bytes());
    wire.extend_from_slice(payload);
    wire
}

/// Reads exactly one length-prefixed message.
///
/// Both the prefix and the payload must arrive in full; a stream that ends
/// part way through either is a lost link.
pub async fn read_length_prefixed<R>(reader: &mut R) -> Result<Vec<u8>, LinkError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; LENGTH_PREFIX_LEN];
    reader
        .read_exact(&mut header)
        .await
        .map_err(short_read("frame length field"))?;
    let len = u32::from_be_bytes(header) as usize;
    if len == 0 {
        Err(LinkError::EmptyFrame)?
    }
    if len > MAX_FRAME_LEN {
        Err(LinkError::Oversized {
            len,
            max: MAX_FRAME_LEN,
        })?
    }
    let mut payload = vec![0u8; len];
    reader
        .read_exact(&mut payload)
        .await
        .map_err(short_read("frame body"))?;
    Ok(payload)
}

fn short_read(part: &'static str) -> impl FnOnce(io::Error) -> LinkError {
    move |e| match e.kind() {
        io::ErrorKind::UnexpectedEof => LinkError::ShortRead(part),
        _ => LinkError::Io(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_is_big_endian_length() {
        let payload: Vec<u8> = (0..=255u8).cycle().take(300).collect();
        let wire = encode_length_prefixed(&payload);
        assert_eq!(wire.len(), 4 + 300);
        assert_eq!(&wire[..4], &[0, 0, 0x01, 0x2c]);
        assert_eq!(&wire[4..], payload.as_slice());
    }

    #[test]
    #[should_panic(expected = "zero-length")]
    fn empty_payload_is_a_contract_violation() {
        encode_length_prefixed(&[]);
    }

    #[test]
    fn short_frames_are_padded() {
        let mut frame = vec![0xff; 42];
        pad_to_minimum(&mut frame);
        assert_eq!(frame.len(), ETH_MIN_FRAME_LEN);
        assert!(frame[42..].iter().all(|&b| b == 0));
        let mut long = vec![1; 100];
        pad_to_minimum(&mut long);
        assert_eq!(long.len(), 100);
    }

    #[tokio::test]
    async fn reads_back_consecutive_messages() {
        let mut wire = encode_length_prefixed(b"first");
        wire.extend(encode_length_prefixed(&[7; 1500]));
        let mut reader = wire.as_slice();
        assert_eq!(read_length_prefixed(&mut reader).await.unwrap(), b"first");
        assert_eq!(read_length_prefixed(&mut reader).await.unwrap(), vec![7; 1500]);
    }

    #[tokio::test]
    async fn truncated_messages_are_short_reads() {
        let mut reader: &[u8] = &[0, 0];
        assert!(matches!(
            read_length_prefixed(&mut reader).await,
            Err(LinkError::ShortRead("frame length field"))
        ));
        let wire = encode_length_prefixed(b"truncated");
        let mut reader = &wire[..wire.len() - 1];
        assert!(matches!(
            read_length_prefixed(&mut reader).await,
            Err(LinkError::ShortRead("frame body"))
        ));
    }

    #[tokio::test]
    async fn bad_lengths_are_rejected() {
        let mut reader: &[u8] = &[0, 0, 0, 0];
        assert!(matches!(
            read_length_prefixed(&mut reader).await,
            Err(LinkError::EmptyFrame)
        ));
        let mut reader: &[u8] = &[0, 0, 0x10, 0];
        assert!(matches!(
            read_length_prefixed(&mut reader).await,
            Err(LinkError::Oversized { len: 4096, .. })
        ));
    }
}
