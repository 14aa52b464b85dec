//! Wire framing shared by both endpoint roles.
//!
//! Every frame carries one string:
//!
//! ```text
//! [u16 BE: len][modified UTF-8 bytes of len]
//! ```
//!
//! Modified UTF-8 is the `DataOutput.writeUTF` encoding: U+0000 is written as
//! the two bytes `C0 80`, and characters outside the Basic Multilingual Plane
//! are written as a UTF-16 surrogate pair with each half encoded on three
//! bytes. An empty string is a keepalive frame.

use crate::config::SocketConfig;
use crate::error::{Result, SocketError};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Encode text as modified UTF-8.
pub fn encode_modified_utf8(text: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(text.len());
    for unit in text.encode_utf16() {
        match unit {
            0x0001..=0x007F => out.push(unit as u8),
            0x0000 | 0x0080..=0x07FF => {
                out.push(0xC0 | ((unit >> 6) & 0x1F) as u8);
                out.push(0x80 | (unit & 0x3F) as u8);
            }
            _ => {
                out.push(0xE0 | ((unit >> 12) & 0x0F) as u8);
                out.push(0x80 | ((unit >> 6) & 0x3F) as u8);
                out.push(0x80 | (unit & 0x3F) as u8);
            }
        }
    }
    out
}

/// Decode modified UTF-8 into a string.
///
/// Rejects truncated sequences, bad continuation bytes, and unpaired surrogates.
pub fn decode_modified_utf8(bytes: &[u8]) -> Result<String> {
    let mut units = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        let lead = bytes[i];
        match lead >> 4 {
            0x0..=0x7 => {
                units.push(lead as u16);
                i += 1;
            }
            0xC | 0xD => {
                let second = continuation(bytes, i, 1)?;
                units.push((((lead & 0x1F) as u16) << 6) | (second & 0x3F) as u16);
                i += 2;
            }
            0xE => {
                let second = continuation(bytes, i, 1)?;
                let third = continuation(bytes, i, 2)?;
                units.push(
                    (((lead & 0x0F) as u16) << 12)
                        | (((second & 0x3F) as u16) << 6)
                        | (third & 0x3F) as u16,
                );
                i += 3;
            }
            _ => {
                return Err(SocketError::InvalidUtf8 {
                    message: format!("unexpected byte 0x{:02X} at offset {}", lead, i),
                });
            }
        }
    }

    String::from_utf16(&units).map_err(|e| SocketError::InvalidUtf8 {
        message: e.to_string(),
    })
}

fn continuation(bytes: &[u8], start: usize, offset: usize) -> Result<u8> {
    match bytes.get(start + offset) {
        Some(byte) if byte & 0xC0 == 0x80 => Ok(*byte),
        Some(byte) => Err(SocketError::InvalidUtf8 {
            message: format!(
                "bad continuation byte 0x{:02X} at offset {}",
                byte,
                start + offset
            ),
        }),
        None => Err(SocketError::InvalidUtf8 {
            message: format!("truncated sequence at offset {}", start),
        }),
    }
}

/// Build a complete frame (length prefix and payload) for `text`.
pub fn encode_frame(text: &str) -> Result<Vec<u8>> {
    let payload = encode_modified_utf8(text);
    if payload.len() > SocketConfig::MAX_FRAME_LEN {
        return Err(SocketError::FrameTooLarge {
            len: payload.len(),
            max: SocketConfig::MAX_FRAME_LEN,
        });
    }

    let mut frame = Vec::with_capacity(2 + payload.len());
    frame.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Read one frame and decode its text.
///
/// Returns `None` on clean EOF at a frame boundary (peer closed the
/// connection). An empty string is a keepalive; callers decide what to do with it.
pub async fn read_frame<R: AsyncReadExt + Unpin>(reader: &mut R) -> Result<Option<String>> {
    let mut len_buf = [0u8; 2];
    // EOF is an orderly close only on a frame boundary.
    if reader.read(&mut len_buf[..1]).await? == 0 {
        return Ok(None);
    }
    reader.read_exact(&mut len_buf[1..]).await?;

    let len = u16::from_be_bytes(len_buf) as usize;
    if len == 0 {
        return Ok(Some(String::new()));
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;

    decode_modified_utf8(&payload).map(Some)
}

/// Write an already encoded frame and flush it.
pub async fn write_frame<W: AsyncWriteExt + Unpin>(writer: &mut W, frame: &[u8]) -> Result<()> {
    writer.write_all(frame).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ascii_is_single_byte() {
        assert_eq!(encode_modified_utf8("{\"a\":1}"), b"{\"a\":1}".to_vec());
    }

    #[test]
    fn test_nul_uses_two_bytes() {
        assert_eq!(encode_modified_utf8("a\0b"), vec![b'a', 0xC0, 0x80, b'b']);
    }

    #[test]
    fn test_supplementary_uses_surrogate_pair() {
        // U+1F600 -> surrogates D83D DE00, each on three bytes.
        let encoded = encode_modified_utf8("\u{1F600}");
        assert_eq!(encoded, vec![0xED, 0xA0, 0xBD, 0xED, 0xB8, 0x80]);
        assert_eq!(decode_modified_utf8(&encoded).unwrap(), "\u{1F600}");
    }

    #[test]
    fn test_bmp_characters_match_utf8() {
        let text = "é€ü";
        assert_eq!(encode_modified_utf8(text), text.as_bytes().to_vec());
        assert_eq!(decode_modified_utf8(text.as_bytes()).unwrap(), text);
    }

    #[test]
    fn test_decode_rejects_truncated_sequence() {
        let err = decode_modified_utf8(&[b'x', 0xE2, 0x82]).unwrap_err();
        assert!(matches!(err, SocketError::InvalidUtf8 { .. }));
    }

    #[test]
    fn test_decode_rejects_invalid_lead_byte() {
        assert!(decode_modified_utf8(&[0xFF]).is_err());
        assert!(decode_modified_utf8(&[0x80]).is_err());
    }

    #[test]
    fn test_decode_rejects_unpaired_surrogate() {
        assert!(decode_modified_utf8(&[0xED, 0xA0, 0xBD]).is_err());
    }

    #[test]
    fn test_encode_frame_prefix() {
        let frame = encode_frame("hi").unwrap();
        assert_eq!(frame, vec![0x00, 0x02, b'h', b'i']);
        assert_eq!(encode_frame("").unwrap(), vec![0x00, 0x00]);
    }

    #[test]
    fn test_encode_frame_rejects_oversized_payload() {
        let text = "x".repeat(SocketConfig::MAX_FRAME_LEN + 1);
        let err = encode_frame(&text).unwrap_err();
        assert!(matches!(
            err,
            SocketError::FrameTooLarge { len, max } if len == max + 1
        ));

        // Exactly at the limit is fine.
        let text = "x".repeat(SocketConfig::MAX_FRAME_LEN);
        assert_eq!(encode_frame(&text).unwrap().len(), SocketConfig::MAX_FRAME_LEN + 2);
    }

    #[tokio::test]
    async fn test_frame_read_write_roundtrip() {
        let text = r#"{"type":"ping","note":"naïve \u0000 😀"}"#;
        let mut buf = Vec::new();
        write_frame(&mut buf, &encode_frame(text).unwrap()).await.unwrap();

        let mut cursor = std::io::Cursor::new(buf);
        let read_back = read_frame(&mut cursor).await.unwrap();
        assert_eq!(read_back.as_deref(), Some(text));
    }

    #[tokio::test]
    async fn test_messages_survive_codec_and_framing() {
        use crate::codec::{Codec, JsonCodec};
        use serde_json::json;

        // Encodes to exactly MAX_FRAME_LEN bytes once the quotes are added.
        let largest = json!("x".repeat(SocketConfig::MAX_FRAME_LEN - 2));
        let messages = vec![
            json!({}),
            json!([]),
            json!(null),
            json!(true),
            json!(0),
            json!(-17),
            json!(u64::MAX),
            json!(3.25),
            json!(""),
            json!({"type": "ping", "seq": 1}),
            json!({"outer": {"inner": [1, [2, [3, {"deep": null}]]], "flag": false}}),
            json!(["mixed", 1, 2.5, null, {"k": "v"}, []]),
            json!({"nul": "a\u{0000}b", "raw": "\0"}),
            json!({"emoji": "😀🎉", "math": "𝔸𝔹", "cjk": "漢字", "accents": "naïve café"}),
            json!({"escapes": "quote \" backslash \\ newline \n tab \t"}),
            largest,
        ];

        let mut buf = Vec::new();
        for message in &messages {
            let text = JsonCodec.encode(message).unwrap();
            write_frame(&mut buf, &encode_frame(&text).unwrap())
                .await
                .unwrap();
        }

        let mut cursor = std::io::Cursor::new(buf);
        for message in &messages {
            let text = read_frame(&mut cursor).await.unwrap().unwrap();
            assert_eq!(&JsonCodec.decode(&text).unwrap(), message);
        }
        assert!(read_frame(&mut cursor).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_frames_read_in_sequence() {
        let mut buf = Vec::new();
        for text in ["first", "", "second"] {
            buf.extend_from_slice(&encode_frame(text).unwrap());
        }

        let mut cursor = std::io::Cursor::new(buf);
        assert_eq!(read_frame(&mut cursor).await.unwrap().as_deref(), Some("first"));
        assert_eq!(read_frame(&mut cursor).await.unwrap().as_deref(), Some(""));
        assert_eq!(read_frame(&mut cursor).await.unwrap().as_deref(), Some("second"));
        assert!(read_frame(&mut cursor).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_frame_read_empty_stream_returns_none() {
        let mut cursor = std::io::Cursor::new(Vec::<u8>::new());
        assert!(read_frame(&mut cursor).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_frame_read_truncated_length_prefix_is_error() {
        let mut cursor = std::io::Cursor::new(vec![0x00]);
        let err = read_frame(&mut cursor).await.unwrap_err();
        assert!(matches!(
            &err,
            SocketError::Io { source: Some(e), .. } if e.kind() == std::io::ErrorKind::UnexpectedEof
        ));
    }

    #[tokio::test]
    async fn test_frame_read_truncated_payload_is_error() {
        let mut cursor = std::io::Cursor::new(vec![0x00, 0x05, b'a', b'b']);
        let err = read_frame(&mut cursor).await.unwrap_err();
        assert!(err.is_disconnect());
    }
}
