//! meshhub wire format.
//!
//! A freshly opened TCP connection starts with a single opcode byte followed
//! by a handshake body made of length-prefixed UTF-8 strings (u16 big-endian
//! byte count, then the bytes). Once a hub or client connection has been
//! accepted, traffic is a sequence of frames: a 5-byte `FrameHeader`
//! followed by a JSON payload.

use bytes::{BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;
use static_assertions::assert_eq_size;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use zerocopy::byteorder::{NetworkEndian, U32};
use zerocopy::{AsBytes, FromBytes, FromZeroes};

// ── Opcodes ───────────────────────────────────────────────────────────────────

/// Every byte value that may lead a connection or a frame.
///
/// Values 1..=8 open a connection or answer a handshake. `Disconnect` doubles
/// as a frame kind on established connections; 9..=11 are frame kinds only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    HubConnect = 1,
    ServicelinkConnect = 2,
    ConnectionAccepted = 3,
    ConnectionRefused = 4,
    Disconnect = 5,
    Ping = 7,
    GetSpliceInfo = 8,
    Gossip = 9,
    ServiceAdd = 10,
    ServiceRemove = 11,
}

impl TryFrom<u8> for Opcode {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Opcode::HubConnect),
            2 => Ok(Opcode::ServicelinkConnect),
            3 => Ok(Opcode::ConnectionAccepted),
            4 => Ok(Opcode::ConnectionRefused),
            5 => Ok(Opcode::Disconnect),
            7 => Ok(Opcode::Ping),
            8 => Ok(Opcode::GetSpliceInfo),
            9 => Ok(Opcode::Gossip),
            10 => Ok(Opcode::ServiceAdd),
            11 => Ok(Opcode::ServiceRemove),
            other => Err(WireError::UnknownOpcode(other)),
        }
    }
}

impl From<Opcode> for u8 {
    fn from(op: Opcode) -> u8 {
        op as u8
    }
}

// ── Frame Header ──────────────────────────────────────────────────────────────

/// Precedes every message on an established connection.
///
/// Wire size: 5 bytes.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct FrameHeader {
    /// One of the frame-kind opcodes.
    pub opcode: u8,
    /// Payload length in bytes, not including this header.
    pub length: U32<NetworkEndian>,
}

assert_eq_size!(FrameHeader, [u8; 5]);

pub const FRAME_HEADER_SIZE: usize = std::mem::size_of::<FrameHeader>();

/// Maximum frame payload. Gossip carries whole client maps, so this is
/// generous, but a peer cannot make us allocate without bound.
pub const MAX_FRAME_PAYLOAD: usize = 1 << 20;

/// Maximum handshake string length (u16 prefix).
pub const MAX_STRING_LEN: usize = u16::MAX as usize;

/// A decoded frame: kind plus raw JSON payload.
#[derive(Debug, Clone)]
pub struct Frame {
    pub opcode: Opcode,
    pub payload: Bytes,
}

impl Frame {
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, WireError> {
        Ok(serde_json::from_slice(&self.payload)?)
    }
}

// ── Handshake primitives ──────────────────────────────────────────────────────

pub async fn read_opcode<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Opcode, WireError> {
    let byte = reader.read_u8().await?;
    Opcode::try_from(byte)
}

pub async fn write_opcode<W: AsyncWrite + Unpin>(
    writer: &mut W,
    opcode: Opcode,
) -> Result<(), WireError> {
    writer.write_u8(opcode.into()).await?;
    writer.flush().await?;
    Ok(())
}

pub async fn read_string<R: AsyncRead + Unpin>(reader: &mut R) -> Result<String, WireError> {
    let len = reader.read_u16().await? as usize;
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    String::from_utf8(buf).map_err(|_| WireError::InvalidUtf8)
}

pub async fn write_string<W: AsyncWrite + Unpin>(
    writer: &mut W,
    value: &str,
) -> Result<(), WireError> {
    writer.write_all(&encode_string(value)?).await?;
    Ok(())
}

/// Opcode and string arguments in one write, so a handshake leaves in a
/// single segment.
pub async fn write_handshake<W: AsyncWrite + Unpin>(
    writer: &mut W,
    opcode: Opcode,
    args: &[&str],
) -> Result<(), WireError> {
    let mut buf = BytesMut::with_capacity(1 + args.iter().map(|a| 2 + a.len()).sum::<usize>());
    buf.put_u8(opcode.into());
    for arg in args {
        buf.extend_from_slice(&encode_string(arg)?);
    }
    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(())
}

fn encode_string(value: &str) -> Result<Bytes, WireError> {
    let bytes = value.as_bytes();
    if bytes.len() > MAX_STRING_LEN {
        return Err(WireError::StringTooLong(bytes.len()));
    }
    let mut buf = BytesMut::with_capacity(2 + bytes.len());
    buf.put_u16(bytes.len() as u16);
    buf.extend_from_slice(bytes);
    Ok(buf.freeze())
}

// ── Frames ────────────────────────────────────────────────────────────────────

/// Serialize a frame. `payload` of `None` produces an empty body.
pub fn encode_frame<T: Serialize>(opcode: Opcode, payload: Option<&T>) -> Result<Bytes, WireError> {
    let body = match payload {
        Some(p) => serde_json::to_vec(p)?,
        None => Vec::new(),
    };
    if body.len() > MAX_FRAME_PAYLOAD {
        return Err(WireError::PayloadTooLarge(body.len()));
    }
    let header = FrameHeader {
        opcode: opcode.into(),
        length: U32::new(body.len() as u32),
    };
    let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + body.len());
    buf.extend_from_slice(header.as_bytes());
    buf.extend_from_slice(&body);
    Ok(buf.freeze())
}

pub async fn write_frame<W, T>(
    writer: &mut W,
    opcode: Opcode,
    payload: Option<&T>,
) -> Result<(), WireError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let bytes = encode_frame(opcode, payload)?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Frame, WireError> {
    let mut raw = [0u8; FRAME_HEADER_SIZE];
    reader.read_exact(&mut raw).await?;
    let header = FrameHeader::read_from(&raw[..]).ok_or(WireError::Truncated)?;

    // Copy packed fields out before use.
    let opcode = header.opcode;
    let length = header.length;
    let length = length.get() as usize;

    if length > MAX_FRAME_PAYLOAD {
        return Err(WireError::PayloadTooLarge(length));
    }
    let opcode = Opcode::try_from(opcode)?;

    let mut payload = vec![0u8; length];
    reader.read_exact(&mut payload).await?;
    Ok(Frame {
        opcode,
        payload: Bytes::from(payload),
    })
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors that can arise when reading or writing wire-format data.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("unknown opcode: 0x{0:02x}")]
    UnknownOpcode(u8),

    #[error("string of {0} bytes exceeds the u16 length prefix")]
    StringTooLong(usize),

    #[error("handshake string is not valid UTF-8")]
    InvalidUtf8,

    #[error("payload length {0} exceeds maximum {}", MAX_FRAME_PAYLOAD)]
    PayloadTooLarge(usize),

    #[error("truncated frame header")]
    Truncated,

    #[error("malformed payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),
}

impl WireError {
    /// True when the peer closed the stream cleanly between messages.
    pub fn is_eof(&self) -> bool {
        matches!(self, WireError::Io(e) if e.kind() == std::io::ErrorKind::UnexpectedEof)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::ServiceAdd;

    #[test]
    fn opcode_values_match_protocol() {
        assert_eq!(u8::from(Opcode::HubConnect), 1);
        assert_eq!(u8::from(Opcode::ServicelinkConnect), 2);
        assert_eq!(u8::from(Opcode::ConnectionAccepted), 3);
        assert_eq!(u8::from(Opcode::ConnectionRefused), 4);
        assert_eq!(u8::from(Opcode::Disconnect), 5);
        assert_eq!(u8::from(Opcode::Ping), 7);
        assert_eq!(u8::from(Opcode::GetSpliceInfo), 8);
    }

    #[test]
    fn unknown_opcodes_are_rejected() {
        assert!(Opcode::try_from(0).is_err());
        assert!(Opcode::try_from(6).is_err());
        let err = Opcode::try_from(0xAB).unwrap_err();
        assert!(err.to_string().contains("0xab"));
    }

    #[test]
    fn frame_header_layout() {
        let bytes = encode_frame::<()>(Opcode::Disconnect, None).unwrap();
        assert_eq!(bytes.len(), FRAME_HEADER_SIZE);
        assert_eq!(&bytes[..], &[5, 0, 0, 0, 0]);
    }

    #[test]
    fn frame_length_is_big_endian() {
        let add = ServiceAdd {
            tag: "t".into(),
            info: "i".into(),
        };
        let bytes = encode_frame(Opcode::ServiceAdd, Some(&add)).unwrap();
        let body_len = bytes.len() - FRAME_HEADER_SIZE;
        assert_eq!(bytes[0], 10);
        assert_eq!(&bytes[1..5], &(body_len as u32).to_be_bytes());
    }

    #[tokio::test]
    async fn handshake_strings_use_u16_prefix() {
        let mut buf = Vec::new();
        write_handshake(&mut buf, Opcode::HubConnect, &["10.0.0.1:9000"])
            .await
            .unwrap();
        assert_eq!(buf[0], 1);
        assert_eq!(&buf[1..3], &[0, 13]);

        let mut reader = &buf[..];
        assert_eq!(read_opcode(&mut reader).await.unwrap(), Opcode::HubConnect);
        assert_eq!(read_string(&mut reader).await.unwrap(), "10.0.0.1:9000");
    }

    #[tokio::test]
    async fn frames_read_back() {
        let add = ServiceAdd {
            tag: "nameserver".into(),
            info: "ns:1".into(),
        };
        let mut buf = Vec::new();
        write_frame(&mut buf, Opcode::ServiceAdd, Some(&add)).await.unwrap();
        write_frame::<_, ()>(&mut buf, Opcode::Disconnect, None).await.unwrap();

        let mut reader = &buf[..];
        let first = read_frame(&mut reader).await.unwrap();
        assert_eq!(first.opcode, Opcode::ServiceAdd);
        let decoded: ServiceAdd = first.decode().unwrap();
        assert_eq!(decoded.tag, "nameserver");

        let second = read_frame(&mut reader).await.unwrap();
        assert_eq!(second.opcode, Opcode::Disconnect);
        assert!(second.payload.is_empty());

        let eof = read_frame(&mut reader).await.unwrap_err();
        assert!(eof.is_eof());
    }

    #[tokio::test]
    async fn oversized_frames_are_refused() {
        let mut raw = vec![9u8];
        raw.extend_from_slice(&((MAX_FRAME_PAYLOAD as u32) + 1).to_be_bytes());
        let mut reader = &raw[..];
        assert!(matches!(
            read_frame(&mut reader).await,
            Err(WireError::PayloadTooLarge(_))
        ));
    }

    #[tokio::test]
    async fn invalid_utf8_is_rejected() {
        let raw = [0u8, 2, 0xff, 0xfe];
        let mut reader = &raw[..];
        assert!(matches!(
            read_string(&mut reader).await,
            Err(WireError::InvalidUtf8)
        ));
    }
}
