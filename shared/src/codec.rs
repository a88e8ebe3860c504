//! Length-prefixed framing for every stream between client and server
//!
//! A frame is an 8 byte ASCII hex header holding the payload length followed
//! by exactly that many bytes of bincode payload. The control channel carries
//! a `Vec<RawMessage>` per frame so that empty and multi-message frames can be
//! told apart from ordinary decode failures.

use crate::protocol::{ErrorType, Message, ProtocolError, RawMessage};
use serde::{de::DeserializeOwned, Serialize};
use std::io;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const HEADER_LEN: usize = 8;

/// Upper bound on a single payload; anything larger is treated as a corrupt header
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("connection closed by peer")]
    ConnectionClosed,
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("malformed frame header {0:?}")]
    MalformedHeader(String),
    #[error("frame of {0} bytes exceeds the limit")]
    TooLarge(usize),
    #[error("cannot decode payload: {0}")]
    Decode(String),
    #[error("frame carries no message")]
    EmptyMessage,
    #[error("frame carries {0} messages")]
    MultipleMessages(usize),
    #[error("protocol violation: {0}")]
    Protocol(#[from] ProtocolError),
}

impl FrameError {
    /// Wire error category used when reporting this failure
    pub fn error_type(&self) -> ErrorType {
        match self {
            FrameError::ConnectionClosed | FrameError::Io(_) => ErrorType::ClosedConnection,
            FrameError::MalformedHeader(_) | FrameError::TooLarge(_) => ErrorType::WrongProtocol,
            FrameError::Decode(_) => ErrorType::UnknownError,
            FrameError::EmptyMessage => ErrorType::EmptyMessage,
            FrameError::MultipleMessages(_) => ErrorType::MultipleMessages,
            FrameError::Protocol(_) => ErrorType::WrongProtocol,
        }
    }

    /// Fatal errors end the connection; the stream is still aligned on a
    /// frame boundary after the others, so reading may continue.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            FrameError::Decode(_) | FrameError::EmptyMessage | FrameError::MultipleMessages(_)
        )
    }

    /// Whether the peer can still be told about the failure
    pub fn is_reportable(&self) -> bool {
        !matches!(self, FrameError::ConnectionClosed | FrameError::Io(_))
    }
}

/// Builds the header and payload of one frame
pub fn encode_frame(payload: &[u8]) -> Result<Vec<u8>, FrameError> {
    if payload.len() > MAX_FRAME_LEN {
        return Err(FrameError::TooLarge(payload.len()));
    }

    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
    frame.extend_from_slice(format!("{:>8x}", payload.len()).as_bytes());
    frame.extend_from_slice(payload);
    Ok(frame)
}

pub fn parse_header(header: &[u8; HEADER_LEN]) -> Result<usize, FrameError> {
    let malformed = || FrameError::MalformedHeader(String::from_utf8_lossy(header).into_owned());

    let text = std::str::from_utf8(header).map_err(|_| malformed())?.trim();
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(malformed());
    }

    let len = usize::from_str_radix(text, 16).map_err(|_| malformed())?;
    if len > MAX_FRAME_LEN {
        return Err(FrameError::TooLarge(len));
    }
    Ok(len)
}

fn map_read_error(e: io::Error) -> FrameError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        FrameError::ConnectionClosed
    } else {
        FrameError::Io(e)
    }
}

pub async fn read_frame<R>(reader: &mut R) -> Result<Vec<u8>, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_LEN];
    reader.read_exact(&mut header).await.map_err(map_read_error)?;

    let len = parse_header(&header)?;
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await.map_err(map_read_error)?;
    Ok(payload)
}

pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode_frame(payload)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one frame holding a single serialized value
pub async fn read_value<R, T>(reader: &mut R) -> Result<T, FrameError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let payload = read_frame(reader).await?;
    bincode::deserialize(&payload).map_err(|e| FrameError::Decode(e.to_string()))
}

pub async fn write_value<W, T>(writer: &mut W, value: &T) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let payload = bincode::serialize(value).map_err(|e| FrameError::Decode(e.to_string()))?;
    write_frame(writer, &payload).await
}

/// Decodes a control-channel payload into exactly one message
pub fn decode_message(payload: &[u8]) -> Result<Message, FrameError> {
    let mut messages: Vec<RawMessage> =
        bincode::deserialize(payload).map_err(|e| FrameError::Decode(e.to_string()))?;

    match messages.len() {
        0 => Err(FrameError::EmptyMessage),
        1 => {
            let raw = messages.remove(0);
            Ok(Message::try_from(raw)?)
        }
        n => Err(FrameError::MultipleMessages(n)),
    }
}

pub fn encode_message(message: &Message) -> Result<Vec<u8>, FrameError> {
    let batch = vec![RawMessage::from(message.clone())];
    bincode::serialize(&batch).map_err(|e| FrameError::Decode(e.to_string()))
}

pub async fn read_message<R>(reader: &mut R) -> Result<Message, FrameError>
where
    R: AsyncRead + Unpin,
{
    let payload = read_frame(reader).await?;
    decode_message(&payload)
}

pub async fn write_message<W>(writer: &mut W, message: &Message) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    let payload = encode_message(message)?;
    write_frame(writer, &payload).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Command, CtrlType, Kind, Status};

    fn raw_frame(batch: &[RawMessage]) -> Vec<u8> {
        encode_frame(&bincode::serialize(batch).unwrap()).unwrap()
    }

    #[test]
    fn test_header_format() {
        let frame = encode_frame(&[0u8; 26]).unwrap();
        assert_eq!(&frame[..HEADER_LEN], b"      1a");
        assert_eq!(frame.len(), HEADER_LEN + 26);
    }

    #[test]
    fn test_parse_header_variants() {
        assert_eq!(parse_header(b"      1a").unwrap(), 26);
        assert_eq!(parse_header(b"0000001A").unwrap(), 26);
        assert!(matches!(
            parse_header(b"   zz   "),
            Err(FrameError::MalformedHeader(_))
        ));
        assert!(matches!(
            parse_header(b"        "),
            Err(FrameError::MalformedHeader(_))
        ));
        assert!(matches!(
            parse_header(b"ffffffff"),
            Err(FrameError::TooLarge(_))
        ));
    }

    #[tokio::test]
    async fn test_read_message_from_scripted_stream() {
        let message = Message::ctrl(CtrlType::Syn, Status::Query);
        let frame = encode_frame(&encode_message(&message).unwrap()).unwrap();

        let mut reader = tokio_test::io::Builder::new()
            .read(&frame[..3])
            .read(&frame[3..])
            .build();

        assert_eq!(read_message(&mut reader).await.unwrap(), message);
    }

    #[tokio::test]
    async fn test_write_message_bytes() {
        let message = Message::ctrl(CtrlType::Fin, Status::Update);
        let frame = encode_frame(&encode_message(&message).unwrap()).unwrap();

        let mut writer = tokio_test::io::Builder::new().write(&frame).build();
        write_message(&mut writer, &message).await.unwrap();
    }

    #[tokio::test]
    async fn test_truncated_payload_is_connection_closed() {
        let mut reader = tokio_test::io::Builder::new()
            .read(b"      10")
            .read(b"short")
            .build();

        let err = read_frame(&mut reader).await.unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_malformed_header_is_fatal() {
        let mut reader = tokio_test::io::Builder::new().read(b"hello!!!").build();

        let err = read_message(&mut reader).await.unwrap_err();
        assert!(matches!(err, FrameError::MalformedHeader(_)));
        assert!(err.is_fatal());
        assert_eq!(err.error_type(), ErrorType::WrongProtocol);
    }

    #[tokio::test]
    async fn test_empty_and_multiple_frames_are_not_fatal() {
        let one = RawMessage::from(Message::ctrl(CtrlType::Syn, Status::Query));
        let mut bytes = raw_frame(&[]);
        bytes.extend(raw_frame(&[one.clone(), one.clone()]));
        bytes.extend(raw_frame(&[one]));

        let (mut client, mut server) = tokio::io::duplex(1024);
        client.write_all(&bytes).await.unwrap();

        let err = read_message(&mut server).await.unwrap_err();
        assert!(matches!(err, FrameError::EmptyMessage));
        assert!(!err.is_fatal());

        let err = read_message(&mut server).await.unwrap_err();
        assert!(matches!(err, FrameError::MultipleMessages(2)));
        assert_eq!(err.error_type(), ErrorType::MultipleMessages);

        // the stream stays aligned after recoverable errors
        let message = read_message(&mut server).await.unwrap();
        assert_eq!(message.kind(), Kind::Ctrl);
    }

    #[tokio::test]
    async fn test_out_of_range_subtype_is_protocol_error() {
        let raw = RawMessage {
            kind: Kind::Info.index(),
            subtype: 42,
            status: Status::Update.index(),
            data: vec![],
        };
        let mut reader = tokio_test::io::Builder::new()
            .read(&raw_frame(&[raw]))
            .build();

        let err = read_message(&mut reader).await.unwrap_err();
        assert!(matches!(err, FrameError::Protocol(_)));
        assert!(err.is_fatal());
        assert!(err.is_reportable());
    }

    #[tokio::test]
    async fn test_value_frames_over_duplex() {
        let (mut client, mut server) = tokio::io::duplex(256);

        write_value(&mut client, &Command::TakeOpen).await.unwrap();
        write_value(&mut client, &Command::Left).await.unwrap();

        let first: Command = read_value(&mut server).await.unwrap();
        let second: Command = read_value(&mut server).await.unwrap();
        assert_eq!(first, Command::TakeOpen);
        assert_eq!(second, Command::Left);
    }

    #[tokio::test]
    async fn test_garbage_payload_is_decode_error() {
        let mut reader = tokio_test::io::Builder::new()
            .read(&encode_frame(&[0xff; 3]).unwrap())
            .build();

        let err = read_message(&mut reader).await.unwrap_err();
        assert!(matches!(err, FrameError::Decode(_)));
        assert!(!err.is_fatal());
    }
}
