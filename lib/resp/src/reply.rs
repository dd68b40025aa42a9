use std::io;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

/// Redis refuses bulk strings larger than 512MiB, so will we.
const MAX_BULK_LENGTH: usize = 512 * 1024 * 1024;

/// Upper bound of the buffer reserved before any payload arrives.
const INITIAL_BULK_CAPACITY: usize = 64 * 1024;

/// A single decoded reply.
///
/// Only the subset of RESP2 needed for introspection is modeled, arrays
/// are not supported except for the `*-1` null form.
#[derive(Clone, Debug, PartialEq)]
pub enum Reply {
    Null,
    Simple(String),
    Error(String),
    Bulk(String),
}

#[derive(Debug, PartialEq, thiserror::Error)]
pub enum ProtocolError {
    #[error("unknown redis message type {0:?}")]
    UnknownType(char),

    #[error("invalid bulk length {0:?}")]
    InvalidLength(String),

    #[error("bulk string is not terminated by CRLF")]
    MissingTerminator,

    #[error("reply is not valid utf8")]
    InvalidUtf8,
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Read exactly one reply from `reader`.
///
/// The first line is read up to and including CRLF, its first byte selects
/// the reply type. For bulk strings the declared number of bytes plus the
/// trailing CRLF are consumed, nothing more.
pub async fn read_reply<R>(reader: &mut R) -> Result<Reply, DecodeError>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::with_capacity(64);
    let size = reader.read_until(b'\n', &mut buf).await?;
    if size == 0 || !buf.ends_with(b"\r\n") {
        return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
    }
    buf.truncate(buf.len() - 2);

    let line = String::from_utf8(buf).map_err(|_err| ProtocolError::InvalidUtf8)?;
    if line == "$-1" || line == "*-1" {
        return Ok(Reply::Null);
    }

    let mut chars = line.chars();
    let Some(typ) = chars.next() else {
        return Err(ProtocolError::UnknownType('\0').into());
    };
    let rest = chars.as_str();

    match typ {
        '+' => Ok(Reply::Simple(rest.to_string())),
        '-' => Ok(Reply::Error(rest.trim().to_string())),
        '$' => {
            let len = rest
                .parse::<usize>()
                .ok()
                .filter(|len| *len <= MAX_BULK_LENGTH)
                .ok_or_else(|| ProtocolError::InvalidLength(rest.to_string()))?;

            // the buffer grows with the bytes actually received, not with
            // what the server claims to send
            let total = len + 2;
            let mut data = Vec::with_capacity(total.min(INITIAL_BULK_CAPACITY));
            let size = (&mut *reader)
                .take(total as u64)
                .read_to_end(&mut data)
                .await?;
            if size < total {
                return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
            }
            if !data.ends_with(b"\r\n") {
                return Err(ProtocolError::MissingTerminator.into());
            }
            data.truncate(len);

            let text = String::from_utf8(data).map_err(|_err| ProtocolError::InvalidUtf8)?;

            Ok(Reply::Bulk(text.trim().to_string()))
        }
        other => Err(ProtocolError::UnknownType(other).into()),
    }
}
