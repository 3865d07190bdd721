//! # Typed Reply Decoding
//!
//! `FromReply` turns a raw `Reply` into a caller type. Error replies always
//! decode to `ClientError::Server`, so every decoder starts from a reply the
//! server considered successful.

use bytes::Bytes;
use wirekv_common::Reply;

use crate::error::{ClientError, ClientResult};

/// Decodes a reply into `Self`.
pub trait FromReply: Sized {
    fn from_reply(reply: Reply) -> ClientResult<Self>;
}

/// Converts `-ERR` replies into `ClientError::Server`.
pub fn check_error(reply: Reply) -> ClientResult<Reply> {
    match reply {
        Reply::Error(message) => Err(ClientError::Server(message)),
        other => Ok(other),
    }
}

impl FromReply for Reply {
    fn from_reply(reply: Reply) -> ClientResult<Self> {
        check_error(reply)
    }
}

impl FromReply for () {
    fn from_reply(reply: Reply) -> ClientResult<Self> {
        check_error(reply).map(|_| ())
    }
}

impl FromReply for i64 {
    fn from_reply(reply: Reply) -> ClientResult<Self> {
        match check_error(reply)? {
            Reply::Integer(value) => Ok(value),
            Reply::Bulk(Some(data)) => parse_text(&data, "integer"),
            other => Err(ClientError::unexpected("integer", &other)),
        }
    }
}

impl FromReply for u64 {
    fn from_reply(reply: Reply) -> ClientResult<Self> {
        match check_error(reply)? {
            Reply::Integer(value) => u64::try_from(value).map_err(|_| ClientError::UnexpectedReply {
                expected: "unsigned integer",
                actual: value.to_string(),
            }),
            Reply::Bulk(Some(data)) => parse_text(&data, "unsigned integer"),
            other => Err(ClientError::unexpected("unsigned integer", &other)),
        }
    }
}

impl FromReply for f64 {
    fn from_reply(reply: Reply) -> ClientResult<Self> {
        match check_error(reply)? {
            Reply::Integer(value) => Ok(value as f64),
            Reply::Bulk(Some(data)) => parse_text(&data, "float"),
            other => Err(ClientError::unexpected("float", &other)),
        }
    }
}

impl FromReply for bool {
    fn from_reply(reply: Reply) -> ClientResult<Self> {
        match check_error(reply)? {
            Reply::Integer(value) => Ok(value != 0),
            Reply::Status(_) => Ok(true),
            Reply::Bulk(None) | Reply::Array(None) => Ok(false),
            other => Err(ClientError::unexpected("boolean", &other)),
        }
    }
}

impl FromReply for Bytes {
    fn from_reply(reply: Reply) -> ClientResult<Self> {
        match check_error(reply)? {
            Reply::Bulk(Some(data)) => Ok(data),
            Reply::Status(text) => Ok(Bytes::from(text)),
            Reply::Integer(value) => Ok(Bytes::from(value.to_string())),
            other => Err(ClientError::unexpected("bulk", &other)),
        }
    }
}

impl FromReply for Vec<u8> {
    fn from_reply(reply: Reply) -> ClientResult<Self> {
        Bytes::from_reply(reply).map(|data| data.to_vec())
    }
}

impl FromReply for String {
    fn from_reply(reply: Reply) -> ClientResult<Self> {
        let data = Bytes::from_reply(reply)?;
        String::from_utf8(data.to_vec()).map_err(|_| ClientError::UnexpectedReply {
            expected: "utf-8 text",
            actual: "binary bulk".to_string(),
        })
    }
}

impl<T: FromReply> FromReply for Option<T> {
    fn from_reply(reply: Reply) -> ClientResult<Self> {
        match check_error(reply)? {
            Reply::Bulk(None) | Reply::Array(None) => Ok(None),
            other => T::from_reply(other).map(Some),
        }
    }
}

impl<T: FromReply> FromReply for Vec<T> {
    fn from_reply(reply: Reply) -> ClientResult<Self> {
        match check_error(reply)? {
            Reply::Array(Some(items)) => items.into_iter().map(T::from_reply).collect(),
            Reply::Array(None) => Ok(Vec::new()),
            other => Err(ClientError::unexpected("array", &other)),
        }
    }
}

fn parse_text<T: std::str::FromStr>(data: &[u8], expected: &'static str) -> ClientResult<T> {
    std::str::from_utf8(data)
        .ok()
        .and_then(|text| text.parse().ok())
        .ok_or_else(|| ClientError::UnexpectedReply {
            expected,
            actual: String::from_utf8_lossy(data).into_owned(),
        })
}
