//! Reply frames for tag writes and method calls.
//!
//! Wire format:
//! ```text
//! [version:1][code:4][kind:1][body_len:4][body:N]
//! ```
//! `code` is a big-endian `i32`, `kind` is the [`ResponseKind`] byte and
//! `body` is a field map encoded against the body schema of `code`.

use std::borrow::Cow;

use super::codes::{self, REASON_FIELD};
use super::error::ProtocolError;
use super::fields::{decode_body, encode_body, Fields};
use super::responses::{ResponseKind, ResponseSpec, ResponseTable};
use crate::value::Value;

/// Version byte written at the start of every reply frame.
pub const REPLY_FORMAT_VERSION: u8 = 1;

const HEADER_SIZE: usize = 10;

/// One reply of a tag write or method call.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplyFrame {
    pub code: i32,
    pub kind: ResponseKind,
    pub body: Fields,
}

impl ReplyFrame {
    pub fn new(code: i32, kind: ResponseKind, body: Fields) -> Self {
        Self { code, kind, body }
    }

    /// Built-in `OK` reply without body.
    pub fn ok() -> Self {
        Self::new(codes::OK, ResponseKind::Ok, Fields::new())
    }

    /// Built-in `ERR` reply carrying `reason`.
    pub fn err(reason: impl Into<String>) -> Self {
        Self::with_reason(codes::ERR, reason)
    }

    /// Built-in `CALLBACK_ERR` reply carrying `reason`.
    pub fn callback_err(reason: impl Into<String>) -> Self {
        Self::with_reason(codes::CALLBACK_ERR, reason)
    }

    fn with_reason(code: i32, reason: impl Into<String>) -> Self {
        let body = Fields::from([(REASON_FIELD.to_string(), Value::String(reason.into()))]);
        Self::new(code, ResponseKind::Err, body)
    }

    pub fn is_terminal(&self) -> bool {
        self.kind.is_terminal()
    }

    pub fn is_ok(&self) -> bool {
        self.kind == ResponseKind::Ok
    }

    /// The diagnostic carried by `ERR`/`CALLBACK_ERR` replies.
    pub fn reason(&self) -> Option<&str> {
        match self.body.get(REASON_FIELD) {
            Some(Value::String(s)) => Some(s),
            _ => None,
        }
    }

    /// Encodes the frame; the body is checked against `spec`.
    pub fn encode(&self, spec: &ResponseSpec) -> Result<Vec<u8>, ProtocolError> {
        let body = encode_body(&self.body, &spec.body)?;
        let mut buf = Vec::with_capacity(HEADER_SIZE + body.len());
        buf.push(REPLY_FORMAT_VERSION);
        buf.extend_from_slice(&self.code.to_be_bytes());
        buf.push(self.kind.to_byte());
        buf.extend_from_slice(&(body.len() as u32).to_be_bytes());
        buf.extend_from_slice(&body);
        Ok(buf)
    }

    /// Decodes a frame, classifying its code with `table` (built-ins
    /// included).  Body schemas in `table` must be resolved.
    ///
    /// # Errors
    ///
    /// - [`ProtocolError::InvalidCode`] if the code is unknown.
    /// - [`ProtocolError::Malformed`] if the kind byte disagrees with the
    ///   table or the body length is wrong.
    pub fn decode(bytes: &[u8], table: &ResponseTable) -> Result<Self, ProtocolError> {
        if bytes.len() < HEADER_SIZE {
            return Err(ProtocolError::InsufficientData {
                needed: HEADER_SIZE,
                available: bytes.len(),
            });
        }
        if bytes[0] != REPLY_FORMAT_VERSION {
            return Err(ProtocolError::UnsupportedVersion(bytes[0]));
        }
        let code = i32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]);
        let kind = ResponseKind::from_byte(bytes[5])
            .ok_or_else(|| ProtocolError::Malformed(format!("unknown reply kind 0x{:02X}", bytes[5])))?;
        let body_len = u32::from_be_bytes([bytes[6], bytes[7], bytes[8], bytes[9]]) as usize;
        let body = &bytes[HEADER_SIZE..];
        if body.len() != body_len {
            return Err(ProtocolError::Malformed(format!(
                "body length mismatch: header says {body_len}, frame carries {}",
                body.len()
            )));
        }

        let spec: Cow<'_, ResponseSpec> = table.lookup_with_builtins(code).ok_or(ProtocolError::InvalidCode(code))?;
        if spec.kind != kind {
            return Err(ProtocolError::Malformed(format!(
                "code {code} is {:?}, frame says {kind:?}",
                spec.kind
            )));
        }
        Ok(Self {
            code,
            kind,
            body: decode_body(body, &spec.body)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::DataType;

    fn table() -> ResponseTable {
        ResponseTable::new()
            .with(ResponseSpec::info(202).with_field("progress", DataType::FLOAT))
            .with(ResponseSpec::ok(200))
    }

    #[test]
    fn test_info_frame_round_trips() {
        // Arrange
        let table = table();
        let frame = ReplyFrame::new(
            202,
            ResponseKind::Info,
            Fields::from([("progress".to_string(), Value::Float(0.25))]),
        );

        // Act
        let bytes = frame.encode(table.lookup(202).unwrap()).unwrap();
        let decoded = ReplyFrame::decode(&bytes, &table).unwrap();

        // Assert
        assert_eq!(decoded, frame);
        assert!(!decoded.is_terminal());
    }

    #[test]
    fn test_builtin_callback_err_carries_reason() {
        let frame = ReplyFrame::callback_err("boom");
        let spec = ResponseSpec::builtin(codes::CALLBACK_ERR).unwrap();
        let bytes = frame.encode(&spec).unwrap();

        let decoded = ReplyFrame::decode(&bytes, &ResponseTable::new()).unwrap();
        assert_eq!(decoded.code, codes::CALLBACK_ERR);
        assert_eq!(decoded.reason(), Some("boom"));
        assert!(decoded.is_terminal());
    }

    #[test]
    fn test_unknown_code_is_invalid() {
        let bytes = ReplyFrame::new(555, ResponseKind::Ok, Fields::new())
            .encode(&ResponseSpec::ok(555))
            .unwrap();
        assert_eq!(
            ReplyFrame::decode(&bytes, &table()),
            Err(ProtocolError::InvalidCode(555))
        );
    }

    #[test]
    fn test_truncated_header_is_insufficient() {
        assert!(matches!(
            ReplyFrame::decode(&[1, 0, 0], &table()),
            Err(ProtocolError::InsufficientData { needed: 10, available: 3 })
        ));
    }

    #[test]
    fn test_kind_disagreeing_with_table_is_malformed() {
        let bytes = ReplyFrame::new(200, ResponseKind::Err, Fields::new())
            .encode(&ResponseSpec::ok(200))
            .unwrap();
        assert!(matches!(ReplyFrame::decode(&bytes, &table()), Err(ProtocolError::Malformed(_))));
    }
}
