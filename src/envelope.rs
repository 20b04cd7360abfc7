//! RPC envelope codec.
//!
//! Every message on a connection is an envelope wrapping an opaque,
//! method-specific payload:
//!
//! ```text
//! message Request  { string name = 1; uint64 id = 2; bytes data = 3; }
//! message Response { uint64 id = 2; bytes data = 3; Status status = 4; }
//! message Failure  { FailureKind kind = 1; string message = 2; }
//! ```
//!
//! A response with `status = FAILED` carries an encoded [`Failure`] in its
//! `data` field instead of the method result. Peers that predate the
//! `status` field skip it as an unknown field.
//!
//! Envelopes travel either as protobuf binary or as protobuf JSON
//! (`{"name": "...", "id": "7", "data": "<base64>"}`). The payload inside
//! `data` is protobuf binary in both cases.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bytes::Bytes;
use clap::ValueEnum;
use prost::encoding::{decode_key, decode_varint, skip_field, DecodeContext, WireType};
use prost::{DecodeError, Message};
use serde::Deserialize;
use serde_json::{Map, Value as JsonValue};
use thiserror::Error;

const ID_TAG: u32 = 2;

/// Request envelope.
#[derive(Clone, PartialEq, Eq, prost::Message)]
pub struct Request {
    /// Method name, `<Service>.<method>`.
    #[prost(string, tag = "1")]
    pub name: String,
    /// Correlation id chosen by the caller. Never zero.
    #[prost(uint64, tag = "2")]
    pub id: u64,
    /// Encoded method payload.
    #[prost(bytes = "bytes", tag = "3")]
    pub data: Bytes,
}

impl Request {
    pub fn new(name: impl Into<String>, id: u64, data: Bytes) -> Self {
        Request {
            name: name.into(),
            id,
            data,
        }
    }
}

/// Outcome of a call as reported in the response envelope.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum Status {
    Ok = 0,
    Failed = 1,
}

/// Response envelope.
#[derive(Clone, PartialEq, Eq, prost::Message)]
pub struct Response {
    /// Echo of the request id.
    #[prost(uint64, tag = "2")]
    pub id: u64,
    /// Encoded method result, or an encoded [`Failure`] when the call failed.
    #[prost(bytes = "bytes", tag = "3")]
    pub data: Bytes,
    #[prost(enumeration = "Status", tag = "4")]
    pub status: i32,
}

impl Response {
    /// Successful response carrying a method result.
    pub fn success(id: u64, data: Bytes) -> Self {
        Response {
            id,
            data,
            status: Status::Ok.into(),
        }
    }

    /// Failed response carrying an error indication.
    pub fn failure(id: u64, failure: &Failure) -> Self {
        Response {
            id,
            data: Bytes::from(failure.encode_to_vec()),
            status: Status::Failed.into(),
        }
    }

    /// Any nonzero status counts as a failure.
    pub fn is_failed(&self) -> bool {
        self.status != i32::from(Status::Ok)
    }

    /// Decode the error indication of a failed response.
    pub fn failure_detail(&self) -> Option<Result<Failure, DecodeError>> {
        self.is_failed().then(|| Failure::decode(self.data.as_ref()))
    }
}

/// Class of a failed call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum FailureKind {
    Unknown = 0,
    /// Envelope or payload bytes did not match the schema.
    Decode = 1,
    /// No method registered under the requested name.
    Route = 2,
    /// The handler rejected its input.
    Execution = 3,
}

/// Error indication carried by a failed response.
#[derive(Clone, PartialEq, Eq, prost::Message)]
pub struct Failure {
    #[prost(enumeration = "FailureKind", tag = "1")]
    pub kind: i32,
    #[prost(string, tag = "2")]
    pub message: String,
}

impl Failure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Failure {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for Failure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?} failure: {}", self.kind(), self.message)
    }
}

/// Envelope decoding errors
#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("malformed protobuf envelope: {0}")]
    Decode(#[from] DecodeError),
    #[error("malformed JSON envelope: {0}")]
    Json(#[from] serde_json::Error),
    #[error("malformed base64 data: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("invalid request id")]
    InvalidId,
    #[error("missing request id")]
    MissingId,
}

/// Encoding of the envelope itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum EnvelopeFormat {
    /// Protobuf binary
    #[default]
    Binary,
    /// Protobuf JSON mapping, payload bytes in base64
    Json,
}

impl EnvelopeFormat {
    pub fn decode_request(self, buf: &[u8]) -> Result<Request, EnvelopeError> {
        let request = match self {
            EnvelopeFormat::Binary => Request::decode(buf)?,
            EnvelopeFormat::Json => {
                let envelope: JsonEnvelope = serde_json::from_slice(buf)?;
                Request {
                    id: envelope.id()?,
                    data: envelope.data()?,
                    name: envelope.name,
                }
            }
        };

        if request.id == 0 {
            return Err(EnvelopeError::MissingId);
        }
        Ok(request)
    }

    pub fn encode_request(self, request: &Request) -> Bytes {
        match self {
            EnvelopeFormat::Binary => Bytes::from(request.encode_to_vec()),
            EnvelopeFormat::Json => {
                let mut object = Map::new();
                if !request.name.is_empty() {
                    object.insert("name".into(), request.name.clone().into());
                }
                put_json_id(&mut object, request.id);
                put_json_data(&mut object, &request.data);
                Bytes::from(JsonValue::Object(object).to_string())
            }
        }
    }

    pub fn decode_response(self, buf: &[u8]) -> Result<Response, EnvelopeError> {
        let response = match self {
            EnvelopeFormat::Binary => Response::decode(buf)?,
            EnvelopeFormat::Json => {
                let envelope: JsonEnvelope = serde_json::from_slice(buf)?;
                let status = match envelope.status {
                    None | Some(JsonValue::Null) => Status::Ok,
                    Some(JsonValue::String(ref s)) if s == "OK" => Status::Ok,
                    Some(JsonValue::Number(ref n)) if n.as_u64() == Some(0) => Status::Ok,
                    Some(_) => Status::Failed,
                };
                Response {
                    id: envelope.id()?,
                    data: envelope.data()?,
                    status: status.into(),
                }
            }
        };

        if response.id == 0 {
            return Err(EnvelopeError::MissingId);
        }
        Ok(response)
    }

    pub fn encode_response(self, response: &Response) -> Bytes {
        match self {
            EnvelopeFormat::Binary => Bytes::from(response.encode_to_vec()),
            EnvelopeFormat::Json => {
                let mut object = Map::new();
                put_json_id(&mut object, response.id);
                put_json_data(&mut object, &response.data);
                if response.is_failed() {
                    object.insert("status".into(), "FAILED".into());
                }
                Bytes::from(JsonValue::Object(object).to_string())
            }
        }
    }

    /// Best-effort recovery of the request id from a malformed request.
    ///
    /// Binary input is scanned field by field until it stops parsing; the
    /// last nonzero id seen wins.
    pub fn salvage_id(self, buf: &[u8]) -> Option<u64> {
        match self {
            EnvelopeFormat::Binary => salvage_binary_id(buf),
            EnvelopeFormat::Json => serde_json::from_slice::<JsonEnvelope>(buf)
                .ok()
                .and_then(|envelope| envelope.id().ok()),
        }
    }
}

fn salvage_binary_id(mut buf: &[u8]) -> Option<u64> {
    let mut id = None;

    while !buf.is_empty() {
        let Ok((tag, wire_type)) = decode_key(&mut buf) else {
            break;
        };
        let step = match (tag, wire_type) {
            (ID_TAG, WireType::Varint) => decode_varint(&mut buf).map(|value| {
                if value != 0 {
                    id = Some(value);
                }
            }),
            _ => skip_field(wire_type, tag, &mut buf, DecodeContext::default()),
        };
        if step.is_err() {
            break;
        }
    }

    id
}

/// JSON form of either envelope. Unknown keys are ignored.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct JsonEnvelope {
    name: String,
    id: Option<JsonId>,
    data: String,
    status: Option<JsonValue>,
}

/// 64-bit integers are strings in protobuf JSON; plain numbers are accepted too.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum JsonId {
    Number(u64),
    Text(String),
}

impl JsonEnvelope {
    fn id(&self) -> Result<u64, EnvelopeError> {
        let id = match &self.id {
            None => return Err(EnvelopeError::MissingId),
            Some(JsonId::Number(id)) => *id,
            Some(JsonId::Text(id)) => id.parse().map_err(|_| EnvelopeError::InvalidId)?,
        };
        if id == 0 {
            return Err(EnvelopeError::MissingId);
        }
        Ok(id)
    }

    fn data(&self) -> Result<Bytes, EnvelopeError> {
        Ok(Bytes::from(BASE64.decode(&self.data)?))
    }
}

fn put_json_id(object: &mut Map<String, JsonValue>, id: u64) {
    if id != 0 {
        object.insert("id".into(), id.to_string().into());
    }
}

fn put_json_data(object: &mut Map<String, JsonValue>, data: &[u8]) {
    if !data.is_empty() {
        object.insert("data".into(), BASE64.encode(data).into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const BINARY: EnvelopeFormat = EnvelopeFormat::Binary;
    const JSON: EnvelopeFormat = EnvelopeFormat::Json;

    #[test]
    fn test_request_roundtrip() {
        let requests = [
            Request::new("Calculator.Service.add", 7, Bytes::from_static(b"\x08\x03\x10\x04")),
            Request::new("", u64::MAX, Bytes::new()),
            Request::new(".Reflector.Service.ack", 1, Bytes::from(vec![0u8; 300])),
        ];

        for format in [BINARY, JSON] {
            for request in &requests {
                let encoded = format.encode_request(request);
                assert_eq!(&format.decode_request(&encoded).unwrap(), request);
            }
        }
    }

    #[test]
    fn test_response_roundtrip() {
        let failure = Failure::new(FailureKind::Route, "Foo.Service.bar: not supported");

        for format in [BINARY, JSON] {
            let ok = Response::success(42, Bytes::from_static(b"\x08\x07"));
            let decoded = format.decode_response(&format.encode_response(&ok)).unwrap();
            assert_eq!(decoded, ok);
            assert!(decoded.failure_detail().is_none());

            let failed = Response::failure(42, &failure);
            let decoded = format.decode_response(&format.encode_response(&failed)).unwrap();
            assert_eq!(decoded, failed);
            assert_eq!(decoded.failure_detail().unwrap().unwrap(), failure);
        }
    }

    #[test]
    fn test_request_wire_layout() {
        // name = "a", id = 2, data = [9]
        let request = Request::new("a", 2, Bytes::from_static(&[9]));
        assert_eq!(
            BINARY.encode_request(&request).as_ref(),
            &[0x0a, 0x01, b'a', 0x10, 0x02, 0x1a, 0x01, 0x09]
        );
    }

    #[test]
    fn test_successful_response_has_no_status_field() {
        let response = Response::success(5, Bytes::from_static(&[1]));
        assert_eq!(
            BINARY.encode_response(&response).as_ref(),
            &[0x10, 0x05, 0x1a, 0x01, 0x01]
        );
    }

    #[test]
    fn test_json_layout() {
        let request = Request::new("Calculator.Service.add", 7, Bytes::from_static(b"\x08\x03"));
        let encoded: JsonValue = serde_json::from_slice(&JSON.encode_request(&request)).unwrap();
        assert_eq!(
            encoded,
            json!({"name": "Calculator.Service.add", "id": "7", "data": "CAM="})
        );

        let failed = Response::failure(7, &Failure::new(FailureKind::Execution, "x"));
        let encoded: JsonValue = serde_json::from_slice(&JSON.encode_response(&failed)).unwrap();
        assert_eq!(encoded["id"], "7");
        assert_eq!(encoded["status"], "FAILED");
    }

    #[test]
    fn test_json_numeric_id_and_unknown_keys() {
        let request = JSON
            .decode_request(br#"{"name": "Reflector.Service.ack", "id": 3, "extra": true}"#)
            .unwrap();
        assert_eq!(request, Request::new("Reflector.Service.ack", 3, Bytes::new()));
    }

    #[test]
    fn test_json_rejects_bad_input() {
        assert!(matches!(
            JSON.decode_request(br#"{"name": "a"}"#),
            Err(EnvelopeError::MissingId)
        ));
        assert!(matches!(
            JSON.decode_request(br#"{"name": "a", "id": "seven"}"#),
            Err(EnvelopeError::InvalidId)
        ));
        assert!(matches!(
            JSON.decode_request(br#"{"name": "a", "id": "1", "data": "!!"}"#),
            Err(EnvelopeError::Base64(_))
        ));
        assert!(matches!(
            JSON.decode_request(b"{\"name\""),
            Err(EnvelopeError::Json(_))
        ));
    }

    #[test]
    fn test_request_without_id_is_rejected() {
        let request = Request::new("Calculator.Service.add", 0, Bytes::new());
        assert!(matches!(
            BINARY.decode_request(&request.encode_to_vec()),
            Err(EnvelopeError::MissingId)
        ));
    }

    #[test]
    fn test_truncated_request_is_rejected() {
        let encoded = Request::new("Calculator.Service.add", 9, Bytes::from_static(b"xyz"))
            .encode_to_vec();
        // Cutting exactly before the data field leaves a valid request.
        let data_start = encoded.len() - 5;
        for len in (1..data_start).chain(data_start + 1..encoded.len()) {
            assert!(BINARY.decode_request(&encoded[..len]).is_err(), "prefix {len}");
        }
    }

    #[test]
    fn test_unknown_fields_are_skipped() {
        // field 15, length-delimited
        let mut buf = vec![0x7a, 9];
        buf.extend_from_slice(b"extension");
        buf.extend(Request::new("Reflector.Service.ack", 3, Bytes::new()).encode_to_vec());

        let decoded = BINARY.decode_request(&buf).unwrap();
        assert_eq!(decoded.name, "Reflector.Service.ack");
        assert_eq!(decoded.id, 3);
    }

    #[test]
    fn test_unknown_failure_kind() {
        let encoded = Failure {
            kind: 99,
            message: String::new(),
        }
        .encode_to_vec();
        let failure = Failure::decode(encoded.as_slice()).unwrap();
        assert_eq!(failure.kind(), FailureKind::Unknown);
    }

    #[test]
    fn test_unknown_status_is_failure() {
        let response = Response {
            id: 1,
            data: Bytes::new(),
            status: 7,
        };
        let decoded = BINARY.decode_response(&response.encode_to_vec()).unwrap();
        assert!(decoded.is_failed());
    }

    #[test]
    fn test_salvage_id() {
        let encoded = Request::new("Calculator.Service.add", 77, Bytes::from_static(b"abcdef"))
            .encode_to_vec();
        // Chop the data field short: name and id are intact.
        let truncated = &encoded[..encoded.len() - 2];
        assert!(BINARY.decode_request(truncated).is_err());
        assert_eq!(BINARY.salvage_id(truncated), Some(77));

        assert_eq!(BINARY.salvage_id(b"\xff\xff\xff"), None);
        assert_eq!(BINARY.salvage_id(&[]), None);

        assert_eq!(JSON.salvage_id(br#"{"id": "12", "data": "%%"}"#), Some(12));
        assert_eq!(JSON.salvage_id(b"not json"), None);
    }

    #[test]
    fn test_salvage_ignores_zero_id() {
        // id = 5, then id = 0, then a truncated field
        let buf = [0x10, 0x05, 0x10, 0x00, 0x1a, 0x04];
        assert_eq!(BINARY.salvage_id(&buf), Some(5));
    }
}
