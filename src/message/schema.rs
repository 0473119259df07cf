//! Schema-tagged envelope encode/decode. Every wire frame carries an `api`
//! tag naming its channel and a `type` tag naming its shape within that
//! channel; decoding fails with `Error::SchemaViolation` if either tag is
//! missing or doesn't match, and with `Error::UnknownMessageType` if the
//! `type` tag names no known variant for that `api`.

use crate::message::types::{DownstreamEvent, PublishMsg, RpcReply, RpcRequest};
use crate::types::{Error, Result};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

/// The four channel tags named in §6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Api {
    UpRpcReq,
    UpRpcRep,
    UpPub,
    DownEvent,
}

impl Api {
    fn as_str(self) -> &'static str {
        match self {
            Api::UpRpcReq => "up_rpc_req",
            Api::UpRpcRep => "up_rpc_rep",
            Api::UpPub => "up_pub",
            Api::DownEvent => "down_event",
        }
    }
}

fn encode<T: Serialize>(api: Api, msg: &T) -> Result<Vec<u8>> {
    let mut value = serde_json::to_value(msg)?;
    let obj = value
        .as_object_mut()
        .ok_or_else(|| Error::internal("message did not serialize to a JSON object"))?;
    obj.insert("api".to_string(), Value::String(api.as_str().to_string()));
    Ok(serde_json::to_vec(&value)?)
}

fn decode<T: DeserializeOwned>(api: Api, bytes: &[u8]) -> Result<T> {
    let value: Value = serde_json::from_slice(bytes)
        .map_err(|e| Error::schema_violation(format!("invalid JSON: {e}")))?;

    let obj = value
        .as_object()
        .ok_or_else(|| Error::schema_violation("frame is not a JSON object"))?;

    let api_tag = obj
        .get("api")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::schema_violation("missing `api` tag"))?;
    if api_tag != api.as_str() {
        return Err(Error::schema_violation(format!(
            "expected api `{}`, got `{api_tag}`",
            api.as_str()
        )));
    }

    let type_tag = obj
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::schema_violation("missing `type` tag"))?
        .to_string();

    serde_json::from_value(value).map_err(|e| {
        if e.to_string().contains("unknown variant") {
            Error::unknown_message_type(type_tag)
        } else {
            Error::schema_violation(format!("type `{type_tag}`: {e}"))
        }
    })
}

pub fn encode_rpc_request(msg: &RpcRequest) -> Result<Vec<u8>> {
    encode(Api::UpRpcReq, msg)
}

pub fn decode_rpc_request(bytes: &[u8]) -> Result<RpcRequest> {
    decode(Api::UpRpcReq, bytes)
}

pub fn encode_rpc_reply(msg: &RpcReply) -> Result<Vec<u8>> {
    encode(Api::UpRpcRep, msg)
}

pub fn decode_rpc_reply(bytes: &[u8]) -> Result<RpcReply> {
    decode(Api::UpRpcRep, bytes)
}

pub fn encode_publish(msg: &PublishMsg) -> Result<Vec<u8>> {
    encode(Api::UpPub, msg)
}

pub fn decode_publish(bytes: &[u8]) -> Result<PublishMsg> {
    decode(Api::UpPub, bytes)
}

pub fn encode_downstream_event(msg: &DownstreamEvent) -> Result<Vec<u8>> {
    encode(Api::DownEvent, msg)
}

pub fn decode_downstream_event(bytes: &[u8]) -> Result<DownstreamEvent> {
    decode(Api::DownEvent, bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::types::RpcRequest;
    use crate::types::ContainerId;

    #[test]
    fn roundtrips_through_json() {
        let req = RpcRequest::Kill {
            container_uuid: ContainerId::new(),
        };
        let bytes = encode_rpc_request(&req).unwrap();
        let decoded = decode_rpc_request(&bytes).unwrap();
        match decoded {
            RpcRequest::Kill { container_uuid } => {
                if let RpcRequest::Kill {
                    container_uuid: orig,
                } = &req
                {
                    assert_eq!(&container_uuid, orig);
                }
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn rejects_wrong_api_tag() {
        let req = RpcRequest::List;
        let bytes = encode_rpc_request(&req).unwrap();
        let err = decode_publish(&bytes).unwrap_err();
        assert!(matches!(err, Error::SchemaViolation(_)));
    }

    #[test]
    fn rejects_missing_type_tag() {
        let bytes = br#"{"api":"up_rpc_req"}"#;
        let err = decode_rpc_request(bytes).unwrap_err();
        assert!(matches!(err, Error::SchemaViolation(_)));
    }

    #[test]
    fn rejects_unknown_type_tag() {
        let bytes = br#"{"api":"up_rpc_req","type":"not_a_real_type"}"#;
        let err = decode_rpc_request(bytes).unwrap_err();
        assert!(matches!(err, Error::UnknownMessageType(_)));
    }

}
