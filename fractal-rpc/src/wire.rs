//! Conversions between protobuf messages and the bincode-opaque payloads
//! `fractal-core` works with. Keeps `fractal-core::remote` free of any
//! knowledge of the `PartialResponse`/`Command` message shapes.

use fractal_core::{ObjectId, WireHandleRef};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::RpcError;
use crate::proto;
use crate::session::SessionId;

pub fn object_from_command(cmd: &proto::Command) -> ObjectId {
    ObjectId {
        high: cmd.high_id,
        low: cmd.low_id,
    }
}

pub fn session_from_command(cmd: &proto::Command) -> Result<SessionId, RpcError> {
    SessionId::from_bytes(&cmd.session_id)
        .ok_or_else(|| RpcError::Decode("malformed session id".to_string()))
}

pub fn decode_op<O: DeserializeOwned>(cmd: &proto::Command) -> Result<O, RpcError> {
    bincode::deserialize(&cmd.serialized_op).map_err(|e| RpcError::Decode(e.to_string()))
}

pub fn decode_peer(bytes: &[u8]) -> Result<WireHandleRef, RpcError> {
    bincode::deserialize(bytes).map_err(|e| RpcError::Decode(e.to_string()))
}

pub fn encode_handle_response(delta_done: f64, object: Option<ObjectId>) -> proto::PartialResponse {
    match object {
        Some(o) => encode_partial(
            delta_done,
            Some(&WireHandleRef { object: o }),
        ),
        None => encode_partial::<WireHandleRef>(delta_done, None),
    }
}

pub fn encode_partial<P: Serialize>(delta_done: f64, payload: Option<&P>) -> proto::PartialResponse {
    let serialized_payload = payload
        .map(|p| bincode::serialize(p).expect("RPC payloads are always serializable"))
        .unwrap_or_default();
    proto::PartialResponse {
        delta_done,
        has_payload: payload.is_some(),
        serialized_payload,
    }
}

pub fn decode_raw(resp: proto::PartialResponse) -> fractal_core::RawPartial {
    fractal_core::RawPartial {
        delta_done: resp.delta_done,
        payload: if resp.has_payload {
            Some(resp.serialized_payload)
        } else {
            None
        },
    }
}
