//! Frame and envelope codecs.
//!
//! Frame bodies are JSON: command arguments are arbitrary `serde_json::Value`
//! payloads, which a self-describing format carries losslessly. The outer
//! transport envelope, which only ever wraps opaque byte bodies, uses
//! bincode.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{MirrorFrame, ProviderFrame, ProviderReply};

#[derive(Debug, Error)]
pub enum WireError {
    #[error("frame codec error: {0}")]
    Frame(#[from] serde_json::Error),
    #[error("envelope codec error: {0}")]
    Envelope(#[from] bincode::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Envelope {
    Event { body: Vec<u8> },
    Request { id: u64, body: Vec<u8> },
    Response { id: u64, body: Vec<u8> },
}

pub fn encode_envelope(envelope: &Envelope) -> Result<Vec<u8>, WireError> {
    bincode::serialize(envelope).map_err(WireError::from)
}

pub fn decode_envelope(bytes: &[u8]) -> Result<Envelope, WireError> {
    bincode::deserialize(bytes).map_err(WireError::from)
}

fn encode<T: Serialize>(frame: &T) -> Result<Vec<u8>, WireError> {
    serde_json::to_vec(frame).map_err(WireError::from)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, WireError> {
    serde_json::from_slice(bytes).map_err(WireError::from)
}

pub fn encode_provider_frame(frame: &ProviderFrame) -> Result<Vec<u8>, WireError> {
    encode(frame)
}

pub fn decode_provider_frame(bytes: &[u8]) -> Result<ProviderFrame, WireError> {
    decode(bytes)
}

pub fn encode_mirror_frame(frame: &MirrorFrame) -> Result<Vec<u8>, WireError> {
    encode(frame)
}

pub fn decode_mirror_frame(bytes: &[u8]) -> Result<MirrorFrame, WireError> {
    decode(bytes)
}

pub fn encode_reply(reply: &ProviderReply) -> Result<Vec<u8>, WireError> {
    encode(reply)
}

pub fn decode_reply(bytes: &[u8]) -> Result<ProviderReply, WireError> {
    decode(bytes)
}
