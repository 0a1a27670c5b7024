use super::RemoteRelationChangeEvent;
use crate::Result;

/// Encodes a change event for transports that carry raw bytes.
pub fn encode_event(event: &RemoteRelationChangeEvent) -> Result<Vec<u8>> {
    Ok(bincode::serialize(event)?)
}

pub fn decode_event(bytes: &[u8]) -> Result<RemoteRelationChangeEvent> {
    Ok(bincode::deserialize(bytes)?)
}
