//! Utility functions for id minting

use crate::error::WorkflowError;
use bech32::Bech32m;
use uuid7::uuid7;

// construct a unique id from a fresh uuid7 then encode using bech32
pub fn new_uuid_to_bech32(hrp: &str) -> Result<String, WorkflowError> {
    let parsed = bech32::Hrp::parse(hrp)
        .map_err(|e| WorkflowError::Validation(format!("invalid id prefix {hrp:?}: {e}")))?;
    let encoded = bech32::encode::<Bech32m>(parsed, uuid7().as_bytes())
        .map_err(|e| WorkflowError::Codec(e.to_string()))?;
    Ok(encoded)
}
