//! Address → scripthash derivation.
//!
//! Electrum servers key everything by the SHA-256 of an output script,
//! hex-encoded with the byte order reversed.

use std::str::FromStr;

use bitcoin::address::{Address, NetworkUnchecked};
use bitcoin::hashes::{sha256, Hash};
use bitcoin::Network;

use ember_types::BitcoinAddress;

use crate::ProtocolError;

/// Derive the subscription/query scripthash for an address.
pub fn address_to_scripthash(
    address: &BitcoinAddress,
    network: Network,
) -> Result<String, ProtocolError> {
    let parsed = Address::<NetworkUnchecked>::from_str(address.as_str()).map_err(|e| {
        ProtocolError::InvalidAddress {
            address: address.to_string(),
            reason: e.to_string(),
        }
    })?;

    let parsed = parsed
        .require_network(network)
        .map_err(|e| ProtocolError::InvalidAddress {
            address: address.to_string(),
            reason: e.to_string(),
        })?;

    let script = parsed.script_pubkey();
    let digest = sha256::Hash::hash(script.as_bytes());
    let mut bytes = digest.to_byte_array();
    bytes.reverse();
    Ok(hex::encode(bytes))
}
