//! Node identity.
//!
//! A node is named after its persistent ed25519 key using double BLAKE3:
//! hash₁ = BLAKE3(pubkey), hash₂ = BLAKE3(hash₁), id = "b3b3/{hash₂}".

use ed25519_dalek::VerifyingKey;

pub const NODE_ID_PREFIX: &str = "b3b3/";

pub fn compute_node_id(pubkey: &VerifyingKey) -> String {
    node_id_from_bytes(pubkey.as_bytes())
}

pub fn node_id_from_bytes(pubkey_bytes: &[u8]) -> String {
    let hash1 = blake3::hash(pubkey_bytes);
    let hash2 = blake3::hash(hash1.as_bytes());
    format!("{}{}", NODE_ID_PREFIX, hex::encode(hash2.as_bytes()))
}

/// Check a claimed id against a hex-encoded public key.
pub fn verify_node_id(claimed_id: &str, pubkey_hex: &str) -> bool {
    match hex::decode(pubkey_hex) {
        Ok(bytes) => node_id_from_bytes(&bytes) == claimed_id,
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::SigningKey;

    #[test]
    fn id_is_stable_and_verifiable() {
        let key = SigningKey::from_bytes(&[7u8; 32]);
        let id = compute_node_id(&key.verifying_key());
        assert!(id.starts_with(NODE_ID_PREFIX));
        assert_eq!(id.len(), NODE_ID_PREFIX.len() + 64);
        assert_eq!(id, compute_node_id(&key.verifying_key()));

        let pubkey_hex = hex::encode(key.verifying_key().as_bytes());
        assert!(verify_node_id(&id, &pubkey_hex));
        assert!(!verify_node_id(&id, &hex::encode([1u8; 32])));
        assert!(!verify_node_id(&id, "not hex"));
    }
}
