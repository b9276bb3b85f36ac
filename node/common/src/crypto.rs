use sha2::{Sha256, Digest};
use serde::Serialize;
use crate::{types::Cid, MarketError};

/// Compute SHA256 hash
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Content identifier of raw bytes
pub fn cid_of_bytes(data: &[u8]) -> Cid {
    Cid::new(hex::encode(sha256(data)))
}

/// Content identifier of a value's canonical JSON encoding.
///
/// Object keys are emitted in sorted order, so equal values always hash
/// to the same CID.
pub fn cid_of<T: Serialize + ?Sized>(value: &T) -> Result<Cid, MarketError> {
    let bytes = serde_json::to_vec(value)?;
    Ok(cid_of_bytes(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sha256_known_vector() {
        let digest = sha256(b"abc");
        assert_eq!(
            hex::encode(digest),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_cid_ignores_key_insertion_order() {
        let a = json!({"deal_id": "d1", "result_id": "r1"});
        let b = json!({"result_id": "r1", "deal_id": "d1"});
        assert_eq!(cid_of(&a).unwrap(), cid_of(&b).unwrap());
        assert_eq!(cid_of(&a).unwrap().hash.len(), 64);
    }
}
