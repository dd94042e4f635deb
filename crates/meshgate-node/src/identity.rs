//! Node identity: load the persisted address or mint one.

use rand::Rng;
use tracing::{info, warn};

use meshgate_core::types::NodeAddress;

use crate::storage::{NodeState, Storage, StorageError};

/// Generate a fresh random node address from OS entropy.
///
/// The all-zero and all-0xFF patterns are the "uninitialized" sentinels,
/// so regenerate until neither comes up.
pub fn generate_address() -> NodeAddress {
    let mut rng = rand::rng();
    loop {
        let mut bytes = [0u8; 8];
        rng.fill(&mut bytes[..]);
        let address = NodeAddress::new(bytes);
        if !address.is_uninitialized() {
            return address;
        }
    }
}

/// Load the persisted node state, generating and persisting a fresh
/// identity when none exists (or the stored one is a sentinel value).
///
/// A failed save is logged and tolerated: the node runs with the
/// in-memory identity and retries persistence on the next counter
/// flush.
pub async fn load_or_generate(storage: &Storage) -> Result<NodeState, StorageError> {
    match storage.load_state().await {
        Ok(Some(state)) if !state.address.is_uninitialized() => {
            info!(address = %state.address, counter = state.packet_counter, "loaded node identity");
            Ok(state)
        }
        Ok(_) => {
            let state = NodeState {
                address: generate_address(),
                packet_counter: 0,
            };
            info!(address = %state.address, "generated new node identity");
            if let Err(e) = storage.save_state(state).await {
                warn!(error = %e, "failed to persist new identity");
            }
            Ok(state)
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_address_is_valid() {
        for _ in 0..32 {
            assert!(!generate_address().is_uninitialized());
        }
    }

    #[tokio::test]
    async fn first_boot_generates_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new(dir.path().to_path_buf()).unwrap();

        let state = load_or_generate(&storage).await.unwrap();
        assert!(!state.address.is_uninitialized());
        assert_eq!(state.packet_counter, 0);

        // Second boot sees the same identity.
        let again = load_or_generate(&storage).await.unwrap();
        assert_eq!(again.address, state.address);
    }

    #[tokio::test]
    async fn sentinel_address_regenerated() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new(dir.path().to_path_buf()).unwrap();
        storage
            .save_state(NodeState {
                address: NodeAddress::new([0xFF; 8]),
                packet_counter: 500,
            })
            .await
            .unwrap();

        let state = load_or_generate(&storage).await.unwrap();
        assert!(!state.address.is_uninitialized());
    }
}
