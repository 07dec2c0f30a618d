//! UID generation for instances this crate mints itself (SOP Instance UID,
//! ConcatenationUID, SOPInstanceUIDOfConcatenationSource).
//!
//! DICOM PS3.5 Annex B.2 reserves the "2.25" root for UIDs derived from a
//! UUID reinterpreted as a single large integer. We don't carry a `uuid`
//! dependency, so the 128 random bits come from hashing a monotonic counter
//! together with the current time via the `sha2` dependency already in the
//! stack for the remote-tile-source HMAC signer.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use sha2::{Digest, Sha256};

static COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generates a fresh UID under the "2.25" (UUID-derived) root.
pub fn generate_uid() -> String {
    let counter = COUNTER.fetch_add(1, Ordering::Relaxed);
    let nanos = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_nanos()).unwrap_or(0);

    let mut hasher = Sha256::new();
    hasher.update(nanos.to_be_bytes());
    hasher.update(counter.to_be_bytes());
    hasher.update(std::process::id().to_be_bytes());
    let digest = hasher.finalize();

    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    let value = u128::from_be_bytes(bytes);

    format!("2.25.{}", value)
}
