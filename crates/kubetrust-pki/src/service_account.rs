//! Service account signing key pair
//!
//! The API server signs service account tokens with `sa.key` and the
//! controller manager verifies them with `sa.pub`. There is no certificate,
//! so the pair only follows the reuse half of the materialization rules.

use std::path::Path;

use rcgen::KeyPair;
use tracing::{debug, info};

use crate::error::{PkiError, Result};
use crate::materialize::MaterializeAction;
use crate::store;

/// On-disk base name of the service account key pair
pub const SERVICE_ACCOUNT_BASE_NAME: &str = "sa";

/// Create `sa.key`/`sa.pub` in `pki_dir`, or reuse an existing key
///
/// An existing key is never replaced. A missing public key is derived from
/// it; a public key that does not belong to it is rejected.
pub fn ensure_service_account_key(pki_dir: &Path) -> Result<MaterializeAction> {
    let base = SERVICE_ACCOUNT_BASE_NAME;

    let Some(key_pem) = store::load_key(pki_dir, base)? else {
        let key = KeyPair::generate().map_err(|e| {
            PkiError::KeyGenerationFailed(format!("failed to generate service account key: {}", e))
        })?;
        store::write_key(pki_dir, base, &key.serialize_pem())?;
        store::write_public_key(pki_dir, base, &key.public_key_pem())?;
        info!("generated service account key pair");
        return Ok(MaterializeAction::Generated);
    };

    let key = KeyPair::from_pem(&key_pem)
        .map_err(|e| PkiError::invalid(base, format!("failed to parse private key: {}", e)))?;
    let expected_public = key.public_key_pem();

    match store::load_public_key(pki_dir, base)? {
        Some(public_pem) if public_pem.trim() == expected_public.trim() => {}
        Some(_) => {
            return Err(PkiError::invalid(
                base,
                "public key does not match private key",
            ))
        }
        None => store::write_public_key(pki_dir, base, &expected_public)?,
    }

    debug!("reusing service account key pair");
    Ok(MaterializeAction::Reused)
}
