//! Coordinator key persistence.
//!
//! The private key lives on disk as PKCS#8 PEM with owner-only permissions.
//! First boot generates the key; later boots load it. A PEM supplied through
//! the environment takes precedence over the file.

use crate::error::CryptoError;
use crate::keys::Keypair;
use std::path::Path;
use tracing::info;

/// Load the keypair from `path`, generating and persisting a new one if the
/// file does not exist.
pub fn load_or_generate(path: &Path) -> Result<Keypair, CryptoError> {
    if path.exists() {
        let pem = std::fs::read_to_string(path)
            .map_err(|e| CryptoError::Storage(format!("read {}: {e}", path.display())))?;
        return Keypair::from_pkcs8_pem(&pem);
    }

    let keypair = Keypair::generate();
    let pem = keypair.to_pkcs8_pem()?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| CryptoError::Storage(format!("mkdir {}: {e}", parent.display())))?;
    }
    std::fs::write(path, pem.as_bytes())
        .map_err(|e| CryptoError::Storage(format!("write {}: {e}", path.display())))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(path, perms)
            .map_err(|e| CryptoError::Storage(format!("chmod {}: {e}", path.display())))?;
    }
    info!(target: "crypto", path = %path.display(), "generated new coordinator keypair");
    Ok(keypair)
}
