//! On-disk PKI layout
//!
//! `{pki_dir}/{base_name}.crt`, `.key` and `.pub`, all PEM. Base names may
//! contain a subdirectory (`etcd/ca`); parents are created on write.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::Result;

/// Path of the certificate file for `base_name`
pub fn cert_path(pki_dir: &Path, base_name: &str) -> PathBuf {
    pki_dir.join(format!("{}.crt", base_name))
}

/// Path of the private key file for `base_name`
pub fn key_path(pki_dir: &Path, base_name: &str) -> PathBuf {
    pki_dir.join(format!("{}.key", base_name))
}

/// Path of the public key file for `base_name`
pub fn pub_path(pki_dir: &Path, base_name: &str) -> PathBuf {
    pki_dir.join(format!("{}.pub", base_name))
}

fn write_restricted(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut file = open_restricted(path)?;
    file.write_all(contents.as_bytes())?;
    file.sync_all()?;

    info!(path = %path.display(), "wrote PKI file");
    Ok(())
}

/// Open `path` for writing with mode 0600 before any byte is written
///
/// A file that already exists keeps its inode, so its mode is tightened on
/// the open handle as well.
fn open_restricted(path: &Path) -> io::Result<fs::File> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

        let file = fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .mode(0o600)
            .open(path)?;
        file.set_permissions(fs::Permissions::from_mode(0o600))?;
        Ok(file)
    }

    #[cfg(not(unix))]
    {
        fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)
    }
}

fn read_optional(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(contents) => Ok(Some(contents)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Write a certificate and its private key
pub fn write_cert_and_key(
    pki_dir: &Path,
    base_name: &str,
    cert_pem: &str,
    key_pem: &str,
) -> Result<()> {
    write_restricted(&cert_path(pki_dir, base_name), cert_pem)?;
    write_restricted(&key_path(pki_dir, base_name), key_pem)
}

/// Write a PEM public key
pub fn write_public_key(pki_dir: &Path, base_name: &str, public_pem: &str) -> Result<()> {
    write_restricted(&pub_path(pki_dir, base_name), public_pem)
}

/// Write a private key without a certificate
pub fn write_key(pki_dir: &Path, base_name: &str, key_pem: &str) -> Result<()> {
    write_restricted(&key_path(pki_dir, base_name), key_pem)
}

/// Read the certificate, `None` when absent
pub fn load_cert(pki_dir: &Path, base_name: &str) -> Result<Option<String>> {
    read_optional(&cert_path(pki_dir, base_name))
}

/// Read the private key, `None` when absent
pub fn load_key(pki_dir: &Path, base_name: &str) -> Result<Option<String>> {
    read_optional(&key_path(pki_dir, base_name))
}

/// Read the public key, `None` when absent
pub fn load_public_key(pki_dir: &Path, base_name: &str) -> Result<Option<String>> {
    read_optional(&pub_path(pki_dir, base_name))
}
