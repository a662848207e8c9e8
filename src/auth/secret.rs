//! Token signing secret lifecycle (§4.C, §6): 32 random bytes persisted at
//! `<data_root>/token_secret` with owner-only permissions on first start,
//! read back on subsequent starts.

use camino::Utf8PathBuf;
use rand::RngCore;

use crate::config::data_path;

const SECRET_LEN: usize = 32;

pub fn secret_path() -> Utf8PathBuf {
    data_path("token_secret")
}

/// Loads the secret, generating and persisting a new one if absent. Warns
/// if an existing secret file's permissions are broader than owner-only.
pub fn load_or_generate() -> anyhow::Result<Vec<u8>> {
    let path = secret_path();

    match std::fs::read(&path) {
        Ok(bytes) => {
            check_permissions(&path);
            if bytes.len() != SECRET_LEN {
                anyhow::bail!("token secret at {path} has unexpected length {}", bytes.len());
            }
            Ok(bytes)
        }
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => generate_and_persist(&path),
        Err(error) => Err(error).map_err(|e| anyhow::anyhow!(e).context(format!("failed to read {path}"))),
    }
}

fn generate_and_persist(path: &Utf8PathBuf) -> anyhow::Result<Vec<u8>> {
    let mut secret = vec![0u8; SECRET_LEN];
    rand::thread_rng().fill_bytes(&mut secret);

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    std::fs::write(path, &secret)?;
    set_owner_only_permissions(path)?;

    info!(%path, "generated new token secret");

    Ok(secret)
}

#[cfg(unix)]
fn set_owner_only_permissions(path: &Utf8PathBuf) -> anyhow::Result<()> {
    use std::os::unix::fs::PermissionsExt as _;
    let permissions = std::fs::Permissions::from_mode(0o600);
    std::fs::set_permissions(path, permissions)?;
    Ok(())
}

#[cfg(not(unix))]
fn set_owner_only_permissions(_path: &Utf8PathBuf) -> anyhow::Result<()> {
    // Best effort only: the non-Unix targets this crate cares about rely on
    // filesystem ACLs set up by the data root itself.
    Ok(())
}

#[cfg(unix)]
fn check_permissions(path: &Utf8PathBuf) {
    use std::os::unix::fs::PermissionsExt as _;

    let Ok(metadata) = std::fs::metadata(path) else { return };
    let mode = metadata.permissions().mode() & 0o777;
    if mode != 0o600 {
        warn!(%path, mode = format!("{mode:o}"), "token secret file permissions are broader than owner-only");
    }
}

#[cfg(not(unix))]
fn check_permissions(_path: &Utf8PathBuf) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg(unix)]
    fn generated_secret_is_32_bytes_and_owner_only() {
        let dir = tempfile::tempdir().unwrap();
        // SAFETY: tests run single-threaded in this module; no concurrent env mutation.
        unsafe { std::env::set_var("SATOP_DATA_ROOT", dir.path()) };

        let secret = load_or_generate().unwrap();
        assert_eq!(secret.len(), SECRET_LEN);

        use std::os::unix::fs::PermissionsExt as _;
        let mode = std::fs::metadata(secret_path()).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);

        unsafe { std::env::remove_var("SATOP_DATA_ROOT") };
    }
}
