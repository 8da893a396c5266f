//! Storage roots, random file names and the traversal check every file
//! operation goes through.

use std::path::{Component, Path, PathBuf};

use coffer_shared::constants::{RANDOM_NAME_BYTES, SHARD_PREFIX_LEN};
use coffer_shared::Disposition;
use rand::RngCore;

use crate::error::{Result, StoreError};

/// Root directory for `disposition` below `user_data`.
pub fn disposition_root(user_data: &Path, disposition: Disposition) -> PathBuf {
    user_data.join(disposition.dir_name())
}

/// 32 bytes from the OS CSPRNG, hex encoded. Never derived from content.
pub fn random_name() -> String {
    let mut bytes = [0u8; RANDOM_NAME_BYTES];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// `"ab/abcdef..."`: two-character shard directory plus the full name.
pub fn relative_path(name: &str) -> Result<String> {
    let prefix = name
        .get(..SHARD_PREFIX_LEN)
        .ok_or_else(|| StoreError::InvalidPath(name.to_string()))?;
    Ok(format!("{prefix}/{name}"))
}

pub fn new_relative_path() -> String {
    let name = random_name();
    // random_name is always 64 ascii chars
    format!("{}/{}", &name[..SHARD_PREFIX_LEN], name)
}

/// Join `relative` onto `root`, refusing anything that could escape it.
///
/// Empty paths, absolute paths, prefixes and `..` components are rejected
/// outright; the joined result must still start with `root`.
pub fn resolve(root: &Path, relative: &str) -> Result<PathBuf> {
    if relative.is_empty() || relative.contains('\0') {
        return Err(StoreError::InvalidPath(relative.to_string()));
    }

    let mut resolved = root.to_path_buf();
    for component in Path::new(relative).components() {
        match component {
            Component::Normal(c) => resolved.push(c),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(StoreError::InvalidPath(relative.to_string()));
            }
        }
    }

    if resolved == root || !resolved.starts_with(root) {
        return Err(StoreError::InvalidPath(relative.to_string()));
    }
    Ok(resolved)
}

/// Inverse of [`resolve`] for files found while walking a root.
pub fn to_relative(root: &Path, absolute: &Path) -> Option<String> {
    let rel = absolute.strip_prefix(root).ok()?;
    let parts: Vec<&str> = rel
        .components()
        .map(|c| match c {
            Component::Normal(s) => s.to_str(),
            _ => None,
        })
        .collect::<Option<_>>()?;
    Some(parts.join("/"))
}
