// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Unix socket the container runtime uses to reach the plugin.

use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tokio::net::UnixListener;
use tracing::{debug, warn};

/// Default location scanned by the container runtime for plugin sockets.
pub const DEFAULT_SOCKET_PATH: &str = "/run/docker/plugins/moby-nats-logdriver.sock";

const SOCKET_PERMISSIONS: u32 = 0o660;

// sun_path is 108 bytes on Linux; keep a margin.
const MAX_SOCKET_PATH_LEN: usize = 100;

/// Checks that `path` can be used as a unix socket path.
pub fn validate_socket_path(path: &str) -> io::Result<()> {
    if path.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "plugin socket path cannot be empty",
        ));
    }
    if path.contains('\0') {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "plugin socket path cannot contain null bytes",
        ));
    }
    if path.len() > MAX_SOCKET_PATH_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!(
                "plugin socket path too long: {} bytes (maximum {MAX_SOCKET_PATH_LEN}): {path}",
                path.len()
            ),
        ));
    }
    if !path.starts_with('/') {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("plugin socket path must be absolute: {path}"),
        ));
    }
    Ok(())
}

/// Removes the socket file when dropped.
///
/// `UnixListener` leaves its file behind; keep the guard alive for as long as the listener
/// is served.
#[derive(Debug)]
pub struct SocketCleanupGuard {
    path: PathBuf,
}

impl SocketCleanupGuard {
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for SocketCleanupGuard {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => debug!("removed plugin socket {}", self.path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                "failed to remove plugin socket {}: {e}",
                self.path.display()
            ),
        }
    }
}

/// Binds the plugin socket, replacing a stale socket file left by a previous run.
///
/// Must be called from within a tokio runtime.
pub fn bind(path: &str) -> io::Result<(UnixListener, SocketCleanupGuard)> {
    validate_socket_path(path)?;
    let socket_path = Path::new(path);

    if let Some(parent) = socket_path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            io::Error::new(
                e.kind(),
                format!("failed to create plugin socket directory {}: {e}", parent.display()),
            )
        })?;
    }

    match fs::symlink_metadata(socket_path) {
        Ok(metadata) if metadata.file_type().is_symlink() => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("plugin socket path is a symlink, refusing to remove it: {path}"),
            ));
        }
        Ok(metadata) if metadata.is_dir() => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("plugin socket path is a directory: {path}"),
            ));
        }
        Ok(_) => {
            debug!("removing stale plugin socket {path}");
            fs::remove_file(socket_path).map_err(|e| {
                io::Error::new(
                    e.kind(),
                    format!("failed to remove existing plugin socket {path}: {e}"),
                )
            })?;
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }

    let listener = UnixListener::bind(socket_path).map_err(|e| {
        io::Error::new(
            e.kind(),
            format!("failed to bind plugin socket {path}: {e}"),
        )
    })?;
    let guard = SocketCleanupGuard {
        path: socket_path.to_path_buf(),
    };

    fs::set_permissions(socket_path, fs::Permissions::from_mode(SOCKET_PERMISSIONS)).map_err(
        |e| {
            io::Error::new(
                e.kind(),
                format!(
                    "failed to set permissions {SOCKET_PERMISSIONS:o} on plugin socket {path}: {e}"
                ),
            )
        },
    )?;

    Ok((listener, guard))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs as unix_fs;

    #[test]
    fn test_validate_socket_path() {
        assert!(validate_socket_path("/run/docker/plugins/nats.sock").is_ok());
        assert!(validate_socket_path("").is_err());
        assert!(validate_socket_path("relative.sock").is_err());
        assert!(validate_socket_path("/tmp/a\0b.sock").is_err());
        assert!(validate_socket_path(&format!("/{}", "a".repeat(120))).is_err());
    }

    #[tokio::test]
    async fn test_bind_replaces_stale_file_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plugin.sock");
        fs::write(&path, b"stale").unwrap();

        let (listener, guard) = bind(path.to_str().unwrap()).expect("bind over stale file");
        assert_eq!(guard.path(), path.as_path());
        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, SOCKET_PERMISSIONS);

        drop(listener);
        drop(guard);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_bind_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plugins/plugin.sock");

        let (_listener, _guard) = bind(path.to_str().unwrap()).expect("bind");
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_bind_refuses_symlink() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("target");
        fs::write(&target, b"keep me").unwrap();
        let path = dir.path().join("plugin.sock");
        unix_fs::symlink(&target, &path).unwrap();

        let error = bind(path.to_str().unwrap()).unwrap_err();

        assert!(error.to_string().contains("symlink"));
        assert_eq!(fs::read(&target).unwrap(), b"keep me");
    }
}
