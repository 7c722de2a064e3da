use std::fs::{File, OpenOptions, TryLockError};
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::time::Duration;
use anyhow::{Context, Result, bail};
use log::{debug, warn};
use tokio::net::{UnixListener, UnixStream};

use super::InstanceScope;

/// Polls of the scope lock before giving up (about five seconds).
const LOCK_ATTEMPTS: usize = 200;
const RETRY_DELAY: Duration = Duration::from_millis(25);

pub(super) type ClientStream = UnixStream;
pub(super) type ServerStream = UnixStream;

pub(super) enum Claim {
    Owner(Listener),
    Taken(ClientStream),
}

/// The bound scope socket. Removes its file when dropped.
pub(super) struct Listener {
    inner: UnixListener,
    path: PathBuf,
}

impl Listener {
    pub(super) async fn accept(&mut self) -> io::Result<ServerStream> {
        let (stream, _) = self.inner.accept().await?;
        Ok(stream)
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        // Runs before `inner` closes, so the path never refuses connections while it exists.
        debug!("Releasing scope socket {:?}", self.path);
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Connects to a live instance, or binds the scope socket if there is none.
///
/// The whole connect/remove/bind sequence runs under an exclusive lock on `<scope>.lock`:
/// only the lock holder may remove or bind the socket path, so at most one contender ends
/// up owning it even when many of them find the same stale socket.
pub(super) async fn acquire(scope: &InstanceScope) -> Result<Claim> {
    let path = scope.socket_path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("cannot create socket directory {}", parent.display()))?;
    }

    // Released when `_lock` drops, i.e. after the socket is bound and listening. Later
    // contenders then connect to it instead of taking the stale path.
    let _lock = lock_scope(&path.with_extension("lock")).await?;

    match UnixStream::connect(&path).await {
        Ok(stream) => return Ok(Claim::Taken(stream)),
        Err(err) if err.kind() == ErrorKind::ConnectionRefused => {
            // Nobody listens and nobody else may bind while we hold the lock: the file is
            // left over from a dead instance.
            warn!("Removing stale scope socket {:?}", path);
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => {
                    return Err(err)
                        .with_context(|| format!("cannot remove stale socket {}", path.display()));
                }
            }
        }
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => {
            return Err(err).with_context(|| format!("cannot connect to {}", path.display()));
        }
    }

    let inner = UnixListener::bind(&path).with_context(|| format!("cannot bind {}", path.display()))?;
    debug!("Bound scope socket {:?}", path);
    Ok(Claim::Owner(Listener { inner, path }))
}

/// Takes the exclusive lock on `lock_path`, polling while another process holds it.
///
/// The lock file itself is never removed; deleting it would let two processes lock
/// different files under the same name.
async fn lock_scope(lock_path: &Path) -> Result<File> {
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(lock_path)
        .with_context(|| format!("cannot open lock file {}", lock_path.display()))?;

    for _ in 0..LOCK_ATTEMPTS {
        match file.try_lock() {
            Ok(()) => return Ok(file),
            Err(TryLockError::WouldBlock) => tokio::time::sleep(RETRY_DELAY).await,
            Err(TryLockError::Error(err)) => {
                return Err(err).with_context(|| format!("cannot lock {}", lock_path.display()));
            }
        }
    }

    bail!("timed out waiting for {}", lock_path.display())
}
