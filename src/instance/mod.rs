//! # Single-Instance Guard
//!
//! Decides whether this process is the first overseer in its scope, and carries the raw
//! arguments of every later process over to the first one.
//!
//! ## Platform Backends
//!
//! 1.  **Unix** (`unix.rs`): a Unix domain socket at `<dir>/<scope>.sock`. Whoever binds it is
//!     first; a socket file nobody listens on is stale and gets replaced.
//! 2.  **Windows** (`win32.rs`): a named mutex (`Local\` or `Global\`) decides who is first;
//!     a named pipe carries the transfers.
//!
//! Both backends speak the same wire format: one JSON line from the later process
//! (`{"args":[...]}`) answered by one JSON line from the first (`{"accepted":true}`).

use std::path::{Path, PathBuf};
use std::time::Duration;
use anyhow::{Context, Result, bail};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

#[cfg(unix)]
mod unix;
#[cfg(unix)]
use unix as platform;

#[cfg(windows)]
mod win32;
#[cfg(windows)]
use win32 as platform;

/// Upper bound for one transferred request line.
const MAX_LINE_BYTES: u64 = 1024 * 1024;
/// How long the first instance waits for a connected process to send its request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
/// Pause after a failed accept before listening again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// The domain within which only one overseer may run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceScope {
    name: String,
    machine_wide: bool,
    dir: Option<PathBuf>,
}

impl InstanceScope {
    /// A session-wide scope. Characters that are unsafe in socket, pipe or mutex names are
    /// replaced by `_`.
    pub fn new(name: &str) -> Self {
        Self {
            name: sanitize_scope_name(name),
            machine_wide: false,
            dir: None,
        }
    }

    /// Widens (or narrows) the scope to the whole machine.
    pub fn machine_wide(mut self, machine_wide: bool) -> Self {
        self.machine_wide = machine_wide;
        self
    }

    /// Overrides the directory holding the Unix socket. Ignored on Windows.
    pub fn with_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = Some(dir.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_machine_wide(&self) -> bool {
        self.machine_wide
    }

    /// Location of the Unix socket for this scope.
    pub fn socket_path(&self) -> PathBuf {
        let dir = match &self.dir {
            Some(dir) => dir.clone(),
            None => default_socket_dir(self.machine_wide),
        };
        dir.join(format!("{}.sock", self.name))
    }
}

fn sanitize_scope_name(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "cgb-overseer".to_string()
    } else {
        cleaned
    }
}

/// Session scope lives in the user's runtime dir when there is one; machine scope (and the
/// fallback) in the system temp dir.
fn default_socket_dir(machine_wide: bool) -> PathBuf {
    if !machine_wide {
        if let Some(runtime) = directories::BaseDirs::new()
            .and_then(|dirs| dirs.runtime_dir().map(Path::to_path_buf))
        {
            return runtime;
        }
    }
    std::env::temp_dir()
}

/// Outcome of [`SingleInstanceGuard::try_acquire`].
pub enum Acquired {
    /// This process is the one instance of its scope.
    First(PrimaryInstance),
    /// Another process already is; hand the arguments to it.
    Subsequent(TransferChannel),
}

/// Enforces one running overseer per [`InstanceScope`].
pub struct SingleInstanceGuard {
    scope: InstanceScope,
}

impl SingleInstanceGuard {
    pub fn new(scope: InstanceScope) -> Self {
        Self { scope }
    }

    pub fn scope(&self) -> &InstanceScope {
        &self.scope
    }

    /// Asks the platform whether this process is first in its scope.
    pub async fn try_acquire(&self) -> Result<Acquired> {
        match platform::acquire(&self.scope).await? {
            platform::Claim::Owner(listener) => {
                info!("Acquired single-instance scope '{}'", self.scope.name());
                Ok(Acquired::First(PrimaryInstance { listener }))
            }
            platform::Claim::Taken(stream) => {
                debug!("Scope '{}' is held by a running instance", self.scope.name());
                Ok(Acquired::Subsequent(TransferChannel { stream }))
            }
        }
    }
}

/// Held by the first instance; receives the arguments of later processes.
///
/// Releases the scope when dropped.
pub struct PrimaryInstance {
    listener: platform::Listener,
}

impl PrimaryInstance {
    /// Serves transfers forever, calling `callback` with each received argument list.
    ///
    /// Connections are handled one at a time, so `callback` sees argument lists in the order
    /// the platform accepted them. A request is acknowledged only after `callback` returned.
    pub async fn on_transfer<F>(mut self, mut callback: F) -> Result<()>
    where
        F: FnMut(Vec<String>) + Send,
    {
        loop {
            let mut stream = match self.listener.accept().await {
                Ok(stream) => stream,
                Err(err) => {
                    warn!("Failed to accept transfer connection: {}", err);
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                    continue;
                }
            };

            let request = tokio::time::timeout(
                REQUEST_TIMEOUT,
                read_json_line::<_, TransferRequest>(&mut stream),
            )
            .await;
            match request {
                Ok(Ok(request)) => {
                    debug!("Received transfer of {} argument(s)", request.args.len());
                    // The ack is what lets the sender exit, so it follows the callback.
                    callback(request.args);
                    if let Err(err) = write_json_line(&mut stream, &TransferAck { accepted: true }).await {
                        debug!("Could not acknowledge transfer: {:#}", err);
                    }
                }
                Ok(Err(err)) => warn!("Discarding malformed transfer: {:#}", err),
                Err(_) => warn!("Transfer sender went silent; dropping connection"),
            }
        }
    }
}

/// Held by a later process; sends its arguments to the first instance.
pub struct TransferChannel {
    stream: platform::ClientStream,
}

impl TransferChannel {
    /// Sends `args` and waits until the first instance acknowledged them.
    pub async fn transfer(mut self, args: &[String]) -> Result<()> {
        let request = TransferRequest {
            args: args.to_vec(),
        };
        write_json_line(&mut self.stream, &request).await?;
        let ack: TransferAck = read_json_line(&mut self.stream).await?;
        if !ack.accepted {
            bail!("running instance refused the invocation");
        }
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
struct TransferRequest {
    args: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
struct TransferAck {
    accepted: bool,
}

async fn write_json_line<S, T>(stream: &mut S, value: &T) -> Result<()>
where
    S: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut line = serde_json::to_vec(value).context("cannot encode transfer message")?;
    line.push(b'\n');
    stream.write_all(&line).await.context("cannot send transfer message")?;
    stream.flush().await.context("cannot send transfer message")?;
    Ok(())
}

async fn read_json_line<S, T>(stream: &mut S) -> Result<T>
where
    S: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut reader = BufReader::new(stream).take(MAX_LINE_BYTES);
    let mut line = String::new();
    let read = reader
        .read_line(&mut line)
        .await
        .context("cannot read transfer message")?;
    if read == 0 {
        bail!("connection closed before a message arrived");
    }
    serde_json::from_str(line.trim_end()).context("malformed transfer message")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    /// Temp dirs are unique, so their names double as unique scope names (the directory
    /// itself is ignored on Windows).
    fn unique_scope(dir: &Path, tag: &str) -> InstanceScope {
        let suffix = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        InstanceScope::new(&format!("t-{}-{}", tag, suffix)).with_dir(dir)
    }

    #[test]
    fn scope_names_are_sanitized() {
        assert_eq!(InstanceScope::new("my overseer/1").name(), "my_overseer_1");
        assert_eq!(InstanceScope::new("").name(), "cgb-overseer");
        assert!(InstanceScope::new("a.b-c_d").socket_path().ends_with("a.b-c_d.sock"));
    }

    #[tokio::test]
    async fn json_lines_round_trip_over_a_pipe() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        let request = TransferRequest {
            args: vec!["--open=foo.txt".to_string(), "with space".to_string()],
        };
        write_json_line(&mut client, &request).await.unwrap();
        let received: TransferRequest = read_json_line(&mut server).await.unwrap();
        assert_eq!(received, request);
    }

    #[tokio::test]
    async fn garbage_is_rejected() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        client.write_all(b"not json\n").await.unwrap();
        assert!(read_json_line::<_, TransferRequest>(&mut server).await.is_err());
        drop(client);
        assert!(read_json_line::<_, TransferRequest>(&mut server).await.is_err());
    }

    #[tokio::test]
    async fn only_the_first_process_is_first() {
        let dir = tempfile::tempdir().unwrap();
        let scope = unique_scope(dir.path(), "first");

        let first = SingleInstanceGuard::new(scope.clone()).try_acquire().await.unwrap();
        assert!(matches!(first, Acquired::First(_)));

        for _ in 0..3 {
            let later = SingleInstanceGuard::new(scope.clone()).try_acquire().await.unwrap();
            assert!(matches!(later, Acquired::Subsequent(_)));
        }
        drop(first);
    }

    #[tokio::test]
    async fn transferred_args_reach_the_first_instance() {
        let dir = tempfile::tempdir().unwrap();
        let scope = unique_scope(dir.path(), "transfer");

        let Acquired::First(primary) = SingleInstanceGuard::new(scope.clone()).try_acquire().await.unwrap() else {
            panic!("expected to be first");
        };
        let (tx, mut rx) = mpsc::unbounded_channel();
        let server = tokio::spawn(primary.on_transfer(move |args| {
            let _ = tx.send(args);
        }));

        for batch in [vec!["--open=a.txt"], vec!["--bad=%%%", "--shutdown"]] {
            let args: Vec<String> = batch.iter().map(|s| s.to_string()).collect();
            let Acquired::Subsequent(channel) = SingleInstanceGuard::new(scope.clone()).try_acquire().await.unwrap() else {
                panic!("expected a running instance");
            };
            channel.transfer(&args).await.unwrap();
            assert_eq!(rx.recv().await.unwrap(), args);
        }

        server.abort();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stale_socket_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let scope = unique_scope(dir.path(), "stale");
        // A crashed instance leaves its socket file behind with nobody listening on it.
        drop(std::os::unix::net::UnixListener::bind(scope.socket_path()).unwrap());
        assert!(scope.socket_path().exists());

        let acquired = SingleInstanceGuard::new(scope).try_acquire().await.unwrap();
        assert!(matches!(acquired, Acquired::First(_)));
    }

    #[cfg(unix)]
    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn contenders_racing_on_a_stale_socket_elect_one_first() {
        let dir = tempfile::tempdir().unwrap();
        let scope = unique_scope(dir.path(), "race");

        for round in 0..50 {
            drop(std::os::unix::net::UnixListener::bind(scope.socket_path()).unwrap());

            let contenders: Vec<_> = (0..32)
                .map(|_| {
                    let scope = scope.clone();
                    tokio::spawn(async move { SingleInstanceGuard::new(scope).try_acquire().await })
                })
                .collect();
            let mut claims = Vec::new();
            for contender in contenders {
                claims.push(contender.await.unwrap().unwrap());
            }

            let firsts = claims.iter().filter(|c| matches!(c, Acquired::First(_))).count();
            assert_eq!(firsts, 1, "round {}: exactly one contender owns the scope", round);
            // The owner removes the socket file, leaving a clean path for the next round.
            drop(claims);
            assert!(!scope.socket_path().exists());
        }
    }
}
