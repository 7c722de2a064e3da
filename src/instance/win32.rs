use std::io;
use std::time::Duration;
use anyhow::{Context, Result, bail};
use log::debug;
use tokio::net::windows::named_pipe::{ClientOptions, NamedPipeClient, NamedPipeServer, ServerOptions};
use windows::Win32::Foundation::{CloseHandle, ERROR_ALREADY_EXISTS, GetLastError, HANDLE};
use windows::Win32::System::Threading::CreateMutexW;
use windows::core::HSTRING;

use super::InstanceScope;

/// `ERROR_PIPE_BUSY`: every server instance of the pipe is currently connected.
const ERROR_PIPE_BUSY: i32 = 231;
/// Connect rounds while the first instance is still creating (or recycling) its pipe.
const CONNECT_ATTEMPTS: usize = 40;
const RETRY_DELAY: Duration = Duration::from_millis(25);

pub(super) type ClientStream = NamedPipeClient;
pub(super) type ServerStream = NamedPipeServer;

pub(super) enum Claim {
    Owner(Listener),
    Taken(ClientStream),
}

/// Owned named mutex. Stored as a raw value so the listener stays `Send`.
struct ScopeMutex {
    raw: isize,
}

impl ScopeMutex {
    /// Creates the named mutex; `None` if another process already owns the name.
    fn create(name: &str) -> Result<Option<Self>> {
        // Not initially owned: the handle's existence is the claim, not ownership of the mutex.
        let handle = unsafe { CreateMutexW(None, false, &HSTRING::from(name)) }
            .with_context(|| format!("CreateMutexW failed for {}", name))?;
        // CreateMutexW opens an existing mutex successfully and only reports it here.
        if unsafe { GetLastError() } == ERROR_ALREADY_EXISTS {
            unsafe {
                let _ = CloseHandle(handle);
            }
            return Ok(None);
        }
        Ok(Some(Self {
            raw: handle.0 as isize,
        }))
    }
}

impl Drop for ScopeMutex {
    fn drop(&mut self) {
        // The name disappears with its last handle, freeing the scope for the next launch.
        unsafe {
            let _ = CloseHandle(HANDLE(self.raw as *mut _));
        }
    }
}

/// The scope mutex plus the next pipe server instance waiting for a client.
pub(super) struct Listener {
    pipe_name: String,
    next: NamedPipeServer,
    _mutex: ScopeMutex,
}

impl Listener {
    pub(super) async fn accept(&mut self) -> io::Result<ServerStream> {
        self.next.connect().await?;
        // A fresh instance has to exist before the connected one is handed out, otherwise a
        // client arriving in between would find no pipe.
        let fresh = ServerOptions::new().create(&self.pipe_name)?;
        Ok(std::mem::replace(&mut self.next, fresh))
    }
}

fn mutex_name(scope: &InstanceScope) -> String {
    let namespace = if scope.is_machine_wide() { "Global" } else { "Local" };
    format!("{}\\{}", namespace, scope.name())
}

fn pipe_name(scope: &InstanceScope) -> String {
    format!(r"\\.\pipe\{}", scope.name())
}

pub(super) async fn acquire(scope: &InstanceScope) -> Result<Claim> {
    let pipe_name = pipe_name(scope);

    if let Some(mutex) = ScopeMutex::create(&mutex_name(scope))? {
        // `first_pipe_instance` fails if some other process already squats on the pipe name.
        let next = ServerOptions::new()
            .first_pipe_instance(true)
            .create(&pipe_name)
            .with_context(|| format!("cannot create pipe {}", pipe_name))?;
        return Ok(Claim::Owner(Listener {
            pipe_name,
            next,
            _mutex: mutex,
        }));
    }

    // The mutex exists, so an instance is running; its pipe may just not be up yet.
    for _ in 0..CONNECT_ATTEMPTS {
        match ClientOptions::new().open(&pipe_name) {
            Ok(client) => return Ok(Claim::Taken(client)),
            Err(err)
                if err.raw_os_error() == Some(ERROR_PIPE_BUSY)
                    || err.kind() == io::ErrorKind::NotFound =>
            {
                debug!("Pipe {} not ready yet: {}", pipe_name, err);
                tokio::time::sleep(RETRY_DELAY).await;
            }
            Err(err) => {
                return Err(err).with_context(|| format!("cannot open pipe {}", pipe_name));
            }
        }
    }

    bail!("an instance holds {} but its pipe never became available", mutex_name(scope))
}
