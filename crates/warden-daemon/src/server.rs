// server.rs — Unix-socket listener and per-connection sessions.

use std::io;
use std::path::{Path, PathBuf};

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::DaemonError;
use crate::protocol::{handle_line, ShutdownHandle};

/// Socket file mode: owner read/write only.
const SOCKET_MODE: u32 = 0o600;

#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// Filesystem path of the listening socket.
    pub socket_path: PathBuf,
    /// Daemon state directory; created if missing.
    pub state_dir: PathBuf,
}

impl DaemonConfig {
    pub fn new(socket_path: impl Into<PathBuf>, state_dir: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            state_dir: state_dir.into(),
        }
    }
}

pub struct Daemon {
    config: DaemonConfig,
    listener: UnixListener,
    shutdown: ShutdownHandle,
}

impl Daemon {
    /// Prepare the state directory and bind the socket. Must be called from
    /// inside a tokio runtime.
    pub fn bind(config: DaemonConfig) -> Result<Self, DaemonError> {
        std::fs::create_dir_all(&config.state_dir).map_err(|source| DaemonError::Io {
            path: config.state_dir.clone(),
            source,
        })?;
        if let Some(parent) = config.socket_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|source| DaemonError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }
        remove_stale_socket(&config.socket_path)?;

        let listener = UnixListener::bind(&config.socket_path).map_err(|source| DaemonError::Bind {
            path: config.socket_path.clone(),
            source,
        })?;
        set_socket_permissions(&config.socket_path)?;

        let (tx, _rx) = watch::channel(false);
        info!(socket = %config.socket_path.display(), state = %config.state_dir.display(), "daemon bound");
        Ok(Self {
            config,
            listener,
            shutdown: ShutdownHandle::new(tx),
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.config.socket_path
    }

    /// A handle that stops [`Daemon::run`] from outside a session.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Accept connections until a shutdown is requested, then close the
    /// listener and remove the socket file.
    pub async fn run(self) -> Result<(), DaemonError> {
        let mut stop = self.shutdown.subscribe();
        loop {
            if *stop.borrow() {
                break;
            }
            tokio::select! {
                changed = stop.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                accepted = self.listener.accept() => {
                    let (stream, _addr) = accepted.map_err(DaemonError::Accept)?;
                    let shutdown = self.shutdown.clone();
                    tokio::spawn(async move {
                        if let Err(e) = serve_session(stream, shutdown).await {
                            warn!("session ended with error: {}", e);
                        }
                    });
                }
            }
        }
        info!(socket = %self.config.socket_path.display(), "daemon shutting down");
        Ok(())
    }
}

impl Drop for Daemon {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.config.socket_path) {
            Ok(()) => debug!(socket = %self.config.socket_path.display(), "removed socket file"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("failed to remove socket file: {}", e),
        }
    }
}

/// One connection: read request lines, answer each with one response line.
async fn serve_session(stream: UnixStream, shutdown: ShutdownHandle) -> io::Result<()> {
    debug!("session opened");
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let response = handle_line(&line, &shutdown);
        let mut encoded = serde_json::to_vec(&response)?;
        encoded.push(b'\n');
        writer.write_all(&encoded).await?;
        writer.flush().await?;
    }
    debug!("session closed");
    Ok(())
}

fn remove_stale_socket(path: &Path) -> Result<(), DaemonError> {
    let metadata = match std::fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(source) => {
            return Err(DaemonError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    #[cfg(unix)]
    {
        use std::os::unix::fs::FileTypeExt;
        if !metadata.file_type().is_socket() {
            return Err(DaemonError::NotASocket {
                path: path.to_path_buf(),
            });
        }
    }
    #[cfg(not(unix))]
    let _ = metadata;
    std::fs::remove_file(path).map_err(|source| DaemonError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    debug!(path = %path.display(), "removed stale socket");
    Ok(())
}

#[cfg(unix)]
fn set_socket_permissions(path: &Path) -> Result<(), DaemonError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(SOCKET_MODE)).map_err(|source| {
        DaemonError::Io {
            path: path.to_path_buf(),
            source,
        }
    })
}

#[cfg(not(unix))]
fn set_socket_permissions(_path: &Path) -> Result<(), DaemonError> {
    let _ = SOCKET_MODE;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::os::unix::fs::PermissionsExt;

    use tempfile::TempDir;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    use super::*;
    use crate::protocol::Response;

    fn config(dir: &TempDir) -> DaemonConfig {
        DaemonConfig::new(dir.path().join("warden.sock"), dir.path().join("state"))
    }

    async fn roundtrip(path: &Path, line: &str) -> Response {
        let stream = UnixStream::connect(path).await.unwrap();
        let (reader, mut writer) = stream.into_split();
        writer.write_all(format!("{}\n", line).as_bytes()).await.unwrap();
        let mut lines = BufReader::new(reader).lines();
        let reply = lines.next_line().await.unwrap().unwrap();
        serde_json::from_str(&reply).unwrap()
    }

    #[tokio::test]
    async fn binds_with_owner_only_permissions() {
        let dir = TempDir::new().unwrap();
        let daemon = Daemon::bind(config(&dir)).unwrap();
        let mode = std::fs::metadata(daemon.socket_path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, SOCKET_MODE);
        assert!(dir.path().join("state").is_dir());
    }

    #[tokio::test]
    async fn replaces_a_stale_socket() {
        let dir = TempDir::new().unwrap();
        let first = Daemon::bind(config(&dir)).unwrap();
        // Leak the file: forget skips Drop, as a crashed daemon would.
        std::mem::forget(first);
        assert!(dir.path().join("warden.sock").exists());
        let second = Daemon::bind(config(&dir));
        assert!(second.is_ok());
    }

    #[tokio::test]
    async fn refuses_to_remove_a_regular_file() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("warden.sock"), b"not a socket").unwrap();
        let err = Daemon::bind(config(&dir)).err().unwrap();
        assert!(matches!(err, DaemonError::NotASocket { .. }));
    }

    #[tokio::test]
    async fn private_shutdown_stops_the_daemon() {
        let dir = TempDir::new().unwrap();
        let daemon = Daemon::bind(config(&dir)).unwrap();
        let path = daemon.socket_path().to_path_buf();
        let task = tokio::spawn(daemon.run());

        let public = roundtrip(&path, r#"{"id":1,"facet":"public","method":"shutdown"}"#).await;
        assert!(public.error.is_some());

        let private = roundtrip(&path, r#"{"id":2,"facet":"private","method":"shutdown"}"#).await;
        assert_eq!(private.id, Some(2));
        assert!(private.error.is_none());

        task.await.unwrap().unwrap();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn external_handle_stops_the_daemon() {
        let dir = TempDir::new().unwrap();
        let daemon = Daemon::bind(config(&dir)).unwrap();
        let handle = daemon.shutdown_handle();
        let task = tokio::spawn(daemon.run());
        handle.request();
        task.await.unwrap().unwrap();
        assert!(!dir.path().join("warden.sock").exists());
    }
}
