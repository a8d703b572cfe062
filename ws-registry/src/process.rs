//! Launching a plugin binary and reading its handshake.

use crate::error::{RegistryError, Result};
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader, Lines};
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use ws_rpc::{Connection, HandshakeConfig, HandshakeLine};

/// A running plugin child process and its log forwarders.
#[derive(Debug)]
pub struct PluginProcess {
    child: Mutex<Child>,
    pid: Option<u32>,
    forwarders: Vec<JoinHandle<()>>,
}

impl PluginProcess {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Kill the child and reap it. Safe to call more than once.
    pub async fn terminate(&self) {
        let mut child = self.child.lock().await;
        match child.try_wait() {
            Ok(Some(status)) => {
                debug!(pid = ?self.pid, %status, "Plugin process already exited");
                return;
            }
            Ok(None) => {}
            Err(e) => warn!(pid = ?self.pid, error = %e, "Failed to query plugin process"),
        }
        if let Err(e) = child.kill().await {
            warn!(pid = ?self.pid, error = %e, "Failed to kill plugin process");
        }
    }
}

impl Drop for PluginProcess {
    fn drop(&mut self) {
        for task in &self.forwarders {
            task.abort();
        }
    }
}

pub(crate) struct Launched {
    pub process: PluginProcess,
    pub connection: Connection,
}

/// Spawn `path`, wait for a valid handshake line and connect to the
/// announced address. The child is killed on every failure path.
pub(crate) async fn launch(
    name: &str,
    path: &Path,
    handshake: &HandshakeConfig,
    start_timeout: Duration,
) -> Result<Launched> {
    let mut command = Command::new(path);
    command
        .env(handshake.magic_cookie_key, handshake.magic_cookie_value)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = path.parent() {
        command.current_dir(dir);
    }

    let mut child = spawn_with_retry(&mut command)
        .await
        .map_err(|source| RegistryError::Spawn {
            name: name.to_string(),
            source,
        })?;
    let pid = child.id();
    debug!(plugin = %name, ?pid, "Plugin process spawned");

    let mut forwarders = Vec::with_capacity(2);
    if let Some(stderr) = child.stderr.take() {
        forwarders.push(forward_output(name, "stderr", BufReader::new(stderr).lines()));
    }

    let Some(stdout) = child.stdout.take() else {
        let _ = child.kill().await;
        return Err(RegistryError::Spawn {
            name: name.to_string(),
            source: std::io::Error::other("plugin stdout was not captured"),
        });
    };
    let mut stdout = BufReader::new(stdout).lines();

    let connected = async {
        let line = read_handshake(name, &mut child, &mut stdout, start_timeout).await?;
        line.validate(handshake)
            .map_err(|source| RegistryError::Handshake {
                name: name.to_string(),
                source,
            })?;
        debug!(plugin = %name, network = %line.network, address = %line.address, "Handshake accepted");

        Connection::connect(line.network, &line.address)
            .await
            .map_err(|source| RegistryError::Connect {
                name: name.to_string(),
                source,
            })
    }
    .await;

    match connected {
        Ok(connection) => {
            forwarders.push(forward_output(name, "stdout", stdout));
            Ok(Launched {
                process: PluginProcess {
                    child: Mutex::new(child),
                    pid,
                    forwarders,
                },
                connection,
            })
        }
        Err(e) => {
            let _ = child.kill().await;
            Err(e)
        }
    }
}

/// Exec can fail with ETXTBSY right after a binary was written if another
/// thread forked while the file was still open for writing.
async fn spawn_with_retry(command: &mut Command) -> std::io::Result<Child> {
    const ETXTBSY: i32 = 26;
    let mut attempts = 0;
    loop {
        match command.spawn() {
            Err(e) if cfg!(target_os = "linux") && e.raw_os_error() == Some(ETXTBSY) && attempts < 5 => {
                attempts += 1;
                tokio::time::sleep(Duration::from_millis(50 * attempts)).await;
            }
            result => return result,
        }
    }
}

async fn read_handshake(
    name: &str,
    child: &mut Child,
    stdout: &mut Lines<BufReader<ChildStdout>>,
    start_timeout: Duration,
) -> Result<HandshakeLine> {
    let line = match tokio::time::timeout(start_timeout, stdout.next_line()).await {
        Err(_) => {
            return Err(RegistryError::HandshakeTimeout {
                name: name.to_string(),
                timeout: start_timeout,
            })
        }
        Ok(Err(source)) => {
            return Err(RegistryError::Spawn {
                name: name.to_string(),
                source,
            })
        }
        Ok(Ok(None)) => {
            let status = match tokio::time::timeout(Duration::from_secs(1), child.wait()).await {
                Ok(Ok(status)) => status.to_string(),
                _ => "stdout closed".to_string(),
            };
            return Err(RegistryError::ExitedBeforeHandshake {
                name: name.to_string(),
                status,
            });
        }
        Ok(Ok(Some(line))) => line,
    };

    line.parse::<HandshakeLine>()
        .map_err(|source| RegistryError::Handshake {
            name: name.to_string(),
            source,
        })
}

/// Re-emit each line a plugin writes as a tracing event tagged with its name.
fn forward_output<R>(name: &str, stream: &'static str, mut lines: Lines<BufReader<R>>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let plugin = name.to_string();
    tokio::spawn(async move {
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => info!(plugin = %plugin, stream, "{line}"),
                Ok(None) => break,
                Err(e) => {
                    debug!(plugin = %plugin, stream, error = %e, "Stopped reading plugin output");
                    break;
                }
            }
        }
    })
}
