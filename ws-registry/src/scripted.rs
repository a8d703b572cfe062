//! Scripted plugin binaries for exercising the registry against real
//! child processes.
//!
//! A scripted plugin reads `behavior.json` from its own directory to decide
//! how to (mis)behave, and appends the name of every successfully handled
//! request to `calls.log` next to it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use ws_provider::mock::{MockAgentService, MockProvisioner, ProvisionerCall};
use ws_provider::{
    AgentService, AgentServiceRequest, AgentServiceServer, Provisioner, ProvisionerRequest,
    ProvisionerServer, AGENT_SERVICE_HANDSHAKE, PROVISIONER_HANDSHAKE,
};
use ws_rpc::{Dispatch, HandshakeConfig, HandshakeLine, Network};

pub const SCRIPT_FILE: &str = "behavior.json";
pub const CALL_LOG_FILE: &str = "calls.log";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Behavior {
    #[default]
    Ok,
    /// Serve over a unix socket instead of TCP.
    Unix,
    BadCookie,
    BadVersion,
    Malformed,
    /// Exit with status 3 before printing anything.
    ExitEarly,
    /// Never print a handshake line.
    Hang,
    FailInit,
    FailPresets,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Script {
    pub behavior: Behavior,
}

impl Script {
    pub fn load(dir: &Path) -> Self {
        std::fs::read(dir.join(SCRIPT_FILE))
            .ok()
            .and_then(|bytes| serde_json::from_slice(&bytes).ok())
            .unwrap_or_default()
    }

    pub fn write(&self, dir: &Path) -> io::Result<()> {
        let json = serde_json::to_vec(self).map_err(io::Error::other)?;
        std::fs::write(dir.join(SCRIPT_FILE), json)
    }
}

/// Lines appended by a scripted plugin in `dir`, oldest first.
pub fn read_call_log(dir: &Path) -> Vec<String> {
    std::fs::read_to_string(dir.join(CALL_LOG_FILE))
        .map(|s| s.lines().map(str::to_string).collect())
        .unwrap_or_default()
}

#[derive(Debug, Clone)]
struct CallLog {
    path: PathBuf,
}

impl CallLog {
    fn append(&self, method: &str) {
        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut file| writeln!(file, "{method}"));
        if let Err(e) = result {
            eprintln!("failed to write call log: {e}");
        }
    }
}

struct Logged<D> {
    inner: D,
    log: CallLog,
}

#[async_trait]
impl<P: Provisioner + 'static> Dispatch for Logged<ProvisionerServer<P>> {
    type Request = ProvisionerRequest;

    async fn dispatch(&self, request: ProvisionerRequest) -> ws_rpc::Result<serde_json::Value> {
        let method = request.method();
        let result = self.inner.dispatch(request).await;
        if result.is_ok() {
            self.log.append(method);
        }
        result
    }
}

#[async_trait]
impl<A: AgentService + 'static> Dispatch for Logged<AgentServiceServer<A>> {
    type Request = AgentServiceRequest;

    async fn dispatch(&self, request: AgentServiceRequest) -> ws_rpc::Result<serde_json::Value> {
        let method = request.method();
        let result = self.inner.dispatch(request).await;
        if result.is_ok() {
            self.log.append(method);
        }
        result
    }
}

fn own_dir() -> io::Result<PathBuf> {
    let exe = std::env::current_exe()?;
    exe.parent()
        .map(Path::to_path_buf)
        .ok_or_else(|| io::Error::other("executable has no parent directory"))
}

/// Run a scripted provisioner; returns the process exit code.
pub async fn run_provisioner() -> i32 {
    let dir = match own_dir() {
        Ok(dir) => dir,
        Err(e) => {
            eprintln!("{e}");
            return 1;
        }
    };
    let script = Script::load(&dir);
    let name = dir
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("scripted")
        .to_string();

    let mock = MockProvisioner::new(name);
    match script.behavior {
        Behavior::FailInit => mock.fail_on(ProvisionerCall::Initialize),
        Behavior::FailPresets => mock.fail_on(ProvisionerCall::GetPresetProfiles),
        _ => {}
    }
    let dispatcher = Logged {
        inner: ProvisionerServer::new(mock),
        log: CallLog {
            path: dir.join(CALL_LOG_FILE),
        },
    };
    run(&PROVISIONER_HANDSHAKE, script.behavior, dispatcher).await
}

/// Run a scripted agent service; returns the process exit code.
pub async fn run_agent_service() -> i32 {
    let dir = match own_dir() {
        Ok(dir) => dir,
        Err(e) => {
            eprintln!("{e}");
            return 1;
        }
    };
    let script = Script::load(&dir);
    let name = dir
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("scripted")
        .to_string();

    let dispatcher = Logged {
        inner: AgentServiceServer::new(MockAgentService::new(name)),
        log: CallLog {
            path: dir.join(CALL_LOG_FILE),
        },
    };
    run(&AGENT_SERVICE_HANDSHAKE, script.behavior, dispatcher).await
}

async fn run<D: Dispatch>(config: &HandshakeConfig, behavior: Behavior, dispatcher: D) -> i32 {
    if !config.cookie_present() {
        eprintln!("{}", ws_rpc::ServeError::NotLaunchedByHost);
        return 1;
    }

    let mut fake = HandshakeLine::announce(config, Network::Tcp, "127.0.0.1:1");
    match behavior {
        Behavior::ExitEarly => return 3,
        Behavior::Hang => park().await,
        Behavior::Malformed => {
            println!("starting up, please wait");
            park().await
        }
        Behavior::BadCookie => {
            fake.cookie = "not-the-right-cookie".to_string();
            println!("{fake}");
            park().await
        }
        Behavior::BadVersion => {
            fake.protocol_version = config.protocol_version + 1;
            println!("{fake}");
            park().await
        }
        Behavior::Ok | Behavior::FailInit | Behavior::FailPresets | Behavior::Unix => {}
    }

    let network = if behavior == Behavior::Unix && cfg!(unix) {
        Network::Unix
    } else {
        Network::Tcp
    };
    match ws_rpc::serve_on(config, network, dispatcher).await {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("{e}");
            1
        }
    }
}

async fn park() -> ! {
    loop {
        tokio::time::sleep(Duration::from_secs(3600)).await;
    }
}
