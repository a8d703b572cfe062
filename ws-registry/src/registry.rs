use crate::error::{RegistryError, Result};
use crate::kind::{AgentServiceKind, PluginKind, ProvisionerKind};
use crate::orphans;
use crate::process::{self, PluginProcess};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, warn};
use ws_platform::fs::{is_setup_locked, make_executable, write_setup_lock};
use ws_platform::plugin_name_from_path;

pub type ProvisionerRegistry = PluginRegistry<ProvisionerKind>;
pub type AgentServiceRegistry = PluginRegistry<AgentServiceKind>;

/// Default bound on how long a plugin may take to print its handshake.
pub const DEFAULT_START_TIMEOUT: Duration = Duration::from_secs(30);

/// A registered, initialized plugin.
pub struct PluginHandle<K: PluginKind> {
    name: String,
    path: PathBuf,
    install_dir: PathBuf,
    info: K::Info,
    client: Arc<K::Client>,
    process: PluginProcess,
}

impl<K: PluginKind> PluginHandle<K> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn install_dir(&self) -> &Path {
        &self.install_dir
    }

    /// What the plugin reported about itself at registration.
    pub fn info(&self) -> &K::Info {
        &self.info
    }

    pub fn client(&self) -> &Arc<K::Client> {
        &self.client
    }

    pub fn pid(&self) -> Option<u32> {
        self.process.pid()
    }
}

impl<K: PluginKind> fmt::Debug for PluginHandle<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginHandle")
            .field("name", &self.name)
            .field("path", &self.path)
            .field("pid", &self.process.pid())
            .field("info", &self.info)
            .finish_non_exhaustive()
    }
}

enum Slot<K: PluginKind> {
    /// A registration holding this token is in flight.
    Spawning(u64),
    Ready(Arc<PluginHandle<K>>),
}

/// Running plugins of one kind, at most one process per name.
///
/// Lifecycle per name: unregistered, spawning, ready, terminated. Only ready
/// plugins are visible to [`PluginRegistry::get`]; nothing is spawned on
/// demand.
pub struct PluginRegistry<K: PluginKind> {
    kind: K,
    base_path: PathBuf,
    start_timeout: Duration,
    slots: Mutex<HashMap<String, Slot<K>>>,
    next_token: AtomicU64,
}

impl<K: PluginKind> PluginRegistry<K> {
    /// `base_path` is the kind's plugin directory (`<plugins>/provisioners`).
    pub fn new(kind: K, base_path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            base_path: base_path.into(),
            start_timeout: DEFAULT_START_TIMEOUT,
            slots: Mutex::new(HashMap::new()),
            next_token: AtomicU64::new(1),
        }
    }

    pub fn with_start_timeout(mut self, timeout: Duration) -> Self {
        self.start_timeout = timeout;
        self
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub fn kind(&self) -> &K {
        &self.kind
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<String, Slot<K>>> {
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Start the plugin binary at `path`, validate its handshake and
    /// initialize it. The plugin name is the binary's file stem.
    ///
    /// Fails with [`RegistryError::AlreadyRegistered`] if the name has a live
    /// or in-flight registration. On any failure the child is killed and no
    /// handle is left behind.
    ///
    /// The kind's first-run setup runs only when the install directory has
    /// no setup lock yet.
    pub async fn register(&self, path: &Path) -> Result<Arc<PluginHandle<K>>> {
        self.register_with(path, false).await
    }

    /// Like [`register`](Self::register) for a plugin the user installed by
    /// hand: first-run setup runs even if a setup lock is present.
    pub async fn register_manual_install(&self, path: &Path) -> Result<Arc<PluginHandle<K>>> {
        self.register_with(path, true).await
    }

    async fn register_with(&self, path: &Path, force_setup: bool) -> Result<Arc<PluginHandle<K>>> {
        let name =
            plugin_name_from_path(path).ok_or_else(|| RegistryError::InvalidPath(path.to_path_buf()))?;
        let install_dir = path
            .parent()
            .ok_or_else(|| RegistryError::InvalidPath(path.to_path_buf()))?
            .to_path_buf();

        let mut reservation = self.reserve(&name)?;
        info!(kind = self.kind.label(), plugin = %name, path = %path.display(), "Registering plugin");

        let handle = Arc::new(self.start(&name, path, install_dir, force_setup).await?);

        let promoted = {
            let mut slots = self.slots();
            match slots.get(&name) {
                Some(Slot::Spawning(token)) if *token == reservation.token => {
                    slots.insert(name.clone(), Slot::Ready(handle.clone()));
                    true
                }
                _ => false,
            }
        };

        if !promoted {
            handle.process.terminate().await;
            return Err(RegistryError::Cancelled { name });
        }

        reservation.committed = true;
        info!(kind = self.kind.label(), plugin = %name, info = ?handle.info, "Plugin ready");
        Ok(handle)
    }

    fn reserve(&self, name: &str) -> Result<Reservation<'_, K>> {
        let mut slots = self.slots();
        if slots.contains_key(name) {
            return Err(RegistryError::AlreadyRegistered {
                kind: self.kind.label(),
                name: name.to_string(),
            });
        }
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        slots.insert(name.to_string(), Slot::Spawning(token));
        Ok(Reservation {
            registry: self,
            name: name.to_string(),
            token,
            committed: false,
        })
    }

    async fn start(
        &self,
        name: &str,
        path: &Path,
        install_dir: PathBuf,
        force_setup: bool,
    ) -> Result<PluginHandle<K>> {
        make_executable(path).map_err(|source| RegistryError::Spawn {
            name: name.to_string(),
            source,
        })?;

        let launched =
            process::launch(name, path, &self.kind.handshake(), self.start_timeout).await?;
        let client = self.kind.client(launched.connection);

        let info = match self.prepare(name, &client, &install_dir, force_setup).await {
            Ok(info) => info,
            Err(e) => {
                warn!(plugin = %name, error = %e, "Plugin initialization failed");
                launched.process.terminate().await;
                return Err(e);
            }
        };

        Ok(PluginHandle {
            name: name.to_string(),
            path: path.to_path_buf(),
            install_dir,
            info,
            client: Arc::new(client),
            process: launched.process,
        })
    }

    async fn prepare(
        &self,
        name: &str,
        client: &K::Client,
        install_dir: &Path,
        force_setup: bool,
    ) -> Result<K::Info> {
        let info = self
            .kind
            .initialize(client, install_dir)
            .await
            .map_err(|source| RegistryError::Initialize {
                name: name.to_string(),
                source,
            })?;

        if force_setup || !is_setup_locked(install_dir) {
            debug!(kind = self.kind.label(), plugin = %name, "Running first-run setup");
            self.kind
                .first_setup(name, client, &info)
                .await
                .map_err(|source| RegistryError::Setup {
                    name: name.to_string(),
                    source,
                })?;
            write_setup_lock(install_dir).map_err(|source| RegistryError::Io {
                path: install_dir.to_path_buf(),
                source,
            })?;
        }
        Ok(info)
    }

    /// The live handle for `name`. Never spawns.
    pub fn get(&self, name: &str) -> Result<Arc<PluginHandle<K>>> {
        match self.slots().get(name) {
            Some(Slot::Ready(handle)) => Ok(handle.clone()),
            _ => Err(self.not_found(name)),
        }
    }

    pub fn info(&self, name: &str) -> Result<K::Info> {
        self.get(name).map(|handle| handle.info.clone())
    }

    /// Names of all ready plugins, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .slots()
            .iter()
            .filter(|(_, slot)| matches!(slot, Slot::Ready(_)))
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    pub fn list(&self) -> Vec<Arc<PluginHandle<K>>> {
        let mut handles: Vec<Arc<PluginHandle<K>>> = self
            .slots()
            .values()
            .filter_map(|slot| match slot {
                Slot::Ready(handle) => Some(handle.clone()),
                Slot::Spawning(_) => None,
            })
            .collect();
        handles.sort_by(|a, b| a.name.cmp(&b.name));
        handles
    }

    /// Kill the plugin's process, remove its install directory and forget it.
    ///
    /// The directory is left holding only the setup lock, which keeps a
    /// default plugin from being installed again.
    pub async fn unregister(&self, name: &str) -> Result<()> {
        let handle = {
            let mut slots = self.slots();
            match slots.remove(name) {
                Some(Slot::Ready(handle)) => handle,
                Some(spawning @ Slot::Spawning(_)) => {
                    slots.insert(name.to_string(), spawning);
                    return Err(self.not_found(name));
                }
                None => return Err(self.not_found(name)),
            }
        };

        handle.process.terminate().await;
        remove_dir_if_present(&handle.install_dir).await?;
        write_setup_lock(&handle.install_dir).map_err(|source| RegistryError::Io {
            path: handle.install_dir.clone(),
            source,
        })?;
        info!(kind = self.kind.label(), plugin = %name, "Plugin unregistered");
        Ok(())
    }

    /// Kill every plugin process and forget all handles. Install
    /// directories are left in place. In-flight registrations are cancelled.
    pub async fn shutdown(&self) {
        let drained: Vec<(String, Slot<K>)> = self.slots().drain().collect();
        for (name, slot) in drained {
            if let Slot::Ready(handle) = slot {
                debug!(plugin = %name, "Stopping plugin");
                handle.process.terminate().await;
            }
        }
    }

    /// Unregister every plugin and remove the kind's base directory, setup
    /// locks included.
    pub async fn purge(&self) -> Result<()> {
        for name in self.names() {
            match self.unregister(&name).await {
                Ok(()) | Err(RegistryError::NotFound { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        remove_dir_if_present(&self.base_path).await
    }

    /// Kill processes left running from a previous server run whose
    /// executable lives under this registry's base directory.
    pub fn terminate_orphans(&self) -> usize {
        orphans::terminate_processes_under(&self.base_path)
    }

    fn not_found(&self, name: &str) -> RegistryError {
        RegistryError::NotFound {
            kind: self.kind.label(),
            name: name.to_string(),
        }
    }
}

/// Holds a `Spawning` slot; releases it on drop unless committed, so a
/// failed or cancelled registration never leaves the name reserved.
struct Reservation<'a, K: PluginKind> {
    registry: &'a PluginRegistry<K>,
    name: String,
    token: u64,
    committed: bool,
}

impl<K: PluginKind> Drop for Reservation<'_, K> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        let mut slots = self.registry.slots();
        if matches!(slots.get(&self.name), Some(Slot::Spawning(token)) if *token == self.token) {
            slots.remove(&self.name);
        }
    }
}

async fn remove_dir_if_present(path: &Path) -> Result<()> {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(RegistryError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}
