//! Server registry: which servers exist and which network each belongs to.
//!
//! Loaded from a JSON file of the form
//! `{ "networks": { "<name>": { "token": "...", "servers": ["..."] } } }`.
//! A missing file is replaced by a default one. `reload()` re-reads the file
//! in place; callers holding an `Arc<NetworkRegistry>` see the new contents.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard};

use rconq_auth::{CredentialSource, ServerCredential};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_NETWORK: &str = "default";
pub const DEFAULT_NETWORK_TOKEN: &str = "CHANGE_ME_default_network_token";
pub const DEFAULT_SERVERS: [&str; 3] = ["lobby", "skyblock-1", "survival-1"];

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("server {server} is listed in both {first} and {second}")]
    DuplicateServer {
        server: String,
        first: String,
        second: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub token: String,
    #[serde(default)]
    pub servers: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryFile {
    #[serde(default)]
    pub networks: BTreeMap<String, NetworkConfig>,
}

impl RegistryFile {
    pub fn default_file() -> Self {
        let mut networks = BTreeMap::new();
        networks.insert(
            DEFAULT_NETWORK.to_string(),
            NetworkConfig {
                token: DEFAULT_NETWORK_TOKEN.to_string(),
                servers: DEFAULT_SERVERS.iter().map(|s| s.to_string()).collect(),
            },
        );
        Self { networks }
    }
}

/// Snapshot of one network, as exposed to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetworkSummary {
    pub network: String,
    pub servers: Vec<String>,
}

#[derive(Debug, Default)]
struct State {
    networks: BTreeMap<String, NetworkConfig>,
    server_to_network: HashMap<String, String>,
}

impl State {
    fn build(file: RegistryFile) -> Result<Self, RegistryError> {
        let mut server_to_network = HashMap::new();
        for (network, config) in &file.networks {
            for server in &config.servers {
                if let Some(first) = server_to_network.insert(server.clone(), network.clone()) {
                    return Err(RegistryError::DuplicateServer {
                        server: server.clone(),
                        first,
                        second: network.clone(),
                    });
                }
            }
        }
        Ok(Self {
            networks: file.networks,
            server_to_network,
        })
    }
}

#[derive(Debug)]
pub struct NetworkRegistry {
    path: Option<PathBuf>,
    master_token: String,
    state: RwLock<State>,
}

impl NetworkRegistry {
    /// Load from `path`, writing the default file first if it does not exist.
    pub fn load(path: impl AsRef<Path>, master_token: impl Into<String>) -> Result<Self, RegistryError> {
        let path = path.as_ref().to_path_buf();
        let state = State::build(read_or_create(&path)?)?;
        let registry = Self {
            path: Some(path),
            master_token: master_token.into(),
            state: RwLock::new(state),
        };
        tracing::info!(
            networks = registry.networks().len(),
            servers = registry.server_names().len(),
            "server registry loaded"
        );
        Ok(registry)
    }

    /// Registry that is not backed by a file (`reload` keeps the contents).
    pub fn from_file(file: RegistryFile, master_token: impl Into<String>) -> Result<Self, RegistryError> {
        Ok(Self {
            path: None,
            master_token: master_token.into(),
            state: RwLock::new(State::build(file)?),
        })
    }

    fn read(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Re-read the backing file. On error the previous contents stay active.
    pub fn reload(&self) -> Result<Vec<NetworkSummary>, RegistryError> {
        if let Some(path) = &self.path {
            let state = State::build(read_or_create(path)?)?;
            *self.state.write().unwrap_or_else(|e| e.into_inner()) = state;
            tracing::info!(path = %path.display(), "server registry reloaded");
        }
        Ok(self.networks())
    }

    pub fn is_known(&self, server: &str) -> bool {
        self.read().server_to_network.contains_key(server)
    }

    pub fn network_of(&self, server: &str) -> Option<String> {
        self.read().server_to_network.get(server).cloned()
    }

    /// Members of `network`, in file order. Empty when the network is unknown.
    pub fn servers_in(&self, network: &str) -> Vec<String> {
        self.read()
            .networks
            .get(network)
            .map(|n| n.servers.clone())
            .unwrap_or_default()
    }

    pub fn networks(&self) -> Vec<NetworkSummary> {
        self.read()
            .networks
            .iter()
            .map(|(name, n)| NetworkSummary {
                network: name.clone(),
                servers: n.servers.clone(),
            })
            .collect()
    }

    pub fn server_names(&self) -> Vec<String> {
        let state = self.read();
        state
            .networks
            .values()
            .flat_map(|n| n.servers.iter().cloned())
            .collect()
    }
}

impl CredentialSource for NetworkRegistry {
    fn master_token(&self) -> &str {
        &self.master_token
    }

    fn server_credential(&self, server: &str) -> Option<ServerCredential> {
        let state = self.read();
        let network = state.server_to_network.get(server)?;
        let config = state.networks.get(network)?;
        Some(ServerCredential {
            network: network.clone(),
            token: config.token.clone(),
        })
    }
}

fn read_or_create(path: &Path) -> Result<RegistryFile, RegistryError> {
    let shown = path.display().to_string();
    if !path.exists() {
        let file = RegistryFile::default_file();
        let body = serde_json::to_string_pretty(&file).map_err(|source| RegistryError::Parse {
            path: shown.clone(),
            source,
        })?;
        std::fs::write(path, body).map_err(|source| RegistryError::Io {
            path: shown.clone(),
            source,
        })?;
        tracing::warn!(path = %shown, "servers file not found; wrote default network configuration");
        return Ok(file);
    }

    let raw = std::fs::read_to_string(path).map_err(|source| RegistryError::Io {
        path: shown.clone(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| RegistryError::Parse {
        path: shown,
        source,
    })
}
