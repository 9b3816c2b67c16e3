use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
    sync::{Arc, RwLock},
};

use tokio::sync::watch;
use tracing::{debug, warn};

use crate::error::{Result, StoryforgeError};

/// Opaque API secret. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(secret: impl Into<String>) -> Result<Self> {
        let secret = secret.into().trim().to_string();
        if secret.is_empty() {
            return Err(StoryforgeError::invalid_input("API key is empty"));
        }
        Ok(Self(secret))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ApiKey(***)")
    }
}

/// Persistence boundary for the single active credential
pub trait CredentialStore: Send + Sync {
    fn save(&self, key: &ApiKey) -> Result<()>;
    fn get(&self) -> Result<Option<ApiKey>>;
    fn remove(&self) -> Result<()>;
    fn exists(&self) -> bool;
}

#[derive(Default)]
pub struct MemoryCredentialStore {
    value: RwLock<Option<ApiKey>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key(key: ApiKey) -> Self {
        Self {
            value: RwLock::new(Some(key)),
        }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn save(&self, key: &ApiKey) -> Result<()> {
        *self.value.write().unwrap_or_else(|e| e.into_inner()) = Some(key.clone());
        Ok(())
    }

    fn get(&self) -> Result<Option<ApiKey>> {
        Ok(self.value.read().unwrap_or_else(|e| e.into_inner()).clone())
    }

    fn remove(&self) -> Result<()> {
        *self.value.write().unwrap_or_else(|e| e.into_inner()) = None;
        Ok(())
    }

    fn exists(&self) -> bool {
        self.value
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }
}

/// Stores the key in a private file under the user's config directory
pub struct FileCredentialStore {
    path: PathBuf,
    lock: RwLock<()>,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: RwLock::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_private(&self, contents: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut options = fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let mut file = options.open(&self.path)?;
        // mode() only applies on creation
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.set_permissions(fs::Permissions::from_mode(0o600))?;
        }
        file.write_all(contents.as_bytes())?;
        Ok(())
    }
}

impl CredentialStore for FileCredentialStore {
    fn save(&self, key: &ApiKey) -> Result<()> {
        let _guard = self.lock.write().unwrap_or_else(|e| e.into_inner());
        self.write_private(key.expose())?;
        debug!(path = %self.path.display(), "credential saved");
        Ok(())
    }

    fn get(&self) -> Result<Option<ApiKey>> {
        let _guard = self.lock.read().unwrap_or_else(|e| e.into_inner());
        match fs::read_to_string(&self.path) {
            Ok(contents) if contents.trim().is_empty() => Ok(None),
            Ok(contents) => ApiKey::new(contents).map(Some),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn remove(&self) -> Result<()> {
        let _guard = self.lock.write().unwrap_or_else(|e| e.into_inner());
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// True only when `get` would return a usable key
    fn exists(&self) -> bool {
        matches!(self.get(), Ok(Some(_)))
    }
}

/// Precondition check run before every top-level generation flow.
///
/// A failed check bumps the prompt counter so the front end can ask the user
/// for a key; it is never an error.
#[derive(Clone)]
pub struct CredentialGate {
    store: Arc<dyn CredentialStore>,
    prompts: Arc<watch::Sender<u64>>,
}

impl CredentialGate {
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        let (prompts, _) = watch::channel(0);
        Self {
            store,
            prompts: Arc::new(prompts),
        }
    }

    pub fn has_credential(&self) -> bool {
        self.store.exists()
    }

    pub fn ensure(&self) -> bool {
        if self.has_credential() {
            return true;
        }

        warn!("no API key configured, requesting setup");
        self.prompts.send_modify(|count| *count += 1);
        false
    }

    /// Receives the number of times a credential has been requested
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.prompts.subscribe()
    }

    pub fn prompt_count(&self) -> u64 {
        *self.prompts.borrow()
    }

    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.store
    }
}
