use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// The credentials the runtime can hold on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySlot {
    /// Direct OpenAI-compatible completions, also used for vision.
    OpenAi,
    /// The model-routing proxy.
    Proxy,
    /// The hosted REST store.
    Store,
    Image,
    Transcription,
}

impl KeySlot {
    pub const ALL: [KeySlot; 5] = [
        KeySlot::OpenAi,
        KeySlot::Proxy,
        KeySlot::Store,
        KeySlot::Image,
        KeySlot::Transcription,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            KeySlot::OpenAi => "openai",
            KeySlot::Proxy => "proxy",
            KeySlot::Store => "store",
            KeySlot::Image => "image",
            KeySlot::Transcription => "transcription",
        }
    }

    /// Environment variable that takes precedence over the stored key.
    pub fn env_var(self) -> &'static str {
        match self {
            KeySlot::OpenAi => "OPENAI_API_KEY",
            KeySlot::Proxy => "COMPANION_PROXY_API_KEY",
            KeySlot::Store => "COMPANION_STORE_API_KEY",
            KeySlot::Image => "COMPANION_IMAGE_API_KEY",
            KeySlot::Transcription => "COMPANION_TRANSCRIPTION_API_KEY",
        }
    }
}

impl fmt::Display for KeySlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeySlot {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_ascii_lowercase();
        KeySlot::ALL
            .into_iter()
            .find(|slot| slot.as_str() == name)
            .ok_or_else(|| {
                let known: Vec<&str> = KeySlot::ALL.iter().map(|s| s.as_str()).collect();
                anyhow::anyhow!("unknown key '{name}': expected one of {}", known.join(", "))
            })
    }
}

/// Owner-only permissions: 0700 for the credentials dir, 0600 for keys.
#[cfg(unix)]
fn restrict(path: &Path, mode: u32) -> anyhow::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
        .map_err(|e| anyhow::anyhow!("failed to chmod {mode:o} {}: {e}", path.display()))
}

#[cfg(not(unix))]
fn restrict(_path: &Path, _mode: u32) -> anyhow::Result<()> {
    Ok(())
}

/// API keys kept as one file per slot under `<state dir>/credentials`.
///
/// The state dir is the directory holding the config file, so pointing
/// `COMPANION_CONFIG` elsewhere moves the keys with it.
pub struct KeyStore {
    dir: PathBuf,
}

impl KeyStore {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: state_dir.into().join("credentials"),
        }
    }

    /// The store next to the active config file.
    pub fn locate() -> Self {
        let config = crate::config::config_path();
        let state_dir = config
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Self::new(state_dir)
    }

    pub fn path(&self, slot: KeySlot) -> PathBuf {
        self.dir.join(format!("{slot}.key"))
    }

    pub fn write(&self, slot: KeySlot, api_key: &str) -> anyhow::Result<PathBuf> {
        let api_key = api_key.trim();
        if api_key.is_empty() {
            anyhow::bail!("{slot} key cannot be empty");
        }

        std::fs::create_dir_all(&self.dir)
            .map_err(|e| anyhow::anyhow!("failed to create {}: {e}", self.dir.display()))?;
        restrict(&self.dir, 0o700)?;

        let path = self.path(slot);
        std::fs::write(&path, api_key)
            .map_err(|e| anyhow::anyhow!("failed to write {}: {e}", path.display()))?;
        restrict(&path, 0o600)?;
        Ok(path)
    }

    pub fn read(&self, slot: KeySlot) -> Option<String> {
        let value = std::fs::read_to_string(self.path(slot)).ok()?;
        let value = value.trim();
        (!value.is_empty()).then(|| value.to_string())
    }

    /// Slots that currently hold a key.
    pub fn stored(&self) -> Vec<KeySlot> {
        KeySlot::ALL
            .into_iter()
            .filter(|slot| self.read(*slot).is_some())
            .collect()
    }

    /// Environment first, then the file.
    pub fn resolve(&self, slot: KeySlot) -> Option<String> {
        std::env::var(slot.env_var())
            .ok()
            .filter(|v| !v.trim().is_empty())
            .or_else(|| self.read(slot))
    }
}
