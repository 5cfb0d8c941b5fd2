use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::coordinator::CoordinatorConfig;
use crate::invites::DEFAULT_INVITE_TIMEOUT;
use crate::transport::ClientIdentity;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Settings {
    #[serde(default)]
    pub app_id: String,
    /// Generated on first load and kept for the lifetime of the install.
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default = "default_true")]
    pub mic_enabled_on_join: bool,
    #[serde(default = "default_true")]
    pub camera_enabled_on_join: bool,
    #[serde(default = "default_invite_timeout")]
    pub invite_timeout_secs: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_invite_timeout() -> u64 {
    DEFAULT_INVITE_TIMEOUT.as_secs()
}

fn default_request_timeout() -> u64 {
    10
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            app_id: String::new(),
            device_id: None,
            display_name: None,
            mic_enabled_on_join: true,
            camera_enabled_on_join: true,
            invite_timeout_secs: default_invite_timeout(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl Settings {
    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            invite_timeout: Duration::from_secs(self.invite_timeout_secs),
            mic_enabled_on_join: self.mic_enabled_on_join,
            camera_enabled_on_join: self.camera_enabled_on_join,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Identity sent with every request. The display name falls back to the
    /// user id.
    pub fn client_identity(&self, user_id: &str) -> ClientIdentity {
        ClientIdentity {
            app_id: self.app_id.clone(),
            device_id: self.device_id.clone().unwrap_or_default(),
            user_id: user_id.to_string(),
            user_name: self
                .display_name
                .clone()
                .unwrap_or_else(|| user_id.to_string()),
        }
    }
}

pub struct SettingsStore {
    settings: Mutex<Settings>,
    file_path: PathBuf,
}

impl SettingsStore {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        let file_path = data_dir.as_ref().join("settings.json");
        let mut settings = Self::load(&file_path);
        let fresh_device = settings.device_id.is_none();
        if fresh_device {
            settings.device_id = Some(uuid::Uuid::new_v4().to_string());
        }
        let store = Self {
            settings: Mutex::new(settings),
            file_path,
        };
        if fresh_device {
            store.save();
        }
        store
    }

    pub fn get(&self) -> Settings {
        self.lock().clone()
    }

    pub fn set_app_id(&self, app_id: String) {
        self.lock().app_id = app_id;
        self.save();
    }

    pub fn set_display_name(&self, name: Option<String>) {
        self.lock().display_name = name;
        self.save();
    }

    pub fn set_mic_enabled_on_join(&self, enabled: bool) {
        self.lock().mic_enabled_on_join = enabled;
        self.save();
    }

    pub fn set_camera_enabled_on_join(&self, enabled: bool) {
        self.lock().camera_enabled_on_join = enabled;
        self.save();
    }

    pub fn set_invite_timeout_secs(&self, secs: u64) {
        self.lock().invite_timeout_secs = secs;
        self.save();
    }

    pub fn set_request_timeout_secs(&self, secs: u64) {
        self.lock().request_timeout_secs = secs;
        self.save();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Settings> {
        self.settings.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn save(&self) {
        let settings = self.get();
        if let Some(parent) = self.file_path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                tracing::warn!("cannot create {}: {e}", parent.display());
                return;
            }
        }
        let written = serde_json::to_string_pretty(&settings)
            .map_err(std::io::Error::from)
            .and_then(|json| std::fs::write(&self.file_path, json));
        if let Err(e) = written {
            tracing::warn!("failed to save settings: {e}");
        }
    }

    fn load(path: &Path) -> Settings {
        match std::fs::read_to_string(path) {
            Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("ignoring unreadable settings file: {e}");
                Settings::default()
            }),
            Err(_) => Settings::default(),
        }
    }
}
