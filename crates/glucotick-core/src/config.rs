//! Settings, configuration sources and credential lookup.
//!
//! The monitor never parses files itself; it reads a [`Settings`] snapshot
//! from a [`ConfigSource`] and writes back through `set`. [`FileConfig`] is
//! the JSON-file implementation used by the CLI, [`StaticConfig`] an
//! in-memory one for embedding and tests.
//!
//! Thresholds are held in mg/dL. When `units` is mmol/L the file stores them
//! in mmol/L, so they are converted on load and converted back on save.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{CoreError, GlucoseUnit, ProviderId, Thresholds};

const APP_QUALIFIER: &str = "io";
const APP_ORGANIZATION: &str = "glucotick";
const APP_NAME: &str = "glucotick";

/// LibreLinkUp account settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LibreLinkSettings {
    pub email: String,
    pub password: String,
    pub region: String,
    /// Discovered after the first login and written back.
    pub patient_id: String,
}

impl Default for LibreLinkSettings {
    fn default() -> Self {
        Self {
            email: String::new(),
            password: String::new(),
            region: String::from("EU"),
            patient_id: String::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationSettings {
    pub enabled: bool,
    pub low: bool,
    pub high: bool,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            low: true,
            high: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColorSettings {
    pub low: String,
    pub high: String,
    pub normal: String,
}

impl Default for ColorSettings {
    fn default() -> Self {
        Self {
            low: String::from("#ff4444"),
            high: String::from("#ffaa00"),
            normal: String::from("#ffffff"),
        }
    }
}

/// Complete monitor configuration with defaults for every key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    /// `nightscout` or `librelink`; anything else resolves to Nightscout.
    pub provider: String,
    pub nightscout_url: String,
    pub api_token: String,
    pub librelink: LibreLinkSettings,
    pub graph_hours: u32,
    pub debug: bool,
    pub units: GlucoseUnit,
    pub thresholds: Thresholds,
    pub notifications: NotificationSettings,
    pub colors: ColorSettings,
    pub stale_minutes: u32,
    /// Minutes between history fetches; also the ephemeral cache TTL.
    pub history_fetch_interval: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            provider: ProviderId::Nightscout.as_str().to_owned(),
            nightscout_url: String::new(),
            api_token: String::new(),
            librelink: LibreLinkSettings::default(),
            graph_hours: 6,
            debug: false,
            units: GlucoseUnit::MgDl,
            thresholds: Thresholds::default(),
            notifications: NotificationSettings::default(),
            colors: ColorSettings::default(),
            stale_minutes: crate::analytics::DEFAULT_STALE_MINUTES,
            history_fetch_interval: 5,
        }
    }
}

/// The subset of settings that identifies where and as whom data is fetched.
///
/// The LibreLink patient id is excluded: it is written back by the provider
/// itself and must not count as a credential change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionParams {
    pub provider: ProviderId,
    pub nightscout_url: String,
    pub api_token: String,
    pub librelink_email: String,
    pub librelink_password: String,
    pub librelink_region: String,
}

impl Settings {
    pub fn provider_id(&self) -> ProviderId {
        ProviderId::from_config_value(&self.provider)
    }

    pub fn connection(&self) -> ConnectionParams {
        ConnectionParams {
            provider: self.provider_id(),
            nightscout_url: self.nightscout_url.trim().to_owned(),
            api_token: self.api_token.clone(),
            librelink_email: self.librelink.email.clone(),
            librelink_password: self.librelink.password.clone(),
            librelink_region: self.librelink.region.clone(),
        }
    }

    /// Parses a settings document, filling absent keys with defaults and
    /// normalizing thresholds to mg/dL.
    pub fn from_json(text: &str) -> Result<Self, CoreError> {
        let mut settings: Self = serde_json::from_str(text)?;
        settings.thresholds = settings.thresholds.convert(settings.units);
        Ok(settings)
    }

    /// Serializes with thresholds expressed in the configured unit.
    pub fn to_json(&self) -> Result<String, CoreError> {
        let mut on_disk = self.clone();
        on_disk.thresholds = self.thresholds.express_in(self.units);
        Ok(serde_json::to_string_pretty(&on_disk)?)
    }

    /// Loads from `path`; a missing file yields the defaults.
    pub fn load_from_path(path: &Path) -> Result<Self, CoreError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn save_to_path(&self, path: &Path) -> Result<(), CoreError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.to_json()?)?;
        Ok(())
    }

    /// Platform config location, e.g. `~/.config/glucotick/config.json`.
    pub fn default_path() -> Result<PathBuf, CoreError> {
        let dirs = directories::ProjectDirs::from(APP_QUALIFIER, APP_ORGANIZATION, APP_NAME)
            .ok_or(CoreError::NoProjectDirs)?;
        Ok(dirs.config_dir().join("config.json"))
    }

    /// Looks up a dotted key such as `librelink.region`.
    pub fn get(&self, key: &str) -> Option<Value> {
        let document = serde_json::to_value(self).ok()?;
        let pointer = format!("/{}", key.replace('.', "/"));
        document.pointer(&pointer).cloned()
    }

    /// Returns a copy with the dotted `key` replaced by `value`.
    pub fn with_value(&self, key: &str, value: Value) -> Result<Self, CoreError> {
        let mut document = serde_json::to_value(self)?;
        let mut slot = &mut document;
        for part in key.split('.') {
            slot = slot
                .as_object_mut()
                .and_then(|object| object.get_mut(part))
                .ok_or_else(|| CoreError::UnknownConfigKey {
                    key: key.to_owned(),
                })?;
        }
        *slot = value;
        Ok(serde_json::from_value(document)?)
    }
}

/// Configuration collaborator consumed by the monitor and providers.
pub trait ConfigSource: Send + Sync {
    /// Current settings snapshot.
    fn settings(&self) -> Settings;

    /// Updates one dotted key and persists it where applicable.
    fn set(&self, key: &str, value: Value) -> Result<(), CoreError>;

    /// Re-reads the backing store. In-memory sources have nothing to do.
    fn reload(&self) -> Result<(), CoreError> {
        Ok(())
    }

    fn get(&self, key: &str) -> Option<Value> {
        self.settings().get(key)
    }
}

/// In-memory configuration.
#[derive(Debug, Default)]
pub struct StaticConfig {
    inner: RwLock<Settings>,
}

impl StaticConfig {
    pub fn new(settings: Settings) -> Self {
        Self {
            inner: RwLock::new(settings),
        }
    }

    /// Replaces the whole snapshot, as an external settings editor would.
    pub fn replace(&self, settings: Settings) {
        *self.inner.write().expect("config lock is not poisoned") = settings;
    }
}

impl ConfigSource for StaticConfig {
    fn settings(&self) -> Settings {
        self.inner.read().expect("config lock is not poisoned").clone()
    }

    fn set(&self, key: &str, value: Value) -> Result<(), CoreError> {
        let mut inner = self.inner.write().expect("config lock is not poisoned");
        *inner = inner.with_value(key, value)?;
        Ok(())
    }
}

/// JSON-file backed configuration.
#[derive(Debug)]
pub struct FileConfig {
    path: PathBuf,
    inner: RwLock<Settings>,
}

impl FileConfig {
    /// Opens `path`, creating it with defaults when absent.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, CoreError> {
        let path = path.into();
        let settings = Settings::load_from_path(&path)?;
        if !path.exists() {
            settings.save_to_path(&path)?;
            tracing::info!(path = %path.display(), "created default config");
        }
        Ok(Self {
            path,
            inner: RwLock::new(settings),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigSource for FileConfig {
    fn settings(&self) -> Settings {
        self.inner.read().expect("config lock is not poisoned").clone()
    }

    fn set(&self, key: &str, value: Value) -> Result<(), CoreError> {
        let mut inner = self.inner.write().expect("config lock is not poisoned");
        let updated = inner.with_value(key, value)?;
        updated.save_to_path(&self.path)?;
        *inner = updated;
        Ok(())
    }

    fn reload(&self) -> Result<(), CoreError> {
        let settings = Settings::load_from_path(&self.path)?;
        *self.inner.write().expect("config lock is not poisoned") = settings;
        Ok(())
    }
}

/// Keyring service name under which credentials are stored.
pub const SECRET_SERVICE: &str = "glucotick";
/// Application id component of the secret key.
pub const SECRET_APPLICATION_ID: &str = "glucotick@librelink";

/// Secret storage collaborator keyed by (service, application id, account).
pub trait SecretStore: Send + Sync {
    fn lookup(&self, service: &str, application_id: &str, account: &str) -> Option<String>;
}

/// Reads secrets from environment variables.
///
/// | Application id | Variable |
/// |----------------|----------|
/// | `glucotick@librelink` | `GLUCOTICK_LIBRELINK_PASSWORD` |
/// | `glucotick@nightscout` | `GLUCOTICK_NIGHTSCOUT_TOKEN` |
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvSecretStore;

impl SecretStore for EnvSecretStore {
    fn lookup(&self, _service: &str, application_id: &str, _account: &str) -> Option<String> {
        let variable = match application_id {
            "glucotick@librelink" => "GLUCOTICK_LIBRELINK_PASSWORD",
            "glucotick@nightscout" => "GLUCOTICK_NIGHTSCOUT_TOKEN",
            _ => return None,
        };
        std::env::var(variable).ok().filter(|value| !value.is_empty())
    }
}

/// Secret store that never has anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoSecrets;

impl SecretStore for NoSecrets {
    fn lookup(&self, _service: &str, _application_id: &str, _account: &str) -> Option<String> {
        None
    }
}

/// Fills empty credential fields from the secret store.
pub fn resolve_credentials(mut settings: Settings, secrets: &dyn SecretStore) -> Settings {
    if settings.librelink.password.is_empty() && !settings.librelink.email.is_empty() {
        if let Some(password) =
            secrets.lookup(SECRET_SERVICE, SECRET_APPLICATION_ID, &settings.librelink.email)
        {
            settings.librelink.password = password;
        }
    }
    if settings.api_token.is_empty() {
        if let Some(token) =
            secrets.lookup(SECRET_SERVICE, "glucotick@nightscout", &settings.nightscout_url)
        {
            settings.api_token = token;
        }
    }
    settings
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn partial_document_is_merged_over_defaults() {
        let settings = Settings::from_json(r#"{"nightscoutUrl": "cgm.example.org"}"#)
            .expect("valid settings");

        assert_eq!(settings.nightscout_url, "cgm.example.org");
        assert_eq!(settings.graph_hours, 6);
        assert_eq!(settings.thresholds, Thresholds::default());
        assert!(settings.notifications.enabled);
        assert_eq!(settings.librelink.region, "EU");
    }

    #[test]
    fn mmol_thresholds_are_held_in_mgdl_and_saved_back_in_mmol() {
        let settings = Settings::from_json(
            r#"{"units": "mmol/L", "thresholds": {"low": 3.9, "high": 10.0}}"#,
        )
        .expect("valid settings");

        assert_eq!(settings.thresholds.low, 70.0);
        assert_eq!(settings.thresholds.high, 180.0);

        let saved: Value = serde_json::from_str(&settings.to_json().expect("serializable"))
            .expect("valid json");
        assert_eq!(saved["thresholds"]["low"], 3.9);
        assert_eq!(saved["thresholds"]["high"], 10.0);
    }

    #[test]
    fn unknown_provider_falls_back_to_nightscout() {
        let settings = Settings::from_json(r#"{"provider": "dexcom"}"#).expect("valid settings");
        assert_eq!(settings.provider_id(), ProviderId::Nightscout);
    }

    #[test]
    fn dotted_keys_get_and_set() {
        let config = StaticConfig::default();
        config
            .set("librelink.patientId", json!("patient-7"))
            .expect("known key");

        assert_eq!(config.settings().librelink.patient_id, "patient-7");
        assert_eq!(config.get("librelink.patientId"), Some(json!("patient-7")));
        assert_eq!(config.get("staleMinutes"), Some(json!(10)));
        assert!(config.set("librelink.shoeSize", json!(42)).is_err());
    }

    #[test]
    fn patient_id_is_not_part_of_connection_params() {
        let mut settings = Settings::default();
        let before = settings.connection();
        settings.librelink.patient_id = String::from("discovered");
        assert_eq!(before, settings.connection());

        settings.api_token = String::from("new-token");
        assert_ne!(before, settings.connection());
    }

    #[test]
    fn file_config_creates_defaults_and_persists_set() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("config.json");

        let config = FileConfig::open(&path).expect("open creates file");
        assert!(path.exists());

        config.set("apiToken", json!("abc")).expect("known key");
        let reloaded = Settings::load_from_path(&path).expect("readable");
        assert_eq!(reloaded.api_token, "abc");
    }

    #[test]
    fn file_config_reload_picks_up_external_edits() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.json");
        let config = FileConfig::open(&path).expect("open");

        fs::write(&path, r#"{"provider": "librelink"}"#).expect("writable");
        config.reload().expect("reload");

        assert_eq!(config.settings().provider_id(), ProviderId::Librelink);
    }

    struct FixedSecrets;

    impl SecretStore for FixedSecrets {
        fn lookup(&self, service: &str, application_id: &str, account: &str) -> Option<String> {
            (service == SECRET_SERVICE
                && application_id == SECRET_APPLICATION_ID
                && account == "me@example.org")
                .then(|| String::from("from-keyring"))
        }
    }

    #[test]
    fn empty_password_is_resolved_from_secret_store() {
        let mut settings = Settings::default();
        settings.librelink.email = String::from("me@example.org");

        let resolved = resolve_credentials(settings, &FixedSecrets);
        assert_eq!(resolved.librelink.password, "from-keyring");
    }
}
