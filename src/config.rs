use clap::{Parser, Subcommand};
use config::{Config, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::db::Dialect;
use crate::error::ConfigurationError;
use crate::llm::ProviderKind;

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct DatabaseConfig {
    pub dialect: String, // "mysql" or "postgresql"
    pub host: String,
    /// Falls back to the dialect's default port when unset.
    #[serde(default)]
    pub port: Option<u16>,
    pub user: String,
    pub password: String,
    pub name: String,
}

impl DatabaseConfig {
    pub fn effective_port(&self) -> Result<u16, ConfigurationError> {
        match self.port {
            Some(port) => Ok(port),
            None => Ok(self.dialect.parse::<Dialect>()?.default_port()),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ProviderConfig {
    pub model: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub api_url: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct LlmConfig {
    pub provider: String, // "OPENAI" or "GEMINI"
    pub openai: ProviderConfig,
    pub gemini: ProviderConfig,
}

impl LlmConfig {
    /// Configuration of the provider named by `provider`. The other one is never read.
    pub fn active(&self) -> Result<(ProviderKind, &ProviderConfig), ConfigurationError> {
        let kind = self.provider.parse::<ProviderKind>()?;
        let config = match kind {
            ProviderKind::OpenAi => &self.openai,
            ProviderKind::Gemini => &self.gemini,
        };
        Ok((kind, config))
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct WebConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub llm: LlmConfig,
    pub web: WebConfig,
    pub settings_file: String,
}

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Ask your database questions in plain language",
    long_about = None
)]
pub struct CliArgs {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Path of the persisted settings file
    #[arg(long, value_name = "FILE")]
    pub settings: Option<PathBuf>,

    /// Host to bind to
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to
    #[arg(short, long)]
    pub port: Option<u16>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Serve the chat UI and JSON API (default)
    Serve,
    /// Translate one prompt to SQL, optionally run it, and print the history entry
    Ask {
        prompt: String,
        /// Only generate the SQL, do not run it
        #[arg(long)]
        no_execute: bool,
    },
}

/// Environment settings and the configuration keys they override.
const ENV_OVERRIDES: &[(&str, &str)] = &[
    ("DB_TYPE", "database.dialect"),
    ("DB_HOST", "database.host"),
    ("DB_USER", "database.user"),
    ("DB_PASSWORD", "database.password"),
    ("DB_NAME", "database.name"),
    ("AI_PROVIDER", "llm.provider"),
    ("OPENAI_API_KEY", "llm.openai.api_key"),
    ("OPENAI_MODEL", "llm.openai.model"),
    ("GEMINI_API_KEY", "llm.gemini.api_key"),
    ("GEMINI_MODEL", "llm.gemini.model"),
];

impl AppConfig {
    pub fn new(args: &CliArgs) -> Result<Self, ConfigurationError> {
        Self::load(args, |key| std::env::var(key).ok())
    }

    /// Layers, lowest precedence first: defaults, TOML file, environment,
    /// persisted settings, command line.
    pub fn load<F>(args: &CliArgs, env: F) -> Result<Self, ConfigurationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config_builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        // Add configuration from file if specified
        if let Some(config_path) = &args.config {
            config_builder = config_builder.add_source(File::from(config_path.as_path()));
        } else {
            let default_locations =
                ["config.toml", "config/config.toml", "/etc/dbchat/config.toml"];

            for location in default_locations {
                if Path::new(location).exists() {
                    info!("Using configuration file {}", location);
                    config_builder =
                        config_builder.add_source(File::new(location, FileFormat::Toml));
                    break;
                }
            }
        }

        // A source of its own: overrides on the main builder would beat the settings file
        config_builder = config_builder.add_source(Self::environment_layer(&env)?);

        // The settings path itself may come from the layers above
        let settings_path = match &args.settings {
            Some(path) => path.clone(),
            None => {
                let layered: AppConfig = config_builder.build_cloned()?.try_deserialize()?;
                PathBuf::from(layered.settings_file)
            }
        };
        config_builder = config_builder.add_source(
            File::from(settings_path.as_path())
                .format(FileFormat::Json)
                .required(false),
        );

        let mut config: AppConfig = config_builder.build()?.try_deserialize()?;

        // Override with command line args if provided
        if let Some(host) = &args.host {
            config.web.host = host.clone();
        }
        if let Some(port) = args.port {
            config.web.port = port;
        }
        config.settings_file = settings_path.to_string_lossy().to_string();

        Ok(config)
    }

    fn environment_layer<F>(env: &F) -> Result<Config, ConfigurationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut layer = Config::builder();
        for (var, key) in ENV_OVERRIDES {
            if let Some(value) = env(var).filter(|v| !v.is_empty()) {
                debug!("Applying {} from the environment", var);
                layer = layer.set_override(*key, value)?;
            }
        }
        if let Some(port) = env("DB_PORT").filter(|v| !v.is_empty()) {
            let port: u16 = port.parse().map_err(|_| ConfigurationError::Invalid {
                key: "DB_PORT".to_string(),
                reason: format!("'{}' is not a port number", port),
            })?;
            layer = layer.set_override("database.port", i64::from(port))?;
        }
        Ok(layer.build()?)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                dialect: Dialect::MySql.to_string(),
                host: "localhost".to_string(),
                port: None,
                user: "root".to_string(),
                password: String::new(),
                name: "testdb".to_string(),
            },
            llm: LlmConfig {
                provider: ProviderKind::OpenAi.to_string(),
                openai: ProviderConfig {
                    model: ProviderKind::OpenAi.default_model().to_string(),
                    api_key: String::new(),
                    api_url: None,
                },
                gemini: ProviderConfig {
                    model: ProviderKind::Gemini.default_model().to_string(),
                    api_key: String::new(),
                    api_url: None,
                },
            },
            web: WebConfig {
                host: "127.0.0.1".to_string(),
                port: 8501,
            },
            settings_file: ".dbchat-settings.json".to_string(),
        }
    }
}

/// The user-editable part of the configuration, as persisted to the settings file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Settings {
    pub database: DatabaseConfig,
    pub llm: LlmSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LlmSettings {
    pub provider: String,
    pub openai: Credentials,
    pub gemini: Credentials,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Credentials {
    pub model: String,
    pub api_key: String,
}

impl Settings {
    pub fn from_config(config: &AppConfig) -> Self {
        let credentials = |p: &ProviderConfig| Credentials {
            model: p.model.clone(),
            api_key: p.api_key.clone(),
        };
        Self {
            database: config.database.clone(),
            llm: LlmSettings {
                provider: config.llm.provider.clone(),
                openai: credentials(&config.llm.openai),
                gemini: credentials(&config.llm.gemini),
            },
        }
    }

    /// Canonical tags, and the inactive provider's model and key cleared.
    pub fn normalized(mut self) -> Result<Self, ConfigurationError> {
        let dialect: Dialect = self.database.dialect.parse()?;
        let provider: ProviderKind = self.llm.provider.parse()?;
        self.database.dialect = dialect.to_string();
        self.llm.provider = provider.to_string();
        match provider {
            ProviderKind::OpenAi => self.llm.gemini = Credentials::default(),
            ProviderKind::Gemini => self.llm.openai = Credentials::default(),
        }
        Ok(self)
    }

    /// Writes these settings into a copy of `config`, keeping the non-editable parts.
    pub fn apply_to(&self, config: &AppConfig) -> AppConfig {
        let mut updated = config.clone();
        updated.database = self.database.clone();
        updated.llm.provider = self.llm.provider.clone();
        updated.llm.openai.model = self.llm.openai.model.clone();
        updated.llm.openai.api_key = self.llm.openai.api_key.clone();
        updated.llm.gemini.model = self.llm.gemini.model.clone();
        updated.llm.gemini.api_key = self.llm.gemini.api_key.clone();
        updated
    }
}

/// Persists the settings as JSON, clearing the inactive provider's fields.
pub fn save_settings(settings: &Settings, path: &Path) -> Result<Settings, ConfigurationError> {
    let settings = settings.clone().normalized()?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(&settings)?)?;
    info!("Settings saved to {}", path.display());
    Ok(settings)
}

/// A change request from the settings form or API. Blank secrets keep the current value.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct SettingsUpdate {
    pub dialect: String,
    pub host: String,
    #[serde(default)]
    pub port: Option<u16>,
    pub user: String,
    #[serde(default)]
    pub password: Option<String>,
    pub database: String,
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
}

impl SettingsUpdate {
    pub fn into_settings(self, current: &AppConfig) -> Result<Settings, ConfigurationError> {
        let provider: ProviderKind = self.provider.parse()?;
        let mut settings = Settings::from_config(current);

        settings.database = DatabaseConfig {
            dialect: self.dialect,
            host: self.host,
            port: self.port,
            user: self.user,
            password: keep_if_blank(self.password, &current.database.password),
            name: self.database,
        };
        settings.llm.provider = provider.to_string();

        let credentials = match provider {
            ProviderKind::OpenAi => &mut settings.llm.openai,
            ProviderKind::Gemini => &mut settings.llm.gemini,
        };
        credentials.model = self
            .model
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| provider.default_model().to_string());
        credentials.api_key = keep_if_blank(self.api_key, &credentials.api_key);

        settings.normalized()
    }
}

fn keep_if_blank(value: Option<String>, current: &str) -> String {
    value
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| current.to_string())
}

/// What the settings surface shows: secrets are reported as set/unset only.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SettingsView {
    pub dialect: String,
    pub host: String,
    /// Only an explicitly configured port; unset means the dialect default.
    pub port: Option<u16>,
    pub default_port: Option<u16>,
    pub user: String,
    pub database: String,
    pub password_set: bool,
    pub provider: String,
    pub openai_model: String,
    pub openai_key_set: bool,
    pub gemini_model: String,
    pub gemini_key_set: bool,
}

impl From<&AppConfig> for SettingsView {
    fn from(config: &AppConfig) -> Self {
        Self {
            dialect: config.database.dialect.clone(),
            host: config.database.host.clone(),
            port: config.database.port,
            default_port: config
                .database
                .dialect
                .parse::<Dialect>()
                .ok()
                .map(|d| d.default_port()),
            user: config.database.user.clone(),
            database: config.database.name.clone(),
            password_set: !config.database.password.is_empty(),
            provider: config.llm.provider.clone(),
            openai_model: config.llm.openai.model.clone(),
            openai_key_set: !config.llm.openai.api_key.is_empty(),
            gemini_model: config.llm.gemini.model.clone(),
            gemini_key_set: !config.llm.gemini.api_key.is_empty(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn args_with_settings(path: &Path) -> CliArgs {
        CliArgs {
            config: None,
            settings: Some(path.to_path_buf()),
            host: None,
            port: None,
            command: None,
        }
    }

    #[test]
    fn test_defaults_use_dialect_port() {
        let config = AppConfig::default();
        assert_eq!(config.database.effective_port().unwrap(), 3306);

        let mut pg = config.database.clone();
        pg.dialect = "postgresql".to_string();
        assert_eq!(pg.effective_port().unwrap(), 5432);

        pg.port = Some(6543);
        assert_eq!(pg.effective_port().unwrap(), 6543);
    }

    #[test]
    fn test_unknown_dialect_has_no_port() {
        let mut db = AppConfig::default().database;
        db.dialect = "oracle".to_string();
        assert!(matches!(
            db.effective_port(),
            Err(ConfigurationError::UnsupportedDialect(tag)) if tag == "oracle"
        ));
    }

    #[test]
    fn test_environment_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let env: HashMap<&str, &str> = HashMap::from([
            ("DB_TYPE", "postgresql"),
            ("DB_HOST", "db.internal"),
            ("DB_PORT", "15432"),
            ("AI_PROVIDER", "GEMINI"),
            ("GEMINI_API_KEY", "g-key"),
            ("OPENAI_MODEL", ""),
        ]);

        let config = AppConfig::load(&args_with_settings(&dir.path().join("s.json")), |k| {
            env.get(k).map(|v| v.to_string())
        })
        .unwrap();

        assert_eq!(config.database.dialect, "postgresql");
        assert_eq!(config.database.host, "db.internal");
        assert_eq!(config.database.port, Some(15432));
        assert_eq!(config.llm.provider, "GEMINI");
        assert_eq!(config.llm.gemini.api_key, "g-key");
        // Empty values do not override
        assert_eq!(config.llm.openai.model, "gpt-3.5-turbo");
    }

    #[test]
    fn test_invalid_port_in_environment() {
        let dir = tempfile::tempdir().unwrap();
        let result = AppConfig::load(&args_with_settings(&dir.path().join("s.json")), |k| {
            (k == "DB_PORT").then(|| "not-a-port".to_string())
        });
        assert!(matches!(result, Err(ConfigurationError::Invalid { key, .. }) if key == "DB_PORT"));
    }

    #[test]
    fn test_save_clears_inactive_provider() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");

        let mut config = AppConfig::default();
        config.llm.provider = "gemini".to_string();
        config.llm.openai.api_key = "sk-old".to_string();
        config.llm.gemini.api_key = "g-new".to_string();

        let saved = save_settings(&Settings::from_config(&config), &path).unwrap();
        assert_eq!(saved.llm.provider, "GEMINI");
        assert_eq!(saved.llm.openai, Credentials::default());
        assert_eq!(saved.llm.gemini.api_key, "g-new");

        let on_disk: Settings =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(on_disk, saved);
    }

    #[test]
    fn test_saved_settings_are_loaded_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");

        let mut config = AppConfig::default();
        config.database.dialect = "postgresql".to_string();
        config.database.name = "analytics".to_string();
        save_settings(&Settings::from_config(&config), &path).unwrap();

        let env: HashMap<&str, &str> = HashMap::from([("DB_NAME", "from_env")]);
        let loaded = AppConfig::load(&args_with_settings(&path), |k| {
            env.get(k).map(|v| v.to_string())
        })
        .unwrap();

        assert_eq!(loaded.database.dialect, "postgresql");
        assert_eq!(loaded.database.name, "analytics");
        assert_eq!(loaded.settings_file, path.to_string_lossy());
    }

    #[test]
    fn test_layer_precedence() {
        let dir = tempfile::tempdir().unwrap();
        let toml_path = dir.path().join("dbchat.toml");
        std::fs::write(
            &toml_path,
            "[database]\nhost = \"toml-host\"\nuser = \"toml-user\"\n\n[web]\nport = 9000\n",
        )
        .unwrap();
        let settings_path = dir.path().join("settings.json");

        let env: HashMap<&str, &str> = HashMap::from([
            ("DB_HOST", "env-host"),
            ("AI_PROVIDER", "OPENAI"),
            ("OPENAI_API_KEY", "sk-env"),
        ]);
        let args = CliArgs {
            config: Some(toml_path),
            settings: Some(settings_path.clone()),
            host: None,
            port: Some(9100),
            command: None,
        };
        let load = || AppConfig::load(&args, |k| env.get(k).map(|v| v.to_string())).unwrap();

        // Environment beats the TOML file, command line beats both
        let before = load();
        assert_eq!(before.database.host, "env-host");
        assert_eq!(before.database.user, "toml-user");
        assert_eq!(before.llm.openai.api_key, "sk-env");
        assert_eq!(before.web.port, 9100);

        // Settings saved from the UI beat the environment on the next start
        let mut saved = before.clone();
        saved.database.host = "saved-host".to_string();
        saved.llm.provider = "GEMINI".to_string();
        saved.llm.gemini.api_key = "g-saved".to_string();
        save_settings(&Settings::from_config(&saved), &settings_path).unwrap();

        let after = load();
        assert_eq!(after.database.host, "saved-host");
        assert_eq!(after.llm.provider, "GEMINI");
        assert_eq!(after.llm.gemini.api_key, "g-saved");
        assert_eq!(after.llm.openai.api_key, "");
        assert_eq!(after.web.port, 9100);
    }

    #[test]
    fn test_update_keeps_blank_secrets() {
        let mut current = AppConfig::default();
        current.database.password = "hunter2".to_string();
        current.llm.openai.api_key = "sk-live".to_string();

        let update = SettingsUpdate {
            dialect: "MySQL".to_string(),
            host: "10.0.0.5".to_string(),
            port: None,
            user: "app".to_string(),
            password: Some(String::new()),
            database: "shop".to_string(),
            provider: "openai".to_string(),
            model: Some("gpt-4o-mini".to_string()),
            api_key: None,
        };

        let settings = update.into_settings(&current).unwrap();
        assert_eq!(settings.database.dialect, "mysql");
        assert_eq!(settings.database.password, "hunter2");
        assert_eq!(settings.llm.provider, "OPENAI");
        assert_eq!(settings.llm.openai.model, "gpt-4o-mini");
        assert_eq!(settings.llm.openai.api_key, "sk-live");
    }

    #[test]
    fn test_update_rejects_unknown_provider() {
        let update = SettingsUpdate {
            dialect: "mysql".to_string(),
            provider: "claude".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            update.into_settings(&AppConfig::default()),
            Err(ConfigurationError::UnsupportedProvider(_))
        ));
    }

    #[test]
    fn test_view_hides_secrets() {
        let mut config = AppConfig::default();
        config.llm.openai.api_key = "sk-secret".to_string();
        let view = SettingsView::from(&config);
        assert!(view.openai_key_set);
        assert!(!view.gemini_key_set);
        assert!(!view.password_set);
        assert!(!serde_json::to_string(&view).unwrap().contains("sk-secret"));
    }

    #[test]
    fn test_view_leaves_unset_port_empty() {
        let mut config = AppConfig::default();
        let view = SettingsView::from(&config);
        assert_eq!(view.port, None);
        assert_eq!(view.default_port, Some(3306));

        config.database.port = Some(3307);
        assert_eq!(SettingsView::from(&config).port, Some(3307));
    }
}
