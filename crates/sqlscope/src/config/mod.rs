use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIG_DIR: &str = ".sqlscope";
pub const DEFAULT_CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimePaths {
    pub home_dir: PathBuf,
    pub cwd: PathBuf,
    pub config_path: PathBuf,
}

impl RuntimePaths {
    #[must_use]
    pub fn config_dir(&self) -> &Path {
        self.config_path.parent().unwrap_or(&self.cwd)
    }
}

pub fn resolve_runtime_paths(
    home_dir: &Path,
    cwd: &Path,
    config_override: Option<&Path>,
) -> Result<RuntimePaths> {
    if !home_dir.is_absolute() {
        bail!("home_dir must be absolute: {}", home_dir.display());
    }
    if !cwd.is_absolute() {
        bail!("cwd must be absolute: {}", cwd.display());
    }

    let home_dir = normalize_lexical(home_dir);
    let cwd = normalize_lexical(cwd);
    let config_path = match config_override {
        Some(path) => resolve_user_path(path, &home_dir, &cwd)?,
        None => home_dir.join(DEFAULT_CONFIG_DIR).join(DEFAULT_CONFIG_FILE),
    };

    Ok(RuntimePaths {
        home_dir,
        cwd,
        config_path: normalize_lexical(&config_path),
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub app_store: PathBuf,
    pub databases: BTreeMap<String, DatabaseSettings>,
    pub default_scope: DefaultScope,
    pub generation: GenerationSettings,
    pub limits: Limits,
    pub include_views: bool,
    pub cache_ttl_secs: u64,
    pub cache_max_entries: usize,
    pub default_language: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseSettings {
    pub path: PathBuf,

    #[serde(default)]
    pub attach: BTreeMap<String, PathBuf>,

    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DefaultScope {
    pub role_name: String,
    pub database_name: String,
    pub schema_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GenerationSettings {
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub api_key_env: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Limits {
    pub request_timeout_secs: u64,
    pub max_query_chars: usize,
    pub max_request_chars: usize,
    pub max_rows: Option<usize>,
}

fn default_pool_size() -> usize {
    4
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            app_store: PathBuf::from("app.sqlite"),
            databases: BTreeMap::new(),
            default_scope: DefaultScope::default(),
            generation: GenerationSettings::default(),
            limits: Limits::default(),
            include_views: true,
            cache_ttl_secs: 60,
            cache_max_entries: 10_000,
            default_language: "en".to_string(),
        }
    }
}

impl Default for DefaultScope {
    fn default() -> Self {
        Self {
            role_name: "reader".to_string(),
            database_name: "main".to_string(),
            schema_name: "main".to_string(),
        }
    }
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            temperature: 0.0,
            api_key_env: "OPENAI_API_KEY".to_string(),
        }
    }
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            request_timeout_secs: 60,
            max_query_chars: 10_000,
            max_request_chars: 2_000,
            max_rows: None,
        }
    }
}

impl Settings {
    pub fn load(paths: &RuntimePaths) -> Result<Self> {
        let raw = std::fs::read_to_string(&paths.config_path).with_context(|| {
            format!("failed to read config file: {}", paths.config_path.display())
        })?;
        Self::from_toml_str(&raw, paths.config_dir(), &paths.home_dir)
            .with_context(|| format!("invalid config file: {}", paths.config_path.display()))
    }

    pub fn from_toml_str(raw: &str, base_dir: &Path, home_dir: &Path) -> Result<Self> {
        let mut settings: Self = toml::from_str(raw).context("failed to parse TOML settings")?;

        settings.app_store = resolve_user_path(&settings.app_store, home_dir, base_dir)?;
        for database in settings.databases.values_mut() {
            database.path = resolve_user_path(&database.path, home_dir, base_dir)?;
            for attached in database.attach.values_mut() {
                *attached = resolve_user_path(attached, home_dir, base_dir)?;
            }
        }

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.databases.is_empty() {
            bail!("at least one [databases.<name>] entry is required");
        }
        for (name, database) in &self.databases {
            if database.pool_size == 0 {
                bail!("databases.{name}.pool_size must be greater than zero");
            }
            for alias in database.attach.keys() {
                if !is_schema_alias(alias) {
                    bail!("databases.{name}.attach alias `{alias}` is not a valid schema name");
                }
            }
        }

        let scope = &self.default_scope;
        let Some(database) = self.databases.get(&scope.database_name) else {
            bail!(
                "default_scope.database_name `{}` is not a configured database",
                scope.database_name
            );
        };
        if scope.schema_name != "main" && !database.attach.contains_key(&scope.schema_name) {
            bail!(
                "default_scope.schema_name `{}` is neither `main` nor an attached schema",
                scope.schema_name
            );
        }
        if scope.role_name.trim().is_empty() {
            bail!("default_scope.role_name must not be empty");
        }
        if self.limits.max_query_chars == 0 || self.limits.max_request_chars == 0 {
            bail!("limits.max_query_chars and limits.max_request_chars must be greater than zero");
        }
        if self.cache_ttl_secs > 0 && self.cache_max_entries == 0 {
            bail!("cache_max_entries must be greater than zero while caching is enabled");
        }
        if self.limits.request_timeout_secs == 0 {
            bail!("limits.request_timeout_secs must be greater than zero");
        }

        Ok(())
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.limits.request_timeout_secs)
    }

    #[must_use]
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    #[must_use]
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.generation.api_key_env)
            .ok()
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty())
    }
}

#[must_use]
pub fn is_schema_alias(alias: &str) -> bool {
    let mut chars = alias.chars();
    let starts_ok = chars
        .next()
        .is_some_and(|first| first.is_ascii_alphabetic() || first == '_');
    starts_ok
        && chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
        && !alias.eq_ignore_ascii_case("main")
        && !alias.eq_ignore_ascii_case("temp")
}

fn resolve_user_path(path: &Path, home_dir: &Path, cwd: &Path) -> Result<PathBuf> {
    let expanded = expand_tilde(path, home_dir)?;
    let resolved = if expanded.is_absolute() {
        expanded
    } else {
        cwd.join(expanded)
    };

    Ok(normalize_lexical(&resolved))
}

fn expand_tilde(path: &Path, home_dir: &Path) -> Result<PathBuf> {
    let mut components = path.components();
    match components.next() {
        Some(Component::Normal(first)) if first == "~" => {
            let mut expanded = home_dir.to_path_buf();
            for component in components {
                expanded.push(component.as_os_str());
            }
            Ok(expanded)
        }
        Some(Component::Normal(first))
            if first
                .to_str()
                .is_some_and(|segment| segment.starts_with('~')) =>
        {
            bail!(
                "unsupported home expansion syntax (only `~` and `~/...` are supported): {}",
                path.display()
            )
        }
        _ => Ok(path.to_path_buf()),
    }
}

fn normalize_lexical(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();

    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    normalized.push(component.as_os_str());
                }
            }
            _ => normalized.push(component.as_os_str()),
        }
    }

    normalized
}
