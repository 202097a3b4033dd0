use std::path::{Component, Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Result, bail};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::collaborators::sqlite::DEFAULT_ROW_CAP;
use crate::schema::SchemaCatalog;

const DEFAULT_OUT_DIR: &str = ".sqlagent";
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";
pub const DB_PATH_ENV: &str = "SQLAGENT_DB_PATH";
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimePaths {
    pub home_dir: PathBuf,
    pub cwd: PathBuf,
    pub out_dir: PathBuf,
}

impl RuntimePaths {
    /// Resolves a user-supplied path: `~` expands to home, relative paths
    /// join cwd.
    pub fn resolve(&self, path: &Path) -> Result<PathBuf> {
        resolve_user_path(path, &self.home_dir, &self.cwd)
    }
}

pub fn resolve_runtime_paths(
    home_dir: &Path,
    cwd: &Path,
    out_dir_override: Option<&Path>,
) -> Result<RuntimePaths> {
    if !home_dir.is_absolute() {
        bail!("home_dir must be absolute: {}", home_dir.display());
    }
    if !cwd.is_absolute() {
        bail!("cwd must be absolute: {}", cwd.display());
    }

    let home_dir = normalize_lexical(home_dir);
    let cwd = normalize_lexical(cwd);
    let out_dir = match out_dir_override {
        Some(path) => resolve_user_path(path, &home_dir, &cwd)?,
        None => home_dir.join(DEFAULT_OUT_DIR).join("output"),
    };

    Ok(RuntimePaths {
        home_dir,
        cwd,
        out_dir: normalize_lexical(&out_dir),
    })
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub base_url: String,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            model: "gpt-4".to_string(),
            temperature: 0.0,
            max_tokens: 2000,
            base_url: "https://api.openai.com/v1".to_string(),
        }
    }
}

/// On-disk shape of `config.yaml`. Every field is optional.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
struct SettingsFile {
    #[serde(default = "default_true")]
    sql_review_enabled: bool,

    #[serde(default)]
    measures_dir: Option<PathBuf>,

    #[serde(default)]
    measure_index_file: Option<PathBuf>,

    #[serde(default)]
    default_export_dir: Option<PathBuf>,

    #[serde(default)]
    database_path: Option<PathBuf>,

    #[serde(default)]
    row_cap: Option<usize>,

    #[serde(default)]
    llm: LlmSettings,

    #[serde(default)]
    schema: Option<SchemaCatalog>,
}

impl Default for SettingsFile {
    fn default() -> Self {
        Self {
            sql_review_enabled: true,
            measures_dir: None,
            measure_index_file: None,
            default_export_dir: None,
            database_path: None,
            row_cap: None,
            llm: LlmSettings::default(),
            schema: None,
        }
    }
}

/// Fully resolved agent settings; every path is absolute.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentSettings {
    pub source: Option<PathBuf>,
    pub sql_review_enabled: bool,
    pub measures_dir: PathBuf,
    pub measure_index_file: PathBuf,
    pub export_dir: PathBuf,
    pub database_path: Option<PathBuf>,
    pub row_cap: usize,
    pub llm: LlmSettings,
    pub schema: SchemaCatalog,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid configuration{}: {detail}", location(.path.as_deref()))]
pub struct SettingsError {
    pub path: Option<PathBuf>,
    pub detail: String,
}

fn location(path: Option<&Path>) -> String {
    path.map(|path| format!(" ({})", path.display()))
        .unwrap_or_default()
}

impl SettingsError {
    fn new(path: Option<&Path>, detail: impl Into<String>) -> Self {
        Self {
            path: path.map(Path::to_path_buf),
            detail: detail.into(),
        }
    }
}

/// Reads `config.yaml` (explicit `config_path`, else `<cwd>/config.yaml` when
/// present) and resolves it against `paths`. `database_override` wins over the
/// file's `database_path`.
pub fn load_settings(
    paths: &RuntimePaths,
    config_path: Option<&Path>,
    database_override: Option<&Path>,
) -> Result<AgentSettings, SettingsError> {
    let (source, file) = match config_path {
        Some(path) => {
            let path = resolve_user_path(path, &paths.home_dir, &paths.cwd)
                .map_err(|error| SettingsError::new(Some(path), format!("{error:#}")))?;
            let file = read_settings_file(&path)?;
            (Some(path), file)
        }
        None => {
            let path = paths.cwd.join(DEFAULT_CONFIG_FILE);
            if path.is_file() {
                let file = read_settings_file(&path)?;
                (Some(path), file)
            } else {
                debug!(path = %path.display(), "no config file; using defaults");
                (None, SettingsFile::default())
            }
        }
    };

    let settings = resolve_settings(paths, source, file, database_override)?;
    info!(
        source = ?settings.source,
        measures_dir = %settings.measures_dir.display(),
        sql_review_enabled = settings.sql_review_enabled,
        "settings loaded"
    );
    Ok(settings)
}

fn read_settings_file(path: &Path) -> Result<SettingsFile, SettingsError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|error| SettingsError::new(Some(path), format!("failed to read: {error}")))?;
    if raw.trim().is_empty() {
        return Ok(SettingsFile::default());
    }
    serde_yaml::from_str(&raw)
        .map_err(|error| SettingsError::new(Some(path), format!("failed to parse: {error}")))
}

fn resolve_settings(
    paths: &RuntimePaths,
    source: Option<PathBuf>,
    file: SettingsFile,
    database_override: Option<&Path>,
) -> Result<AgentSettings, SettingsError> {
    let source_ref = source.as_deref();
    let resolve = |path: &Path| {
        resolve_user_path(path, &paths.home_dir, &paths.cwd)
            .map_err(|error| SettingsError::new(source_ref, format!("{error:#}")))
    };

    let measures_dir = resolve(file.measures_dir.as_deref().unwrap_or(Path::new("measures")))?;
    let measure_index_file = match file.measure_index_file.as_deref() {
        Some(path) => resolve(path)?,
        None => paths.out_dir.join("measure_index.json"),
    };
    let export_dir = match file.default_export_dir.as_deref() {
        Some(path) => resolve(path)?,
        None => paths.out_dir.join("exports"),
    };
    let database_path = match database_override.or(file.database_path.as_deref()) {
        Some(path) => Some(resolve(path)?),
        None => None,
    };

    let row_cap = file.row_cap.unwrap_or(DEFAULT_ROW_CAP);
    if row_cap == 0 {
        return Err(SettingsError::new(
            source_ref,
            "row_cap must be greater than zero",
        ));
    }

    let schema = file.schema.unwrap_or_default();
    validate_schema(&schema).map_err(|detail| SettingsError::new(source_ref, detail))?;

    if file.llm.model.trim().is_empty() {
        return Err(SettingsError::new(source_ref, "llm.model must not be empty"));
    }

    Ok(AgentSettings {
        source,
        sql_review_enabled: file.sql_review_enabled,
        measures_dir,
        measure_index_file,
        export_dir,
        database_path,
        row_cap,
        llm: file.llm,
        schema,
    })
}

fn identifier_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)?$").expect("valid regex")
    })
}

fn validate_schema(schema: &SchemaCatalog) -> Result<(), String> {
    let identifier = identifier_pattern();
    if !identifier.is_match(&schema.table) {
        return Err(format!(
            "schema.table `{}` must be a plain identifier",
            schema.table
        ));
    }
    if schema.columns.is_empty() {
        return Err("schema.columns must list at least one column".to_string());
    }
    for column in &schema.columns {
        if !identifier.is_match(&column.name) {
            return Err(format!(
                "schema column `{}` must be a plain identifier",
                column.name
            ));
        }
    }
    Ok(())
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
