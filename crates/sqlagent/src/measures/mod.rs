pub mod resolver;

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use regex::Regex;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::models::{MeasureConfig, MeasureConfigFile, normalize_alias};

pub use resolver::{Resolution, resolve};

pub const INDEX_CACHE_SCHEMA_VERSION: &str = "sqlagent.measure-index.v1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigErrorKind {
    DuplicateCode,
    DuplicateAlias,
    MalformedConfig,
    Io,
}

impl ConfigErrorKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::DuplicateCode => "duplicate_code",
            Self::DuplicateAlias => "duplicate_alias",
            Self::MalformedConfig => "malformed_config",
            Self::Io => "io",
        }
    }
}

impl Display for ConfigErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("measure config error ({kind}): {detail}")]
pub struct ConfigError {
    pub kind: ConfigErrorKind,
    pub detail: String,
    pub path: Option<PathBuf>,
}

impl ConfigError {
    fn new(kind: ConfigErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
            path: None,
        }
    }

    fn at(mut self, path: &Path) -> Self {
        self.path = Some(path.to_path_buf());
        self
    }

    fn malformed(path: &Path, detail: impl Into<String>) -> Self {
        Self::new(ConfigErrorKind::MalformedConfig, detail).at(path)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("measure code not found: {code}")]
pub struct MeasureNotFound {
    pub code: String,
}

/// Derived lookup structure: normalized alias -> canonical code, plus the
/// configs themselves keyed by normalized code.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AliasIndex {
    configs: BTreeMap<String, MeasureConfig>,
    aliases: BTreeMap<String, String>,
}

impl AliasIndex {
    /// Builds an index from already-validated configs, enforcing code and
    /// alias uniqueness.
    pub fn build(configs: impl IntoIterator<Item = MeasureConfig>) -> Result<Self, ConfigError> {
        let mut index = Self::default();
        for config in configs {
            index.insert(config)?;
        }
        Ok(index)
    }

    fn insert(&mut self, config: MeasureConfig) -> Result<(), ConfigError> {
        let code_key = normalize_alias(&config.code);
        if let Some(existing) = self.configs.get(&code_key) {
            return Err(ConfigError::new(
                ConfigErrorKind::DuplicateCode,
                format!(
                    "measure code `{}` is declared more than once (already loaded as `{}`)",
                    config.code, existing.code
                ),
            ));
        }

        let aliases = config.indexed_aliases();
        for alias in &aliases {
            if let Some(owner) = self.aliases.get(alias) {
                return Err(ConfigError::new(
                    ConfigErrorKind::DuplicateAlias,
                    format!(
                        "alias `{alias}` of measure `{}` already maps to measure `{owner}`",
                        config.code
                    ),
                ));
            }
        }

        for alias in aliases {
            self.aliases.insert(alias, config.code.clone());
        }
        self.configs.insert(code_key, config);
        Ok(())
    }

    /// Canonical code owning `alias`, matched exactly after normalization.
    #[must_use]
    pub fn code_for(&self, alias: &str) -> Option<&str> {
        self.aliases.get(&normalize_alias(alias)).map(String::as_str)
    }

    #[must_use]
    pub fn get(&self, code: &str) -> Option<&MeasureConfig> {
        self.configs.get(&normalize_alias(code))
    }

    #[must_use]
    pub fn by_alias(&self, alias: &str) -> Option<&MeasureConfig> {
        self.code_for(alias).and_then(|code| self.get(code))
    }

    pub fn configs(&self) -> impl Iterator<Item = &MeasureConfig> {
        self.configs.values()
    }

    #[must_use]
    pub fn aliases(&self) -> &BTreeMap<String, String> {
        &self.aliases
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.configs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.configs.is_empty()
    }
}

/// Reads every `*.json` file in `dir` (file-name order) into a fresh index.
/// The first violation aborts the whole load.
pub fn load(dir: &Path) -> Result<AliasIndex, ConfigError> {
    let files = config_files(dir)?;
    let mut index = AliasIndex::default();

    for path in &files {
        let config = load_config_file(path)?;
        debug!(code = %config.code, path = %path.display(), "measure config parsed");
        index.insert(config).map_err(|error| error.at(path))?;
    }

    info!(
        measures = index.len(),
        aliases = index.aliases.len(),
        dir = %dir.display(),
        "measure index loaded"
    );
    Ok(index)
}

fn config_files(dir: &Path) -> Result<Vec<PathBuf>, ConfigError> {
    let entries = std::fs::read_dir(dir).map_err(|error| {
        ConfigError::new(
            ConfigErrorKind::Io,
            format!("failed to read measures directory: {error}"),
        )
        .at(dir)
    })?;

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|error| {
            ConfigError::new(
                ConfigErrorKind::Io,
                format!("failed to list measures directory: {error}"),
            )
            .at(dir)
        })?;
        let path = entry.path();
        if path.is_file() && is_json_file(&path) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn is_json_file(path: &Path) -> bool {
    path.extension()
        .and_then(|extension| extension.to_str())
        .is_some_and(|extension| extension.eq_ignore_ascii_case("json"))
}

/// Parses and validates a single config file.
pub fn load_config_file(path: &Path) -> Result<MeasureConfig, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|error| {
        ConfigError::new(
            ConfigErrorKind::Io,
            format!("failed to read measure config: {error}"),
        )
        .at(path)
    })?;
    let file: MeasureConfigFile = serde_json::from_str(&raw)
        .map_err(|error| ConfigError::malformed(path, format!("invalid measure JSON: {error}")))?;
    validate_config_file(file).map_err(|detail| ConfigError::malformed(path, detail))
}

fn identifier_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid regex"))
}

fn aggregate_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"(?i)^\s*(SUM|COUNT|AVG|MIN|MAX)\s*\(\s*(DISTINCT\s+)?([A-Za-z_][A-Za-z0-9_]*|\*)\s*\)\s*$",
        )
        .expect("valid regex")
    })
}

/// Checks the config invariants and converts the file shape into a
/// `MeasureConfig`. Returns a human-readable detail on failure.
pub fn validate_config_file(file: MeasureConfigFile) -> Result<MeasureConfig, String> {
    let code = file.measure_code.trim().to_string();
    if !identifier_pattern().is_match(&code) {
        return Err(format!(
            "measure_code `{}` must be a plain identifier",
            file.measure_code
        ));
    }

    let name = file.measure_name.trim().to_string();
    if name.is_empty() {
        return Err(format!("measure `{code}` has an empty measure_name"));
    }

    let info_type = file.info_type.trim().to_string();
    if info_type.is_empty() {
        return Err(format!("measure `{code}` has an empty info_type"));
    }

    let formula = file.formula.trim().to_string();
    if !aggregate_pattern().is_match(&formula) {
        return Err(format!(
            "measure `{code}` formula `{formula}` must be a single aggregate over one column"
        ));
    }

    if file.aliases.iter().any(|alias| alias.trim().is_empty()) {
        return Err(format!("measure `{code}` declares an empty alias"));
    }

    let report_aspects = trimmed_entries(&file.report_aspects);
    if report_aspects.is_empty() || report_aspects.iter().any(String::is_empty) {
        return Err(format!(
            "measure `{code}` must declare at least one non-empty report aspect"
        ));
    }

    let required_filters = trimmed_entries(&file.filters);
    if required_filters.is_empty() {
        return Err(format!(
            "measure `{code}` must declare at least one required filter"
        ));
    }
    for filter in &required_filters {
        if filter.is_empty() {
            return Err(format!("measure `{code}` declares an empty filter"));
        }
        if filter.contains(';') || filter.contains("--") || filter.contains("/*") {
            return Err(format!(
                "measure `{code}` filter `{filter}` contains a statement separator or comment"
            ));
        }
    }

    let default_group_by = trimmed_entries(&file.default_group_by);
    if let Some(column) = default_group_by
        .iter()
        .find(|column| !identifier_pattern().is_match(column))
    {
        return Err(format!(
            "measure `{code}` default_group_by column `{column}` must be a plain identifier"
        ));
    }

    Ok(MeasureConfig {
        code,
        name,
        aliases: file
            .aliases
            .iter()
            .map(|alias| alias.trim().to_string())
            .collect(),
        info_type,
        formula,
        report_aspects,
        required_filters,
        default_group_by,
    })
}

fn trimmed_entries(values: &[String]) -> Vec<String> {
    values.iter().map(|value| value.trim().to_string()).collect()
}

/// Shared, read-mostly measure store. Readers take a snapshot of the active
/// index; `refresh` publishes a new index by replacement.
#[derive(Debug)]
pub struct MeasureStore {
    measures_dir: PathBuf,
    active: RwLock<Arc<AliasIndex>>,
}

impl MeasureStore {
    /// Loads `measures_dir`; on failure no store is created.
    pub fn open(measures_dir: &Path) -> Result<Self, ConfigError> {
        let index = load(measures_dir)?;
        Ok(Self::with_index(measures_dir, index))
    }

    #[must_use]
    pub fn with_index(measures_dir: &Path, index: AliasIndex) -> Self {
        Self {
            measures_dir: measures_dir.to_path_buf(),
            active: RwLock::new(Arc::new(index)),
        }
    }

    #[must_use]
    pub fn measures_dir(&self) -> &Path {
        &self.measures_dir
    }

    #[must_use]
    pub fn snapshot(&self) -> Arc<AliasIndex> {
        let guard = self.active.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&*guard)
    }

    pub fn lookup(&self, code: &str) -> Result<MeasureConfig, MeasureNotFound> {
        self.snapshot()
            .get(code)
            .cloned()
            .ok_or_else(|| MeasureNotFound {
                code: code.to_string(),
            })
    }

    /// All active configs ordered by code.
    #[must_use]
    pub fn list(&self) -> Vec<MeasureConfig> {
        self.snapshot().configs().cloned().collect()
    }

    /// Re-runs the load; the active index is only replaced when it succeeds.
    pub fn refresh(&self) -> Result<Arc<AliasIndex>, ConfigError> {
        let index = match load(&self.measures_dir) {
            Ok(index) => Arc::new(index),
            Err(error) => {
                warn!(%error, "measure index refresh failed; keeping previous index");
                return Err(error);
            }
        };

        let mut guard = self.active.write().unwrap_or_else(PoisonError::into_inner);
        *guard = Arc::clone(&index);
        Ok(index)
    }

    /// Copies `source` into the measures directory and refreshes. If the new
    /// file breaks the load it is removed again and the old index stays.
    pub fn add_config(&self, source: &Path) -> Result<PathBuf, ConfigError> {
        load_config_file(source)?;
        let file_name = source.file_name().ok_or_else(|| {
            ConfigError::malformed(source, "measure config path has no file name")
        })?;
        let target = self.measures_dir.join(file_name);
        if target.exists() {
            return Err(ConfigError::new(
                ConfigErrorKind::Io,
                format!(
                    "a measure config named `{}` already exists",
                    file_name.to_string_lossy()
                ),
            )
            .at(&target));
        }

        std::fs::create_dir_all(&self.measures_dir).map_err(|error| {
            ConfigError::new(
                ConfigErrorKind::Io,
                format!("failed to create measures directory: {error}"),
            )
            .at(&self.measures_dir)
        })?;
        std::fs::copy(source, &target).map_err(|error| {
            ConfigError::new(
                ConfigErrorKind::Io,
                format!("failed to copy measure config: {error}"),
            )
            .at(&target)
        })?;

        if let Err(error) = self.refresh() {
            if let Err(cleanup) = std::fs::remove_file(&target) {
                warn!(%cleanup, path = %target.display(), "failed to remove rejected measure config");
            }
            return Err(error);
        }

        info!(path = %target.display(), "measure config added");
        Ok(target)
    }
}

/// Writes the alias -> code map as a JSON convenience artifact. It is never
/// read back; the config directory stays the source of truth.
pub fn write_index_cache(
    path: &Path,
    index: &AliasIndex,
    generated_at_utc: &str,
) -> Result<(), ConfigError> {
    let io_error = |detail: String| ConfigError::new(ConfigErrorKind::Io, detail).at(path);

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|error| io_error(format!("failed to create index cache directory: {error}")))?;
    }

    let document = json!({
        "schema_version": INDEX_CACHE_SCHEMA_VERSION,
        "generated_at_utc": generated_at_utc,
        "measure_count": index.len(),
        "aliases": index.aliases(),
    });
    let encoded = serde_json::to_vec_pretty(&document)
        .map_err(|error| io_error(format!("failed to encode index cache: {error}")))?;
    std::fs::write(path, encoded)
        .map_err(|error| io_error(format!("failed to write index cache: {error}")))
}
