//! Configuration file loading for CLI defaults.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use capture_core::{EngineConfig, ProxySettings};

/// Most retry offsets a schedule may declare.
const MAX_RETRY_OFFSETS: usize = 10;

/// Largest accepted retry offset.
const MAX_RETRY_OFFSET_MS: u64 = 60_000;

/// File configuration for capture defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileConfig {
    /// Default output directory for captured documents.
    pub output_dir: Option<PathBuf>,
    /// HTTP connect timeout in seconds.
    pub connect_timeout_secs: Option<u64>,
    /// HTTP read timeout in seconds.
    pub read_timeout_secs: Option<u64>,
    /// Attempt offsets in milliseconds.
    pub retry_offsets_ms: Option<Vec<u64>>,
    /// Extra publisher path fragments that mark PDF endpoints.
    pub extra_pdf_path_patterns: Option<Vec<String>>,
    /// Library proxy prefix or `{url}` template.
    pub library_proxy_url: Option<String>,
    /// Whether exhausted captures suggest (and may retry) the proxy.
    pub proxy_enabled: Option<bool>,
    /// Default verbosity mode.
    pub verbosity: Option<VerbositySetting>,
    /// User agent override for the headless session.
    pub user_agent: Option<String>,
    /// Directory for native download temp artifacts.
    pub temp_dir: Option<PathBuf>,
}

impl FileConfig {
    /// Validates config values against runtime constraints.
    pub fn validate(&self) -> Result<()> {
        validate_timeout_secs("connect_timeout_secs", self.connect_timeout_secs)?;
        validate_timeout_secs("read_timeout_secs", self.read_timeout_secs)?;

        if let Some(offsets) = &self.retry_offsets_ms {
            if offsets.is_empty() || offsets.len() > MAX_RETRY_OFFSETS {
                bail!(
                    "Invalid config value for `retry_offsets_ms`: expected 1..={MAX_RETRY_OFFSETS} offsets, got {}",
                    offsets.len()
                );
            }
            if let Some(offset) = offsets.iter().find(|offset| **offset > MAX_RETRY_OFFSET_MS) {
                bail!(
                    "Invalid config value for `retry_offsets_ms`: {offset}. Expected range: 0..={MAX_RETRY_OFFSET_MS}"
                );
            }
        }

        if let Some(proxy) = &self.library_proxy_url
            && !(proxy.starts_with("http://") || proxy.starts_with("https://"))
        {
            bail!("Invalid config value for `library_proxy_url`: '{proxy}'. Expected an http(s) URL");
        }
        Ok(())
    }

    /// Overlays the file values on `config`.
    pub fn apply_to(&self, config: &mut EngineConfig) {
        if let Some(secs) = self.connect_timeout_secs {
            config.connect_timeout_secs = secs;
        }
        if let Some(secs) = self.read_timeout_secs {
            config.read_timeout_secs = secs;
        }
        if let Some(offsets) = &self.retry_offsets_ms {
            config.retry_offsets = offsets.iter().copied().map(Duration::from_millis).collect();
        }
        if let Some(patterns) = &self.extra_pdf_path_patterns {
            config.heuristics = config.heuristics.clone().with_extra_path_patterns(patterns);
        }
        if let Some(proxy) = &self.library_proxy_url {
            config.proxy = ProxySettings {
                library_proxy_url: Some(proxy.clone()),
                enabled: self.proxy_enabled.unwrap_or(true),
            };
        } else if let Some(enabled) = self.proxy_enabled {
            config.proxy.enabled = enabled;
        }
        if let Some(user_agent) = &self.user_agent {
            config.user_agent = Some(user_agent.clone());
        }
        if let Some(dir) = &self.temp_dir {
            config.temp_dir = Some(dir.clone());
        }
    }
}

fn validate_timeout_secs(field: &str, value: Option<u64>) -> Result<()> {
    let Some(value) = value else {
        return Ok(());
    };
    if !(1..=3600).contains(&value) {
        bail!("Invalid config value for `{field}`: {value}. Expected range: 1..=3600");
    }
    Ok(())
}

/// Supported config verbosity labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerbositySetting {
    Default,
    Verbose,
    Quiet,
    Debug,
}

impl VerbositySetting {
    /// Default tracing level for this setting.
    #[must_use]
    pub fn level(self) -> &'static str {
        match self {
            Self::Default => "info",
            Self::Verbose | Self::Debug => "debug",
            Self::Quiet => "error",
        }
    }
}

/// Loaded config metadata.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    /// Resolved config path if a base directory is known.
    pub path: Option<PathBuf>,
    /// Parsed file config when a config file exists and was valid.
    pub config: Option<FileConfig>,
}

/// Resolves default config path.
///
/// Priority:
/// 1. `$XDG_CONFIG_HOME/paper-capture/config.toml`
/// 2. `$HOME/.config/paper-capture/config.toml`
#[must_use]
pub fn resolve_default_config_path() -> Option<PathBuf> {
    if let Some(xdg_config_home) = env_var_non_empty_os("XDG_CONFIG_HOME") {
        return Some(
            PathBuf::from(xdg_config_home)
                .join("paper-capture")
                .join("config.toml"),
        );
    }

    let home = env_var_non_empty_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join("paper-capture")
            .join("config.toml"),
    )
}

fn env_var_non_empty_os(name: &str) -> Option<std::ffi::OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}

/// Loads config from `explicit` (which must exist) or the default path if present.
pub fn load_config(explicit: Option<&Path>) -> Result<LoadedConfig> {
    if let Some(path) = explicit {
        return Ok(LoadedConfig {
            path: Some(path.to_path_buf()),
            config: Some(load_file_config(path)?),
        });
    }

    let path = resolve_default_config_path();
    let config = match path.as_deref() {
        Some(path_ref) if path_ref.exists() => Some(load_file_config(path_ref)?),
        _ => None,
    };
    Ok(LoadedConfig { path, config })
}

fn load_file_config(path: &Path) -> Result<FileConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
    parse_config_str(&raw)
        .with_context(|| format!("Failed to parse config file '{}'", path.display()))
}

fn parse_config_str(raw: &str) -> Result<FileConfig> {
    let mut cfg = FileConfig::default();
    for (line_index, raw_line) in raw.lines().enumerate() {
        let line = strip_inline_comment(raw_line).trim();
        if line.is_empty() {
            continue;
        }

        let Some((raw_key, raw_value)) = line.split_once('=') else {
            bail!(
                "Invalid config syntax on line {}: expected key = value",
                line_index + 1
            );
        };

        let key = raw_key.trim();
        let value = raw_value.trim();
        let invalid = || format!("Invalid `{key}` value on line {}", line_index + 1);

        match key {
            "output_dir" => {
                cfg.output_dir = Some(PathBuf::from(
                    parse_string_literal(value).with_context(invalid)?,
                ));
            }
            "temp_dir" => {
                cfg.temp_dir = Some(PathBuf::from(
                    parse_string_literal(value).with_context(invalid)?,
                ));
            }
            "connect_timeout_secs" => {
                cfg.connect_timeout_secs = Some(parse_integer_u64(value).with_context(invalid)?);
            }
            "read_timeout_secs" => {
                cfg.read_timeout_secs = Some(parse_integer_u64(value).with_context(invalid)?);
            }
            "retry_offsets_ms" => {
                let items = parse_list(value).with_context(invalid)?;
                let offsets = items
                    .iter()
                    .map(|item| parse_integer_u64(item))
                    .collect::<Result<Vec<_>>>()
                    .with_context(invalid)?;
                cfg.retry_offsets_ms = Some(offsets);
            }
            "extra_pdf_path_patterns" => {
                let items = parse_list(value).with_context(invalid)?;
                let patterns = items
                    .iter()
                    .map(|item| parse_string_literal(item))
                    .collect::<Result<Vec<_>>>()
                    .with_context(invalid)?;
                cfg.extra_pdf_path_patterns = Some(patterns);
            }
            "library_proxy_url" => {
                cfg.library_proxy_url = Some(parse_string_literal(value).with_context(invalid)?);
            }
            "proxy_enabled" => {
                cfg.proxy_enabled = Some(parse_boolean(value).with_context(invalid)?);
            }
            "user_agent" => {
                cfg.user_agent = Some(parse_string_literal(value).with_context(invalid)?);
            }
            "verbosity" => {
                let parsed = parse_string_literal(value).with_context(invalid)?;
                cfg.verbosity = Some(parse_verbosity(&parsed).with_context(|| {
                    format!(
                        "Invalid `verbosity` value '{}' on line {}",
                        parsed,
                        line_index + 1
                    )
                })?);
            }
            unknown => {
                bail!(
                    "Unknown configuration key: '{}' on line {}",
                    unknown,
                    line_index + 1
                );
            }
        }
    }
    cfg.validate()?;
    Ok(cfg)
}

fn strip_inline_comment(line: &str) -> &str {
    let mut in_string = false;
    for (index, ch) in line.char_indices() {
        match ch {
            '"' => in_string = !in_string,
            '#' if !in_string => return &line[..index],
            _ => {}
        }
    }
    line
}

fn parse_string_literal(raw_value: &str) -> Result<String> {
    let raw_value = raw_value.trim();
    if raw_value.len() < 2 || !raw_value.starts_with('"') || !raw_value.ends_with('"') {
        bail!("Expected double-quoted string");
    }
    Ok(raw_value[1..raw_value.len() - 1].to_string())
}

/// Splits a `[a, b, "c"]` array into raw item tokens.
///
/// Commas inside quoted strings do not split.
fn parse_list(raw_value: &str) -> Result<Vec<String>> {
    let Some(inner) = raw_value
        .trim()
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
    else {
        bail!("Expected array in square brackets");
    };

    let mut items = Vec::new();
    let mut current = String::new();
    let mut in_string = false;
    for ch in inner.chars() {
        match ch {
            '"' => {
                in_string = !in_string;
                current.push(ch);
            }
            ',' if !in_string => {
                items.push(std::mem::take(&mut current));
            }
            _ => current.push(ch),
        }
    }
    if in_string {
        bail!("Unterminated string in array");
    }
    items.push(current);

    let mut items: Vec<String> = items.into_iter().map(|item| item.trim().to_string()).collect();
    // Trailing comma, or the empty array.
    if items.last().is_some_and(String::is_empty) {
        items.pop();
    }
    if items.iter().any(String::is_empty) {
        bail!("Empty array element");
    }
    Ok(items)
}

fn parse_integer_u64(raw_value: &str) -> Result<u64> {
    let token = raw_value.trim();
    if token.is_empty() {
        bail!("Expected integer value");
    }
    let value = token.parse::<i128>()?;
    if value < 0 {
        bail!("Expected non-negative integer");
    }
    u64::try_from(value).map_err(|_| anyhow::anyhow!("Integer value out of range for u64"))
}

fn parse_verbosity(value: &str) -> Result<VerbositySetting> {
    match value {
        "default" => Ok(VerbositySetting::Default),
        "verbose" => Ok(VerbositySetting::Verbose),
        "quiet" => Ok(VerbositySetting::Quiet),
        "debug" => Ok(VerbositySetting::Debug),
        _ => bail!("Expected one of: default, verbose, quiet, debug"),
    }
}

fn parse_boolean(raw_value: &str) -> Result<bool> {
    match raw_value.trim() {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => bail!("Expected 'true' or 'false'"),
    }
}
