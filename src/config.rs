use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::booru::{ApiSource, ClientSettings, DEFAULT_USER_AGENT};
use crate::domain::{Layout, ScheduleMode, VariantKind};
use crate::error::HarvestError;
use crate::retry::RetryPolicy;

pub const DEFAULT_CONFIG_FILE: &str = "harvest.json";

/// On-disk shape of `harvest.json`. Every key is optional.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub source: Option<ApiSource>,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub tags_file: Option<PathBuf>,
    #[serde(default)]
    pub layout: Option<Layout>,
    #[serde(default)]
    pub output_dir: Option<Utf8PathBuf>,
    #[serde(default)]
    pub archive_path: Option<Utf8PathBuf>,
    #[serde(default)]
    pub log_path: Option<Utf8PathBuf>,
    #[serde(default)]
    pub staging_dir: Option<Utf8PathBuf>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub proxy: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub start_line: Option<u64>,
    #[serde(default)]
    pub batch_width: Option<usize>,
    #[serde(default)]
    pub quota: Option<usize>,
    #[serde(default)]
    pub mode: Option<ScheduleMode>,
    #[serde(default)]
    pub retry: Option<RetryPolicy>,
    #[serde(default)]
    pub variants: Option<Vec<String>>,
    #[serde(default)]
    pub max_pages: Option<u32>,
    #[serde(default)]
    pub max_resume_attempts: Option<u32>,
}

/// Command-line values that win over the file.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub source: Option<ApiSource>,
    pub tags_file: Option<PathBuf>,
    pub layout: Option<Layout>,
    pub output_dir: Option<Utf8PathBuf>,
    pub timeout_secs: Option<u64>,
    pub proxy: Option<String>,
    pub start_line: Option<u64>,
    pub batch_width: Option<usize>,
    pub quota: Option<usize>,
    pub mode: Option<ScheduleMode>,
}

#[derive(Debug, Clone)]
pub enum OutputTarget {
    Folders {
        root: Utf8PathBuf,
    },
    Archive {
        archive: Utf8PathBuf,
        log: Utf8PathBuf,
        staging: Utf8PathBuf,
    },
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub source: ApiSource,
    pub tags_file: PathBuf,
    pub output: OutputTarget,
    pub client: ClientSettings,
    pub run: RunOptions,
}

/// The knobs the pipeline core reads.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub start_line: u64,
    pub batch_width: usize,
    pub quota: usize,
    pub mode: ScheduleMode,
    pub retry: RetryPolicy,
    pub variants: Vec<VariantKind>,
    pub max_pages: Option<u32>,
    pub max_resume_attempts: Option<u32>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            start_line: 1,
            batch_width: 5,
            quota: 50,
            mode: ScheduleMode::Sequential,
            retry: RetryPolicy::default(),
            variants: Layout::Folders.default_variants(),
            max_pages: None,
            max_resume_attempts: None,
        }
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads `path`, or `harvest.json` when present, then applies overrides.
    pub fn resolve(
        path: Option<&str>,
        overrides: ConfigOverrides,
    ) -> Result<ResolvedConfig, HarvestError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        let config = if path.is_none() && !config_path.exists() {
            Config::default()
        } else {
            let content = fs::read_to_string(&config_path)
                .map_err(|_| HarvestError::ConfigRead(config_path.clone()))?;
            serde_json::from_str(&content)
                .map_err(|err| HarvestError::ConfigParse(err.to_string()))?
        };

        Self::resolve_config(config, overrides)
    }

    pub fn resolve_config(
        config: Config,
        overrides: ConfigOverrides,
    ) -> Result<ResolvedConfig, HarvestError> {
        let schema_version = config.schema_version.unwrap_or(1);
        let source = overrides
            .source
            .or(config.source)
            .unwrap_or(ApiSource::Danbooru);
        let layout = overrides
            .layout
            .or(config.layout)
            .unwrap_or(Layout::Folders);

        let output = match layout {
            Layout::Folders => OutputTarget::Folders {
                root: overrides
                    .output_dir
                    .or(config.output_dir)
                    .unwrap_or_else(|| Utf8PathBuf::from("downloaded_images")),
            },
            Layout::Archive => {
                let base = overrides.output_dir.or(config.output_dir);
                let under = |name: &str| match &base {
                    Some(base) => base.join(name),
                    None => Utf8PathBuf::from(name),
                };
                OutputTarget::Archive {
                    archive: config.archive_path.unwrap_or_else(|| under("images.zip")),
                    log: config.log_path.unwrap_or_else(|| under("train.csv")),
                    staging: config.staging_dir.unwrap_or_else(|| under("images")),
                }
            }
        };

        let variants = match config.variants {
            Some(names) => names
                .iter()
                .map(|name| name.parse())
                .collect::<Result<Vec<VariantKind>, HarvestError>>()?,
            None => layout.default_variants(),
        };

        let run = RunOptions {
            start_line: overrides.start_line.or(config.start_line).unwrap_or(1),
            batch_width: overrides.batch_width.or(config.batch_width).unwrap_or(5),
            quota: overrides.quota.or(config.quota).unwrap_or(50),
            mode: overrides
                .mode
                .or(config.mode)
                .unwrap_or(ScheduleMode::Sequential),
            retry: config.retry.unwrap_or_default(),
            variants,
            max_pages: config.max_pages,
            max_resume_attempts: config.max_resume_attempts,
        };
        validate(&run)?;

        let timeout_secs = overrides.timeout_secs.or(config.timeout_secs).unwrap_or(30);
        if timeout_secs == 0 {
            return Err(HarvestError::InvalidConfig(
                "timeout_secs must be at least 1".to_string(),
            ));
        }
        let client = ClientSettings {
            endpoint: config
                .endpoint
                .unwrap_or_else(|| source.default_endpoint().to_string()),
            timeout: Duration::from_secs(timeout_secs),
            proxy: overrides
                .proxy
                .or(config.proxy)
                .filter(|proxy| !proxy.trim().is_empty()),
            user_agent: config
                .user_agent
                .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
        };

        Ok(ResolvedConfig {
            schema_version,
            source,
            tags_file: overrides
                .tags_file
                .or(config.tags_file)
                .unwrap_or_else(|| PathBuf::from("tags.txt")),
            output,
            client,
            run,
        })
    }
}

fn validate(run: &RunOptions) -> Result<(), HarvestError> {
    if run.start_line == 0 {
        return Err(HarvestError::InvalidConfig(
            "start_line is 1-based".to_string(),
        ));
    }
    if run.batch_width == 0 {
        return Err(HarvestError::InvalidConfig(
            "batch_width must be at least 1".to_string(),
        ));
    }
    if run.quota == 0 {
        return Err(HarvestError::InvalidConfig(
            "quota must be at least 1".to_string(),
        ));
    }
    if run.retry.max_attempts == 0 {
        return Err(HarvestError::InvalidConfig(
            "retry.max_attempts must be at least 1".to_string(),
        ));
    }
    if run.variants.is_empty() {
        return Err(HarvestError::InvalidConfig(
            "variants must name at least one kind".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn defaults_resolve() {
        let resolved =
            ConfigLoader::resolve_config(Config::default(), ConfigOverrides::default()).unwrap();
        assert_eq!(resolved.schema_version, 1);
        assert_eq!(resolved.source, ApiSource::Danbooru);
        assert_eq!(resolved.run.batch_width, 5);
        assert_eq!(resolved.run.variants, vec![VariantKind::Original]);
        assert_matches!(resolved.output, OutputTarget::Folders { .. });
    }

    #[test]
    fn zero_quota_rejected() {
        let config = Config {
            quota: Some(0),
            ..Config::default()
        };
        let err = ConfigLoader::resolve_config(config, ConfigOverrides::default()).unwrap_err();
        assert_matches!(err, HarvestError::InvalidConfig(_));
    }
}
