use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::HarvestError;

/// Extension of the lossy intermediate format that is always re-encoded.
pub const INTERMEDIATE_EXT: &str = "webp";
/// Extension every intermediate asset is persisted as.
pub const CANONICAL_EXT: &str = "jpg";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TagTask {
    pub line_number: u64,
    pub query: String,
}

impl TagTask {
    pub fn new(line_number: u64, query: impl Into<String>) -> Self {
        Self {
            line_number,
            query: query.into(),
        }
    }

    /// The query as the search API expects it: words joined with underscores.
    pub fn api_query(&self) -> String {
        self.query.trim().replace(' ', "_")
    }

    /// Directory name used by the folder-per-tag layout. Always a single
    /// visible path component below the output root.
    pub fn folder_name(&self) -> String {
        let name = self.query.trim().replace([' ', '/', '\\'], "_");
        let visible = name.trim_start_matches('.');
        let leading = name.len() - visible.len();
        let name = format!("{}{visible}", "_".repeat(leading));
        if name.is_empty() {
            "_".to_string()
        } else {
            name
        }
    }
}

/// Last path segment of `url` without query string or fragment.
pub fn url_basename(url: &str) -> Option<&str> {
    let path = url.split(['?', '#']).next()?;
    let name = path.rsplit('/').next()?.trim();
    (!name.is_empty()).then_some(name)
}

/// Canonical filename used to test whether an asset is already materialized.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DedupKey(String);

impl DedupKey {
    /// Normalizes a persisted or remote filename. Scanner and materializer both
    /// go through here so the intermediate format maps to the canonical one.
    pub fn from_filename(name: &str) -> Option<Self> {
        let name = name.trim();
        // Hidden names would be skipped by the folder scanner.
        if name.is_empty() || name.starts_with('.') || name.contains(['/', '\\']) {
            return None;
        }
        match name.rsplit_once('.') {
            Some((stem, ext)) if ext.eq_ignore_ascii_case(INTERMEDIATE_EXT) && !stem.is_empty() => {
                Some(Self(format!("{stem}.{CANONICAL_EXT}")))
            }
            _ => Some(Self(name.to_string())),
        }
    }

    /// Basename of a resolved variant URL, query string and fragment removed.
    pub fn from_url(url: &str) -> Option<Self> {
        Self::from_filename(url_basename(url)?)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Filename of the metadata sidecar that accompanies this asset.
    pub fn sidecar_name(&self) -> String {
        match self.0.rsplit_once('.') {
            Some((stem, _)) if !stem.is_empty() => format!("{stem}.txt"),
            _ => format!("{}.txt", self.0),
        }
    }
}

impl fmt::Display for DedupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Renditions offered by the search APIs, named as the APIs name them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VariantKind {
    #[serde(rename = "720x720")]
    Thumb720,
    #[serde(rename = "sample")]
    Sample,
    #[serde(rename = "preview")]
    Preview,
    #[serde(rename = "original")]
    Original,
}

impl VariantKind {
    pub fn as_str(self) -> &'static str {
        match self {
            VariantKind::Thumb720 => "720x720",
            VariantKind::Sample => "sample",
            VariantKind::Preview => "preview",
            VariantKind::Original => "original",
        }
    }
}

impl fmt::Display for VariantKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VariantKind {
    type Err = HarvestError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "720x720" => Ok(VariantKind::Thumb720),
            "sample" => Ok(VariantKind::Sample),
            "preview" => Ok(VariantKind::Preview),
            "original" => Ok(VariantKind::Original),
            _ => Err(HarvestError::InvalidVariant(value.to_string())),
        }
    }
}

/// An offered rendition of one post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variant {
    pub kind: VariantKind,
    pub url: String,
}

/// Picks the first variant available in preference order.
pub fn select_variant<'a>(offered: &'a [Variant], preference: &[VariantKind]) -> Option<&'a Variant> {
    preference.iter().find_map(|kind| {
        offered
            .iter()
            .find(|variant| variant.kind == *kind && !variant.url.trim().is_empty())
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaCandidate {
    pub post_id: Option<u64>,
    pub variant: VariantKind,
    pub url: String,
    pub key: DedupKey,
    /// Remote filename before normalization; its extension decides conversion.
    pub remote_name: String,
    pub tag_payload: String,
}

impl MediaCandidate {
    pub fn needs_conversion(&self) -> bool {
        self.remote_name
            .rsplit_once('.')
            .map(|(_, ext)| ext.eq_ignore_ascii_case(INTERMEDIATE_EXT))
            .unwrap_or(false)
    }

    pub fn remote_ext(&self) -> &str {
        self.remote_name
            .rsplit_once('.')
            .map(|(_, ext)| ext)
            .unwrap_or("bin")
    }
}

/// How a source's space-separated tag string becomes a sidecar line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagConvention {
    pub delimiter: char,
    pub underscores_to_spaces: bool,
}

impl TagConvention {
    pub fn apply(&self, raw: &str) -> String {
        let joined = raw
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(&self.delimiter.to_string());
        if self.underscores_to_spaces {
            joined.replace('_', " ")
        } else {
            joined
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Layout {
    /// One directory per tag, asset plus sidecar text file.
    Folders,
    /// One shared zip archive plus one shared CSV log.
    Archive,
}

impl Layout {
    pub fn default_variants(self) -> Vec<VariantKind> {
        match self {
            Layout::Folders => vec![VariantKind::Original],
            Layout::Archive => vec![
                VariantKind::Thumb720,
                VariantKind::Sample,
                VariantKind::Preview,
                VariantKind::Original,
            ],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleMode {
    Sequential,
    Concurrent,
}
