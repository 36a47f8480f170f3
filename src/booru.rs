use std::time::Duration;

use clap::ValueEnum;
use reqwest::blocking::Client;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue, USER_AGENT};
use reqwest::Proxy;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{
    DedupKey, MediaCandidate, TagConvention, Variant, VariantKind, select_variant, url_basename,
};
use crate::error::HarvestError;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

/// Which search API the run talks to. Each keeps its own record schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ApiSource {
    Danbooru,
    Yandere,
}

impl ApiSource {
    pub fn default_endpoint(self) -> &'static str {
        match self {
            ApiSource::Danbooru => "https://danbooru.donmai.us/posts.json",
            ApiSource::Yandere => "https://yande.re/post.json",
        }
    }

    pub fn tag_convention(self) -> TagConvention {
        match self {
            ApiSource::Danbooru => TagConvention {
                delimiter: ',',
                underscores_to_spaces: true,
            },
            ApiSource::Yandere => TagConvention {
                delimiter: ',',
                underscores_to_spaces: false,
            },
        }
    }

    /// Turns one page record into a candidate. `None` means the record has no
    /// usable variant, which is a skip and never an error.
    pub fn candidate(self, record: &Value, preference: &[VariantKind]) -> Option<MediaCandidate> {
        let (post_id, offered, raw_tags) = match self {
            ApiSource::Danbooru => {
                let post = DanbooruPost::deserialize(record).ok()?;
                (post.id, post.variants(), post.tag_string)
            }
            ApiSource::Yandere => {
                let post = YanderePost::deserialize(record).ok()?;
                (post.id, post.variants(), post.tags)
            }
        };
        let variant = select_variant(&offered, preference)?;
        let remote_name = url_basename(&variant.url)?.to_string();
        let key = DedupKey::from_url(&variant.url)?;
        Some(MediaCandidate {
            post_id,
            variant: variant.kind,
            url: variant.url.clone(),
            key,
            remote_name,
            tag_payload: self.tag_convention().apply(&raw_tags),
        })
    }
}

#[derive(Debug, Deserialize)]
struct DanbooruPost {
    #[serde(default)]
    id: Option<u64>,
    #[serde(default)]
    file_url: Option<String>,
    #[serde(default)]
    tag_string: String,
    #[serde(default)]
    media_asset: Option<DanbooruMediaAsset>,
}

#[derive(Debug, Deserialize)]
struct DanbooruMediaAsset {
    #[serde(default)]
    variants: Vec<DanbooruVariant>,
}

#[derive(Debug, Deserialize)]
struct DanbooruVariant {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    url: Option<String>,
}

impl DanbooruPost {
    fn variants(&self) -> Vec<Variant> {
        let mut offered: Vec<Variant> = self
            .media_asset
            .iter()
            .flat_map(|asset| asset.variants.iter())
            .filter_map(|variant| {
                Some(Variant {
                    kind: variant.kind.parse().ok()?,
                    url: variant.url.clone()?,
                })
            })
            .collect();
        // Older posts carry no media_asset; file_url is the original then.
        if !offered.iter().any(|variant| variant.kind == VariantKind::Original) {
            if let Some(url) = &self.file_url {
                offered.push(Variant {
                    kind: VariantKind::Original,
                    url: url.clone(),
                });
            }
        }
        offered
    }
}

#[derive(Debug, Deserialize)]
struct YanderePost {
    #[serde(default)]
    id: Option<u64>,
    #[serde(default)]
    file_url: Option<String>,
    #[serde(default)]
    sample_url: Option<String>,
    #[serde(default)]
    preview_url: Option<String>,
    #[serde(default)]
    tags: String,
}

impl YanderePost {
    fn variants(&self) -> Vec<Variant> {
        [
            (VariantKind::Original, &self.file_url),
            (VariantKind::Sample, &self.sample_url),
            (VariantKind::Preview, &self.preview_url),
        ]
        .into_iter()
        .filter_map(|(kind, url)| {
            url.as_ref().map(|url| Variant {
                kind,
                url: url.clone(),
            })
        })
        .collect()
    }
}

/// Body and declared media type of a fetched asset.
#[derive(Debug, Clone)]
pub struct AssetResponse {
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl AssetResponse {
    pub fn is_video(&self) -> bool {
        self.content_type
            .as_deref()
            .map(|value| value.to_ascii_lowercase().contains("video"))
            .unwrap_or(false)
    }
}

pub trait BooruClient: Send + Sync {
    /// One page of search results. An empty vector is the natural end.
    fn fetch_page(&self, query: &str, page: u32) -> Result<Vec<Value>, HarvestError>;
    /// One asset body. Non-2xx statuses are errors.
    fn fetch_asset(&self, url: &str) -> Result<AssetResponse, HarvestError>;
}

#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub endpoint: String,
    pub timeout: Duration,
    pub proxy: Option<String>,
    pub user_agent: String,
}

/// Shared connection pool for one run; cheap to clone.
#[derive(Clone)]
pub struct HttpBooruClient {
    client: Client,
    endpoint: String,
}

impl HttpBooruClient {
    pub fn new(settings: &ClientSettings) -> Result<Self, HarvestError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&settings.user_agent)
                .map_err(|err| HarvestError::InvalidConfig(format!("user agent: {err}")))?,
        );
        let mut builder = Client::builder()
            .default_headers(headers)
            .timeout(settings.timeout);
        if let Some(proxy) = &settings.proxy {
            let proxy = Proxy::all(proxy)
                .map_err(|err| HarvestError::InvalidConfig(format!("proxy {proxy}: {err}")))?;
            builder = builder.proxy(proxy);
        }
        let client = builder
            .build()
            .map_err(|err| HarvestError::Http(err.to_string()))?;
        Ok(Self {
            client,
            endpoint: settings.endpoint.clone(),
        })
    }
}

impl BooruClient for HttpBooruClient {
    fn fetch_page(&self, query: &str, page: u32) -> Result<Vec<Value>, HarvestError> {
        let page = page.to_string();
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("page", page.as_str()), ("tags", query)])
            .send()
            .map_err(|err| HarvestError::Http(err.to_string()))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "search request failed".to_string());
            return Err(HarvestError::ApiStatus { status, message });
        }
        let body = response
            .bytes()
            .map_err(|err| HarvestError::Http(err.to_string()))?;
        parse_page(&body)
    }

    fn fetch_asset(&self, url: &str) -> Result<AssetResponse, HarvestError> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|err| HarvestError::Http(err.to_string()))?;
        if !response.status().is_success() {
            return Err(HarvestError::AssetStatus {
                status: response.status().as_u16(),
                url: url.to_string(),
            });
        }
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.to_string());
        let bytes = response
            .bytes()
            .map_err(|err| HarvestError::Http(err.to_string()))?;
        Ok(AssetResponse {
            content_type,
            bytes: bytes.to_vec(),
        })
    }
}

/// A page must be a JSON array; anything else (an HTML error page, an error
/// object) is malformed.
pub fn parse_page(body: &[u8]) -> Result<Vec<Value>, HarvestError> {
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Array(items)) => Ok(items),
        Ok(other) => Err(HarvestError::ApiParse(format!(
            "expected a JSON array, got {}",
            json_kind(&other)
        ))),
        Err(err) => Err(HarvestError::ApiParse(err.to_string())),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
