use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {message}")]
    Read { path: String, message: String },
    #[error("invalid config document: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid config value: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub images: ImagesConfig,
    pub processing: ProcessingConfig,
    pub shopify: ShopifyConfig,
    pub loader: LoaderConfig,
    pub side_log: SideLogConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImagesConfig {
    pub enabled: bool,
    pub base_dir: String,
    pub min_width: u32,
    pub min_height: u32,
    pub extensions: Vec<String>,
    pub variation_suffix: String,
    pub max_workers: usize,
    pub header_read_bytes: u64,
    pub url_expiry_secs: u64,
    pub storage: StorageBackend,
    pub s3: S3Config,
    /// Local mirror of the media bucket, used by the filesystem backend.
    pub storage_root: PathBuf,
    pub public_base_url: String,
    pub signing_secret: String,
}

impl Default for ImagesConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_dir: "sorted-media".into(),
            min_width: 200,
            min_height: 200,
            extensions: [".jpg", ".jpeg", ".png", ".gif", ".webp"]
                .into_iter()
                .map(String::from)
                .collect(),
            variation_suffix: "a".into(),
            max_workers: 10,
            header_read_bytes: 50_000,
            url_expiry_secs: 3600,
            storage: StorageBackend::S3,
            s3: S3Config::default(),
            storage_root: PathBuf::from("media"),
            public_base_url: "http://localhost:8000/media".into(),
            signing_secret: String::new(),
        }
    }
}

impl ImagesConfig {
    pub fn url_expiry(&self) -> Duration {
        Duration::from_secs(self.url_expiry_secs)
    }

    pub fn accepts_extension(&self, filename: &str) -> bool {
        let lowered = filename.to_ascii_lowercase();
        self.extensions
            .iter()
            .any(|ext| lowered.ends_with(&ext.to_ascii_lowercase()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    #[default]
    S3,
    Filesystem,
}

impl FromStr for StorageBackend {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "s3" => Ok(StorageBackend::S3),
            "fs" | "filesystem" | "local" => Ok(StorageBackend::Filesystem),
            other => Err(ConfigError::Invalid(format!("unknown image storage `{other}`"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct S3Config {
    pub bucket: Option<String>,
    pub region: String,
    /// Custom endpoint for S3-compatible stores.
    pub endpoint: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub session_token: Option<String>,
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            bucket: None,
            region: "us-east-1".into(),
            endpoint: None,
            access_key_id: None,
            secret_access_key: None,
            session_token: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    /// Upper bound of the random jitter, as a fraction of the computed delay.
    pub jitter: f64,
    pub requests_per_second: f64,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay_ms: 1000,
            jitter: 0.1,
            requests_per_second: 2.0,
        }
    }
}

impl ProcessingConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShopifyConfig {
    pub shop_domain: Option<String>,
    pub access_token: Option<String>,
    pub api_version: String,
    pub timeout_secs: u64,
}

impl Default for ShopifyConfig {
    fn default() -> Self {
        Self {
            shop_domain: None,
            access_token: None,
            api_version: "2024-10".into(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    pub base_url: Option<String>,
    pub service_key: Option<String>,
    pub items_table: String,
    pub components_table: String,
    /// Rows per PostgREST request; keep at or below the server's max rows.
    pub page_size: usize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            service_key: None,
            items_table: "nav_items".into(),
            components_table: "nav_bom_components".into(),
            page_size: 1000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SideLogConfig {
    pub dir: Option<PathBuf>,
}

impl Default for SideLogConfig {
    fn default() -> Self {
        Self {
            dir: Some(PathBuf::from("logs")),
        }
    }
}

impl ExportConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the configuration from a variable lookup, falling back to the
    /// default for anything missing or unparseable.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let parse = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = ExportConfig::default();

        let images = ImagesConfig {
            enabled: parse("IMAGES_ENABLED")
                .and_then(|v| parse_bool(&v))
                .unwrap_or(defaults.images.enabled),
            base_dir: parse("IMAGE_BASE_DIR").unwrap_or(defaults.images.base_dir),
            min_width: parsed(parse("IMAGE_MIN_WIDTH")).unwrap_or(defaults.images.min_width),
            min_height: parsed(parse("IMAGE_MIN_HEIGHT")).unwrap_or(defaults.images.min_height),
            extensions: parse("IMAGE_EXTENSIONS")
                .map(|v| split_list(&v))
                .filter(|list| !list.is_empty())
                .unwrap_or(defaults.images.extensions),
            variation_suffix: lookup("IMAGE_VARIATION_SUFFIX")
                .map(|v| v.trim().to_string())
                .unwrap_or(defaults.images.variation_suffix),
            max_workers: parsed(parse("IMAGE_MAX_WORKERS"))
                .filter(|v: &usize| *v > 0)
                .unwrap_or(defaults.images.max_workers),
            header_read_bytes: parsed(parse("IMAGE_HEADER_READ_BYTES"))
                .filter(|v: &u64| *v > 0)
                .unwrap_or(defaults.images.header_read_bytes),
            url_expiry_secs: parsed(parse("IMAGE_URL_EXPIRY_SECS"))
                .filter(|v: &u64| *v > 0)
                .unwrap_or(defaults.images.url_expiry_secs),
            storage: match parse("IMAGE_STORAGE") {
                Some(value) => value.parse()?,
                None => defaults.images.storage,
            },
            s3: S3Config {
                bucket: parse("AWS_S3_BUCKET").or_else(|| parse("S3_BUCKET")),
                region: parse("AWS_REGION")
                    .or_else(|| parse("AWS_DEFAULT_REGION"))
                    .unwrap_or(defaults.images.s3.region),
                endpoint: parse("AWS_ENDPOINT_URL"),
                access_key_id: parse("AWS_ACCESS_KEY_ID"),
                secret_access_key: parse("AWS_SECRET_ACCESS_KEY"),
                session_token: parse("AWS_SESSION_TOKEN"),
            },
            storage_root: parse("MEDIA_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.images.storage_root),
            public_base_url: parse("MEDIA_PUBLIC_BASE_URL")
                .unwrap_or(defaults.images.public_base_url),
            signing_secret: parse("MEDIA_SIGNING_SECRET").unwrap_or(defaults.images.signing_secret),
        };

        let processing = ProcessingConfig {
            max_attempts: parsed(parse("MAX_RETRY_ATTEMPTS"))
                .filter(|v: &u32| *v > 0)
                .unwrap_or(defaults.processing.max_attempts),
            base_delay_ms: parsed(parse("RETRY_BASE_DELAY_MS"))
                .unwrap_or(defaults.processing.base_delay_ms),
            jitter: parsed(parse("RETRY_JITTER"))
                .filter(|v: &f64| (0.0..=1.0).contains(v))
                .unwrap_or(defaults.processing.jitter),
            requests_per_second: parsed(parse("REQUESTS_PER_SECOND"))
                .filter(|v: &f64| *v > 0.0)
                .unwrap_or(defaults.processing.requests_per_second),
        };

        let shopify = ShopifyConfig {
            shop_domain: parse("SHOPIFY_SHOP_DOMAIN"),
            access_token: parse("SHOPIFY_ACCESS_TOKEN"),
            api_version: parse("SHOPIFY_API_VERSION").unwrap_or(defaults.shopify.api_version),
            timeout_secs: parsed(parse("SHOPIFY_TIMEOUT_SECS"))
                .filter(|v: &u64| *v > 0)
                .unwrap_or(defaults.shopify.timeout_secs),
        };

        let loader = LoaderConfig {
            base_url: parse("SUPABASE_URL"),
            service_key: parse("SUPABASE_SERVICE_ROLE_KEY")
                .or_else(|| parse("SUPABASE_SERVICE_KEY"))
                .or_else(|| parse("SUPABASE_KEY")),
            items_table: parse("ITEMS_TABLE").unwrap_or(defaults.loader.items_table),
            components_table: parse("COMPONENTS_TABLE")
                .unwrap_or(defaults.loader.components_table),
            page_size: parsed(parse("LOADER_PAGE_SIZE"))
                .filter(|v: &usize| *v > 0)
                .unwrap_or(defaults.loader.page_size),
        };

        let side_log = SideLogConfig {
            dir: match parse("SIDE_LOG_DIR") {
                Some(dir) if dir == "-" => None,
                Some(dir) => Some(PathBuf::from(dir)),
                None => defaults.side_log.dir,
            },
        };

        let config = Self {
            images,
            processing,
            shopify,
            loader,
            side_log,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|err| ConfigError::Read {
            path: path.display().to_string(),
            message: err.to_string(),
        })?;
        Self::from_yaml_str(&raw)
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self, ConfigError> {
        Self::from_yaml_with(raw, |name| std::env::var(name).ok())
    }

    pub fn from_yaml_with(
        raw: &str,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let expanded = substitute_env(raw, lookup);
        let config: ExportConfig = if expanded.trim().is_empty() {
            ExportConfig::default()
        } else {
            serde_yaml::from_str(&expanded)?
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.images.max_workers == 0 {
            return Err(ConfigError::Invalid("images.max_workers must be positive".into()));
        }
        if self.loader.page_size == 0 {
            return Err(ConfigError::Invalid("loader.page_size must be positive".into()));
        }
        if self.processing.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "processing.max_attempts must be at least 1".into(),
            ));
        }
        if !(self.processing.requests_per_second > 0.0) {
            return Err(ConfigError::Invalid(
                "processing.requests_per_second must be positive".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.processing.jitter) {
            return Err(ConfigError::Invalid("processing.jitter must be within 0..=1".into()));
        }
        Ok(())
    }
}

static ENV_REF: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::([^}]*))?\}").expect("env reference pattern")
});

/// Expands `${VAR}` and `${VAR:default}`; unset variables without a default
/// become empty.
pub fn substitute_env(raw: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    ENV_REF
        .replace_all(raw, |caps: &Captures| {
            lookup(&caps[1])
                .or_else(|| caps.get(2).map(|m| m.as_str().to_string()))
                .unwrap_or_default()
        })
        .into_owned()
}

fn parsed<T: FromStr>(value: Option<String>) -> Option<T> {
    value.and_then(|v| v.parse::<T>().ok())
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| {
            if item.starts_with('.') {
                item.to_string()
            } else {
                format!(".{item}")
            }
        })
        .collect()
}
