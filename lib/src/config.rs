use std::time::Duration;

use serde::de::DeserializeOwned;

use crate::Result;

pub static CONFIG_FILE: &'static str = "hearth.toml";

pub const MIB: u64 = 1024 * 1024;

/// Library configuration. Every section falls back to the values the client
/// views ship with, so an empty file (or no file at all) is a valid setup.
///
/// ```ignore
/// let cfg = Config {
///     upload: Upload {
///         max_files: 3,
///         ..Default::default()
///     },
///     ..Default::default()
/// };
/// ```
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub api: Api,
    pub upload: Upload,
    pub loader: Loader,
    pub tracing: Tracing,
}

/// Loads config from toml file at default location.
pub fn load<T: DeserializeOwned>() -> Result<T> {
    load_from(CONFIG_FILE)
}

/// Loads config from toml file at standard path using provided name.
///
/// For example for `name` == `hearth.toml` we will load both `hearth.toml`
/// and `secret.hearth.toml` from the current directory. Environment
/// variables like `API__URL` override file values.
pub fn load_from<T: DeserializeOwned>(name: impl AsRef<str>) -> Result<T> {
    let config = config::Config::builder()
        .add_source(config::File::with_name(name.as_ref()))
        .add_source(config::File::with_name(&format!("secret.{}", name.as_ref())).required(false))
        .add_source(
            config::Environment::default()
                .separator("__")
                .prefix_separator("__"),
        )
        .build()?;

    let config: T = config.try_deserialize()?;

    Ok(config)
}

/// Loads config from multiple toml files at given paths.
pub fn load_from_many<T: DeserializeOwned>(paths: &[impl AsRef<str>]) -> Result<T> {
    let mut builder = config::Config::builder();
    for path in paths {
        builder = builder.add_source(config::File::with_name(path.as_ref()));
    }
    builder = builder.add_source(
        config::Environment::default()
            .separator("__")
            .prefix_separator("__"),
    );
    let config = builder.build()?;

    let config: T = config.try_deserialize()?;

    Ok(config)
}

/// Remote API endpoint and per-request deadlines.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Api {
    /// Base url, photo routes live under `{url}/photo`.
    pub url: String,
    /// Timeout for metadata, payload, count and delete requests, in seconds.
    pub fetch_timeout: u64,
    /// Timeout for the multipart upload, in seconds.
    pub upload_timeout: u64,
}

impl Api {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout)
    }

    pub fn upload_timeout(&self) -> Duration {
        Duration::from_secs(self.upload_timeout)
    }
}

impl Default for Api {
    fn default() -> Self {
        Self {
            url: "http://localhost:8080".to_string(),
            fetch_timeout: 30,
            upload_timeout: 60,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Upload {
    /// Maximum number of files held in one batch.
    pub max_files: usize,
    /// Per-file ceiling in bytes.
    pub max_file_size: u64,
    /// Files strictly larger than this get re-encoded before upload.
    pub compress_threshold: u64,
    pub max_width: u32,
    pub max_height: u32,
    /// Re-encoding quality on the 1-100 scale.
    pub quality: u8,
    /// Accepted MIME types.
    pub allowed_types: Vec<String>,
    /// Send the batch right after files are added to it.
    pub auto_upload: bool,
}

impl Default for Upload {
    fn default() -> Self {
        Self {
            max_files: 5,
            max_file_size: 10 * MIB,
            compress_threshold: 2 * MIB,
            max_width: 1440,
            max_height: 1080,
            quality: 80,
            allowed_types: vec![
                "image/jpeg".to_string(),
                "image/jpg".to_string(),
                "image/png".to_string(),
                "image/webp".to_string(),
            ],
            auto_upload: false,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Loader {
    /// Number of payloads warmed right after metadata is fetched.
    pub prefetch: usize,
}

impl Default for Loader {
    fn default() -> Self {
        Self { prefetch: 3 }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Tracing {
    pub enabled: bool,

    pub mode: crate::tracing::Mode,
    pub level: crate::tracing::Level,
}

impl Default for Tracing {
    fn default() -> Self {
        Self {
            enabled: true,
            mode: crate::tracing::Mode::default(),
            level: crate::tracing::Level::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_client_limits() {
        let config = Config::default();
        assert_eq!(config.upload.max_files, 5);
        assert_eq!(config.upload.max_file_size, 10 * 1024 * 1024);
        assert_eq!(config.upload.compress_threshold, 2 * 1024 * 1024);
        assert_eq!((config.upload.max_width, config.upload.max_height), (1440, 1080));
        assert_eq!(config.api.fetch_timeout(), Duration::from_secs(30));
        assert_eq!(config.api.upload_timeout(), Duration::from_secs(60));
        assert_eq!(config.loader.prefetch, 3);
        assert!(!config.upload.auto_upload);
    }

    #[test]
    fn partial_sections_keep_defaults() {
        let config: Config = config::Config::builder()
            .add_source(config::File::from_str(
                "[upload]\nmax_files = 2\n[api]\nurl = \"https://rentals.example\"\n",
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert_eq!(config.upload.max_files, 2);
        assert_eq!(config.upload.quality, 80);
        assert_eq!(config.api.url, "https://rentals.example");
        assert_eq!(config.api.fetch_timeout, 30);
    }
}
