use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

/// 指定配置文件路径的环境变量。
pub const CONFIG_ENV: &str = "PDF_UNDERLAY_CONFIG";

/// 配置的根结构。
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub raster: RasterConfig,
    #[serde(default)]
    pub plot: PlotConfig,
    #[serde(default)]
    pub selection: SelectionConfig,
    #[serde(default)]
    pub thumbnail: ThumbnailConfig,
    #[serde(default)]
    pub explode: ExplodeConfig,
}

impl AppConfig {
    /// 从显式路径加载配置。
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// 自动发现配置文件：优先读取环境变量 `PDF_UNDERLAY_CONFIG`，否则寻找 `./config/default.toml`。
    /// 若文件缺失，则返回默认配置。
    pub fn discover() -> Result<Self, ConfigError> {
        if let Some(path) = env::var_os(CONFIG_ENV) {
            return Self::from_file(PathBuf::from(path));
        }

        let default_path = env::current_dir()
            .map(|dir| dir.join("config").join("default.toml"))
            .map_err(|source| ConfigError::Context {
                message: "failed to resolve current working directory".to_string(),
                source,
            })?;

        if default_path.exists() {
            Self::from_file(default_path)
        } else {
            Ok(Self::default())
        }
    }
}

/// 日志配置，支持设置默认等级。
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_string()
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
        }
    }
}

/// 屏幕光栅缓存设置。
#[derive(Debug, Clone, Deserialize)]
pub struct RasterConfig {
    #[serde(default = "RasterConfig::default_cache_enabled")]
    pub cache_enabled: bool,
    #[serde(default = "RasterConfig::default_max_screen_dpi")]
    pub max_screen_dpi: f64,
}

impl RasterConfig {
    fn default_cache_enabled() -> bool {
        true
    }

    fn default_max_screen_dpi() -> f64 {
        3000.0
    }
}

impl Default for RasterConfig {
    fn default() -> Self {
        Self {
            cache_enabled: Self::default_cache_enabled(),
            max_screen_dpi: Self::default_max_screen_dpi(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlotConfig {
    /// 单张打印光栅的估算字节上限，超过则分带渲染。
    #[serde(default = "PlotConfig::default_tile_byte_limit")]
    pub tile_byte_limit: u64,
}

impl PlotConfig {
    fn default_tile_byte_limit() -> u64 {
        90_000_000
    }
}

impl Default for PlotConfig {
    fn default() -> Self {
        Self {
            tile_byte_limit: Self::default_tile_byte_limit(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SelectionConfig {
    /// 宿主未提供拾取框时使用的半宽（世界单位）。
    #[serde(default = "SelectionConfig::default_aperture")]
    pub aperture: f64,
}

impl SelectionConfig {
    fn default_aperture() -> f64 {
        3.0
    }
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            aperture: Self::default_aperture(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ThumbnailConfig {
    #[serde(default = "ThumbnailConfig::default_edge")]
    pub width: u32,
    #[serde(default = "ThumbnailConfig::default_edge")]
    pub height: u32,
}

impl ThumbnailConfig {
    fn default_edge() -> u32 {
        256
    }
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        Self {
            width: Self::default_edge(),
            height: Self::default_edge(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExplodeConfig {
    #[serde(default = "ExplodeConfig::default_raster_dpi")]
    pub raster_dpi: f64,
}

impl ExplodeConfig {
    fn default_raster_dpi() -> f64 {
        150.0
    }
}

impl Default for ExplodeConfig {
    fn default() -> Self {
        Self {
            raster_dpi: Self::default_raster_dpi(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("{message}")]
    Context {
        message: String,
        #[source]
        source: std::io::Error,
    },
}
