use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

/// 指向配置文件的环境变量。
pub const CONFIG_ENV: &str = "JCD_CONFIG";

/// 应用配置的根结构。
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub decoder: DecoderConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub resources: ResourceConfig,
}

impl AppConfig {
    /// 从显式路径加载配置。
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// 自动发现配置文件：优先读取环境变量 `JCD_CONFIG`，否则寻找 `./config/default.toml`。
    /// 若文件缺失，则返回默认配置。
    pub fn discover() -> Result<Self, ConfigError> {
        if let Some(path) = env::var_os(CONFIG_ENV) {
            return Self::from_file(PathBuf::from(path));
        }

        let default_path = env::current_dir()
            .map(|dir| dir.join("config").join("default.toml"))
            .map_err(|source| ConfigError::Context {
                message: "获取当前工作目录失败".to_string(),
                source,
            })?;

        if default_path.exists() {
            Self::from_file(default_path)
        } else {
            Ok(Self::default())
        }
    }

    /// 命令行显式给出的路径优先于自动发现。
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        match explicit {
            Some(path) => Self::from_file(path),
            None => Self::discover(),
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

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct DecoderConfig {
    /// 布尔头部嵌套与分组栈的最大深度。
    #[serde(default = "DecoderConfig::default_max_nesting_depth")]
    pub max_nesting_depth: usize,
}

impl DecoderConfig {
    fn default_max_nesting_depth() -> usize {
        64
    }
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            max_nesting_depth: Self::default_max_nesting_depth(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct OutputConfig {
    /// 输出文件已存在时是否覆盖。
    #[serde(default)]
    pub overwrite: bool,
    /// 文本导出中浮点数的小数位数。
    #[serde(default = "OutputConfig::default_precision")]
    pub precision: usize,
}

impl OutputConfig {
    fn default_precision() -> usize {
        4
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            overwrite: false,
            precision: Self::default_precision(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResourceConfig {
    /// 解析相对输入路径时额外搜索的目录。
    #[serde(default)]
    pub search_roots: Vec<PathBuf>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("读取配置文件 {path:?} 失败: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("解析配置文件 {path:?} 失败: {source}")]
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
