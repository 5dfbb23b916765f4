use std::path::PathBuf;

use jcd_config::ConfigError;
use jcd_io::DecodeError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FrontendError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("找不到输入文件 {path:?}")]
    InputNotFound { path: PathBuf },
    #[error("解码 {path:?} 失败: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: DecodeError,
    },
    #[error("写入输出文件 {path:?} 失败: {source}")]
    OutputWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl FrontendError {
    /// 解码失败时出错位置的字节偏移。
    pub fn offset(&self) -> Option<u64> {
        match self {
            FrontendError::Decode { source, .. } => source.offset(),
            _ => None,
        }
    }
}
