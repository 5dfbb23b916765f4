use std::env;
use std::path::{Path, PathBuf};

use jcd_config::AppConfig;
use tracing::{debug, trace};

/// 追加搜索目录的环境变量，按平台路径分隔符拆分。
pub const SEARCH_ROOTS_ENV: &str = "JCD_SEARCH_ROOTS";

/// 输入文件定位：相对路径依次在当前目录、配置目录与环境变量目录下查找。
#[derive(Debug, Clone)]
pub struct InputLocator {
    search_roots: Vec<PathBuf>,
}

impl InputLocator {
    pub fn from_config(base_dir: Option<&Path>, config: &AppConfig) -> Self {
        let env_roots = env::var_os(SEARCH_ROOTS_ENV)
            .map(|paths| env::split_paths(&paths).collect::<Vec<_>>())
            .unwrap_or_default();
        Self::with_roots(
            base_dir
                .into_iter()
                .map(Path::to_path_buf)
                .chain(config.resources.search_roots.iter().cloned())
                .chain(env_roots),
        )
    }

    /// 只保留存在的目录并去重，靠前的目录优先。
    pub fn with_roots<I>(roots: I) -> Self
    where
        I: IntoIterator<Item = PathBuf>,
    {
        let mut deduped: Vec<PathBuf> = Vec::new();
        for root in roots {
            if root.is_dir() && !deduped.iter().any(|existing| existing == &root) {
                deduped.push(root);
            }
        }
        Self {
            search_roots: deduped,
        }
    }

    pub fn search_roots(&self) -> &[PathBuf] {
        &self.search_roots
    }

    pub fn resolve(&self, path: &Path) -> Option<PathBuf> {
        if path.exists() {
            return Some(path.to_path_buf());
        }
        if path.is_absolute() {
            debug!(path = %path.display(), "输入路径为绝对路径但未找到对应文件");
            return None;
        }

        for root in &self.search_roots {
            let candidate = root.join(path);
            trace!(candidate = %candidate.display(), "input locator candidate");
            if candidate.exists() {
                return Some(candidate);
            }
        }
        None
    }
}
