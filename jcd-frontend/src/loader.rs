use std::path::{Path, PathBuf};

use jcd_config::AppConfig;
use jcd_core::document::Document;
use jcd_engine::scene::Scene;
use jcd_io::{DecodeOptions, DecodeWarning, load_with_options};
use tracing::{info, warn};

use crate::errors::FrontendError;
use crate::resource_locator::InputLocator;

/// 统一封装加载后的场景与元信息。
#[derive(Debug)]
pub struct LoadedScene {
    pub scene: Scene,
    pub path: PathBuf,
    pub warnings: Vec<DecodeWarning>,
}

pub fn decode_options(config: &AppConfig) -> DecodeOptions {
    DecodeOptions {
        max_nesting_depth: config.decoder.max_nesting_depth,
    }
}

/// 解析输入路径并解码为场景；解码警告随结果返回。
pub fn load_scene(input: &Path, config: &AppConfig) -> Result<LoadedScene, FrontendError> {
    let locator = InputLocator::from_config(None, config);
    let path = locator
        .resolve(input)
        .ok_or_else(|| FrontendError::InputNotFound {
            path: input.to_path_buf(),
        })?;

    let outcome = load_with_options(&path, &decode_options(config)).map_err(|source| {
        warn!(path = %path.display(), error = %source, "解码 JCD 文件失败");
        FrontendError::Decode {
            path: path.clone(),
            source,
        }
    })?;

    let document = Document::from_entities(outcome.entities);
    info!(path = %path.display(), entities = document.len(), "从 JCD 加载文档成功");
    Ok(LoadedScene {
        scene: Scene::with_document(document),
        path,
        warnings: outcome.warnings,
    })
}
