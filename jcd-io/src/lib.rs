use std::fmt;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use jcd_core::document::{Document, JCD_MAGIC, SceneEntity};
use thiserror::Error;
use tracing::{debug, info, warn};

pub mod boolean;
pub mod codec;
pub mod reader;
pub mod writer;

use boolean::BooleanReconstructor;
use codec::decode_record;
use reader::PrimitiveReader;

/// 记录开始。
pub const FLAG_START: u8 = b':';
/// 数据流结束。
pub const FLAG_END: u8 = b'#';
/// 关闭一层布尔分组。
pub const FLAG_CLOSE_GROUP: u8 = b'%';

pub const DEFAULT_MAX_NESTING_DEPTH: usize = 64;

/// 解码失败。除 `Read` 外每个变体都带有出错位置的字节偏移。
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("header mismatch: expected {expected:?}, found {found:?}")]
    HeaderMismatch { expected: String, found: String },
    #[error("unexpected end of stream at offset {offset} while reading {field}")]
    UnexpectedEof { offset: u64, field: &'static str },
    #[error("unknown entity type tag {tag} at offset {offset}")]
    UnknownEntityType { offset: u64, tag: u8 },
    #[error("invalid UTF-8 in {field} at offset {offset}: {source}")]
    EncodingError {
        offset: u64,
        field: &'static str,
        #[source]
        source: std::string::FromUtf8Error,
    },
    #[error("boolean group closed without children at offset {offset}")]
    EmptyGroup { offset: u64 },
    #[error("boolean nesting deeper than {limit} levels at offset {offset}")]
    NestingTooDeep { offset: u64, limit: usize },
    #[error("malformed frame flag 0x{flag:02x} at offset {offset}")]
    MalformedFlag { offset: u64, flag: u8 },
    #[error("unknown {field} value {value} at offset {offset}")]
    UnknownEnumValue {
        offset: u64,
        field: &'static str,
        value: u32,
    },
    #[error(
        "ring layout {ring_count}x{points_per_ring} does not match {points} control points at offset {offset}"
    )]
    RingLayoutMismatch {
        offset: u64,
        ring_count: u32,
        points_per_ring: u32,
        points: usize,
    },
    #[error("failed to read file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("stream error at offset {offset}: {source}")]
    Stream {
        offset: u64,
        #[source]
        source: std::io::Error,
    },
}

impl DecodeError {
    /// 出错位置的字节偏移；文件头不匹配时为 0，文件读取失败时没有偏移。
    pub fn offset(&self) -> Option<u64> {
        match self {
            DecodeError::HeaderMismatch { .. } => Some(0),
            DecodeError::UnexpectedEof { offset, .. }
            | DecodeError::UnknownEntityType { offset, .. }
            | DecodeError::EncodingError { offset, .. }
            | DecodeError::EmptyGroup { offset }
            | DecodeError::NestingTooDeep { offset, .. }
            | DecodeError::MalformedFlag { offset, .. }
            | DecodeError::UnknownEnumValue { offset, .. }
            | DecodeError::RingLayoutMismatch { offset, .. }
            | DecodeError::Stream { offset, .. } => Some(*offset),
            DecodeError::Read { .. } => None,
        }
    }
}

/// 可恢复的异常情况，解码仍然成功但结果可能不完整。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeWarning {
    /// 数据流结束时仍有未闭合的布尔分组，实体由残留帧折叠得到。
    TruncatedBooleanGroup { offset: u64, open_groups: usize },
    /// 不在任何布尔分组内时出现的 `%`，已忽略。
    StrayCloseGroup { offset: u64 },
}

impl fmt::Display for DecodeWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeWarning::TruncatedBooleanGroup {
                offset,
                open_groups,
            } => write!(
                f,
                "stream ended at offset {offset} with {open_groups} open boolean group(s)"
            ),
            DecodeWarning::StrayCloseGroup { offset } => {
                write!(f, "close-group flag outside boolean group at offset {offset}")
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeOptions {
    /// 布尔头部直接嵌套与分组栈深度的共同上限。
    pub max_nesting_depth: usize,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            max_nesting_depth: DEFAULT_MAX_NESTING_DEPTH,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DecodeOutcome {
    pub entities: Vec<SceneEntity>,
    pub warnings: Vec<DecodeWarning>,
}

/// 从任意字节源解码一个完整的 JCD 数据流。
pub fn decode_stream<R: Read>(source: R, options: &DecodeOptions) -> Result<DecodeOutcome, DecodeError> {
    let mut reader = PrimitiveReader::new(source);
    read_header(&mut reader)?;

    let mut engine = BooleanReconstructor::new(options);
    let mut entities = Vec::new();
    loop {
        let offset = reader.offset();
        match reader.read_flag()? {
            Some(FLAG_START) => {
                let (surface_type, record) = decode_record(&mut reader, options)?;
                debug!(offset, surface_type = surface_type.name(), "记录已解码");
                if let Some(entity) = engine.on_record(record, offset)? {
                    entities.push(entity);
                }
            }
            Some(FLAG_CLOSE_GROUP) => {
                if let Some(entity) = engine.on_close_group(offset)? {
                    entities.push(entity);
                }
            }
            Some(FLAG_END) => break,
            Some(flag) => return Err(DecodeError::MalformedFlag { offset, flag }),
            None => {
                debug!(offset, "数据流在结束标志前耗尽，按结束处理");
                break;
            }
        }
    }

    if let Some(entity) = engine.finish(reader.offset()) {
        entities.push(entity);
    }
    Ok(DecodeOutcome {
        entities,
        warnings: engine.into_warnings(),
    })
}

pub fn decode_bytes(bytes: &[u8], options: &DecodeOptions) -> Result<DecodeOutcome, DecodeError> {
    decode_stream(bytes, options)
}

/// 读取并解码文件，警告只写入日志。
pub fn load(path: &Path) -> Result<Vec<SceneEntity>, DecodeError> {
    load_with_options(path, &DecodeOptions::default()).map(|outcome| outcome.entities)
}

pub fn load_with_options(path: &Path, options: &DecodeOptions) -> Result<DecodeOutcome, DecodeError> {
    let data = fs::read(path).map_err(|source| DecodeError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let outcome = decode_bytes(&data, options)?;
    for warning in &outcome.warnings {
        warn!(path = %path.display(), "{warning}");
    }
    info!(
        path = %path.display(),
        entities = outcome.entities.len(),
        bytes = data.len(),
        "JCD 文件解码完成"
    );
    Ok(outcome)
}

fn read_header<R: Read>(reader: &mut PrimitiveReader<R>) -> Result<(), DecodeError> {
    let header = reader.read_up_to(JCD_MAGIC.len())?;
    if header.as_slice() != JCD_MAGIC.as_slice() {
        return Err(DecodeError::HeaderMismatch {
            expected: String::from_utf8_lossy(JCD_MAGIC).into_owned(),
            found: String::from_utf8_lossy(&header).into_owned(),
        });
    }
    Ok(())
}

#[derive(Debug, Error)]
pub enum IoError {
    #[error("unsupported feature: {0}")]
    UnsupportedFeature(String),
    #[error("failed to read file {path:?}: {source}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write file {path:?}: {source}")]
    WriteError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid document structure: {0}")]
    InvalidDocument(String),
    #[error("failed to decode {path:?}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: DecodeError,
    },
    #[error("stream error: {0}")]
    Stream(#[from] std::io::Error),
}

pub trait DocumentLoader {
    fn load(&self, path: &Path) -> Result<Document, IoError>;
}

pub trait DocumentSaver {
    fn save(&self, document: &Document, path: &Path) -> Result<(), IoError>;
}

#[derive(Debug, Clone, Default)]
pub struct JcdFacade {
    options: DecodeOptions,
}

impl JcdFacade {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: DecodeOptions) -> Self {
        Self { options }
    }

    #[inline]
    pub fn options(&self) -> &DecodeOptions {
        &self.options
    }
}

impl DocumentLoader for JcdFacade {
    fn load(&self, path: &Path) -> Result<Document, IoError> {
        let outcome = load_with_options(path, &self.options).map_err(|source| match source {
            DecodeError::Read { path, source } => IoError::ReadError { path, source },
            source => IoError::Decode {
                path: path.to_path_buf(),
                source,
            },
        })?;
        Ok(Document::from_entities(outcome.entities))
    }
}

impl DocumentSaver for JcdFacade {
    fn save(&self, document: &Document, path: &Path) -> Result<(), IoError> {
        let entities: Vec<&SceneEntity> = document.entities().map(|(_, entity)| entity).collect();
        let bytes = writer::encode_entities(entities)?;
        fs::write(path, bytes).map_err(|source| IoError::WriteError {
            path: path.to_path_buf(),
            source,
        })
    }
}
