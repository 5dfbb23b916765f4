use std::io::{ErrorKind, Read};

use glam::{IVec4, Mat4, Vec3, Vec4};
use jcd_core::geometry::matrix_from_row_major;

use crate::DecodeError;

/// 多个矩阵之间的保留间隔。
pub const MATRIX_GAP_LEN: usize = 4;

/// 预分配上限，避免损坏的计数字段导致一次性申请巨量内存。
const MAX_PREALLOCATED: usize = 4096;

/// 带偏移计数的小端基础类型读取器。
///
/// 每次读取都会推进游标；数据源在字段中途耗尽时返回 `UnexpectedEof`，
/// 不做重试，也不会读取超出当前字段所需的字节。
pub struct PrimitiveReader<R> {
    inner: R,
    offset: u64,
}

impl<'a> PrimitiveReader<&'a [u8]> {
    pub fn from_bytes(bytes: &'a [u8]) -> Self {
        Self::new(bytes)
    }
}

impl<R: Read> PrimitiveReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner, offset: 0 }
    }

    /// 已消耗的字节数，即下一个字段在数据流中的偏移。
    #[inline]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    pub fn read_array<const N: usize>(&mut self, field: &'static str) -> Result<[u8; N], DecodeError> {
        let mut buf = [0u8; N];
        self.fill(&mut buf, field)?;
        Ok(buf)
    }

    pub fn read_vec(&mut self, len: usize, field: &'static str) -> Result<Vec<u8>, DecodeError> {
        let mut buf = vec![0u8; len];
        self.fill(&mut buf, field)?;
        Ok(buf)
    }

    /// 尽量读取 `len` 个字节，数据源提前结束时返回已读到的部分。
    pub fn read_up_to(&mut self, len: usize) -> Result<Vec<u8>, DecodeError> {
        let mut buf = Vec::with_capacity(len);
        let start = self.offset;
        (&mut self.inner)
            .take(len as u64)
            .read_to_end(&mut buf)
            .map_err(|source| DecodeError::Stream {
                offset: start,
                source,
            })?;
        self.offset += buf.len() as u64;
        Ok(buf)
    }

    /// 读取一个帧标志字节；数据源已结束时返回 `None`。
    pub fn read_flag(&mut self) -> Result<Option<u8>, DecodeError> {
        let mut byte = [0u8; 1];
        loop {
            match self.inner.read(&mut byte) {
                Ok(0) => return Ok(None),
                Ok(_) => {
                    self.offset += 1;
                    return Ok(Some(byte[0]));
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(source) => {
                    return Err(DecodeError::Stream {
                        offset: self.offset,
                        source,
                    });
                }
            }
        }
    }

    pub fn read_u8(&mut self, field: &'static str) -> Result<u8, DecodeError> {
        let [byte] = self.read_array::<1>(field)?;
        Ok(byte)
    }

    pub fn read_u32(&mut self, field: &'static str) -> Result<u32, DecodeError> {
        Ok(u32::from_le_bytes(self.read_array(field)?))
    }

    pub fn read_i32(&mut self, field: &'static str) -> Result<i32, DecodeError> {
        Ok(i32::from_le_bytes(self.read_array(field)?))
    }

    pub fn read_f32(&mut self, field: &'static str) -> Result<f32, DecodeError> {
        Ok(f32::from_le_bytes(self.read_array(field)?))
    }

    /// u32 长度前缀 + UTF-8 字节。
    pub fn read_string(&mut self, field: &'static str) -> Result<String, DecodeError> {
        let len = self.read_u32(field)? as usize;
        let start = self.offset;
        let bytes = self.read_vec(len, field)?;
        String::from_utf8(bytes).map_err(|source| DecodeError::EncodingError {
            offset: start,
            field,
            source,
        })
    }

    /// u32 数量 + 每点 4 个 float32，数量为 0 时返回空数组。
    pub fn read_point_block_f32(&mut self, field: &'static str) -> Result<Vec<Vec4>, DecodeError> {
        let count = self.read_u32(field)? as usize;
        let mut points = Vec::with_capacity(count.min(MAX_PREALLOCATED));
        for _ in 0..count {
            points.push(self.read_vec4(field)?);
        }
        Ok(points)
    }

    /// 与 `read_point_block_f32` 同形，元素为 int32（用于顶点索引）。
    pub fn read_point_block_i32(&mut self, field: &'static str) -> Result<Vec<IVec4>, DecodeError> {
        let count = self.read_u32(field)? as usize;
        let mut points = Vec::with_capacity(count.min(MAX_PREALLOCATED));
        for _ in 0..count {
            points.push(IVec4::new(
                self.read_i32(field)?,
                self.read_i32(field)?,
                self.read_i32(field)?,
                self.read_i32(field)?,
            ));
        }
        Ok(points)
    }

    /// 无数量前缀的三维点序列。
    pub fn read_points3(&mut self, count: usize, field: &'static str) -> Result<Vec<Vec3>, DecodeError> {
        let mut points = Vec::with_capacity(count.min(MAX_PREALLOCATED));
        for _ in 0..count {
            points.push(Vec3::new(
                self.read_f32(field)?,
                self.read_f32(field)?,
                self.read_f32(field)?,
            ));
        }
        Ok(points)
    }

    /// 16 个按行主序存放的 float32。
    pub fn read_matrix(&mut self, field: &'static str) -> Result<Mat4, DecodeError> {
        let mut values = [0f32; 16];
        for value in &mut values {
            *value = self.read_f32(field)?;
        }
        Ok(matrix_from_row_major(values))
    }

    /// 连续读取 `count` 个矩阵，除最后一个外每个矩阵后跟 4 字节保留间隔。
    pub fn read_matrices(&mut self, count: usize, field: &'static str) -> Result<Vec<Mat4>, DecodeError> {
        let mut matrices = Vec::with_capacity(count.min(MAX_PREALLOCATED));
        for index in 0..count {
            matrices.push(self.read_matrix(field)?);
            if index + 1 != count {
                self.read_array::<MATRIX_GAP_LEN>(field)?;
            }
        }
        Ok(matrices)
    }

    fn read_vec4(&mut self, field: &'static str) -> Result<Vec4, DecodeError> {
        Ok(Vec4::new(
            self.read_f32(field)?,
            self.read_f32(field)?,
            self.read_f32(field)?,
            self.read_f32(field)?,
        ))
    }

    fn fill(&mut self, buf: &mut [u8], field: &'static str) -> Result<(), DecodeError> {
        match self.inner.read_exact(buf) {
            Ok(()) => {
                self.offset += buf.len() as u64;
                Ok(())
            }
            Err(err) if err.kind() == ErrorKind::UnexpectedEof => Err(DecodeError::UnexpectedEof {
                offset: self.offset,
                field,
            }),
            Err(source) => Err(DecodeError::Stream {
                offset: self.offset,
                source,
            }),
        }
    }
}
