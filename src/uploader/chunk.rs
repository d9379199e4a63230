// 上传分片规划
//
// 平台分片规则：
// - YouTube：固定 64MB 分片，最后一片为剩余字节
// - TikTok：文件 <= 64MB 只能一个分片；更大的文件按 50MB 向下取整分片，
//   最多 1000 片，最后一片吸收余数；分片大小必须在 5MB-64MB 之间

use crate::auth::Platform;
use anyhow::{Context, Result};
use std::ops::Range;
use std::path::Path;
use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::debug;

const MIB: u64 = 1024 * 1024;

/// YouTube 分片大小: 64MB
pub const YOUTUBE_CHUNK_SIZE: u64 = 64 * MIB;

/// TikTok 单分片上传上限: 64MB
pub const TIKTOK_SINGLE_CHUNK_LIMIT: u64 = 64 * MIB;

/// TikTok 默认分片大小: 50MB
pub const TIKTOK_DEFAULT_CHUNK_SIZE: u64 = 50 * MIB;

/// TikTok 最小分片大小: 5MB
pub const TIKTOK_MIN_CHUNK_SIZE: u64 = 5 * MIB;

/// TikTok 最大分片大小: 64MB
pub const TIKTOK_MAX_CHUNK_SIZE: u64 = 64 * MIB;

/// TikTok 最大分片数
pub const TIKTOK_MAX_CHUNKS: u64 = 1000;

/// 分片规划失败
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    #[error("video file is empty")]
    EmptyFile,
    #[error("chunk size {chunk_size} bytes is below the platform minimum of {min} bytes")]
    ChunkTooSmall { chunk_size: u64, min: u64 },
    #[error("video is too large: chunk size {chunk_size} bytes exceeds the platform maximum of {max} bytes")]
    ChunkTooLarge { chunk_size: u64, max: u64 },
}

/// 分片方案
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    /// 名义分片大小（声明给平台的值）
    pub chunk_size: u64,
    /// 分片总数（>= 1）
    pub total_chunks: u64,
    /// 文件总大小
    pub total_bytes: u64,
}

impl ChunkPlan {
    /// 按平台规则计算分片方案
    pub fn for_platform(platform: Platform, total_bytes: u64) -> Result<Self, PlanError> {
        if total_bytes == 0 {
            return Err(PlanError::EmptyFile);
        }

        let plan = match platform {
            Platform::YouTube => Self::youtube(total_bytes),
            Platform::TikTok => Self::tiktok(total_bytes)?,
        };

        debug!(
            "{} 分片方案: 文件大小={}, 分片大小={}, 分片数={}, 最后一片={}",
            platform,
            total_bytes,
            plan.chunk_size,
            plan.total_chunks,
            plan.last_chunk_len()
        );

        Ok(plan)
    }

    fn youtube(total_bytes: u64) -> Self {
        let chunk_size = YOUTUBE_CHUNK_SIZE.min(total_bytes);
        Self {
            chunk_size,
            total_chunks: total_bytes.div_ceil(chunk_size),
            total_bytes,
        }
    }

    fn tiktok(total_bytes: u64) -> Result<Self, PlanError> {
        if total_bytes <= TIKTOK_SINGLE_CHUNK_LIMIT {
            return Ok(Self {
                chunk_size: total_bytes,
                total_chunks: 1,
                total_bytes,
            });
        }

        let mut chunk_size = TIKTOK_DEFAULT_CHUNK_SIZE.min(total_bytes);
        let mut total_chunks = total_bytes / chunk_size;

        if total_chunks > TIKTOK_MAX_CHUNKS {
            total_chunks = TIKTOK_MAX_CHUNKS;
            chunk_size = total_bytes / TIKTOK_MAX_CHUNKS;
        }

        if chunk_size < TIKTOK_MIN_CHUNK_SIZE {
            return Err(PlanError::ChunkTooSmall {
                chunk_size,
                min: TIKTOK_MIN_CHUNK_SIZE,
            });
        }
        if chunk_size > TIKTOK_MAX_CHUNK_SIZE {
            return Err(PlanError::ChunkTooLarge {
                chunk_size,
                max: TIKTOK_MAX_CHUNK_SIZE,
            });
        }

        Ok(Self {
            chunk_size,
            total_chunks,
            total_bytes,
        })
    }

    /// 最后一片的实际长度，可能与 `chunk_size` 不同
    pub fn last_chunk_len(&self) -> u64 {
        self.total_bytes - self.chunk_size * (self.total_chunks - 1)
    }

    /// 第 `index` 片的字节范围
    pub fn chunk_range(&self, index: u64) -> Option<Range<u64>> {
        if index >= self.total_chunks {
            return None;
        }
        let start = index * self.chunk_size;
        let end = if index + 1 == self.total_chunks {
            self.total_bytes
        } else {
            start + self.chunk_size
        };
        Some(start..end)
    }

    /// 按顺序列出所有分片
    pub fn chunks(&self) -> impl Iterator<Item = UploadChunk> + '_ {
        (0..self.total_chunks).filter_map(move |index| {
            self.chunk_range(index)
                .map(|range| UploadChunk::new(index as usize, range))
        })
    }
}

/// 上传分片信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadChunk {
    /// 分片索引
    pub index: usize,
    /// 字节范围
    pub range: Range<u64>,
}

impl UploadChunk {
    pub fn new(index: usize, range: Range<u64>) -> Self {
        Self { index, range }
    }

    /// 分片大小
    pub fn size(&self) -> u64 {
        self.range.end - self.range.start
    }

    /// 读取分片数据
    pub async fn read_data(&self, file_path: &Path) -> Result<Vec<u8>> {
        let mut file = File::open(file_path).await.context("打开上传文件失败")?;

        // 定位到分片起始位置
        file.seek(std::io::SeekFrom::Start(self.range.start))
            .await
            .context("文件定位失败")?;

        let mut buffer = vec![0u8; self.size() as usize];
        file.read_exact(&mut buffer)
            .await
            .context("读取分片数据失败")?;

        debug!(
            "读取分片 #{}: bytes={}-{}, 大小={} bytes",
            self.index,
            self.range.start,
            self.range.end - 1,
            buffer.len()
        );

        Ok(buffer)
    }
}
