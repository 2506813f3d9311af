use serde::Serialize;
use std::io::SeekFrom;
use std::path::Path;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use scheduler_core::SchedulerResult;

/// 程序日志的一页，第 0 页为文件末尾最新的内容
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PagedLog {
    pub page: u64,
    pub page_count: u64,
    pub text: String,
}

impl PagedLog {
    /// `page_size` 单位为 KiB
    pub async fn read(path: impl AsRef<Path>, page: u64, page_size: u64) -> SchedulerResult<Self> {
        let page_bytes = page_size.max(1) * 1024;
        let mut file = match tokio::fs::File::open(path.as_ref()).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self {
                    page: 0,
                    page_count: 0,
                    text: String::new(),
                })
            }
            Err(e) => return Err(e.into()),
        };
        let len = file.metadata().await?.len();
        let page_count = len.div_ceil(page_bytes).max(1);
        let page = page.min(page_count - 1);

        let end = len - page * page_bytes;
        let start = end.saturating_sub(page_bytes);
        file.seek(SeekFrom::Start(start)).await?;
        let mut buf = vec![0u8; (end - start) as usize];
        file.read_exact(&mut buf).await?;

        Ok(Self {
            page,
            page_count,
            text: String::from_utf8_lossy(&buf).into_owned(),
        })
    }
}
