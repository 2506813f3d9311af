use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

/// 进程pid文件，`start` 写入，`stop` 读取后删除
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 写入当前进程pid；文件中的进程仍在运行时拒绝启动
    pub fn write(&self) -> Result<()> {
        if let Some(pid) = self.read()? {
            if process_alive(pid) {
                anyhow::bail!("调度服务已在运行 (pid {pid})，pid文件: {}", self.path.display());
            }
            warn!("pid文件中的进程 {} 已退出，覆盖旧文件", pid);
        }
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("创建目录失败: {}", parent.display()))?;
        }
        std::fs::write(&self.path, std::process::id().to_string())
            .with_context(|| format!("写入pid文件失败: {}", self.path.display()))?;
        debug!("pid文件已写入: {}", self.path.display());
        Ok(())
    }

    pub fn read(&self) -> Result<Option<u32>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&self.path)
            .with_context(|| format!("读取pid文件失败: {}", self.path.display()))?;
        let pid = raw
            .trim()
            .parse::<u32>()
            .with_context(|| format!("pid文件内容无效: {}", raw.trim()))?;
        Ok(Some(pid))
    }

    pub fn remove(&self) -> Result<()> {
        if self.path.exists() {
            std::fs::remove_file(&self.path)
                .with_context(|| format!("删除pid文件失败: {}", self.path.display()))?;
        }
        Ok(())
    }

    /// 向pid文件中的进程发送SIGTERM并删除pid文件，返回被终止的pid
    pub async fn terminate(&self) -> Result<Option<u32>> {
        let Some(pid) = self.read()? else {
            return Ok(None);
        };
        let status = tokio::process::Command::new("kill")
            .arg("-TERM")
            .arg(pid.to_string())
            .status()
            .await
            .context("执行kill失败")?;
        if !status.success() {
            warn!("kill {} 返回 {}，进程可能已经退出", pid, status);
        } else {
            info!("已向进程 {} 发送SIGTERM", pid);
        }
        self.remove()?;
        Ok(Some(pid))
    }
}

/// 等待进程退出，超时返回 `false`
pub async fn wait_exit(pid: u32, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while process_alive(pid) {
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    true
}

#[cfg(unix)]
fn process_alive(pid: u32) -> bool {
    Path::new(&format!("/proc/{pid}")).exists()
        || std::process::Command::new("kill")
            .arg("-0")
            .arg(pid.to_string())
            .stderr(std::process::Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
}

#[cfg(not(unix))]
fn process_alive(_pid: u32) -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_read_remove() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = PidFile::new(dir.path().join("run").join("task-scheduler.pid"));
        assert_eq!(pid_file.read().unwrap(), None);

        pid_file.write().unwrap();
        assert_eq!(pid_file.read().unwrap(), Some(std::process::id()));

        // 当前进程仍在运行，不能重复写入
        #[cfg(unix)]
        assert!(pid_file.write().is_err());

        pid_file.remove().unwrap();
        assert!(!pid_file.path().exists());
        pid_file.remove().unwrap();
    }

    #[test]
    fn test_invalid_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("task-scheduler.pid");
        std::fs::write(&path, "not-a-pid").unwrap();
        assert!(PidFile::new(&path).read().is_err());
    }

    #[tokio::test]
    async fn test_terminate_without_pid_file() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = PidFile::new(dir.path().join("task-scheduler.pid"));
        assert_eq!(pid_file.terminate().await.unwrap(), None);
    }
}
