//! Resilient FTP session, listing strategies and session pool
//! / 带保护的 FTP 会话、目录枚举策略与连接池
//!
//! Every operation is raced against the per-source operation deadline. When
//! the deadline wins the underlying connection is dropped (force-closed) and
//! the session becomes unusable; callers must discard it and treat the branch
//! as failed. Sibling branches continue.

use super::SourceAdapter;
use crate::error::{ScanError, ScanResult};
use crate::models::SourceConfig;
use crate::utils::path_basename;
use async_trait::async_trait;
use encoding_rs::Encoding;
use futures::io::AsyncReadExt;
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use suppaftp::list::File;
use suppaftp::AsyncFtpStream;
use tokio::sync::Mutex;

/// Race an FTP operation against a hard deadline. / 以硬超时竞争执行 FTP 操作
///
/// Timer-wins is reported as `DeadlineExceeded`; the caller is responsible for
/// discarding the session whose connection backed the future.
pub(crate) async fn with_deadline<T, E>(
    deadline: Duration,
    fut: impl Future<Output = Result<T, E>>,
) -> ScanResult<T>
where
    E: std::fmt::Display,
{
    let res = tokio::time::timeout(deadline, fut).await;
    match res {
        Ok(Ok(v)) => Ok(v),
        Ok(Err(e)) => Err(ScanError::Ftp(e.to_string())),
        Err(_) => Err(ScanError::DeadlineExceeded(deadline.as_secs_f64())),
    }
}

/// One authenticated FTP connection with deadline discipline.
/// / 单条已认证的 FTP 连接
pub struct FtpSession {
    op_deadline: Duration,
    encoding: String,
    stream: Option<AsyncFtpStream>,
}

impl FtpSession {
    /// Connect and login. Fails with `Connect` on any establishment error.
    pub async fn connect(cfg: &SourceConfig) -> ScanResult<Self> {
        let addr = format!("{}:{}", cfg.address, cfg.port);
        let connect_timeout = Duration::from_secs(cfg.timeout.max(1));

        let res = tokio::time::timeout(connect_timeout, AsyncFtpStream::connect(&addr)).await;
        let mut stream = match res {
            Ok(Ok(s)) => s,
            Ok(Err(e)) => return Err(ScanError::Connect(format!("{}: {}", addr, e))),
            Err(_) => {
                return Err(ScanError::Connect(format!(
                    "{}: connect timed out after {}s",
                    addr, cfg.timeout
                )))
            }
        };

        let login = tokio::time::timeout(connect_timeout, stream.login(&cfg.user, &cfg.password)).await;
        match login {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => return Err(ScanError::Connect(format!("{}: login failed: {}", addr, e))),
            Err(_) => return Err(ScanError::Connect(format!("{}: login timed out", addr))),
        }

        Ok(Self {
            op_deadline: Duration::from_secs_f64(cfg.op_deadline.max(0.1)),
            encoding: cfg.encoding.clone(),
            stream: Some(stream),
        })
    }

    #[cfg(test)]
    fn discarded_for_test() -> Self {
        Self {
            op_deadline: Duration::from_millis(100),
            encoding: String::new(),
            stream: None,
        }
    }

    fn stream_mut(&mut self) -> ScanResult<&mut AsyncFtpStream> {
        self.stream
            .as_mut()
            .ok_or_else(|| ScanError::Connect("session discarded after deadline".to_string()))
    }

    /// Drop the connection on non-reusable errors; the socket closes with it.
    fn note<T>(&mut self, res: ScanResult<T>) -> ScanResult<T> {
        if let Err(e) = &res {
            if !e.session_reusable() {
                self.stream = None;
            }
        }
        res
    }

    fn encode_path(&self, path: &str) -> String {
        if self.encoding.is_empty() || self.encoding.eq_ignore_ascii_case("utf-8") {
            return path.to_string();
        }
        match Encoding::for_label(self.encoding.as_bytes()) {
            Some(enc) => {
                let (encoded, _, _) = enc.encode(path);
                String::from_utf8_lossy(&encoded).to_string()
            }
            None => path.to_string(),
        }
    }

    fn decode_name(&self, name: &str) -> String {
        if self.encoding.is_empty() || self.encoding.eq_ignore_ascii_case("utf-8") {
            return name.to_string();
        }
        match Encoding::for_label(self.encoding.as_bytes()) {
            Some(enc) => {
                let (decoded, _, _) = enc.decode(name.as_bytes());
                decoded.to_string()
            }
            None => name.to_string(),
        }
    }

    pub fn is_alive(&self) -> bool {
        self.stream.is_some()
    }

    /// Keep-alive probe, used by the pool to revalidate idle sessions.
    pub async fn noop(&mut self) -> ScanResult<()> {
        let d = self.op_deadline;
        let res = {
            let s = self.stream_mut()?;
            with_deadline(d, s.noop()).await
        };
        self.note(res)
    }

    pub async fn cwd(&mut self, path: &str) -> ScanResult<()> {
        let d = self.op_deadline;
        let enc = self.encode_path(path);
        let res = {
            let s = self.stream_mut()?;
            with_deadline(d, s.cwd(&enc)).await
        };
        self.note(res)
    }

    /// NLST against the current directory, basenames only.
    pub async fn nlst(&mut self, pattern: Option<&str>) -> ScanResult<Vec<String>> {
        let d = self.op_deadline;
        let res = {
            let s = self.stream_mut()?;
            with_deadline(d, s.nlst(pattern)).await
        };
        let names = self.note(res)?;
        Ok(names
            .iter()
            .map(|n| self.decode_name(path_basename(n)))
            .filter(|n| !n.is_empty() && n != "." && n != "..")
            .collect())
    }

    /// Structured machine-readable listing (MLSD), directories only.
    pub async fn mlsd_dirs(&mut self, path: &str) -> ScanResult<Vec<String>> {
        let d = self.op_deadline;
        let enc = self.encode_path(path);
        let res = {
            let s = self.stream_mut()?;
            with_deadline(d, s.mlsd(Some(enc.as_str()))).await
        };
        let lines = self.note(res)?;
        let mut dirs: Vec<String> = mlsx_dir_names(&lines)
            .iter()
            .map(|n| self.decode_name(n))
            .collect();
        dirs.sort();
        Ok(dirs)
    }

    /// Human-readable long listing (LIST), directories only.
    pub async fn list_dirs_long(&mut self, path: &str) -> ScanResult<Vec<String>> {
        let d = self.op_deadline;
        let enc = self.encode_path(path);
        let res = {
            let s = self.stream_mut()?;
            with_deadline(d, s.list(Some(enc.as_str()))).await
        };
        let lines = self.note(res)?;
        let mut dirs = Vec::new();
        for line in &lines {
            match File::try_from(line.as_str()) {
                Ok(f) => {
                    if f.is_directory() {
                        let name = self.decode_name(f.name());
                        if name != "." && name != ".." {
                            dirs.push(name);
                        }
                    }
                }
                // Non-POSIX servers: fall back to a whitespace split
                Err(_) => {
                    if let Some(name) = parse_long_line(line) {
                        dirs.push(self.decode_name(&name));
                    }
                }
            }
        }
        dirs.sort();
        Ok(dirs)
    }

    /// Read a small text file in full, bounded by one deadline.
    pub async fn retr_text(&mut self, path: &str) -> ScanResult<String> {
        let d = self.op_deadline;
        let enc = self.encode_path(path);
        let res = {
            let s = self.stream_mut()?;
            with_deadline(d, async {
                let mut data = s.retr_as_stream(&enc).await?;
                let mut buf = Vec::new();
                data.read_to_end(&mut buf)
                    .await
                    .map_err(suppaftp::FtpError::ConnectionError)?;
                s.finalize_retr_stream(data).await?;
                Ok::<_, suppaftp::FtpError>(buf)
            })
            .await
        };
        let buf = self.note(res)?;
        Ok(String::from_utf8_lossy(&buf).to_string())
    }

    /// Best-effort orderly shutdown; failures are swallowed.
    pub async fn close(mut self) {
        if let Some(mut s) = self.stream.take() {
            let _ = tokio::time::timeout(Duration::from_secs(2), s.quit()).await;
        }
    }
}

/// Parse one `LIST` output line the lenient way (`drwxr-xr-x ... name`).
/// MLSD returns raw fact lines, not parsed entries; keep directory names only.
/// Lines that do not parse (e.g. `type=cdir` / `type=pdir`) are skipped.
/// MLSD 返回原始 fact 行，这里只保留目录名
fn mlsx_dir_names(lines: &[String]) -> Vec<String> {
    let mut names = Vec::new();
    for line in lines {
        let f = match File::from_mlsx_line(line) {
            Ok(f) => f,
            Err(_) => continue,
        };
        if f.is_directory() {
            let name = f.name().to_string();
            if name != "." && name != ".." {
                names.push(name);
            }
        }
    }
    names
}

fn parse_long_line(line: &str) -> Option<String> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.len() < 9 || !line.starts_with('d') {
        return None;
    }
    let name = parts[8..].join(" ");
    if name.is_empty() || name == "." || name == ".." {
        return None;
    }
    Some(name)
}

/// Directory listing with degrading strategies: MLSD, then LIST, then plain
/// NLST issued twice and unioned (some servers silently truncate one pass).
/// / 目录枚举三级降级策略
pub async fn list_dirs_resilient(sess: &mut FtpSession, path: &str) -> ScanResult<Vec<String>> {
    match sess.mlsd_dirs(path).await {
        Ok(v) => return Ok(v),
        Err(e) if !e.session_reusable() => return Err(e),
        Err(e) => tracing::debug!("list_dirs: MLSD failed at {}: {}", path, e),
    }

    match sess.list_dirs_long(path).await {
        Ok(v) => return Ok(v),
        Err(e) if !e.session_reusable() => return Err(e),
        Err(e) => tracing::debug!("list_dirs: LIST failed at {}: {}", path, e),
    }

    let nlst_res = async {
        sess.cwd(path).await?;
        let mut names: BTreeSet<String> = sess.nlst(Some("*")).await?.into_iter().collect();
        if !names.is_empty() {
            // second probe, single passes get truncated on some servers
            names.extend(sess.nlst(Some("*")).await?);
        }
        Ok::<_, ScanError>(names.into_iter().collect::<Vec<_>>())
    }
    .await;
    match nlst_res {
        Ok(v) => Ok(v),
        Err(e) if !e.session_reusable() => Err(e),
        Err(e) => {
            tracing::debug!("list_dirs: NLST failed at {}: {}", path, e);
            Err(ScanError::ListUnavailable(path.to_string()))
        }
    }
}

/// Bounded reuse of FTP sessions across concurrent workers. / FTP 会话池
///
/// `acquire` never blocks on exhaustion: excess demand constructs temporary
/// sessions beyond the nominal size and `release` closes them instead of
/// pooling.
pub struct SessionPool {
    cfg: SourceConfig,
    size: usize,
    idle: Mutex<Vec<FtpSession>>,
}

impl SessionPool {
    pub fn new(cfg: &SourceConfig) -> Self {
        Self {
            cfg: cfg.clone(),
            size: cfg.pool_size.max(1),
            idle: Mutex::new(Vec::new()),
        }
    }

    /// Reuse an idle session (revalidated with NOOP) or connect a new one.
    pub async fn acquire(&self) -> ScanResult<FtpSession> {
        loop {
            let candidate = self.idle.lock().await.pop();
            match candidate {
                Some(mut sess) => {
                    if sess.noop().await.is_ok() {
                        return Ok(sess);
                    }
                    // stale connection, drop and retry the pool
                    sess.close().await;
                }
                None => return FtpSession::connect(&self.cfg).await,
            }
        }
    }

    /// Return a session to the idle set if capacity remains, else close it.
    pub async fn release(&self, sess: FtpSession) {
        if !sess.is_alive() {
            return;
        }
        {
            let mut idle = self.idle.lock().await;
            if idle.len() < self.size {
                idle.push(sess);
                return;
            }
        }
        sess.close().await;
    }

    /// Close all pooled sessions, best-effort. / 关闭全部空闲会话
    pub async fn close_all(&self) {
        let drained: Vec<FtpSession> = self.idle.lock().await.drain(..).collect();
        for sess in drained {
            sess.close().await;
        }
    }
}

/// FTP variant of the source adapter, backed by a session pool.
pub struct FtpAdapter {
    cfg: SourceConfig,
    pool: Arc<SessionPool>,
}

impl FtpAdapter {
    pub fn new(cfg: &SourceConfig) -> Self {
        Self {
            cfg: cfg.clone(),
            pool: Arc::new(SessionPool::new(cfg)),
        }
    }

}

#[async_trait]
impl SourceAdapter for FtpAdapter {
    async fn list_dirs(&self, path: &str) -> ScanResult<Vec<String>> {
        let mut sess = self.pool.acquire().await?;
        let res = list_dirs_resilient(&mut sess, path).await;
        self.pool.release(sess).await;
        res
    }

    async fn list_names(&self, path: &str, pattern: &str) -> ScanResult<Vec<String>> {
        let mut sess = self.pool.acquire().await?;
        let res = async {
            sess.cwd(path).await?;
            let pat = if pattern.is_empty() { None } else { Some(pattern) };
            match sess.nlst(pat).await {
                Ok(mut names) => {
                    if !names.is_empty() {
                        // second probe, see list_dirs_resilient
                        names.extend(sess.nlst(pat).await?);
                    }
                    let set: BTreeSet<String> = names.into_iter().collect();
                    Ok(set.into_iter().collect())
                }
                Err(e) if !e.session_reusable() => Err(e),
                Err(_) => {
                    // servers without NLST globbing: list everything, filter
                    let prefix = pattern.trim_end_matches('*').to_string();
                    let all = sess.nlst(None).await?;
                    let set: BTreeSet<String> = all
                        .into_iter()
                        .filter(|n| n.starts_with(&prefix))
                        .collect();
                    Ok(set.into_iter().collect())
                }
            }
        }
        .await;
        self.pool.release(sess).await;
        res
    }

    async fn read_head(&self, path: &str, n: usize) -> ScanResult<Vec<String>> {
        let mut sess = self.pool.acquire().await?;
        let res = sess.retr_text(path).await;
        self.pool.release(sess).await;
        let text = res?;
        Ok(text
            .lines()
            .take(n)
            .map(|l| l.trim_end_matches('\r').to_string())
            .collect())
    }

    async fn shutdown(&self) {
        self.pool.close_all().await;
    }
}
