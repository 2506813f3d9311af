//! 缓存服务 TCP 服务端
//!
//! 一个反应器任务独占 [`Store`]，连接任务只负责读写套接字，通过通道与反应器交换命令。

use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, info, warn};

use scheduler_core::{SchedulerError, SchedulerResult};

use super::protocol::{is_http_request_line, Dialect, Reply, Request};
use super::store::{Responder, Store};

const SWEEP_INTERVAL: Duration = Duration::from_secs(1);
const COMMAND_BUFFER: usize = 1024;
const MAX_REQUEST_LINES: usize = 4096;

/// 发往反应器的命令
#[derive(Debug)]
pub struct Command {
    pub request: Request,
    pub responder: Responder,
}

/// 反应器句柄，可被多个连接和进程内客户端共享
#[derive(Debug, Clone)]
pub struct ReactorHandle {
    commands: mpsc::Sender<Command>,
}

impl ReactorHandle {
    /// 启动反应器任务
    pub fn spawn() -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let task = tokio::spawn(run_reactor(Store::new(), rx));
        (Self { commands: tx }, task)
    }

    /// 提交命令并等待结果，阻塞命令按 `block` 等待，零表示一直等待
    pub async fn execute(&self, request: Request, block: Duration) -> Reply {
        let (responder, mut rx) = oneshot::channel();
        if self.commands.send(Command { request, responder }).await.is_err() {
            return Reply::error("cache service is shutting down");
        }
        if block.is_zero() {
            return rx.await.unwrap_or(Reply::Nil);
        }
        match timeout(block, &mut rx).await {
            Ok(reply) => reply.unwrap_or(Reply::Nil),
            Err(_) => {
                // 关闭后反应器的发送会失败，数据留在队列里；关闭前已送达的照常取走
                rx.close();
                rx.try_recv().unwrap_or(Reply::Nil)
            }
        }
    }
}

async fn run_reactor(mut store: Store, mut commands: mpsc::Receiver<Command>) {
    let mut sweep = interval(SWEEP_INTERVAL);
    sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            command = commands.recv() => {
                let Some(Command { request, responder }) = command else {
                    break;
                };
                store.dispatch(&request, responder, Instant::now());
            }
            _ = sweep.tick() => {
                let expired = store.sweep(Instant::now());
                if expired > 0 {
                    debug!("清理过期缓存 {} 个", expired);
                }
            }
        }
    }
    debug!("缓存反应器退出");
}

pub struct CacheServer {
    listener: TcpListener,
    read_timeout: Duration,
}

impl CacheServer {
    pub async fn bind(address: &str) -> SchedulerResult<Self> {
        let listener = TcpListener::bind(address)
            .await
            .map_err(|e| SchedulerError::Cache(format!("无法监听 {address}: {e}")))?;
        Ok(Self {
            listener,
            read_timeout: Duration::from_secs(5),
        })
    }

    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    pub fn local_addr(&self) -> SchedulerResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// 在后台运行，返回可关闭的句柄
    pub fn spawn(self) -> SchedulerResult<CacheServerHandle> {
        let address = self.local_addr()?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(self.serve(shutdown_rx));
        Ok(CacheServerHandle {
            address,
            shutdown: shutdown_tx,
            task,
        })
    }

    pub async fn serve(self, mut shutdown: watch::Receiver<bool>) {
        let (reactor, reactor_task) = ReactorHandle::spawn();
        if let Ok(address) = self.listener.local_addr() {
            info!("缓存服务监听于 {}", address);
        }
        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            let reactor = reactor.clone();
                            let read_timeout = self.read_timeout;
                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(stream, reactor, read_timeout).await {
                                    debug!("连接 {} 处理失败: {}", peer, e);
                                }
                            });
                        }
                        Err(e) => warn!("接受连接失败: {}", e),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        drop(reactor);
        reactor_task.abort();
        info!("缓存服务已停止");
    }
}

pub struct CacheServerHandle {
    address: SocketAddr,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl CacheServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.address
    }

    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
    }
}

async fn handle_connection(
    stream: TcpStream,
    reactor: ReactorHandle,
    read_timeout: Duration,
) -> SchedulerResult<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    let (dialect, reply) = match read_request(&mut reader, read_timeout).await {
        Ok((dialect, Ok(request))) => {
            let reply = match request.block_timeout() {
                Ok(block) if request.is_blocking() => reactor.execute(request, block).await,
                Ok(_) => reactor.execute(request, Duration::ZERO).await,
                Err(message) => Reply::error(message),
            };
            (dialect, reply)
        }
        Ok((dialect, Err(message))) => (dialect, Reply::error(message)),
        Err((dialect, reply)) => (dialect, reply),
    };
    writer.write_all(reply.encode(dialect).as_bytes()).await?;
    writer.shutdown().await?;
    Ok(())
}

/// 读取一个请求：首行决定协议，随后读到空行为止
async fn read_request<R>(
    reader: &mut BufReader<R>,
    read_timeout: Duration,
) -> Result<(Dialect, Result<Request, String>), (Dialect, Reply)>
where
    R: AsyncRead + Unpin,
{
    let first = match timeout(read_timeout, read_line(reader)).await {
        Ok(Ok(Some(line))) => line,
        Ok(Ok(None)) => return Err((Dialect::Line, Reply::error("empty request"))),
        Ok(Err(e)) => return Err((Dialect::Line, Reply::error(e.to_string()))),
        Err(_) => return Err((Dialect::Line, Reply::timeout())),
    };
    let dialect = if is_http_request_line(&first) { Dialect::Http } else { Dialect::Line };

    let mut lines = vec![first];
    let rest = timeout(read_timeout, async {
        loop {
            match read_line(reader).await? {
                Some(line) if !line.is_empty() => {
                    if lines.len() >= MAX_REQUEST_LINES {
                        return Err(std::io::Error::other("request too large"));
                    }
                    lines.push(line);
                }
                _ => return Ok(()),
            }
        }
    })
    .await;
    match rest {
        Ok(Ok(())) => {}
        Ok(Err(e)) => return Err((dialect, Reply::error(e.to_string()))),
        Err(_) => return Err((dialect, Reply::timeout())),
    }

    let request = match dialect {
        Dialect::Http => Request::parse_http(&lines[0]),
        Dialect::Line => Request::parse_lines(&lines),
    };
    Ok((dialect, request))
}

async fn read_line<R>(reader: &mut BufReader<R>) -> std::io::Result<Option<String>>
where
    R: AsyncRead + Unpin,
{
    let mut buf = String::new();
    if reader.read_line(&mut buf).await? == 0 {
        return Ok(None);
    }
    Ok(Some(buf.trim_end_matches(['\r', '\n']).to_string()))
}
