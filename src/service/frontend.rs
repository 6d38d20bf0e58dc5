//! TCP 前端
//!
//! 每个连接一个 tokio 任务。请求以空行结束，`KeepAlive: on` 时
//! 同一连接可以连续发送多个请求。
//!
//! 引擎返回不变量错误时，整个监听循环停止并把错误返回给调用方。

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use crate::protocol::send_response;
use crate::query::{parse_request, wants_fixed16, QueryEngine, Response};
use crate::{BrokerError, Result};

/// livestatus TCP 前端
pub struct Frontend {
    engine: Arc<QueryEngine>,
    listen: String,
}

impl Frontend {
    pub fn new(engine: Arc<QueryEngine>, listen: impl Into<String>) -> Self {
        Self {
            engine,
            listen: listen.into(),
        }
    }

    pub fn listen(&self) -> &str {
        &self.listen
    }

    pub async fn bind(&self) -> Result<TcpListener> {
        let listener = TcpListener::bind(&self.listen).await?;
        log::info!("livestatus frontend listening on {}", self.listen);
        Ok(listener)
    }

    /// 绑定并一直运行
    pub async fn run(&self) -> Result<()> {
        let listener = self.bind().await?;
        self.serve(listener, std::future::pending()).await
    }

    /// 在已绑定的 listener 上服务，直到 `shutdown` 完成或出现致命错误
    pub async fn serve(&self, listener: TcpListener, shutdown: impl Future<Output = ()>) -> Result<()> {
        let (fatal_tx, mut fatal_rx) = mpsc::channel::<BrokerError>(1);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, addr) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            log::warn!("accept failed on {}: {}", self.listen, e);
                            continue;
                        }
                    };
                    self.spawn_connection(stream, addr, fatal_tx.clone());
                }
                Some(error) = fatal_rx.recv() => {
                    log::error!("stopping frontend {}: {}", self.listen, error);
                    return Err(error);
                }
                _ = &mut shutdown => {
                    log::info!("frontend {} shutting down", self.listen);
                    return Ok(());
                }
            }
        }
    }

    fn spawn_connection(&self, stream: TcpStream, addr: SocketAddr, fatal_tx: mpsc::Sender<BrokerError>) {
        let engine = Arc::clone(&self.engine);
        let listen = self.listen.clone();
        log::debug!("new client connection from {}", addr);

        tokio::spawn(async move {
            let (reader, writer) = stream.into_split();
            match handle_connection(&engine, reader, writer, &listen).await {
                Ok(()) => log::trace!("client {} disconnected", addr),
                Err(e) if e.is_fatal() => {
                    let _ = fatal_tx.send(e).await;
                }
                Err(e) => log::debug!("client {}: {}", addr, e),
            }
        });
    }
}

/// 读取一个请求 (到空行或 EOF 为止)，连接已关闭时返回 None
async fn read_request<R>(reader: &mut BufReader<R>) -> Result<Option<String>>
where
    R: AsyncRead + Unpin,
{
    let mut text = String::new();
    loop {
        let mut line = String::new();
        let n = reader.read_line(&mut line).await?;
        if n == 0 || line.trim_end().is_empty() {
            if n > 0 && text.is_empty() {
                // 请求之间多余的空行
                continue;
            }
            break;
        }
        text.push_str(&line);
    }
    Ok((!text.is_empty()).then_some(text))
}

/// 处理一个连接上的所有请求
pub async fn handle_connection<R, W>(
    engine: &QueryEngine,
    reader: R,
    mut writer: W,
    listen: &str,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut reader = BufReader::new(reader);

    while let Some(text) = read_request(&mut reader).await? {
        let request = match parse_request(&text) {
            Ok(request) => request,
            Err(e) => {
                log::debug!("bad request from client: {}", e);
                let mut response = Response::from_error(e, wants_fixed16(&text));
                send_response(&mut writer, &mut response, listen).await?;
                return Ok(());
            }
        };

        let mut response = engine.build_response(&request).await?;
        if let Err(e) = send_response(&mut writer, &mut response, listen).await {
            log::error!("[{}] failed to send response: {}", request.request_id, e);
            return Err(e);
        }

        if !request.keep_alive {
            break;
        }
    }
    Ok(())
}
