//! 直通连接
//!
//! 把精简后的子请求发给后端并取回原始行。
//! 地址以 `/` 开头时使用 unix socket，否则使用 TCP。

use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpStream, UnixStream};

use super::PeerError;
use crate::protocol::framing::{parse_status_line, STATUS_LINE_LEN};
use crate::query::{Request, Row, Value};

/// 默认最大响应体 (256 MiB)
pub const DEFAULT_MAX_RESPONSE_SIZE: usize = 256 * 1024 * 1024;

/// 一次往返的传输字节数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Transfer {
    pub sent: u64,
    pub received: u64,
}

/// 后端连接接口
#[async_trait]
pub trait PeerConnection: Send + Sync {
    /// 发送请求并返回原始行
    async fn query(&self, request: &Request) -> Result<Vec<Row>, PeerError>;

    /// 同 `query`，附带传输字节数；不统计字节的连接返回 0
    async fn query_counted(&self, request: &Request) -> Result<(Vec<Row>, Transfer), PeerError> {
        let rows = self.query(request).await?;
        Ok((rows, Transfer::default()))
    }
}

/// livestatus 协议连接 (每次查询新建连接)
#[derive(Debug, Clone)]
pub struct LivestatusConnection {
    addr: String,
    timeout: Duration,
    max_response_size: usize,
}

impl LivestatusConnection {
    pub fn new(addr: impl Into<String>, timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            timeout,
            max_response_size: DEFAULT_MAX_RESPONSE_SIZE,
        }
    }

    pub fn with_max_response_size(mut self, size: usize) -> Self {
        self.max_response_size = size;
        self
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    async fn round_trip(&self, query: &str) -> Result<(Vec<Row>, Transfer), PeerError> {
        if self.addr.starts_with('/') {
            let stream = UnixStream::connect(&self.addr)
                .await
                .map_err(|e| PeerError::Connection(format!("{}: {}", self.addr, e)))?;
            exchange(stream, query, self.max_response_size).await
        } else {
            let stream = TcpStream::connect(&self.addr)
                .await
                .map_err(|e| PeerError::Connection(format!("{}: {}", self.addr, e)))?;
            exchange(stream, query, self.max_response_size).await
        }
    }
}

#[async_trait]
impl PeerConnection for LivestatusConnection {
    async fn query(&self, request: &Request) -> Result<Vec<Row>, PeerError> {
        self.query_counted(request).await.map(|(rows, _)| rows)
    }

    async fn query_counted(&self, request: &Request) -> Result<(Vec<Row>, Transfer), PeerError> {
        let mut request = request.clone();
        request.response_fixed16 = true;
        let query = request.to_query_text();
        log::trace!("[{}] query: {}", self.addr, query.trim_end());

        tokio::time::timeout(self.timeout, self.round_trip(&query))
            .await
            .map_err(|_| PeerError::Timeout(self.timeout))?
    }
}

/// 写请求，读 16 字节状态行和定长响应体
async fn exchange<S>(
    mut stream: S,
    query: &str,
    max_response_size: usize,
) -> Result<(Vec<Row>, Transfer), PeerError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let io_err = |e: std::io::Error| PeerError::Connection(e.to_string());

    stream.write_all(query.as_bytes()).await.map_err(io_err)?;
    stream.flush().await.map_err(io_err)?;

    let mut header = [0u8; STATUS_LINE_LEN];
    stream.read_exact(&mut header).await.map_err(io_err)?;
    let (code, size) = parse_status_line(&header).map_err(|e| PeerError::Protocol(e.to_string()))?;

    // 先检查长度再分配缓冲区
    if size > max_response_size {
        return Err(PeerError::Protocol(format!(
            "response size {} exceeds limit {}",
            size, max_response_size
        )));
    }

    let mut body = vec![0u8; size];
    stream.read_exact(&mut body).await.map_err(io_err)?;

    if code != 200 {
        return Err(PeerError::Backend {
            code,
            message: String::from_utf8_lossy(&body).trim().to_string(),
        });
    }

    let transfer = Transfer {
        sent: query.len() as u64,
        received: (STATUS_LINE_LEN + size) as u64,
    };
    Ok((decode_rows(&body)?, transfer))
}

/// 解析 json 响应体
pub fn decode_rows(body: &[u8]) -> Result<Vec<Row>, PeerError> {
    let rows: Vec<Vec<serde_json::Value>> =
        serde_json::from_slice(body).map_err(|e| PeerError::Protocol(e.to_string()))?;

    Ok(rows
        .into_iter()
        .map(|row| row.into_iter().map(Value::from_json).collect())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncBufReadExt;
    use tokio::net::TcpListener;

    #[test]
    fn test_decode_rows() {
        let rows = decode_rows(b"[[\"a\",1],\n[\"b\",2.5]]\n").unwrap();
        assert_eq!(
            rows,
            vec![
                vec![Value::from("a"), Value::Int(1)],
                vec![Value::from("b"), Value::Float(2.5)],
            ]
        );
        assert!(matches!(decode_rows(b"{\"x\":1}"), Err(PeerError::Protocol(_))));
    }

    /// 启动一个只应答一次的假后端
    async fn fake_backend(response: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut reader = tokio::io::BufReader::new(stream);
            let mut line = String::new();
            loop {
                line.clear();
                reader.read_line(&mut line).await.unwrap();
                if line == "\n" || line.is_empty() {
                    break;
                }
            }
            reader.get_mut().write_all(response.as_bytes()).await.unwrap();
        });
        addr
    }

    #[tokio::test]
    async fn test_livestatus_round_trip() {
        let addr = fake_backend("200          15\n[[\"h1\",0]\n,[]]\n").await;
        let connection = LivestatusConnection::new(addr, Duration::from_secs(5));
        let rows = connection
            .query(&Request::new("hosts").with_columns(["name", "state"]))
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], vec![Value::from("h1"), Value::Int(0)]);
        assert!(rows[1].is_empty());
    }

    #[tokio::test]
    async fn test_transfer_bytes_counted() {
        let addr = fake_backend("200          15\n[[\"h1\",0]\n,[]]\n").await;
        let connection = LivestatusConnection::new(addr, Duration::from_secs(5));
        let request = Request::new("hosts").with_columns(["name"]).with_fixed16();
        let (rows, transfer) = connection.query_counted(&request).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(transfer.sent, request.to_query_text().len() as u64);
        assert_eq!(transfer.received, 16 + 15);
    }

    #[tokio::test]
    async fn test_oversized_response_rejected() {
        let addr = fake_backend("200 99999999999\n").await;
        let connection = LivestatusConnection::new(addr, Duration::from_secs(5));
        let err = connection.query(&Request::new("hosts")).await.unwrap_err();
        assert_eq!(
            err,
            PeerError::Protocol(format!(
                "response size 99999999999 exceeds limit {}",
                DEFAULT_MAX_RESPONSE_SIZE
            ))
        );

        let addr = fake_backend("200          15\n[[\"h1\",0]\n,[]]\n").await;
        let connection = LivestatusConnection::new(addr, Duration::from_secs(5)).with_max_response_size(8);
        let err = connection.query(&Request::new("hosts")).await.unwrap_err();
        assert!(matches!(err, PeerError::Protocol(m) if m.contains("exceeds limit 8")));
    }

    #[tokio::test]
    async fn test_non_ascii_status_line_is_protocol_error() {
        let addr = fake_backend("20\u{e9}         43\n").await;
        let connection = LivestatusConnection::new(addr, Duration::from_secs(5));
        let err = connection.query(&Request::new("hosts")).await.unwrap_err();
        assert!(matches!(err, PeerError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_backend_error_code() {
        let addr = fake_backend("400          18\nbad request: nope\n").await;
        let connection = LivestatusConnection::new(addr, Duration::from_secs(5));
        let err = connection.query(&Request::new("hosts")).await.unwrap_err();
        assert_eq!(
            err,
            PeerError::Backend {
                code: 400,
                message: "bad request: nope".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_connection_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let connection = LivestatusConnection::new(addr, Duration::from_secs(5));
        let err = connection.query(&Request::new("hosts")).await.unwrap_err();
        assert!(matches!(err, PeerError::Connection(_)));
    }
}
