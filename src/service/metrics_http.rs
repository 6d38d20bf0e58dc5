//! Prometheus 抓取端点
//!
//! 只实现 `GET /metrics`，直接基于 tokio TCP，不引入 HTTP 框架。

use std::future::Future;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use crate::observability::export_metrics;
use crate::Result;

/// 在 `listener` 上服务，直到 `shutdown` 完成
pub async fn serve_metrics(listener: TcpListener, shutdown: impl Future<Output = ()>) {
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, _)) => {
                        tokio::spawn(async move {
                            if let Err(e) = handle_metrics_request(stream).await {
                                log::debug!("metrics request error: {}", e);
                            }
                        });
                    }
                    Err(e) => log::debug!("metrics accept error: {}", e),
                }
            }
            _ = &mut shutdown => {
                log::info!("metrics endpoint shutting down");
                break;
            }
        }
    }
}

/// 绑定地址并服务
pub async fn run_metrics_server(addr: &str, shutdown: impl Future<Output = ()>) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    log::info!("metrics endpoint listening on {}", addr);
    serve_metrics(listener, shutdown).await;
    Ok(())
}

async fn handle_metrics_request(mut stream: TcpStream) -> Result<()> {
    let mut buf = [0u8; 1024];
    let n = stream.read(&mut buf).await?;
    if n == 0 {
        return Ok(());
    }

    let request = String::from_utf8_lossy(&buf[..n]);
    let path = request
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .unwrap_or("/");

    let (status, content_type, body) = match path {
        "/metrics" => ("200 OK", "text/plain; version=0.0.4", export_metrics()),
        _ => ("404 Not Found", "text/plain", "not found\n".to_string()),
    };

    let response = format!(
        "HTTP/1.1 {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        content_type,
        body.len(),
        body
    );
    stream.write_all(response.as_bytes()).await?;
    stream.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::{init_metrics, FRONTEND_QUERIES};

    async fn scrape(request: &str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let server = tokio::spawn(serve_metrics(listener, async move {
            let _ = stop_rx.await;
        }));

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(request.as_bytes()).await.unwrap();
        let mut response = String::new();
        client.read_to_string(&mut response).await.unwrap();

        stop_tx.send(()).unwrap();
        server.await.unwrap();
        response
    }

    #[tokio::test]
    async fn test_metrics_scrape() {
        init_metrics();
        FRONTEND_QUERIES.with_label_values(&["services"]).inc();

        let response = scrape("GET /metrics HTTP/1.1\r\nHost: localhost\r\n\r\n").await;
        assert!(response.starts_with("HTTP/1.1 200 OK"));
        assert!(response.contains("text/plain; version=0.0.4"));
        assert!(response.contains("lsbroker_frontend_queries_total"));
    }

    #[tokio::test]
    async fn test_unknown_path() {
        let response = scrape("GET /status HTTP/1.1\r\n\r\n").await;
        assert!(response.starts_with("HTTP/1.1 404"));
    }
}
