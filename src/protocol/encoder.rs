//! 响应编码器
//!
//! @yutiansut @quantaxis
//!
//! 所有行先完整编码到内存，编码成功后才写 socket；
//! 任意一行无法编码时整个响应放弃发送，不会留下半截响应体。

use tokio::io::{AsyncWrite, AsyncWriteExt};

use super::framing::status_line;
use crate::observability::FRONTEND_BYTES_SEND;
use crate::query::{OutputFormat, Response, Row};
use crate::{BrokerError, Result};

/// 编码完成、待发送的响应
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedResponse {
    /// fixed16 状态行
    pub status_line: Option<String>,
    /// 响应体 (不含结尾换行)
    pub body: Vec<u8>,
}

impl EncodedResponse {
    /// 线路上的完整字节
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.body.len() + 17);
        if let Some(line) = &self.status_line {
            bytes.extend_from_slice(line.as_bytes());
        }
        bytes.extend_from_slice(&self.body);
        bytes.push(b'\n');
        bytes
    }
}

/// 编码响应 (必要时先插入列名行)
pub fn encode_response(response: &mut Response) -> Result<EncodedResponse> {
    let body = match &response.error {
        Some(error) => error.to_string().into_bytes(),
        None => {
            response.prepend_header();
            match response.output_format {
                OutputFormat::Json => encode_rows(&response.result)?,
                OutputFormat::WrappedJson => encode_wrapped(response)?,
            }
        }
    };

    let status_line = response
        .response_fixed16
        .then(|| status_line(response.code, body.len() + 1));

    Ok(EncodedResponse { status_line, body })
}

/// `[row,\nrow]`
fn encode_rows(rows: &[Row]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(rows.len() * 64 + 2);
    out.push(b'[');
    for (i, row) in rows.iter().enumerate() {
        if i > 0 {
            out.extend_from_slice(b",\n");
        }
        serde_json::to_writer(&mut out, row)
            .map_err(|e| BrokerError::Encoding(format!("row {}: {}", i, e)))?;
    }
    out.push(b']');
    Ok(out)
}

/// `{"data":[...]\n,"failed":{...}\n,"total":N}`
fn encode_wrapped(response: &Response) -> Result<Vec<u8>> {
    let mut out = b"{\"data\":".to_vec();
    out.extend(encode_rows(&response.result)?);
    out.extend_from_slice(b"\n,\"failed\":");
    serde_json::to_writer(&mut out, &response.failed)
        .map_err(|e| BrokerError::Encoding(e.to_string()))?;
    out.extend_from_slice(format!("\n,\"total\":{}}}", response.total()).as_bytes());
    Ok(out)
}

/// 编码并发送响应，返回响应体字节数
///
/// 编码失败时不写入任何字节。发送成功后按监听地址累加字节计数。
pub async fn send_response<W>(writer: &mut W, response: &mut Response, listen: &str) -> Result<usize>
where
    W: AsyncWrite + Unpin,
{
    let encoded = encode_response(response)?;

    writer.write_all(&encoded.to_bytes()).await?;
    writer.flush().await?;

    FRONTEND_BYTES_SEND
        .with_label_values(&[listen])
        .inc_by(encoded.body.len() as u64);

    log::trace!(
        "sent response: code {}, {} bytes, {} rows",
        response.code,
        encoded.body.len(),
        response.result.len()
    );
    Ok(encoded.body.len())
}
