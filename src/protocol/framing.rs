//! fixed16 定长帧
//!
//! 状态行格式: `<3 位状态码> <11 位右对齐长度>\n`，共 16 字节。
//! 长度 = 响应体字节数 + 结尾换行符。

use crate::{BrokerError, Result};

/// 状态行长度
pub const STATUS_LINE_LEN: usize = 16;

/// 生成状态行，`size` 已包含结尾换行
pub fn status_line(code: u16, size: usize) -> String {
    format!("{} {:>11}\n", code, size)
}

/// 解析状态行，返回 (状态码, 后续字节数)
pub fn parse_status_line(line: &[u8]) -> Result<(u16, usize)> {
    let text = std::str::from_utf8(line)
        .map_err(|e| BrokerError::Io(format!("invalid status line: {}", e)))?;

    // 只接受 ASCII，字段按字节位置切分
    if line.len() != STATUS_LINE_LEN || !line.is_ascii() || !text.ends_with('\n') {
        return Err(BrokerError::Io(format!("invalid status line: {:?}", text)));
    }

    let code = text[0..3]
        .parse::<u16>()
        .map_err(|_| BrokerError::Io(format!("invalid status code: {:?}", text)))?;
    let size = text[4..15]
        .trim()
        .parse::<usize>()
        .map_err(|_| BrokerError::Io(format!("invalid response size: {:?}", text)))?;

    Ok((code, size))
}
