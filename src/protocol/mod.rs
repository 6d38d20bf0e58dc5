//! 协议层 - livestatus 响应编码 + fixed16 定长帧

/// 16 字节状态行
pub mod framing;

/// 响应体编码与发送
pub mod encoder;

pub use encoder::{encode_response, send_response, EncodedResponse};
pub use framing::{parse_status_line, status_line, STATUS_LINE_LEN};
