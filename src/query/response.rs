// 查询响应 (每个请求一个，可变累加器)

use std::collections::BTreeMap;

use super::types::{OutputFormat, Request, Row, Value};
use crate::BrokerError;

/// 查询响应
#[derive(Debug, Clone)]
pub struct Response {
    pub code: u16,
    pub result: Vec<Row>,
    /// 分页前的总行数
    pub result_total: Option<usize>,
    /// 输出列名 (含统计列标签)
    pub columns: Vec<String>,
    /// peer ID → 错误信息
    pub failed: BTreeMap<String, String>,
    pub error: Option<BrokerError>,
    pub output_format: OutputFormat,
    pub response_fixed16: bool,
    pub send_columns_header: bool,
    header_sent: bool,
}

impl Response {
    pub fn new(request: &Request) -> Self {
        Self {
            code: 200,
            result: Vec::new(),
            result_total: None,
            columns: Vec::new(),
            failed: BTreeMap::new(),
            error: None,
            output_format: request.output_format,
            response_fixed16: request.response_fixed16,
            send_columns_header: request.send_columns_header,
            header_sent: false,
        }
    }

    /// 请求无法解析时的错误响应
    pub fn from_error(error: BrokerError, response_fixed16: bool) -> Self {
        let mut response = Self {
            code: 200,
            result: Vec::new(),
            result_total: None,
            columns: Vec::new(),
            failed: BTreeMap::new(),
            error: None,
            output_format: OutputFormat::Json,
            response_fixed16,
            send_columns_header: false,
            header_sent: false,
        };
        response.set_error(error);
        response
    }

    pub fn set_error(&mut self, error: BrokerError) {
        self.code = match error {
            BrokerError::BadRequest(_) => 400,
            _ => 500,
        };
        self.error = Some(error);
    }

    pub fn total(&self) -> usize {
        self.result_total.unwrap_or(self.result.len())
    }

    /// 在结果前插入列名行，只执行一次
    pub fn prepend_header(&mut self) {
        if !self.send_columns_header || self.header_sent {
            return;
        }
        let header: Row = self.columns.iter().map(|c| Value::from(c.as_str())).collect();
        self.result.insert(0, header);
        self.header_sent = true;
    }
}
