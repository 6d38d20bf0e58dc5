// livestatus 文本请求解析
//
// 请求格式: 首行 `GET <table>`，之后每行一个 `Header: value`，空行结束。
// 过滤表达式原样保留，由外部过滤解析器编译。

use super::types::{
    Filter, OutputFormat, Request, SortDirection, StatSpec, StatsKind, MATCH_ALL_COUNTER,
};
use crate::{BrokerError, Result};

/// 解析完整请求文本
pub fn parse_request(text: &str) -> Result<Request> {
    let mut lines = text.lines().map(str::trim_end).filter(|l| !l.is_empty());

    let first = lines
        .next()
        .ok_or_else(|| BrokerError::bad_request("empty request"))?;
    let table = first
        .strip_prefix("GET ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| BrokerError::bad_request(format!("invalid request line: {}", first)))?;

    let mut request = Request::new(table);

    for line in lines {
        let (header, value) = line
            .split_once(':')
            .ok_or_else(|| BrokerError::bad_request(format!("malformed header: {}", line)))?;
        let value = value.trim();

        match header {
            "Columns" => {
                request.columns = value.split_whitespace().map(str::to_string).collect();
            }
            "Filter" | "And" | "Or" | "Negate" => request.filter.lines.push(line.to_string()),
            "Stats" => request.stats.push(parse_stats(line, value)?),
            "StatsAnd" | "StatsOr" => {
                let n = parse_number(header, value)?;
                combine_stats(&mut request.stats, header, n, line)?;
            }
            "StatsNegate" => {
                let last = request
                    .stats
                    .last_mut()
                    .filter(|s| s.kind == StatsKind::Counter)
                    .ok_or_else(|| {
                        BrokerError::bad_request(format!("{} without counter stats", header))
                    })?;
                last.filter.lines.push(line.to_string());
            }
            "Sort" => {
                let mut parts = value.split_whitespace();
                let name = parts
                    .next()
                    .ok_or_else(|| BrokerError::bad_request("missing sort column"))?;
                let direction = match parts.next() {
                    Some(d) => d.parse::<SortDirection>()?,
                    None => SortDirection::Asc,
                };
                request = request.with_sort(name, direction);
            }
            "Limit" => request.limit = Some(parse_number(header, value)?),
            "Offset" => request.offset = parse_number(header, value)?,
            "Backends" => {
                request.backends = value.split_whitespace().map(str::to_string).collect();
            }
            "OutputFormat" => request.output_format = value.parse::<OutputFormat>()?,
            "ResponseHeader" => {
                request.response_fixed16 = match value {
                    "fixed16" => true,
                    "off" => false,
                    other => {
                        return Err(BrokerError::bad_request(format!(
                            "unrecognized response header {}",
                            other
                        )))
                    }
                }
            }
            "ColumnHeaders" => request.send_columns_header = parse_flag(header, value)?,
            "KeepAlive" => request.keep_alive = parse_flag(header, value)?,
            other => {
                return Err(BrokerError::bad_request(format!(
                    "unrecognized header {}",
                    other
                )))
            }
        }
    }

    Ok(request)
}

/// 不完整解析请求时判断是否需要 fixed16 帧头 (用于错误响应)
pub fn wants_fixed16(text: &str) -> bool {
    text.lines()
        .any(|l| l.trim_end() == "ResponseHeader: fixed16")
}

/// `StatsAnd: N` / `StatsOr: N`: 把最后 N 个计数统计合并成一个
fn combine_stats(stats: &mut Vec<StatSpec>, header: &str, n: usize, line: &str) -> Result<()> {
    if n == 0 || n > stats.len() {
        return Err(BrokerError::bad_request(format!(
            "{} needs {} stats, got {}",
            header,
            n,
            stats.len()
        )));
    }

    let combined = stats.split_off(stats.len() - n);
    if combined.iter().any(|s| s.kind != StatsKind::Counter) {
        return Err(BrokerError::bad_request(format!(
            "{} can only combine counter stats",
            header
        )));
    }

    let mut lines: Vec<String> = combined.iter().flat_map(StatSpec::header_lines).collect();
    lines.push(line.to_string());
    stats.push(StatSpec::counter(Filter {
        lines,
        predicate: None,
    }));
    Ok(())
}

/// `Stats: <func> <col>` 为聚合，其余视为计数过滤
fn parse_stats(line: &str, value: &str) -> Result<StatSpec> {
    if line == MATCH_ALL_COUNTER {
        return Ok(StatSpec::counter(Filter::default()));
    }

    let mut parts = value.split_whitespace();
    if let (Some(func), Some(column), None) = (parts.next(), parts.next(), parts.next()) {
        if let Ok(kind) = func.parse::<StatsKind>() {
            return Ok(StatSpec::aggregate(kind, column));
        }
    }
    if value.is_empty() {
        return Err(BrokerError::bad_request("empty stats header"));
    }
    Ok(StatSpec::counter(Filter {
        lines: vec![line.to_string()],
        predicate: None,
    }))
}

fn parse_number(header: &str, value: &str) -> Result<usize> {
    value
        .parse::<usize>()
        .map_err(|_| BrokerError::bad_request(format!("invalid {} value: {}", header, value)))
}

fn parse_flag(header: &str, value: &str) -> Result<bool> {
    match value {
        "on" => Ok(true),
        "off" => Ok(false),
        other => Err(BrokerError::bad_request(format!(
            "invalid {} value: {}",
            header, other
        ))),
    }
}
