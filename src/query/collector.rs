// 数据收集
//
// 两种互斥模式，由表的直通标志决定:
// - 缓存聚合: 顺序读取每个 peer 的缓存行
// - 直通: 并发向每个 peer 发精简子请求，join 之后顺序合并

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use futures::future::join_all;

use super::postprocess::StatsAccumulator;
use super::resolver::{ColumnSource, QueryPlan, ResolvedStat};
use super::types::{Filter, Request, Row, RowView, StatSpec, StatsKind, Value};
use crate::observability::PEER_FAILURES;
use crate::peer::{Peer, PeerError};
use crate::schema::{virtual_columns, Table};

/// 收集结果
#[derive(Debug, Default)]
pub struct Collected {
    pub rows: Vec<Row>,
    /// peer ID → 错误信息
    pub failed: BTreeMap<String, String>,
    pub stats: Vec<StatsAccumulator>,
}

impl Collected {
    fn new(stats: &[ResolvedStat]) -> Self {
        Self {
            rows: Vec::new(),
            failed: BTreeMap::new(),
            stats: stats.iter().map(|s| StatsAccumulator::new(s.kind)).collect(),
        }
    }

    fn record_failure(&mut self, peer: &Peer, error: String) {
        PEER_FAILURES.with_label_values(&[peer.id.as_str()]).inc();
        self.failed.insert(peer.id.clone(), error);
    }
}

/// 单个 peer 的直通结果
#[derive(Debug)]
pub struct PeerOutcome {
    pub peer: Arc<Peer>,
    pub result: Result<Vec<Row>, PeerError>,
}

// ═══════════════════════════════════════════════════════════════════════════
// 缓存聚合模式
// ═══════════════════════════════════════════════════════════════════════════

/// 按列来源取一个单元格
fn cell(peer: &Peer, view: &RowView<'_>, source: ColumnSource) -> Value {
    match source {
        ColumnSource::Real { index } => view.row.get(index).cloned().unwrap_or(Value::Null),
        ColumnSource::Virtual(key) => {
            peer.row_value(key, view.table, &|name: &str| view.get(name).cloned())
        }
    }
}

/// 只含虚拟列的表: 每个 peer 生成一行
fn synthetic_row(peer: &Peer, table: &Table) -> Row {
    table
        .columns
        .iter()
        .map(|c| match virtual_columns::lookup(&c.name) {
            Some(entry) => peer.row_value(entry.key, table, &|_: &str| None),
            None => Value::Null,
        })
        .collect()
}

/// 从缓存收集 (调用前已完成唤醒)
pub fn collect_cached(
    peers: &[Arc<Peer>],
    table: &Table,
    plan: &QueryPlan,
    request: &Request,
) -> Collected {
    let mut collected = Collected::new(&plan.stats);

    for peer in peers {
        let rows = if table.is_virtual_only() {
            Arc::new(vec![synthetic_row(peer, table)])
        } else if peer.is_down() {
            let error = peer.last_error();
            collected.record_failure(peer, error);
            continue;
        } else {
            match peer.cached_rows(&table.name) {
                Some(rows) => rows,
                None => {
                    log::debug!("[{}] no cached rows for table {}", peer.name, table.name);
                    continue;
                }
            }
        };

        for row in rows.iter() {
            let view = RowView::new(table, row);
            if !request.filter.matches(&view) {
                continue;
            }

            if plan.stats.is_empty() {
                collected
                    .rows
                    .push(plan.columns.iter().map(|c| cell(peer, &view, c.source)).collect());
                continue;
            }

            for (acc, stat) in collected.stats.iter_mut().zip(&plan.stats) {
                let value = match (stat.kind, stat.source) {
                    (StatsKind::Counter, _) => {
                        if stat.filter.matches(&view) {
                            1.0
                        } else {
                            0.0
                        }
                    }
                    (_, Some(source)) => cell(peer, &view, source).as_f64(),
                    (_, None) => 0.0,
                };
                acc.add(value);
            }
        }
        log::trace!("[{}] cached rows merged", peer.name);

        if table.is_meta() {
            break;
        }
    }

    collected
}

// ═══════════════════════════════════════════════════════════════════════════
// 直通模式
// ═══════════════════════════════════════════════════════════════════════════

/// 并发查询所有非 Down 的 peer，等待全部完成后合并
pub async fn collect_passthrough(
    peers: &[Arc<Peer>],
    table: &Table,
    plan: &QueryPlan,
    request: &Request,
) -> Collected {
    let mut collected = Collected::new(&plan.stats);

    // 统计查询不带列，后端只返回一行统计值
    let backend_columns = if plan.stats.is_empty() {
        plan.backend_columns()
    } else {
        Vec::new()
    };
    let mut child = request.passthrough_child(backend_columns.clone());

    // 后端对空结果的 min/max/avg 返回 0，附带一个样本计数用于加权合并
    let sampled = plan
        .stats
        .iter()
        .any(|s| matches!(s.kind, StatsKind::Min | StatsKind::Max | StatsKind::Average));
    if sampled {
        child.stats.push(StatSpec::counter(Filter::default()));
    }

    let mut tasks = Vec::with_capacity(peers.len());
    for peer in peers {
        if peer.is_down() {
            let error = peer.last_error();
            collected.record_failure(peer, error);
            continue;
        }

        log::debug!("[{}] starting passthrough request", peer.name);
        let task_peer = Arc::clone(peer);
        let child = child.clone();
        let handle = tokio::spawn(async move {
            let result = task_peer.query(&child).await;
            log::trace!("[{}] passthrough request done", task_peer.name);
            PeerOutcome {
                peer: task_peer,
                result,
            }
        });
        tasks.push((Arc::clone(peer), handle));
    }

    // 所有任务都已启动，等待全部完成
    let (task_peers, handles): (Vec<_>, Vec<_>) = tasks.into_iter().unzip();
    let results = join_all(handles).await;
    log::debug!("waiting for passthrough requests done");

    for (peer, joined) in task_peers.iter().zip(results) {
        let outcome = match joined {
            Ok(outcome) => outcome,
            Err(e) => {
                collected.record_failure(peer, PeerError::Task(e.to_string()).to_string());
                continue;
            }
        };
        merge_outcome(&mut collected, outcome, table, plan, &backend_columns, sampled);
    }

    collected
}

/// 合并单个 peer 的结果
fn merge_outcome(
    collected: &mut Collected,
    outcome: PeerOutcome,
    table: &Table,
    plan: &QueryPlan,
    backend_columns: &[String],
    sampled: bool,
) {
    let PeerOutcome { peer, result } = outcome;
    let rows = match result {
        Ok(rows) => rows,
        Err(e) => {
            log::debug!("[{}] passthrough request failed: {}", peer.name, e);
            collected.record_failure(&peer, e.to_string());
            return;
        }
    };

    if !plan.stats.is_empty() {
        for row in &rows {
            let samples = if sampled {
                row.get(plan.stats.len()).map_or(0, Value::as_i64).max(0) as u64
            } else {
                1
            };
            if samples == 0 {
                log::trace!("[{}] no matching rows for stats", peer.name);
                continue;
            }
            for (j, acc) in collected.stats.iter_mut().enumerate() {
                acc.merge(row.get(j).map_or(0.0, Value::as_f64), samples);
            }
        }
        return;
    }

    if let Some(bad) = rows.iter().find(|r| r.len() != backend_columns.len()) {
        let error = PeerError::Protocol(format!(
            "expected {} columns, got {}",
            backend_columns.len(),
            bad.len()
        ));
        collected.record_failure(&peer, error.to_string());
        return;
    }

    let virtual_cols: Vec<_> = plan.virtual_columns().collect();
    if virtual_cols.is_empty() {
        collected.rows.extend(rows);
        return;
    }

    let index: HashMap<&str, usize> = backend_columns
        .iter()
        .enumerate()
        .map(|(i, name)| (name.as_str(), i))
        .collect();

    for mut row in rows {
        let values: Vec<Value> = {
            let field = |name: &str| index.get(name).and_then(|&i| row.get(i)).cloned();
            virtual_cols
                .iter()
                .map(|(_, key)| peer.row_value(*key, table, &field))
                .collect()
        };
        // 按输出位置递增插入，后面的单元格右移
        for ((position, _), value) in virtual_cols.iter().zip(values) {
            let at = (*position).min(row.len());
            row.insert(at, value);
        }
        collected.rows.push(row);
    }
    log::trace!("[{}] result ready", peer.name);
}
