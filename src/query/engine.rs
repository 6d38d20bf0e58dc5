// 查询引擎 - 解析 → 选择 → 收集 → 后处理

use std::sync::Arc;

use super::collector::{collect_cached, collect_passthrough};
use super::postprocess::post_process;
use super::resolver::resolve;
use super::response::Response;
use super::selector::select_backends;
use super::types::Request;
use crate::observability::{QueryTimer, FRONTEND_QUERIES};
use crate::peer::{LoggingWaker, PeerRegistry, PeerWaker};
use crate::schema::Catalog;
use crate::{BrokerError, Result};

/// 查询引擎
///
/// 功能:
/// - 列解析 (真实列 / 虚拟列)
/// - 后端选择与合并唤醒
/// - 缓存聚合或并发直通收集
/// - 排序、分页、统计归约
pub struct QueryEngine {
    catalog: Arc<Catalog>,
    registry: Arc<PeerRegistry>,
    waker: Arc<dyn PeerWaker>,
}

impl QueryEngine {
    /// 创建新的查询引擎 (默认唤醒器只记录日志)
    pub fn new(catalog: Arc<Catalog>, registry: Arc<PeerRegistry>) -> Self {
        Self {
            catalog,
            registry,
            waker: Arc::new(LoggingWaker),
        }
    }

    /// 设置唤醒器 (缓存刷新器)
    pub fn with_waker(mut self, waker: Arc<dyn PeerWaker>) -> Self {
        self.waker = waker;
        self
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn registry(&self) -> &PeerRegistry {
        &self.registry
    }

    /// 构建响应
    ///
    /// 请求错误写入 `Response.error` 并正常返回；
    /// 只有不变量被破坏时返回 `Err`，调用方必须停止服务。
    pub async fn build_response(&self, request: &Request) -> Result<Response> {
        log::trace!("[{}] build response for table {}", request.request_id, request.table);
        let timer = QueryTimer::start();
        let mut response = Response::new(request);

        let table = match self.catalog.get(&request.table) {
            Some(table) => table,
            None => {
                let error =
                    BrokerError::bad_request(format!("table {} does not exist", request.table));
                return reject(response, error);
            }
        };

        let plan = match resolve(request, &table) {
            Ok(plan) => plan,
            Err(e) => return reject(response, e),
        };
        response.columns = plan.column_names();
        response.send_columns_header = plan.send_columns_header;

        // 缓存表只能用已编译的谓词过滤，原始过滤行无法在本地求值
        if !table.passthrough_only {
            if let Some(line) = request.unparsed_filter_line() {
                log::warn!(
                    "[{}] uncompiled filter on cached table {}: {}",
                    request.request_id,
                    table.name,
                    line
                );
                let error = BrokerError::bad_request(format!(
                    "cannot evaluate '{}' on cached table {}",
                    line, table.name
                ));
                return reject(response, error);
            }
        }

        let selection = match select_backends(&self.registry, request, &table) {
            Ok(selection) => selection,
            Err(e) => return reject(response, e),
        };

        if !selection.spin_up.is_empty() {
            self.waker.wake_peers(&selection.spin_up).await;
        }

        let collected = if table.passthrough_only {
            collect_passthrough(&selection.peers, &table, &plan, request).await
        } else {
            collect_cached(&selection.peers, &table, &plan, request)
        };
        response.result = collected.rows;
        response.failed = collected.failed;

        post_process(&mut response, &plan, request, &collected.stats)?;

        FRONTEND_QUERIES.with_label_values(&[table.name.as_str()]).inc();
        let elapsed = timer.observe();
        log::debug!(
            "[{}] {} rows from {} peers ({} failed) in {:.3}ms",
            request.request_id,
            response.result.len(),
            selection.peers.len(),
            response.failed.len(),
            elapsed * 1000.0
        );

        Ok(response)
    }
}

/// 请求错误写入响应，致命错误向上传播
fn reject(mut response: Response, error: BrokerError) -> Result<Response> {
    if error.is_fatal() {
        return Err(error);
    }
    log::debug!("rejected query: {}", error);
    response.set_error(error);
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::spinup::tests::RecordingWaker;
    use crate::peer::tests::{peer, StaticConnection};
    use crate::peer::{Peer, PeerStatus};
    use crate::protocol::encode_response;
    use crate::query::types::{OutputFormat, SortDirection, StatSpec, StatsKind, Value};
    use crate::query::types::Filter;
    use crate::schema::default_catalog;

    fn host_row(name: &str, state: i64) -> Vec<Value> {
        let mut row = vec![
            Value::from(name),
            Value::from(format!("{} alias", name)),
            Value::from("10.0.0.1"),
            Value::Int(state),
            Value::Int(1),
            Value::Int(1700000000),
            Value::Int(1690000000),
            Value::Float(0.25),
            Value::from("PING OK"),
            Value::List(vec![Value::from("linux")]),
            Value::List(vec![Value::from("admin")]),
            Value::List(vec![]),
            Value::List(vec![]),
        ];
        row.extend(std::iter::repeat(Value::Null).take(4));
        row
    }

    fn engine(peers: Vec<Peer>) -> QueryEngine {
        let mut registry = PeerRegistry::new();
        for p in peers {
            registry.register(p).unwrap();
        }
        QueryEngine::new(Arc::new(default_catalog()), Arc::new(registry))
    }

    #[tokio::test]
    async fn test_sorted_limited_with_auto_header() {
        let a = peer("a", Ok(vec![]));
        a.update_cache("hosts", vec![host_row("alpha", 0), host_row("delta", 1), host_row("echo", 0)]);
        let b = peer("b", Ok(vec![]));
        b.update_cache("hosts", vec![host_row("bravo", 0), host_row("foxtrot", 2), host_row("charlie", 0)]);
        let engine = engine(vec![a, b]);

        let request = Request::new("hosts")
            .with_sort("name", SortDirection::Desc)
            .with_limit(2);
        let mut response = engine.build_response(&request).await.unwrap();

        assert!(response.error.is_none());
        assert_eq!(response.result_total, Some(6));
        assert_eq!(response.result.len(), 2);
        assert_eq!(response.result[0][0], Value::from("foxtrot"));
        assert_eq!(response.result[1][0], Value::from("echo"));

        let encoded = encode_response(&mut response).unwrap();
        let rows: Vec<Vec<serde_json::Value>> = serde_json::from_slice(&encoded.body).unwrap();
        assert_eq!(rows.len(), 3);
        let header: Vec<&str> = rows[0].iter().map(|v| v.as_str().unwrap()).collect();
        assert_eq!(header[0], "name");
        assert_eq!(*header.last().unwrap(), "last_state_change_order");
        assert!(!header.contains(&"services"));
        assert_eq!(rows[1][0], "foxtrot");
        assert_eq!(rows[1].len(), header.len());
    }

    #[tokio::test]
    async fn test_unknown_table() {
        let engine = engine(vec![peer("a", Ok(vec![]))]);
        let response = engine.build_response(&Request::new("nope")).await.unwrap();
        assert_eq!(response.code, 400);
        assert_eq!(
            response.error.unwrap().to_string(),
            "bad request: table nope does not exist"
        );
    }

    #[tokio::test]
    async fn test_bad_request_before_any_peer_contacted() {
        struct PanickingConnection;

        #[async_trait::async_trait]
        impl crate::peer::PeerConnection for PanickingConnection {
            async fn query(&self, _: &Request) -> std::result::Result<Vec<Vec<Value>>, crate::PeerError> {
                panic!("peer must not be contacted");
            }
        }

        let p = Peer::new("a", "a", "a:1", Arc::new(PanickingConnection)).with_status(PeerStatus::up());
        let engine = engine(vec![p]);

        let unknown_column = Request::new("log").with_columns(["time", "bogus"]);
        let response = engine.build_response(&unknown_column).await.unwrap();
        assert_eq!(
            response.error.unwrap().to_string(),
            "bad request: table log has no column bogus"
        );

        let unknown_backend = Request::new("log").with_columns(["time"]).with_backends(["zz"]);
        let response = engine.build_response(&unknown_backend).await.unwrap();
        assert_eq!(response.code, 400);
        assert_eq!(
            response.error.unwrap().to_string(),
            "bad request: backend zz does not exist"
        );
    }

    #[tokio::test]
    async fn test_uncompiled_filter_rejected_on_cached_table() {
        let a = peer("a", Ok(vec![]));
        a.update_cache("hosts", vec![host_row("up", 0), host_row("down", 1)]);
        let engine = engine(vec![a]);

        let request = crate::query::parse_request("GET hosts\nColumns: name state\nFilter: state = 1\n").unwrap();
        let response = engine.build_response(&request).await.unwrap();
        assert_eq!(response.code, 400);
        assert!(response.result.is_empty());
        assert_eq!(
            response.error.unwrap().to_string(),
            "bad request: cannot evaluate 'Filter: state = 1' on cached table hosts"
        );

        let counter = crate::query::parse_request("GET hosts\nStats: state = 1\n").unwrap();
        let response = engine.build_response(&counter).await.unwrap();
        assert_eq!(response.code, 400);

        // 编译好的谓词正常过滤
        let compiled = Filter {
            lines: vec!["Filter: state = 1".to_string()],
            predicate: None,
        }
        .with_predicate(|row: &crate::query::RowView<'_>| {
            row.get("state").map(Value::as_i64) == Some(1)
        });
        let request = Request::new("hosts").with_columns(["name", "state"]).with_filter(compiled);
        let response = engine.build_response(&request).await.unwrap();
        assert!(response.error.is_none());
        assert_eq!(response.result, vec![vec![Value::from("down"), Value::Int(1)]]);
    }

    #[tokio::test]
    async fn test_uncompiled_filter_forwarded_on_passthrough_table() {
        let a = peer("a", Ok(vec![vec![Value::Int(7)]]));
        let engine = engine(vec![a]);

        let request = crate::query::parse_request("GET log\nColumns: time\nFilter: class = 1\n").unwrap();
        let response = engine.build_response(&request).await.unwrap();
        assert!(response.error.is_none());
        assert_eq!(response.result, vec![vec![Value::Int(7)]]);
    }

    #[tokio::test]
    async fn test_passthrough_failures_do_not_set_error() {
        let a = peer("A", Ok(vec![vec![Value::Int(5), Value::from("hello")]]));
        let b = peer("B", Ok(vec![])).with_status(PeerStatus::down("connection refused"));
        let c = Peer::new(
            "C",
            "C site",
            "c:6557",
            Arc::new(StaticConnection {
                result: Err(crate::PeerError::Backend {
                    code: 500,
                    message: "boom".into(),
                }),
            }),
        )
        .with_status(PeerStatus::up());
        let engine = engine(vec![a, b, c]);

        let request = Request::new("log")
            .with_columns(["time", "message", "peer_key"])
            .with_output_format(OutputFormat::WrappedJson);
        let mut response = engine.build_response(&request).await.unwrap();

        assert!(response.error.is_none());
        assert_eq!(
            response.result,
            vec![vec![Value::Int(5), Value::from("hello"), Value::from("A")]]
        );
        assert_eq!(response.failed["B"], "connection refused");
        assert_eq!(response.failed["C"], "backend returned 500: boom");

        let body = String::from_utf8(encode_response(&mut response).unwrap().body).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(parsed["total"], 1);
        assert_eq!(parsed["failed"]["B"], "connection refused");
    }

    #[tokio::test]
    async fn test_spin_up_signalled_once() {
        let a = peer("a", Ok(vec![]));
        a.update_status(|s| s.idling = true);
        let b = peer("b", Ok(vec![]));
        let c = peer("c", Ok(vec![]));
        c.update_status(|s| s.idling = true);

        let waker = Arc::new(RecordingWaker::default());
        let engine = engine(vec![a, b, c]).with_waker(waker.clone());

        engine.build_response(&Request::new("hosts")).await.unwrap();
        assert_eq!(*waker.calls.lock(), vec![vec!["a".to_string(), "c".to_string()]]);

        // 直通表不唤醒
        engine.build_response(&Request::new("log")).await.unwrap();
        assert_eq!(waker.calls.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_stats_query() {
        let a = peer("a", Ok(vec![]));
        a.update_cache("hosts", vec![host_row("h1", 0), host_row("h2", 1)]);
        let b = peer("b", Ok(vec![]));
        b.update_cache("hosts", vec![host_row("h3", 1)]);
        let engine = engine(vec![a, b]);

        let request = Request::new("hosts")
            .with_stat(StatSpec::counter(Filter::default()))
            .with_stat(StatSpec::aggregate(StatsKind::Average, "latency"))
            .with_stat(StatSpec::aggregate(StatsKind::Max, "state"))
            .with_columns_header();
        let mut response = engine.build_response(&request).await.unwrap();

        assert_eq!(
            response.result,
            vec![vec![Value::Int(3), Value::Float(0.25), Value::Int(1)]]
        );
        let body = encode_response(&mut response).unwrap().body;
        assert_eq!(
            String::from_utf8(body).unwrap(),
            "[[\"stats_1\",\"stats_2\",\"stats_3\"],\n[3,0.25,1]]"
        );
    }

    #[tokio::test]
    async fn test_empty_registry() {
        let engine = engine(vec![]);
        let response = engine
            .build_response(&Request::new("columns").with_columns(["name"]))
            .await
            .unwrap();
        assert!(response.error.is_none());
        assert!(response.result.is_empty());
        assert_eq!(response.result_total, Some(0));
    }
}
