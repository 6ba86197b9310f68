//! Multi-node tests. Nodes run in-process and talk through a LocalTransport;
//! client requests go straight to each node's router.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::{Request, StatusCode};
use tempfile::TempDir;
use tower::ServiceExt;

use wolfsql::config::WolfSqlConfig;
use wolfsql::network::LocalTransport;
use wolfsql::node::Node;
use wolfsql::replication::{Consensus, NodeRole, WriteCommand};

/// Heartbeat and leader-silence threshold, in milliseconds
#[derive(Clone, Copy)]
struct Timing {
    heartbeat_ms: u64,
    election_ms: u64,
}

const FAST: Timing = Timing {
    heartbeat_ms: 10,
    election_ms: 300,
};

fn config(dir: &Path, index: usize, join: Option<String>) -> WolfSqlConfig {
    config_with(dir, index, join, FAST)
}

fn config_with(dir: &Path, index: usize, join: Option<String>, timing: Timing) -> WolfSqlConfig {
    let mut config = WolfSqlConfig::for_node(
        format!("node{}", index),
        format!("127.0.0.1:{}", 4000 + index),
        dir.join(format!("node{}", index)),
    );
    config.cluster.join = join;
    config.cluster.heartbeat_interval_ms = timing.heartbeat_ms;
    config.cluster.election_timeout_ms = timing.election_ms;
    config.recorder.forward_grace_ms = 200;
    config
}

async fn sql(node: &Node, query: &str) -> (StatusCode, String) {
    let request = Request::post("/sql")
        .body(Body::from(query.to_string()))
        .unwrap();
    let response = node.router().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, String::from_utf8(body.to_vec()).unwrap())
}

struct TestCluster {
    transport: Arc<LocalTransport>,
    nodes: Vec<Arc<Node>>,
    timing: Timing,
    dir: TempDir,
}

impl TestCluster {
    async fn start(size: usize) -> Self {
        Self::start_with(size, FAST).await
    }

    async fn start_with(size: usize, timing: Timing) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(LocalTransport::new());
        let mut cluster = Self {
            transport,
            nodes: Vec::new(),
            timing,
            dir,
        };
        for index in 0..size {
            cluster.add_node(index).await;
        }
        cluster
    }

    async fn add_node(&mut self, index: usize) {
        let join = self
            .nodes
            .first()
            .map(|leader| leader.connection_string().to_string());
        let node = Arc::new(
            Node::new(
                config_with(self.dir.path(), index, join, self.timing),
                self.transport.clone(),
            )
                .await
                .unwrap(),
        );
        self.transport
            .register(node.connection_string(), node.router())
            .await;
        node.start().await;
        node.init().await.unwrap();
        self.nodes.push(node);
        self.wait_converged().await;
    }

    async fn converged(&self) -> bool {
        let leader = self.nodes[0].consensus().status().await;
        for node in &self.nodes[1..] {
            let status = node.consensus().status().await;
            if status.role != NodeRole::Follower || status.last_applied != leader.commit_index {
                return false;
            }
        }
        true
    }

    async fn wait_converged(&self) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !self.converged().await {
            assert!(Instant::now() < deadline, "cluster did not converge");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    async fn shutdown(&self) {
        for node in &self.nodes {
            node.shutdown().await;
        }
    }
}

#[tokio::test]
async fn test_leader_write_returns_sequence_number() {
    let cluster = TestCluster::start(1).await;
    let leader = &cluster.nodes[0];
    assert_eq!(leader.consensus().role().await, NodeRole::Leader);

    let (status, body) = sql(leader, "CREATE TABLE t (x INT)").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "SequenceNumber: 1\n");

    let (status, body) = sql(leader, "INSERT INTO t VALUES (1)").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "SequenceNumber: 2\n");

    let (_, body) = sql(leader, "SELECT x FROM t").await;
    assert_eq!(body, "SequenceNumber: 3\n1\n");

    cluster.shutdown().await;
}

#[tokio::test]
async fn test_follower_forwards_to_leader() {
    let cluster = TestCluster::start(3).await;
    let leader = &cluster.nodes[0];
    let follower = &cluster.nodes[1];

    let (status, body) = sql(follower, "CREATE TABLE t (x INT)").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "SequenceNumber: 1\n");

    let (status, _) = sql(leader, "INSERT INTO t VALUES (7)").await;
    assert_eq!(status, StatusCode::OK);

    // Same answer a direct leader write would give
    let (status, body) = sql(&cluster.nodes[2], "SELECT x FROM t").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "SequenceNumber: 3\n7\n");

    cluster.wait_converged().await;
    cluster.shutdown().await;
}

#[tokio::test]
async fn test_unreachable_leader_is_upstream_unavailable() {
    let cluster = TestCluster::start(2).await;
    let leader = &cluster.nodes[0];
    let follower = &cluster.nodes[1];

    cluster.transport.disconnect(leader.connection_string()).await;

    let started = Instant::now();
    let (status, body) = sql(follower, "INSERT INTO t VALUES (1)").await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert!(body.contains("Upstream unavailable"), "body: {}", body);
    assert!(started.elapsed() < Duration::from_secs(2));

    cluster.shutdown().await;
}

#[tokio::test]
async fn test_malformed_sql_on_leader() {
    let cluster = TestCluster::start(1).await;

    let (status, body) = sql(&cluster.nodes[0], "SELEKT everything").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.starts_with("Error executing \"SELEKT everything\""), "body: {}", body);
    assert!(body.contains("SQLite error:"), "body: {}", body);

    // The failed write still consumed its position
    let (_, body) = sql(&cluster.nodes[0], "SELECT 1").await;
    assert_eq!(body, "SequenceNumber: 2\n1\n");

    cluster.shutdown().await;
}

#[tokio::test]
async fn test_candidate_rejects_writes() {
    let cluster = TestCluster::start(2).await;
    let follower = &cluster.nodes[1];

    // Leader can no longer reach the follower
    cluster.transport.disconnect(follower.connection_string()).await;

    let deadline = Instant::now() + Duration::from_secs(5);
    while follower.consensus().role().await != NodeRole::Candidate {
        assert!(Instant::now() < deadline, "follower never became candidate");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let (status, body) = sql(follower, "INSERT INTO t VALUES (1)").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.contains("Cannot accept requests in current state"), "body: {}", body);

    // Contact resumes, and so does service
    cluster.transport.reconnect(follower.connection_string()).await;
    cluster.wait_converged().await;
    let (status, _) = sql(follower, "SELECT 1").await;
    assert_eq!(status, StatusCode::OK);

    cluster.shutdown().await;
}

#[tokio::test]
async fn test_restart_recovers_from_log() {
    let dir = tempfile::tempdir().unwrap();
    {
        let node = Node::new(config(dir.path(), 0, None), Arc::new(LocalTransport::new()))
            .await
            .unwrap();
        node.start().await;
        node.init().await.unwrap();
        sql(&node, "CREATE TABLE t (x INT)").await;
        sql(&node, "INSERT INTO t VALUES (42)").await;
        node.shutdown().await;
    }

    let node = Node::new(config(dir.path(), 0, None), Arc::new(LocalTransport::new()))
        .await
        .unwrap();
    node.start().await;
    assert!(!node.consensus().is_log_empty().await);
    node.init().await.unwrap();
    assert_eq!(node.consensus().role().await, NodeRole::Leader);

    // State and sequence numbers were rebuilt from the log
    let (_, body) = sql(&node, "SELECT x FROM t").await;
    assert_eq!(body, "SequenceNumber: 3\n42\n");

    node.shutdown().await;
}

#[tokio::test]
async fn test_status_lists_members() {
    let cluster = TestCluster::start(2).await;

    let request = Request::get("/status").body(Body::empty()).unwrap();
    let response = cluster.nodes[1].router().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let status: serde_json::Value = serde_json::from_slice(&body).unwrap();

    assert_eq!(status["role"], "follower");
    assert_eq!(status["leader"], "node0");
    let members = status["members"].as_array().unwrap();
    assert_eq!(members.len(), 2);
    // Self, and the leader it hears from
    assert!(members.iter().all(|m| m["reachable"] == true), "{:?}", members);

    cluster.shutdown().await;
}

#[tokio::test]
async fn test_follower_reports_failed_sql() {
    let cluster = TestCluster::start(2).await;
    let follower = &cluster.nodes[1];

    let (status, body) = sql(follower, "SELEKT x").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.starts_with("Error executing \"SELEKT x\" ("), "body: {}", body);
    assert!(body.contains("\n\nSQLite error: "), "body: {}", body);

    // The failed write is ordered like any other
    let (_, body) = sql(follower, "SELECT 1").await;
    assert_eq!(body, "SequenceNumber: 2\n1\n");

    cluster.shutdown().await;
}

#[tokio::test]
async fn test_replicas_record_identical_results() {
    let cluster = TestCluster::start(3).await;
    let leader = &cluster.nodes[0];

    let writes = [
        ("w1", "CREATE TABLE t (x INT, y TEXT)"),
        ("w2", "INSERT INTO t VALUES (1, 'a'), (2, NULL); SELECT * FROM t"),
        ("w3", "SELEKT x"),
        ("w4", "UPDATE t SET y = 'b' WHERE x = 2; SELECT count(*), max(y) FROM t"),
    ];

    for (key, query) in writes {
        let waits: Vec<_> = cluster
            .nodes
            .iter()
            .map(|node| {
                let recorder = node.recorder();
                tokio::spawn(async move { recorder.listen(key, 16).await })
            })
            .collect();

        let body = serde_json::to_vec(&WriteCommand::new(key, query)).unwrap();
        let request = Request::post("/fwd").body(Body::from(body)).unwrap();
        let response = leader.router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let mut records = Vec::new();
        for wait in waits {
            records.push(wait.await.unwrap().unwrap());
        }
        for record in &records[1..] {
            assert_eq!(record, &records[0], "replicas disagree on {}", key);
        }
    }

    cluster.wait_converged().await;
    cluster.shutdown().await;
}

#[tokio::test]
async fn test_silent_peer_does_not_slow_writes() {
    // Appends to a silent peer time out after four heartbeats (400 ms)
    let timing = Timing {
        heartbeat_ms: 100,
        election_ms: 2000,
    };
    let cluster = TestCluster::start_with(3, timing).await;
    let leader = &cluster.nodes[0];
    let follower = &cluster.nodes[1];

    cluster
        .transport
        .stall(cluster.nodes[2].connection_string())
        .await;

    for i in 0..5 {
        let started = Instant::now();
        let (status, _) = sql(leader, "SELECT 1").await;
        assert_eq!(status, StatusCode::OK);
        assert!(
            started.elapsed() < Duration::from_millis(250),
            "write {} took {:?}",
            i,
            started.elapsed()
        );
    }

    // The healthy follower keeps hearing from the leader
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(follower.consensus().role().await, NodeRole::Follower);
    let (status, _) = sql(follower, "SELECT 1").await;
    assert_eq!(status, StatusCode::OK);

    cluster.shutdown().await;
}
