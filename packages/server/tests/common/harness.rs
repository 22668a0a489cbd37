//! Test harness wiring the in-memory doubles into a real dispatcher.
//!
//! Every test gets fresh doubles. The HTTP surface is served on an
//! ephemeral port so API tests exercise the same router as production.

use anyhow::{Context, Result};
use dm_core::domains::devices::DeviceConfigurator;
use dm_core::domains::executions::{
    BatchDispatcher, ExecutionState, ExecutionStatus, StartedExecution,
};
use dm_core::domains::sites::SiteProvisioner;
use dm_core::kernel::{ServerDeps, TestDependencies};
use dm_core::server::build_app;
use std::sync::Arc;
use std::time::Duration;

/// Longest any test waits for a background execution
const COMPLETION_TIMEOUT: Duration = Duration::from_secs(10);

fn init_tracing() {
    // Run tests with: RUST_LOG=debug cargo test -- --nocapture
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Test harness holding the doubles and the dispatcher built on them.
///
/// ```ignore
/// let ctx = TestHarness::new();
/// ctx.deps.connections.fail_always(RemoteError::Unavailable("down".into()));
/// let started = ctx.dispatcher.start_site_batch(vec![site("site1")])?;
/// let status = ctx.wait(started).await;
/// ```
pub struct TestHarness {
    /// Doubles; script failures and inspect calls through these
    pub deps: TestDependencies,
    pub server_deps: Arc<ServerDeps>,
    pub dispatcher: BatchDispatcher,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_deps(TestDependencies::new())
    }

    pub fn with_deps(deps: TestDependencies) -> Self {
        init_tracing();
        let server_deps = deps.into_server_deps();
        let dispatcher =
            BatchDispatcher::new(server_deps.clone()).expect("site saga definition is valid");
        Self {
            deps,
            server_deps,
            dispatcher,
        }
    }

    pub fn provisioner(&self) -> SiteProvisioner {
        SiteProvisioner::new(self.server_deps.clone()).expect("site saga definition is valid")
    }

    pub fn configurator(&self) -> DeviceConfigurator {
        DeviceConfigurator::new(self.server_deps.clone())
    }

    /// Wait until `started` reaches a terminal state
    pub async fn wait(&self, started: StartedExecution) -> ExecutionStatus {
        let status = tokio::time::timeout(
            COMPLETION_TIMEOUT,
            self.dispatcher.wait_for_completion(started.execution_id),
        )
        .await
        .expect("execution did not finish in time")
        .expect("execution is registered");
        assert_ne!(status.state, ExecutionState::Running);
        status
    }

    /// Serve the router on an ephemeral port
    pub async fn api(&self) -> Result<TestApi> {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .context("Failed to bind test listener")?;
        let addr = listener.local_addr()?;
        let app = build_app(self.dispatcher.clone());
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Ok(TestApi {
            base_url: format!("http://{}", addr),
            client: reqwest::Client::new(),
        })
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// HTTP client bound to a served test router
pub struct TestApi {
    pub base_url: String,
    pub client: reqwest::Client,
}

impl TestApi {
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Poll the status route until the execution leaves `running`
    pub async fn poll_status(&self, started: &serde_json::Value) -> serde_json::Value {
        let execution_id = started["executionID"].as_str().expect("executionID");
        let run_id = started["runID"].as_str().expect("runID");

        tokio::time::timeout(COMPLETION_TIMEOUT, async {
            loop {
                let status: serde_json::Value = self
                    .client
                    .get(self.url("/api/executions/status"))
                    .query(&[("executionID", execution_id), ("runID", run_id)])
                    .send()
                    .await
                    .expect("status request")
                    .json()
                    .await
                    .expect("status body");
                if status["state"] != "running" {
                    return status;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("execution did not finish in time")
    }
}
