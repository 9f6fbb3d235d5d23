//! octolabd: the facade crate that wires the workspace's libraries into a
//! running process, following the init order config -> doctor -> runtime
//! selector -> teardown worker. Shutdown runs the reverse: the worker is
//! drained before the DB pool closes.

pub mod logging;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use octolab_core::config::Config;
use octolab_core::lab::RuntimeKind;
use octolab_lab::{PgLabStore, TeardownWorker, TeardownWorkerConfig};
use octolab_runtime::Runtime;
use octolab_runtime::compose::ComposeRuntime;
use octolab_runtime::firecracker::{FirecrackerConfig, FirecrackerRuntime};
use octolab_runtime::runtime::RuntimeSelector;
use tokio::sync::watch;
use tracing::{info, warn};

/// Everything the process needs to keep running: the lab service's
/// dependencies, plus the loaded config for anything that still needs it.
pub struct App {
    pub store: Arc<PgLabStore>,
    pub selector: Arc<RuntimeSelector>,
    pub compose: Arc<dyn Runtime>,
    pub firecracker: Arc<dyn Runtime>,
    pub config: Config,
}

fn build_firecracker_config(config: &Config) -> FirecrackerConfig {
    FirecrackerConfig {
        kernel_path: PathBuf::from(&config.microvm.kernel_path),
        rootfs_base_path: PathBuf::from(&config.microvm.rootfs_base_path),
        state_dir: PathBuf::from(&config.microvm.state_dir),
        vcpu_count: config.microvm.vcpu_count,
        mem_mib: config.microvm.mem_mib,
        boot_timeout_secs: config.microvm.boot_timeout_secs,
        vsock_port: config.microvm.vsock_port,
        netd_socket_path: config.netd_socket_path.clone(),
        unsafe_allow_no_jailer: config.dev_unsafe_allow_no_jailer,
    }
}

fn redact_url(url: &str) -> String {
    match url.find('@') {
        Some(at) => format!("***{}", &url[at..]),
        None => url.to_string(),
    }
}

/// Load config, run the effective runtime's doctor, connect the DB pool,
/// ensure the schema exists, and run startup reconciliation. Does not
/// start the teardown worker — call [`spawn_teardown_worker`] once this
/// returns.
pub async fn bootstrap() -> Result<App> {
    let config = Config::from_env().context("failed to load configuration")?;

    let compose: Arc<dyn Runtime> = Arc::new(ComposeRuntime::new());
    let firecracker: Arc<dyn Runtime> =
        Arc::new(FirecrackerRuntime::new(build_firecracker_config(&config)));

    let selector = Arc::new(RuntimeSelector::new(
        config.runtime_default,
        config.runtime_override,
    ));

    let effective = selector.effective();
    let runtime_for_doctor: &Arc<dyn Runtime> = match effective {
        RuntimeKind::Compose => &compose,
        RuntimeKind::Firecracker => &firecracker,
    };
    let report = runtime_for_doctor.doctor().await;
    if !report.ok() {
        warn!(?effective, "doctor reports fatal failures for the effective runtime");
    }
    selector.record_doctor(report);

    if effective == RuntimeKind::Firecracker && !selector.may_select_firecracker() {
        anyhow::bail!(
            "effective runtime is firecracker but the doctor is not ok; refusing to start \
             (no fallback to compose — fix the doctor report or override runtime.default)"
        );
    }

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .with_context(|| format!("failed to connect to database at {}", redact_url(&config.database_url)))?;

    octolab_lab::store::ensure_schema(&pool).await?;
    let store = Arc::new(PgLabStore::new(pool));

    let demoted = octolab_lab::reconcile::reconcile_on_startup(&store).await?;
    if demoted > 0 {
        warn!(demoted, "demoted orphaned labs found at startup");
    }

    Ok(App {
        store,
        selector,
        compose,
        firecracker,
        config,
    })
}

/// Spawn the teardown worker as a background task. Returns the task
/// handle and a shutdown sender; send `true` to begin a graceful drain.
pub fn spawn_teardown_worker(app: &App) -> (tokio::task::JoinHandle<()>, watch::Sender<bool>) {
    let worker_config = TeardownWorkerConfig {
        enabled: app.config.teardown_worker.enabled,
        interval: std::time::Duration::from_secs_f64(app.config.teardown_worker.interval_seconds),
        batch_size: app.config.teardown_worker.batch_size as i64,
        startup_tick: app.config.teardown_worker.startup_tick,
        ..TeardownWorkerConfig::default()
    };
    let worker = TeardownWorker::new(
        app.store.clone(),
        app.compose.clone(),
        app.firecracker.clone(),
        worker_config,
    );
    let (tx, rx) = watch::channel(false);
    let handle = tokio::spawn(async move {
        worker.run(rx).await;
    });
    info!("teardown worker started");
    (handle, tx)
}
