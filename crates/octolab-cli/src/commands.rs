use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use octolab_core::config::Config;
use octolab_core::lab::RuntimeKind;
use octolab_lab::{LabService, PgLabStore};
use octolab_runtime::Runtime;
use octolab_runtime::compose::ComposeRuntime;
use octolab_runtime::firecracker::{FirecrackerConfig, FirecrackerRuntime};
use octolab_runtime::runtime::RuntimeSelector;
use uuid::Uuid;

use crate::{Cli, Commands, LabCommands, RuntimeArg, ui};

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

fn pick_runtime(config: &Config, override_arg: Option<RuntimeArg>) -> (RuntimeKind, Arc<dyn Runtime>) {
    let kind = match override_arg {
        Some(RuntimeArg::Compose) => RuntimeKind::Compose,
        Some(RuntimeArg::Firecracker) => RuntimeKind::Firecracker,
        None => config.effective_runtime(),
    };
    let runtime: Arc<dyn Runtime> = match kind {
        RuntimeKind::Compose => Arc::new(ComposeRuntime::new()),
        RuntimeKind::Firecracker => Arc::new(FirecrackerRuntime::new(build_firecracker_config(config))),
    };
    (kind, runtime)
}

async fn cmd_doctor(runtime_arg: Option<RuntimeArg>, json: bool) -> Result<()> {
    let config = Config::from_env().context("failed to load configuration")?;
    let (kind, runtime) = pick_runtime(&config, runtime_arg);
    let report = runtime.doctor().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        ui::info(&format!("doctor report for runtime={kind}"));
        for check in &report.checks {
            ui::check_line(&check.name, check.ok, &format!("{:?}", check.severity), &check.details);
        }
    }

    if !report.ok() {
        anyhow::bail!("doctor report has fatal failures");
    }
    Ok(())
}

async fn cmd_smoke(runtime_arg: Option<RuntimeArg>, json: bool) -> Result<()> {
    let config = Config::from_env().context("failed to load configuration")?;
    let (kind, runtime) = pick_runtime(&config, runtime_arg);
    let report = runtime.smoke().await.context("smoke test failed to run")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        ui::info(&format!("smoke report for runtime={kind}"));
        for phase in &report.phases {
            ui::check_line(&phase.name, phase.ok, "phase", &format!("{}ms", phase.duration_ms));
        }
    }

    if !report.ok {
        anyhow::bail!("smoke test reported a failure");
    }
    Ok(())
}

async fn connect_store(config: &Config) -> Result<Arc<PgLabStore>> {
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await
        .context("failed to connect to database")?;
    Ok(Arc::new(PgLabStore::new(pool)))
}

fn build_service(config: &Config, store: Arc<PgLabStore>) -> LabService {
    let selector = Arc::new(RuntimeSelector::new(config.runtime_default, config.runtime_override));
    let compose: Arc<dyn Runtime> = Arc::new(ComposeRuntime::new());
    let firecracker: Arc<dyn Runtime> = Arc::new(FirecrackerRuntime::new(build_firecracker_config(config)));
    LabService::new(store, selector, compose, firecracker)
}

fn auth_context(owner: &str, admin: bool) -> Result<octolab_core::user::AuthContext> {
    let user_id = Uuid::parse_str(owner).context("--owner must be a UUID")?;
    Ok(octolab_core::user::AuthContext { user_id, is_admin: admin })
}

async fn cmd_lab_list(owner: String, admin: bool) -> Result<()> {
    let config = Config::from_env().context("failed to load configuration")?;
    let store = connect_store(&config).await?;
    let service = build_service(&config, store);
    let auth = auth_context(&owner, admin)?;

    let labs = service.list_labs(&auth).await?;
    if labs.is_empty() {
        ui::info("no labs found");
        return Ok(());
    }
    for lab in &labs {
        println!("{}  {:<10}  runtime={:<11}  owner={}", lab.id, lab.status, lab.runtime.map(|r| r.to_string()).unwrap_or_else(|| "-".into()), lab.owner_id);
    }
    Ok(())
}

async fn cmd_lab_inspect(lab_id: String, owner: String, admin: bool) -> Result<()> {
    let config = Config::from_env().context("failed to load configuration")?;
    let store = connect_store(&config).await?;
    let lab_id = Uuid::parse_str(&lab_id).context("lab_id must be a UUID")?;
    let auth = auth_context(&owner, admin)?;
    let compose: Arc<dyn Runtime> = Arc::new(ComposeRuntime::new());
    let firecracker: Arc<dyn Runtime> = Arc::new(FirecrackerRuntime::new(build_firecracker_config(&config)));
    let selector = Arc::new(RuntimeSelector::new(config.runtime_default, config.runtime_override));
    let service = LabService::new(store, selector, compose.clone(), firecracker.clone());

    let lab = service.get_lab(&auth, lab_id).await?;
    ui::info(&format!("lab {}", lab.id));
    println!("  status:     {}", lab.status);
    println!("  owner:      {}", lab.owner_id);
    println!("  runtime:    {}", lab.runtime.map(|r| r.to_string()).unwrap_or_else(|| "-".into()));
    println!("  connection: {}", lab.connection_url.as_deref().unwrap_or("-"));
    println!("  evidence:   {:?}", lab.evidence_state);

    if let Some(kind) = lab.runtime {
        let backend: &Arc<dyn Runtime> = match kind {
            RuntimeKind::Compose => &compose,
            RuntimeKind::Firecracker => &firecracker,
        };
        match backend.inspect_lab(&lab).await {
            Ok(status) => println!("  live:       healthy={} {}", status.healthy, status.detail),
            Err(e) => ui::warn(&format!("failed to inspect live runtime status: {e}")),
        }
    }
    Ok(())
}

async fn cmd_bootstrap() -> Result<()> {
    let config = Config::from_env().context("failed to load configuration")?;
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await
        .context("failed to connect to database")?;
    octolab_lab::store::ensure_schema(&pool).await?;
    ui::success("schema ensured");

    let store = Arc::new(PgLabStore::new(pool));
    let demoted = octolab_lab::reconcile::reconcile_on_startup(&store).await?;
    if demoted > 0 {
        ui::warn(&format!("reconciled {demoted} orphaned lab(s)"));
    } else {
        ui::success("no orphaned labs found");
    }
    Ok(())
}

pub async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Doctor { runtime, json } => cmd_doctor(runtime, json).await,
        Commands::Smoke { runtime, json } => cmd_smoke(runtime, json).await,
        Commands::Lab { command } => match command {
            LabCommands::List { owner, admin } => cmd_lab_list(owner, admin).await,
            LabCommands::Inspect { lab_id, owner, admin } => cmd_lab_inspect(lab_id, owner, admin).await,
        },
        Commands::Bootstrap => cmd_bootstrap().await,
    }
}
