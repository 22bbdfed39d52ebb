use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use clap::{Parser, Subcommand};
use sha2::{Digest, Sha256};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing_subscriber::EnvFilter;

use rf_agents::{AgentPlanner, AgentRegistry, IntentRouter};
use rf_breaker::{BreakerConfig, BreakerRegistry};
use rf_canary::{CanaryAnalyzer, MetricsProvider, PrometheusProvider, StaticProvider};
use rf_domain::config::{Config, ConfigSeverity, MetricsProviderKind, PolicyMode};
use rf_gateway::api;
use rf_gateway::pipeline::{ApprovalLedger, HistoryStore, PlanCache};
use rf_gateway::state::AppState;
use rf_gateway::store::TaskStore;
use rf_gateway::tenant::TenantGuard;
use rf_llm::cache::InMemoryCache;
use rf_llm::registry::ProviderRegistry;
use rf_llm::LlmClient;
use rf_notify::Notifier;
use rf_tools::{GatePolicy, InvocationGate, InvocationLog, ToolRegistry};
use rf_validation::{EmbeddedPolicyEngine, PolicyEngine, RemotePolicyEngine, ValidationPipeline};
use rf_workflow::{SystemClock, WorkflowEngine};

// Process exit codes for the CLI wrapper: 0 success, 2 invalid args or
// bad config, 6 server error. Per-request auth (3), quota (4), and
// policy (5) conditions surface over HTTP, not the process exit.
const EXIT_BAD_CONFIG: i32 = 2;
const EXIT_SERVER_ERROR: i32 = 6;

#[derive(Parser)]
#[command(name = "resilience-fabric", version, about = "AI orchestration engine for infrastructure resilience")]
struct Cli {
    /// Path to config.toml.
    #[arg(long, default_value = "config.toml")]
    config: std::path::PathBuf,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the gateway server (default).
    Serve,
    /// Configuration helpers.
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
    /// Print the version.
    Version,
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Validate the config file and exit non-zero on errors.
    Validate,
    /// Print the effective configuration as TOML.
    Show,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        None | Some(Command::Serve) => {
            init_tracing();
            let config = load_config(&cli.config);
            if let Err(e) = run_server(Arc::new(config)).await {
                tracing::error!(error = %e, "server error");
                std::process::exit(EXIT_SERVER_ERROR);
            }
            Ok(())
        }
        Some(Command::Config { command: ConfigCommand::Validate }) => {
            let config = load_config(&cli.config);
            let issues = config.validate();
            for issue in &issues {
                println!("{issue}");
            }
            if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
                std::process::exit(EXIT_BAD_CONFIG);
            }
            println!("config ok");
            Ok(())
        }
        Some(Command::Config { command: ConfigCommand::Show }) => {
            let config = load_config(&cli.config);
            match toml::to_string_pretty(&config) {
                Ok(rendered) => println!("{rendered}"),
                Err(e) => {
                    eprintln!("failed to render config: {e}");
                    std::process::exit(EXIT_SERVER_ERROR);
                }
            }
            Ok(())
        }
        Some(Command::Version) => {
            println!("resilience-fabric {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn load_config(path: &std::path::Path) -> Config {
    match Config::load(path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("config: {e}");
            std::process::exit(EXIT_BAD_CONFIG);
        }
    }
}

/// Initialize structured JSON tracing.
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,rf_gateway=debug")),
        )
        .json()
        .init();
}

/// Start the gateway with the given configuration.
async fn run_server(config: Arc<Config>) -> anyhow::Result<()> {
    tracing::info!("resilience-fabric starting");

    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count()
        );
    }

    // ── Breaker registry (shared by every external call) ────────────
    let breakers = Arc::new(BreakerRegistry::new(BreakerConfig::default()));
    tracing::info!("breaker registry ready");

    // ── LLM providers + client ──────────────────────────────────────
    let providers = Arc::new(
        ProviderRegistry::from_config(&config.llm).context("initializing LLM providers")?,
    );
    if providers.is_empty() {
        tracing::warn!("no LLM providers initialized — planning will fail until one is configured");
    } else {
        tracing::info!(providers = providers.len(), "LLM provider registry ready");
    }
    let cache = Arc::new(InMemoryCache::new(
        std::time::Duration::from_secs(config.llm.cache_ttl_secs),
        config.llm.cache_capacity,
    ));
    let llm = Arc::new(LlmClient::new(
        providers.clone(),
        cache,
        breakers.clone(),
        config.llm.requests_per_minute,
    ));
    tracing::info!(
        cache_ttl_secs = config.llm.cache_ttl_secs,
        rpm = config.llm.requests_per_minute,
        "LLM client ready"
    );

    // ── Agents + router + planner ───────────────────────────────────
    let agents = Arc::new(AgentRegistry::builtin());
    let router = Arc::new(IntentRouter::new(agents.clone(), llm.clone()));
    let planner = Arc::new(AgentPlanner::new(llm.clone()));
    tracing::info!(agents = agents.len(), "agent registry ready");

    // ── Policy engine ───────────────────────────────────────────────
    let embedded = Arc::new(EmbeddedPolicyEngine::new(&config.policy));
    let policy_engine: Arc<dyn PolicyEngine> = match config.policy.mode {
        PolicyMode::Embedded => embedded.clone(),
        PolicyMode::Remote => Arc::new(
            RemotePolicyEngine::new(&config.policy, breakers.clone())
                .context("initializing remote policy engine")?,
        ),
    };
    tracing::info!(mode = ?config.policy.mode, "policy engine ready");

    // ── Tool registry + gate ────────────────────────────────────────
    let tools = Arc::new(ToolRegistry::new());
    rf_gateway::connectors::register_capability_set(&tools, &config.connector)
        .context("registering tool capability set")?;
    tools.seal();
    let invocations = Arc::new(InvocationLog::new(&config.state_path));
    let gate_policy: Arc<dyn GatePolicy> = embedded;
    let gate = Arc::new(InvocationGate::new(
        tools.clone(),
        agents.clone(),
        gate_policy,
        breakers.clone(),
        invocations.clone(),
    ));
    tracing::info!(tools = tools.len(), "tool registry + invocation gate ready");

    // ── Validation pipeline ─────────────────────────────────────────
    let validation = Arc::new(ValidationPipeline::new(policy_engine));
    tracing::info!("validation pipeline ready");

    // ── Canary analyzer ─────────────────────────────────────────────
    let metrics: Arc<dyn MetricsProvider> = match config.canary.provider {
        MetricsProviderKind::Prometheus => {
            let url = config
                .canary
                .url
                .clone()
                .context("canary.provider = \"prometheus\" requires canary.url")?;
            let api_key = std::env::var(&config.canary.api_key_env).ok();
            Arc::new(PrometheusProvider::new(url, api_key)?)
        }
        MetricsProviderKind::Static => Arc::new(StaticProvider::new()),
    };
    let analyzer = Arc::new(CanaryAnalyzer::new(
        metrics,
        config.canary.coverage_threshold,
    ));
    tracing::info!(provider = ?config.canary.provider, "canary analyzer ready");

    // ── Workflow engine ─────────────────────────────────────────────
    let checkpoints = Arc::new(
        rf_workflow::CheckpointStore::new(&config.state_path)
            .context("initializing checkpoint store")?,
    );
    let engine = Arc::new(WorkflowEngine::new(
        gate.clone(),
        analyzer,
        checkpoints,
        Arc::new(SystemClock),
        config.workflow.clone(),
    ));
    tracing::info!(
        workers = config.workflow.workers,
        max_active_per_org = config.workflow.max_active_runs_per_org,
        "workflow engine ready"
    );

    // ── Notifier ────────────────────────────────────────────────────
    let notifier = Arc::new(
        Notifier::from_config(&config.notify, breakers.clone())
            .context("initializing notifier")?,
    );
    rf_notify::spawn_forwarder(notifier.clone(), engine.subscribe_events());
    tracing::info!(endpoints = config.notify.endpoints.len(), "notifier ready");

    // ── Stores + guards ─────────────────────────────────────────────
    let tasks = Arc::new(TaskStore::new(&config.state_path));
    let tenants = Arc::new(TenantGuard::new(config.quota.clone()));
    tracing::info!("task store + tenant guard ready");

    // ── API token (read once, hash for constant-time comparison) ────
    let api_token_hash = match std::env::var(&config.server.api_token_env) {
        Ok(token) if !token.is_empty() => {
            tracing::info!(env_var = %config.server.api_token_env, "API bearer-token auth enabled");
            Some(Sha256::digest(token.as_bytes()).to_vec())
        }
        _ => {
            tracing::warn!(
                env_var = %config.server.api_token_env,
                "API bearer-token auth DISABLED — set the env var to enable"
            );
            None
        }
    };

    let state = AppState {
        config: config.clone(),
        llm: llm.clone(),
        providers,
        agents,
        router,
        planner,
        tools,
        gate,
        validation,
        engine: engine.clone(),
        tasks: tasks.clone(),
        plans: Arc::new(parking_lot::RwLock::new(HashMap::new())),
        plan_cache: Arc::new(PlanCache::new(std::time::Duration::from_secs(
            config.llm.cache_ttl_secs,
        ))),
        invocations,
        history: Arc::new(HistoryStore::default()),
        approvals: Arc::new(ApprovalLedger::default()),
        tenants,
        breakers,
        events: engine.event_sender(),
        api_token_hash,
    };

    // ── Periodic store maintenance + heartbeat sweep ────────────────
    {
        let tasks = tasks.clone();
        let llm = llm.clone();
        let engine = engine.clone();
        let plan_cache = state.plan_cache.clone();
        let stale_after = std::time::Duration::from_secs(
            config.workflow.heartbeat_secs * u64::from(config.workflow.missed_heartbeats),
        );
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));
            loop {
                interval.tick().await;
                tasks.evict_terminal(chrono::Duration::hours(24));
                llm.prune_idle();
                plan_cache.prune();
                for run_id in engine.heartbeats().suspects(stale_after) {
                    tracing::warn!(%run_id, "run heartbeat is stale; flagging for replay");
                }
            }
        });
    }

    // ── CORS + concurrency + rate limits ────────────────────────────
    let cors_layer = build_cors_layer(&config.server.cors);
    let max_concurrent = config.server.max_concurrent_requests;
    tracing::info!(max_concurrent, "concurrency limit set");

    let governor_layer = config.server.rate_limit.as_ref().map(|rl| {
        use tower_governor::governor::GovernorConfigBuilder;
        use tower_governor::GovernorLayer;

        let gov_config = GovernorConfigBuilder::default()
            .per_second(rl.requests_per_second)
            .burst_size(rl.burst_size)
            .finish()
            .expect("rate_limit: requests_per_second and burst_size must be > 0");

        tracing::info!(
            requests_per_second = rl.requests_per_second,
            burst_size = rl.burst_size,
            "per-IP rate limiting enabled"
        );
        GovernorLayer {
            config: std::sync::Arc::new(gov_config),
        }
    });

    // ── Router ──────────────────────────────────────────────────────
    let app = api::router(state)
        .layer(cors_layer)
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_concurrent));
    let app = match governor_layer {
        Some(governor) => app.layer(governor),
        None => app,
    };

    // ── Bind ────────────────────────────────────────────────────────
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;
    tracing::info!(addr = %addr, "resilience-fabric listening");

    axum::serve(listener, app)
        .await
        .context("axum server error")?;

    Ok(())
}

/// Build a [`CorsLayer`] from the configured allowed origins. A literal
/// `"*"` allows everything; entries ending in `:*` match any port on
/// that host.
fn build_cors_layer(cors: &rf_domain::config::CorsConfig) -> CorsLayer {
    use axum::http::header;

    if cors.allowed_origins.len() == 1 && cors.allowed_origins[0] == "*" {
        tracing::warn!("CORS configured with wildcard \"*\" — all origins allowed");
        return CorsLayer::new()
            .allow_origin(tower_http::cors::Any)
            .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);
    }

    let mut exact: Vec<HeaderValue> = Vec::new();
    let mut wildcard_prefixes: Vec<String> = Vec::new();
    for origin in &cors.allowed_origins {
        if let Some(prefix) = origin.strip_suffix('*') {
            wildcard_prefixes.push(prefix.to_owned());
        } else if let Ok(value) = origin.parse::<HeaderValue>() {
            exact.push(value);
        } else {
            tracing::warn!(origin = %origin, "invalid CORS origin, skipping");
        }
    }

    let allow_origin = AllowOrigin::predicate(move |origin, _| {
        if exact.iter().any(|e| e.as_bytes() == origin.as_bytes()) {
            return true;
        }
        let origin_str = origin.to_str().unwrap_or("");
        // The port remainder must be digits only, so a prefix cannot be
        // extended into another host.
        wildcard_prefixes.iter().any(|prefix| {
            origin_str
                .strip_prefix(prefix.as_str())
                .map(|rest| !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit()))
                .unwrap_or(false)
        })
    });

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
}
