//! Deserializing a minimal TOML document must yield the documented
//! defaults for every omitted section.

use rf_domain::autonomy::AutonomyMode;
use rf_domain::config::{Config, MetricsProviderKind, PolicyMode};
use rf_domain::score::RiskLevel;

#[test]
fn empty_toml_yields_defaults() {
    let cfg: Config = toml::from_str("").unwrap();
    assert_eq!(cfg.server.port, 8420);
    assert_eq!(cfg.server.api_token_env, "RF_API_TOKEN");
    assert_eq!(cfg.llm.requests_per_minute, 60);
    assert_eq!(cfg.llm.cache_ttl_secs, 900);
    assert_eq!(cfg.workflow.workers, 4);
    assert_eq!(cfg.workflow.max_active_runs_per_org, 8);
    assert_eq!(cfg.canary.provider, MetricsProviderKind::Static);
    assert_eq!(cfg.policy.mode, PolicyMode::Embedded);
    assert_eq!(cfg.autonomy.mode, AutonomyMode::ApproveAll);
    assert_eq!(cfg.autonomy.max_auto_risk, RiskLevel::Low);
    assert_eq!(cfg.state_path, std::path::PathBuf::from("./data"));
}

#[test]
fn partial_sections_keep_other_defaults() {
    let cfg: Config = toml::from_str(
        r#"
        [server]
        port = 9000

        [autonomy]
        mode = "risk-based"
        max_auto_risk = "medium"

        [[llm.providers]]
        id = "primary"
        kind = "openai_compat"
        base_url = "https://llm.internal/v1"
        "#,
    )
    .unwrap();

    assert_eq!(cfg.server.port, 9000);
    assert_eq!(cfg.server.host, "127.0.0.1");
    assert_eq!(cfg.autonomy.mode, AutonomyMode::RiskBased);
    assert_eq!(cfg.autonomy.max_auto_risk, RiskLevel::Medium);
    assert!(cfg.autonomy.require_canary);
    assert_eq!(cfg.llm.providers.len(), 1);
    assert_eq!(cfg.llm.providers[0].api_key_env, "RF_LLM_API_KEY");
}

#[test]
fn quota_and_notify_sections_parse() {
    let cfg: Config = toml::from_str(
        r#"
        [quota]
        default_daily_tasks = 50
        default_daily_tokens = 500000

        [[notify.endpoints]]
        url = "https://hooks.example.com/rf"
        event_types = ["task.failed", "rollback.initiated"]
        "#,
    )
    .unwrap();
    assert_eq!(cfg.quota.default_daily_tasks, Some(50));
    assert_eq!(cfg.notify.endpoints.len(), 1);
    assert_eq!(cfg.notify.endpoints[0].secret_env, "RF_WEBHOOK_SECRET");
}
