use wf_domain::config::Config;

#[test]
fn default_ports_cover_3000_to_3005() {
    let config = Config::default();
    assert_eq!(config.dev_server.ports, vec![3000, 3001, 3002, 3003, 3004, 3005]);
}

#[test]
fn default_timeouts() {
    let config = Config::default();
    assert_eq!(config.exec.default_timeout_ms, 60_000);
    assert_eq!(config.exec.install_timeout_ms, 120_000);
    assert_eq!(config.dev_server.ready_timeout_ms, 15_000);
    assert_eq!(config.dev_server.status_cache_ttl_ms, 1_500);
    assert_eq!(config.sandbox.max_retries, 3);
}

#[test]
fn default_history_caps() {
    let config = Config::default();
    assert_eq!(config.context.max_tool_history, 50);
    assert_eq!(config.context.max_error_history, 20);
}

#[test]
fn default_step_cap_is_unbounded() {
    let config = Config::default();
    assert!(config.orchestrator.max_steps.is_none());
    assert_eq!(config.orchestrator.compress_messages_above, 30);
    assert_eq!(config.orchestrator.compress_keep_tail, 20);
}

#[test]
fn partial_toml_overrides_one_section() {
    let toml_str = r#"
[sandbox]
vm_template_id = "nextjs-base"
max_retries = 5

[orchestrator]
max_steps = 40
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    assert_eq!(config.sandbox.vm_template_id.as_deref(), Some("nextjs-base"));
    assert_eq!(config.sandbox.max_retries, 5);
    assert_eq!(config.orchestrator.max_steps, Some(40));
    // Untouched sections keep their defaults.
    assert_eq!(config.dev_server.ports.len(), 6);
    assert_eq!(config.project.project_dir, "/home/user/project");
}
