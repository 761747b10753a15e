use mcp_chat_gateway::config::AppConfig;
use mcp_chat_gateway::llm::{DEFAULT_BASE_URL, DEFAULT_MODEL};
use serial_test::serial;
use std::env;
use std::fs;

// Helper to clear environment variables that might interfere with tests
fn clear_env_vars() {
    // SAFETY: every test touching the environment runs under #[serial].
    unsafe {
        for name in [
            "CONFIG_FILE",
            "HOST",
            "PORT",
            "MCP_CONFIG",
            "LLM_BASE_URL",
            "LLM_MODEL",
            "LLM_API_KEY",
            "GEMINI_API_KEY",
            "GATEWAY_SERVER__PORT",
            "GATEWAY_SERVER__HOST",
            "GATEWAY_LLM__API_KEY",
            "GATEWAY_LLM__MODEL",
        ] {
            env::remove_var(name);
        }
    }
}

fn load(args: &[&str]) -> AppConfig {
    let argv = std::iter::once("mcp-chat-gateway").chain(args.iter().copied());
    AppConfig::load_from_args(argv).expect("Failed to load config")
}

#[test]
#[serial]
fn test_default_config() {
    clear_env_vars();

    let config = load(&[]);
    assert_eq!(config.server.port, 3000);
    assert_eq!(config.server.host, "127.0.0.1");
    assert_eq!(config.bind_address(), "127.0.0.1:3000");
    assert_eq!(config.llm.base_url, DEFAULT_BASE_URL);
    assert_eq!(config.llm.model, DEFAULT_MODEL);
    assert!(config.mcp.config_file.is_none());
    assert!(!config.llm_settings().has_credential());
}

#[test]
#[serial]
fn test_env_override() {
    clear_env_vars();
    unsafe {
        env::set_var("GATEWAY_SERVER__PORT", "9090");
        env::set_var("GATEWAY_LLM__MODEL", "gemini-2.5-pro");
    }

    let config = load(&[]);
    assert_eq!(config.server.port, 9090);
    assert_eq!(config.llm.model, "gemini-2.5-pro");

    clear_env_vars();
}

#[test]
#[serial]
fn test_file_load() {
    clear_env_vars();

    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let file_path = dir.path().join("gateway.yaml");
    fs::write(
        &file_path,
        r#"
server:
  port: 7070
llm:
  model: local-model
  base_url: http://localhost:11434/v1
mcp:
  config_file: servers.json
"#,
    )
    .expect("Failed to write temp config");

    let config = load(&["--config", file_path.to_str().unwrap()]);
    assert_eq!(config.server.port, 7070);
    assert_eq!(config.server.host, "127.0.0.1");
    assert_eq!(config.llm.model, "local-model");
    assert_eq!(config.llm.base_url, "http://localhost:11434/v1");
    assert_eq!(config.mcp.config_file.as_deref(), Some("servers.json"));
}

#[test]
#[serial]
fn test_missing_explicit_file_is_an_error() {
    clear_env_vars();

    let result =
        AppConfig::load_from_args(["mcp-chat-gateway", "--config", "/nonexistent/gateway.yaml"]);
    assert!(result.is_err());
}

#[test]
#[serial]
fn test_cli_overrides_env() {
    clear_env_vars();
    unsafe {
        env::set_var("GATEWAY_SERVER__PORT", "9090");
    }

    let config = load(&[
        "--port",
        "8181",
        "--host",
        "0.0.0.0",
        "--mcp-config",
        "mcp.json",
        "--llm-model",
        "cli-model",
    ]);
    assert_eq!(config.server.port, 8181);
    assert_eq!(config.server.host, "0.0.0.0");
    assert_eq!(config.mcp.config_file.as_deref(), Some("mcp.json"));
    assert_eq!(config.llm.model, "cli-model");

    clear_env_vars();
}

#[test]
#[serial]
fn test_api_key_fallbacks() {
    clear_env_vars();
    unsafe {
        env::set_var("GEMINI_API_KEY", "gemini-key");
    }
    let settings = load(&[]).llm_settings();
    assert_eq!(settings.api_key.as_deref(), Some("gemini-key"));

    unsafe {
        env::set_var("LLM_API_KEY", "generic-key");
    }
    assert_eq!(load(&[]).llm_settings().api_key.as_deref(), Some("generic-key"));

    unsafe {
        env::set_var("GATEWAY_LLM__API_KEY", "gateway-key");
    }
    assert_eq!(load(&[]).llm_settings().api_key.as_deref(), Some("gateway-key"));

    clear_env_vars();
}

#[test]
#[serial]
fn test_blank_key_is_no_credential() {
    clear_env_vars();
    unsafe {
        env::set_var("GEMINI_API_KEY", "   ");
    }

    let settings = load(&[]).llm_settings();
    assert!(settings.api_key.is_none());
    assert!(!settings.has_credential());

    clear_env_vars();
}

#[test]
#[serial]
fn test_debug_output_redacts_key() {
    clear_env_vars();
    unsafe {
        env::set_var("LLM_API_KEY", "sk-very-secret");
    }

    let config = load(&[]);
    let rendered = format!("{config:?}");
    assert!(!rendered.contains("sk-very-secret"));
    assert!(rendered.contains("<redacted>"));

    clear_env_vars();
}
