// SPDX-License-Identifier: MIT
//! Config loading against real files.

use claude_proxy::config::{Config, Role};
use tempfile::tempdir;

#[test]
fn missing_file_writes_default_and_errors() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("configs").join("config.yaml");

    let err = Config::load(&path).unwrap_err().to_string();
    assert!(err.contains("created default config file"), "{err}");
    assert!(path.exists(), "default config must be written");

    // The generated file is itself a loadable configuration.
    let config = Config::load(&path).unwrap();
    assert_eq!(config.proxy.port, 27015);
    assert_eq!(config.services.len(), 4);
    assert_eq!(
        config
            .services
            .iter()
            .filter(|s| s.role == Role::Evaluator)
            .count(),
        1
    );
    assert_eq!(config.difficulty_mapping["1"], "simple-service");
    assert_eq!(config.difficulty_mapping["5"], "complex-service");
    assert!(config.evaluator.prompt_template.contains("{{.CurrentTask}}"));
}

#[test]
fn invalid_yaml_is_a_parse_error() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.yaml");
    std::fs::write(&path, "services: [not: closed").unwrap();

    let err = Config::load(&path).unwrap_err().to_string();
    assert!(err.contains("parse"), "{err}");
}

#[test]
fn file_with_broken_mapping_fails_validation() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.yaml");
    std::fs::write(
        &path,
        r#"
services:
  - id: "eval"
    url: "http://127.0.0.1:1/v1/messages"
    api_key: "k"
    role: "evaluator"
  - id: "exec"
    url: "http://127.0.0.1:2/v1/messages"
    api_key: "k"
    role: "executor"
difficulty_mapping:
  "1": "missing-service"
"#,
    )
    .unwrap();

    let err = Config::load(&path).unwrap_err().to_string();
    assert!(err.contains("unknown service id"), "{err}");
}
