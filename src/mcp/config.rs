//! Server registry loading.
//!
//! The registry is a JSON or YAML file (chosen by extension) holding either
//! `{"servers": [...]}` or a bare list of [`McpServerConfig`] entries.

use std::collections::HashSet;
use std::path::Path;

use serde::Deserialize;

use super::error::McpError;
use super::types::McpServerConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryFormat {
    Json,
    Yaml,
}

impl RegistryFormat {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => RegistryFormat::Yaml,
            _ => RegistryFormat::Json,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RegistryFile {
    Wrapped { servers: Vec<McpServerConfig> },
    Bare(Vec<McpServerConfig>),
}

/// Parse registry contents. Server ids must be unique and non-empty.
pub fn parse_server_registry(
    content: &str,
    format: RegistryFormat,
) -> Result<Vec<McpServerConfig>, McpError> {
    let file: RegistryFile = match format {
        RegistryFormat::Json => {
            serde_json::from_str(content).map_err(|e| McpError::Config(e.to_string()))?
        }
        RegistryFormat::Yaml => {
            serde_yaml::from_str(content).map_err(|e| McpError::Config(e.to_string()))?
        }
    };

    let servers = match file {
        RegistryFile::Wrapped { servers } => servers,
        RegistryFile::Bare(servers) => servers,
    };

    let mut seen = HashSet::new();
    for server in &servers {
        if server.id.trim().is_empty() {
            return Err(McpError::Config("server id cannot be empty".to_string()));
        }
        if !seen.insert(server.id.as_str()) {
            return Err(McpError::Config(format!("duplicate server id '{}'", server.id)));
        }
    }

    Ok(servers)
}

/// Read and parse the registry file at `path`.
pub async fn load_server_registry(path: &Path) -> Result<Vec<McpServerConfig>, McpError> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| McpError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    parse_server_registry(&content, RegistryFormat::from_path(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::types::McpTransport;

    #[test]
    fn test_parse_wrapped_json() {
        let servers = parse_server_registry(
            r#"{"servers":[
                {"id":"web","transport":{"http":{"endpoint":"http://127.0.0.1:4011"}}},
                {"id":"fs","transport":{"stdio":{"command":"mcp-fs","args":["--root","."]}},"enabled":false}
            ]}"#,
            RegistryFormat::Json,
        )
        .unwrap();
        assert_eq!(servers.len(), 2);
        assert!(servers[0].enabled);
        assert!(!servers[1].enabled);
    }

    #[test]
    fn test_parse_bare_yaml() {
        let yaml = r#"
- id: git
  name: Git tools
  transport:
    stdio:
      command: mcp-git
      env:
        GIT_DIR: .git
"#;
        let servers = parse_server_registry(yaml, RegistryFormat::Yaml).unwrap();
        assert_eq!(servers[0].display_name(), "Git tools");
        match &servers[0].transport {
            McpTransport::Stdio { env, .. } => assert_eq!(env["GIT_DIR"], ".git"),
            other => panic!("unexpected transport {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let err = parse_server_registry(
            r#"[{"id":"a","transport":{"http":{"endpoint":"x"}}},
                {"id":"a","transport":{"http":{"endpoint":"y"}}}]"#,
            RegistryFormat::Json,
        )
        .unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[tokio::test]
    async fn test_load_picks_format_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("servers.yml");
        tokio::fs::write(&path, "servers:\n  - id: a\n    transport:\n      http:\n        endpoint: http://x\n")
            .await
            .unwrap();
        let servers = load_server_registry(&path).await.unwrap();
        assert_eq!(servers[0].id, "a");

        let missing = load_server_registry(&dir.path().join("nope.json")).await;
        assert!(matches!(missing, Err(McpError::Io { .. })));
    }
}
