use serde::{Deserialize, Serialize};

/// What this client can do, advertised on `createSession`/`joinSession`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    pub code_execution: bool,
    pub terminal_sharing: bool,
    pub server_sharing: bool,
    pub languages: Vec<String>,
    pub version: String,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            code_execution: true,
            terminal_sharing: true,
            server_sharing: true,
            languages: ["python", "javascript", "typescript", "rust", "go", "java", "c", "cpp"]
                .into_iter()
                .map(String::from)
                .collect(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}
