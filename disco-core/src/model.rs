//! Response and payload shapes of the disco API used by the CLI.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Label docker swarm puts on containers that belong to a service.
pub const SWARM_SERVICE_LABEL: &str = "com.docker.swarm.service.name";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvVariables {
    pub env_variables: Vec<EnvVariable>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVariable {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GithubApps {
    pub github_apps: Vec<GithubApp>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GithubApp {
    pub owner: GithubOwner,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GithubOwner {
    pub login: String,
    #[serde(rename = "type")]
    pub kind: String,
}

/// Payload of an `output` frame on the logs stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogItem {
    pub container: String,
    pub timestamp: String,
    pub message: String,
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

impl LogItem {
    /// Only containers managed by a swarm service are shown.
    pub fn is_service_output(&self) -> bool {
        self.labels.contains_key(SWARM_SERVICE_LABEL)
    }

    /// `<container> <timestamp> <message>`, with docker's leading `/` dropped
    /// from the container name.
    pub fn display_line(&self) -> String {
        let mut chars = self.container.chars();
        chars.next();
        format!("{} {} {}", chars.as_str(), self.timestamp, self.message)
    }
}
