use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Where a universal provisioning job gets its workload from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum SourceType {
    DockerCompose,
    DockerImage,
    GithubRepo,
}

impl SourceType {
    pub const ALL: [SourceType; 3] = [
        SourceType::DockerCompose,
        SourceType::DockerImage,
        SourceType::GithubRepo,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            SourceType::DockerCompose => "docker-compose",
            SourceType::DockerImage => "docker-image",
            SourceType::GithubRepo => "github-repo",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("invalid source_type '{0}'. Must be one of: docker-compose, docker-image, github-repo")]
pub struct UnknownSourceType(pub String);

impl FromStr for SourceType {
    type Err = UnknownSourceType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SourceType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| UnknownSourceType(s.to_string()))
    }
}

/// Pre-packaged applications installed by an opaque remote script.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum NamedApp {
    #[serde(rename = "n8n")]
    N8n,
    #[serde(rename = "wireguard")]
    Wireguard,
    #[serde(rename = "outline")]
    Outline,
    #[serde(rename = "vaultwarden")]
    Vaultwarden,
    #[serde(rename = "3x-ui")]
    ThreeXUi,
    #[serde(rename = "seafile")]
    Seafile,
    #[serde(rename = "filebrowser")]
    Filebrowser,
}

impl NamedApp {
    pub const ALL: [NamedApp; 7] = [
        NamedApp::N8n,
        NamedApp::Wireguard,
        NamedApp::Outline,
        NamedApp::Vaultwarden,
        NamedApp::ThreeXUi,
        NamedApp::Seafile,
        NamedApp::Filebrowser,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            NamedApp::N8n => "n8n",
            NamedApp::Wireguard => "wireguard",
            NamedApp::Outline => "outline",
            NamedApp::Vaultwarden => "vaultwarden",
            NamedApp::ThreeXUi => "3x-ui",
            NamedApp::Seafile => "seafile",
            NamedApp::Filebrowser => "filebrowser",
        }
    }

    /// Name of the container the install script leaves running.
    #[must_use]
    pub fn container_name(self) -> &'static str {
        match self {
            NamedApp::Wireguard => "wireguard-ui",
            other => other.as_str(),
        }
    }

    /// Port the app's web UI listens on when no custom domain is set.
    #[must_use]
    pub fn ui_port(self) -> u16 {
        match self {
            NamedApp::N8n => 5678,
            NamedApp::Wireguard => 5000,
            NamedApp::Outline => 3000,
            NamedApp::Vaultwarden => 8080,
            NamedApp::ThreeXUi => 54321,
            NamedApp::Seafile => 8000,
            NamedApp::Filebrowser => 8081,
        }
    }

    /// File name of the install script in the script library.
    #[must_use]
    pub fn script_name(self) -> String {
        format!("{}_install.sh", self.as_str())
    }

    #[must_use]
    pub fn supported() -> Vec<&'static str> {
        NamedApp::ALL.iter().map(|app| app.as_str()).collect()
    }
}

impl fmt::Display for NamedApp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unsupported app '{0}'")]
pub struct UnknownApp(pub String);

impl FromStr for NamedApp {
    type Err = UnknownApp;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NamedApp::ALL
            .into_iter()
            .find(|app| app.as_str() == s)
            .ok_or_else(|| UnknownApp(s.to_string()))
    }
}

/// Body of `POST /provision`.
///
/// Every field is optional at the wire level so that validation can report
/// all missing fields at once. Legacy field names are accepted as aliases.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppProvisionRequest {
    #[serde(default, alias = "ip_address")]
    pub target_host: Option<String>,
    #[serde(default, alias = "username")]
    pub ssh_username: Option<String>,
    #[serde(default, alias = "password")]
    pub ssh_password: Option<String>,
    #[serde(default, alias = "app")]
    pub app_name: Option<String>,
    #[serde(default)]
    pub custom_domain: Option<String>,
}

/// Body of `POST /provision/universal`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UniversalProvisionRequest {
    #[serde(default, alias = "ip_address")]
    pub target_host: Option<String>,
    #[serde(default, alias = "username")]
    pub ssh_username: Option<String>,
    #[serde(default, alias = "password")]
    pub ssh_password: Option<String>,
    #[serde(default)]
    pub source_type: Option<String>,
    #[serde(default)]
    pub source_url: Option<String>,
    #[serde(default)]
    pub app_name: Option<String>,
    #[serde(default)]
    pub custom_domain: Option<String>,
    #[serde(default)]
    pub max_memory_mb: Option<i64>,
    #[serde(default)]
    pub max_cpu: Option<f64>,
    /// Host port → container port.
    #[serde(default)]
    pub ports: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub env_vars: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub dockerfile_path: Option<String>,
}
