//! kubeconfig loading.
//!
//! Resolves a context (the file's `current-context` unless one is named) to
//! the server URL and credentials the API client needs. Inline `*-data`
//! fields are base64-decoded; file references are read relative to the
//! kubeconfig's directory.

use std::path::{Path, PathBuf};

use base64::Engine;
use directories::BaseDirs;
use serde::Deserialize;
use thiserror::Error;

use crate::kube::ApiConfig;

/// Errors from loading or resolving a kubeconfig.
#[derive(Debug, Error)]
pub enum KubeconfigError {
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid kubeconfig: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("no context selected and current-context is not set")]
    NoCurrentContext,

    #[error("context {0:?} not found")]
    ContextNotFound(String),

    #[error("cluster {0:?} not found")]
    ClusterNotFound(String),

    #[error("user {0:?} not found")]
    UserNotFound(String),

    #[error("cluster {0:?} has no server")]
    MissingServer(String),

    #[error("invalid base64 in {field}: {source}")]
    InvalidData {
        field: &'static str,
        #[source]
        source: base64::DecodeError,
    },
}

/// `~/.kube/config`, if a home directory can be determined.
pub fn default_path() -> Option<PathBuf> {
    BaseDirs::new().map(|dirs| dirs.home_dir().join(".kube").join("config"))
}

/// A parsed kubeconfig file.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Kubeconfig {
    #[serde(default)]
    current_context: Option<String>,
    #[serde(default)]
    clusters: Vec<NamedCluster>,
    #[serde(default)]
    contexts: Vec<NamedContext>,
    #[serde(default)]
    users: Vec<NamedUser>,

    /// Directory relative file references are resolved against.
    #[serde(skip)]
    base_dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct NamedCluster {
    name: String,
    #[serde(default)]
    cluster: Cluster,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct Cluster {
    #[serde(default)]
    server: Option<String>,
    #[serde(default)]
    certificate_authority: Option<PathBuf>,
    #[serde(default)]
    certificate_authority_data: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NamedContext {
    name: String,
    context: Context,
}

#[derive(Debug, Deserialize)]
struct Context {
    cluster: String,
    #[serde(default)]
    user: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NamedUser {
    name: String,
    #[serde(default)]
    user: AuthInfo,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct AuthInfo {
    #[serde(default)]
    client_certificate: Option<PathBuf>,
    #[serde(default)]
    client_certificate_data: Option<String>,
    #[serde(default)]
    client_key: Option<PathBuf>,
    #[serde(default)]
    client_key_data: Option<String>,
    #[serde(default)]
    token: Option<String>,
    #[serde(default, rename = "tokenFile")]
    token_file: Option<PathBuf>,
}

impl Kubeconfig {
    /// Read and parse the kubeconfig at `path`.
    pub fn load(path: &Path) -> Result<Self, KubeconfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| KubeconfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_yaml(&raw)?;
        config.base_dir = path.parent().map(Path::to_path_buf);
        Ok(config)
    }

    pub fn from_yaml(raw: &str) -> Result<Self, KubeconfigError> {
        Ok(serde_yaml::from_str(raw)?)
    }

    /// Resolve `context`, or the current context, into API connection settings.
    pub fn resolve(&self, context: Option<&str>) -> Result<ApiConfig, KubeconfigError> {
        let name = context
            .or(self.current_context.as_deref())
            .filter(|name| !name.is_empty())
            .ok_or(KubeconfigError::NoCurrentContext)?;

        let context = self
            .contexts
            .iter()
            .find(|c| c.name == name)
            .map(|c| &c.context)
            .ok_or_else(|| KubeconfigError::ContextNotFound(name.to_string()))?;

        let cluster = self
            .clusters
            .iter()
            .find(|c| c.name == context.cluster)
            .map(|c| &c.cluster)
            .ok_or_else(|| KubeconfigError::ClusterNotFound(context.cluster.clone()))?;

        let server = cluster
            .server
            .as_deref()
            .filter(|server| !server.is_empty())
            .ok_or_else(|| KubeconfigError::MissingServer(context.cluster.clone()))?;

        let user = match context.user.as_deref() {
            Some(name) if !name.is_empty() => Some(
                self.users
                    .iter()
                    .find(|u| u.name == name)
                    .map(|u| &u.user)
                    .ok_or_else(|| KubeconfigError::UserNotFound(name.to_string()))?,
            ),
            _ => None,
        };

        let ca_cert_pem = self.material(
            "certificate-authority-data",
            cluster.certificate_authority_data.as_deref(),
            cluster.certificate_authority.as_deref(),
        )?;

        let (identity_pem, token) = match user {
            Some(user) => (self.identity(user)?, self.token(user)?),
            None => (None, None),
        };

        Ok(ApiConfig {
            server_url: server.trim_end_matches('/').to_string(),
            token,
            ca_cert_pem,
            identity_pem,
            ..ApiConfig::default()
        })
    }

    fn identity(&self, user: &AuthInfo) -> Result<Option<Vec<u8>>, KubeconfigError> {
        let cert = self.material(
            "client-certificate-data",
            user.client_certificate_data.as_deref(),
            user.client_certificate.as_deref(),
        )?;
        let key = self.material(
            "client-key-data",
            user.client_key_data.as_deref(),
            user.client_key.as_deref(),
        )?;

        Ok(match (cert, key) {
            (Some(mut pem), Some(key)) => {
                pem.push(b'\n');
                pem.extend(key);
                Some(pem)
            }
            _ => None,
        })
    }

    fn token(&self, user: &AuthInfo) -> Result<Option<String>, KubeconfigError> {
        if let Some(token) = user.token.as_deref().filter(|t| !t.is_empty()) {
            return Ok(Some(token.to_string()));
        }
        let Some(path) = user.token_file.as_deref() else {
            return Ok(None);
        };

        let path = self.relative(path);
        let raw = std::fs::read_to_string(&path)
            .map_err(|source| KubeconfigError::Read { path, source })?;
        let token = raw.trim();
        Ok((!token.is_empty()).then(|| token.to_string()))
    }

    /// Inline base64 data wins over a file reference.
    fn material(
        &self,
        field: &'static str,
        data: Option<&str>,
        file: Option<&Path>,
    ) -> Result<Option<Vec<u8>>, KubeconfigError> {
        if let Some(data) = data.filter(|d| !d.trim().is_empty()) {
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(data.trim())
                .map_err(|source| KubeconfigError::InvalidData { field, source })?;
            return Ok(Some(bytes));
        }

        match file {
            Some(path) => {
                let path = self.relative(path);
                std::fs::read(&path)
                    .map(Some)
                    .map_err(|source| KubeconfigError::Read { path, source })
            }
            None => Ok(None),
        }
    }

    fn relative(&self, path: &Path) -> PathBuf {
        match &self.base_dir {
            Some(dir) if path.is_relative() => dir.join(path),
            _ => path.to_path_buf(),
        }
    }
}

#[cfg(test)]
mod tests {
    use base64::engine::general_purpose::STANDARD;

    use super::*;

    fn sample() -> String {
        format!(
            r#"
apiVersion: v1
kind: Config
current-context: prod
clusters:
  - name: prod-cluster
    cluster:
      server: https://10.0.0.1:6443/
      certificate-authority-data: {ca}
  - name: staging-cluster
    cluster:
      server: https://10.0.0.2:6443
contexts:
  - name: prod
    context:
      cluster: prod-cluster
      user: admin
  - name: staging
    context:
      cluster: staging-cluster
      user: deployer
  - name: broken
    context:
      cluster: gone
users:
  - name: admin
    user:
      client-certificate-data: {cert}
      client-key-data: {key}
  - name: deployer
    user:
      token: staging-token
"#,
            ca = STANDARD.encode("CA PEM"),
            cert = STANDARD.encode("CERT PEM"),
            key = STANDARD.encode("KEY PEM"),
        )
    }

    #[test]
    fn test_resolves_current_context() {
        let config = Kubeconfig::from_yaml(&sample()).unwrap().resolve(None).unwrap();

        assert_eq!(config.server_url, "https://10.0.0.1:6443");
        assert_eq!(config.ca_cert_pem.as_deref(), Some(&b"CA PEM"[..]));
        assert_eq!(config.identity_pem.as_deref(), Some(&b"CERT PEM\nKEY PEM"[..]));
        assert_eq!(config.token, None);
    }

    #[test]
    fn test_named_context_overrides_current() {
        let config = Kubeconfig::from_yaml(&sample())
            .unwrap()
            .resolve(Some("staging"))
            .unwrap();

        assert_eq!(config.server_url, "https://10.0.0.2:6443");
        assert_eq!(config.token.as_deref(), Some("staging-token"));
        assert!(config.ca_cert_pem.is_none());
        assert!(config.identity_pem.is_none());
    }

    #[test]
    fn test_missing_context_is_an_error() {
        let kubeconfig = Kubeconfig::from_yaml(&sample()).unwrap();

        assert!(matches!(
            kubeconfig.resolve(Some("nope")),
            Err(KubeconfigError::ContextNotFound(name)) if name == "nope"
        ));
        assert!(matches!(
            kubeconfig.resolve(Some("broken")),
            Err(KubeconfigError::ClusterNotFound(name)) if name == "gone"
        ));
    }

    #[test]
    fn test_no_current_context_is_an_error() {
        let kubeconfig = Kubeconfig::from_yaml("apiVersion: v1\nkind: Config\n").unwrap();
        assert!(matches!(
            kubeconfig.resolve(None),
            Err(KubeconfigError::NoCurrentContext)
        ));
    }

    #[test]
    fn test_invalid_base64_is_reported() {
        let raw = r#"
current-context: c
clusters:
  - name: k
    cluster:
      server: https://k
      certificate-authority-data: "!!not base64!!"
contexts:
  - name: c
    context:
      cluster: k
"#;
        let err = Kubeconfig::from_yaml(raw).unwrap().resolve(None).unwrap_err();
        assert!(matches!(
            err,
            KubeconfigError::InvalidData { field: "certificate-authority-data", .. }
        ));
    }

    #[test]
    fn test_file_references_are_relative_to_kubeconfig() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("ca.crt"), "FILE CA").unwrap();
        std::fs::write(dir.path().join("token"), "file-token\n").unwrap();
        let path = dir.path().join("config");
        std::fs::write(
            &path,
            r#"
current-context: local
clusters:
  - name: local
    cluster:
      server: https://127.0.0.1:6443
      certificate-authority: ca.crt
contexts:
  - name: local
    context:
      cluster: local
      user: me
users:
  - name: me
    user:
      tokenFile: token
"#,
        )
        .unwrap();

        let config = Kubeconfig::load(&path).unwrap().resolve(None).unwrap();

        assert_eq!(config.ca_cert_pem.as_deref(), Some(&b"FILE CA"[..]));
        assert_eq!(config.token.as_deref(), Some("file-token"));
    }

    #[test]
    fn test_unreadable_file_names_the_path() {
        let err = Kubeconfig::load(Path::new("/nonexistent/tsched/kubeconfig")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/tsched/kubeconfig"));
    }
}
