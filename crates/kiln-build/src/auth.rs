//! レジストリ認証情報の解決
//!
//! build.yaml には環境変数の名前だけが書かれている。
//! 値の読み取りはプッシュ直前にここでだけ行う。

use crate::error::{BuildError, BuildResult};
use bollard::auth::DockerCredentials;
use kiln_core::Registry;
use std::fmt;
use std::sync::Arc;

/// 環境変数名から値を引く関数
pub type CredentialLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// プロセス環境変数を参照する CredentialLookup
pub fn env_lookup() -> CredentialLookup {
    Arc::new(|name: &str| std::env::var(name).ok())
}

/// 解決済みの認証情報
#[derive(Clone)]
pub struct Credentials {
    pub registry: String,
    pub username: String,
    password: String,
}

impl Credentials {
    pub fn new(
        registry: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            registry: registry.into(),
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    /// Bollard の DockerCredentials に変換
    pub fn to_docker_credentials(&self) -> DockerCredentials {
        DockerCredentials {
            username: Some(self.username.clone()),
            password: Some(self.password.clone()),
            serveraddress: Some(self.registry.clone()),
            ..Default::default()
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("registry", &self.registry)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// レジストリの認証情報を解決
///
/// ユーザー名・パスワードのどちらかが未設定または空なら
/// `BuildError::Credential` を返す。スキップはしない。
pub fn resolve_credentials(
    registry_name: &str,
    registry: &Registry,
    lookup: &(dyn Fn(&str) -> Option<String> + Send + Sync),
) -> BuildResult<Credentials> {
    let require = |variable: &str| {
        lookup(variable)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| BuildError::Credential {
                registry: registry_name.to_string(),
                variable: variable.to_string(),
            })
    };

    let username = require(&registry.user_variable)?;
    let password = require(&registry.password_variable)?;
    tracing::debug!("Resolved credentials for {}", registry_name);

    Ok(Credentials::new(registry_name, username, password))
}
