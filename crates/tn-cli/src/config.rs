//! Command-line configuration for the client binary.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::command::{LoginCommand, SecretSource};
use crate::cookie::{CookieStore, DEFAULT_COOKIE_FILE};

pub const DEFAULT_HOST: &str = "localhost:6061";

#[derive(Parser, Debug, Clone)]
#[command(
    name = "tn-cli",
    version,
    about = "nanfengpo command line client"
)]
pub struct ClientArgs {
    /// Address of nanfengpo server
    #[arg(long, default_value = DEFAULT_HOST)]
    pub host: String,

    /// Login using basic authentication username:password
    #[arg(long)]
    pub login_basic: Option<String>,

    /// Login using token authentication
    #[arg(long)]
    pub login_token: Option<String>,

    /// Read token from cookie file and use it for authentication
    #[arg(long)]
    pub login_cookie: bool,

    /// Do not login even if cookie file is present
    #[arg(long)]
    pub no_login: bool,

    /// Where the session cookie is read from and saved to
    #[arg(long, default_value = DEFAULT_COOKIE_FILE)]
    pub cookie_file: PathBuf,

    /// Connection timeout in seconds
    #[arg(long, default_value_t = 10)]
    pub connect_timeout: u64,
}

impl ClientArgs {
    pub fn cookie_store(&self) -> CookieStore {
        CookieStore::new(self.cookie_file.clone())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout)
    }

    /// Pick the startup login: `--no-login` wins, then cookie, token, basic.
    ///
    /// A cookie that cannot be used is reported and the next source is tried.
    pub fn startup_login(&self, cookies: &CookieStore) -> Option<StartupLogin> {
        if self.no_login {
            return None;
        }
        if self.login_cookie {
            match cookies.load().and_then(|cookie| cookie.token_secret()) {
                Ok(secret) => return Some(StartupLogin::token(secret)),
                Err(e) => {
                    tracing::warn!(error = %e, "Ignoring session cookie");
                    println!(
                        "Missing or invalid cookie file '{}': {e}",
                        cookies.path().display()
                    );
                }
            }
        }
        if let Some(token) = &self.login_token {
            return Some(StartupLogin::token(token.clone().into_bytes()));
        }
        self.login_basic
            .as_ref()
            .map(|basic| StartupLogin::basic(basic.clone().into_bytes()))
    }
}

/// Credentials sent right after `{hi}`, before any prompt input.
#[derive(Debug, Clone, PartialEq)]
pub struct StartupLogin {
    pub scheme: String,
    pub secret: Vec<u8>,
}

impl StartupLogin {
    pub fn token(secret: Vec<u8>) -> Self {
        Self {
            scheme: "token".to_string(),
            secret,
        }
    }

    pub fn basic(secret: Vec<u8>) -> Self {
        Self {
            scheme: "basic".to_string(),
            secret,
        }
    }
}

impl From<StartupLogin> for LoginCommand {
    fn from(login: StartupLogin) -> Self {
        LoginCommand {
            scheme: login.scheme,
            secret: SecretSource {
                secret: Some(login.secret),
                ..Default::default()
            },
            cred: None,
        }
    }
}

/// gRPC endpoint URI for a `host:port` address.
pub fn endpoint_uri(host: &str) -> String {
    if host.contains("://") {
        host.to_string()
    } else {
        format!("http://{host}")
    }
}
