use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::{
    auth::Credentials,
    error::{Error, Result},
};

pub const ENV_PROJECT_ID: &str = "QWEATHER_PROJECT_ID";
pub const ENV_KEY_ID: &str = "QWEATHER_KEY_ID";
pub const ENV_PRIVATE_KEY: &str = "QWEATHER_PRIVATE_KEY";
pub const ENV_PRIVATE_KEY_PATH: &str = "QWEATHER_PRIVATE_KEY_PATH";
pub const ENV_API_HOST: &str = "QWEATHER_API_HOST";

/// Command line options of the `qweather-mcp` binary.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "MCP server for the QWeather API", long_about = None)]
pub struct Cli {
    /// How MCP clients connect
    #[arg(long, value_enum, default_value_t = TransportMode::Stdio)]
    pub transport: TransportMode,

    /// Address to bind in http mode
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// Port to bind in http mode
    #[arg(short, long, default_value_t = 8000)]
    pub port: u16,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl Cli {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TransportMode {
    /// Newline-delimited JSON-RPC on stdin/stdout
    Stdio,
    /// Streamable HTTP on /mcp
    Http,
}

/// Process configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub credentials: Credentials,
    pub api_host: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build the config from an arbitrary variable source. Every missing
    /// variable is reported in a single error.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let project_id = get(ENV_PROJECT_ID);
        let key_id = get(ENV_KEY_ID);
        let inline_key = get(ENV_PRIVATE_KEY);
        let key_path = get(ENV_PRIVATE_KEY_PATH);
        let api_host = get(ENV_API_HOST);

        let mut missing = Vec::new();
        if project_id.is_none() {
            missing.push(ENV_PROJECT_ID.to_string());
        }
        if key_id.is_none() {
            missing.push(ENV_KEY_ID.to_string());
        }
        if inline_key.is_none() && key_path.is_none() {
            missing.push(format!("{ENV_PRIVATE_KEY} or {ENV_PRIVATE_KEY_PATH}"));
        }
        if api_host.is_none() {
            missing.push(ENV_API_HOST.to_string());
        }

        let (Some(project_id), Some(key_id), Some(api_host), true) =
            (project_id, key_id, api_host, missing.is_empty())
        else {
            return Err(Error::Config(format!(
                "missing environment variables: {}",
                missing.join(", ")
            )));
        };

        let private_key_pem = match (inline_key, key_path) {
            (Some(inline), _) => inline.replace("\\n", "\n"),
            (None, Some(path)) => read_key_file(PathBuf::from(path))?,
            (None, None) => {
                return Err(Error::Config(format!(
                    "missing environment variables: {ENV_PRIVATE_KEY} or {ENV_PRIVATE_KEY_PATH}"
                )));
            }
        };

        Ok(Self {
            credentials: Credentials::new(project_id.trim(), key_id.trim(), private_key_pem),
            api_host: normalize_host(&api_host),
        })
    }
}

fn read_key_file(path: PathBuf) -> Result<String> {
    std::fs::read_to_string(&path).map_err(|e| {
        Error::Config(format!(
            "cannot read private key file {}: {e}",
            path.display()
        ))
    })
}

/// Trim trailing slashes and default to https when no scheme is given, since
/// the console hands out bare host names.
fn normalize_host(host: &str) -> String {
    let host = host.trim().trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("https://{host}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutils::TEST_PRIVATE_KEY_PEM;
    use std::collections::HashMap;
    use std::io::Write;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_reports_every_missing_variable() {
        let err = Config::from_lookup(lookup(&[(ENV_KEY_ID, "k")])).unwrap_err();
        let Error::Config(msg) = err else {
            panic!("expected config error");
        };
        assert!(msg.contains(ENV_PROJECT_ID));
        assert!(msg.contains(ENV_PRIVATE_KEY_PATH));
        assert!(msg.contains(ENV_API_HOST));
        assert!(!msg.contains(&format!("{ENV_KEY_ID},")));
    }

    #[test]
    fn test_inline_key_is_unescaped() {
        let escaped = TEST_PRIVATE_KEY_PEM.trim_end().replace('\n', "\\n");
        let config = Config::from_lookup(lookup(&[
            (ENV_PROJECT_ID, "proj"),
            (ENV_KEY_ID, "kid"),
            (ENV_PRIVATE_KEY, &escaped),
            (ENV_API_HOST, "abc123.re.qweatherapi.com/"),
        ]))
        .unwrap();
        assert_eq!(config.credentials.private_key_pem, TEST_PRIVATE_KEY_PEM.trim_end());
        assert_eq!(config.api_host, "https://abc123.re.qweatherapi.com");
    }

    #[test]
    fn test_key_file_and_inline_precedence() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(TEST_PRIVATE_KEY_PEM.as_bytes()).unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let config = Config::from_lookup(lookup(&[
            (ENV_PROJECT_ID, "proj"),
            (ENV_KEY_ID, "kid"),
            (ENV_PRIVATE_KEY_PATH, &path),
            (ENV_API_HOST, "http://localhost:9000"),
        ]))
        .unwrap();
        assert_eq!(config.credentials.private_key_pem, TEST_PRIVATE_KEY_PEM);
        assert_eq!(config.api_host, "http://localhost:9000");

        let config = Config::from_lookup(lookup(&[
            (ENV_PROJECT_ID, "proj"),
            (ENV_KEY_ID, "kid"),
            (ENV_PRIVATE_KEY, "inline"),
            (ENV_PRIVATE_KEY_PATH, &path),
            (ENV_API_HOST, "http://localhost:9000"),
        ]))
        .unwrap();
        assert_eq!(config.credentials.private_key_pem, "inline");
    }

    #[test]
    fn test_unreadable_key_file() {
        let err = Config::from_lookup(lookup(&[
            (ENV_PROJECT_ID, "proj"),
            (ENV_KEY_ID, "kid"),
            (ENV_PRIVATE_KEY_PATH, "/nonexistent/key.pem"),
            (ENV_API_HOST, "https://api.qweather.com"),
        ]))
        .unwrap_err();
        assert!(matches!(err, Error::Config(msg) if msg.contains("/nonexistent/key.pem")));
    }

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["qweather-mcp"]);
        assert_eq!(cli.transport, TransportMode::Stdio);
        assert_eq!(cli.bind_addr(), "127.0.0.1:8000");

        let cli = Cli::parse_from(["qweather-mcp", "--transport", "http", "--port", "9100"]);
        assert_eq!(cli.transport, TransportMode::Http);
        assert_eq!(cli.port, 9100);
    }
}
