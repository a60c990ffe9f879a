use std::{collections::BTreeMap, env, fs, net::SocketAddr, path::Path, time::Duration};

use serde::Deserialize;

use crate::{errors::ConfigError, models::BackendEndpoint, registry::BackendRegistry};

pub const DEFAULT_VERIFY_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_GENERATE_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_MOUNT_PREFIX: &str = "/models";
pub const DEFAULT_MAX_INFLIGHT: usize = 64;

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub registry: BackendRegistry,
    pub verify_timeout: Duration,
    pub generate_timeout: Duration,
    // Zero disables the verification cache.
    pub verify_cache_ttl: Duration,
    pub mount_prefix: String,
    pub max_inflight: usize,
    pub bind_addr: SocketAddr,
}

#[derive(Debug, Deserialize)]
struct BackendFile {
    backends: BTreeMap<String, String>,
}

impl RelayConfig {
    pub fn new(registry: BackendRegistry) -> Self {
        Self {
            registry,
            verify_timeout: DEFAULT_VERIFY_TIMEOUT,
            generate_timeout: DEFAULT_GENERATE_TIMEOUT,
            verify_cache_ttl: Duration::ZERO,
            mount_prefix: DEFAULT_MOUNT_PREFIX.to_owned(),
            max_inflight: DEFAULT_MAX_INFLIGHT,
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
        let registry = match non_empty("RELAY_BACKENDS") {
            Some(table) => parse_backend_table(&table)?,
            None => match non_empty("RELAY_BACKENDS_FILE") {
                Some(path) => load_backend_file(Path::new(&path))?,
                None => return Err(ConfigError::EmptyRegistry),
            },
        };

        let max_inflight = read_positive(
            &lookup,
            "RELAY_MAX_INFLIGHT",
            DEFAULT_MAX_INFLIGHT as u64,
        )?;
        let verify_timeout = read_positive(
            &lookup,
            "RELAY_VERIFY_TIMEOUT_SECS",
            DEFAULT_VERIFY_TIMEOUT.as_secs(),
        )?;
        let generate_timeout = read_positive(
            &lookup,
            "RELAY_GENERATE_TIMEOUT_SECS",
            DEFAULT_GENERATE_TIMEOUT.as_secs(),
        )?;

        let bind_addr = match lookup("RELAY_BIND_ADDR") {
            Some(value) => value
                .trim()
                .parse::<SocketAddr>()
                .map_err(|_| ConfigError::InvalidValue {
                    name: "RELAY_BIND_ADDR",
                    value,
                })?,
            None => SocketAddr::from(([0, 0, 0, 0], 8080)),
        };

        Ok(Self {
            registry,
            verify_timeout: Duration::from_secs(verify_timeout),
            generate_timeout: Duration::from_secs(generate_timeout),
            verify_cache_ttl: Duration::from_millis(read_u64(
                &lookup,
                "RELAY_VERIFY_CACHE_TTL_MS",
                0,
            )?),
            mount_prefix: non_empty("RELAY_MOUNT_PREFIX")
                .unwrap_or_else(|| DEFAULT_MOUNT_PREFIX.to_owned()),
            max_inflight: max_inflight as usize,
            bind_addr,
        })
    }
}

pub fn parse_backend_table(table: &str) -> Result<BackendRegistry, ConfigError> {
    let mut entries = Vec::new();
    for entry in table.split(',').map(str::trim).filter(|entry| !entry.is_empty()) {
        let (model, endpoint) = entry
            .split_once('=')
            .ok_or_else(|| ConfigError::InvalidEntry {
                entry: entry.to_owned(),
                reason: "expected model=host:port".to_owned(),
            })?;
        let endpoint =
            BackendEndpoint::parse(endpoint).map_err(|reason| ConfigError::InvalidEntry {
                entry: entry.to_owned(),
                reason,
            })?;
        entries.push((model.trim().to_owned(), endpoint));
    }
    BackendRegistry::new(entries)
}

pub fn load_backend_file(path: &Path) -> Result<BackendRegistry, ConfigError> {
    let display = path.display().to_string();
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
        path: display.clone(),
        source,
    })?;
    let file: BackendFile = toml::from_str(&raw).map_err(|source| ConfigError::ParseFile {
        path: display,
        source,
    })?;

    let mut entries = Vec::with_capacity(file.backends.len());
    for (model, endpoint) in file.backends {
        let endpoint =
            BackendEndpoint::parse(&endpoint).map_err(|reason| ConfigError::InvalidEntry {
                entry: format!("{model}={endpoint}"),
                reason,
            })?;
        entries.push((model, endpoint));
    }
    BackendRegistry::new(entries)
}

fn read_u64<F>(lookup: &F, name: &'static str, default: u64) -> Result<u64, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        Some(value) => value
            .trim()
            .parse::<u64>()
            .map_err(|_| ConfigError::InvalidValue { name, value }),
        None => Ok(default),
    }
}

fn read_positive<F>(lookup: &F, name: &'static str, default: u64) -> Result<u64, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match read_u64(lookup, name, default)? {
        0 => Err(ConfigError::InvalidValue {
            name,
            value: "0".to_owned(),
        }),
        value => Ok(value),
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, io::Write};

    use super::*;

    fn from_vars(vars: &[(&str, &str)]) -> Result<RelayConfig, ConfigError> {
        let vars = vars
            .iter()
            .map(|(name, value)| ((*name).to_owned(), (*value).to_owned()))
            .collect::<HashMap<_, _>>();
        RelayConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn backend_table_parses_pairs() {
        let registry = parse_backend_table(
            "yasserrmd/Text2SQL-1.5B=vllm_server:8000, premai-io/prem-1B-SQL=vllm_server:8001,",
        )
        .expect("valid table");

        assert_eq!(registry.len(), 2);
        assert_eq!(
            registry.lookup("premai-io/prem-1B-SQL").expect("mapped"),
            &BackendEndpoint::new("vllm_server", 8001)
        );
    }

    #[test]
    fn backend_table_rejects_malformed_entries() {
        assert!(matches!(
            parse_backend_table("org/m"),
            Err(ConfigError::InvalidEntry { .. })
        ));
        assert!(matches!(
            parse_backend_table("org/m=vllm_server"),
            Err(ConfigError::InvalidEntry { .. })
        ));
        assert!(matches!(
            parse_backend_table(" , "),
            Err(ConfigError::EmptyRegistry)
        ));
    }

    #[test]
    fn backend_file_is_read_from_toml() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(
            file,
            "[backends]\n{}\n{}",
            r#""facebook/opt-125m" = "vllm_server:8000""#,
            r#""sshleifer/tiny-gpt2" = "vllm_server:8001""#
        )
        .expect("write backend file");

        let registry = load_backend_file(file.path()).expect("valid backend file");
        assert_eq!(
            registry.models(),
            vec!["facebook/opt-125m", "sshleifer/tiny-gpt2"]
        );
    }

    #[test]
    fn missing_backend_file_is_reported() {
        let error = load_backend_file(Path::new("/nonexistent/relay-backends.toml"))
            .expect_err("file does not exist");
        assert!(matches!(error, ConfigError::ReadFile { .. }));
    }

    #[test]
    fn lookup_applies_defaults() {
        let config = from_vars(&[("RELAY_BACKENDS", "org/m=vllm_server:8000")])
            .expect("valid config");

        assert_eq!(config.registry.models(), vec!["org/m"]);
        assert_eq!(config.verify_timeout, DEFAULT_VERIFY_TIMEOUT);
        assert_eq!(config.generate_timeout, DEFAULT_GENERATE_TIMEOUT);
        assert_eq!(config.verify_cache_ttl, Duration::ZERO);
        assert_eq!(config.mount_prefix, DEFAULT_MOUNT_PREFIX);
        assert_eq!(config.max_inflight, DEFAULT_MAX_INFLIGHT);
        assert_eq!(config.bind_addr, SocketAddr::from(([0, 0, 0, 0], 8080)));
    }

    #[test]
    fn inline_table_wins_over_backend_file() {
        let config = from_vars(&[
            ("RELAY_BACKENDS", "org/m=vllm_server:8000"),
            ("RELAY_BACKENDS_FILE", "/nonexistent/relay-backends.toml"),
            ("RELAY_VERIFY_CACHE_TTL_MS", "1500"),
            ("RELAY_BIND_ADDR", "127.0.0.1:9090"),
        ])
        .expect("inline table is used");

        assert_eq!(config.registry.len(), 1);
        assert_eq!(config.verify_cache_ttl, Duration::from_millis(1500));
        assert_eq!(config.bind_addr, SocketAddr::from(([127, 0, 0, 1], 9090)));
    }

    #[test]
    fn backend_file_is_used_when_no_inline_table() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "[backends]\n{}", r#""org/m" = "vllm_server:8001""#)
            .expect("write backend file");
        let path = file.path().display().to_string();

        let config = from_vars(&[("RELAY_BACKENDS", " "), ("RELAY_BACKENDS_FILE", &path)])
            .expect("file table is used");

        assert_eq!(
            config.registry.lookup("org/m").expect("mapped"),
            &BackendEndpoint::new("vllm_server", 8001)
        );
    }

    #[test]
    fn missing_registry_is_rejected() {
        assert!(matches!(from_vars(&[]), Err(ConfigError::EmptyRegistry)));
    }

    #[test]
    fn zero_limits_and_timeouts_are_rejected() {
        for name in [
            "RELAY_MAX_INFLIGHT",
            "RELAY_VERIFY_TIMEOUT_SECS",
            "RELAY_GENERATE_TIMEOUT_SECS",
        ] {
            let error = from_vars(&[("RELAY_BACKENDS", "org/m=127.0.0.1:9"), (name, "0")])
                .expect_err("zero is not a usable value");
            match error {
                ConfigError::InvalidValue { name: rejected, value } => {
                    assert_eq!(rejected, name);
                    assert_eq!(value, "0");
                }
                other => panic!("expected invalid {name}, got {other:?}"),
            }
        }
    }

    #[test]
    fn unparsable_values_are_rejected() {
        let error = from_vars(&[
            ("RELAY_BACKENDS", "org/m=vllm_server:8000"),
            ("RELAY_GENERATE_TIMEOUT_SECS", "soon"),
        ])
        .expect_err("timeout must be numeric");
        assert!(matches!(
            error,
            ConfigError::InvalidValue {
                name: "RELAY_GENERATE_TIMEOUT_SECS",
                ..
            }
        ));
    }
}
