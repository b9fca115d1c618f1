use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use eqs_docstore::is_valid_collection_name;

use crate::attribute_map::AttributeMap;

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub bind_addr: SocketAddr,
    pub store: StoreKind,
    pub db_url: Option<String>,
    pub db_max_connections: u32,
    pub db_acquire_timeout_ms: u64,
    pub entities_collection: String,
    pub labels_collection: String,
    pub attribute_map: Arc<AttributeMap>,
    pub metrics_require_tenant: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    Postgres,
    Memory,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{code}: {message}")]
pub struct StartupError {
    pub code: &'static str,
    pub message: String,
}

impl ServiceConfig {
    pub fn load() -> Result<Self, StartupError> {
        let mut merged = HashMap::new();

        if let Ok(config_path) = std::env::var("EQS_CONFIG_PATH") {
            let config_path = config_path.trim();
            if !config_path.is_empty() {
                let file_kv = parse_env_file(config_path)?;
                merged.extend(file_kv);
            }
        }

        merged.extend(std::env::vars());

        Self::from_kv(&merged)
    }

    pub fn from_kv(kv: &HashMap<String, String>) -> Result<Self, StartupError> {
        let bind_addr = parse_socket_addr(
            kv.get("EQS_BIND_ADDR"),
            SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 8080),
            "EQS_BIND_ADDR",
        )?;

        let store = parse_store_kind(kv.get("EQS_STORE"))?;
        let db_url = match store {
            StoreKind::Postgres => Some(require_nonempty(kv, "EQS_DB_URL")?),
            StoreKind::Memory => optional_nonempty(kv, "EQS_DB_URL"),
        };

        let db_max_connections = parse_u32(
            kv.get("EQS_DB_MAX_CONNECTIONS"),
            8,
            "EQS_DB_MAX_CONNECTIONS",
        )?;
        if db_max_connections == 0 {
            return Err(StartupError {
                code: "ERR_INVALID_CONFIG",
                message: "EQS_DB_MAX_CONNECTIONS must be >= 1".to_string(),
            });
        }
        let db_acquire_timeout_ms = parse_u64(
            kv.get("EQS_DB_ACQUIRE_TIMEOUT_MS"),
            2000,
            "EQS_DB_ACQUIRE_TIMEOUT_MS",
        )?;

        let entities_collection =
            parse_collection_name(kv, "EQS_ENTITIES_COLLECTION", "raw_entities")?;
        let labels_collection =
            parse_collection_name(kv, "EQS_LABELS_COLLECTION", "entity_labels")?;
        if entities_collection == labels_collection {
            return Err(StartupError {
                code: "ERR_INVALID_CONFIG",
                message: "EQS_ENTITIES_COLLECTION and EQS_LABELS_COLLECTION must differ"
                    .to_string(),
            });
        }

        let attribute_map = Arc::new(parse_attribute_map(kv)?);

        let metrics_require_tenant = parse_bool(
            kv.get("EQS_METRICS_REQUIRE_TENANT"),
            false,
            "EQS_METRICS_REQUIRE_TENANT",
        )?;

        Ok(Self {
            bind_addr,
            store,
            db_url,
            db_max_connections,
            db_acquire_timeout_ms,
            entities_collection,
            labels_collection,
            attribute_map,
            metrics_require_tenant,
        })
    }
}

fn parse_attribute_map(kv: &HashMap<String, String>) -> Result<AttributeMap, StartupError> {
    let raw = if let Some(json) = optional_nonempty(kv, "EQS_ATTRIBUTE_MAP_JSON") {
        json
    } else if let Some(path) = optional_nonempty(kv, "EQS_ATTRIBUTE_MAP_PATH") {
        std::fs::read_to_string(&path).map_err(|_| StartupError {
            code: "ERR_CONFIG_FILE_READ",
            message: format!("failed to read attribute map file at {}", path),
        })?
    } else {
        return Err(StartupError {
            code: "ERR_MISSING_CONFIG",
            message: "missing required config key EQS_ATTRIBUTE_MAP_JSON or EQS_ATTRIBUTE_MAP_PATH"
                .to_string(),
        });
    };

    let map = AttributeMap::from_json(&raw).map_err(|err| StartupError {
        code: "ERR_ATTRIBUTE_MAP",
        message: err.to_string(),
    })?;
    if map.entity_types().next().is_none() {
        return Err(StartupError {
            code: "ERR_ATTRIBUTE_MAP",
            message: "attribute map must define at least one entity type".to_string(),
        });
    }
    Ok(map)
}

fn parse_env_file(path: &str) -> Result<HashMap<String, String>, StartupError> {
    let contents = std::fs::read_to_string(path).map_err(|_| StartupError {
        code: "ERR_CONFIG_FILE_READ",
        message: format!("failed to read config file at {}", path),
    })?;

    let mut kv = HashMap::new();

    for (idx, raw_line) in contents.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let (key, value) = line.split_once('=').ok_or_else(|| StartupError {
            code: "ERR_CONFIG_FILE_PARSE",
            message: format!("invalid config line {} (expected KEY=VALUE)", idx + 1),
        })?;

        let key = key.trim();
        if key.is_empty() {
            return Err(StartupError {
                code: "ERR_CONFIG_FILE_PARSE",
                message: format!("invalid config line {} (empty key)", idx + 1),
            });
        }

        kv.insert(key.to_string(), strip_quotes(value.trim()));
    }

    Ok(kv)
}

fn strip_quotes(s: &str) -> String {
    let bytes = s.as_bytes();
    if bytes.len() >= 2 {
        let first = bytes[0];
        let last = bytes[bytes.len() - 1];
        if (first == b'"' && last == b'"') || (first == b'\'' && last == b'\'') {
            return s[1..bytes.len() - 1].to_string();
        }
    }
    s.to_string()
}

fn optional_nonempty(kv: &HashMap<String, String>, key: &str) -> Option<String> {
    kv.get(key)
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}

fn require_nonempty(
    kv: &HashMap<String, String>,
    key: &'static str,
) -> Result<String, StartupError> {
    optional_nonempty(kv, key).ok_or_else(|| StartupError {
        code: "ERR_MISSING_CONFIG",
        message: format!("missing required config key {}", key),
    })
}

fn parse_collection_name(
    kv: &HashMap<String, String>,
    key: &'static str,
    default: &str,
) -> Result<String, StartupError> {
    let name = optional_nonempty(kv, key).unwrap_or_else(|| default.to_string());
    if !is_valid_collection_name(&name) {
        return Err(StartupError {
            code: "ERR_INVALID_CONFIG",
            message: format!(
                "{} must start with a lowercase letter and contain only [a-z0-9_]",
                key
            ),
        });
    }
    Ok(name)
}

fn parse_socket_addr(
    value: Option<&String>,
    default: SocketAddr,
    key: &'static str,
) -> Result<SocketAddr, StartupError> {
    match value {
        None => Ok(default),
        Some(v) => v.trim().parse::<SocketAddr>().map_err(|_| StartupError {
            code: "ERR_INVALID_CONFIG",
            message: format!("{} must be a valid host:port socket address", key),
        }),
    }
}

fn parse_u64(value: Option<&String>, default: u64, key: &'static str) -> Result<u64, StartupError> {
    match value {
        None => Ok(default),
        Some(v) if v.trim().is_empty() => Ok(default),
        Some(v) => v.trim().parse::<u64>().map_err(|_| StartupError {
            code: "ERR_INVALID_CONFIG",
            message: format!("{} must be an integer", key),
        }),
    }
}

fn parse_u32(value: Option<&String>, default: u32, key: &'static str) -> Result<u32, StartupError> {
    match value {
        None => Ok(default),
        Some(v) if v.trim().is_empty() => Ok(default),
        Some(v) => v.trim().parse::<u32>().map_err(|_| StartupError {
            code: "ERR_INVALID_CONFIG",
            message: format!("{} must be an integer", key),
        }),
    }
}

fn parse_store_kind(value: Option<&String>) -> Result<StoreKind, StartupError> {
    let kind = value
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .unwrap_or("postgres");

    match kind {
        "postgres" => Ok(StoreKind::Postgres),
        "memory" => Ok(StoreKind::Memory),
        _ => Err(StartupError {
            code: "ERR_INVALID_CONFIG",
            message: "EQS_STORE must be postgres or memory".to_string(),
        }),
    }
}

fn parse_bool(
    value: Option<&String>,
    default: bool,
    key: &'static str,
) -> Result<bool, StartupError> {
    let Some(value) = value.map(|v| v.trim()).filter(|v| !v.is_empty()) else {
        return Ok(default);
    };

    match value {
        "1" | "true" | "TRUE" | "yes" | "YES" => Ok(true),
        "0" | "false" | "FALSE" | "no" | "NO" => Ok(false),
        _ => Err(StartupError {
            code: "ERR_INVALID_CONFIG",
            message: format!("{} must be a boolean", key),
        }),
    }
}
