use anyhow::{Context, Result};
use serde_json::Value;

use crate::cache::Cache;
use crate::cli::{CacheArgs, CacheCommands};
use crate::config::SdkConfig;

pub fn execute_cache(args: CacheArgs, config: &SdkConfig) -> Result<()> {
    let dir = config.cache_dir()?;
    let mut cache = Cache::open(&dir, config.cache.capacity_bytes)
        .with_context(|| format!("Failed to open cache at {}", dir.display()))?;

    match args.command {
        CacheCommands::Get(args) => match cache.get_value(&args.key) {
            Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
            None => anyhow::bail!("Key '{}' not found in {}", args.key, dir.display()),
        },
        CacheCommands::Set(args) => {
            let value = parse_value(&args.value);
            cache.set_value(&args.key, &value);
            if cache.get_value(&args.key).as_ref() != Some(&value) {
                anyhow::bail!("Value for '{}' did not fit in the cache", args.key);
            }
            eprintln!("Stored '{}' ({} entries)", args.key, cache.len());
        }
        CacheCommands::Evict => {
            let evicted = cache.evict();
            eprintln!("Evicted {} entries, {} remain", evicted, cache.len());
        }
    }

    Ok(())
}

/// JSON when it parses, otherwise the raw text as a string.
fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{CacheGetArgs, CacheSetArgs};
    use serde_json::json;

    fn config_in(dir: &std::path::Path) -> SdkConfig {
        let mut config = SdkConfig::default();
        config.cache.dir = Some(dir.to_path_buf());
        config
    }

    #[test]
    fn test_parse_value() {
        assert_eq!(parse_value("{\"a\":1}"), json!({"a": 1}));
        assert_eq!(parse_value("42"), json!(42));
        assert_eq!(parse_value("hello world"), json!("hello world"));
    }

    #[test]
    fn test_set_then_get_persists() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());

        let set = CacheArgs {
            command: CacheCommands::Set(CacheSetArgs {
                key: "home_settings".to_string(),
                value: "{\"theme\":\"dark\"}".to_string(),
            }),
        };
        execute_cache(set, &config).unwrap();

        let get = CacheArgs {
            command: CacheCommands::Get(CacheGetArgs {
                key: "home_settings".to_string(),
            }),
        };
        execute_cache(get, &config).unwrap();

        let mut cache = Cache::open(dir.path(), config.cache.capacity_bytes).unwrap();
        assert_eq!(
            cache.get_value("home_settings"),
            Some(json!({"theme": "dark"}))
        );
    }

    #[test]
    fn test_get_missing_key_errors() {
        let dir = tempfile::tempdir().unwrap();
        let get = CacheArgs {
            command: CacheCommands::Get(CacheGetArgs {
                key: "nope".to_string(),
            }),
        };
        let err = execute_cache(get, &config_in(dir.path())).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }
}
