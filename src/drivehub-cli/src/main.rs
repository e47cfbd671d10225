use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use drivehub_core::{
    init_logging, redact_data, AppDirs, Config, ConfigItem, Context, DriverRegistry, ListArgs,
    Obj,
};
use drivehub_plugin::{PluginManager, PluginSettings};
use serde_json::Value;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Parser)]
#[command(name = "drivehub", version, about = "Storage driver host")]
struct Cli {
    /// Plugin file or directory (takes precedence over config)
    #[arg(long, global = true)]
    plugins: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List loaded plugins and the drivers they contribute
    Plugins,
    /// Print the configuration schema of a driver as JSON
    Schema {
        /// Registered driver name
        driver: String,
    },
    /// List a directory through a driver
    Ls(LsCommand),
}

#[derive(Debug, Parser, Clone)]
struct LsCommand {
    /// Registered driver name
    driver: String,
    /// Directory to list
    #[arg(default_value = "/")]
    dir: String,
    /// Driver configuration value, repeatable
    #[arg(long = "set", value_name = "KEY=VALUE")]
    values: Vec<String>,
}

#[derive(Debug, Error, PartialEq, Eq)]
enum SetError {
    #[error("expected KEY=VALUE, got {0:?}")]
    Malformed(String),
    #[error("driver has no configuration item {key:?} (known: {known})")]
    UnknownKey { key: String, known: String },
    #[error("{key} expects a {kind}, got {raw:?}")]
    InvalidValue {
        key: String,
        kind: String,
        raw: String,
    },
}

/// Resolves `--set` arguments against a driver's configuration items,
/// converting each raw value to the item's declared type.
fn parse_values(items: &[ConfigItem], values: &[String]) -> Result<Vec<(String, Value)>, SetError> {
    values
        .iter()
        .map(|arg| {
            let (key, raw) = arg
                .split_once('=')
                .filter(|(key, _)| !key.is_empty())
                .ok_or_else(|| SetError::Malformed(arg.clone()))?;
            let item = items
                .iter()
                .find(|item| item.name == key)
                .ok_or_else(|| SetError::UnknownKey {
                    key: key.to_string(),
                    known: items
                        .iter()
                        .map(|item| item.name.as_str())
                        .collect::<Vec<_>>()
                        .join(", "),
                })?;
            Ok((key.to_string(), coerce(item, raw)?))
        })
        .collect()
}

fn coerce(item: &ConfigItem, raw: &str) -> Result<Value, SetError> {
    let invalid = || SetError::InvalidValue {
        key: item.name.clone(),
        kind: item.kind.clone(),
        raw: raw.to_string(),
    };
    let value = match item.kind.as_str() {
        "bool" => Value::Bool(raw.parse().map_err(|_| invalid())?),
        "int" => Value::from(raw.parse::<i64>().map_err(|_| invalid())?),
        "uint" | "number" => Value::from(raw.parse::<u64>().map_err(|_| invalid())?),
        "float64" => Value::from(raw.parse::<f64>().map_err(|_| invalid())?),
        _ => Value::String(raw.to_string()),
    };
    Ok(value)
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let dirs = AppDirs::discover()?;
    let config = Config::load_or_default(&dirs)?;
    let _logging = init_logging(&config.logging, &dirs)?;

    let plugin_path = cli
        .plugins
        .clone()
        .unwrap_or_else(|| config.plugins.plugin_path());
    let settings = PluginSettings::from(&config.plugins);
    let mut manager = PluginManager::new(settings.clone());
    let mut registry = DriverRegistry::new();
    let loaded = if cli.plugins.is_none() && !plugin_path.exists() {
        tracing::warn!(path = %plugin_path.display(), "default plugin directory does not exist");
        Vec::new()
    } else {
        manager
            .load(&plugin_path, &mut registry)
            .with_context(|| format!("failed to load plugins from {}", plugin_path.display()))?
    };
    tracing::info!(
        path = %plugin_path.display(),
        plugins = manager.len(),
        drivers = loaded.len(),
        "plugins loaded"
    );

    let result = match cli.command {
        Command::Plugins => {
            print_plugins(&manager, &registry);
            Ok(())
        }
        Command::Schema { driver } => print_schema(&registry, &driver),
        Command::Ls(ls) => run_ls(&registry, &ls, &settings),
    };
    manager.shutdown();
    result
}

fn print_plugins(manager: &PluginManager, registry: &DriverRegistry) {
    let plugins = manager.plugins();
    if plugins.is_empty() {
        println!("No plugins loaded. Set plugins.path in config.toml or pass --plugins.");
        return;
    }

    for plugin in plugins {
        println!(
            "Plugin: {} {} ({}, pid {})",
            plugin.info.name,
            plugin.info.version,
            plugin.path.display(),
            plugin.pid
        );
        if !plugin.info.description.is_empty() {
            println!("  {}", plugin.info.description);
        }
        for name in &plugin.drivers {
            let capabilities = registry
                .get(name)
                .map(|entry| {
                    entry
                        .capabilities()
                        .iter()
                        .map(|capability| capability.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                })
                .unwrap_or_default();
            if capabilities.is_empty() {
                println!("  - {name}");
            } else {
                println!("  - {name} [{capabilities}]");
            }
        }
    }
}

fn print_schema(registry: &DriverRegistry, driver: &str) -> Result<()> {
    let info = registry
        .driver_info(driver)
        .with_context(|| format!("unknown driver {driver:?}"))?;
    println!("{}", serde_json::to_string_pretty(info)?);
    Ok(())
}

fn run_ls(registry: &DriverRegistry, ls: &LsCommand, settings: &PluginSettings) -> Result<()> {
    let driver = registry.create(&ls.driver)?;
    let ctx = match settings.call_timeout {
        Some(timeout) => Context::with_timeout(timeout),
        None => Context::background(),
    };

    if !ls.values.is_empty() {
        let addition = driver.addition()?;
        let overrides = parse_values(addition.items(), &ls.values)?;
        let addition = addition.with_values(overrides);
        tracing::debug!(
            driver = %ls.driver,
            addition = %serde_json::Value::Object(redact_data(addition.data())),
            "applying driver configuration"
        );
        driver.set_addition(addition)?;
    }
    driver
        .init(&ctx)
        .with_context(|| format!("failed to initialize {}", ls.driver))?;

    let listed = driver.list(&ctx, &Obj::folder(ls.dir.clone()), &ListArgs::default());
    if let Err(err) = driver.teardown(&ctx) {
        tracing::warn!(driver = %ls.driver, error = %err, "driver teardown failed");
    }
    for obj in listed.with_context(|| format!("failed to list {}", ls.dir))? {
        if obj.is_folder {
            println!("{:>12}  {}/", "-", obj.name);
        } else {
            println!("{:>12}  {}", obj.size, obj.name);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn items() -> Vec<ConfigItem> {
        vec![
            ConfigItem {
                name: "seed".into(),
                kind: "string".into(),
                ..ConfigItem::default()
            },
            ConfigItem {
                name: "total_space".into(),
                kind: "uint".into(),
                ..ConfigItem::default()
            },
            ConfigItem {
                name: "read_only".into(),
                kind: "bool".into(),
                ..ConfigItem::default()
            },
        ]
    }

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn values_take_the_declared_type() {
        let parsed = parse_values(
            &items(),
            &args(&["seed=a/b,c/", "total_space=42", "read_only=true"]),
        )
        .unwrap();
        assert_eq!(
            parsed,
            vec![
                ("seed".to_string(), Value::from("a/b,c/")),
                ("total_space".to_string(), Value::from(42u64)),
                ("read_only".to_string(), Value::Bool(true)),
            ]
        );
    }

    #[test]
    fn value_may_contain_equals_signs() {
        let parsed = parse_values(&items(), &args(&["seed=a=b"])).unwrap();
        assert_eq!(parsed[0].1, Value::from("a=b"));
    }

    #[test]
    fn malformed_and_unknown_keys_are_rejected() {
        assert_eq!(
            parse_values(&items(), &args(&["seed"])).unwrap_err(),
            SetError::Malformed("seed".into())
        );
        assert_eq!(
            parse_values(&items(), &args(&["=x"])).unwrap_err(),
            SetError::Malformed("=x".into())
        );
        let err = parse_values(&items(), &args(&["colour=red"])).unwrap_err();
        assert!(matches!(err, SetError::UnknownKey { ref key, .. } if key == "colour"));
        assert!(err.to_string().contains("seed, total_space, read_only"));
    }

    #[test]
    fn mistyped_values_are_rejected() {
        let err = parse_values(&items(), &args(&["total_space=lots"])).unwrap_err();
        assert_eq!(
            err,
            SetError::InvalidValue {
                key: "total_space".into(),
                kind: "uint".into(),
                raw: "lots".into(),
            }
        );
    }

    #[test]
    fn cli_parses_global_plugin_path() {
        let cli = Cli::try_parse_from([
            "drivehub",
            "ls",
            "memory-alpha",
            "/x",
            "--set",
            "seed=x/a",
            "--plugins",
            "/opt/plugins",
        ])
        .unwrap();
        assert_eq!(cli.plugins, Some(PathBuf::from("/opt/plugins")));
        match cli.command {
            Command::Ls(ls) => {
                assert_eq!(ls.driver, "memory-alpha");
                assert_eq!(ls.dir, "/x");
                assert_eq!(ls.values, ["seed=x/a"]);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn ls_defaults_to_the_root() {
        let cli = Cli::try_parse_from(["drivehub", "ls", "memory-beta"]).unwrap();
        assert!(matches!(cli.command, Command::Ls(ls) if ls.dir == "/"));
    }
}
