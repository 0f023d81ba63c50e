// src/config.rs
//! Configuration loading. The on-wire format (§6 of the spec) is a literal
//! line-oriented `<directive> <arg>...` grammar, not TOML, so the loader is a
//! small hand-written parser — but it fills the same kind of grouped config
//! struct the teacher's `config.rs` builds from `toml::from_str`, and keeps
//! the `from_file(path) -> anyhow::Result<Self>` shape.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::eviction::EvictionPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsyncPolicy {
    Always,
    EverySec,
    No,
}

#[derive(Debug, Clone)]
pub struct NetworkCfg {
    pub port: u16,
    pub case_sensitive_commands: bool,
}

impl Default for NetworkCfg {
    fn default() -> Self {
        Self {
            port: 6379,
            case_sensitive_commands: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SaveRule {
    pub seconds: u64,
    pub changed_keys: u64,
}

#[derive(Debug, Clone)]
pub struct PersistenceCfg {
    pub dir: PathBuf,
    pub dbfilename: String,
    pub save_rules: Vec<SaveRule>,
    pub appendonly: bool,
    pub appendfilename: String,
    pub appendfsync: FsyncPolicy,
}

impl Default for PersistenceCfg {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./data/"),
            dbfilename: "dump.rdb".to_string(),
            save_rules: Vec::new(),
            appendonly: false,
            appendfilename: "appendonly.aof".to_string(),
            appendfsync: FsyncPolicy::EverySec,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MemoryCfg {
    pub maxmemory: u64,
    pub maxmemory_policy: EvictionPolicy,
    pub maxmemory_samples: usize,
}

impl Default for MemoryCfg {
    fn default() -> Self {
        Self {
            maxmemory: 0,
            maxmemory_policy: EvictionPolicy::NoEviction,
            maxmemory_samples: 5,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    pub network: NetworkCfg,
    pub persistence: PersistenceCfg,
    pub memory: MemoryCfg,
    pub requirepass: Option<String>,
    pub loglevel: String,
    pub json_logs: bool,
}

impl AppConfig {
    pub fn from_file(p: &Path) -> Result<Self> {
        let mut cfg = AppConfig {
            loglevel: "info".to_string(),
            ..Default::default()
        };
        if !p.exists() {
            log::warn!("config file {:?} not found, using defaults", p);
            return Ok(cfg);
        }
        let text =
            fs::read_to_string(p).with_context(|| format!("reading config file {:?}", p))?;
        for (lineno, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut parts = line.split_whitespace();
            let directive = parts.next().unwrap_or_default();
            let args: Vec<&str> = parts.collect();
            if let Err(e) = apply_directive(&mut cfg, directive, &args) {
                log::warn!("config {:?}:{}: {}", p, lineno + 1, e);
            }
        }
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.memory.maxmemory_samples == 0 {
            anyhow::bail!("maxmemory-samples must be > 0");
        }
        Ok(())
    }
}

fn apply_directive(cfg: &mut AppConfig, directive: &str, args: &[&str]) -> Result<(), String> {
    match directive {
        "port" => {
            cfg.network.port = args
                .first()
                .ok_or("port requires an argument")?
                .parse()
                .map_err(|_| "port is not a valid integer".to_string())?;
        }
        "sensitive" => {
            cfg.network.case_sensitive_commands = parse_bool(args.first().copied())?;
        }
        "dir" => {
            cfg.persistence.dir = PathBuf::from(args.first().ok_or("dir requires an argument")?);
        }
        "save" => {
            if args.len() != 2 {
                return Err("save requires <secs> <keys>".to_string());
            }
            let seconds: u64 = args[0]
                .parse()
                .map_err(|_| "save seconds not an integer".to_string())?;
            let changed_keys: u64 = args[1]
                .parse()
                .map_err(|_| "save keys not an integer".to_string())?;
            cfg.persistence
                .save_rules
                .push(SaveRule { seconds, changed_keys });
        }
        "dbfilename" => {
            cfg.persistence.dbfilename =
                args.first().ok_or("dbfilename requires an argument")?.to_string();
        }
        "appendonly" => {
            cfg.persistence.appendonly = parse_bool(args.first().copied())?;
        }
        "appendfilename" => {
            cfg.persistence.appendfilename = args
                .first()
                .ok_or("appendfilename requires an argument")?
                .to_string();
        }
        "appendfsync" => {
            cfg.persistence.appendfsync = match args.first().copied() {
                Some("always") => FsyncPolicy::Always,
                Some("everysec") => FsyncPolicy::EverySec,
                Some("no") => FsyncPolicy::No,
                _ => return Err("appendfsync must be always|everysec|no".to_string()),
            };
        }
        "requirepass" => {
            cfg.requirepass = args.first().map(|s| s.to_string());
        }
        "maxmemory" => {
            cfg.memory.maxmemory =
                parse_memory(args.first().ok_or("maxmemory requires an argument")?)?;
        }
        "maxmemory-policy" => {
            cfg.memory.maxmemory_policy = args
                .first()
                .ok_or("maxmemory-policy requires an argument")?
                .parse()
                .map_err(|e: String| e)?;
        }
        "maxmemory-samples" => {
            cfg.memory.maxmemory_samples = args
                .first()
                .ok_or("maxmemory-samples requires an argument")?
                .parse()
                .map_err(|_| "maxmemory-samples not an integer".to_string())?;
        }
        "loglevel" => {
            cfg.loglevel = args.first().ok_or("loglevel requires an argument")?.to_string();
        }
        "json-logs" => {
            cfg.json_logs = parse_bool(args.first().copied())?;
        }
        other => {
            return Err(format!("unrecognized directive {other:?} (ignored)"));
        }
    }
    Ok(())
}

fn parse_bool(s: Option<&str>) -> Result<bool, String> {
    match s {
        Some("yes") => Ok(true),
        Some("no") => Ok(false),
        _ => Err("expected yes|no".to_string()),
    }
}

fn parse_memory(s: &str) -> Result<u64, String> {
    let lower = s.to_ascii_lowercase();
    let (digits, mult) = if let Some(n) = lower.strip_suffix("kb") {
        (n, 1024u64)
    } else if let Some(n) = lower.strip_suffix("mb") {
        (n, 1024 * 1024)
    } else if let Some(n) = lower.strip_suffix("gb") {
        (n, 1024 * 1024 * 1024)
    } else {
        (lower.as_str(), 1)
    };
    digits
        .trim()
        .parse::<u64>()
        .map(|n| n * mult)
        .map_err(|_| format!("invalid memory value {s:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn parses_recognized_directives_and_skips_unknown() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            f,
            "# comment\nport 7000\nsave 60 1000\nmaxmemory 1kb\nmaxmemory-policy allkeys-lru\nrequirepass secret\njson-logs yes\nbogus-directive foo\n"
        )
        .unwrap();
        let cfg = AppConfig::from_file(f.path()).unwrap();
        assert_eq!(cfg.network.port, 7000);
        assert_eq!(cfg.persistence.save_rules.len(), 1);
        assert_eq!(cfg.memory.maxmemory, 1024);
        assert_eq!(cfg.requirepass.as_deref(), Some("secret"));
        assert!(cfg.json_logs);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let cfg = AppConfig::from_file(Path::new("/nonexistent/path.conf")).unwrap();
        assert_eq!(cfg.network.port, 6379);
    }

    #[test]
    fn rejects_zero_maxmemory_samples() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "maxmemory-samples 0").unwrap();
        assert!(AppConfig::from_file(f.path()).is_err());
    }
}
