// src/main.rs
use std::path::PathBuf;
use std::process::ExitCode;

use log::{error, info};

use crabkv::config::AppConfig;

fn main() -> ExitCode {
    let mut args = std::env::args().skip(1);
    let config_path = args.next().map(PathBuf::from);
    let data_dir = args.next().map(PathBuf::from);
    if args.next().is_some() {
        eprintln!("usage: server [config_path] [data_dir]");
        return ExitCode::FAILURE;
    }

    let cfg_path = config_path.unwrap_or_else(|| PathBuf::from("./config/redis.conf"));
    let mut cfg = match AppConfig::from_file(&cfg_path) {
        Ok(c) => c,
        Err(e) => {
            env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
            error!("failed to load config {cfg_path:?}: {e:?}");
            return ExitCode::FAILURE;
        }
    };
    if let Some(dir) = data_dir {
        cfg.persistence.dir = dir;
    }

    // `RUST_LOG`, if set, still wins; the config directive only supplies the default.
    let filter = env_logger::Env::default().default_filter_or(cfg.loglevel.clone());
    if cfg.json_logs {
        env_logger::Builder::from_env(filter)
            .format(|buf, record| {
                use std::io::Write;
                let ts = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
                writeln!(
                    buf,
                    "{{\"ts\":\"{}\",\"level\":\"{}\",\"target\":\"{}\",\"msg\":\"{}\"}}",
                    ts,
                    record.level(),
                    record.target(),
                    record.args().to_string().replace('"', "'")
                )
            })
            .init();
    } else {
        env_logger::Builder::from_env(filter).init();
    }

    if std::env::var("INSIDE_CONTAINER").is_ok() {
        info!("INSIDE_CONTAINER set: TLS cert paths remapped to /app/config (TLS is out of scope for the core)");
    }

    if let Err(e) = std::fs::create_dir_all(&cfg.persistence.dir) {
        error!("failed to create data directory {:?}: {e}", cfg.persistence.dir);
        return ExitCode::FAILURE;
    }

    info!("loaded config: {cfg:?}");

    match crabkv::run(cfg) {
        Ok(()) => {
            info!("clean shutdown");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("fatal startup error: {e:?}");
            ExitCode::FAILURE
        }
    }
}
