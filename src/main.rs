//! Bot Lifecycle - fleet evaluator
//!
//! Reads a fleet file of telemetry snapshots, then:
//! 1. Classifies each bot's runner, job and evolution state
//! 2. Scores health and derives the display tier
//! 3. Evaluates promotion gates and demotion
//! 4. Prints the evaluations as JSON on stdout
//!
//! With `EVAL_INTERVAL_SECS` set it repeats until Ctrl-C.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{info, warn};

use bot_lifecycle::{evaluate_fleet, EngineConfig, FleetEntry, LifecycleEngine};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so stdout stays valid JSON
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_writer(std::io::stderr)
        .init();

    info!("Starting Bot Lifecycle evaluator...");

    let settings = load_settings()?;
    let engine_config = load_engine_config(settings.config_path.as_deref())?;
    let engine = Arc::new(LifecycleEngine::from_config(&engine_config));
    info!("Fleet file: {}", settings.fleet_file.display());

    if settings.interval_secs == 0 {
        return run_once(&engine, &settings.fleet_file).await;
    }

    info!("Re-evaluating every {}s", settings.interval_secs);
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
        }
    };
    run_loop(&engine, &settings.fleet_file, settings.interval_secs, shutdown).await
}

/// Evaluate on every tick until `shutdown` resolves. The shutdown future is
/// polled across cycles, so a signal sent mid-cycle stops the next select.
async fn run_loop(
    engine: &Arc<LifecycleEngine>,
    fleet_file: &Path,
    interval_secs: u64,
    shutdown: impl Future<Output = ()>,
) -> anyhow::Result<()> {
    let mut ticker = interval(Duration::from_secs(interval_secs));
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                // A bad fleet file should not kill the loop
                if let Err(e) = run_once(engine, fleet_file).await {
                    warn!("Evaluation cycle failed: {}", e);
                }
            }
            _ = &mut shutdown => {
                info!("Shutting down");
                return Ok(());
            }
        }
    }
}

/// Settings loaded from environment
#[derive(Debug, Clone)]
struct Settings {
    config_path: Option<PathBuf>,
    fleet_file: PathBuf,
    interval_secs: u64,
}

fn load_settings() -> anyhow::Result<Settings> {
    let config_path = std::env::var("LIFECYCLE_CONFIG")
        .ok()
        .map(PathBuf::from)
        .or_else(|| {
            dirs::config_dir()
                .map(|d| d.join("bot-lifecycle").join("config.yaml"))
                .filter(|p| p.exists())
        });

    let fleet_file = std::env::var("FLEET_FILE")
        .map(PathBuf::from)
        .map_err(|_| anyhow::anyhow!("FLEET_FILE environment variable required"))?;

    let interval_secs = match std::env::var("EVAL_INTERVAL_SECS") {
        Ok(v) => v
            .parse::<u64>()
            .map_err(|e| anyhow::anyhow!("Invalid EVAL_INTERVAL_SECS: {}", e))?,
        Err(_) => 0,
    };

    Ok(Settings {
        config_path,
        fleet_file,
        interval_secs,
    })
}

fn load_engine_config(path: Option<&Path>) -> anyhow::Result<EngineConfig> {
    match path {
        Some(p) => info!("Engine config: {}", p.display()),
        None => info!("No engine config file, using defaults and LIFECYCLE__* overrides"),
    }
    Ok(EngineConfig::load(path)?)
}

fn load_fleet(path: &Path) -> anyhow::Result<Vec<FleetEntry>> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", path.display(), e))?;
    let is_json = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    let entries = if is_json {
        serde_json::from_str(&content)?
    } else {
        serde_yaml::from_str(&content)?
    };
    Ok(entries)
}

async fn run_once(engine: &Arc<LifecycleEngine>, fleet_file: &Path) -> anyhow::Result<()> {
    let entries = load_fleet(fleet_file)?;
    let evaluations = evaluate_fleet(Arc::clone(engine), entries, chrono::Utc::now()).await;
    println!("{}", serde_json::to_string_pretty(&evaluations)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn fleet_file() -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".yaml")
            .tempfile()
            .unwrap();
        writeln!(file, "[]").unwrap();
        file
    }

    #[tokio::test]
    async fn test_loop_stops_once_shutdown_fires() {
        let file = fleet_file();
        let engine = Arc::new(LifecycleEngine::from_config(&EngineConfig::default()));
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let shutdown = async move {
            let _ = rx.await;
        };

        // Fired before the loop starts; it must still be seen on a later select
        tx.send(()).unwrap();
        let stopped = tokio::time::timeout(
            Duration::from_secs(5),
            run_loop(&engine, file.path(), 3600, shutdown),
        )
        .await;
        assert!(matches!(stopped, Ok(Ok(()))));
    }

    #[test]
    fn test_load_fleet_yaml_and_json() {
        let file = fleet_file();
        assert!(load_fleet(file.path()).unwrap().is_empty());

        let mut json = tempfile::Builder::new()
            .suffix(".json")
            .tempfile()
            .unwrap();
        writeln!(json, "[]").unwrap();
        assert!(load_fleet(json.path()).unwrap().is_empty());

        assert!(load_fleet(Path::new("/nonexistent/fleet.yaml")).is_err());
    }
}
