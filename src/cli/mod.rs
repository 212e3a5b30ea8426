mod pipe;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use tracing::{info, warn};

use crate::core::config::{AgentConfig, DEFAULT_CONFIG_PATH};
use crate::core::data::DataLayer;
use crate::core::delivery::{TelemetryApi, UpdateType};
use crate::core::functions::{FunctionRegistry, help};
use crate::core::job::{JobManager, ManagerOptions};
use crate::core::series::SeriesStore;
use crate::core::terminal;
use crate::logging::{self, EventReceiver, LogLevel, event_channel};
use crate::plugins;

#[derive(Debug, Parser)]
#[command(name = "telemetry-agent", version, about = "Collects data and feeds it to Telemetry dashboards")]
pub struct AgentArgs {
    /// Configuration file.
    #[arg(long, env = "TELEMETRY_AGENT_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Run every job a single time, then exit.
    #[arg(long)]
    pub once: bool,

    /// Only run jobs whose ID matches this regular expression.
    #[arg(long)]
    pub filter: Option<String>,

    /// Minimum level printed: debug, log or error.
    #[arg(short, long, default_value = "log")]
    pub verbosity: LogLevel,

    /// Publish a JSON document read from stdin instead of running jobs.
    #[arg(long)]
    pub pipe: bool,

    /// With --pipe, apply the input as JSON-Patch operations.
    #[arg(long, requires = "pipe", conflicts_with = "post")]
    pub jsonpatch: bool,

    /// With --pipe, replace the flows' contents.
    #[arg(long, requires = "pipe")]
    pub post: bool,

    /// List the functions available to expressions.
    #[arg(long)]
    pub functions: bool,

    /// Describe one function.
    #[arg(long, value_name = "NAME")]
    pub function_help: Option<String>,
}

impl AgentArgs {
    fn pipe_update_type(&self) -> UpdateType {
        if self.jsonpatch {
            UpdateType::JsonPatch
        } else if self.post {
            UpdateType::Post
        } else {
            UpdateType::Patch
        }
    }
}

pub async fn run_main() -> Result<()> {
    let args = AgentArgs::parse();
    logging::init_tracing();

    if args.functions || args.function_help.is_some() {
        let registry = FunctionRegistry::with_builtins()?;
        match &args.function_help {
            Some(name) => {
                let text = help::function_help(&registry, name)
                    .ok_or_else(|| anyhow!("Function `{}` not found.", name))?;
                println!("{}", text);
            }
            None => println!("{}", help::function_list(&registry)),
        }
        return Ok(());
    }

    let (events, rx) = event_channel();

    if args.pipe {
        let config = match AgentConfig::load(&args.config).await {
            Ok(config) => config,
            Err(e) => {
                warn!("{:#}; using the environment only", e);
                AgentConfig::default()
            }
        };
        let result = pipe::run(&config, args.pipe_update_type(), events.clone()).await;
        drop(events);
        drain_events(rx, args.verbosity).await;
        let count = result?;
        terminal::print_success(&format!("Published {} flow update(s)", count));
        return Ok(());
    }

    let config = AgentConfig::load(&args.config).await?;
    terminal::print_step("Starting telemetry agent");
    terminal::print_status("Config", &args.config.display().to_string());

    let data = match &config.data.path {
        Some(path) => {
            let store = SeriesStore::open(path, config.data.default_ttl(), events.clone())
                .with_context(|| format!("Unable to open the data store at {}", path.display()))?;
            let functions = Arc::new(FunctionRegistry::with_builtins()?);
            terminal::print_status("Data", &path.display().to_string());
            Some(Arc::new(DataLayer::new(store, functions)))
        }
        None => None,
    };

    let registry = plugins::registry();
    for error in registry.registration_errors() {
        terminal::print_warn(&error.to_string());
    }

    let provider = Arc::new(TelemetryApi::new(events.clone())?);
    let options = ManagerOptions {
        filter: args.filter.clone(),
        run_once: args.once,
    };
    let manager = JobManager::new(&config, options, &registry, provider, data, events.clone())?;
    terminal::print_status("Jobs", &manager.jobs().len().to_string());
    drop(events);

    run_event_loop(&manager, rx, args.verbosity).await;
    info!("No more jobs to run; exiting.");
    Ok(())
}

/// Prints events until every job is done. Ctrl-C terminates the jobs and
/// lets them finish normally.
async fn run_event_loop(manager: &JobManager, mut rx: EventReceiver, verbosity: LogLevel) {
    let mut done = manager.start();
    let mut interrupted = false;

    loop {
        tokio::select! {
            Some(event) = rx.recv() => logging::render(&event, verbosity),
            _ = &mut done => break,
            result = tokio::signal::ctrl_c(), if !interrupted => {
                interrupted = true;
                if let Err(e) = result {
                    warn!("Unable to listen for Ctrl-C: {}", e);
                    continue;
                }
                info!("Interrupted; stopping all jobs");
                manager.terminate().await;
            }
        }
    }

    while let Ok(event) = rx.try_recv() {
        logging::render(&event, verbosity);
    }
}

async fn drain_events(mut rx: EventReceiver, verbosity: LogLevel) {
    while let Some(event) = rx.recv().await {
        logging::render(&event, verbosity);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_parse() {
        let args = AgentArgs::try_parse_from([
            "telemetry-agent",
            "--config",
            "agent.yaml",
            "--once",
            "--filter",
            "^cpu",
            "-v",
            "debug",
        ])
        .unwrap();
        assert_eq!(args.config, PathBuf::from("agent.yaml"));
        assert!(args.once);
        assert_eq!(args.filter.as_deref(), Some("^cpu"));
        assert_eq!(args.verbosity, LogLevel::Debug);
    }

    #[test]
    fn pipe_update_type_follows_the_flags() {
        let parse = |extra: &[&str]| {
            let mut argv = vec!["telemetry-agent", "--pipe"];
            argv.extend_from_slice(extra);
            AgentArgs::try_parse_from(argv).unwrap().pipe_update_type()
        };
        assert_eq!(parse(&[]), UpdateType::Patch);
        assert_eq!(parse(&["--jsonpatch"]), UpdateType::JsonPatch);
        assert_eq!(parse(&["--post"]), UpdateType::Post);

        assert!(AgentArgs::try_parse_from(["telemetry-agent", "--post"]).is_err());
        assert!(
            AgentArgs::try_parse_from(["telemetry-agent", "--pipe", "--post", "--jsonpatch"])
                .is_err()
        );
    }

    #[test]
    fn unknown_verbosity_is_rejected() {
        assert!(AgentArgs::try_parse_from(["telemetry-agent", "-v", "loud"]).is_err());
    }
}
