//! Relay CLI - issue requests through the resilient client from a shell.
//!
//! Every URL given on the command line becomes one request; all of them run
//! concurrently through a single shared client. Results are printed to stdout
//! as a JSON array, logs go to stderr.

use anyhow::{bail, Context, Result};
use clap::Parser;
use futures::future::join_all;
use relay_core::{
    ClientConfig, HttpMethod, ProbeConfig, ProbeSignal, RequestSpec, ReqwestTransport,
    ResilientClient,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(name = "relay")]
#[command(about = "Send HTTP requests with retry, backoff, caching and offline queueing")]
struct Args {
    /// URLs to request (relative URLs need --base-url)
    #[arg(required = true)]
    urls: Vec<String>,

    /// HTTP method
    #[arg(short = 'X', long, default_value = "GET")]
    method: HttpMethod,

    /// Extra header as "Name: value" (repeatable)
    #[arg(short = 'H', long = "header")]
    headers: Vec<String>,

    /// Request body sent with every request
    #[arg(short = 'd', long)]
    data: Option<String>,

    /// JSON file with client configuration
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the retry budget
    #[arg(long)]
    max_retries: Option<u32>,

    /// Per-attempt timeout in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Base URL for relative request URLs
    #[arg(long)]
    base_url: Option<String>,

    /// URL probed to detect connectivity (repeatable; none = assume online)
    #[arg(long = "probe-url")]
    probe_urls: Vec<String>,

    /// Print client statistics after the results
    #[arg(long)]
    stats: bool,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

fn init_logging(debug: bool) {
    // RUST_LOG wins when set; otherwise --debug picks the level.
    match EnvFilter::try_from_default_env() {
        Ok(filter) => FmtSubscriber::builder()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .compact()
            .init(),
        Err(_) => {
            let log_level = if debug { Level::DEBUG } else { Level::INFO };
            FmtSubscriber::builder()
                .with_max_level(log_level)
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_thread_ids(false)
                .compact()
                .init()
        }
    }
}

fn load_config(args: &Args) -> Result<ClientConfig> {
    let mut config = match &args.config {
        Some(path) => ClientConfig::from_json_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => ClientConfig::default(),
    };
    if let Some(retries) = args.max_retries {
        config = config.with_max_retries(retries);
    }
    if let Some(ms) = args.timeout_ms {
        config = config.with_default_timeout(Duration::from_millis(ms));
    }
    if let Some(base) = &args.base_url {
        config = config.with_base_url(base.clone());
    }
    config.validate()?;
    Ok(config)
}

fn build_spec(args: &Args, url: &str) -> Result<RequestSpec> {
    let mut spec = RequestSpec::new(args.method, url);
    for header in &args.headers {
        let Some((name, value)) = header.split_once(':') else {
            bail!("header {:?} is not in \"Name: value\" form", header);
        };
        spec = spec.with_header(name.trim(), value.trim());
    }
    if let Some(data) = &args.data {
        spec = spec.with_body(data.clone());
    }
    Ok(spec)
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();
    init_logging(args.debug);

    let config = load_config(&args)?;
    let specs = args
        .urls
        .iter()
        .map(|url| build_spec(&args, url))
        .collect::<Result<Vec<_>>>()?;

    let transport = Arc::new(ReqwestTransport::with_user_agent(&config.user_agent)?);
    let mut builder = ResilientClient::builder(transport).config(config);
    let mut probe = None;

    if !args.probe_urls.is_empty() {
        let signal = Arc::new(ProbeSignal::new(ProbeConfig {
            probe_urls: args.probe_urls.clone(),
            ..Default::default()
        })?);
        let state = signal.check_connectivity().await;
        info!("Initial connectivity: {}", state);
        signal.start_monitoring();
        probe = Some(Arc::clone(&signal));
        builder = builder.connectivity(signal);
    }

    let client = Arc::new(builder.build()?);

    let teardown = Arc::clone(&client);
    let teardown_probe = probe.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling outstanding requests");
            teardown.cancel_all();
            if let Some(probe) = teardown_probe {
                probe.stop_monitoring();
            }
        }
    });

    info!("Sending {} request(s)", specs.len());
    let results = join_all(specs.into_iter().map(|spec| client.request(spec))).await;
    let failed = results.iter().filter(|r| !r.success).count();
    if let Some(probe) = &probe {
        probe.stop_monitoring();
    }

    println!("{}", serde_json::to_string_pretty(&results)?);
    if args.stats {
        println!("{}", serde_json::to_string_pretty(&client.get_stats())?);
    }

    if failed > 0 {
        warn!("{} of {} request(s) failed", failed, results.len());
        Ok(ExitCode::FAILURE)
    } else {
        Ok(ExitCode::SUCCESS)
    }
}
