//! `ionos-reconcile` command line.
//!
//! Reconciles one IONOS Cloud resource and prints the result object as JSON.
//!
//! ## Usage
//!
//! ```text
//! ionos-reconcile server --parent datacenter=production --name web-01 --set cores=2
//! ionos-reconcile volume --state absent --parent datacenter=production --identifier data
//! ionos-reconcile dns-record --state info --parent dns_zone=example.com --filter type=A
//! ```

#![allow(clippy::print_stdout)] // The result object goes to stdout

use std::{process::ExitCode, time::Duration};

use clap::{ArgAction, Parser};
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ionos_reconcile::{
    DesiredState, InvalidValue, IonosClient, IonosClientConfig, ParamSet, ReconcileOptions,
    ReconcileRequest, Reconciler, ResourceKind, WaitPolicy,
};

#[derive(Parser, Debug)]
#[command(name = "ionos-reconcile", version, about = "Drive an IONOS Cloud resource to a desired state")]
struct Cli {
    /// Resource kind (datacenter, server, volume, lan, k8s_cluster, k8s_nodepool, dns_zone, dns_record, registry)
    kind: ResourceKind,

    /// Desired state
    #[arg(long, default_value = "present")]
    state: DesiredState,

    /// Resource name
    #[arg(long)]
    name: Option<String>,

    /// Id or name of an existing resource (update / absent)
    #[arg(long)]
    identifier: Option<String>,

    /// Parent resource as PARAM=ID_OR_NAME, e.g. datacenter=production
    #[arg(long = "parent", value_parser = parse_key_value)]
    parents: Vec<(String, String)>,

    /// Desired property as FIELD=VALUE; VALUE is read as the field's type (text, integer, bool, JSON)
    #[arg(long = "set", value_parser = parse_key_value)]
    params: Vec<(String, String)>,

    /// Listing filter as KEY=VALUE (info)
    #[arg(long = "filter")]
    filters: Vec<String>,

    /// Allow delete + recreate when a change cannot be applied in place
    #[arg(long)]
    allow_replace: bool,

    /// Return without waiting for operations to finish
    #[arg(long)]
    no_wait: bool,

    /// Seconds to wait for each operation
    #[arg(long, default_value_t = 600)]
    wait_timeout: u64,

    /// Cloud API base URL
    #[arg(long, env = "IONOS_API_URL")]
    api_url: Option<String>,

    /// Cloud DNS API base URL
    #[arg(long, env = "IONOS_DNS_API_URL")]
    dns_api_url: Option<String>,

    /// Container Registry API base URL
    #[arg(long, env = "IONOS_CONTAINER_REGISTRY_API_URL")]
    registry_api_url: Option<String>,

    /// Bearer token (takes precedence over username/password)
    #[arg(long, env = "IONOS_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Account username
    #[arg(long, alias = "subscription-user", env = "IONOS_USERNAME")]
    username: Option<String>,

    /// Account password
    #[arg(long, alias = "subscription-password", env = "IONOS_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Expected API certificate fingerprint
    #[arg(long, env = "IONOS_CERTIFICATE_FINGERPRINT")]
    certificate_fingerprint: Option<String>,

    /// Verbose logging (-v info, -vv debug, -vvv trace)
    #[arg(long, short, action = ArgAction::Count)]
    verbose: u8,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(&cli).await {
        Ok(output) => {
            println!("{output}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("failed to set {} state {}: {e}", cli.kind, cli.state);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: &Cli) -> Result<String, Box<dyn std::error::Error>> {
    let mut cfg = IonosClientConfig::from_env()?;
    if let Some(url) = &cli.api_url {
        cfg.api_url.clone_from(url);
    }
    if let Some(url) = &cli.dns_api_url {
        cfg.dns_api_url.clone_from(url);
    }
    if let Some(url) = &cli.registry_api_url {
        cfg.container_registry_api_url.clone_from(url);
    }
    if cli.token.is_some() {
        cfg.token.clone_from(&cli.token);
    }
    if cli.username.is_some() {
        cfg.username.clone_from(&cli.username);
    }
    if cli.password.is_some() {
        cfg.password.clone_from(&cli.password);
    }
    if cli.certificate_fingerprint.is_some() {
        cfg.certificate_fingerprint.clone_from(&cli.certificate_fingerprint);
    }
    debug!(?cfg, "configuration loaded");

    let options = ReconcileOptions {
        state: cli.state,
        wait: !cli.no_wait,
        wait_policy: WaitPolicy::default().with_timeout(Duration::from_secs(cli.wait_timeout)),
        allow_replace: cli.allow_replace,
    };

    let mut request = ReconcileRequest::new(cli.kind);
    request.name.clone_from(&cli.name);
    request.identifier.clone_from(&cli.identifier);
    request.parents = cli.parents.iter().cloned().collect();
    request.filters.clone_from(&cli.filters);
    request.desired = desired_params(cli.kind, &cli.params)?;

    let reconciler = Reconciler::new(IonosClient::new(cfg)?, options);
    let outcome = reconciler.run(&request).await?;
    Ok(serde_json::to_string_pretty(&outcome.to_json())?)
}

fn init_tracing(verbose: u8) {
    // RUST_LOG wins over the verbosity flag
    let filter = if std::env::var("RUST_LOG").is_ok() {
        tracing_subscriber::EnvFilter::from_default_env()
    } else {
        let level = match verbose {
            0 => "ionos_reconcile=warn",
            1 => "ionos_reconcile=info",
            2 => "ionos_reconcile=debug",
            _ => "ionos_reconcile=trace",
        };
        tracing_subscriber::EnvFilter::new(level)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .compact(),
        )
        .init();
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected KEY=VALUE, got '{raw}'")),
    }
}

fn desired_params(
    kind: ResourceKind,
    params: &[(String, String)],
) -> Result<ParamSet, InvalidValue> {
    let spec = kind.spec();
    let mut desired = ParamSet::new();
    for (field, raw) in params {
        desired.insert(field.as_str(), spec.coerce(field, raw)?);
    }
    Ok(desired)
}
