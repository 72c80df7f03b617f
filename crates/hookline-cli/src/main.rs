//! hookline - wiring demo and signature helpers for endpoint owners.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use hookline_core::config::HooklineConfig;
use hookline_core::domain::{DomainEvent, NewEndpoint, OwnerId, UserPayload};
use hookline_core::impls::{LocalEventBus, RecordingTransport};
use hookline_core::ports::EventBus;
use hookline_core::typed::Job;
use hookline_core::webhooks::signature;
use hookline_core::webhooks::{Backends, DeliverWebhook, WebhookStack};

#[derive(Parser)]
#[command(name = "hookline")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register an endpoint, emit `user.created` and report what happened
    Demo(DemoArgs),

    /// Print the X-Webhook-Signature header for a payload
    Sign(SignArgs),

    /// Check an X-Webhook-Signature header against a payload
    Verify(VerifyArgs),
}

#[derive(Args)]
struct DemoArgs {
    /// Endpoint that receives the delivery
    #[arg(long, default_value = "https://receiver.invalid/hook")]
    url: String,

    /// Record requests in memory instead of sending them
    #[arg(long)]
    dry_run: bool,

    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Seconds to wait for queued deliveries to settle
    #[arg(long, default_value_t = 10)]
    wait_secs: u64,
}

#[derive(Args)]
struct SignArgs {
    #[arg(long, env = "HOOKLINE_SECRET")]
    secret: String,

    /// Raw request body
    payload: String,
}

#[derive(Args)]
struct VerifyArgs {
    #[arg(long, env = "HOOKLINE_SECRET")]
    secret: String,

    /// Header value, `sha256=<hex>`
    #[arg(long)]
    signature: String,

    /// Raw request body
    payload: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .try_init()
        .context("failed to initialise logging")?;

    match cli.command {
        Commands::Demo(args) => demo(args).await,
        Commands::Sign(args) => {
            let header = signature::signature_header(&args.secret, args.payload.as_bytes())?;
            println!("{header}");
            Ok(())
        }
        Commands::Verify(args) => {
            if signature::verify_header(&args.secret, args.payload.as_bytes(), &args.signature) {
                println!("valid");
                Ok(())
            } else {
                bail!("signature does not match payload")
            }
        }
    }
}

async fn demo(args: DemoArgs) -> Result<()> {
    let config = match &args.config {
        Some(path) => {
            info!("Loading configuration from {:?}", path);
            HooklineConfig::load(path)?
        }
        None => HooklineConfig::default(),
    };

    let backends = if args.dry_run {
        Backends::in_memory(Arc::new(RecordingTransport::new()))
    } else {
        Backends::in_memory_http(&config)?
    };
    let stack = WebhookStack::build(&config, backends).await?;
    let bus = LocalEventBus::new();
    stack.subscribe(&bus);
    let workers = stack.start();

    let owner = OwnerId::new("demo");
    let service = stack.service();
    let created = service
        .create_webhook(
            &owner,
            NewEndpoint {
                url: args.url.clone(),
                events: vec!["user.created".into()],
                ..NewEndpoint::default()
            },
        )
        .await?;
    let endpoint_id = created.endpoint.id;
    info!(endpoint_id = %endpoint_id, url = %args.url, "endpoint registered");
    println!("endpoint secret: {}", created.secret);

    let listeners = bus
        .emit(DomainEvent::UserCreated(UserPayload {
            id: "user_1".into(),
            email: Some("ada@example.com".into()),
            name: Some("Ada".into()),
        }))
        .await;
    info!(listeners, "user.created emitted");

    let deadline = tokio::time::Instant::now() + Duration::from_secs(args.wait_secs);
    tokio::select! {
        settled = wait_until_settled(&stack, deadline) => {
            if !settled? {
                info!("deliveries still pending; retries continue in the background until shutdown");
            }
        }
        _ = tokio::signal::ctrl_c() => info!("interrupted"),
    }

    let stats = service.get_stats(&owner, endpoint_id).await?;
    println!("{}", serde_json::to_string_pretty(&stats)?);

    workers.shutdown_and_join().await;
    Ok(())
}

/// `true` once nothing is waiting, delayed or active on the delivery queue.
async fn wait_until_settled(stack: &WebhookStack, deadline: tokio::time::Instant) -> Result<bool> {
    loop {
        let counts = stack.queue().counts(DeliverWebhook::QUEUE).await?;
        if counts.waiting + counts.delayed + counts.active == 0 {
            return Ok(true);
        }
        if tokio::time::Instant::now() >= deadline {
            return Ok(false);
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}
