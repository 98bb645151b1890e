use std::{future::IntoFuture, net::SocketAddr, path::Path, sync::Arc, time::Duration};

use clap::Parser;
use color_eyre::{
    Result,
    eyre::{WrapErr, eyre},
};
use waypoint::{
    adapters::{
        HttpClientAdapter, HttpHandler, InMemoryIdentityProvider, MemoryBucketStore,
        RedisBucketStore, TokenService, build_router, spawn_purge_task,
    },
    config::{
        ConfigValidator, GatewayConfig, RateLimitStore, STARTER_CONFIG, load_config,
    },
    core::{GatewayService, TokenBucketLimiter},
    ports::{bucket_store::BucketStore, http_client::HttpClient, identity::IdentityProvider},
    tracing_setup,
    utils::GracefulShutdown,
};

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    #[clap(subcommand)]
    command: Option<Commands>,

    /// Configuration file (YAML, JSON or TOML); defaults and WAYPOINT_* env vars apply without one
    #[clap(short, long)]
    config: Option<String>,
}

#[derive(Parser, Debug)]
enum Commands {
    /// Validate configuration file
    Validate {
        #[clap(short, long)]
        config: Option<String>,
    },
    /// Write a commented starter configuration file
    Init {
        #[clap(short, long, default_value = "waypoint.yaml")]
        config: String,
    },
    /// Start the gateway server (default)
    Serve {
        #[clap(short, long)]
        config: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();

    match args.command {
        Some(Commands::Validate { config }) => validate_config_command(config.or(args.config)),
        Some(Commands::Init { config }) => init_config_command(&config).await,
        Some(Commands::Serve { config }) => serve(config.or(args.config)).await,
        None => serve(args.config).await,
    }
}

async fn build_bucket_store(
    config: &GatewayConfig,
) -> Result<(Arc<dyn BucketStore>, Option<tokio::task::JoinHandle<()>>)> {
    match config.rate_limit.store {
        RateLimitStore::Memory => {
            let store = Arc::new(MemoryBucketStore::new());
            let purge = spawn_purge_task(
                store.clone(),
                Duration::from_secs(config.rate_limit.window_secs.max(1)),
            );
            Ok((store, Some(purge)))
        }
        RateLimitStore::Redis => {
            let url = config
                .redis
                .as_ref()
                .map(|redis| redis.url.as_str())
                .ok_or_else(|| eyre!("rate_limit.store is redis but redis.url is not set"))?;
            let store = RedisBucketStore::connect(url)
                .await
                .wrap_err("Failed to connect to redis")?;
            Ok((Arc::new(store), None))
        }
    }
}

async fn serve(config_path: Option<String>) -> Result<()> {
    let config = load_config(config_path.as_deref()).wrap_err("Failed to load configuration")?;
    tracing_setup::init_tracing(&config.logging).wrap_err("Failed to initialize tracing")?;

    ConfigValidator::validate(&config).wrap_err("Invalid configuration")?;
    for field in config.placeholder_credentials() {
        tracing::warn!(field = %field, "Running in production with a placeholder credential");
    }

    let (bucket_store, purge_task) = build_bucket_store(&config).await?;
    tracing::info!(store = bucket_store.name(), "Rate limit store ready");
    let limiter = TokenBucketLimiter::from_config(bucket_store, &config.rate_limit);

    let identity: Arc<dyn IdentityProvider> = Arc::new(
        InMemoryIdentityProvider::with_seed_users(&config.users)
            .wrap_err("Failed to seed users")?,
    );
    let tokens = Arc::new(TokenService::from_config(&config.jwt)?);

    let http_client: Arc<dyn HttpClient> =
        Arc::new(HttpClientAdapter::new().wrap_err("Failed to create HTTP client adapter")?);
    let gateway = Arc::new(GatewayService::new(&config, http_client));
    tracing::info!(
        services = gateway.registry().len(),
        "Service registry loaded"
    );

    let app = build_router(
        HttpHandler::new(gateway, identity, tokens, limiter),
        &config,
    );

    let addr = config.server.listen_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .wrap_err_with(|| format!("Failed to bind to {addr}"))?;
    tracing::info!(
        addr = %addr,
        environment = %config.server.environment,
        "Waypoint gateway listening"
    );

    let shutdown = Arc::new(GracefulShutdown::with_timeout(Duration::from_secs(
        config.server.shutdown_grace_secs,
    )));
    let signal_task = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { shutdown.run_signal_handler().await })
    };

    let mut token = shutdown.shutdown_token();
    let server = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        token.wait_for_shutdown().await;
        tracing::info!("No longer accepting connections, draining in-flight requests");
    });

    tokio::select! {
        result = server.into_future() => {
            result.wrap_err("Server error")?;
            tracing::info!("Graceful shutdown completed");
        }
        _ = shutdown.grace_expired() => {}
    }

    if let Some(purge) = purge_task {
        purge.abort();
    }
    signal_task.abort();
    Ok(())
}

/// Validate configuration file and exit
fn validate_config_command(config_path: Option<String>) -> Result<()> {
    let source = config_path.as_deref().unwrap_or("<defaults + environment>");
    println!("🔍 Validating configuration: {source}");

    if let Some(path) = config_path.as_deref() {
        if !Path::new(path).exists() {
            eprintln!("❌ Error: Configuration file '{path}' not found");
            std::process::exit(1);
        }
    }

    let config = match load_config(config_path.as_deref()) {
        Ok(config) => {
            println!("✅ Configuration parsing: OK");
            config
        }
        Err(e) => {
            eprintln!("❌ Configuration parsing failed:");
            eprintln!("   {e:#}");
            std::process::exit(1);
        }
    };

    match ConfigValidator::validate(&config) {
        Ok(()) => {
            println!("✅ Configuration validation: OK");
            println!();
            println!("📋 Configuration Summary:");
            println!("   • Listen Address: {}", config.server.listen_addr());
            println!("   • Environment: {}", config.server.environment);
            println!("   • Services: {}", config.services.len());
            println!("   • Seed Users: {}", config.users.len());
            println!(
                "   • Rate Limit: {} requests / {}s ({:?} store)",
                config.rate_limit.requests, config.rate_limit.window_secs, config.rate_limit.store
            );
            for field in config.placeholder_credentials() {
                println!("⚠️  Warning: {field} still uses a placeholder value");
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("❌ Configuration validation failed:");
            eprintln!("{e}");
            std::process::exit(1);
        }
    }
}

/// Write the starter configuration, refusing to overwrite an existing file.
async fn init_config_command(config_path: &str) -> Result<()> {
    let path = Path::new(config_path);
    if path.exists() {
        eprintln!("❌ Error: Configuration file '{config_path}' already exists");
        std::process::exit(1);
    }

    tokio::fs::write(path, STARTER_CONFIG)
        .await
        .wrap_err("Failed to write config file")?;
    println!("✅ Created starter configuration at: {config_path}");
    println!("   Run 'waypoint serve --config {config_path}' to start the gateway");
    Ok(())
}
