use std::{convert::Infallible, net::SocketAddr, path::Path, sync::Arc};

use axum::{
    Router,
    body::Body,
    extract::{ConnectInfo, Request},
    response::Response,
};
use clap::Parser;
use color_eyre::{
    Result,
    eyre::{Context, eyre},
};
use fpgate::{
    adapters::{
        FallbackTransport, HttpClientAdapter, LegacyProcessConfig, LegacyProcessSupervisor,
        ProxyHandler, legacy_supervisor::ExitCause,
    },
    config::{
        LegacyBackendKind, RoutingSettings, SettingsOverrides, SettingsValidator, load_settings,
    },
    core::FailoverRouter,
    metrics,
    ports::http_client::HttpClient,
    tracing_setup,
    utils::GracefulShutdown,
};
use tower_http::trace::TraceLayer;

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    #[clap(subcommand)]
    command: Option<Commands>,

    /// Settings file (JSON, TOML or YAML)
    #[clap(short, long, default_value = "proxySettings.json", global = true)]
    settings: String,

    /// Emit logs as JSON
    #[clap(long, global = true)]
    json_logs: bool,

    /// Log every proxied request
    #[clap(short, long, global = true)]
    verbose: bool,

    /// Proxy listen port
    #[clap(long, global = true)]
    proxy_port: Option<u16>,

    /// Archive server HTTP listen port
    #[clap(long, global = true)]
    server_http_port: Option<u16>,

    /// Archive server HTTPS listen port
    #[clap(long, global = true)]
    server_https_port: Option<u16>,

    /// Directory holding the game archives
    #[clap(long, global = true)]
    game_root_path: Option<String>,

    /// Prefix for archive server API calls
    #[clap(long, global = true)]
    api_prefix: Option<String>,

    /// Enable Mad4FP mode in the archive server
    #[clap(long, global = true)]
    use_mad4fp: Option<bool>,

    /// Port of the standing legacy service
    #[clap(long, global = true)]
    legacy_go_port: Option<u16>,

    /// Port of the supervised PHP server
    #[clap(long, global = true)]
    legacy_php_port: Option<u16>,

    /// Directory holding `php` and `router.php`
    #[clap(long, global = true)]
    legacy_php_path: Option<String>,

    /// Spawn and supervise the PHP server instead of using a standing service
    #[clap(long, global = true)]
    legacy_use_php_server: Option<bool>,

    /// Legacy htdocs directory
    #[clap(long, global = true)]
    legacy_htdocs_path: Option<String>,

    /// Path to the PHP CGI executable
    #[clap(long, global = true)]
    php_cgi_path: Option<String>,
}

#[derive(Parser, Debug)]
enum Commands {
    /// Start the failover proxy (default)
    Serve,
    /// Validate the settings file and exit
    Validate,
    /// Write a default settings file
    Init,
}

impl Args {
    fn overrides(&self) -> SettingsOverrides {
        SettingsOverrides {
            verbose_logging: self.verbose.then_some(true),
            proxy_port: self.proxy_port,
            server_http_port: self.server_http_port,
            server_https_port: self.server_https_port,
            game_root_path: self.game_root_path.clone(),
            api_prefix: self.api_prefix.clone(),
            use_mad4fp: self.use_mad4fp,
            legacy_go_port: self.legacy_go_port,
            legacy_php_port: self.legacy_php_port,
            legacy_php_path: self.legacy_php_path.clone(),
            legacy_use_php_server: self.legacy_use_php_server,
            legacy_htdocs_path: self.legacy_htdocs_path.clone(),
            php_cgi_path: self.php_cgi_path.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();

    match args.command {
        Some(Commands::Validate) => return validate_settings_command(&args).await,
        Some(Commands::Init) => return init_settings_command(&args.settings).await,
        Some(Commands::Serve) | None => {}
    }

    let settings = resolve_settings(&args).await?;
    SettingsValidator::validate(&settings).wrap_err("Invalid settings")?;

    tracing_setup::init_tracing(settings.verbose_logging, args.json_logs)
        .map_err(|e| eyre!("Failed to initialize tracing: {}", e))?;
    metrics::init_metrics()?;

    let settings = Arc::new(settings);

    tracing::info!("Proxy server starting on port {}", settings.proxy_port);
    tracing::info!(
        "Archive server expected on HTTP port {}, HTTPS port {}, game root {}",
        settings.server_http_port,
        settings.server_https_port,
        settings.game_root_path
    );

    let graceful_shutdown = Arc::new(GracefulShutdown::new());
    let signal_handler_shutdown = graceful_shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = signal_handler_shutdown.run_signal_handler().await {
            tracing::error!("Signal handler error: {}", e);
        }
    });

    let legacy_task = match settings.legacy_kind() {
        LegacyBackendKind::ManagedProcess => {
            let supervisor = LegacyProcessSupervisor::new(LegacyProcessConfig::php_builtin_server(
                Path::new(&settings.legacy_php_path),
                settings.legacy_php_port,
            ));
            let token = graceful_shutdown.shutdown_token();
            Some(tokio::spawn(async move {
                match supervisor.run(token).await {
                    Ok(exit) => {
                        if exit.cause == ExitCause::ProcessExited {
                            tracing::error!(
                                "Legacy PHP server stopped ({:?}); fallback requests will fail",
                                exit.status
                            );
                        }
                        Some(exit.cause)
                    }
                    Err(e) => {
                        tracing::error!("Legacy PHP server unavailable: {}", e);
                        None
                    }
                }
            }))
        }
        LegacyBackendKind::StandingService => {
            tracing::info!(
                "Using standing legacy service on 127.0.0.1:{}",
                settings.legacy_go_port
            );
            None
        }
    };

    let primary: Arc<dyn HttpClient> =
        Arc::new(HttpClientAdapter::new().context("Failed to create archive client")?);
    let legacy: Arc<dyn HttpClient> = Arc::new(
        FallbackTransport::new(settings.legacy_port())
            .context("Failed to create legacy fallback transport")?,
    );
    tracing::info!(
        "Legacy fallback ({}) pinned to 127.0.0.1:{}",
        settings.legacy_kind(),
        settings.legacy_port()
    );

    let router = Arc::new(FailoverRouter::new(settings.clone(), primary, legacy));
    let handler = Arc::new(ProxyHandler::new(router));

    let app = Router::new()
        .fallback(
            move |ConnectInfo(client_addr): ConnectInfo<SocketAddr>, req: Request| {
                let handler = handler.clone();
                async move {
                    match handler.handle_request(req, Some(client_addr)).await {
                        Ok(response) => Ok::<Response<Body>, Infallible>(response),
                        Err(e) => {
                            tracing::error!("Request handling error: {:?}", e);
                            let mut response = Response::new(Body::from("Internal Server Error"));
                            *response.status_mut() = axum::http::StatusCode::INTERNAL_SERVER_ERROR;
                            Ok(response)
                        }
                    }
                }
            },
        )
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("127.0.0.1:{}", settings.proxy_port)
        .parse()
        .context("Failed to parse listen address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind proxy port {addr}"))?;

    tracing::info!("fpgate proxy listening on {}", addr);

    tokio::select! {
        result = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        ) => {
            result.context("Server error")?;
        },
        shutdown_reason = graceful_shutdown.wait_for_shutdown_signal() => {
            tracing::info!("Shutdown signal received: {:?}", shutdown_reason);
        }
    }

    if let Some(task) = legacy_task {
        match task.await {
            Ok(Some(ExitCause::Shutdown(_))) => {
                tracing::info!("Legacy PHP server terminated");
                std::process::exit(1);
            }
            Ok(_) => {}
            Err(e) => tracing::error!("Legacy supervisor task failed: {}", e),
        }
    }

    Ok(())
}

async fn resolve_settings(args: &Args) -> Result<RoutingSettings> {
    let mut settings = load_settings(&args.settings)
        .await
        .with_context(|| format!("Failed to load settings from {}", args.settings))?;
    args.overrides().apply(&mut settings)?;
    Ok(settings)
}

/// Validate settings file and exit
async fn validate_settings_command(args: &Args) -> Result<()> {
    println!("🔍 Validating settings file: {}", args.settings);

    if !Path::new(&args.settings).exists() {
        eprintln!("❌ Error: Settings file '{}' not found", args.settings);
        std::process::exit(1);
    }

    let settings = match resolve_settings(args).await {
        Ok(settings) => {
            println!("✅ Settings parsing: OK");
            settings
        }
        Err(e) => {
            eprintln!("❌ Settings parsing failed:");
            eprintln!("   {e}");
            std::process::exit(1);
        }
    };

    match SettingsValidator::validate(&settings) {
        Ok(()) => {
            println!("✅ Settings validation: OK");
            println!();
            println!("📋 Settings Summary:");
            println!("   • Proxy Port: {}", settings.proxy_port);
            println!(
                "   • Archive Ports: {} (HTTP), {} (HTTPS)",
                settings.server_http_port, settings.server_https_port
            );
            println!(
                "   • Legacy Backend: {} on port {}",
                settings.legacy_kind(),
                settings.legacy_port()
            );
            println!("   • MIME Types: {}", settings.ext_mime_types.len());
            Ok(())
        }
        Err(e) => {
            eprintln!("❌ Settings validation failed:");
            eprintln!("{e}");
            std::process::exit(1);
        }
    }
}

/// Write a default settings file
async fn init_settings_command(settings_path: &str) -> Result<()> {
    let path = Path::new(settings_path);
    if path.exists() {
        eprintln!("❌ Error: Settings file '{settings_path}' already exists");
        std::process::exit(1);
    }

    let contents = serde_json::to_string_pretty(&RoutingSettings::default())
        .context("Failed to serialize default settings")?;
    tokio::fs::write(path, contents)
        .await
        .context("Failed to write settings file")?;
    println!("✅ Created default settings at: {settings_path}");
    println!("   Run 'fpgate --settings {settings_path}' to start the proxy");
    Ok(())
}
