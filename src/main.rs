use clap::Parser;
use mimalloc::MiMalloc;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::{net::TcpListener, signal};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

const DEFAULT_ADDR: &str = ":9880";
const DEFAULT_DB: &str = "~/.config/maxx/maxx.db";

/// Multi-protocol AI reverse proxy.
#[derive(Parser, Debug)]
#[command(name = "pollux", about = "Multi-protocol AI reverse proxy")]
struct Cli {
    /// Listen address, e.g. ":9880" or "127.0.0.1:9880".
    #[arg(long, default_value = DEFAULT_ADDR)]
    addr: String,

    /// SQLite database path.
    #[arg(long, default_value = DEFAULT_DB)]
    db: String,
}

/// Parses the Go-style `[host]:port` shorthand the `--addr` flag accepts;
/// an empty host binds all interfaces.
fn parse_listen_addr(raw: &str) -> Result<(IpAddr, u16), Box<dyn std::error::Error>> {
    let (host, port) = raw
        .rsplit_once(':')
        .ok_or_else(|| format!("invalid --addr {raw:?}: expected [host]:port"))?;
    let port: u16 = port.parse()?;
    let ip = if host.is_empty() {
        IpAddr::V4(Ipv4Addr::UNSPECIFIED)
    } else {
        host.parse()?
    };
    Ok((ip, port))
}

/// Expands a leading `~/` against `$HOME`, since sqlite connection strings
/// are passed straight through to `sqlx` with no shell involved to do it.
fn expand_home(raw: &str) -> String {
    match raw.strip_prefix("~/") {
        Some(rest) => match std::env::var("HOME") {
            Ok(home) => format!("{home}/{rest}"),
            Err(_) => raw.to_string(),
        },
        None => raw.to_string(),
    }
}

#[tokio::main]
async fn main() {
    // `Config::from_toml()` and friends panic on a missing/invalid config
    // file rather than returning a `Result`; translate that into the exit
    // code spec.md requires for any fatal startup failure.
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        default_hook(info);
        std::process::exit(1);
    }));

    if let Err(err) = run().await {
        error!("fatal startup failure: {err}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let (listen_addr, listen_port) = parse_listen_addr(&cli.addr)?;
    let db_path = expand_home(&cli.db);

    // The server binary requires a real config file with a non-empty pollux_key.
    // (Library code uses `config::CONFIG` which is best-effort and does not validate.)
    let mut cfg = pollux::config::Config::from_toml();
    cfg.basic.listen_addr = listen_addr;
    cfg.basic.listen_port = listen_port;
    cfg.basic.database_url = format!("sqlite://{db_path}");

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cfg.basic.loglevel.clone()));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                // .compact()
                .with_level(true)
                .with_target(false),
        )
        .init();

    let db = pollux::db::spawn(cfg.basic.database_url.as_str()).await;
    let providers = pollux::providers::Providers::spawn(db.clone(), &cfg).await;
    // Build axum router and serve
    let pollux_key: Arc<str> = Arc::from(cfg.basic.pollux_key.clone());
    let state = pollux::server::router::PolluxState::new(providers, pollux_key, false);
    let app = pollux::server::router::pollux_router(state);

    let addr = SocketAddr::from((cfg.basic.listen_addr, cfg.basic.listen_port));
    let listener = TcpListener::bind(addr).await?;
    info!("HTTP server listening on {}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("Server has shut down gracefully.");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => { /* ... */ },
        _ = terminate => { /* ... */ },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_listen_addr_bind_all_shorthand() {
        let (ip, port) = parse_listen_addr(":9880").unwrap();
        assert_eq!(ip, IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        assert_eq!(port, 9880);
    }

    #[test]
    fn parse_listen_addr_explicit_host() {
        let (ip, port) = parse_listen_addr("127.0.0.1:8080").unwrap();
        assert_eq!(ip, IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)));
        assert_eq!(port, 8080);
    }

    #[test]
    fn parse_listen_addr_rejects_missing_colon() {
        assert!(parse_listen_addr("9880").is_err());
    }

    #[test]
    fn expand_home_replaces_tilde_prefix() {
        unsafe {
            std::env::set_var("HOME", "/home/pollux");
        }
        assert_eq!(expand_home("~/.config/maxx/maxx.db"), "/home/pollux/.config/maxx/maxx.db");
        assert_eq!(expand_home("/abs/path.db"), "/abs/path.db");
    }
}
