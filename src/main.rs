use std::net::Ipv4Addr;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info};

use tickgate::config::STATS_REPORT_INTERVAL_SECS;
use tickgate::handlers::{MarketDataHandler, OrderHandler, SessionHandler};
use tickgate::server::{Server, ServerConfig};
use tickgate::stats::spawn_reporter;
use tickgate::wire::MessageType;

#[derive(Parser)]
#[command(name = "tickgate", about = "Low-latency TCP trading message server")]
struct Args {
    /// Listen address
    #[arg(long, default_value = "127.0.0.1")]
    ip: Ipv4Addr,

    /// Listen port
    #[arg(long, default_value_t = 8888)]
    port: u16,

    /// Worker thread count
    #[arg(long, default_value_t = 4)]
    threads: usize,
}

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

extern "C" fn on_signal(_sig: libc::c_int) {
    SHUTDOWN.store(true, Ordering::Release);
}

fn install_signal_handlers() {
    unsafe {
        libc::signal(libc::SIGINT, on_signal as libc::sighandler_t);
        libc::signal(libc::SIGTERM, on_signal as libc::sighandler_t);
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    if args.port == 0 {
        error!("invalid configuration: port must be non-zero");
        return ExitCode::FAILURE;
    }

    install_signal_handlers();

    let config = ServerConfig {
        ip: args.ip,
        port: args.port,
        threads: args.threads,
    };
    let mut server = match Server::initialize(config) {
        Ok(server) => server,
        Err(e) => {
            error!(error = %e, "initialization failed");
            return ExitCode::FAILURE;
        }
    };

    let registry = server.registry();
    let order_handler = Arc::new(OrderHandler::new(server.buffer_pool()));
    registry.register(MessageType::OrderNew, order_handler.clone());
    registry.register(MessageType::OrderCancel, order_handler.clone());
    registry.register(MessageType::OrderReplace, order_handler);
    registry.register(MessageType::MarketData, Arc::new(MarketDataHandler::new()));
    let session_handler = Arc::new(SessionHandler::new());
    registry.register(MessageType::Heartbeat, session_handler.clone());
    registry.register(MessageType::Login, session_handler.clone());
    registry.register(MessageType::Logout, session_handler);

    server.start();
    info!(addr = %server.local_addr(), "ready");

    let reporter_running = Arc::new(AtomicBool::new(true));
    let reporter = spawn_reporter(
        server.stats(),
        reporter_running.clone(),
        Duration::from_secs(STATS_REPORT_INTERVAL_SECS),
    );

    while !SHUTDOWN.load(Ordering::Acquire) {
        std::thread::sleep(Duration::from_millis(10));
    }

    info!("signal received, shutting down");
    reporter_running.store(false, Ordering::Release);
    server.stop();
    let _ = reporter.join();
    info!("shutdown complete");
    ExitCode::SUCCESS
}
