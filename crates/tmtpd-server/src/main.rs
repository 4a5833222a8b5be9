//! TMTP server entry point.

use std::process::ExitCode;
use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use tmtpd_queue::{Doors, OhiRegistry, Registry};
use tmtpd_server::link::LinkCtx;
use tmtpd_server::{clock, config::CONFIG_FILE, listener, tls, Config};
use tmtpd_store::Store;
use tmtpd_userdb::UserDb;

const USERDB_DIR: &str = "userdb";
const QSTORE_DIR: &str = "qstore";

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(err) => {
            error!(error = %err, "runtime start failed");
            return ExitCode::from(2);
        }
    };
    match runtime.block_on(run()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "server exit");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> anyhow::Result<()> {
    info!(version = env!("CARGO_PKG_VERSION"), "tmtpd starting");

    let config = Config::load(CONFIG_FILE)
        .map_err(|err| anyhow::anyhow!("config load ({CONFIG_FILE}): {err}"))?;

    let clock = clock::acquire(&config.ntp).await?;
    info!(now = %clock.posted(), "time acquired");

    // Crash recovery over staged directory writes runs here, before the
    // listener can accept.
    let udb = Arc::new(UserDb::open(USERDB_DIR)?);
    let store = Store::open(QSTORE_DIR)?;

    let ctx = Arc::new(LinkCtx {
        store,
        udb,
        registry: Arc::new(Registry::new()),
        ohi: Arc::new(OhiRegistry::new()),
        doors: Doors::new(),
        clock,
    });

    let acceptor =
        tls::acceptor_from_files(&config.listen.cert_path, &config.listen.key_path)?;
    let tcp = tokio::net::TcpListener::bind(&config.listen.laddr).await?;

    let shutdown = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "signal handler failed");
        }
    };
    listener::serve(ctx, tcp, acceptor, shutdown).await?;
    info!("server done");
    Ok(())
}
