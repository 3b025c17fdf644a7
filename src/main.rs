//! dbbridge - run ad-hoc SQL against the connections saved in DBeaver.

use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use dbeaver_bridge::cli::{read_password, read_sql_arg, Cli, Command};
use dbeaver_bridge::config::Config;
use dbeaver_bridge::connection::ConnectionCache;
use dbeaver_bridge::error::{BridgeError, Result};
use dbeaver_bridge::logging;
use dbeaver_bridge::query::QueryService;
use dbeaver_bridge::secrets::KeyringResolver;

fn main() {
    let cli = Cli::parse_args();
    logging::init_stderr_logging(logging::level_for_verbosity(cli.verbose, cli.quiet));

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Internal Error: failed to start runtime: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(run(cli)) {
        eprintln!("{}: {}", e.category(), e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config_path();
    debug!("Loading config from: {}", config_path.display());
    let mut config = Config::load_from_file(&config_path)?;
    cli.apply(&mut config)?;

    let service = QueryService::new(Arc::new(ConnectionCache::new(config.store_source())))
        .with_resolver(config.credential_resolver())
        .with_options(config.execution_options());

    match cli.command {
        Command::Classify { sql } => {
            let sql = read_sql_arg(&sql)?;
            print_json(&service.classify(&sql))
        }
        Command::Reload => {
            let report = service.reload().await?;
            print_json(&report)
        }
        Command::List => {
            service.reload().await?;
            print_json(&service.list_connections())
        }
        Command::Show { id } => {
            service.reload().await?;
            print_json(&*service.get_connection(&id)?)
        }
        Command::Exec {
            id, sql, confirm, ..
        } => {
            let sql = read_sql_arg(&sql)?;
            service.reload().await?;

            let token = CancellationToken::new();
            let on_interrupt = token.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Interrupted, cancelling query");
                    on_interrupt.cancel();
                }
            });

            let result = service
                .execute_query_cancellable(&id, &sql, confirm, token)
                .await?;
            if let Some(warning) = result.truncation_warning() {
                warn!("{warning}");
            }
            print_json(&result)
        }
        Command::SetPassword { id } => {
            service.reload().await?;
            let connection = service.get_connection(&id)?;
            let password = read_password(std::io::stdin().lock())?;
            KeyringResolver::default().store(&connection.id, &password)?;
            info!("Saved keyring password for connection '{}'", connection.id);
            if !config.credentials.keyring {
                warn!("Keyring lookups are off; set [credentials] keyring = true to use it");
            }
            Ok(())
        }
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| BridgeError::internal(format!("Failed to serialize output: {e}")))?;
    println!("{json}");
    Ok(())
}
