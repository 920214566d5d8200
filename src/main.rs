use std::env;
use std::io;
use std::process::ExitCode;
use std::sync::Arc;

use bourse::config::{self, Settings};
use bourse::csv::{read_catalog, read_sales, write_stats};
use bourse::{AdminPin, MemoryLedger, Scheduler, SystemClock};
use tokio::sync::{mpsc, watch};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::{BroadcastStream, ReceiverStream};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage: bourse <catalog.csv> [sales.csv] [--evaluate]";

#[tokio::main]
async fn main() -> ExitCode {
    config::load_dotenv();
    let settings = Settings::from_env();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&settings.log_filter)),
        )
        .with_writer(io::stderr)
        .init();

    let mut evaluate_once = false;
    let mut paths = Vec::new();
    for arg in env::args().skip(1) {
        if arg == "--evaluate" {
            evaluate_once = true;
        } else {
            paths.push(arg);
        }
    }
    let (catalog_path, sales_path) = match paths.as_slice() {
        [catalog] => (catalog.clone(), None),
        [catalog, sales] => (catalog.clone(), Some(sales.clone())),
        _ => {
            eprintln!("{USAGE}");
            return ExitCode::from(2);
        }
    };

    let catalog = match read_catalog(&catalog_path) {
        Ok(catalog) => catalog,
        Err(e) => {
            error!(path = %catalog_path, "{e}");
            return ExitCode::FAILURE;
        }
    };
    info!(drinks = catalog.len(), "catalog loaded");

    if !settings.admin_pin_configured {
        warn!("BOURSE_ADMIN_PIN not set, using the built-in default pin");
    }

    let scheduler = Arc::new(Scheduler::new(
        catalog,
        Arc::new(MemoryLedger::new()),
        Arc::new(SystemClock),
        Arc::new(AdminPin::new(settings.admin_pin.clone())),
        settings.scheduler(),
    ));

    if let Some(path) = sales_path {
        let sales = match read_sales(path.clone()) {
            Ok(sales) => sales,
            Err(e) => {
                error!(path = %path, "{e}");
                return ExitCode::FAILURE;
            }
        };
        let (sale_sender, sale_receiver) = mpsc::channel(16);
        tokio::spawn(async move {
            for result in sales {
                match result {
                    Ok(sale) => {
                        if sale_sender.send(sale).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("{e}"),
                }
            }
        });
        let recorded = scheduler.ingest(ReceiverStream::new(sale_receiver)).await;
        info!(recorded, "sales file ingested");
    }

    if evaluate_once {
        if let Err(e) = scheduler.trigger_evaluation_now().await {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    } else {
        serve(Arc::clone(&scheduler)).await;
    }

    let stats = match scheduler.stats() {
        Ok(stats) => stats,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = write_stats(
        io::stdout().lock(),
        scheduler.catalog(),
        &stats,
        scheduler.current_discount(),
    ) {
        error!("{e}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

/// Run the cadence until Ctrl-C, logging every observer event.
async fn serve(scheduler: Arc<Scheduler>) {
    let mut events = BroadcastStream::new(scheduler.subscribe());
    tokio::spawn(async move {
        while let Some(event) = events.next().await {
            match event {
                Ok(event) => info!(?event, "observer event"),
                Err(e) => warn!("{e}"),
            }
        }
    });

    let (shutdown, shutdown_rx) = watch::channel(false);
    let cadence = tokio::spawn(Arc::clone(&scheduler).run(shutdown_rx));

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("cannot listen for shutdown signal: {e}");
    }
    info!("shutting down");
    // the loop also stops if the receiver is gone, so a failed send is fine
    let _ = shutdown.send(true);
    if let Err(e) = cadence.await {
        error!("cadence task failed: {e}");
    }
}
