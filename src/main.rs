use std::env;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::process::ExitCode;
use std::sync::Arc;

use booking_ledger::csv::{read_bookings, write_report};
use booking_ledger::gateway::OfflineGateway;
use booking_ledger::notify::LogNotifier;
use booking_ledger::{Config, EventProcessor, Ledger, ProviderEvent, Store};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(io::stderr)
        .init();
    dotenvy::dotenv().ok();

    let args: Vec<String> = env::args().skip(1).collect();
    let [bookings_path, events_path] = args.as_slice() else {
        eprintln!("usage: booking-ledger <bookings.csv> <events.jsonl>");
        return ExitCode::from(2);
    };

    if !bookings_path.ends_with(".csv") {
        warn!(path = %bookings_path, "bookings file seems to not be a csv file");
    }

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let ledger = Arc::new(
        Ledger::new(Arc::new(Store::new())).with_reference_prefix(config.reference_prefix.clone()),
    );

    let rows = match read_bookings(bookings_path) {
        Ok(rows) => rows,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };
    for row in rows {
        match row {
            Ok(new) => {
                if let Err(e) = ledger.open_booking(new, config.payment_deadline).await {
                    warn!("{e}");
                }
            }
            Err(e) => warn!("{e}"),
        }
    }

    let events = match File::open(events_path) {
        Ok(file) => file,
        Err(e) => {
            error!(path = %events_path, "cannot open events file: {e}");
            return ExitCode::FAILURE;
        }
    };

    let processor = EventProcessor::new(
        Arc::clone(&ledger),
        Arc::new(OfflineGateway),
        Arc::new(LogNotifier),
        config,
    );
    let (event_sender, event_receiver) = tokio::sync::mpsc::channel(16);

    tokio::spawn(async move {
        for (idx, line) in BufReader::new(events).lines().enumerate() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    warn!("events file: {e}");
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            match ProviderEvent::from_slice(line.as_bytes()) {
                Ok(event) => {
                    if event_sender.send(event).await.is_err() {
                        break;
                    }
                }
                Err(e) => warn!("line {}: {e}", idx + 1),
            }
        }
    });

    processor.run(ReceiverStream::new(event_receiver)).await;

    let mut bookings = Vec::new();
    for id in ledger.store().booking_ids().await {
        if let Err(e) = ledger.audit(id).await {
            warn!("{e}");
        }
        if let Some(booking) = ledger.store().booking(id).await {
            bookings.push(booking);
        }
    }

    if let Err(e) = write_report(io::stdout().lock(), &bookings) {
        error!("failed to write report: {e}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
