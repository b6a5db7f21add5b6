//! bam-monitor: activity monitor over a message stream
//!
//! Reads newline-delimited JSON messages from stdin, correlates each one to
//! its process instance and records the configured activity against it.
//!
//! ## Architecture
//! ```text
//! stdin (NDJSON) --> [Correlator] --> [ActivityHandler] --> storage
//! ```
//!
//! ## Configuration
//! - BAM_CONFIG: Path to YAML configuration (optional)
//! - BAM__STORAGE__TYPE: memory | sqlite (default: sqlite)
//! - BAM__MONITOR__ACTIVITY: Activity recorded for each message
//! - BAM_LOG: Log filter (default: info)
//!
//! Each line is `{"headers": {...}, "body": ...}`. Lines that do not parse
//! are logged and skipped.

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

use bam::config::Config;
use bam::correlation::{ActivityHandler, CorrelationError, CorrelatorBuilder};
use bam::message::Message;
use bam::model::ProcessInstance;
use bam::storage::init_storage;
use bam::utils::bootstrap::init_tracing;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config_path = std::env::args().nth(1);
    let config = Config::load(config_path.as_deref())?;

    let store = init_storage(&config.storage).await?;
    let rules = config.monitor.activity_rules();

    let correlator = CorrelatorBuilder::<ProcessInstance, Message>::new(
        store,
        config.monitor.key.extractor(),
    )
    .config(config.correlation.clone())
    .handler(ActivityHandler::new(
        config.monitor.process_definition(),
        rules.clone(),
    ))
    .build()?;

    info!(
        process = %config.monitor.process,
        activity = %rules.name,
        query = %correlator.find_by_key_query(),
        "bam-monitor started"
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut processed = 0u64;
    let mut failed = 0u64;

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        };
        let Some(line) = line else {
            break;
        };
        if line.trim().is_empty() {
            continue;
        }

        let message: Message = match serde_json::from_str(&line) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "Skipping malformed message");
                failed += 1;
                continue;
            }
        };

        match correlator.process(&message).await {
            Ok(outcome) => {
                processed += 1;
                let completed = outcome
                    .entity
                    .get_activity_state(&rules)
                    .is_some_and(|state| state.is_completed());
                info!(
                    key = %outcome.key,
                    instance = %outcome.entity,
                    created = outcome.created,
                    completed,
                    "Message correlated"
                );
            }
            Err(e @ CorrelationError::MissingCorrelationKey)
            | Err(e @ CorrelationError::InvalidCorrelationKey(_)) => {
                failed += 1;
                warn!(error = %e, "Message rejected");
            }
            Err(e) => {
                failed += 1;
                error!(error = %e, "Correlation failed");
            }
        }
    }

    info!(processed, failed, "bam-monitor stopped");
    Ok(())
}
