//! Interface tests for correlation using Cucumber.
//!
//! These scenarios verify that message correlation behaves the same over
//! every process instance store. Select a backend via environment variable:
//!
//! ```bash
//! # SQLite (default)
//! cargo test --test interfaces --features sqlite
//!
//! # In-memory
//! STORAGE_BACKEND=memory cargo test --test interfaces
//! ```

mod backend;
mod steps;

use cucumber::World;
use steps::correlation::CorrelationWorld;

#[tokio::main]
async fn main() {
    println!("\n=== Running Correlation Interface Tests ===\n");
    CorrelationWorld::cucumber()
        .fail_on_skipped()
        .run_and_exit("tests/interfaces/features/correlation.feature")
        .await;
}
