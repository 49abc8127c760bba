//! Buying and eating groceries: each item is a key, so the steps for one
//! item never overlap while different items proceed side by side.
//!
//! Only the most recent follow-up for an item runs once its slow first step
//! finishes, so "peeled" and "cut" are skipped in favour of "eaten".

use std::time::Duration;

use anyhow::Result;
use jobmap::{shutdown, telemetry, Coordinator, JobMapHandle};

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init_tracing(false);

    let coordinator = Coordinator::<&'static str>::new();
    let jobs = coordinator.handle();
    let cancel = shutdown::install_signal_handler();

    let pump_cancel = cancel.clone();
    tokio::spawn(async move {
        pump_jobs(&jobs).await;
        pump_cancel.cancel();
    });

    let summary = coordinator.run(cancel).await;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

async fn pump_jobs(jobs: &JobMapHandle<&'static str>) {
    jobs.submit("Apple", |_| async {
        println!("Apple has been bought.");
        tokio::time::sleep(Duration::from_secs(1)).await;
    })
    .await;
    jobs.submit("Cheese", |_| async {
        println!("Cheese has been bought.");
        tokio::time::sleep(Duration::from_secs(1)).await;
    })
    .await;
    jobs.submit("Apple", |_| async { println!("Apple has been peeled.") }).await;
    jobs.submit("Cheese", |_| async { println!("Cheese has been cut.") }).await;
    jobs.submit("Apple", |_| async { println!("Apple has been eaten.") }).await;
    jobs.submit("Cheese", |_| async { println!("Cheese has been eaten.") }).await;

    tokio::time::sleep(Duration::from_secs(2)).await;
}
