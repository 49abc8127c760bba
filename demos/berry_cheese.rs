//! Timed supersession check against a shared store.
//!
//! Run with `cargo run --example berry_cheese`; set `JOBMAP_CONFIG` to a YAML
//! or JSON file to override the coordinator configuration.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use jobmap::{shutdown, telemetry, Coordinator, CoordinatorConfig, JobMapHandle};

const WORK: Duration = Duration::from_secs(1);

#[derive(Default)]
struct Store {
    values: Mutex<HashMap<&'static str, i32>>,
    writes: AtomicUsize,
}

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init_tracing(std::env::var_os("JOBMAP_JSON_LOGS").is_some());

    let config = match std::env::var("JOBMAP_CONFIG") {
        Ok(path) => CoordinatorConfig::from_file(&path)
            .with_context(|| format!("loading coordinator config from {path}"))?,
        Err(_) => CoordinatorConfig::default(),
    };
    let coordinator = Coordinator::<&'static str>::with_config(config)?;
    let jobs = coordinator.handle();
    let store = Arc::new(Store::default());
    let cancel = shutdown::install_signal_handler();

    let pump = {
        let cancel = cancel.clone();
        let store = store.clone();
        tokio::spawn(async move {
            let outcome = pump_jobs(&jobs, &store).await;
            cancel.cancel();
            outcome
        })
    };

    let summary = coordinator.run(cancel).await;
    tracing::info!(summary = %serde_json::to_string(&summary)?, "Done");

    pump.await.context("pump task panicked")?
}

async fn set_slow(jobs: &JobMapHandle<&'static str>, store: &Arc<Store>, key: &'static str, value: i32) {
    let store = store.clone();
    jobs.submit(key, move |_| async move {
        tokio::time::sleep(WORK).await;
        store.values.lock().unwrap_or_else(|e| e.into_inner()).insert(key, value);
        store.writes.fetch_add(1, Ordering::SeqCst);
    })
    .await;
}

fn expect(store: &Store, key: &str, want: i32) -> Result<()> {
    let got = store
        .values
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .get(key)
        .copied();
    if got != Some(want) {
        bail!("{key} was {got:?} when expected {want}");
    }
    Ok(())
}

async fn pump_jobs(jobs: &JobMapHandle<&'static str>, store: &Arc<Store>) -> Result<()> {
    set_slow(jobs, store, "berry", 1).await;
    set_slow(jobs, store, "cheese", 1).await;
    tokio::time::sleep(WORK / 2).await;
    for value in 2..=5 {
        set_slow(jobs, store, "berry", value).await;
    }
    for value in 2..=5 {
        set_slow(jobs, store, "cheese", value).await;
    }

    tokio::time::sleep(WORK).await;
    expect(store, "berry", 1)?;
    expect(store, "cheese", 1)?;

    tokio::time::sleep(WORK).await;
    expect(store, "berry", 5)?;
    expect(store, "cheese", 5)?;

    tokio::time::sleep(WORK).await;
    let writes = store.writes.load(Ordering::SeqCst);
    if writes != 4 {
        bail!("{writes} writes when expected 4");
    }
    println!("berry and cheese each ran values 1 and 5, in parallel");
    Ok(())
}
