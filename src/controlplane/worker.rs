//! Controller wiring
//!
//! Connects the watch streams to the reconciliation engine through a work
//! queue. The queue worker runs passes one name at a time, which gives the
//! engine its at-most-one-concurrent-pass-per-resource guarantee; failed
//! passes are re-enqueued with the backoff class the error asks for.

use std::collections::BTreeMap;
use std::time::Duration;

use futures::{StreamExt, TryStreamExt};
use k8s_openapi::api::core::v1::Namespace;
use kube::api::Api;
use kube::runtime::{watcher, WatchStreamExt};
use kube::Client;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::controlplane::engine::{ReconcileAction, ReconciliationEngine};
use crate::controlplane::router::ChangeRouter;
use crate::crd::LustreFileSystem;
use crate::error::{Error, ErrorAction, Result};

/// Run the controller until the watch streams end
pub async fn run_controller(
    client: Client,
    engine: ReconciliationEngine,
    router: ChangeRouter,
) -> Result<()> {
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    let reconciles = prometheus::register_int_counter!(
        "lustre_access_reconciles_total",
        "Total reconciliation passes"
    )
    .map_err(|err| Error::Internal(format!("metric registration failed: {err}")))?;
    let reconcile_errors = prometheus::register_int_counter!(
        "lustre_access_reconcile_errors_total",
        "Reconciliation passes that returned an error"
    )
    .map_err(|err| Error::Internal(format!("metric registration failed: {err}")))?;

    tokio::spawn(watch_filesystems(client.clone(), tx.clone()));
    tokio::spawn(watch_namespaces(client, router, tx.clone()));

    let mut attempts: BTreeMap<String, u32> = BTreeMap::new();
    while let Some(name) = rx.recv().await {
        reconciles.inc();
        match engine.reconcile(&name).await {
            Ok(ReconcileAction::Done) => {
                attempts.remove(&name);
            }
            Ok(ReconcileAction::Requeue) => {
                attempts.remove(&name);
                debug!("Requeueing {} for another pass", name);
                let _ = tx.send(name);
            }
            Err(err) => {
                reconcile_errors.inc();
                match err.action() {
                    ErrorAction::NoRequeue => {
                        error!("Reconcile of {} failed, not retrying: {}", name, err);
                        attempts.remove(&name);
                    }
                    action => {
                        let tries = attempts.entry(name.clone()).or_insert(0);
                        *tries += 1;
                        let delay = match action {
                            ErrorAction::RequeueAfter(delay) => delay,
                            _ => backoff_delay(*tries),
                        };
                        warn!(
                            "Reconcile of {} failed (attempt {}), retrying in {:?}: {}",
                            name, tries, delay, err
                        );
                        let tx = tx.clone();
                        tokio::spawn(async move {
                            tokio::time::sleep(delay).await;
                            let _ = tx.send(name);
                        });
                    }
                }
            }
        }
    }

    Ok(())
}

/// Exponential backoff for failed passes, capped at one minute
fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_secs((1u64 << attempt.min(6)).min(60))
}

fn event_objects<K>(event: watcher::Event<K>) -> Vec<K> {
    match event {
        watcher::Event::Applied(obj) | watcher::Event::Deleted(obj) => vec![obj],
        watcher::Event::Restarted(objs) => objs,
    }
}

/// Primary watch: every LustreFileSystem change enqueues that resource
async fn watch_filesystems(client: Client, tx: mpsc::UnboundedSender<String>) {
    let api: Api<LustreFileSystem> = Api::all(client);
    let mut stream = watcher(api, watcher::Config::default())
        .default_backoff()
        .boxed();

    info!("Watching LustreFileSystem resources");
    loop {
        match stream.try_next().await {
            Ok(Some(event)) => {
                for fs in event_objects(event) {
                    if let Some(name) = fs.metadata.name {
                        let _ = tx.send(name);
                    }
                }
            }
            Ok(None) => break,
            Err(err) => warn!("LustreFileSystem watch error: {}", err),
        }
    }
}

/// Secondary watch: namespace lifecycle events fan out through the router,
/// since a namespace turning Active (or vanishing) changes provisioning
/// eligibility without touching any filesystem
async fn watch_namespaces(client: Client, router: ChangeRouter, tx: mpsc::UnboundedSender<String>) {
    let api: Api<Namespace> = Api::all(client);
    let mut stream = watcher(api, watcher::Config::default())
        .default_backoff()
        .boxed();

    info!("Watching Namespace resources");
    loop {
        match stream.try_next().await {
            Ok(Some(event)) => {
                for ns in event_objects(event) {
                    let namespace = ns.metadata.name.unwrap_or_default();
                    match router.on_namespace_event(&namespace).await {
                        Ok(names) => {
                            for name in names {
                                let _ = tx.send(name);
                            }
                        }
                        Err(err) => warn!("Namespace fan-out failed: {}", err),
                    }
                }
            }
            Ok(None) => break,
            Err(err) => warn!("Namespace watch error: {}", err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_delay_grows_and_caps() {
        assert_eq!(backoff_delay(1), Duration::from_secs(2));
        assert_eq!(backoff_delay(2), Duration::from_secs(4));
        assert_eq!(backoff_delay(6), Duration::from_secs(60));
        assert_eq!(backoff_delay(20), Duration::from_secs(60));
    }
}
