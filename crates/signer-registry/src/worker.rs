//! Background reconciliation with the key configuration store.
//!
//! A named thread calls [`TokenRegistry::merge`] once per interval so changes
//! written by other processes show up in the registry. Merging is gated by
//! the structural hash, so a tick without external changes only costs one
//! read of the store.

use std::sync::mpsc::{channel, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, error, info};

use crate::listener::MergeListener;
use crate::registry::{MergeOutcome, TokenRegistry};

/// Handle to the merge thread. Dropping it stops the thread.
pub struct MergeWorker {
    shutdown: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl MergeWorker {
    pub fn spawn(
        registry: Arc<TokenRegistry>,
        listener: Arc<dyn MergeListener>,
        interval: Duration,
    ) -> std::io::Result<Self> {
        let (shutdown, receiver) = channel::<()>();

        let handle = std::thread::Builder::new()
            .name("signer-registry-merge".to_string())
            .spawn(move || loop {
                match receiver.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => run_tick(&registry, listener.as_ref()),
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })?;

        info!(interval_secs = interval.as_secs(), "Merge worker started");
        Ok(Self {
            shutdown: Some(shutdown),
            handle: Some(handle),
        })
    }

    /// Signal the thread and wait for the tick in progress to finish.
    pub fn stop(mut self) {
        self.shutdown_and_join();
    }

    fn shutdown_and_join(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("Merge worker panicked");
            }
            info!("Merge worker stopped");
        }
    }
}

impl Drop for MergeWorker {
    fn drop(&mut self) {
        self.shutdown_and_join();
    }
}

fn run_tick(registry: &TokenRegistry, listener: &dyn MergeListener) {
    if registry.has_changed() {
        debug!("Devices were added or removed outside the registry");
    }
    match registry.merge(listener) {
        Ok(MergeOutcome::Unchanged) => {}
        Ok(MergeOutcome::Merged { added_certs }) => {
            debug!(added_certs, "Merge worker published a new snapshot");
        }
        Err(e) => error!(error = %e, "Merge worker failed to load key configuration"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::RecordingMergeListener;
    use crate::loader::TokenRegistryLoader;
    use crate::ocsp::NullOcspCache;
    use crate::services::MockKeyConfStore;
    use crate::token_conf::TokenConf;
    use keyconf_database::{CertEntity, DeviceEntity, KeyEntity};
    use parking_lot::Mutex;
    use std::time::Instant;

    fn device(certs: &[&str]) -> DeviceEntity {
        DeviceEntity {
            id: Some(1),
            device_id: "0".to_string(),
            device_type: "softToken".to_string(),
            keys: vec![KeyEntity {
                id: Some(1),
                key_id: "k1".to_string(),
                certs: certs
                    .iter()
                    .map(|id| CertEntity {
                        cert_id: id.to_string(),
                        contents: id.as_bytes().to_vec(),
                        ..Default::default()
                    })
                    .collect(),
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_worker_merges_external_changes() {
        let rows = Arc::new(Mutex::new(vec![device(&["c1"])]));
        let mut store = MockKeyConfStore::new();
        let source = Arc::clone(&rows);
        store
            .expect_find_all()
            .returning(move || Ok(source.lock().clone()));
        store.expect_find_all_ids().returning(|| Ok(vec![1]));

        let conf = Arc::new(TokenConf::new(Arc::new(store)));
        let registry = Arc::new(TokenRegistry::new(TokenRegistryLoader::new(
            conf,
            Arc::new(NullOcspCache),
        )));
        registry.init().unwrap();

        let listener = Arc::new(RecordingMergeListener::new());
        let worker = MergeWorker::spawn(
            Arc::clone(&registry),
            listener.clone(),
            Duration::from_millis(10),
        )
        .unwrap();

        *rows.lock() = vec![device(&["c1", "c2"])];

        let deadline = Instant::now() + Duration::from_secs(5);
        while listener.is_empty() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        worker.stop();

        assert_eq!(listener.merges()[0], vec!["c2".to_string()]);
        assert!(registry.current_tokens().find_cert("c2").is_some());
    }

    #[test]
    fn test_drop_stops_the_thread() {
        let mut store = MockKeyConfStore::new();
        store.expect_find_all().returning(|| Ok(Vec::new()));
        store.expect_find_all_ids().returning(|| Ok(Vec::new()));
        let conf = Arc::new(TokenConf::new(Arc::new(store)));
        let registry = Arc::new(TokenRegistry::new(TokenRegistryLoader::new(
            conf,
            Arc::new(NullOcspCache),
        )));

        let worker = MergeWorker::spawn(
            Arc::clone(&registry),
            Arc::new(RecordingMergeListener::new()),
            Duration::from_secs(3600),
        )
        .unwrap();
        drop(worker);

        assert_eq!(Arc::strong_count(&registry), 1);
    }
}
