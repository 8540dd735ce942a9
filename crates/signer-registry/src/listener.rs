//! Merge completion notifications.
//!
//! A listener runs on the merging thread after the new snapshot has been
//! published and after the registry's write lock has been released, so it
//! may query the registry (and even call managers) and will see the merged
//! state.

use parking_lot::Mutex;

use crate::model::Cert;

pub trait MergeListener: Send + Sync {
    /// `added_certs` holds exactly the certificates whose external id was not
    /// present before the merge.
    fn merge_done(&self, added_certs: &[Cert]);
}

/// Listener that ignores every merge.
#[derive(Debug, Default)]
pub struct NoopMergeListener;

impl MergeListener for NoopMergeListener {
    fn merge_done(&self, _added_certs: &[Cert]) {}
}

/// Listener that records the cert ids of every merge for testing.
#[derive(Debug, Default)]
pub struct RecordingMergeListener {
    merges: Mutex<Vec<Vec<String>>>,
}

impl RecordingMergeListener {
    pub fn new() -> Self {
        Self::default()
    }

    /// Added cert ids per merge, each sorted.
    pub fn merges(&self) -> Vec<Vec<String>> {
        self.merges.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.merges.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.merges.lock().is_empty()
    }
}

impl MergeListener for RecordingMergeListener {
    fn merge_done(&self, added_certs: &[Cert]) {
        let mut ids: Vec<String> = added_certs.iter().map(|c| c.id.clone()).collect();
        ids.sort();
        self.merges.lock().push(ids);
    }
}
