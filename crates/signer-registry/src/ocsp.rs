//! OCSP response cache contract.
//!
//! Fetching and validating OCSP responses happens elsewhere. The registry's
//! only duty is to announce certificate hashes it has not seen before, after
//! every load, merge and refresh.

use parking_lot::Mutex;

/// Receives certificate hashes that just appeared in the registry.
pub trait OcspCache: Send + Sync {
    /// Pre-fetch OCSP status for `cert_hashes` (SHA-1, lowercase hex).
    /// Never called with an empty list.
    fn refresh_cache(&self, cert_hashes: &[String]);
}

/// Cache that ignores every refresh.
#[derive(Debug, Default)]
pub struct NullOcspCache;

impl OcspCache for NullOcspCache {
    fn refresh_cache(&self, _cert_hashes: &[String]) {}
}

/// Cache that records every refresh call.
#[derive(Debug, Default)]
pub struct RecordingOcspCache {
    calls: Mutex<Vec<Vec<String>>>,
}

impl RecordingOcspCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hash lists in call order, each sorted.
    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().clone()
    }

    pub fn clear(&self) {
        self.calls.lock().clear();
    }
}

impl OcspCache for RecordingOcspCache {
    fn refresh_cache(&self, cert_hashes: &[String]) {
        let mut hashes = cert_hashes.to_vec();
        hashes.sort();
        self.calls.lock().push(hashes);
    }
}
