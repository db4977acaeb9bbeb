use std::fmt;

use blake3::Hasher;

const PROBE_TAG: &[u8] = b"netcut-probe";

/// Identity of one compatibility query: the target backend and the exact
/// serialized model sent to it.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub fn probe(backend_index: usize, model: &[u8]) -> Self {
        let mut hasher = Hasher::new();
        hasher.update(PROBE_TAG);
        hasher.update(&(backend_index as u64).to_le_bytes());
        hasher.update(&(model.len() as u64).to_le_bytes());
        hasher.update(model);
        Fingerprint(hasher.finalize().into())
    }

    /// First 8 bytes in hex, enough to tell probes apart in logs.
    pub fn short_hex(&self) -> String {
        self.0[..8].iter().map(|b| format!("{:02x}", b)).collect()
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.short_hex())
    }
}
