//! Non-transactional session state: config, globals, modaliases, and the
//! active namespace. Carried unconditionally on the view; snapshotted
//! into a `TransactionFrame` when a transaction begins.

use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    pub namespace: String,
    pub modaliases: BTreeMap<String, String>,
    pub session_config: BTreeMap<String, String>,
    pub globals: BTreeMap<String, String>,
}

impl SessionState {
    /// Produces a stable byte encoding of this state — equal states
    /// encode identically, used by the executor to decide whether a
    /// backend connection's last-applied state already matches (§4.4,
    /// §4.6).
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(self.namespace.as_bytes());
        out.push(0);
        for (k, v) in &self.modaliases {
            out.extend_from_slice(b"ma:");
            out.extend_from_slice(k.as_bytes());
            out.push(b'=');
            out.extend_from_slice(v.as_bytes());
            out.push(0);
        }
        for (k, v) in &self.session_config {
            out.extend_from_slice(b"cfg:");
            out.extend_from_slice(k.as_bytes());
            out.push(b'=');
            out.extend_from_slice(v.as_bytes());
            out.push(0);
        }
        for (k, v) in &self.globals {
            out.extend_from_slice(b"g:");
            out.extend_from_slice(k.as_bytes());
            out.push(b'=');
            out.extend_from_slice(v.as_bytes());
            out.push(0);
        }
        out
    }
}
