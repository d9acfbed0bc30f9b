use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Bits gating classes of operation a `QueryUnitGroup` may perform.
    /// Checked against a connection's `allow_capabilities` before execution
    /// (see `DisabledCapabilityError`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Capability: u64 {
        const MODIFICATIONS     = 0b0000_0001;
        const DDL                = 0b0000_0010;
        const TRANSACTION        = 0b0000_0100;
        const SESSION_CONFIG     = 0b0000_1000;
        const PERSISTENT_CONFIG  = 0b0001_0000;
        const SET_GLOBAL         = 0b0010_0000;
        const DDL_CREATE_DB      = 0b0100_0000;
        const DDL_DROP_DB        = 0b1000_0000;
    }
}

impl Capability {
    /// Bits in `required` that are not present in `self` (the connection's
    /// `allow_capabilities` mask). Empty when `required` is fully allowed.
    pub fn disabled_from(self, required: Capability) -> Capability {
        required & !self
    }
}

impl Default for Capability {
    fn default() -> Self {
        Capability::all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_from_reports_missing_bits_only() {
        let allowed = Capability::MODIFICATIONS | Capability::DDL;
        let required = Capability::DDL | Capability::TRANSACTION;
        let disabled = allowed.disabled_from(required);
        assert_eq!(disabled, Capability::TRANSACTION);
    }

    #[test]
    fn fully_allowed_has_no_disabled_bits() {
        let allowed = Capability::all();
        assert!(allowed.disabled_from(Capability::DDL).is_empty());
    }
}
