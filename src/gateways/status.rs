//! Status canonicalization.
//!
//! Each provider speaks its own status vocabulary; nothing outside this
//! module is allowed to look at the raw strings. Any value not present in a
//! gateway's explicit table maps to `Pending`: an unknown status must never
//! read as a successful payment.

use crate::gateways::types::{GatewayKind, RawStatus};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CanonicalStatus {
    Pending,
    Approved,
    Rejected,
}

impl std::fmt::Display for CanonicalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CanonicalStatus::Pending => write!(f, "pending"),
            CanonicalStatus::Approved => write!(f, "approved"),
            CanonicalStatus::Rejected => write!(f, "rejected"),
        }
    }
}

impl CanonicalStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, CanonicalStatus::Pending)
    }
}

/// Map a raw provider status into the canonical 3-value outcome.
pub fn canonicalize(kind: GatewayKind, raw: &RawStatus) -> CanonicalStatus {
    let value = raw.value.trim().to_lowercase();
    match kind {
        GatewayKind::MercadoPago => mercado_pago(&value),
        GatewayKind::Stripe => stripe(&value),
        GatewayKind::EfiPix => efi_pix(&value),
    }
}

fn mercado_pago(value: &str) -> CanonicalStatus {
    match value {
        "approved" => CanonicalStatus::Approved,
        "rejected" | "cancelled" | "refunded" | "charged_back" => CanonicalStatus::Rejected,
        // "in_process" and "in_mediation" are pending sub-states on this
        // provider, not outcomes.
        _ => CanonicalStatus::Pending,
    }
}

fn stripe(value: &str) -> CanonicalStatus {
    match value {
        "paid" | "approved" | "complete" => CanonicalStatus::Approved,
        "expired" | "canceled" | "failed" => CanonicalStatus::Rejected,
        _ => CanonicalStatus::Pending,
    }
}

fn efi_pix(value: &str) -> CanonicalStatus {
    // Efí reports Pix charge states in uppercase Portuguese; comparison is
    // done on the lowered value.
    match value {
        "concluida" => CanonicalStatus::Approved,
        "removida_pelo_usuario_recebedor" | "removida_pelo_psp" | "devolvida" => {
            CanonicalStatus::Rejected
        }
        _ => CanonicalStatus::Pending,
    }
}
