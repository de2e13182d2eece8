use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PurchaseId(pub String);

impl PurchaseId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentStatus {
    Paid,
    Unpaid,
    #[serde(rename = "Partially paid", alias = "PartiallyPaid")]
    PartiallyPaid,
}

impl PaymentStatus {
    pub fn is_outstanding(&self) -> bool {
        matches!(self, Self::Unpaid | Self::PartiallyPaid)
    }
}

/// Supplier bill owned by the accounting side; read here for pending totals.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseRecord {
    pub id: PurchaseId,
    pub vendor: String,
    #[serde(default)]
    pub bill_number: Option<String>,
    pub total: Decimal,
    pub payment_status: PaymentStatus,
}
