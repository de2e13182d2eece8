//! Financial derivation for execution-stage items.
//!
//! Derived amounts are recomputed whenever an input changes and again whenever a
//! record is decoded, so a stale `profit` or `balance_due` in storage is never
//! trusted. Arithmetic is full-precision [`Decimal`]; rounding happens only in
//! [`round_for_display`].

use chrono::NaiveDate;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::domain::item::{PipelineItem, StageDetails};
use crate::domain::node::PipelineNode;
use crate::domain::purchase::PurchaseRecord;
use crate::domain::stage::StageName;
use crate::errors::ValidationError;
use crate::tree::PipelineTree;

pub fn profit(order_value: Decimal, expense: Decimal) -> Decimal {
    order_value - expense
}

pub fn balance_due(order_value: Decimal, advance_payment_amount: Decimal) -> Decimal {
    order_value - advance_payment_amount
}

pub fn round_for_display(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdvancePayment {
    pub amount: Decimal,
    #[serde(default)]
    pub received_on: Option<NaiveDate>,
    #[serde(default)]
    pub mode: Option<String>,
}

impl AdvancePayment {
    pub fn new(amount: Decimal) -> Self {
        Self { amount, received_on: None, mode: None }
    }
}

/// Order value, cost and advance for one item, with derived profit and balance.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "FinancialsRecord", into = "FinancialsRecord")]
pub struct Financials {
    order_value: Decimal,
    expense: Decimal,
    advance_payment: AdvancePayment,
    profit: Decimal,
    balance_due: Decimal,
}

impl Financials {
    pub fn new(
        order_value: Decimal,
        expense: Decimal,
        advance_payment: AdvancePayment,
    ) -> Result<Self, ValidationError> {
        ensure_non_negative("order_value", order_value)?;
        ensure_non_negative("expense", expense)?;
        ensure_non_negative("advance_payment.amount", advance_payment.amount)?;

        let mut financials = Self {
            order_value,
            expense,
            advance_payment,
            profit: Decimal::ZERO,
            balance_due: Decimal::ZERO,
        };
        financials.recompute();
        Ok(financials)
    }

    pub fn order_value(&self) -> Decimal {
        self.order_value
    }

    pub fn expense(&self) -> Decimal {
        self.expense
    }

    pub fn advance_payment(&self) -> &AdvancePayment {
        &self.advance_payment
    }

    pub fn profit(&self) -> Decimal {
        self.profit
    }

    pub fn balance_due(&self) -> Decimal {
        self.balance_due
    }

    pub fn set_order_value(&mut self, value: Decimal) -> Result<(), ValidationError> {
        ensure_non_negative("order_value", value)?;
        self.order_value = value;
        self.recompute();
        Ok(())
    }

    pub fn set_expense(&mut self, value: Decimal) -> Result<(), ValidationError> {
        ensure_non_negative("expense", value)?;
        self.expense = value;
        self.recompute();
        Ok(())
    }

    pub fn set_advance_payment(&mut self, payment: AdvancePayment) -> Result<(), ValidationError> {
        ensure_non_negative("advance_payment.amount", payment.amount)?;
        self.advance_payment = payment;
        self.recompute();
        Ok(())
    }

    fn recompute(&mut self) {
        self.profit = profit(self.order_value, self.expense);
        self.balance_due = balance_due(self.order_value, self.advance_payment.amount);
    }
}

fn ensure_non_negative(field: &'static str, value: Decimal) -> Result<(), ValidationError> {
    if value.is_sign_negative() && !value.is_zero() {
        return Err(ValidationError::NegativeAmount { field, value });
    }
    Ok(())
}

#[derive(Debug, Serialize, Deserialize)]
struct FinancialsRecord {
    #[serde(default)]
    order_value: Decimal,
    #[serde(default)]
    expense: Decimal,
    #[serde(default)]
    advance_payment: AdvancePayment,
    #[serde(default)]
    profit: Decimal,
    #[serde(default)]
    balance_due: Decimal,
}

impl TryFrom<FinancialsRecord> for Financials {
    type Error = ValidationError;

    fn try_from(record: FinancialsRecord) -> Result<Self, Self::Error> {
        // stored profit/balance_due are discarded
        Financials::new(record.order_value, record.expense, record.advance_payment)
    }
}

impl From<Financials> for FinancialsRecord {
    fn from(value: Financials) -> Self {
        Self {
            order_value: value.order_value,
            expense: value.expense,
            advance_payment: value.advance_payment,
            profit: value.profit,
            balance_due: value.balance_due,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingTotals {
    pub customer: Decimal,
    pub supplier: Decimal,
}

fn item_balance_due(item: &PipelineItem) -> Decimal {
    match &item.details {
        StageDetails::Preprocess(execution) | StageDetails::Postprocess(execution) => {
            execution.financials.balance_due()
        }
        _ => Decimal::ZERO,
    }
}

/// Sum of balance due over the Preprocess and Postprocess items of one pipeline.
pub fn customer_pending_total(node: &PipelineNode) -> Decimal {
    [StageName::Preprocess, StageName::Postprocess]
        .iter()
        .filter_map(|name| node.stage(*name))
        .flat_map(|stage| stage.items.iter())
        .map(item_balance_due)
        .sum()
}

pub fn customer_pending_total_tree(tree: &PipelineTree) -> Decimal {
    tree.depth_first().map(customer_pending_total).sum()
}

/// Sum of purchase totals still owed to suppliers.
pub fn supplier_pending_total(purchases: &[PurchaseRecord]) -> Decimal {
    purchases
        .iter()
        .filter(|purchase| purchase.payment_status.is_outstanding())
        .map(|purchase| purchase.total)
        .sum()
}
