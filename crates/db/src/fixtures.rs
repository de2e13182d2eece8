use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;

use dealflow_core::domain::item::{ApprovalStatus, Intake, ItemId, Priority};
use dealflow_core::domain::node::{PipelineId, PipelineNode};
use dealflow_core::domain::purchase::{PaymentStatus, PurchaseId, PurchaseRecord};
use dealflow_core::domain::stage::StageName;
use dealflow_core::errors::{ApplicationError, DomainError};
use dealflow_core::finance::{customer_pending_total_tree, supplier_pending_total, AdvancePayment};
use dealflow_core::flows::{Edit, ExecutionUpdate, Transition, TransitionEngine};
use dealflow_core::tree::{build_tree_with_depth, find_by_id, flatten_tree, PipelineTree};

use crate::repositories::{PipelineRepository, RecordStore};

/// Demo forest: one account pipeline with two child pipelines.
const SEED_PIPELINES: &[SeedPipeline] = &[
    SeedPipeline { id: "pl-demo-industrial", name: "Industrial Accounts", parent: None },
    SeedPipeline {
        id: "pl-demo-fabrication",
        name: "Fabrication",
        parent: Some("pl-demo-industrial"),
    },
    SeedPipeline {
        id: "pl-demo-services",
        name: "Field Services",
        parent: Some("pl-demo-industrial"),
    },
];

/// Items driven through the engine so that the stored data is exactly what the
/// workflow would have produced.
const SEED_ITEMS: &[SeedItem] = &[
    SeedItem {
        pipeline: "pl-demo-fabrication",
        company_name: "Northwind Traders",
        department: "Fabrication",
        priority: Priority::High,
        steps: &[],
        expected_stage: StageName::Rfq,
    },
    SeedItem {
        pipeline: "pl-demo-fabrication",
        company_name: "Contoso Metals",
        department: "Fabrication",
        priority: Priority::Medium,
        steps: &[SeedStep::Accept, SeedStep::Notes("Needs powder coating")],
        expected_stage: StageName::Feasibility,
    },
    SeedItem {
        pipeline: "pl-demo-fabrication",
        company_name: "Fabrikam Plant",
        department: "Fabrication",
        priority: Priority::High,
        steps: &[
            SeedStep::Accept,
            SeedStep::Notes("Two-shift install window"),
            SeedStep::Accept,
            SeedStep::Accept,
            SeedStep::Convert,
            SeedStep::Financials { order_value: 100_000, expense: 30_000, advance: 40_000 },
        ],
        expected_stage: StageName::Preprocess,
    },
    SeedItem {
        pipeline: "pl-demo-services",
        company_name: "Tailspin Logistics",
        department: "Maintenance",
        priority: Priority::Low,
        steps: &[
            SeedStep::Accept,
            SeedStep::Notes("Annual service contract"),
            SeedStep::Accept,
            SeedStep::Subdeal("Electrical", "Panel rewiring"),
            SeedStep::Subdeal("HVAC", "Duct cleaning"),
        ],
        expected_stage: StageName::Quotation,
    },
    SeedItem {
        pipeline: "pl-demo-services",
        company_name: "Wide World Importers",
        department: "Maintenance",
        priority: Priority::Medium,
        steps: &[
            SeedStep::Accept,
            SeedStep::Notes("Price sensitive"),
            SeedStep::Accept,
            SeedStep::Accept,
            SeedStep::Close("Went with incumbent vendor"),
        ],
        expected_stage: StageName::ClosedDeals,
    },
];

const SEED_PURCHASES: &[SeedPurchase] = &[
    SeedPurchase {
        id: "po-demo-001",
        vendor: "Acme Steel",
        total: 1_000,
        status: PaymentStatus::Unpaid,
    },
    SeedPurchase {
        id: "po-demo-002",
        vendor: "Globex Fasteners",
        total: 250,
        status: PaymentStatus::PartiallyPaid,
    },
    SeedPurchase {
        id: "po-demo-003",
        vendor: "Initech Paints",
        total: 9_999,
        status: PaymentStatus::Paid,
    },
];

/// Customer balance due of the seeded Preprocess item (100000 - 40000).
const EXPECTED_CUSTOMER_PENDING: i64 = 60_000;
/// Unpaid plus partially paid purchases.
const EXPECTED_SUPPLIER_PENDING: i64 = 1_250;

pub struct DemoSeedDataset;

impl DemoSeedDataset {
    pub const ROOT_PIPELINE_ID: &'static str = "pl-demo-industrial";

    /// Writes the demo forest and purchases. Loading twice is a no-op.
    pub async fn load<S>(repository: &PipelineRepository<S>) -> Result<SeedResult, ApplicationError>
    where
        S: RecordStore,
    {
        let (tree, version) = repository.load_tree().await?;
        let root = PipelineId(Self::ROOT_PIPELINE_ID.to_string());
        if find_by_id(&tree, &root).is_some() {
            return Ok(SeedResult { already_present: true, pipelines: 0, items: 0, purchases: 0 });
        }

        let engine = TransitionEngine::default();
        let mut nodes = flatten_tree(&tree);
        let mut seeded = Vec::with_capacity(SEED_PIPELINES.len());
        for pipeline in SEED_PIPELINES {
            let mut node = PipelineNode::with_id(
                PipelineId(pipeline.id.to_string()),
                pipeline.name,
                pipeline.parent.map(|parent| PipelineId(parent.to_string())),
            );
            for item in SEED_ITEMS.iter().filter(|item| item.pipeline == pipeline.id) {
                node = item.drive(&engine, node)?;
            }
            seeded.push(node);
        }
        nodes.extend(seeded);

        let tree = build_tree_with_depth(nodes, tree.max_depth())?;
        repository.save_tree(&tree, version).await?;

        let (mut purchases, purchase_version) = repository.load_purchases().await?;
        purchases.extend(SEED_PURCHASES.iter().map(SeedPurchase::record));
        repository.save_purchases(&purchases, purchase_version).await?;

        Ok(SeedResult {
            already_present: false,
            pipelines: SEED_PIPELINES.len(),
            items: SEED_ITEMS.len(),
            purchases: SEED_PURCHASES.len(),
        })
    }

    /// Checks that every seeded item sits in its expected stage and that the
    /// pending totals come out as seeded.
    pub async fn verify<S>(
        repository: &PipelineRepository<S>,
    ) -> Result<VerificationResult, ApplicationError>
    where
        S: RecordStore,
    {
        let (tree, _) = repository.load_tree().await?;
        let (purchases, _) = repository.load_purchases().await?;
        let mut checks = Vec::new();

        for pipeline in SEED_PIPELINES {
            let present = find_by_id(&tree, &PipelineId(pipeline.id.to_string())).is_some();
            checks.push((pipeline.id.to_string(), present));
        }

        for item in SEED_ITEMS {
            let label = format!("{} in {}", item.company_name, item.expected_stage);
            checks.push((label, item.is_placed(&tree)));
        }

        let customer =
            customer_pending_total_tree(&tree) == Decimal::new(EXPECTED_CUSTOMER_PENDING, 0);
        checks.push(("customer pending total".to_string(), customer));
        let supplier =
            supplier_pending_total(&purchases) == Decimal::new(EXPECTED_SUPPLIER_PENDING, 0);
        checks.push(("supplier pending total".to_string(), supplier));

        let all_present = checks.iter().all(|(_, passed)| *passed);
        Ok(VerificationResult { all_present, checks })
    }
}

#[derive(Debug, Clone, Copy)]
struct SeedPipeline {
    id: &'static str,
    name: &'static str,
    parent: Option<&'static str>,
}

#[derive(Debug, Clone, Copy)]
enum SeedStep {
    Accept,
    Convert,
    Notes(&'static str),
    Subdeal(&'static str, &'static str),
    Close(&'static str),
    Financials { order_value: i64, expense: i64, advance: i64 },
}

#[derive(Debug, Clone, Copy)]
struct SeedItem {
    pipeline: &'static str,
    company_name: &'static str,
    department: &'static str,
    priority: Priority,
    steps: &'static [SeedStep],
    expected_stage: StageName,
}

impl SeedItem {
    fn intake(&self) -> Intake {
        let date = NaiveDate::from_ymd_opt(2024, 11, 4).unwrap_or_else(|| Utc::now().date_naive());
        Intake {
            date,
            department: self.department.to_string(),
            company_name: self.company_name.to_string(),
            contact: format!("buyer@{}.example", slug(self.company_name)),
            state: "Karnataka".to_string(),
            deadline: date + chrono::Days::new(60),
            description: format!("Demo request from {}", self.company_name),
            source: "Seed".to_string(),
            priority: self.priority,
            file_name: None,
        }
    }

    fn drive(
        &self,
        engine: &TransitionEngine,
        node: PipelineNode,
    ) -> Result<PipelineNode, DomainError> {
        let (mut node, item_id) = engine.intake(&node, self.intake())?;
        let mut stage = StageName::Rfq;

        for step in self.steps {
            match step {
                SeedStep::Accept | SeedStep::Convert | SeedStep::Close(_) => {
                    let transition = match step {
                        SeedStep::Close(reason) => Transition::Close { reason: reason.to_string() },
                        SeedStep::Convert => Transition::Convert,
                        _ => Transition::Accept,
                    };
                    let outcome = engine.apply(&node, stage, &item_id, &transition)?;
                    stage = outcome.to.unwrap_or(stage);
                    node = outcome.node;
                }
                SeedStep::Notes(notes) => {
                    node = edit(engine, &node, stage, &item_id, Edit::CustomerNotes {
                        notes: notes.to_string(),
                    })?;
                }
                SeedStep::Subdeal(department, notes) => {
                    node = edit(engine, &node, stage, &item_id, Edit::AddSubdeal {
                        department: department.to_string(),
                        notes: notes.to_string(),
                    })?;
                }
                SeedStep::Financials { order_value, expense, advance } => {
                    let update = ExecutionUpdate {
                        order_value: Some(Decimal::new(*order_value, 0)),
                        expense: Some(Decimal::new(*expense, 0)),
                        advance_payment: Some(AdvancePayment::new(Decimal::new(*advance, 0))),
                        approval_status: Some(ApprovalStatus::Approved),
                        ..ExecutionUpdate::default()
                    };
                    node = edit(engine, &node, stage, &item_id, Edit::Execution(update))?;
                }
            }
        }

        Ok(node)
    }

    fn is_placed(&self, tree: &PipelineTree) -> bool {
        find_by_id(tree, &PipelineId(self.pipeline.to_string()))
            .map(|node| {
                node.items(self.expected_stage)
                    .iter()
                    .any(|item| item.intake.company_name == self.company_name)
            })
            .unwrap_or(false)
    }
}

fn slug(name: &str) -> String {
    name.to_ascii_lowercase().replace(' ', "-")
}

fn edit(
    engine: &TransitionEngine,
    node: &PipelineNode,
    stage: StageName,
    item_id: &ItemId,
    edit: Edit,
) -> Result<PipelineNode, DomainError> {
    Ok(engine.edit(node, stage, item_id, &edit)?.node)
}

#[derive(Debug, Clone, Copy)]
struct SeedPurchase {
    id: &'static str,
    vendor: &'static str,
    total: i64,
    status: PaymentStatus,
}

impl SeedPurchase {
    fn record(&self) -> PurchaseRecord {
        PurchaseRecord {
            id: PurchaseId(self.id.to_string()),
            vendor: self.vendor.to_string(),
            bill_number: Some(format!("BILL-{}", self.id.trim_start_matches("po-demo-"))),
            total: Decimal::new(self.total, 0),
            payment_status: self.status,
        }
    }
}

#[derive(Debug)]
pub struct SeedResult {
    pub already_present: bool,
    pub pipelines: usize,
    pub items: usize,
    pub purchases: usize,
}

#[derive(Debug)]
pub struct VerificationResult {
    pub all_present: bool,
    pub checks: Vec<(String, bool)>,
}

#[cfg(test)]
mod tests {
    use dealflow_core::domain::node::PipelineId;
    use dealflow_core::domain::stage::StageName;

    use super::DemoSeedDataset;
    use crate::repositories::{InMemoryRecordStore, PipelineRepository, SqlRecordStore};
    use crate::{connect_with_settings, migrations};

    #[tokio::test]
    async fn seed_is_verifiable_and_idempotent() {
        let repository = PipelineRepository::new(InMemoryRecordStore::new());

        let first = DemoSeedDataset::load(&repository).await.expect("load seed");
        assert!(!first.already_present);
        assert_eq!(first.pipelines, 3);

        let verification = DemoSeedDataset::verify(&repository).await.expect("verify");
        assert!(verification.all_present, "failed checks: {:?}", verification.checks);

        let second = DemoSeedDataset::load(&repository).await.expect("reload seed");
        assert!(second.already_present);
        let (purchases, _) = repository.load_purchases().await.expect("purchases");
        assert_eq!(purchases.len(), 3);
    }

    #[tokio::test]
    async fn seed_persists_through_sqlite() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("run migrations");
        let repository = PipelineRepository::new(SqlRecordStore::new(pool));

        DemoSeedDataset::load(&repository).await.expect("load seed");
        let (tree, version) = repository.load_tree().await.expect("load tree");

        assert_eq!(version, 1);
        let root = PipelineId(DemoSeedDataset::ROOT_PIPELINE_ID.to_string());
        assert_eq!(tree.children_of(&root).len(), 2);
        let services = PipelineId("pl-demo-services".to_string());
        let closed = tree
            .depth_first()
            .find(|node| node.id == services)
            .map(|node| node.items(StageName::ClosedDeals).len());
        assert_eq!(closed, Some(1));
    }
}
