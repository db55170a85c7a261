//! Ledger services: the operations callers invoke.
//!
//! Every workflow step runs the same pipeline:
//!
//! ```text
//! load document -> decide (pure) -> LedgerStore::commit(document + changes)
//!        ^                                   |
//!        +------- Conflict (stale version) --+
//! ```
//!
//! The decide step lives in the workflow crates and never touches storage. The
//! commit applies every stock change and the document write in one atomic
//! unit. A version conflict means another caller advanced the document first;
//! the step is re-decided against fresh state, up to the configured retry count.

mod adjustments;
mod inventory;
mod movements;
mod receiving;
mod reservations;
mod stocktakes;
mod transfers;

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;
use uuid::Uuid;

use stockledger_core::{
    ItemId, LedgerError, LedgerResult, OperationContext, Page, Pagination,
};
use stockledger_inventory::{Decision, StockMovement};

use crate::config::LedgerConfig;
use crate::document::LedgerDocument;
use crate::store::{CommitRequest, DocumentFilter, LedgerStore, open_store};

pub use adjustments::AdjustmentService;
pub use inventory::{InventoryService, WarehouseSummary};
pub use movements::MovementService;
pub use receiving::ReceivingService;
pub use reservations::ReservationManager;
pub use stocktakes::StocktakeService;
pub use transfers::TransferService;

/// Result of a committed operation together with the movements it appended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Committed<T> {
    pub value: T,
    pub movements: Vec<StockMovement>,
}

impl<T> Committed<T> {
    pub fn into_value(self) -> T {
        self.value
    }
}

/// Bounded exponential backoff for re-deciding after a version conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConflictRetry {
    /// Maximum number of re-decisions (0 = fail on first conflict).
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for ConflictRetry {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(200),
        }
    }
}

impl ConflictRetry {
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 0,
            ..Default::default()
        }
    }

    /// Delay before re-decision `attempt` (1-indexed): base * 2^(attempt-1), capped.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let pow = 1u32 << attempt.saturating_sub(1).min(10);
        self.base_delay.saturating_mul(pow).min(self.max_delay)
    }

    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

/// Settings shared by all services.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceConfig {
    pub retry: ConflictRetry,
    /// Look-ahead used by `InventoryService::list_expiring`.
    pub expiry_window_days: u32,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            retry: ConflictRetry::default(),
            expiry_window_days: 30,
        }
    }
}

impl From<&LedgerConfig> for ServiceConfig {
    fn from(config: &LedgerConfig) -> Self {
        Self {
            retry: ConflictRetry {
                max_attempts: config.conflict_retries,
                ..ConflictRetry::default()
            },
            expiry_window_days: config.expiry_window_days,
        }
    }
}

/// Load/decide/commit pipeline shared by the workflow services.
#[derive(Clone)]
pub(crate) struct DocumentPipeline {
    store: Arc<dyn LedgerStore>,
    retry: ConflictRetry,
}

impl DocumentPipeline {
    pub(crate) fn new(store: Arc<dyn LedgerStore>, retry: ConflictRetry) -> Self {
        Self { store, retry }
    }

    pub(crate) fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    pub(crate) async fn load<D: LedgerDocument>(&self, id: Uuid) -> LedgerResult<D> {
        let document = self
            .store
            .load_document(D::KIND, id)
            .await?
            .ok_or_else(|| LedgerError::not_found(D::KIND.reference_kind(), id))?;
        D::from_document(document).ok_or_else(|| {
            LedgerError::storage("load_document", format!("stored document {id} is not a {}", D::KIND))
        })
    }

    pub(crate) async fn list<D: LedgerDocument>(
        &self,
        filter: &DocumentFilter,
        pagination: Pagination,
    ) -> LedgerResult<Page<D>> {
        let Page {
            items,
            total,
            pagination,
            has_more,
        } = self.store.list_documents(filter, pagination).await?;
        Ok(Page {
            items: items.into_iter().filter_map(D::from_document).collect(),
            total,
            pagination,
            has_more,
        })
    }

    /// The id of the document owning `item_id`.
    pub(crate) async fn owner_of<D: LedgerDocument>(&self, item_id: ItemId) -> LedgerResult<Uuid> {
        self.store
            .find_document_by_item(D::KIND, item_id)
            .await?
            .map(|document| document.id())
            .ok_or_else(|| LedgerError::not_found(D::KIND.item_reference_kind(), item_id))
    }

    /// Persist a freshly created document at version 1.
    pub(crate) async fn create<D: LedgerDocument>(
        &self,
        document: D,
        ctx: &OperationContext,
    ) -> LedgerResult<D> {
        let request = CommitRequest::document(*ctx, document.clone().into_document(), Vec::new());
        self.store.commit(request).await?;
        Ok(document)
    }

    /// Run one workflow step against the latest version of document `id`.
    pub(crate) async fn execute<D, F>(
        &self,
        id: Uuid,
        ctx: &OperationContext,
        decide: F,
    ) -> LedgerResult<Committed<D>>
    where
        D: LedgerDocument,
        F: Fn(&D) -> LedgerResult<Decision<D>> + Send + Sync,
    {
        let mut attempt = 0;
        loop {
            let current = self.load::<D>(id).await?;
            let Decision { document, changes } = decide(&current)?;
            let request = CommitRequest::document(*ctx, document.clone().into_document(), changes);

            match self.store.commit(request).await {
                Ok(outcome) => {
                    return Ok(Committed {
                        value: document,
                        movements: outcome.movements,
                    });
                }
                // Only a stale version can succeed on a fresh decision.
                Err(err @ LedgerError::Conflict(_)) if self.retry.should_retry(attempt) => {
                    attempt += 1;
                    warn!(
                        document_kind = %D::KIND,
                        document_id = %id,
                        attempt,
                        error = %err,
                        "document changed concurrently; re-deciding"
                    );
                    tokio::time::sleep(self.retry.delay_for_attempt(attempt)).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// All ledger services over one shared store handle.
#[derive(Clone)]
pub struct StockLedger {
    store: Arc<dyn LedgerStore>,
    pub inventory: InventoryService,
    pub movements: MovementService,
    pub reservations: ReservationManager,
    pub receiving: ReceivingService,
    pub adjustments: AdjustmentService,
    pub transfers: TransferService,
    pub stocktakes: StocktakeService,
}

impl StockLedger {
    pub fn new(store: Arc<dyn LedgerStore>, config: ServiceConfig) -> Self {
        let pipeline = DocumentPipeline::new(store.clone(), config.retry);
        Self {
            inventory: InventoryService::new(store.clone(), config.expiry_window_days),
            movements: MovementService::new(store.clone()),
            reservations: ReservationManager::new(store.clone()),
            receiving: ReceivingService::new(pipeline.clone()),
            adjustments: AdjustmentService::new(pipeline.clone()),
            transfers: TransferService::new(pipeline.clone()),
            stocktakes: StocktakeService::new(pipeline),
            store,
        }
    }

    /// Install logging in the configured format, then open the configured
    /// backend and wire every service to it. Logging is installed once per
    /// process; later calls keep the first subscriber.
    pub async fn open(config: &LedgerConfig) -> anyhow::Result<Self> {
        stockledger_observability::init(config.log_format);
        let store = open_store(config).await?;
        Ok(Self::new(store, ServiceConfig::from(config)))
    }

    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    pub async fn close(&self) {
        self.store.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let retry = ConflictRetry {
            max_attempts: 5,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(35),
        };
        assert_eq!(retry.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(retry.delay_for_attempt(1), Duration::from_millis(10));
        assert_eq!(retry.delay_for_attempt(2), Duration::from_millis(20));
        assert_eq!(retry.delay_for_attempt(3), Duration::from_millis(35));
        assert!(retry.should_retry(4));
        assert!(!retry.should_retry(5));
        assert!(!ConflictRetry::no_retry().should_retry(0));
    }

    #[test]
    fn service_config_follows_ledger_config() {
        let config = LedgerConfig {
            conflict_retries: 7,
            expiry_window_days: 14,
            ..LedgerConfig::default()
        };
        let services = ServiceConfig::from(&config);
        assert_eq!(services.retry.max_attempts, 7);
        assert_eq!(services.expiry_window_days, 14);
    }

    #[tokio::test]
    async fn open_can_run_more_than_once_per_process() {
        let config = LedgerConfig {
            log_format: stockledger_observability::LogFormat::Compact,
            ..LedgerConfig::default()
        };
        let first = StockLedger::open(&config).await.unwrap();
        let second = StockLedger::open(&config).await.unwrap();

        let key = stockledger_core::RecordKey::new(
            stockledger_core::ProductId::new(),
            stockledger_core::WarehouseId::new(),
        );
        let ctx = OperationContext::new(stockledger_core::ActorId::new(), chrono::Utc::now());
        first
            .inventory
            .apply_delta(key, 4, stockledger_inventory::MovementType::Receipt, &ctx)
            .await
            .unwrap();
        assert_eq!(first.inventory.get_record(&key).await.unwrap().quantity_on_hand, 4);
        // Separate memory backends.
        assert_eq!(second.inventory.get_record(&key).await.unwrap().quantity_on_hand, 0);
        first.close().await;
        second.close().await;
    }
}
