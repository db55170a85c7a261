//! Infrastructure layer: ledger stores, services, config.

pub mod config;
pub mod document;
pub mod services;
pub mod store;


pub use config::{Backend, ConfigError, LedgerConfig};
pub use document::{DocumentKind, LedgerDocument, WorkflowDocument};
pub use services::{
    AdjustmentService, Committed, ConflictRetry, InventoryService, MovementService,
    ReceivingService, ReservationManager, ServiceConfig, StockLedger, StocktakeService,
    TransferService, WarehouseSummary,
};
pub use store::{
    InMemoryLedgerStore, LedgerStore, PostgresLedgerStore, ReferenceCatalog, open_store,
};
