//! In-memory ledger store for tests and local development.
//!
//! Enforces the same staging rules, version checks and all-or-nothing commits
//! as the Postgres store. Master-data references are only checked when a
//! `ReferenceCatalog` is supplied.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use uuid::Uuid;

use stockledger_core::{
    ItemId, LedgerError, LedgerResult, LocationId, OperationContext, Page, Pagination, ProductId,
    RecordKey, ReferenceKind, SortOrder, SupplierId, WarehouseId,
};
use stockledger_inventory::{InventoryRecord, StockMovement};

use super::query::{DocumentFilter, MovementFilter, RecordFilter};
use super::r#trait::{
    CommitOutcome, CommitRequest, LedgerSnapshot, LedgerStore, RecordUpdate, stage_changes,
};
use crate::document::{DocumentKind, WorkflowDocument};

/// Known master-data ids. Stands in for the foreign keys the Postgres schema enforces.
#[derive(Debug, Clone, Default)]
pub struct ReferenceCatalog {
    products: HashSet<ProductId>,
    warehouses: HashSet<WarehouseId>,
    locations: HashMap<LocationId, WarehouseId>,
    suppliers: HashSet<SupplierId>,
}

impl ReferenceCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_product(mut self, product_id: ProductId) -> Self {
        self.products.insert(product_id);
        self
    }

    pub fn with_warehouse(mut self, warehouse_id: WarehouseId) -> Self {
        self.warehouses.insert(warehouse_id);
        self
    }

    /// Register a location inside an already registered warehouse.
    pub fn with_location(mut self, location_id: LocationId, warehouse_id: WarehouseId) -> Self {
        self.locations.insert(location_id, warehouse_id);
        self
    }

    pub fn with_supplier(mut self, supplier_id: SupplierId) -> Self {
        self.suppliers.insert(supplier_id);
        self
    }

    fn check_warehouse(&self, warehouse_id: WarehouseId) -> LedgerResult<()> {
        if self.warehouses.contains(&warehouse_id) {
            Ok(())
        } else {
            Err(LedgerError::not_found(ReferenceKind::Warehouse, warehouse_id))
        }
    }

    fn check_key(&self, key: &RecordKey) -> LedgerResult<()> {
        if !self.products.contains(&key.product_id) {
            return Err(LedgerError::not_found(ReferenceKind::Product, key.product_id));
        }
        self.check_warehouse(key.warehouse_id)?;
        if let Some(location_id) = key.location_id {
            if self.locations.get(&location_id) != Some(&key.warehouse_id) {
                return Err(LedgerError::not_found(ReferenceKind::Location, location_id));
            }
        }
        Ok(())
    }

    fn check_document(&self, document: &WorkflowDocument) -> LedgerResult<()> {
        self.check_warehouse(document.warehouse_id())?;
        if let Some(warehouse_id) = document.counterpart_warehouse_id() {
            self.check_warehouse(warehouse_id)?;
        }
        if let Some(supplier_id) = document.supplier_id() {
            if !self.suppliers.contains(&supplier_id) {
                return Err(LedgerError::not_found(ReferenceKind::Supplier, supplier_id));
            }
        }
        Ok(())
    }
}

type RecordCell = Arc<Mutex<InventoryRecord>>;

/// In-memory ledger store.
///
/// Each record sits behind its own mutex; a commit locks the records it touches
/// in key order. Commits on disjoint keys only share the movement-log append,
/// and the document map is locked only by commits that write a document.
///
/// Lock order is gate, records (by key), documents, movements. Writers hold the
/// gate shared; `ledger_snapshot` holds it exclusively so it never observes a
/// half-applied commit.
#[derive(Debug, Default)]
pub struct InMemoryLedgerStore {
    commit_gate: RwLock<()>,
    records: RwLock<HashMap<RecordKey, RecordCell>>,
    documents: RwLock<HashMap<Uuid, WorkflowDocument>>,
    movements: RwLock<Vec<StockMovement>>,
    catalog: Option<ReferenceCatalog>,
    fail_next_commit: AtomicBool,
}

fn poisoned(operation: &str) -> LedgerError {
    LedgerError::storage(operation, "lock poisoned")
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject ids the catalog does not know, like the Postgres foreign keys do.
    pub fn with_catalog(catalog: ReferenceCatalog) -> Self {
        Self {
            catalog: Some(catalog),
            ..Self::default()
        }
    }

    /// Make the next commit fail with a storage fault after validation has
    /// passed, as a dropped connection would.
    pub fn fail_next_commit(&self) {
        self.fail_next_commit.store(true, Ordering::SeqCst);
    }

    fn check_key(&self, key: &RecordKey) -> LedgerResult<()> {
        match &self.catalog {
            Some(catalog) => catalog.check_key(key),
            None => Ok(()),
        }
    }

    fn cell(&self, key: &RecordKey) -> LedgerResult<RecordCell> {
        if let Some(cell) = self
            .records
            .read()
            .map_err(|_| poisoned("records"))?
            .get(key)
        {
            return Ok(cell.clone());
        }
        let mut records = self.records.write().map_err(|_| poisoned("records"))?;
        Ok(records
            .entry(*key)
            .or_insert_with(|| Arc::new(Mutex::new(InventoryRecord::empty(*key))))
            .clone())
    }

    #[cfg(test)]
    fn cell_count(&self) -> usize {
        self.records.read().map(|records| records.len()).unwrap_or_default()
    }

    fn snapshot_cells(&self) -> LedgerResult<Vec<RecordCell>> {
        Ok(self
            .records
            .read()
            .map_err(|_| poisoned("records"))?
            .values()
            .cloned()
            .collect())
    }
}

#[async_trait::async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn get_record(&self, key: &RecordKey) -> LedgerResult<InventoryRecord> {
        let cell = self
            .records
            .read()
            .map_err(|_| poisoned("get_record"))?
            .get(key)
            .cloned();
        match cell {
            Some(cell) => Ok(cell.lock().map_err(|_| poisoned("get_record"))?.clone()),
            None => Ok(InventoryRecord::empty(*key)),
        }
    }

    async fn list_records(
        &self,
        filter: &RecordFilter,
        pagination: Pagination,
    ) -> LedgerResult<Page<InventoryRecord>> {
        let mut matching = Vec::new();
        for cell in self.snapshot_cells()? {
            let record = cell.lock().map_err(|_| poisoned("list_records"))?;
            if filter.matches(&record) {
                matching.push(record.clone());
            }
        }
        if filter.expiring_by.is_some() {
            matching.sort_by(|a, b| (a.expiry_date, a.key).cmp(&(b.expiry_date, b.key)));
        } else {
            matching.sort_by_key(|r| r.key);
        }
        Ok(pagination.apply(&matching))
    }

    async fn update_record(
        &self,
        key: &RecordKey,
        update: RecordUpdate,
        ctx: &OperationContext,
    ) -> LedgerResult<InventoryRecord> {
        self.check_key(key)?;
        let _gate = self.commit_gate.read().map_err(|_| poisoned(update.operation()))?;
        let existing = self
            .records
            .read()
            .map_err(|_| poisoned(update.operation()))?
            .get(key)
            .cloned();
        let cell = match existing {
            Some(cell) => cell,
            None => {
                // Only keys an update can succeed on get a cell.
                let mut scratch = InventoryRecord::empty(*key);
                update.apply_to(&mut scratch, ctx)?;
                self.cell(key)?
            }
        };
        let mut record = cell.lock().map_err(|_| poisoned(update.operation()))?;
        let mut next = record.clone();
        update.apply_to(&mut next, ctx)?;
        *record = next.clone();
        Ok(next)
    }

    async fn commit(&self, request: CommitRequest) -> LedgerResult<CommitOutcome> {
        let CommitRequest {
            context,
            changes,
            document,
        } = request;

        let keys: BTreeSet<RecordKey> = changes.iter().map(|c| c.key).collect();
        for key in &keys {
            self.check_key(key)?;
        }
        if let (Some(catalog), Some(write)) = (&self.catalog, &document) {
            catalog.check_document(&write.document)?;
        }

        let _gate = self.commit_gate.read().map_err(|_| poisoned("commit"))?;

        // Lock every touched record in key order.
        let cells = keys
            .iter()
            .map(|key| self.cell(key))
            .collect::<LedgerResult<Vec<_>>>()?;
        let mut guards: Vec<MutexGuard<'_, InventoryRecord>> = Vec::with_capacity(cells.len());
        for cell in &cells {
            guards.push(cell.lock().map_err(|_| poisoned("commit"))?);
        }

        let mut staged: BTreeMap<RecordKey, InventoryRecord> =
            guards.iter().map(|g| (g.key, (**g).clone())).collect();
        let applied = stage_changes(&mut staged, &changes, &context)?;

        if self.fail_next_commit.swap(false, Ordering::SeqCst) {
            return Err(LedgerError::storage("commit", "injected fault"));
        }

        // Held from the version check until the document is written.
        let mut documents = match &document {
            Some(write) => {
                let documents = self.documents.write().map_err(|_| poisoned("commit"))?;
                let id = write.document.id();
                write
                    .expected
                    .check(documents.get(&id).map(WorkflowDocument::version))?;
                let duplicate_number = documents.values().any(|d| {
                    d.kind() == write.document.kind()
                        && d.id() != id
                        && d.number() == write.document.number()
                });
                if duplicate_number {
                    return Err(LedgerError::duplicate(
                        format!("{} number", write.document.kind()),
                        write.document.number(),
                    ));
                }
                Some(documents)
            }
            None => None,
        };

        let mut log = self.movements.write().map_err(|_| poisoned("commit"))?;
        let mut appended = Vec::with_capacity(applied.len());
        for (idx, snapshot) in &applied {
            let id = log.len() as i64 + 1;
            let movement = StockMovement::record(id, &changes[*idx], snapshot, &context);
            log.push(movement.clone());
            appended.push(movement);
        }
        drop(log);

        let mut records = Vec::new();
        for guard in guards.iter_mut() {
            if let Some(next) = staged.remove(&guard.key) {
                if next != **guard {
                    **guard = next.clone();
                    records.push(next);
                }
            }
        }

        if let (Some(documents), Some(write)) = (documents.as_mut(), document) {
            documents.insert(write.document.id(), write.document);
        }

        Ok(CommitOutcome {
            movements: appended,
            records,
        })
    }

    async fn ledger_snapshot(
        &self,
        product_id: ProductId,
        warehouse_id: WarehouseId,
    ) -> LedgerResult<LedgerSnapshot> {
        let _gate = self
            .commit_gate
            .write()
            .map_err(|_| poisoned("ledger_snapshot"))?;

        let filter = RecordFilter {
            warehouse_id: Some(warehouse_id),
            product_id: Some(product_id),
            expiring_by: None,
        };
        let mut records = Vec::new();
        for cell in self.snapshot_cells()? {
            let record = cell.lock().map_err(|_| poisoned("ledger_snapshot"))?;
            if filter.matches(&record) {
                records.push(record.clone());
            }
        }
        records.sort_by_key(|r| r.key);

        let movements = self
            .movements
            .read()
            .map_err(|_| poisoned("ledger_snapshot"))?
            .iter()
            .filter(|m| m.product_id == product_id && m.warehouse_id == warehouse_id)
            .cloned()
            .collect();

        Ok(LedgerSnapshot { movements, records })
    }

    async fn load_document(
        &self,
        kind: DocumentKind,
        id: Uuid,
    ) -> LedgerResult<Option<WorkflowDocument>> {
        Ok(self
            .documents
            .read()
            .map_err(|_| poisoned("load_document"))?
            .get(&id)
            .filter(|d| d.kind() == kind)
            .cloned())
    }

    async fn find_document_by_item(
        &self,
        kind: DocumentKind,
        item_id: ItemId,
    ) -> LedgerResult<Option<WorkflowDocument>> {
        Ok(self
            .documents
            .read()
            .map_err(|_| poisoned("find_document_by_item"))?
            .values()
            .find(|d| d.kind() == kind && d.contains_item(item_id))
            .cloned())
    }

    async fn list_documents(
        &self,
        filter: &DocumentFilter,
        pagination: Pagination,
    ) -> LedgerResult<Page<WorkflowDocument>> {
        let mut matching: Vec<WorkflowDocument> = self
            .documents
            .read()
            .map_err(|_| poisoned("list_documents"))?
            .values()
            .filter(|d| filter.matches(d))
            .cloned()
            .collect();
        matching.sort_by_key(|d| (d.created_at(), d.id()));
        Ok(pagination.apply(&matching))
    }

    async fn get_movement(&self, id: i64) -> LedgerResult<Option<StockMovement>> {
        let log = self.movements.read().map_err(|_| poisoned("get_movement"))?;
        Ok(usize::try_from(id - 1)
            .ok()
            .and_then(|idx| log.get(idx))
            .cloned())
    }

    async fn list_movements(
        &self,
        filter: &MovementFilter,
        pagination: Pagination,
        order: SortOrder,
    ) -> LedgerResult<Page<StockMovement>> {
        let mut matching: Vec<StockMovement> = self
            .movements
            .read()
            .map_err(|_| poisoned("list_movements"))?
            .iter()
            .filter(|m| filter.matches(m))
            .cloned()
            .collect();
        matching.sort_by_key(|m| (m.occurred_at, m.id));
        if order == SortOrder::Descending {
            matching.reverse();
        }
        Ok(pagination.apply(&matching))
    }

    async fn close(&self) {}
}
