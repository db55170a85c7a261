//! Postgres-backed ledger store.
//!
//! Schema lives in `crates/infra/migrations/`. Record quantity invariants, the
//! movement `after = before + change` identity, status enums and master-data
//! references are all enforced by table constraints as well as in Rust.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | LedgerError | Scenario |
//! |------------|----------------------|-------------|----------|
//! | Database (unique violation on `*_number_unique`) | `23505` | `Duplicate` | Document number taken |
//! | Database (other unique violation) | `23505` | `Conflict` | Duplicate document id |
//! | Database (foreign key violation) | `23503` | `ReferenceNotFound` | Unknown product/warehouse/location/supplier |
//! | Database (check constraint violation) | `23514` | `Validation` | Row would break a quantity or status constraint |
//! | Database (other) | Any other | `StorageFault` | Other database errors |
//! | PoolClosed / Io / Tls / Other | N/A | `StorageFault` | Connectivity |
//!
//! ## Locking
//!
//! `commit` runs in one transaction. Touched inventory rows are locked with
//! `SELECT ... FOR UPDATE` in `RecordKey` order, then the document row is
//! updated with `WHERE version = $expected`. Zero rows updated means another
//! writer got there first and surfaces as `Conflict`.
//!
//! `ledger_snapshot` reads movements and records in one `REPEATABLE READ`
//! read-only transaction, so both sides come from the same MVCC snapshot.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::{Span, instrument};
use uuid::Uuid;

use stockledger_core::{
    ActorId, ExpectedVersion, ItemId, LedgerError, LedgerResult, LocationId, OperationContext,
    Page, Pagination, ProductId, RecordKey, ReferenceKind, SortOrder, SupplierId, WarehouseId,
};
use stockledger_inventory::{InventoryRecord, MovementReference, StockMovement};

use super::query::{DocumentFilter, MovementFilter, RecordFilter};
use super::r#trait::{
    CommitOutcome, CommitRequest, DocumentWrite, LedgerSnapshot, LedgerStore, RecordUpdate,
    stage_changes,
};
use crate::document::{DocumentKind, WorkflowDocument};

const RECORD_COLUMNS: &str = "product_id, warehouse_id, location_id, quantity_on_hand, \
     quantity_reserved, status, expiry_date, version, updated_at";

const MOVEMENT_COLUMNS: &str = "id, product_id, warehouse_id, location_id, movement_type, \
     quantity_before, quantity_change, quantity_after, reference_table, reference_id, \
     reference_number, notes, actor_id, occurred_at";

/// Postgres-backed ledger store.
///
/// Uses the SQLx connection pool, which is `Send + Sync` and safe to share.
#[derive(Debug, Clone)]
pub struct PostgresLedgerStore {
    pool: Arc<PgPool>,
}

impl PostgresLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the embedded migrations.
    pub async fn migrate(&self) -> LedgerResult<()> {
        sqlx::migrate!("./migrations")
            .run(&*self.pool)
            .await
            .map_err(|e| LedgerError::storage("migrate", e.to_string()))
    }

    /// Register master-data ids so foreign keys accept them.
    pub async fn register_product(&self, product_id: ProductId) -> LedgerResult<()> {
        sqlx::query("INSERT INTO products (id) VALUES ($1) ON CONFLICT DO NOTHING")
            .bind(product_id.as_uuid())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("register_product", e))?;
        Ok(())
    }

    pub async fn register_warehouse(&self, warehouse_id: WarehouseId) -> LedgerResult<()> {
        sqlx::query("INSERT INTO warehouses (id) VALUES ($1) ON CONFLICT DO NOTHING")
            .bind(warehouse_id.as_uuid())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("register_warehouse", e))?;
        Ok(())
    }

    pub async fn register_location(
        &self,
        location_id: LocationId,
        warehouse_id: WarehouseId,
    ) -> LedgerResult<()> {
        sqlx::query("INSERT INTO locations (id, warehouse_id) VALUES ($1, $2) ON CONFLICT DO NOTHING")
            .bind(location_id.as_uuid())
            .bind(warehouse_id.as_uuid())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("register_location", e))?;
        Ok(())
    }

    pub async fn register_supplier(&self, supplier_id: SupplierId) -> LedgerResult<()> {
        sqlx::query("INSERT INTO suppliers (id) VALUES ($1) ON CONFLICT DO NOTHING")
            .bind(supplier_id.as_uuid())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("register_supplier", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(key = %key), err)]
    pub async fn load_record(&self, key: &RecordKey) -> LedgerResult<InventoryRecord> {
        let row = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM inventory \
             WHERE product_id = $1 AND warehouse_id = $2 AND location_id IS NOT DISTINCT FROM $3"
        ))
        .bind(key.product_id.as_uuid())
        .bind(key.warehouse_id.as_uuid())
        .bind(key.location_id.map(Uuid::from))
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_record", e))?;

        match row {
            Some(row) => record_from_row(&row),
            None => Ok(InventoryRecord::empty(*key)),
        }
    }

    #[instrument(skip(self, ctx), fields(key = %key, operation = update.operation()), err)]
    pub async fn apply_record_update(
        &self,
        key: &RecordKey,
        update: RecordUpdate,
        ctx: &OperationContext,
    ) -> LedgerResult<InventoryRecord> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let existing = select_record_for_update(&mut tx, key).await?;
        if existing.is_none() {
            check_references(&mut tx, key).await?;
        }
        let mut record = existing
            .clone()
            .unwrap_or_else(|| InventoryRecord::empty(*key));
        update.apply_to(&mut record, ctx)?;
        if existing.is_none() {
            // Neither reservations nor status changes can create stock.
            return Err(LedgerError::not_found(ReferenceKind::InventoryRecord, key));
        }

        write_record(&mut tx, &record).await?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(record)
    }

    /// Apply changes and the optional document write in one transaction.
    #[instrument(
        skip(self, request),
        fields(
            change_count = request.changes.len(),
            document = ?request.document.as_ref().map(|w| (w.document.kind(), w.document.id())),
            expected_version = ?request.document.as_ref().map(|w| w.expected),
            movement_count = tracing::field::Empty
        ),
        err
    )]
    pub async fn commit_changes(&self, request: CommitRequest) -> LedgerResult<CommitOutcome> {
        let CommitRequest {
            context,
            changes,
            document,
        } = request;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let keys: BTreeSet<RecordKey> = changes.iter().map(|c| c.key).collect();
        let mut staged = BTreeMap::new();
        for key in &keys {
            let record = match select_record_for_update(&mut tx, key).await? {
                Some(record) => record,
                None => {
                    check_references(&mut tx, key).await?;
                    insert_empty_record(&mut tx, key).await?;
                    select_record_for_update(&mut tx, key)
                        .await?
                        .ok_or_else(|| LedgerError::storage("commit", "inserted record vanished"))?
                }
            };
            staged.insert(*key, record);
        }
        let originals = staged.clone();

        if let Some(write) = &document {
            write_document(&mut tx, write).await?;
        }

        let applied = stage_changes(&mut staged, &changes, &context)?;

        let mut movements = Vec::with_capacity(applied.len());
        for (idx, snapshot) in &applied {
            let change = &changes[*idx];
            let draft = StockMovement::record(0, change, snapshot, &context);
            let id = insert_movement(&mut tx, &draft).await?;
            movements.push(StockMovement { id, ..draft });
        }

        let mut records = Vec::new();
        for (key, record) in staged {
            if originals.get(&key) != Some(&record) {
                write_record(&mut tx, &record).await?;
                records.push(record);
            }
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        Span::current().record("movement_count", movements.len() as u64);
        Ok(CommitOutcome { movements, records })
    }
}

impl PostgresLedgerStore {
    #[instrument(
        skip(self),
        fields(
            product_id = %product_id,
            warehouse_id = %warehouse_id,
            movement_count = tracing::field::Empty
        ),
        err
    )]
    pub async fn read_ledger_snapshot(
        &self,
        product_id: ProductId,
        warehouse_id: WarehouseId,
    ) -> LedgerResult<LedgerSnapshot> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("set_isolation", e))?;

        let movement_rows = sqlx::query(&format!(
            "SELECT {MOVEMENT_COLUMNS} FROM stock_movements \
             WHERE product_id = $1 AND warehouse_id = $2 ORDER BY id ASC"
        ))
        .bind(product_id.as_uuid())
        .bind(warehouse_id.as_uuid())
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("snapshot_movements", e))?;

        let record_rows = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM inventory \
             WHERE version > 0 AND product_id = $1 AND warehouse_id = $2 \
             ORDER BY location_id NULLS FIRST"
        ))
        .bind(product_id.as_uuid())
        .bind(warehouse_id.as_uuid())
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("snapshot_records", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        let movements = movement_rows
            .iter()
            .map(movement_from_row)
            .collect::<LedgerResult<Vec<_>>>()?;
        let records = record_rows
            .iter()
            .map(record_from_row)
            .collect::<LedgerResult<Vec<_>>>()?;
        Span::current().record("movement_count", movements.len() as u64);
        Ok(LedgerSnapshot { movements, records })
    }
}

#[async_trait::async_trait]
impl LedgerStore for PostgresLedgerStore {
    async fn get_record(&self, key: &RecordKey) -> LedgerResult<InventoryRecord> {
        self.load_record(key).await
    }

    async fn list_records(
        &self,
        filter: &RecordFilter,
        pagination: Pagination,
    ) -> LedgerResult<Page<InventoryRecord>> {
        const WHERE: &str = "WHERE version > 0 \
             AND ($1::uuid IS NULL OR warehouse_id = $1) \
             AND ($2::uuid IS NULL OR product_id = $2) \
             AND ($3::date IS NULL OR (expiry_date <= $3 AND quantity_on_hand > 0))";
        let order = if filter.expiring_by.is_some() {
            "expiry_date ASC, product_id, warehouse_id, location_id NULLS FIRST"
        } else {
            "product_id, warehouse_id, location_id NULLS FIRST"
        };

        let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM inventory {WHERE}"))
            .bind(filter.warehouse_id.map(Uuid::from))
            .bind(filter.product_id.map(Uuid::from))
            .bind(filter.expiring_by)
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("count_records", e))?;

        let rows = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM inventory {WHERE} ORDER BY {order} LIMIT $4 OFFSET $5"
        ))
        .bind(filter.warehouse_id.map(Uuid::from))
        .bind(filter.product_id.map(Uuid::from))
        .bind(filter.expiring_by)
        .bind(i64::from(pagination.limit))
        .bind(i64::from(pagination.offset))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_records", e))?;

        let items = rows
            .iter()
            .map(record_from_row)
            .collect::<LedgerResult<Vec<_>>>()?;
        Ok(Page::new(items, total as u64, pagination))
    }

    async fn update_record(
        &self,
        key: &RecordKey,
        update: RecordUpdate,
        ctx: &OperationContext,
    ) -> LedgerResult<InventoryRecord> {
        self.apply_record_update(key, update, ctx).await
    }

    async fn commit(&self, request: CommitRequest) -> LedgerResult<CommitOutcome> {
        self.commit_changes(request).await
    }

    async fn ledger_snapshot(
        &self,
        product_id: ProductId,
        warehouse_id: WarehouseId,
    ) -> LedgerResult<LedgerSnapshot> {
        self.read_ledger_snapshot(product_id, warehouse_id).await
    }

    async fn load_document(
        &self,
        kind: DocumentKind,
        id: Uuid,
    ) -> LedgerResult<Option<WorkflowDocument>> {
        let row = sqlx::query(&format!("SELECT body FROM {} WHERE id = $1", kind.table()))
            .bind(id)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("load_document", e))?;
        row.map(|row| document_from_row(kind, &row)).transpose()
    }

    async fn find_document_by_item(
        &self,
        kind: DocumentKind,
        item_id: ItemId,
    ) -> LedgerResult<Option<WorkflowDocument>> {
        let row = sqlx::query(&format!(
            "SELECT body FROM {} \
             WHERE body -> 'items' @> jsonb_build_array(jsonb_build_object('id', $1::text))",
            kind.table()
        ))
        .bind(item_id.to_string())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_document_by_item", e))?;
        row.map(|row| document_from_row(kind, &row)).transpose()
    }

    async fn list_documents(
        &self,
        filter: &DocumentFilter,
        pagination: Pagination,
    ) -> LedgerResult<Page<WorkflowDocument>> {
        let table = filter.kind.table();
        let warehouse_match = match filter.kind {
            DocumentKind::StockTransfer => "(warehouse_id = $2 OR to_warehouse_id = $2)",
            _ => "warehouse_id = $2",
        };
        let where_clause = format!(
            "WHERE ($1::text IS NULL OR status = $1) AND ($2::uuid IS NULL OR {warehouse_match})"
        );

        let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table} {where_clause}"))
            .bind(filter.status.as_deref())
            .bind(filter.warehouse_id.map(Uuid::from))
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("count_documents", e))?;

        let rows = sqlx::query(&format!(
            "SELECT body FROM {table} {where_clause} ORDER BY created_at, id LIMIT $3 OFFSET $4"
        ))
        .bind(filter.status.as_deref())
        .bind(filter.warehouse_id.map(Uuid::from))
        .bind(i64::from(pagination.limit))
        .bind(i64::from(pagination.offset))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_documents", e))?;

        let items = rows
            .iter()
            .map(|row| document_from_row(filter.kind, row))
            .collect::<LedgerResult<Vec<_>>>()?;
        Ok(Page::new(items, total as u64, pagination))
    }

    async fn get_movement(&self, id: i64) -> LedgerResult<Option<StockMovement>> {
        let row = sqlx::query(&format!(
            "SELECT {MOVEMENT_COLUMNS} FROM stock_movements WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_movement", e))?;
        row.as_ref().map(movement_from_row).transpose()
    }

    async fn list_movements(
        &self,
        filter: &MovementFilter,
        pagination: Pagination,
        order: SortOrder,
    ) -> LedgerResult<Page<StockMovement>> {
        const WHERE: &str = "WHERE ($1::uuid IS NULL OR product_id = $1) \
             AND ($2::uuid IS NULL OR warehouse_id = $2) \
             AND ($3::uuid IS NULL OR location_id = $3) \
             AND ($4::text IS NULL OR movement_type = $4)";
        let direction = match order {
            SortOrder::Ascending => "ASC",
            SortOrder::Descending => "DESC",
        };
        let movement_type = filter.movement_type.map(|t| t.as_str());

        let total: i64 =
            sqlx::query_scalar(&format!("SELECT COUNT(*) FROM stock_movements {WHERE}"))
                .bind(filter.product_id.map(Uuid::from))
                .bind(filter.warehouse_id.map(Uuid::from))
                .bind(filter.location_id.map(Uuid::from))
                .bind(movement_type)
                .fetch_one(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("count_movements", e))?;

        let rows = sqlx::query(&format!(
            "SELECT {MOVEMENT_COLUMNS} FROM stock_movements {WHERE} \
             ORDER BY occurred_at {direction}, id {direction} LIMIT $5 OFFSET $6"
        ))
        .bind(filter.product_id.map(Uuid::from))
        .bind(filter.warehouse_id.map(Uuid::from))
        .bind(filter.location_id.map(Uuid::from))
        .bind(movement_type)
        .bind(i64::from(pagination.limit))
        .bind(i64::from(pagination.offset))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_movements", e))?;

        let items = rows
            .iter()
            .map(movement_from_row)
            .collect::<LedgerResult<Vec<_>>>()?;
        Ok(Page::new(items, total as u64, pagination))
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

async fn select_record_for_update(
    tx: &mut Transaction<'_, Postgres>,
    key: &RecordKey,
) -> LedgerResult<Option<InventoryRecord>> {
    let row = sqlx::query(&format!(
        "SELECT {RECORD_COLUMNS} FROM inventory \
         WHERE product_id = $1 AND warehouse_id = $2 AND location_id IS NOT DISTINCT FROM $3 \
         FOR UPDATE"
    ))
    .bind(key.product_id.as_uuid())
    .bind(key.warehouse_id.as_uuid())
    .bind(key.location_id.map(Uuid::from))
    .fetch_optional(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("lock_record", e))?;
    row.as_ref().map(record_from_row).transpose()
}

/// Turn a would-be foreign key failure into a precise `ReferenceNotFound`
/// before it can abort the transaction.
async fn check_references(tx: &mut Transaction<'_, Postgres>, key: &RecordKey) -> LedgerResult<()> {
    let row = sqlx::query(
        r#"
        SELECT
            EXISTS (SELECT 1 FROM products WHERE id = $1) AS product_ok,
            EXISTS (SELECT 1 FROM warehouses WHERE id = $2) AS warehouse_ok,
            ($3::uuid IS NULL OR EXISTS (
                SELECT 1 FROM locations WHERE id = $3 AND warehouse_id = $2
            )) AS location_ok
        "#,
    )
    .bind(key.product_id.as_uuid())
    .bind(key.warehouse_id.as_uuid())
    .bind(key.location_id.map(Uuid::from))
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("check_references", e))?;

    if !column::<bool>(&row, "product_ok")? {
        return Err(LedgerError::not_found(ReferenceKind::Product, key.product_id));
    }
    if !column::<bool>(&row, "warehouse_ok")? {
        return Err(LedgerError::not_found(ReferenceKind::Warehouse, key.warehouse_id));
    }
    if !column::<bool>(&row, "location_ok")? {
        let location = key.location_id.map(|l| l.to_string()).unwrap_or_default();
        return Err(LedgerError::not_found(ReferenceKind::Location, location));
    }
    Ok(())
}

async fn insert_empty_record(tx: &mut Transaction<'_, Postgres>, key: &RecordKey) -> LedgerResult<()> {
    sqlx::query(
        r#"
        INSERT INTO inventory (product_id, warehouse_id, location_id)
        VALUES ($1, $2, $3)
        ON CONFLICT ON CONSTRAINT inventory_key DO NOTHING
        "#,
    )
    .bind(key.product_id.as_uuid())
    .bind(key.warehouse_id.as_uuid())
    .bind(key.location_id.map(Uuid::from))
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("insert_record", e))?;
    Ok(())
}

async fn write_record(tx: &mut Transaction<'_, Postgres>, record: &InventoryRecord) -> LedgerResult<()> {
    sqlx::query(
        r#"
        UPDATE inventory
        SET quantity_on_hand = $4,
            quantity_reserved = $5,
            status = $6,
            expiry_date = $7,
            version = $8,
            updated_at = $9
        WHERE product_id = $1 AND warehouse_id = $2 AND location_id IS NOT DISTINCT FROM $3
        "#,
    )
    .bind(record.key.product_id.as_uuid())
    .bind(record.key.warehouse_id.as_uuid())
    .bind(record.key.location_id.map(Uuid::from))
    .bind(record.quantity_on_hand)
    .bind(record.quantity_reserved)
    .bind(record.status.as_str())
    .bind(record.expiry_date)
    .bind(record.version as i64)
    .bind(record.updated_at)
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("write_record", e))?;
    Ok(())
}

async fn insert_movement(tx: &mut Transaction<'_, Postgres>, movement: &StockMovement) -> LedgerResult<i64> {
    let id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO stock_movements (
            product_id,
            warehouse_id,
            location_id,
            movement_type,
            quantity_before,
            quantity_change,
            quantity_after,
            reference_table,
            reference_id,
            reference_number,
            notes,
            actor_id,
            occurred_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
        RETURNING id
        "#,
    )
    .bind(movement.product_id.as_uuid())
    .bind(movement.warehouse_id.as_uuid())
    .bind(movement.location_id.map(Uuid::from))
    .bind(movement.movement_type.as_str())
    .bind(movement.quantity_before)
    .bind(movement.quantity_change)
    .bind(movement.quantity_after)
    .bind(movement.reference.as_ref().map(|r| r.table.as_str()))
    .bind(movement.reference.as_ref().map(|r| r.id))
    .bind(movement.reference_number.as_deref())
    .bind(movement.notes.as_deref())
    .bind(movement.actor.as_uuid())
    .bind(movement.occurred_at)
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("append_movement", e))?;
    Ok(id)
}

async fn write_document(tx: &mut Transaction<'_, Postgres>, write: &DocumentWrite) -> LedgerResult<()> {
    let document = &write.document;
    let table = document.kind().table();
    let body = document
        .body()
        .map_err(|e| LedgerError::storage("encode_document", e.to_string()))?;

    if let ExpectedVersion::Exact(expected) = write.expected {
        let result = sqlx::query(&format!(
            "UPDATE {table} SET status = $2, version = $3, body = $4, updated_at = $5 \
             WHERE id = $1 AND version = $6"
        ))
        .bind(document.id())
        .bind(document.status())
        .bind(document.version() as i64)
        .bind(&body)
        .bind(document.updated_at())
        .bind(expected as i64)
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("update_document", e))?;

        if result.rows_affected() == 0 {
            return Err(LedgerError::conflict(format!(
                "{} {} is no longer at version {expected}",
                document.kind(),
                document.id()
            )));
        }
        return Ok(());
    }

    let (extra_column, extra_value) = match document {
        WorkflowDocument::PurchaseOrder(_) => (", supplier_id", document.supplier_id().map(Uuid::from)),
        WorkflowDocument::StockTransfer(_) => (
            ", to_warehouse_id",
            document.counterpart_warehouse_id().map(Uuid::from),
        ),
        _ => ("", None),
    };
    let extra_param = if extra_column.is_empty() { "" } else { ", $9" };
    let upsert = match write.expected {
        ExpectedVersion::Any => {
            " ON CONFLICT (id) DO UPDATE SET status = EXCLUDED.status, version = EXCLUDED.version, \
             body = EXCLUDED.body, updated_at = EXCLUDED.updated_at"
        }
        _ => "",
    };

    let sql = format!(
        "INSERT INTO {table} (id, number, status, warehouse_id, version, body, created_at, updated_at{extra_column}) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8{extra_param}){upsert}"
    );
    let warehouse_id = document.warehouse_id();
    let mut query = sqlx::query(&sql)
        .bind(document.id())
        .bind(document.number())
        .bind(document.status())
        .bind(warehouse_id.as_uuid())
        .bind(document.version() as i64)
        .bind(&body)
        .bind(document.created_at())
        .bind(document.updated_at());
    if !extra_column.is_empty() {
        query = query.bind(extra_value);
    }
    query
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("insert_document", e))?;
    Ok(())
}

fn column<'r, T>(row: &'r PgRow, name: &str) -> LedgerResult<T>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(name)
        .map_err(|e| map_sqlx_error("decode_row", e))
}

fn corrupt(what: &str, err: LedgerError) -> LedgerError {
    LedgerError::storage(format!("decode_{what}"), err.to_string())
}

fn record_from_row(row: &PgRow) -> LedgerResult<InventoryRecord> {
    let status: String = column(row, "status")?;
    let version: i64 = column(row, "version")?;
    Ok(InventoryRecord {
        key: RecordKey::at_location(
            ProductId::from_uuid(column(row, "product_id")?),
            WarehouseId::from_uuid(column(row, "warehouse_id")?),
            column::<Option<Uuid>>(row, "location_id")?.map(LocationId::from_uuid),
        ),
        quantity_on_hand: column(row, "quantity_on_hand")?,
        quantity_reserved: column(row, "quantity_reserved")?,
        status: status.parse().map_err(|e| corrupt("record", e))?,
        expiry_date: column(row, "expiry_date")?,
        version: version as u64,
        updated_at: column(row, "updated_at")?,
    })
}

fn movement_from_row(row: &PgRow) -> LedgerResult<StockMovement> {
    let movement_type: String = column(row, "movement_type")?;
    let reference_table: Option<String> = column(row, "reference_table")?;
    let reference_id: Option<Uuid> = column(row, "reference_id")?;
    let reference = match (reference_table, reference_id) {
        (Some(table), Some(id)) => Some(MovementReference {
            table: table.parse().map_err(|e| corrupt("movement", e))?,
            id,
        }),
        _ => None,
    };

    Ok(StockMovement {
        id: column(row, "id")?,
        product_id: ProductId::from_uuid(column(row, "product_id")?),
        warehouse_id: WarehouseId::from_uuid(column(row, "warehouse_id")?),
        location_id: column::<Option<Uuid>>(row, "location_id")?.map(LocationId::from_uuid),
        movement_type: movement_type.parse().map_err(|e| corrupt("movement", e))?,
        quantity_before: column(row, "quantity_before")?,
        quantity_change: column(row, "quantity_change")?,
        quantity_after: column(row, "quantity_after")?,
        reference,
        reference_number: column(row, "reference_number")?,
        notes: column(row, "notes")?,
        actor: ActorId::from_uuid(column(row, "actor_id")?),
        occurred_at: column(row, "occurred_at")?,
    })
}

fn document_from_row(kind: DocumentKind, row: &PgRow) -> LedgerResult<WorkflowDocument> {
    let body: serde_json::Value = column(row, "body")?;
    WorkflowDocument::from_body(kind, body)
        .map_err(|e| LedgerError::storage("decode_document", e.to_string()))
}

/// Map a foreign-key constraint name to the kind of reference it guards.
fn reference_kind_for_constraint(constraint: Option<&str>) -> ReferenceKind {
    let name = constraint.unwrap_or_default();
    if name.contains("product") {
        ReferenceKind::Product
    } else if name.contains("location") {
        ReferenceKind::Location
    } else if name.contains("supplier") {
        ReferenceKind::Supplier
    } else {
        ReferenceKind::Warehouse
    }
}

pub(crate) fn map_sqlx_error(operation: &str, err: sqlx::Error) -> LedgerError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());

            match db_err.code().as_deref() {
                Some("23505") => match db_err.constraint() {
                    Some(constraint) if constraint.ends_with("_number_unique") => {
                        LedgerError::duplicate(constraint, db_err.message())
                    }
                    _ => LedgerError::conflict(msg),
                },
                Some("23503") => LedgerError::not_found(
                    reference_kind_for_constraint(db_err.constraint()),
                    db_err.message(),
                ),
                Some("23514") => LedgerError::validation(msg),
                _ => LedgerError::storage(operation, msg),
            }
        }
        sqlx::Error::PoolClosed => LedgerError::storage(operation, "connection pool closed"),
        sqlx::Error::RowNotFound => LedgerError::storage(operation, "unexpected row not found"),
        other => LedgerError::storage(operation, other.to_string()),
    }
}
