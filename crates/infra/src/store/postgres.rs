//! Postgres-backed status store.
//!
//! Every status write runs in a transaction that locks the row
//! (`SELECT ... FOR UPDATE`), applies the move through the domain state
//! machine and writes the result back. Concurrent writers therefore serialize
//! per row and a rejected move leaves the row untouched.
//!
//! ## Error Mapping
//!
//! | SQLx Error | StoreError |
//! |------------|------------|
//! | Database (unique violation `23505`) | `AlreadyExists` |
//! | Database (foreign key violation `23503`) | `Backend` |
//! | Any other | `Backend` |

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::instrument;
use uuid::Uuid;

use atelier_core::{
    AttributeMap, AttributeSchema, ContextRow, DesignId, EnrichmentResult,
    GeneratedDesign, ImageStatus, ItemId, ItemRecord, ItemStatus, Project, ProjectEnrichmentState,
    ProjectId, RunStatus, StageStatus, StatusMachine, ViewSet, WorkItem,
};

use super::{filter_only, StatusStore, StoreError};

/// Tables [`PostgresStatusStore`] reads and writes. Provisioned by the
/// deployment's migration tooling; the store never issues DDL.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS projects (
    id                            UUID PRIMARY KEY,
    name                          TEXT NOT NULL,
    product_type                  TEXT,
    attribute_schema              JSONB,
    enrichment_status             TEXT NOT NULL DEFAULT 'idle',
    enrichment_processed          INTEGER NOT NULL DEFAULT 0 CHECK (enrichment_processed >= 0),
    enrichment_total              INTEGER NOT NULL DEFAULT 0 CHECK (enrichment_total >= 0),
    enrichment_current_article_id UUID,
    enrichment_started_at         TIMESTAMPTZ,
    enrichment_completed_at       TIMESTAMPTZ
);

CREATE TABLE IF NOT EXISTS items (
    id                  UUID PRIMARY KEY,
    project_id          UUID NOT NULL REFERENCES projects (id) ON DELETE CASCADE,
    product_type        TEXT NOT NULL,
    description         TEXT NOT NULL DEFAULT '',
    enriched_attributes JSONB,
    enrichment_error    TEXT,
    mismatch_confidence SMALLINT CHECK (mismatch_confidence BETWEEN 0 AND 100),
    success_score       DOUBLE PRECISION
);

CREATE INDEX IF NOT EXISTS items_project_idx ON items (project_id, id);

CREATE TABLE IF NOT EXISTS designs (
    id                           UUID PRIMARY KEY,
    project_id                   UUID NOT NULL REFERENCES projects (id) ON DELETE CASCADE,
    product_type                 TEXT NOT NULL,
    locked_attributes            JSONB NOT NULL,
    predicted_attributes         JSONB NOT NULL,
    success_score                DOUBLE PRECISION NOT NULL,
    generated_images             JSONB NOT NULL,
    image_generation_status      TEXT NOT NULL DEFAULT 'pending',
    generated_image_url          TEXT,
    sales_text                   TEXT,
    sales_text_generation_status TEXT NOT NULL DEFAULT 'pending',
    created_at                   TIMESTAMPTZ NOT NULL DEFAULT NOW()
);
"#;

const PROJECT_COLUMNS: &str = "id, name, product_type, attribute_schema, enrichment_status, \
     enrichment_processed, enrichment_total, enrichment_current_article_id, \
     enrichment_started_at, enrichment_completed_at";

const ITEM_COLUMNS: &str = "id, project_id, product_type, description, enriched_attributes, \
     enrichment_error, mismatch_confidence, success_score";

const DESIGN_COLUMNS: &str = "id, project_id, product_type, locked_attributes, predicted_attributes, \
     success_score, generated_images, image_generation_status, generated_image_url, sales_text, \
     sales_text_generation_status, created_at";

#[derive(Debug, Clone)]
pub struct PostgresStatusStore {
    pool: Arc<PgPool>,
}

impl PostgresStatusStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Connect to `database_url` with a small default pool.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    async fn begin(&self, operation: &str) -> Result<Transaction<'static, Postgres>, StoreError> {
        self.pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error(operation, e))
    }

    async fn lock_project(
        tx: &mut Transaction<'static, Postgres>,
        project_id: ProjectId,
    ) -> Result<ProjectEnrichmentState, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {PROJECT_COLUMNS} FROM projects WHERE id = $1 FOR UPDATE"
        ))
        .bind(project_id.as_uuid())
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("lock_project", e))?
        .ok_or(StoreError::ProjectNotFound(project_id))?;
        Ok(project_from_row(&row)?.enrichment)
    }

    async fn write_project_state(
        tx: &mut Transaction<'static, Postgres>,
        state: &ProjectEnrichmentState,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE projects SET
                enrichment_status = $2,
                enrichment_processed = $3,
                enrichment_total = $4,
                enrichment_current_article_id = $5,
                enrichment_started_at = $6,
                enrichment_completed_at = $7
            WHERE id = $1
            "#,
        )
        .bind(state.project_id.as_uuid())
        .bind(state.status.as_str())
        .bind(to_i32(state.processed)?)
        .bind(to_i32(state.total)?)
        .bind(state.current_item_id.map(|id| id.as_uuid()))
        .bind(state.started_at)
        .bind(state.completed_at)
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("write_project_state", e))?;
        Ok(())
    }

    async fn lock_item(
        tx: &mut Transaction<'static, Postgres>,
        item_id: ItemId,
    ) -> Result<ItemRecord, StoreError> {
        let row = sqlx::query(&format!("SELECT {ITEM_COLUMNS} FROM items WHERE id = $1 FOR UPDATE"))
            .bind(item_id.as_uuid())
            .fetch_optional(&mut **tx)
            .await
            .map_err(|e| map_sqlx_error("lock_item", e))?
            .ok_or(StoreError::ItemNotFound(item_id))?;
        item_from_row(&row)
    }

    async fn write_item_outcome(
        tx: &mut Transaction<'static, Postgres>,
        record: &ItemRecord,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE items SET
                enriched_attributes = $2,
                enrichment_error = $3,
                mismatch_confidence = $4
            WHERE id = $1
            "#,
        )
        .bind(record.item.id.as_uuid())
        .bind(record.enriched_attributes.as_ref().map(Json))
        .bind(record.enrichment_error.as_deref())
        .bind(record.mismatch_confidence.map(i16::from))
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("write_item_outcome", e))?;
        Ok(())
    }

    async fn lock_design(
        tx: &mut Transaction<'static, Postgres>,
        design_id: DesignId,
    ) -> Result<GeneratedDesign, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {DESIGN_COLUMNS} FROM designs WHERE id = $1 FOR UPDATE"
        ))
        .bind(design_id.as_uuid())
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("lock_design", e))?
        .ok_or(StoreError::DesignNotFound(design_id))?;
        design_from_row(&row)
    }

    async fn items_where(
        &self,
        project_id: ProjectId,
        status: ItemStatus,
        only: Option<&[ItemId]>,
    ) -> Result<Vec<WorkItem>, StoreError> {
        let predicate = match status {
            ItemStatus::Pending => "enriched_attributes IS NULL AND enrichment_error IS NULL",
            ItemStatus::Failed => "enrichment_error IS NOT NULL",
            ItemStatus::Enriched => "enriched_attributes IS NOT NULL AND enrichment_error IS NULL",
        };
        let rows = sqlx::query(&format!(
            "SELECT {ITEM_COLUMNS} FROM items WHERE project_id = $1 AND {predicate} ORDER BY id ASC"
        ))
        .bind(project_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("items_where", e))?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let record = item_from_row(&row)?;
            if filter_only(only, &record.item.id) {
                out.push(record.item);
            }
        }
        Ok(out)
    }

    /// Seed a project row. Used by provisioning and tests.
    pub async fn insert_project(&self, project: &Project) -> Result<(), StoreError> {
        sqlx::query(&format!(
            "INSERT INTO projects ({PROJECT_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)"
        ))
        .bind(project.id.as_uuid())
        .bind(&project.name)
        .bind(project.product_type.as_deref())
        .bind(project.attribute_schema.as_ref().map(Json))
        .bind(project.enrichment.status.as_str())
        .bind(to_i32(project.enrichment.processed)?)
        .bind(to_i32(project.enrichment.total)?)
        .bind(project.enrichment.current_item_id.map(|id| id.as_uuid()))
        .bind(project.enrichment.started_at)
        .bind(project.enrichment.completed_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_project", e))?;
        Ok(())
    }

    /// Seed an item row. Used by catalog import and tests.
    pub async fn insert_item(&self, record: &ItemRecord) -> Result<(), StoreError> {
        sqlx::query(&format!(
            "INSERT INTO items ({ITEM_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)"
        ))
        .bind(record.item.id.as_uuid())
        .bind(record.project_id.as_uuid())
        .bind(&record.item.product_type)
        .bind(&record.item.description)
        .bind(record.enriched_attributes.as_ref().map(Json))
        .bind(record.enrichment_error.as_deref())
        .bind(record.mismatch_confidence.map(i16::from))
        .bind(record.success_score)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_item", e))?;
        Ok(())
    }
}

#[async_trait]
impl StatusStore for PostgresStatusStore {
    #[instrument(skip(self), fields(project_id = %project_id), err)]
    async fn load_project(&self, project_id: ProjectId) -> Result<Option<Project>, StoreError> {
        let row = sqlx::query(&format!("SELECT {PROJECT_COLUMNS} FROM projects WHERE id = $1"))
            .bind(project_id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("load_project", e))?;
        row.as_ref().map(project_from_row).transpose()
    }

    #[instrument(skip(self, state), fields(project_id = %state.project_id, status = %state.status), err)]
    async fn save_enrichment_state(&self, state: &ProjectEnrichmentState) -> Result<(), StoreError> {
        let mut tx = self.begin("save_enrichment_state").await?;
        let current = Self::lock_project(&mut tx, state.project_id).await?;
        current.status.transition(state.status)?;
        Self::write_project_state(&mut tx, state).await?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("save_enrichment_state", e))
    }

    #[instrument(skip(self), fields(project_id = %project_id), err)]
    async fn record_progress(
        &self,
        project_id: ProjectId,
        processed: u32,
        current_item_id: Option<ItemId>,
    ) -> Result<(), StoreError> {
        let mut tx = self.begin("record_progress").await?;
        let mut state = Self::lock_project(&mut tx, project_id).await?;
        state.record_progress(processed, current_item_id)?;
        Self::write_project_state(&mut tx, &state).await?;
        tx.commit().await.map_err(|e| map_sqlx_error("record_progress", e))
    }

    async fn pending_items(
        &self,
        project_id: ProjectId,
        only: Option<&[ItemId]>,
    ) -> Result<Vec<WorkItem>, StoreError> {
        self.items_where(project_id, ItemStatus::Pending, only).await
    }

    async fn failed_items(
        &self,
        project_id: ProjectId,
        only: Option<&[ItemId]>,
    ) -> Result<Vec<WorkItem>, StoreError> {
        self.items_where(project_id, ItemStatus::Failed, only).await
    }

    #[instrument(skip(self, ids), fields(project_id = %project_id, requested = ids.len()), err)]
    async fn clear_item_errors(&self, project_id: ProjectId, ids: &[ItemId]) -> Result<usize, StoreError> {
        let uuids: Vec<Uuid> = ids.iter().map(|id| id.as_uuid()).collect();
        let result = sqlx::query(
            r#"
            UPDATE items SET enrichment_error = NULL
            WHERE project_id = $1 AND id = ANY($2) AND enrichment_error IS NOT NULL
            "#,
        )
        .bind(project_id.as_uuid())
        .bind(uuids)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("clear_item_errors", e))?;
        Ok(result.rows_affected() as usize)
    }

    #[instrument(skip(self, result), fields(item_id = %result.item_id), err)]
    async fn save_item_result(&self, result: &EnrichmentResult) -> Result<(), StoreError> {
        let mut tx = self.begin("save_item_result").await?;
        let mut record = Self::lock_item(&mut tx, result.item_id).await?;
        record.status().transition(ItemStatus::Enriched)?;
        record.apply_result(result);
        Self::write_item_outcome(&mut tx, &record).await?;
        tx.commit().await.map_err(|e| map_sqlx_error("save_item_result", e))
    }

    #[instrument(skip(self, error), fields(item_id = %item_id), err)]
    async fn save_item_error(&self, item_id: ItemId, error: &str) -> Result<(), StoreError> {
        let mut tx = self.begin("save_item_error").await?;
        let mut record = Self::lock_item(&mut tx, item_id).await?;
        record.status().transition(ItemStatus::Failed)?;
        record.apply_error(error);
        Self::write_item_outcome(&mut tx, &record).await?;
        tx.commit().await.map_err(|e| map_sqlx_error("save_item_error", e))
    }

    async fn load_item(&self, item_id: ItemId) -> Result<Option<ItemRecord>, StoreError> {
        let row = sqlx::query(&format!("SELECT {ITEM_COLUMNS} FROM items WHERE id = $1"))
            .bind(item_id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("load_item", e))?;
        row.as_ref().map(item_from_row).transpose()
    }

    async fn list_items(&self, project_id: ProjectId) -> Result<Vec<ItemRecord>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {ITEM_COLUMNS} FROM items WHERE project_id = $1 ORDER BY id ASC"
        ))
        .bind(project_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_items", e))?;
        rows.iter().map(item_from_row).collect()
    }

    async fn context_rows(&self, project_id: ProjectId) -> Result<Vec<ContextRow>, StoreError> {
        let items = self.list_items(project_id).await?;
        Ok(items.iter().filter_map(ItemRecord::context_row).collect())
    }

    #[instrument(skip(self, design), fields(design_id = %design.id, project_id = %design.project_id), err)]
    async fn insert_design(&self, design: &GeneratedDesign) -> Result<(), StoreError> {
        if self.load_project(design.project_id).await?.is_none() {
            return Err(StoreError::ProjectNotFound(design.project_id));
        }
        sqlx::query(&format!(
            "INSERT INTO designs ({DESIGN_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)"
        ))
        .bind(design.id.as_uuid())
        .bind(design.project_id.as_uuid())
        .bind(&design.product_type)
        .bind(Json(&design.locked_attributes))
        .bind(Json(&design.predicted_attributes))
        .bind(design.success_score)
        .bind(Json(&design.generated_images))
        .bind(design.image_status.as_str())
        .bind(design.generated_image_url.as_deref())
        .bind(design.sales_text.as_deref())
        .bind(design.sales_text_status.as_str())
        .bind(design.created_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_design", e))?;
        Ok(())
    }

    async fn load_design(
        &self,
        project_id: ProjectId,
        design_id: DesignId,
    ) -> Result<Option<GeneratedDesign>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {DESIGN_COLUMNS} FROM designs WHERE id = $1 AND project_id = $2"
        ))
        .bind(design_id.as_uuid())
        .bind(project_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_design", e))?;
        row.as_ref().map(design_from_row).transpose()
    }

    #[instrument(skip(self, views), fields(design_id = %design_id), err)]
    async fn save_views(&self, design_id: DesignId, views: &ViewSet) -> Result<(), StoreError> {
        let mut tx = self.begin("save_views").await?;
        let mut design = Self::lock_design(&mut tx, design_id).await?;
        design.generated_images.advance_to(views)?;
        sqlx::query("UPDATE designs SET generated_images = $2 WHERE id = $1")
            .bind(design_id.as_uuid())
            .bind(Json(&design.generated_images))
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("save_views", e))?;
        tx.commit().await.map_err(|e| map_sqlx_error("save_views", e))
    }

    #[instrument(skip(self, primary_url), fields(design_id = %design_id, status = %status), err)]
    async fn save_image_status(
        &self,
        design_id: DesignId,
        status: ImageStatus,
        primary_url: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut tx = self.begin("save_image_status").await?;
        let mut design = Self::lock_design(&mut tx, design_id).await?;
        design.set_image_status(status)?;
        if let Some(url) = primary_url {
            design.generated_image_url = Some(url.to_string());
        }
        sqlx::query("UPDATE designs SET image_generation_status = $2, generated_image_url = $3 WHERE id = $1")
            .bind(design_id.as_uuid())
            .bind(design.image_status.as_str())
            .bind(design.generated_image_url.as_deref())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("save_image_status", e))?;
        tx.commit().await.map_err(|e| map_sqlx_error("save_image_status", e))
    }

    #[instrument(skip(self, text), fields(design_id = %design_id, status = %status), err)]
    async fn save_sales_text(
        &self,
        design_id: DesignId,
        status: StageStatus,
        text: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut tx = self.begin("save_sales_text").await?;
        let mut design = Self::lock_design(&mut tx, design_id).await?;
        design.set_sales_text(status, text.map(str::to_string))?;
        sqlx::query("UPDATE designs SET sales_text_generation_status = $2, sales_text = $3 WHERE id = $1")
            .bind(design_id.as_uuid())
            .bind(design.sales_text_status.as_str())
            .bind(design.sales_text.as_deref())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("save_sales_text", e))?;
        tx.commit().await.map_err(|e| map_sqlx_error("save_sales_text", e))
    }
}

// ── row decoding ────────────────────────────────────────────────────────────

fn project_from_row(row: &PgRow) -> Result<Project, StoreError> {
    let id = ProjectId::from_uuid(column::<Uuid>(row, "id")?);
    let schema: Option<Json<AttributeSchema>> = column(row, "attribute_schema")?;
    let status: String = column(row, "enrichment_status")?;
    Ok(Project {
        id,
        name: column(row, "name")?,
        product_type: column(row, "product_type")?,
        attribute_schema: schema.map(|Json(s)| s),
        enrichment: ProjectEnrichmentState {
            project_id: id,
            status: status.parse::<RunStatus>()?,
            processed: from_i32(column(row, "enrichment_processed")?)?,
            total: from_i32(column(row, "enrichment_total")?)?,
            current_item_id: column::<Option<Uuid>>(row, "enrichment_current_article_id")?
                .map(ItemId::from_uuid),
            started_at: column(row, "enrichment_started_at")?,
            completed_at: column(row, "enrichment_completed_at")?,
        },
    })
}

fn item_from_row(row: &PgRow) -> Result<ItemRecord, StoreError> {
    let attributes: Option<Json<AttributeMap>> = column(row, "enriched_attributes")?;
    let confidence: Option<i16> = column(row, "mismatch_confidence")?;
    Ok(ItemRecord {
        project_id: ProjectId::from_uuid(column(row, "project_id")?),
        item: WorkItem {
            id: ItemId::from_uuid(column(row, "id")?),
            product_type: column(row, "product_type")?,
            description: column(row, "description")?,
        },
        enriched_attributes: attributes.map(|Json(a)| a),
        enrichment_error: column(row, "enrichment_error")?,
        mismatch_confidence: confidence
            .map(|c| u8::try_from(c).map_err(|_| decode_error("mismatch_confidence", c)))
            .transpose()?,
        success_score: column(row, "success_score")?,
    })
}

fn design_from_row(row: &PgRow) -> Result<GeneratedDesign, StoreError> {
    let Json(locked_attributes): Json<AttributeMap> = column(row, "locked_attributes")?;
    let Json(predicted_attributes): Json<AttributeMap> = column(row, "predicted_attributes")?;
    let Json(generated_images): Json<ViewSet> = column(row, "generated_images")?;
    let image_status: String = column(row, "image_generation_status")?;
    let sales_text_status: String = column(row, "sales_text_generation_status")?;
    Ok(GeneratedDesign {
        id: DesignId::from_uuid(column(row, "id")?),
        project_id: ProjectId::from_uuid(column(row, "project_id")?),
        product_type: column(row, "product_type")?,
        locked_attributes,
        predicted_attributes,
        success_score: column(row, "success_score")?,
        generated_images,
        image_status: image_status.parse::<ImageStatus>()?,
        generated_image_url: column(row, "generated_image_url")?,
        sales_text: column(row, "sales_text")?,
        sales_text_status: sales_text_status.parse::<StageStatus>()?,
        created_at: column(row, "created_at")?,
    })
}

fn column<'r, T>(row: &'r PgRow, name: &str) -> Result<T, StoreError>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get::<T, _>(name)
        .map_err(|e| StoreError::Backend(format!("failed to read column {name}: {e}")))
}

fn to_i32(value: u32) -> Result<i32, StoreError> {
    i32::try_from(value).map_err(|_| decode_error("counter", value))
}

fn from_i32(value: i32) -> Result<u32, StoreError> {
    u32::try_from(value).map_err(|_| decode_error("counter", value))
}

fn decode_error(what: &str, value: impl std::fmt::Display) -> StoreError {
    StoreError::Backend(format!("{what} out of range: {value}"))
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {operation}: {}", db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => StoreError::AlreadyExists(msg),
                _ => StoreError::Backend(msg),
            }
        }
        other => StoreError::Backend(format!("{operation}: {other}")),
    }
}
