use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use slicer_core::models::{Extension, Image, Slice, SliceStatus};
use slicer_core::AppError;

use crate::registry::Registry;

const SLICE_COLUMNS: &str = "id, image_id, width, height, size, quality, filename, namespace, \
     path, cropped, extension, mime, created_at, is_valid, status, is_original";

/// Postgres-backed registry.
#[derive(Clone)]
pub struct PgRegistry {
    pool: PgPool,
    /// Upper bound on a transaction commit.
    tx_commit_timeout: Duration,
}

#[derive(Debug, sqlx::FromRow)]
struct ImageRow {
    id: Uuid,
    name: String,
    original_name: String,
    original_ext: String,
    original_size: i64,
    namespace: String,
    publish_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct SliceRow {
    id: Uuid,
    image_id: Uuid,
    width: i32,
    height: i32,
    size: i64,
    quality: i32,
    filename: String,
    namespace: String,
    path: String,
    cropped: bool,
    extension: String,
    mime: String,
    created_at: DateTime<Utc>,
    is_valid: bool,
    status: SliceStatus,
    is_original: bool,
}

fn map_image_row(row: ImageRow) -> Result<Image, AppError> {
    Ok(Image {
        id: row.id,
        name: row.name,
        original_name: row.original_name,
        original_ext: Extension::from_str(&row.original_ext)
            .map_err(|_| AppError::RegistryFailed(format!("bad extension {}", row.original_ext)))?,
        original_size: row.original_size,
        namespace: row.namespace,
        publish_at: row.publish_at,
        created_at: row.created_at,
        updated_at: row.updated_at,
        original_slice: None,
        slices: Vec::new(),
    })
}

fn map_slice_row(row: SliceRow) -> Result<Slice, AppError> {
    Ok(Slice {
        id: row.id,
        image_id: row.image_id,
        width: row.width,
        height: row.height,
        size: row.size,
        quality: row.quality,
        filename: row.filename,
        namespace: row.namespace,
        path: row.path,
        cropped: row.cropped,
        extension: Extension::from_str(&row.extension)
            .map_err(|_| AppError::RegistryFailed(format!("bad extension {}", row.extension)))?,
        mime: row.mime,
        created_at: row.created_at,
        is_valid: row.is_valid,
        status: row.status,
        is_original: row.is_original,
    })
}

impl PgRegistry {
    pub fn new(pool: PgPool, tx_commit_timeout: Duration) -> Self {
        PgRegistry {
            pool,
            tx_commit_timeout,
        }
    }

    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        acquire_timeout: Duration,
        tx_commit_timeout: Duration,
    ) -> Result<Self, AppError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect(database_url)
            .await?;

        Ok(PgRegistry {
            pool,
            tx_commit_timeout,
        })
    }

    async fn commit_bounded(&self, tx: Transaction<'_, Postgres>) -> Result<(), AppError> {
        match tokio::time::timeout(self.tx_commit_timeout, tx.commit()).await {
            Ok(result) => result.map_err(AppError::from),
            Err(_) => Err(AppError::RegistryFailed(format!(
                "transaction commit timed out after {}s",
                self.tx_commit_timeout.as_secs()
            ))),
        }
    }

    async fn fetch_image(&self, id: Uuid, only_published: bool) -> Result<Image, AppError> {
        let row = sqlx::query_as::<Postgres, ImageRow>(
            "SELECT id, name, original_name, original_ext, original_size, namespace, \
                    publish_at, created_at, updated_at \
             FROM images WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("image {} not found", id)))?;

        let image = map_image_row(row)?;

        if only_published && !image.is_published() {
            return Err(AppError::NotFound(format!("image {} not found", id)));
        }

        Ok(image)
    }

    async fn fetch_original_slice(&self, image_id: Uuid) -> Result<Slice, AppError> {
        let row = sqlx::query_as::<Postgres, SliceRow>(&format!(
            "SELECT {} FROM slices \
             WHERE image_id = $1 AND is_original AND status = 'active'",
            SLICE_COLUMNS
        ))
        .bind(image_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| {
            AppError::RegistryFailed(format!("image {} has no original slice", image_id))
        })?;

        map_slice_row(row)
    }

    async fn insert_slice(
        tx: &mut Transaction<'_, Postgres>,
        slice: &Slice,
    ) -> Result<(), AppError> {
        sqlx::query(
            "INSERT INTO slices (id, image_id, width, height, size, quality, filename, \
                                 namespace, path, cropped, extension, mime, created_at, \
                                 is_valid, status, is_original) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)",
        )
        .bind(slice.id)
        .bind(slice.image_id)
        .bind(slice.width)
        .bind(slice.height)
        .bind(slice.size)
        .bind(slice.quality)
        .bind(&slice.filename)
        .bind(&slice.namespace)
        .bind(&slice.path)
        .bind(slice.cropped)
        .bind(slice.extension.as_str())
        .bind(&slice.mime)
        .bind(slice.created_at)
        .bind(slice.is_valid)
        .bind(slice.status)
        .bind(slice.is_original)
        .execute(&mut **tx)
        .await
        .map_err(|e| match e.as_database_error() {
            Some(db) if db.is_unique_violation() => AppError::RegistryFailed(format!(
                "slice already exists for image {} filename {}",
                slice.image_id, slice.filename
            )),
            _ => AppError::from(e),
        })?;

        Ok(())
    }
}

#[async_trait]
impl Registry for PgRegistry {
    fn generate_id(&self) -> Uuid {
        Uuid::new_v4()
    }

    #[tracing::instrument(skip(self), fields(db.table = "images"))]
    async fn get_image_by_id(&self, id: Uuid, only_published: bool) -> Result<Image, AppError> {
        let mut image = self.fetch_image(id, only_published).await?;
        image.original_slice = Some(self.fetch_original_slice(id).await?);
        Ok(image)
    }

    async fn get_image_with_slices_by_id(
        &self,
        id: Uuid,
        only_published: bool,
    ) -> Result<Image, AppError> {
        let mut image = self.fetch_image(id, only_published).await?;

        let rows = sqlx::query_as::<Postgres, SliceRow>(&format!(
            "SELECT {} FROM slices \
             WHERE image_id = $1 AND status = 'active' ORDER BY created_at",
            SLICE_COLUMNS
        ))
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        let mut slices = Vec::with_capacity(rows.len());
        for row in rows {
            slices.push(map_slice_row(row)?);
        }

        image.original_slice = slices.iter().find(|s| s.is_original).cloned();
        if image.original_slice.is_none() {
            return Err(AppError::RegistryFailed(format!(
                "image {} has no original slice",
                id
            )));
        }
        image.slices = slices;

        Ok(image)
    }

    async fn get_slice_by_image_id_and_filename(
        &self,
        image_id: Uuid,
        filename: &str,
    ) -> Result<Slice, AppError> {
        let row = sqlx::query_as::<Postgres, SliceRow>(&format!(
            "SELECT {} FROM slices \
             WHERE image_id = $1 AND filename = $2 AND status = 'active'",
            SLICE_COLUMNS
        ))
        .bind(image_id)
        .bind(filename)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| {
            AppError::NotFound(format!("slice {} of image {} not found", filename, image_id))
        })?;

        map_slice_row(row)
    }

    #[tracing::instrument(skip_all, fields(image_id = %image.id))]
    async fn create_image_with_original_slice(
        &self,
        image: &Image,
        slice: &Slice,
    ) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO images (id, name, original_name, original_ext, original_size, \
                                 namespace, publish_at, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(image.id)
        .bind(&image.name)
        .bind(&image.original_name)
        .bind(image.original_ext.as_str())
        .bind(image.original_size)
        .bind(&image.namespace)
        .bind(image.publish_at)
        .bind(image.created_at)
        .bind(image.updated_at)
        .execute(&mut *tx)
        .await?;

        Self::insert_slice(&mut tx, slice).await?;

        self.commit_bounded(tx).await?;
        Ok(())
    }

    async fn create_slice(&self, slice: &Slice) -> Result<Uuid, AppError> {
        let mut tx = self.pool.begin().await?;
        Self::insert_slice(&mut tx, slice).await?;
        self.commit_bounded(tx).await?;
        Ok(slice.id)
    }

    async fn depublish_image(&self, id: Uuid) -> Result<(), AppError> {
        let result = sqlx::query("UPDATE images SET publish_at = NULL, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("image {} not found", id)));
        }

        Ok(())
    }

    async fn remove_image_with_all_slices(&self, id: Uuid) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM slices WHERE image_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        let result = sqlx::query("DELETE FROM images WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("image {} not found", id)));
        }

        self.commit_bounded(tx).await?;
        Ok(())
    }

    async fn migrate(&self) -> Result<(), AppError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS images (\
                 id UUID PRIMARY KEY, \
                 name TEXT NOT NULL, \
                 original_name TEXT NOT NULL, \
                 original_ext TEXT NOT NULL, \
                 original_size BIGINT NOT NULL, \
                 namespace TEXT NOT NULL, \
                 publish_at TIMESTAMPTZ, \
                 created_at TIMESTAMPTZ NOT NULL, \
                 updated_at TIMESTAMPTZ NOT NULL\
             )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "DO $$ BEGIN \
                 CREATE TYPE slice_status AS ENUM \
                     ('unsaved', 'pending', 'processing', 'retrying', 'active'); \
             EXCEPTION WHEN duplicate_object THEN NULL; END $$",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS slices (\
                 id UUID PRIMARY KEY, \
                 image_id UUID NOT NULL REFERENCES images(id) ON DELETE CASCADE, \
                 width INT NOT NULL, \
                 height INT NOT NULL, \
                 size BIGINT NOT NULL, \
                 quality INT NOT NULL DEFAULT 0, \
                 filename TEXT NOT NULL, \
                 namespace TEXT NOT NULL, \
                 path TEXT NOT NULL, \
                 cropped BOOLEAN NOT NULL DEFAULT FALSE, \
                 extension TEXT NOT NULL, \
                 mime TEXT NOT NULL, \
                 created_at TIMESTAMPTZ NOT NULL, \
                 is_valid BOOLEAN NOT NULL DEFAULT TRUE, \
                 status slice_status NOT NULL, \
                 is_original BOOLEAN NOT NULL DEFAULT FALSE\
             )",
        )
        .execute(&self.pool)
        .await?;

        // serializes concurrent writers racing on the same derivative
        sqlx::query(
            "CREATE UNIQUE INDEX IF NOT EXISTS slices_image_filename_active_uniq \
             ON slices (image_id, filename) WHERE status = 'active'",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS slices_image_id_idx ON slices (image_id)")
            .execute(&self.pool)
            .await?;

        tracing::info!("registry schema migrated");
        Ok(())
    }
}
