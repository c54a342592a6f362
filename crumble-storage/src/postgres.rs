use crate::{ChunkEdit, ChunkStore, WorldRecord, WorldState, WorldStore};
use anyhow::{Context, Result};
use async_trait::async_trait;
use deadpool_postgres::{Config, ManagerConfig, Object, Pool, RecyclingMethod, Runtime};
use log::info;
use tokio_postgres::NoTls;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS worlds (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        seed TEXT NOT NULL,
        state JSONB NOT NULL,
        created_at TIMESTAMP DEFAULT NOW()
    );
    CREATE TABLE IF NOT EXISTS chunks (
        world_id TEXT NOT NULL,
        x INT NOT NULL,
        y INT NOT NULL,
        mask BYTEA NOT NULL,
        updated_at TIMESTAMP DEFAULT NOW(),
        PRIMARY KEY (world_id, x, y)
    );
";

/// Worlds and chunk masks in Postgres, behind a deadpool connection pool.
pub struct PostgresStorage {
    pool: Pool,
}

impl PostgresStorage {
    /// Builds the pool and creates the tables if they are missing.
    pub async fn connect(url: &str) -> Result<Self> {
        let config = Config {
            url: Some(url.to_string()),
            manager: Some(ManagerConfig {
                recycling_method: RecyclingMethod::Fast,
            }),
            ..Config::default()
        };
        let pool = config
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .context("Failed to create Postgres pool")?;

        let storage = Self { pool };
        storage
            .conn()
            .await?
            .batch_execute(SCHEMA)
            .await
            .context("Failed to create tables")?;
        info!("Postgres storage ready");
        Ok(storage)
    }

    async fn conn(&self) -> Result<Object> {
        self.pool.get().await.context("No Postgres connection available")
    }
}

fn row_to_world(row: &tokio_postgres::Row) -> Result<WorldRecord> {
    let state: serde_json::Value = row.get(3);
    Ok(WorldRecord {
        id: row.get(0),
        name: row.get(1),
        seed: row.get(2),
        state: serde_json::from_value(state).context("Malformed world state")?,
    })
}

#[async_trait]
impl ChunkStore for PostgresStorage {
    async fn load_chunk(&self, world_id: &str, x: i32, y: i32) -> Result<Option<Vec<u8>>> {
        let client = self.conn().await?;

        let row = client
            .query_opt(
                "SELECT mask FROM chunks WHERE world_id = $1 AND x = $2 AND y = $3",
                &[&world_id, &x, &y],
            )
            .await
            .context("Failed to load chunk mask")?;
        Ok(row.map(|r| r.get(0)))
    }

    async fn save_chunks(&self, world_id: &str, edits: &[ChunkEdit]) -> Result<()> {
        let mut client = self.conn().await?;
        let tx = client.transaction().await.context("Failed to open transaction")?;

        // last write wins
        let upsert = tx
            .prepare(
                "INSERT INTO chunks (world_id, x, y, mask) VALUES ($1, $2, $3, $4)
                 ON CONFLICT (world_id, x, y) DO UPDATE SET mask = EXCLUDED.mask, updated_at = NOW()",
            )
            .await
            .context("Failed to prepare chunk upsert")?;

        for edit in edits {
            tx.execute(&upsert, &[&world_id, &edit.x, &edit.y, &edit.mask.as_slice()])
                .await
                .with_context(|| format!("Failed to upsert chunk ({}, {})", edit.x, edit.y))?;
        }

        tx.commit().await.context("Failed to commit chunk batch")?;
        Ok(())
    }

    async fn clear_world(&self, world_id: &str) -> Result<u64> {
        let client = self.conn().await?;
        let removed = client
            .execute("DELETE FROM chunks WHERE world_id = $1", &[&world_id])
            .await
            .context("Failed to clear world chunks")?;
        Ok(removed)
    }
}

#[async_trait]
impl WorldStore for PostgresStorage {
    async fn list_worlds(&self) -> Result<Vec<WorldRecord>> {
        let client = self.conn().await?;
        let rows = client
            .query("SELECT id, name, seed, state FROM worlds ORDER BY created_at", &[])
            .await
            .context("Failed to list worlds")?;
        rows.iter().map(row_to_world).collect()
    }

    async fn get_world(&self, id: &str) -> Result<Option<WorldRecord>> {
        let client = self.conn().await?;
        let rows = client
            .query("SELECT id, name, seed, state FROM worlds WHERE id = $1", &[&id])
            .await
            .context("Failed to query world")?;
        rows.first().map(row_to_world).transpose()
    }

    async fn insert_world(&self, world: &WorldRecord) -> Result<()> {
        let client = self.conn().await?;
        let state = serde_json::to_value(&world.state)?;
        client.execute(
            "INSERT INTO worlds (id, name, seed, state) VALUES ($1, $2, $3, $4)",
            &[&world.id, &world.name, &world.seed, &state],
        ).await.context("Failed to insert world")?;
        Ok(())
    }

    async fn delete_world(&self, id: &str) -> Result<bool> {
        let mut client = self.conn().await?;
        let tx = client.transaction().await.context("Failed to open transaction")?;
        tx.execute("DELETE FROM chunks WHERE world_id = $1", &[&id])
            .await
            .context("Failed to delete world chunks")?;
        let removed = tx
            .execute("DELETE FROM worlds WHERE id = $1", &[&id])
            .await
            .context("Failed to delete world")?;
        tx.commit().await.context("Failed to commit world delete")?;
        Ok(removed > 0)
    }

    async fn update_state(&self, id: &str, state: &WorldState) -> Result<bool> {
        let client = self.conn().await?;
        let state = serde_json::to_value(state)?;
        let updated = client
            .execute("UPDATE worlds SET state = $2 WHERE id = $1", &[&id, &state])
            .await
            .context("Failed to update world state")?;
        Ok(updated > 0)
    }
}
