use sea_orm_migration::prelude::*;

pub struct Migration;

impl MigrationName for Migration {
    fn name(&self) -> &str {
        "m001_metric_tables"
    }
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Plain SQL shared by SQLite and PostgreSQL; one statement per call.
        let conn = manager.get_connection();
        conn.execute_unprepared(CREATE_GAUGES).await?;
        conn.execute_unprepared(CREATE_COUNTERS).await?;
        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let conn = manager.get_connection();
        conn.execute_unprepared("DROP TABLE IF EXISTS counters").await?;
        conn.execute_unprepared("DROP TABLE IF EXISTS gauges").await?;
        Ok(())
    }
}

const CREATE_GAUGES: &str = "
CREATE TABLE IF NOT EXISTS gauges (
    name TEXT PRIMARY KEY NOT NULL,
    value DOUBLE PRECISION NOT NULL
)";

const CREATE_COUNTERS: &str = "
CREATE TABLE IF NOT EXISTS counters (
    name TEXT PRIMARY KEY NOT NULL,
    value BIGINT NOT NULL
)";
