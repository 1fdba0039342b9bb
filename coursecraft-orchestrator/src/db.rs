use sqlx::{PgPool, postgres::PgPoolOptions};
use std::time::Duration;

pub async fn create_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    // Create courses table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS courses (
            id UUID PRIMARY KEY,
            title VARCHAR(255) NOT NULL,
            subject VARCHAR(255) NOT NULL,
            audience JSONB NOT NULL,
            difficulty DOUBLE PRECISION NOT NULL,
            status VARCHAR(50) NOT NULL,
            final_assessment JSONB,
            quality_metrics JSONB,
            created_at TIMESTAMPTZ NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create chapters table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chapters (
            id UUID PRIMARY KEY,
            course_id UUID NOT NULL REFERENCES courses(id) ON DELETE CASCADE,
            sequence_number INTEGER NOT NULL,
            degraded BOOLEAN NOT NULL DEFAULT FALSE,
            data JSONB NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL,
            UNIQUE (course_id, sequence_number)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create generation tasks table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS generation_tasks (
            id UUID PRIMARY KEY,
            course_id UUID NOT NULL REFERENCES courses(id) ON DELETE CASCADE,
            scope JSONB NOT NULL,
            status VARCHAR(50) NOT NULL,
            phase VARCHAR(50),
            progress DOUBLE PRECISION NOT NULL DEFAULT 0,
            error JSONB,
            created_at TIMESTAMPTZ NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes for better query performance
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_courses_status ON courses(status)")
        .execute(pool)
        .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_generation_tasks_course ON generation_tasks(course_id, created_at DESC)",
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_generation_tasks_status ON generation_tasks(status)")
        .execute(pool)
        .await?;

    tracing::info!("Database migrations completed successfully");
    Ok(())
}
