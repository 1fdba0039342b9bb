//! Course Repository
//!
//! PostgreSQL storage for courses. Chapters live in their own table, one row
//! per chapter with the full chapter document in a JSONB column.

use super::{CoursePersistence, PersistenceError, check_transition};
use async_trait::async_trait;
use coursecraft_core::domain::course::{Chapter, Course, CourseStatus, Quiz};
use coursecraft_core::domain::quality::QualityMetrics;
use sqlx::PgPool;
use sqlx::postgres::PgQueryResult;
use uuid::Uuid;

#[derive(Clone)]
pub struct PgCourseRepository {
    pool: PgPool,
}

impl PgCourseRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CoursePersistence for PgCourseRepository {
    async fn create_course(&self, course: &Course) -> Result<(), PersistenceError> {
        sqlx::query(
            r#"
            INSERT INTO courses (id, title, subject, audience, difficulty, status,
                                 final_assessment, quality_metrics, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(course.id)
        .bind(&course.title)
        .bind(&course.subject)
        .bind(serde_json::to_value(&course.audience)?)
        .bind(course.difficulty)
        .bind(course.status.as_str())
        .bind(
            course
                .final_assessment
                .as_ref()
                .map(serde_json::to_value)
                .transpose()?,
        )
        .bind(
            course
                .quality_metrics
                .as_ref()
                .map(serde_json::to_value)
                .transpose()?,
        )
        .bind(course.created_at)
        .bind(course.updated_at)
        .execute(&self.pool)
        .await?;

        for chapter in &course.chapters {
            self.save_chapter(course.id, chapter).await?;
        }

        Ok(())
    }

    async fn load_course(&self, course_id: Uuid) -> Result<Option<Course>, PersistenceError> {
        let row = sqlx::query_as::<_, CourseRow>(
            r#"
            SELECT id, title, subject, audience, difficulty, status,
                   final_assessment, quality_metrics, created_at, updated_at
            FROM courses
            WHERE id = $1
            "#,
        )
        .bind(course_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let chapter_rows = sqlx::query_as::<_, ChapterRow>(
            r#"
            SELECT data
            FROM chapters
            WHERE course_id = $1
            ORDER BY sequence_number ASC
            "#,
        )
        .bind(course_id)
        .fetch_all(&self.pool)
        .await?;

        let chapters = chapter_rows
            .into_iter()
            .map(|r| serde_json::from_value::<Chapter>(r.data))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Some(row.into_course(chapters)?))
    }

    async fn transition_course_status(
        &self,
        course_id: Uuid,
        from: CourseStatus,
        to: CourseStatus,
    ) -> Result<(), PersistenceError> {
        check_transition(course_id, from, to)?;

        let result = sqlx::query(
            "UPDATE courses SET status = $1, updated_at = $2 WHERE id = $3 AND status = $4",
        )
        .bind(to.as_str())
        .bind(chrono::Utc::now())
        .bind(course_id)
        .bind(from.as_str())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() > 0 {
            return Ok(());
        }

        // Nothing matched: either the course is gone or its status moved on.
        let actual: Option<String> = sqlx::query_scalar("SELECT status FROM courses WHERE id = $1")
            .bind(course_id)
            .fetch_optional(&self.pool)
            .await?;
        match actual {
            None => Err(PersistenceError::CourseNotFound(course_id)),
            Some(actual) => Err(PersistenceError::StatusConflict {
                course_id,
                expected: from,
                actual: actual
                    .parse::<CourseStatus>()
                    .map_err(PersistenceError::Unavailable)?,
            }),
        }
    }

    async fn save_chapter(
        &self,
        course_id: Uuid,
        chapter: &Chapter,
    ) -> Result<(), PersistenceError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO chapters (id, course_id, sequence_number, degraded, data, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO UPDATE
            SET sequence_number = EXCLUDED.sequence_number,
                degraded = EXCLUDED.degraded,
                data = EXCLUDED.data,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(chapter.id)
        .bind(course_id)
        .bind(chapter.sequence_number as i32)
        .bind(chapter.degraded)
        .bind(serde_json::to_value(chapter)?)
        .bind(chrono::Utc::now())
        .execute(&mut *tx)
        .await?;

        let result = sqlx::query("UPDATE courses SET updated_at = $1 WHERE id = $2")
            .bind(chrono::Utc::now())
            .bind(course_id)
            .execute(&mut *tx)
            .await?;
        ensure_found(result, course_id)?;

        tx.commit().await?;
        Ok(())
    }

    async fn save_final_assessment(
        &self,
        course_id: Uuid,
        assessment: Option<&Quiz>,
    ) -> Result<(), PersistenceError> {
        let value = assessment.map(serde_json::to_value).transpose()?;
        let result = sqlx::query(
            "UPDATE courses SET final_assessment = $1, updated_at = $2 WHERE id = $3",
        )
        .bind(value)
        .bind(chrono::Utc::now())
        .bind(course_id)
        .execute(&self.pool)
        .await?;
        ensure_found(result, course_id)
    }

    async fn save_quality_metrics(
        &self,
        course_id: Uuid,
        metrics: &QualityMetrics,
    ) -> Result<(), PersistenceError> {
        let result = sqlx::query(
            "UPDATE courses SET quality_metrics = $1, updated_at = $2 WHERE id = $3",
        )
        .bind(serde_json::to_value(metrics)?)
        .bind(chrono::Utc::now())
        .bind(course_id)
        .execute(&self.pool)
        .await?;
        ensure_found(result, course_id)
    }
}

fn ensure_found(result: PgQueryResult, course_id: Uuid) -> Result<(), PersistenceError> {
    if result.rows_affected() == 0 {
        return Err(PersistenceError::CourseNotFound(course_id));
    }
    Ok(())
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct CourseRow {
    id: Uuid,
    title: String,
    subject: String,
    audience: serde_json::Value,
    difficulty: f64,
    status: String,
    final_assessment: Option<serde_json::Value>,
    quality_metrics: Option<serde_json::Value>,
    created_at: chrono::DateTime<chrono::Utc>,
    updated_at: chrono::DateTime<chrono::Utc>,
}

impl CourseRow {
    fn into_course(self, chapters: Vec<Chapter>) -> Result<Course, PersistenceError> {
        let status = self
            .status
            .parse::<CourseStatus>()
            .map_err(PersistenceError::Unavailable)?;

        Ok(Course {
            id: self.id,
            title: self.title,
            subject: self.subject,
            audience: serde_json::from_value(self.audience)?,
            difficulty: self.difficulty,
            status,
            chapters,
            final_assessment: self.final_assessment.map(serde_json::from_value).transpose()?,
            quality_metrics: self.quality_metrics.map(serde_json::from_value).transpose()?,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ChapterRow {
    data: serde_json::Value,
}
