//! Table definitions. Every statement is idempotent; running them against an
//! existing database is a no-op.

use sqlx::SqlitePool;

const STATEMENTS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS uploads (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER NOT NULL,
        test_identifier TEXT NOT NULL,
        content_ref TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'pending',
        attempts INTEGER NOT NULL DEFAULT 0,
        last_error TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_uploads_status ON uploads(status)",
    r#"
    CREATE TABLE IF NOT EXISTS skills (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE,
        category TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS skill_progress (
        user_id INTEGER NOT NULL,
        skill_id INTEGER NOT NULL REFERENCES skills(id),
        status TEXT NOT NULL,
        last_updated TEXT NOT NULL,
        PRIMARY KEY (user_id, skill_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS missed_skills (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER NOT NULL,
        upload_id INTEGER NOT NULL REFERENCES uploads(id),
        skill_id INTEGER NOT NULL REFERENCES skills(id),
        identified_at TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_missed_skills_upload ON missed_skills(upload_id)",
    r#"
    CREATE TABLE IF NOT EXISTS quizzes (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER NOT NULL,
        upload_id INTEGER NOT NULL UNIQUE REFERENCES uploads(id),
        created_at TEXT NOT NULL,
        completed_at TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS quiz_questions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        quiz_id INTEGER NOT NULL REFERENCES quizzes(id),
        skill_id INTEGER NOT NULL REFERENCES skills(id),
        text TEXT NOT NULL,
        options TEXT NOT NULL,
        correct_option TEXT NOT NULL,
        generated_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS quiz_attempts (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER NOT NULL,
        question_id INTEGER NOT NULL REFERENCES quiz_questions(id),
        submitted_answer TEXT NOT NULL,
        is_correct INTEGER NOT NULL,
        attempted_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS video_jobs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER NOT NULL,
        skill_id INTEGER NOT NULL REFERENCES skills(id),
        quiz_attempt_id INTEGER REFERENCES quiz_attempts(id),
        status TEXT NOT NULL DEFAULT 'queued',
        attempts INTEGER NOT NULL DEFAULT 0,
        last_error TEXT,
        queued_at TEXT NOT NULL,
        claimed_at TEXT,
        delivered_at TEXT
    )
    "#,
    // At most one in-flight job per (user, skill).
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS idx_video_jobs_active
        ON video_jobs(user_id, skill_id)
        WHERE status IN ('queued', 'generating')
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS lessons (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        skill_id INTEGER NOT NULL REFERENCES skills(id),
        job_id INTEGER NOT NULL UNIQUE REFERENCES video_jobs(id),
        script TEXT NOT NULL,
        generated_at TEXT NOT NULL,
        watched_at TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS practice_questions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        lesson_id INTEGER NOT NULL REFERENCES lessons(id),
        skill_id INTEGER NOT NULL REFERENCES skills(id),
        text TEXT NOT NULL,
        options TEXT NOT NULL,
        correct_option TEXT NOT NULL,
        generated_at TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_practice_questions_lesson ON practice_questions(lesson_id)",
    r#"
    CREATE TABLE IF NOT EXISTS practice_attempts (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER NOT NULL,
        question_id INTEGER NOT NULL REFERENCES practice_questions(id),
        submitted_answer TEXT NOT NULL,
        is_correct INTEGER NOT NULL,
        attempted_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS growth_counters (
        user_id INTEGER PRIMARY KEY,
        count INTEGER NOT NULL DEFAULT 0,
        last_growth_at TEXT
    )
    "#,
];

pub(crate) async fn create_all(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    for statement in STATEMENTS {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}
