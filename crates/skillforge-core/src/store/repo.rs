//! Row-level queries for every pipeline entity.
//!
//! Functions take a bare connection so they compose inside a
//! [`WriteTx`](super::WriteTx) or on a read connection alike. Transition
//! helpers are compare-and-set statements: they return `true` only when the
//! row was in the expected state and has been moved.

use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::SqliteConnection;

use crate::model::{
    AttemptId, GeneratedQuestion, GrowthCounter, Lesson, LessonId, MissedSkillRecord,
    PracticeAttemptId, PracticeQuestion, PracticeQuestionId, ProgressStatus, QuestionId, Quiz,
    QuizId, QuizQuestion, Skill, SkillId, SkillProgress, Upload, UploadId, UploadStatus, UserId,
    VideoJob, VideoJobId, VideoJobStatus,
};

type Result<T> = std::result::Result<T, sqlx::Error>;

// ---------------------------------------------------------------------------
// Uploads
// ---------------------------------------------------------------------------

pub async fn insert_upload(
    conn: &mut SqliteConnection,
    user: UserId,
    test_identifier: &str,
    content_ref: &str,
    status: UploadStatus,
    now: DateTime<Utc>,
) -> Result<Upload> {
    let id: UploadId = sqlx::query_scalar(
        r#"
        INSERT INTO uploads (user_id, test_identifier, content_ref, status, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?)
        RETURNING id
        "#,
    )
    .bind(user)
    .bind(test_identifier)
    .bind(content_ref)
    .bind(status)
    .bind(now)
    .bind(now)
    .fetch_one(&mut *conn)
    .await?;

    get_upload(conn, id).await?.ok_or(sqlx::Error::RowNotFound)
}

pub async fn get_upload(conn: &mut SqliteConnection, id: UploadId) -> Result<Option<Upload>> {
    sqlx::query_as("SELECT * FROM uploads WHERE id = ?")
        .bind(id)
        .fetch_optional(conn)
        .await
}

pub async fn uploads_with_status(
    conn: &mut SqliteConnection,
    status: UploadStatus,
) -> Result<Vec<Upload>> {
    sqlx::query_as("SELECT * FROM uploads WHERE status = ? ORDER BY id")
        .bind(status)
        .fetch_all(conn)
        .await
}

pub async fn uploads_for_user(conn: &mut SqliteConnection, user: UserId) -> Result<Vec<Upload>> {
    sqlx::query_as("SELECT * FROM uploads WHERE user_id = ? ORDER BY id")
        .bind(user)
        .fetch_all(conn)
        .await
}

/// Move an upload from `from` to `to`.
pub async fn transition_upload(
    conn: &mut SqliteConnection,
    id: UploadId,
    from: UploadStatus,
    to: UploadStatus,
    now: DateTime<Utc>,
) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE uploads SET status = ?, updated_at = ? WHERE id = ? AND status = ?",
    )
    .bind(to)
    .bind(now)
    .bind(id)
    .bind(from)
    .execute(conn)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Move an upload from `from` to `processing`, counting the attempt and
/// clearing any previous error.
pub async fn start_upload_processing(
    conn: &mut SqliteConnection,
    id: UploadId,
    from: UploadStatus,
    now: DateTime<Utc>,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE uploads
        SET status = 'processing', attempts = attempts + 1, last_error = NULL, updated_at = ?
        WHERE id = ? AND status = ?
        "#,
    )
    .bind(now)
    .bind(id)
    .bind(from)
    .execute(conn)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Move a processing upload to `error`, recording why.
pub async fn fail_upload(
    conn: &mut SqliteConnection,
    id: UploadId,
    message: &str,
    now: DateTime<Utc>,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE uploads SET status = 'error', last_error = ?, updated_at = ?
        WHERE id = ? AND status = 'processing'
        "#,
    )
    .bind(message)
    .bind(now)
    .bind(id)
    .execute(conn)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Move uploads that entered `processing` at or before `cutoff` to `error`.
/// Attempt counts are kept.
pub async fn fail_stalled_uploads(
    conn: &mut SqliteConnection,
    cutoff: DateTime<Utc>,
    message: &str,
    now: DateTime<Utc>,
) -> Result<Vec<UploadId>> {
    sqlx::query_scalar(
        r#"
        UPDATE uploads SET status = 'error', last_error = ?, updated_at = ?
        WHERE status = 'processing' AND julianday(updated_at) <= julianday(?)
        RETURNING id
        "#,
    )
    .bind(message)
    .bind(now)
    .bind(cutoff)
    .fetch_all(conn)
    .await
}

/// Completed uploads with missed skills but no quiz yet.
pub async fn uploads_awaiting_quiz(conn: &mut SqliteConnection) -> Result<Vec<UploadId>> {
    sqlx::query_scalar(
        r#"
        SELECT u.id FROM uploads u
        WHERE u.status = 'complete'
          AND EXISTS (SELECT 1 FROM missed_skills m WHERE m.upload_id = u.id)
          AND NOT EXISTS (SELECT 1 FROM quizzes q WHERE q.upload_id = u.id)
        ORDER BY u.id
        "#,
    )
    .fetch_all(conn)
    .await
}

// ---------------------------------------------------------------------------
// Skills and missed-skill log
// ---------------------------------------------------------------------------

/// Find a skill by name, creating it with `category` if it does not exist.
/// An existing skill keeps its original category.
pub async fn find_or_create_skill(
    conn: &mut SqliteConnection,
    name: &str,
    category: &str,
) -> Result<Skill> {
    sqlx::query("INSERT INTO skills (name, category) VALUES (?, ?) ON CONFLICT(name) DO NOTHING")
        .bind(name)
        .bind(category)
        .execute(&mut *conn)
        .await?;

    sqlx::query_as("SELECT * FROM skills WHERE name = ?")
        .bind(name)
        .fetch_one(conn)
        .await
}

pub async fn get_skill(conn: &mut SqliteConnection, id: SkillId) -> Result<Option<Skill>> {
    sqlx::query_as("SELECT * FROM skills WHERE id = ?")
        .bind(id)
        .fetch_optional(conn)
        .await
}

pub async fn insert_missed_skill(
    conn: &mut SqliteConnection,
    user: UserId,
    upload: UploadId,
    skill: SkillId,
    now: DateTime<Utc>,
) -> Result<i64> {
    sqlx::query_scalar(
        r#"
        INSERT INTO missed_skills (user_id, upload_id, skill_id, identified_at)
        VALUES (?, ?, ?, ?)
        RETURNING id
        "#,
    )
    .bind(user)
    .bind(upload)
    .bind(skill)
    .bind(now)
    .fetch_one(conn)
    .await
}

pub async fn missed_records_for_upload(
    conn: &mut SqliteConnection,
    upload: UploadId,
) -> Result<Vec<MissedSkillRecord>> {
    sqlx::query_as("SELECT * FROM missed_skills WHERE upload_id = ? ORDER BY id")
        .bind(upload)
        .fetch_all(conn)
        .await
}

/// Distinct skills missed on an upload, in the order they were first flagged.
pub async fn missed_skills_for_upload(
    conn: &mut SqliteConnection,
    upload: UploadId,
) -> Result<Vec<Skill>> {
    sqlx::query_as(
        r#"
        SELECT s.id, s.name, s.category
        FROM skills s JOIN missed_skills m ON m.skill_id = s.id
        WHERE m.upload_id = ?
        GROUP BY s.id, s.name, s.category
        ORDER BY MIN(m.id)
        "#,
    )
    .bind(upload)
    .fetch_all(conn)
    .await
}

// ---------------------------------------------------------------------------
// Skill progress
// ---------------------------------------------------------------------------

pub async fn get_progress(
    conn: &mut SqliteConnection,
    user: UserId,
    skill: SkillId,
) -> Result<Option<SkillProgress>> {
    sqlx::query_as("SELECT * FROM skill_progress WHERE user_id = ? AND skill_id = ?")
        .bind(user)
        .bind(skill)
        .fetch_optional(conn)
        .await
}

/// Unconditionally write the status of a (user, skill) pair.
pub async fn upsert_progress(
    conn: &mut SqliteConnection,
    user: UserId,
    skill: SkillId,
    status: ProgressStatus,
    now: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO skill_progress (user_id, skill_id, status, last_updated)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(user_id, skill_id) DO UPDATE SET
            status = excluded.status,
            last_updated = excluded.last_updated
        "#,
    )
    .bind(user)
    .bind(skill)
    .bind(status)
    .bind(now)
    .execute(conn)
    .await?;
    Ok(())
}

/// A progress row joined with its skill.
#[derive(Debug, Clone, PartialEq, serde::Serialize, sqlx::FromRow)]
pub struct ProgressEntry {
    pub skill_id: SkillId,
    pub skill_name: String,
    pub category: String,
    pub status: ProgressStatus,
    pub last_updated: DateTime<Utc>,
}

pub async fn progress_for_user(
    conn: &mut SqliteConnection,
    user: UserId,
) -> Result<Vec<ProgressEntry>> {
    sqlx::query_as(
        r#"
        SELECT p.skill_id, s.name AS skill_name, s.category, p.status, p.last_updated
        FROM skill_progress p JOIN skills s ON s.id = p.skill_id
        WHERE p.user_id = ?
        ORDER BY s.name
        "#,
    )
    .bind(user)
    .fetch_all(conn)
    .await
}

// ---------------------------------------------------------------------------
// Quizzes
// ---------------------------------------------------------------------------

pub async fn insert_quiz(
    conn: &mut SqliteConnection,
    user: UserId,
    upload: UploadId,
    now: DateTime<Utc>,
) -> Result<Quiz> {
    sqlx::query_as(
        r#"
        INSERT INTO quizzes (user_id, upload_id, created_at)
        VALUES (?, ?, ?)
        RETURNING *
        "#,
    )
    .bind(user)
    .bind(upload)
    .bind(now)
    .fetch_one(conn)
    .await
}

pub async fn get_quiz(conn: &mut SqliteConnection, id: QuizId) -> Result<Option<Quiz>> {
    sqlx::query_as("SELECT * FROM quizzes WHERE id = ?")
        .bind(id)
        .fetch_optional(conn)
        .await
}

pub async fn quiz_for_upload(conn: &mut SqliteConnection, upload: UploadId) -> Result<Option<Quiz>> {
    sqlx::query_as("SELECT * FROM quizzes WHERE upload_id = ?")
        .bind(upload)
        .fetch_optional(conn)
        .await
}

/// Set the completion time of a quiz that has none yet.
pub async fn complete_quiz(
    conn: &mut SqliteConnection,
    id: QuizId,
    now: DateTime<Utc>,
) -> Result<bool> {
    let result =
        sqlx::query("UPDATE quizzes SET completed_at = ? WHERE id = ? AND completed_at IS NULL")
            .bind(now)
            .bind(id)
            .execute(conn)
            .await?;
    Ok(result.rows_affected() == 1)
}

pub async fn insert_quiz_question(
    conn: &mut SqliteConnection,
    quiz: QuizId,
    skill: SkillId,
    question: &GeneratedQuestion,
    now: DateTime<Utc>,
) -> Result<QuestionId> {
    sqlx::query_scalar(
        r#"
        INSERT INTO quiz_questions (quiz_id, skill_id, text, options, correct_option, generated_at)
        VALUES (?, ?, ?, ?, ?, ?)
        RETURNING id
        "#,
    )
    .bind(quiz)
    .bind(skill)
    .bind(&question.text)
    .bind(Json(&question.options))
    .bind(&question.correct_option)
    .bind(now)
    .fetch_one(conn)
    .await
}

/// A question, only if it belongs to `quiz`.
pub async fn get_quiz_question(
    conn: &mut SqliteConnection,
    id: QuestionId,
    quiz: QuizId,
) -> Result<Option<QuizQuestion>> {
    sqlx::query_as("SELECT * FROM quiz_questions WHERE id = ? AND quiz_id = ?")
        .bind(id)
        .bind(quiz)
        .fetch_optional(conn)
        .await
}

pub async fn questions_for_quiz(
    conn: &mut SqliteConnection,
    quiz: QuizId,
) -> Result<Vec<QuizQuestion>> {
    sqlx::query_as("SELECT * FROM quiz_questions WHERE quiz_id = ? ORDER BY id")
        .bind(quiz)
        .fetch_all(conn)
        .await
}

pub async fn insert_quiz_attempt(
    conn: &mut SqliteConnection,
    user: UserId,
    question: QuestionId,
    submitted: &str,
    is_correct: bool,
    now: DateTime<Utc>,
) -> Result<AttemptId> {
    sqlx::query_scalar(
        r#"
        INSERT INTO quiz_attempts (user_id, question_id, submitted_answer, is_correct, attempted_at)
        VALUES (?, ?, ?, ?, ?)
        RETURNING id
        "#,
    )
    .bind(user)
    .bind(question)
    .bind(submitted)
    .bind(is_correct)
    .bind(now)
    .fetch_one(conn)
    .await
}

pub async fn count_quiz_attempts(conn: &mut SqliteConnection, quiz: QuizId) -> Result<i64> {
    sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM quiz_attempts a
        JOIN quiz_questions q ON q.id = a.question_id
        WHERE q.quiz_id = ?
        "#,
    )
    .bind(quiz)
    .fetch_one(conn)
    .await
}

// ---------------------------------------------------------------------------
// Video jobs
// ---------------------------------------------------------------------------

pub async fn insert_video_job(
    conn: &mut SqliteConnection,
    user: UserId,
    skill: SkillId,
    attempt: Option<AttemptId>,
    now: DateTime<Utc>,
) -> Result<VideoJobId> {
    sqlx::query_scalar(
        r#"
        INSERT INTO video_jobs (user_id, skill_id, quiz_attempt_id, status, queued_at)
        VALUES (?, ?, ?, 'queued', ?)
        RETURNING id
        "#,
    )
    .bind(user)
    .bind(skill)
    .bind(attempt)
    .bind(now)
    .fetch_one(conn)
    .await
}

pub async fn get_video_job(conn: &mut SqliteConnection, id: VideoJobId) -> Result<Option<VideoJob>> {
    sqlx::query_as("SELECT * FROM video_jobs WHERE id = ?")
        .bind(id)
        .fetch_optional(conn)
        .await
}

/// The queued or generating job for a (user, skill), if any.
pub async fn active_video_job(
    conn: &mut SqliteConnection,
    user: UserId,
    skill: SkillId,
) -> Result<Option<VideoJob>> {
    sqlx::query_as(
        r#"
        SELECT * FROM video_jobs
        WHERE user_id = ? AND skill_id = ? AND status IN ('queued', 'generating')
        "#,
    )
    .bind(user)
    .bind(skill)
    .fetch_optional(conn)
    .await
}

pub async fn video_jobs_with_status(
    conn: &mut SqliteConnection,
    status: VideoJobStatus,
) -> Result<Vec<VideoJob>> {
    sqlx::query_as("SELECT * FROM video_jobs WHERE status = ? ORDER BY id")
        .bind(status)
        .fetch_all(conn)
        .await
}

pub async fn video_jobs_for_user(
    conn: &mut SqliteConnection,
    user: UserId,
) -> Result<Vec<VideoJob>> {
    sqlx::query_as("SELECT * FROM video_jobs WHERE user_id = ? ORDER BY id")
        .bind(user)
        .fetch_all(conn)
        .await
}

/// Move a job from `from` to `to`. Entering `generating` counts an attempt
/// and stamps the claim time; entering `delivered` stamps the delivery time.
pub async fn transition_video_job(
    conn: &mut SqliteConnection,
    id: VideoJobId,
    from: VideoJobStatus,
    to: VideoJobStatus,
    now: DateTime<Utc>,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE video_jobs SET
            status = ?1,
            attempts = attempts + CASE WHEN ?1 = 'generating' THEN 1 ELSE 0 END,
            claimed_at = CASE WHEN ?1 = 'generating' THEN ?2 ELSE claimed_at END,
            delivered_at = CASE WHEN ?1 = 'delivered' THEN ?2 ELSE delivered_at END,
            last_error = CASE WHEN ?1 = 'error' THEN last_error ELSE NULL END
        WHERE id = ?3 AND status = ?4
        "#,
    )
    .bind(to)
    .bind(now)
    .bind(id)
    .bind(from)
    .execute(conn)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Move a generating job to `error`, recording why.
pub async fn fail_video_job(
    conn: &mut SqliteConnection,
    id: VideoJobId,
    message: &str,
) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE video_jobs SET status = 'error', last_error = ? WHERE id = ? AND status = 'generating'",
    )
    .bind(message)
    .bind(id)
    .execute(conn)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Move jobs that entered `generating` at or before `cutoff` to `error`.
/// Attempt counts are kept.
pub async fn fail_stalled_video_jobs(
    conn: &mut SqliteConnection,
    cutoff: DateTime<Utc>,
    message: &str,
) -> Result<Vec<VideoJobId>> {
    sqlx::query_scalar(
        r#"
        UPDATE video_jobs SET status = 'error', last_error = ?
        WHERE status = 'generating' AND julianday(claimed_at) <= julianday(?)
        RETURNING id
        "#,
    )
    .bind(message)
    .bind(cutoff)
    .fetch_all(conn)
    .await
}

// ---------------------------------------------------------------------------
// Lessons
// ---------------------------------------------------------------------------

pub async fn insert_lesson(
    conn: &mut SqliteConnection,
    skill: SkillId,
    job: VideoJobId,
    script: &str,
    now: DateTime<Utc>,
) -> Result<Lesson> {
    sqlx::query_as(
        r#"
        INSERT INTO lessons (skill_id, job_id, script, generated_at)
        VALUES (?, ?, ?, ?)
        RETURNING *
        "#,
    )
    .bind(skill)
    .bind(job)
    .bind(script)
    .bind(now)
    .fetch_one(conn)
    .await
}

pub async fn get_lesson(conn: &mut SqliteConnection, id: LessonId) -> Result<Option<Lesson>> {
    sqlx::query_as("SELECT * FROM lessons WHERE id = ?")
        .bind(id)
        .fetch_optional(conn)
        .await
}

pub async fn lesson_for_job(conn: &mut SqliteConnection, job: VideoJobId) -> Result<Option<Lesson>> {
    sqlx::query_as("SELECT * FROM lessons WHERE job_id = ?")
        .bind(job)
        .fetch_optional(conn)
        .await
}

pub async fn lessons_for_user(conn: &mut SqliteConnection, user: UserId) -> Result<Vec<Lesson>> {
    sqlx::query_as(
        r#"
        SELECT l.* FROM lessons l JOIN video_jobs j ON j.id = l.job_id
        WHERE j.user_id = ?
        ORDER BY l.id
        "#,
    )
    .bind(user)
    .fetch_all(conn)
    .await
}

/// Set the watched time of a lesson that has none yet.
pub async fn mark_lesson_watched(
    conn: &mut SqliteConnection,
    id: LessonId,
    now: DateTime<Utc>,
) -> Result<bool> {
    let result =
        sqlx::query("UPDATE lessons SET watched_at = ? WHERE id = ? AND watched_at IS NULL")
            .bind(now)
            .bind(id)
            .execute(conn)
            .await?;
    Ok(result.rows_affected() == 1)
}

/// Watched lessons that have no practice questions yet.
pub async fn lessons_awaiting_practice(conn: &mut SqliteConnection) -> Result<Vec<LessonId>> {
    sqlx::query_scalar(
        r#"
        SELECT l.id FROM lessons l
        WHERE l.watched_at IS NOT NULL
          AND NOT EXISTS (SELECT 1 FROM practice_questions p WHERE p.lesson_id = l.id)
        ORDER BY l.id
        "#,
    )
    .fetch_all(conn)
    .await
}

// ---------------------------------------------------------------------------
// Practice
// ---------------------------------------------------------------------------

pub async fn insert_practice_question(
    conn: &mut SqliteConnection,
    lesson: LessonId,
    skill: SkillId,
    question: &GeneratedQuestion,
    now: DateTime<Utc>,
) -> Result<PracticeQuestionId> {
    sqlx::query_scalar(
        r#"
        INSERT INTO practice_questions
            (lesson_id, skill_id, text, options, correct_option, generated_at)
        VALUES (?, ?, ?, ?, ?, ?)
        RETURNING id
        "#,
    )
    .bind(lesson)
    .bind(skill)
    .bind(&question.text)
    .bind(Json(&question.options))
    .bind(&question.correct_option)
    .bind(now)
    .fetch_one(conn)
    .await
}

pub async fn practice_questions_for_lesson(
    conn: &mut SqliteConnection,
    lesson: LessonId,
) -> Result<Vec<PracticeQuestion>> {
    sqlx::query_as("SELECT * FROM practice_questions WHERE lesson_id = ? ORDER BY id")
        .bind(lesson)
        .fetch_all(conn)
        .await
}

pub async fn insert_practice_attempt(
    conn: &mut SqliteConnection,
    user: UserId,
    question: PracticeQuestionId,
    submitted: &str,
    is_correct: bool,
    now: DateTime<Utc>,
) -> Result<PracticeAttemptId> {
    sqlx::query_scalar(
        r#"
        INSERT INTO practice_attempts
            (user_id, question_id, submitted_answer, is_correct, attempted_at)
        VALUES (?, ?, ?, ?, ?)
        RETURNING id
        "#,
    )
    .bind(user)
    .bind(question)
    .bind(submitted)
    .bind(is_correct)
    .bind(now)
    .fetch_one(conn)
    .await
}

// ---------------------------------------------------------------------------
// Growth counter
// ---------------------------------------------------------------------------

pub async fn get_growth(conn: &mut SqliteConnection, user: UserId) -> Result<Option<GrowthCounter>> {
    sqlx::query_as("SELECT * FROM growth_counters WHERE user_id = ?")
        .bind(user)
        .fetch_optional(conn)
        .await
}

/// Create the counter at 1 or add one to it, refreshing its timestamp.
pub async fn increment_growth(
    conn: &mut SqliteConnection,
    user: UserId,
    now: DateTime<Utc>,
) -> Result<GrowthCounter> {
    sqlx::query_as(
        r#"
        INSERT INTO growth_counters (user_id, count, last_growth_at)
        VALUES (?, 1, ?)
        ON CONFLICT(user_id) DO UPDATE SET
            count = growth_counters.count + 1,
            last_growth_at = excluded.last_growth_at
        RETURNING *
        "#,
    )
    .bind(user)
    .bind(now)
    .fetch_one(conn)
    .await
}
