//! The `skillforge upload`, `uploads` and `analyze` commands.

use std::path::PathBuf;

use anyhow::Result;
use comfy_table::{Cell, Table};
use serde::Serialize;

use skillforge_core::model::{Quiz, Upload, UploadId, UserId};

use super::{content_ref, describe, Session};
use crate::GlobalArgs;

#[derive(Serialize)]
struct UploadReport {
    upload: Upload,
    quiz: Option<Quiz>,
}

pub async fn execute(
    global: &GlobalArgs,
    user: UserId,
    test: String,
    file: PathBuf,
    no_wait: bool,
) -> Result<()> {
    let path = content_ref(&file)?;
    let mut session = Session::open(global).await?;
    let upload = session
        .pipeline
        .register_upload(user, &test, &path.to_string_lossy())
        .await?;
    eprintln!("Registered upload {} for user {user}", upload.id);

    if no_wait {
        return session.emit(&upload, |upload| {
            println!(
                "Upload {} is {}; run `skillforge worker` to analyze it.",
                upload.id, upload.status
            );
        });
    }

    session.settle().await;
    report(&session, upload.id).await
}

pub async fn analyze(global: &GlobalArgs, id: UploadId, retry: bool) -> Result<()> {
    let mut session = Session::open(global).await?;
    let outcome = if retry {
        session.pipeline.retry_upload(id).await?
    } else {
        session.pipeline.analyze_upload(id).await?
    };
    eprintln!("Upload {id}: {}", describe(&outcome, "analyzed"));

    session.settle().await;
    report(&session, id).await
}

async fn report(session: &Session, id: UploadId) -> Result<()> {
    let upload = session.pipeline.upload(id).await?;
    let quiz = session.pipeline.quiz_for_upload(id).await?;
    session.emit(&UploadReport { upload, quiz }, |report| {
        println!("Upload {}: {}", report.upload.id, report.upload.status);
        if let Some(error) = &report.upload.last_error {
            println!("  last error: {error}");
        }
        match &report.quiz {
            Some(quiz) => println!(
                "  quiz {} ready: skillforge quiz show {} --user {}",
                quiz.id, quiz.id, quiz.user_id
            ),
            None => println!("  no quiz"),
        }
    })
}

pub async fn list(global: &GlobalArgs, user: UserId) -> Result<()> {
    let session = Session::open(global).await?;
    let uploads = session.pipeline.uploads_for_user(user).await?;
    session.emit(&uploads, |uploads| {
        if uploads.is_empty() {
            println!("No uploads for user {user}.");
            return;
        }
        let mut table = Table::new();
        table.set_header(vec!["Id", "Test", "Status", "Attempts", "Created", "Last error"]);
        for upload in uploads {
            table.add_row(vec![
                Cell::new(upload.id),
                Cell::new(&upload.test_identifier),
                Cell::new(upload.status),
                Cell::new(upload.attempts),
                Cell::new(upload.created_at.format("%Y-%m-%d %H:%M")),
                Cell::new(upload.last_error.as_deref().unwrap_or("")),
            ]);
        }
        println!("{table}");
    })
}
