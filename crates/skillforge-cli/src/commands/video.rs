//! The `skillforge video` commands.

use anyhow::Result;
use comfy_table::{Cell, Table};

use super::{describe, Session};
use crate::{GlobalArgs, VideoCommand};

pub async fn execute(global: &GlobalArgs, command: VideoCommand) -> Result<()> {
    let mut session = Session::open(global).await?;
    match command {
        VideoCommand::List { user } => {
            let jobs = session.pipeline.video_jobs_for_user(user).await?;
            session.emit(&jobs, |jobs| {
                let mut table = Table::new();
                table.set_header(vec!["Job", "Skill", "Status", "Attempts", "Queued", "Last error"]);
                for job in jobs {
                    table.add_row(vec![
                        Cell::new(job.id),
                        Cell::new(job.skill_id),
                        Cell::new(job.status),
                        Cell::new(job.attempts),
                        Cell::new(job.queued_at.format("%Y-%m-%d %H:%M")),
                        Cell::new(job.last_error.as_deref().unwrap_or("")),
                    ]);
                }
                println!("{table}");
            })
        }
        VideoCommand::Deliver { job } => {
            let outcome = session.pipeline.deliver_video(job).await?;
            let line = describe(&outcome, "delivered");
            let lesson = outcome.into_value();
            session.emit(&lesson, |lesson| match lesson {
                Some(lesson) => println!("Video job {job}: {line}, lesson {}", lesson.id),
                None => println!("Video job {job}: {line}"),
            })
        }
        VideoCommand::Requeue { job } => {
            let outcome = session.pipeline.requeue_video_job(job).await?;
            let line = describe(&outcome, "requeued");
            session.settle().await;
            let current = session.pipeline.video_job(job).await?;
            session.emit(&current, |current| {
                println!("Video job {job}: {line}, now {}", current.status);
            })
        }
    }
}
