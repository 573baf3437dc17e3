//! The `skillforge lesson` commands.

use anyhow::Result;
use comfy_table::{Cell, Table};

use super::{describe, Session};
use crate::{GlobalArgs, LessonCommand};

pub async fn execute(global: &GlobalArgs, command: LessonCommand) -> Result<()> {
    let mut session = Session::open(global).await?;
    match command {
        LessonCommand::List { user } => {
            let lessons = session.pipeline.lessons_for_user(user).await?;
            session.emit(&lessons, |lessons| {
                let mut table = Table::new();
                table.set_header(vec!["Lesson", "Job", "Skill", "Generated", "Watched"]);
                for lesson in lessons {
                    table.add_row(vec![
                        Cell::new(lesson.id),
                        Cell::new(lesson.job_id),
                        Cell::new(lesson.skill_id),
                        Cell::new(lesson.generated_at.format("%Y-%m-%d %H:%M")),
                        Cell::new(
                            lesson
                                .watched_at
                                .map(|at| at.format("%Y-%m-%d %H:%M").to_string())
                                .unwrap_or_default(),
                        ),
                    ]);
                }
                println!("{table}");
            })
        }
        LessonCommand::Show { lesson } => {
            let lesson = session.pipeline.lesson(lesson).await?;
            session.emit(&lesson, |lesson| println!("{}", lesson.script))
        }
        LessonCommand::Watch { lesson, user } => {
            let outcome = session.pipeline.mark_lesson_watched(lesson, user).await?;
            let line = describe(&outcome, "watched");
            session.settle().await;
            let view = session.pipeline.practice_view(lesson, user).await?;
            session.emit(&view, |view| {
                println!("Lesson {lesson}: {line}");
                println!(
                    "  {} practice question(s) ready: skillforge practice show {lesson} --user {user}",
                    view.questions.len()
                );
            })
        }
    }
}
