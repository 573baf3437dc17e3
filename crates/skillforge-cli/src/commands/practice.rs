//! The `skillforge practice` commands.

use anyhow::Result;

use super::quiz::print_questions;
use super::{describe, parse_answers, Session};
use crate::{GlobalArgs, PracticeCommand};

pub async fn execute(global: &GlobalArgs, command: PracticeCommand) -> Result<()> {
    let session = Session::open(global).await?;
    match command {
        PracticeCommand::Show { lesson, user } => {
            let view = session.pipeline.practice_view(lesson, user).await?;
            session.emit(&view, |view| {
                let status = view.status.map(|s| s.to_string()).unwrap_or_default();
                println!("Practice for {} (lesson {}) {status}", view.skill, view.lesson_id);
                print_questions(&view.questions);
            })
        }
        PracticeCommand::Generate { lesson } => {
            let outcome = session.pipeline.generate_practice(lesson).await?;
            let line = describe(&outcome, "generated");
            let questions = outcome.into_value().unwrap_or_default();
            session.emit(&questions, |questions| {
                println!("Lesson {lesson}: {line}, {} question(s)", questions.len());
            })
        }
        PracticeCommand::Submit {
            lesson,
            user,
            answers,
        } => {
            let answers = parse_answers(&answers)?;
            let result = session.pipeline.grade_practice(lesson, user, &answers).await?;
            session.emit(&result, |result| {
                println!(
                    "Lesson {lesson}: {} correct, {} incorrect",
                    result.correct, result.incorrect
                );
                if result.mastered {
                    println!("  Mastered! Growth is now {}", result.growth.count);
                } else {
                    println!("  Not yet mastered. Review the lesson and try again.");
                }
            })
        }
    }
}
