//! The `skillforge quiz` commands.

use anyhow::Result;
use comfy_table::{Cell, Table};

use skillforge_core::views::QuestionView;

use super::{describe, parse_answers, Session};
use crate::{GlobalArgs, QuizCommand};

pub async fn execute(global: &GlobalArgs, command: QuizCommand) -> Result<()> {
    let mut session = Session::open(global).await?;
    match command {
        QuizCommand::Show { quiz, user } => {
            let view = session.pipeline.quiz_view(quiz, user).await?;
            session.emit(&view, |view| {
                let state = match view.completed_at {
                    Some(at) => format!("submitted {}", at.format("%Y-%m-%d %H:%M")),
                    None => "open".to_string(),
                };
                println!("Quiz {} (upload {}), {state}", view.quiz_id, view.upload_id);
                print_questions(&view.questions);
            })
        }
        QuizCommand::Generate { upload } => {
            let outcome = session.pipeline.generate_quiz(upload).await?;
            let line = describe(&outcome, "generated");
            let quiz = outcome.into_value();
            session.emit(&quiz, |quiz| match quiz {
                Some(quiz) => println!("Quiz {} for upload {upload}: {line}", quiz.id),
                None => println!("Upload {upload}: {line}"),
            })
        }
        QuizCommand::Submit {
            quiz,
            user,
            answers,
        } => {
            let answers = parse_answers(&answers)?;
            let result = session.pipeline.grade_quiz(quiz, user, &answers).await?;
            session.settle().await;
            session.emit(&result, |result| {
                println!(
                    "Quiz {quiz}: {} correct, {} incorrect, {} skipped",
                    result.correct, result.incorrect, result.skipped
                );
                for job in &result.videos_queued {
                    println!("  lesson queued: video job {job}");
                }
            })
        }
    }
}

/// Render questions without their answer key.
pub fn print_questions(questions: &[QuestionView]) {
    let mut table = Table::new();
    table.set_header(vec!["Id", "Skill", "Question", "Options"]);
    for question in questions {
        let options = question
            .options
            .iter()
            .map(|(key, text)| format!("{key}) {text}"))
            .collect::<Vec<_>>()
            .join("\n");
        table.add_row(vec![
            Cell::new(question.question_id),
            Cell::new(&question.skill),
            Cell::new(&question.text),
            Cell::new(options),
        ]);
    }
    println!("{table}");
}
