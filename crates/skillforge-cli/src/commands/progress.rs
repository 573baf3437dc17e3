//! The `skillforge progress` and `growth` commands.

use anyhow::Result;
use comfy_table::{Cell, Table};

use skillforge_core::model::UserId;

use super::Session;
use crate::GlobalArgs;

pub async fn execute(global: &GlobalArgs, user: UserId) -> Result<()> {
    let session = Session::open(global).await?;
    let summary = session.pipeline.progress_summary(user).await?;
    session.emit(&summary, |summary| {
        if summary.entries.is_empty() {
            println!("No progress recorded for user {user}.");
            return;
        }

        let mut table = Table::new();
        table.set_header(vec!["Skill", "Category", "Status", "Updated"]);
        for entry in &summary.entries {
            table.add_row(vec![
                Cell::new(&entry.skill_name),
                Cell::new(&entry.category),
                Cell::new(entry.status),
                Cell::new(entry.last_updated.format("%Y-%m-%d %H:%M")),
            ]);
        }
        println!("{table}");

        let counts = summary
            .counts
            .iter()
            .map(|(status, n)| format!("{status}: {n}"))
            .collect::<Vec<_>>()
            .join(", ");
        println!("{counts}");
    })
}

pub async fn growth(global: &GlobalArgs, user: UserId) -> Result<()> {
    let session = Session::open(global).await?;
    let growth = session.pipeline.growth(user).await?;
    session.emit(&growth, |growth| {
        let last = growth
            .last_growth_at
            .map(|at| format!(" (last grew {})", at.format("%Y-%m-%d %H:%M")))
            .unwrap_or_default();
        println!("Growth for user {user}: {}{last}", growth.count);
    })
}
