//! The `skillforge init` command.

use anyhow::Result;

pub fn execute() -> Result<()> {
    if std::path::Path::new("skillforge.toml").exists() {
        println!("skillforge.toml already exists, skipping.");
    } else {
        std::fs::write("skillforge.toml", SAMPLE_CONFIG)?;
        println!("Created skillforge.toml");
    }

    let sample_path = std::path::Path::new("sample-result.txt");
    if sample_path.exists() {
        println!("sample-result.txt already exists, skipping.");
    } else {
        std::fs::write(sample_path, SAMPLE_RESULT)?;
        println!("Created sample-result.txt");
    }

    println!("\nNext steps:");
    println!("  1. Edit skillforge.toml and pick a provider (scripted works offline)");
    println!("  2. Run: skillforge upload --user 1 --test \"Bluebook Test 1\" sample-result.txt");
    println!("  3. Run: skillforge uploads --user 1");

    Ok(())
}

const SAMPLE_CONFIG: &str = r#"# skillforge configuration

default_provider = "scripted"
default_model = "gpt-4.1-mini"
default_temperature = 0.7
database_path = "./skillforge.db"
parallelism = 4
practice_question_count = 3
max_attempts = 3
# Seconds before `skillforge worker` treats a running stage as interrupted.
stall_timeout_secs = 900
# "permissive" lets any stage overwrite progress; "keep_mastered" never
# moves a mastered skill back except when a new upload misses it again.
progress_policy = "permissive"

[providers.scripted]
type = "scripted"

[providers.openai]
type = "openai"
api_key = "${OPENAI_API_KEY}"

[providers.ollama]
type = "ollama"
base_url = "http://localhost:11434"
"#;

const SAMPLE_RESULT: &str = r#"# Bluebook Test 1, missed questions
# The scripted provider reads one `skill | category` per line.
Linear Equations | Math
Comma Usage | Reading & Writing
"#;
