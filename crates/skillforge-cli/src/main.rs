//! skillforge CLI: drives the remediation pipeline from the command line.

use std::path::PathBuf;
use std::process;

use clap::{Args, Parser, Subcommand};
use skillforge_core::model::{LessonId, QuizId, UploadId, UserId, VideoJobId};

mod commands;

#[derive(Parser)]
#[command(
    name = "skillforge",
    version,
    about = "Turn missed test questions into quizzes, lessons and practice"
)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

/// Options shared by every command that touches the database.
#[derive(Args, Clone, Debug)]
pub struct GlobalArgs {
    /// Config file path
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Database file (overrides `database_path`)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Content provider to use (overrides `default_provider`)
    #[arg(long, global = true)]
    provider: Option<String>,

    /// Print JSON instead of tables
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a starter config
    Init,

    /// Upload a test result and run it through analysis
    Upload {
        /// Learner id
        #[arg(long)]
        user: UserId,

        /// Practice test identifier (e.g. "Bluebook Test 4")
        #[arg(long)]
        test: String,

        /// Test result file
        file: PathBuf,

        /// Only record the upload; leave analysis to `skillforge worker`
        #[arg(long)]
        no_wait: bool,
    },

    /// List a learner's uploads
    Uploads {
        #[arg(long)]
        user: UserId,
    },

    /// Re-run analysis of an upload
    Analyze {
        upload: UploadId,

        /// Retry an upload in `error` status
        #[arg(long)]
        retry: bool,
    },

    /// Quiz operations
    #[command(subcommand)]
    Quiz(QuizCommand),

    /// Video lesson jobs
    #[command(subcommand)]
    Video(VideoCommand),

    /// Lessons
    #[command(subcommand)]
    Lesson(LessonCommand),

    /// Post-lesson practice
    #[command(subcommand)]
    Practice(PracticeCommand),

    /// Show a learner's skill progress
    Progress {
        #[arg(long)]
        user: UserId,
    },

    /// Show a learner's growth counter
    Growth {
        #[arg(long)]
        user: UserId,
    },

    /// Process pending work left in the database
    Worker {
        /// Keep running after the backlog is drained
        #[arg(long)]
        follow: bool,
    },
}

#[derive(Subcommand)]
pub enum QuizCommand {
    /// Show a quiz without its answer key
    Show {
        quiz: QuizId,
        #[arg(long)]
        user: UserId,
    },
    /// Generate the quiz of an analyzed upload
    Generate { upload: UploadId },
    /// Submit answers, e.g. --answers '{"12": "B", "13": "D"}'
    Submit {
        quiz: QuizId,
        #[arg(long)]
        user: UserId,
        #[arg(long)]
        answers: String,
    },
}

#[derive(Subcommand)]
pub enum VideoCommand {
    /// List a learner's video jobs
    List {
        #[arg(long)]
        user: UserId,
    },
    /// Generate the lesson of a queued job
    Deliver { job: VideoJobId },
    /// Put a failed job back in the queue
    Requeue { job: VideoJobId },
}

#[derive(Subcommand)]
pub enum LessonCommand {
    /// List a learner's lessons
    List {
        #[arg(long)]
        user: UserId,
    },
    /// Print a lesson script
    Show { lesson: LessonId },
    /// Confirm the learner watched a lesson
    Watch {
        lesson: LessonId,
        #[arg(long)]
        user: UserId,
    },
}

#[derive(Subcommand)]
pub enum PracticeCommand {
    /// Show the practice questions of a lesson
    Show {
        lesson: LessonId,
        #[arg(long)]
        user: UserId,
    },
    /// Generate the practice set of a watched lesson
    Generate { lesson: LessonId },
    /// Submit answers for every practice question of a lesson
    Submit {
        lesson: LessonId,
        #[arg(long)]
        user: UserId,
        #[arg(long)]
        answers: String,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("skillforge=info".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();
    let global = cli.global;

    let result = match cli.command {
        Commands::Init => commands::init::execute(),
        Commands::Upload {
            user,
            test,
            file,
            no_wait,
        } => commands::upload::execute(&global, user, test, file, no_wait).await,
        Commands::Uploads { user } => commands::upload::list(&global, user).await,
        Commands::Analyze { upload, retry } => {
            commands::upload::analyze(&global, upload, retry).await
        }
        Commands::Quiz(command) => commands::quiz::execute(&global, command).await,
        Commands::Video(command) => commands::video::execute(&global, command).await,
        Commands::Lesson(command) => commands::lesson::execute(&global, command).await,
        Commands::Practice(command) => commands::practice::execute(&global, command).await,
        Commands::Progress { user } => commands::progress::execute(&global, user).await,
        Commands::Growth { user } => commands::progress::growth(&global, user).await,
        Commands::Worker { follow } => commands::worker::execute(&global, follow).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}
