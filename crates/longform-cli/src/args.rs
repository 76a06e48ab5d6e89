//! Command-line definitions.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use longform::{JobParams, JobStage, KeywordSpec};

#[derive(Parser)]
#[command(version, about = "Long-form content job runner", name = "longform")]
pub struct Cli {
    /// Path to a JSON config file. Built-in defaults apply when omitted.
    #[arg(long, short, global = true)]
    pub config: Option<PathBuf>,

    /// SQLite database file, overriding the config.
    #[arg(long, global = true)]
    pub database_file: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start a job and wait for it to finish
    Run(RunArgs),
    /// Show one job's status
    Status {
        id: String,
        /// Print the full document instead of the summary
        #[arg(long)]
        document: bool,
    },
    /// List jobs, optionally filtered by stage
    List {
        #[arg(long, value_parser = parse_stage)]
        stage: Vec<JobStage>,
    },
    /// Show a job's checkpoint history
    Events { id: String },
    /// Cancel a job
    Cancel { id: String },
    /// Retry a failed or cancelled job and wait for it
    Retry { id: String },
    /// Resume jobs interrupted by a previous run and wait for them
    Recover,
}

#[derive(Args)]
pub struct RunArgs {
    /// Article theme
    #[arg(long)]
    pub theme: String,

    /// Target word count
    #[arg(long, short)]
    pub words: u32,

    /// Keyword, optionally with a target count as `keyword:count`
    #[arg(long = "keyword", short, value_parser = parse_keyword)]
    pub keywords: Vec<KeywordSpec>,

    /// Owner of the reference corpus used for style matching
    #[arg(long)]
    pub user: Option<String>,

    #[arg(long)]
    pub persona: Option<String>,

    #[arg(long)]
    pub remarks: Option<String>,

    /// Call-to-action the article should lead towards
    #[arg(long)]
    pub offer: Option<String>,

    /// Generate a meta description and FAQ after writing
    #[arg(long)]
    pub enhance: bool,
}

impl RunArgs {
    pub fn into_params(self) -> JobParams {
        JobParams {
            theme: self.theme,
            target_word_count: self.words,
            keywords: self.keywords,
            user_id: self.user,
            persona: self.persona,
            remarks: self.remarks,
            offer: self.offer,
            auto_enhance: self.enhance,
        }
    }
}

fn parse_keyword(raw: &str) -> Result<KeywordSpec, String> {
    let (keyword, target) = match raw.rsplit_once(':') {
        Some((keyword, count)) => {
            let count = count
                .trim()
                .parse::<u32>()
                .map_err(|_| format!("invalid keyword target in '{}'", raw))?;
            (keyword, Some(count))
        }
        None => (raw, None),
    };
    let keyword = keyword.trim();
    if keyword.is_empty() {
        return Err("keyword must not be empty".to_string());
    }
    Ok(KeywordSpec {
        keyword: keyword.to_string(),
        target,
    })
}

fn parse_stage(raw: &str) -> Result<JobStage, String> {
    raw.parse()
}
