use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::anyhow;
use clap::{ArgAction, Args, Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::record::RecordSource;

#[derive(Debug, Clone)]
pub struct KeyVal {
    pub key: String,
    pub value: String,
}

impl std::str::FromStr for KeyVal {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (k, v) = s
            .split_once('=')
            .ok_or_else(|| anyhow!("expected KEY=VALUE, got: {s}"))?;
        Ok(Self {
            key: k.trim().to_string(),
            value: v.trim().to_string(),
        })
    }
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "campuscal",
    version,
    about = "Campus calendar: month grids, week windows and schedules for the student portal",
    disable_help_subcommand = true
)]
pub struct GlobalCli {
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[arg(short = 'q', long = "quiet", action = ArgAction::Count, global = true)]
    pub quiet: u8,

    #[arg(
        long = "rc",
        value_parser = clap::builder::ValueParser::new(|s: &str| s.parse::<KeyVal>()),
        action = ArgAction::Append
    )]
    pub rc_overrides: Vec<KeyVal>,

    #[arg(long = "rcfile")]
    pub rcfile: Option<PathBuf>,

    #[arg(long = "data")]
    pub data: Option<PathBuf>,

    /// User whose document is read and written.
    #[arg(long = "user")]
    pub user: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Month grid with per-day event badges.
    Month(MonthArgs),
    /// Sliding week windows around a date.
    Weeks(DateArgs),
    /// One ISO week laid out in time blocks.
    Week(DateArgs),
    /// Records of a single day.
    Day(DateArgs),
    #[command(subcommand)]
    Schedule(ScheduleAction),
    #[command(subcommand)]
    Subject(SubjectAction),
    #[command(subcommand)]
    File(FileAction),
    #[command(subcommand)]
    Picture(PictureAction),
    /// Adopt a user document exported from the portal.
    Import { path: PathBuf },
}

#[derive(Args, Debug, Clone, Default)]
pub struct MonthArgs {
    #[arg(long)]
    pub year: Option<i32>,

    /// Calendar month, 1-12.
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..=12))]
    pub month: Option<u32>,

    #[arg(long, value_parser = clap::builder::ValueParser::new(|s: &str| s.parse::<RecordSource>()))]
    pub source: Option<RecordSource>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct DateArgs {
    /// today, tomorrow, monday, +3d, -1w, 2025-11-12, 12/11/2025, 12/11/25
    #[arg(long)]
    pub date: Option<String>,

    #[arg(long, value_parser = clap::builder::ValueParser::new(|s: &str| s.parse::<RecordSource>()))]
    pub source: Option<RecordSource>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum ScheduleAction {
    Add {
        /// "YYYY-MM-DD HH:MM" or any date expression followed by a time.
        #[arg(long)]
        at: String,

        #[arg(required = true, num_args = 1.., trailing_var_arg = true)]
        content: Vec<String>,
    },
    Remove {
        #[arg(long)]
        date: String,

        #[arg(long)]
        name: String,

        #[arg(long)]
        color: String,
    },
    List {
        #[arg(long)]
        date: Option<String>,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum SubjectAction {
    Add { name: String },
    Remove { name: String },
    List,
}

#[derive(Subcommand, Debug, Clone)]
pub enum FileAction {
    Add {
        subject: String,
        uri: String,

        #[arg(long, default_value = "")]
        name: String,
    },
    Remove {
        subject: String,
        uri: String,
    },
    /// Point a saved file at a new app data directory.
    Restore {
        subject: String,
        uri: String,

        #[arg(long)]
        base: String,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum PictureAction {
    Add {
        subject: String,
        uri: String,
    },
    Remove {
        subject: String,
        uri: String,
    },
    /// Point a saved picture at a new app documents directory.
    Restore {
        subject: String,
        uri: String,

        #[arg(long)]
        base: String,
    },
}

pub fn init_tracing(verbose: u8, quiet: u8) -> anyhow::Result<()> {
    let default_level = if quiet >= 2 {
        "error"
    } else if quiet == 1 {
        "warn"
    } else if verbose >= 3 {
        "trace"
    } else if verbose == 2 {
        "debug"
    } else if verbose == 1 {
        "info"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .map_err(|e| anyhow!("invalid RUST_LOG / log filter: {e}"))?;

    let init_result = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_level(true)
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .try_init();

    if let Err(err) = init_result {
        debug!(error = %err, "tracing subscriber already set, continuing");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[test]
    fn parses_globals_and_month() {
        let cli = GlobalCli::try_parse_from([
            "campuscal",
            "-vv",
            "--rc",
            "color=off",
            "--user",
            "student-42",
            "month",
            "--month",
            "2",
            "--year",
            "2024",
            "--source",
            "classes",
        ])
        .expect("parse");

        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.rc_overrides[0].key, "color");
        assert_eq!(cli.user.as_deref(), Some("student-42"));
        let Some(Command::Month(args)) = cli.command else {
            panic!("expected month command");
        };
        assert_eq!(args.month, Some(2));
        assert_eq!(args.year, Some(2024));
        assert_eq!(args.source, Some(RecordSource::Classes));
    }

    #[test]
    fn rejects_month_out_of_range() {
        assert!(GlobalCli::try_parse_from(["campuscal", "month", "--month", "13"]).is_err());
    }

    #[test]
    fn schedule_add_collects_content_words() {
        let cli = GlobalCli::try_parse_from([
            "campuscal",
            "schedule",
            "add",
            "--at",
            "2025-11-12 17:05",
            "Team",
            "meeting",
        ])
        .expect("parse");

        let Some(Command::Schedule(ScheduleAction::Add { at, content })) = cli.command else {
            panic!("expected schedule add");
        };
        assert_eq!(at, "2025-11-12 17:05");
        assert_eq!(content.join(" "), "Team meeting");
    }

    #[test]
    fn restore_needs_a_base() {
        assert!(
            GlobalCli::try_parse_from(["campuscal", "file", "restore", "Maths", "file:///a"])
                .is_err()
        );

        let cli = GlobalCli::try_parse_from([
            "campuscal",
            "picture",
            "restore",
            "Maths",
            "file:///old/board.jpg",
            "--base",
            "file:///new",
        ])
        .expect("parse");
        let Some(Command::Picture(PictureAction::Restore { subject, base, .. })) = cli.command
        else {
            panic!("expected picture restore");
        };
        assert_eq!((subject.as_str(), base.as_str()), ("Maths", "file:///new"));
    }

    #[test]
    fn key_val_requires_equals() {
        assert!("color".parse::<KeyVal>().is_err());
        let kv = "weeks.after = 4".parse::<KeyVal>().expect("key val");
        assert_eq!((kv.key.as_str(), kv.value.as_str()), ("weeks.after", "4"));
    }
}
