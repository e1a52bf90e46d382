//! These structs provide the CLI interface for the reaper CLI.

use clap::{Parser, Subcommand};
use std::convert::Infallible;
use std::fmt::{Display, Formatter};
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::error;
use tracing_subscriber::filter::LevelFilter;

/// reaper: Deletes Smartsheet workspaces on the schedule declared in an intake sheet.
///
/// Each row of the intake sheet links to a workspace (or to a sheet inside one) and carries a
/// deletion date and the date the engagement manager was notified. On or after the deletion date,
/// and unless the notification went out today, `reaper run` deletes the workspace and marks the
/// row as Deleted.
///
/// You need a Smartsheet app with OAuth client credentials. Provide them through
/// SMARTSHEET_CLIENT_ID and SMARTSHEET_CLIENT_SECRET or with `reaper init --client-secret`.
#[derive(Debug, Parser, Clone)]
pub struct Args {
    #[clap(flatten)]
    common: Common,

    #[command(subcommand)]
    command: Command,
}

impl Args {
    pub fn new(common: Common, command: Command) -> Self {
        Self { common, command }
    }

    pub fn common(&self) -> &Common {
        &self.common
    }

    pub fn command(&self) -> &Command {
        &self.command
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Create the home directory and write the initial configuration.
    ///
    /// This is the first command you should run. Pass the link to the intake sheet as
    /// --sheet-url and the ids of its four columns. The column ids can be changed later in
    /// config.json.
    Init(InitArgs),
    /// Authorize with Smartsheet via OAuth. This may open a browser.
    Auth(AuthArgs),
    /// Delete every workspace that is due according to the intake sheet.
    Run(RunArgs),
    /// Write CSV snapshots of sheets, owned workspaces and intake rows.
    Export(ExportArgs),
    /// Print the configuration. Secrets are masked.
    Config,
}

/// Arguments common to all subcommands.
#[derive(Debug, Parser, Clone)]
pub struct Common {
    /// The logging verbosity. One of, from least to most verbose:
    /// off, error, warn, info, debug, trace
    ///
    /// This can be overridden by RUST_LOG.
    #[arg(long, default_value_t = LevelFilter::INFO)]
    log_level: LevelFilter,

    /// The directory where configuration and tokens are held. Defaults to ~/smartsheet-reaper
    #[arg(long, env = "REAPER_HOME", default_value_t = default_home())]
    home: DisplayPath,
}

impl Common {
    pub fn new(log_level: LevelFilter, home: PathBuf) -> Self {
        Self {
            log_level,
            home: home.into(),
        }
    }

    pub fn log_level(&self) -> LevelFilter {
        self.log_level
    }

    pub fn home(&self) -> &DisplayPath {
        &self.home
    }
}

/// (Not shown): Args for the `reaper init` command.
#[derive(Debug, Parser, Clone)]
pub struct InitArgs {
    /// The link to the intake sheet. It looks like this:
    /// https://app.smartsheet.com/sheets/Gx7Q9vR2mWc4Jh8PfXq3LbN5tKd6YsZ1
    #[arg(long)]
    sheet_url: String,

    /// A JSON file with "client_id" and "client_secret". It is copied into the secrets
    /// directory. Not needed if the SMARTSHEET_CLIENT_ID and SMARTSHEET_CLIENT_SECRET environment
    /// variables are set.
    #[arg(long)]
    client_secret: Option<PathBuf>,

    /// Column id of the folder URL column
    #[arg(long, default_value_t = 0)]
    folder_url_column: i64,

    /// Column id of the deletion date column
    #[arg(long, default_value_t = 0)]
    deletion_date_column: i64,

    /// Column id of the EM notification date column
    #[arg(long, default_value_t = 0)]
    em_notification_column: i64,

    /// Column id of the deletion status column
    #[arg(long, default_value_t = 0)]
    status_column: i64,
}

impl InitArgs {
    pub fn new(sheet_url: impl Into<String>, client_secret: Option<PathBuf>) -> Self {
        Self {
            sheet_url: sheet_url.into(),
            client_secret,
            folder_url_column: 0,
            deletion_date_column: 0,
            em_notification_column: 0,
            status_column: 0,
        }
    }

    pub fn with_columns(mut self, columns: crate::model::IntakeColumns) -> Self {
        self.folder_url_column = columns.folder_url;
        self.deletion_date_column = columns.deletion_date;
        self.em_notification_column = columns.em_notification_date;
        self.status_column = columns.deletion_status;
        self
    }

    pub fn sheet_url(&self) -> &str {
        &self.sheet_url
    }

    pub fn client_secret(&self) -> Option<&Path> {
        self.client_secret.as_deref()
    }

    pub fn columns(&self) -> crate::model::IntakeColumns {
        crate::model::IntakeColumns {
            folder_url: self.folder_url_column,
            deletion_date: self.deletion_date_column,
            em_notification_date: self.em_notification_column,
            deletion_status: self.status_column,
        }
    }
}

/// (Not shown): Args for the `reaper auth` command.
#[derive(Debug, Parser, Clone)]
pub struct AuthArgs {
    /// Verify and refresh the stored tokens. Never opens a browser.
    #[arg(long)]
    verify: bool,
}

impl AuthArgs {
    pub fn new(verify: bool) -> Self {
        Self { verify }
    }

    pub fn verify(&self) -> bool {
        self.verify
    }
}

/// (Not shown): Args for the `reaper run` command.
#[derive(Debug, Parser, Clone)]
pub struct RunArgs {
    /// Decide and resolve everything, but do not delete workspaces or update rows.
    #[arg(long)]
    dry_run: bool,
}

impl RunArgs {
    pub fn new(dry_run: bool) -> Self {
        Self { dry_run }
    }

    pub fn dry_run(&self) -> bool {
        self.dry_run
    }
}

/// (Not shown): Args for the `reaper export` command.
#[derive(Debug, Parser, Clone)]
pub struct ExportArgs {
    /// The directory to write the CSV files into.
    #[arg(long, default_value = ".")]
    out: PathBuf,
}

impl ExportArgs {
    pub fn new(out: impl Into<PathBuf>) -> Self {
        Self { out: out.into() }
    }

    pub fn out(&self) -> &Path {
        &self.out
    }
}

fn default_home() -> DisplayPath {
    DisplayPath(match dirs::home_dir() {
        Some(home) => home.join("smartsheet-reaper"),
        None => {
            error!(
                "There was an error when trying to get your home directory. You can get around \
                this by providing --home or REAPER_HOME instead of relying on the default \
                home directory.",
            );
            PathBuf::from("smartsheet-reaper")
        }
    })
}

#[derive(Debug, Default, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct DisplayPath(PathBuf);

impl From<PathBuf> for DisplayPath {
    fn from(value: PathBuf) -> Self {
        DisplayPath(value)
    }
}

impl Deref for DisplayPath {
    type Target = Path;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl AsRef<Path> for DisplayPath {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

impl Display for DisplayPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_string_lossy())
    }
}

impl FromStr for DisplayPath {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(PathBuf::from(s)))
    }
}

impl DisplayPath {
    pub fn path(&self) -> &Path {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run() {
        let args = Args::parse_from(["reaper", "--home", "/tmp/r", "run", "--dry-run"]);
        assert_eq!(Path::new("/tmp/r"), args.common().home().path());
        match args.command() {
            Command::Run(run) => assert!(run.dry_run()),
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_parse_init_columns() {
        let args = Args::parse_from([
            "reaper",
            "init",
            "--sheet-url",
            "https://app.smartsheet.com/sheets/abc",
            "--folder-url-column",
            "11",
            "--deletion-date-column",
            "12",
            "--em-notification-column",
            "13",
            "--status-column",
            "14",
        ]);
        match args.command() {
            Command::Init(init) => {
                assert!(init.columns().is_complete());
                assert_eq!(13, init.columns().em_notification_date);
                assert!(init.client_secret().is_none());
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_parse_log_level() {
        let args = Args::parse_from(["reaper", "--log-level", "debug", "config"]);
        assert_eq!(LevelFilter::DEBUG, args.common().log_level());
    }
}
