use anyhow::{anyhow, Result};
use chrono::Local;
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use crate::backend::ews::EwsEndpoint;
use crate::backend::{EwsAuth, EwsBackend, FolderScope, GraphBackend, MailboxBackend};
use crate::config::{
    AccessType, AppConfig, ConfigManager, LogLevel, ENV_EWS_PASSWORD, ENV_EWS_TOKEN, ENV_GRAPH_TOKEN,
};
use crate::criteria::{normalize_date_input, Criteria, MeetingScope, TargetType};
use crate::http::{ClientPool, HttpTransport, ReqwestTransport, RetryPolicy, TracingTransport};
use crate::model::ActionMode;
use crate::recurrence::ReportLocale;
use crate::report::{
    apply_deletions, load_report, report_file_name, write_records, CsvReportSink, RowSelection,
};
use crate::sweep::{SweepPlan, SweepRunner};
use crate::targets::{resolve_targets, TargetSource};

/// mailsweep - bulk mailbox scan and cleanup over Microsoft Graph or EWS
#[derive(Parser)]
#[command(name = "mailsweep")]
#[command(about = "Scan many mailboxes for matching mail or meetings, report and optionally delete them")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration directory path
    #[arg(long, global = true)]
    pub config_dir: Option<PathBuf>,

    /// Log verbosity; RUST_LOG takes precedence
    #[arg(long, global = true, value_enum)]
    pub log_level: Option<LogLevel>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Scan mailboxes and write a report, deleting matches if asked to
    Scan(ScanArgs),

    /// Delete rows selected from an earlier report
    Replay(ReplayArgs),

    /// Show or create the configuration file
    Config(ConfigArgs),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackendKind {
    Graph,
    Ews,
}

/// Credentials and connection overrides. Secrets fall back to the
/// `MAILSWEEP_*` environment variables.
#[derive(Args, Debug, Clone, Default)]
pub struct CredentialArgs {
    /// Graph bearer token
    #[arg(long)]
    pub graph_token: Option<String>,

    /// EWS service account (basic auth)
    #[arg(long)]
    pub ews_username: Option<String>,

    /// EWS service account password
    #[arg(long)]
    pub ews_password: Option<String>,

    /// EWS OAuth bearer token, used instead of username/password
    #[arg(long)]
    pub ews_token: Option<String>,

    /// EWS server host or URL; autodiscover is used when unset
    #[arg(long)]
    pub ews_server: Option<String>,

    /// Use delegate access instead of impersonation
    #[arg(long)]
    pub delegate: bool,

    /// Accept invalid TLS certificates (on-premises test servers)
    #[arg(long)]
    pub accept_invalid_certs: bool,
}

#[derive(Args, Debug, Clone)]
pub struct ScanArgs {
    #[arg(long, value_enum, default_value = "graph")]
    pub backend: BackendKind,

    #[arg(long, value_enum, default_value = "email")]
    pub target: TargetType,

    /// Subject contains (case-insensitive)
    #[arg(long)]
    pub subject: Option<String>,

    /// Sender (email) or organizer (meeting) contains
    #[arg(long)]
    pub sender: Option<String>,

    /// Body contains
    #[arg(long)]
    pub body: Option<String>,

    /// Exact Internet message id
    #[arg(long)]
    pub message_id: Option<String>,

    /// First day, inclusive (YYYY-MM-DD, YYYY/MM/DD or YYYYMMDD)
    #[arg(long)]
    pub start_date: Option<String>,

    /// Last day, inclusive
    #[arg(long)]
    pub end_date: Option<String>,

    /// Meeting scope
    #[arg(long, value_enum, default_value = "all")]
    pub scope: MeetingScope,

    /// Only cancelled meetings
    #[arg(long)]
    pub cancelled_only: bool,

    /// Email folders: mailbox, common, subtree or a folder name such as inbox
    #[arg(long, default_value = "mailbox")]
    pub folder: String,

    #[arg(long, value_enum, default_value = "report")]
    pub action: ActionMode,

    /// Mailbox list (CSV with UserPrincipalName, or one address per line)
    #[arg(long, short = 'l')]
    pub list: Option<PathBuf>,

    /// Single mailbox, replaces the list
    #[arg(long, short = 'm')]
    pub mailbox: Option<String>,

    /// Directory for the report file
    #[arg(long, short = 'o')]
    pub output_dir: Option<PathBuf>,

    /// Mailboxes processed in parallel
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Language of recurrence texts in the report
    #[arg(long, value_enum)]
    pub locale: Option<ReportLocale>,

    /// Hide the progress bar
    #[arg(long)]
    pub no_progress: bool,

    #[command(flatten)]
    pub credentials: CredentialArgs,
}

#[derive(Args, Debug, Clone)]
pub struct ReplayArgs {
    /// Report written by an earlier scan
    pub report: PathBuf,

    #[arg(long, value_enum, default_value = "graph")]
    pub backend: BackendKind,

    #[arg(long, value_enum, default_value = "delete")]
    pub action: ActionMode,

    /// Only rows of this mailbox
    #[arg(long)]
    pub mailbox: Option<String>,

    /// Only rows with this Status (e.g. Skipped, Failed)
    #[arg(long)]
    pub status: Option<String>,

    /// Only rows whose subject contains this text
    #[arg(long)]
    pub subject: Option<String>,

    /// Only rows whose Type starts with this text (meeting reports)
    #[arg(long = "type")]
    pub item_type: Option<String>,

    /// Skip the confirmation prompt
    #[arg(long, short = 'y')]
    pub yes: bool,

    #[command(flatten)]
    pub credentials: CredentialArgs,
}

#[derive(Args, Debug, Clone)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug, Clone)]
pub enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Print the configuration file location
    Path,
}

fn secret(flag: Option<&str>, env: &str) -> Option<String> {
    flag.map(str::to_string)
        .or_else(|| std::env::var(env).ok())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl ScanArgs {
    /// Criteria from the filter flags; dates are normalized here
    pub fn criteria(&self) -> Result<Criteria> {
        let start = self.start_date.as_deref().map(normalize_date_input).transpose()?.flatten();
        let end = self.end_date.as_deref().map(normalize_date_input).transpose()?.flatten();

        let mut criteria = Criteria::new(self.target)
            .with_dates(start, end)
            .with_meeting_scope(self.scope)
            .with_cancelled_only(self.cancelled_only);
        if let Some(value) = self.subject.as_deref().filter(|v| !v.trim().is_empty()) {
            criteria = criteria.with_subject(value);
        }
        if let Some(value) = self.sender.as_deref().filter(|v| !v.trim().is_empty()) {
            criteria = criteria.with_sender(value);
        }
        if let Some(value) = self.body.as_deref().filter(|v| !v.trim().is_empty()) {
            criteria = criteria.with_body(value);
        }
        if let Some(value) = self.message_id.as_deref().filter(|v| !v.trim().is_empty()) {
            criteria = criteria.with_message_id(value);
        }
        Ok(criteria)
    }
}

impl ReplayArgs {
    pub fn selection(&self) -> RowSelection {
        RowSelection {
            mailbox: self.mailbox.clone(),
            status: self.status.clone(),
            subject: self.subject.clone(),
            item_type: self.item_type.clone(),
        }
    }
}

/// Command-line interface handler
pub struct CliHandler {
    config: ConfigManager,
}

impl CliHandler {
    /// Load the configuration from `config_dir` or the default location
    pub fn new(config_dir: Option<PathBuf>) -> Result<Self> {
        let dir = match config_dir {
            Some(dir) => dir,
            None => ConfigManager::default_dir()?,
        };
        let config = ConfigManager::new(dir)?;
        config.config().validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &AppConfig {
        self.config.config()
    }

    /// Handle CLI commands
    pub async fn handle_command(&self, command: Commands, cancel: Arc<AtomicBool>) -> Result<()> {
        match command {
            Commands::Scan(args) => self.handle_scan(args, cancel).await,
            Commands::Replay(args) => self.handle_replay(args).await,
            Commands::Config(args) => self.handle_config(args),
        }
    }

    /// Transports for `size` workers, each wrapped in the tracing decorator
    fn client_pool(&self, size: usize, credentials: &CredentialArgs) -> Result<ClientPool> {
        let timeout = Duration::from_secs(self.config().run.http_timeout_secs);
        let invalid_certs = credentials.accept_invalid_certs || self.config().ews.accept_invalid_certs;
        let pool = ClientPool::new(size, || {
            let inner: Arc<dyn HttpTransport> = Arc::new(ReqwestTransport::new(timeout, invalid_certs)?);
            Ok(Arc::new(TracingTransport::new(inner)) as Arc<dyn HttpTransport>)
        })?;
        Ok(pool)
    }

    /// Build the backend; missing credentials fail here, before any request
    fn backend(
        &self,
        kind: BackendKind,
        credentials: &CredentialArgs,
        folder_scope: FolderScope,
        locale: ReportLocale,
    ) -> Result<Arc<dyn MailboxBackend>> {
        let config = self.config();
        let policy = RetryPolicy::from(&config.retry);

        match kind {
            BackendKind::Graph => {
                let token = secret(credentials.graph_token.as_deref(), ENV_GRAPH_TOKEN)
                    .ok_or_else(|| anyhow!("Graph needs a bearer token (--graph-token or {})", ENV_GRAPH_TOKEN))?;
                let backend = GraphBackend::new(config.graph.base_url(), token)
                    .with_policy(policy)
                    .with_page_size(config.run.page_size)
                    .with_batch_size(config.run.graph_batch_size)
                    .with_folder_scope(folder_scope)
                    .with_locale(locale);
                Ok(Arc::new(backend))
            }
            BackendKind::Ews => {
                let auth = match secret(credentials.ews_token.as_deref(), ENV_EWS_TOKEN) {
                    Some(token) => EwsAuth::Bearer(token),
                    None => {
                        let username = credentials
                            .ews_username
                            .clone()
                            .or_else(|| config.ews.username.clone())
                            .ok_or_else(|| anyhow!("EWS needs --ews-username or --ews-token"))?;
                        let password = secret(credentials.ews_password.as_deref(), ENV_EWS_PASSWORD)
                            .ok_or_else(|| {
                                anyhow!("EWS needs a password (--ews-password or {})", ENV_EWS_PASSWORD)
                            })?;
                        EwsAuth::Basic { username, password }
                    }
                };

                let mut settings = config.ews.clone();
                if let Some(server) = credentials.ews_server.clone() {
                    settings.server = Some(server);
                }
                let endpoint = match settings.service_url() {
                    Some(url) => EwsEndpoint::Fixed(url),
                    None if settings.autodiscover => EwsEndpoint::Autodiscover,
                    None => return Err(anyhow!("EWS needs --ews-server or autodiscover enabled in the config")),
                };

                let access_type = if credentials.delegate {
                    AccessType::Delegate
                } else {
                    settings.access_type
                };

                let backend = EwsBackend::new(endpoint, auth)
                    .with_access_type(access_type)
                    .with_server_version(settings.server_version.clone())
                    .with_policy(policy)
                    .with_page_size(config.run.page_size)
                    .with_batch_size(config.run.ews_batch_size)
                    .with_folder_scope(folder_scope)
                    .with_locale(locale);
                Ok(Arc::new(backend))
            }
        }
    }

    async fn handle_scan(&self, args: ScanArgs, cancel: Arc<AtomicBool>) -> Result<()> {
        let config = self.config();
        let criteria = args.criteria()?;
        let folder_scope: FolderScope = args.folder.parse()?;
        let locale = args.locale.unwrap_or(config.report.locale);

        let mailboxes = resolve_targets(&TargetSource {
            list_file: args.list.as_deref(),
            single_mailbox: args.mailbox.as_deref(),
        })?;
        let plan = SweepPlan::new(criteria, args.action, mailboxes);
        plan.validate()?;

        let backend = self.backend(args.backend, &args.credentials, folder_scope, locale)?;
        let concurrency = args.concurrency.unwrap_or(config.run.concurrency).max(1);
        let pool = self.client_pool(concurrency, &args.credentials)?;

        let output_dir = args
            .output_dir
            .clone()
            .or_else(|| config.run.reports_dir.clone())
            .unwrap_or_else(|| PathBuf::from("."));
        let report_path = output_dir.join(report_file_name(backend.name(), args.target, Local::now()));
        let sink = Arc::new(CsvReportSink::create(&report_path, args.target)?);

        println!("📬 mailsweep scan");
        println!("=================\n");
        println!("   Backend:   {}", backend.name());
        println!("   Target:    {}", args.target);
        println!("   Action:    {}", args.action);
        println!("   Mailboxes: {}", plan.mailboxes.len());
        println!("   Report:    {}\n", report_path.display());

        let runner = SweepRunner::new(backend, pool, sink)
            .with_concurrency(concurrency)
            .with_progress_bar(!args.no_progress)
            .with_cancel_flag(cancel);
        let summary = runner.run(&plan).await?;

        println!();
        if summary.cancelled {
            println!("⚠️  Cancelled before every mailbox was processed");
        }
        println!("✅ Processed {} mailbox(es), {} row(s)", summary.mailboxes, summary.rows);
        println!("   Skipped:   {}", summary.skipped);
        println!("   Deleted:   {}", summary.successes);
        println!("   Failed:    {}", summary.failures);
        println!("   Errors:    {}", summary.errors);
        println!("   Report:    {}", report_path.display());

        Ok(())
    }

    async fn handle_replay(&self, args: ReplayArgs) -> Result<()> {
        if !args.action.is_destructive() {
            return Err(anyhow!("replay needs a delete action"));
        }

        let mut report = load_report(&args.report)?;
        let selected = report.select(&args.selection());

        println!("♻️  mailsweep replay");
        println!("===================\n");
        println!("   Report:    {}", args.report.display());
        println!("   Rows:      {} of {}", selected.len(), report.rows.len());

        if selected.is_empty() {
            println!("   Nothing selected");
            return Ok(());
        }

        let mailboxes: HashSet<String> = selected
            .iter()
            .map(|&i| report.rows[i].mailbox().to_lowercase())
            .collect();

        if !args.yes && !confirm(&format!(
            "{} {} item(s) in {} mailbox(es)?",
            args.action,
            selected.len(),
            mailboxes.len()
        ))? {
            println!("   Aborted");
            return Ok(());
        }

        let backend = self.backend(
            args.backend,
            &args.credentials,
            FolderScope::default(),
            self.config().report.locale,
        )?;
        let pool = self.client_pool(1, &args.credentials)?;
        let http = pool.checkout(0);

        let summary = apply_deletions(&mut report, &selected, backend.as_ref(), http.as_ref(), args.action).await?;

        let replay_path = replay_report_path(&args.report, Local::now().format("%Y%m%d_%H%M%S").to_string());
        write_records(
            &replay_path,
            &report.columns,
            selected.iter().map(|&i| report.rows[i].values()),
        )?;

        println!();
        println!("✅ Deleted: {}", summary.success);
        println!("❌ Failed:  {}", summary.failed);
        println!("   Replay report: {}", replay_path.display());

        Ok(())
    }

    fn handle_config(&self, args: ConfigArgs) -> Result<()> {
        match args.action {
            ConfigAction::Show => {
                println!("# {}", self.config.path().display());
                println!("{}", self.config.to_toml()?);
            }
            ConfigAction::Path => println!("{}", self.config.path().display()),
            ConfigAction::Init { force } => {
                let path = self.config.path();
                if path.exists() && !force {
                    return Err(anyhow!("{} already exists (use --force to overwrite)", path.display()));
                }
                let mut fresh = ConfigManager::new(path.parent().unwrap_or_else(|| Path::new(".")))?;
                *fresh.config_mut() = AppConfig::default();
                fresh.save()?;
                println!("✅ Wrote default configuration to {}", path.display());
            }
        }
        Ok(())
    }
}

/// `<stem>_Replay_<timestamp>.csv` next to the original report
pub fn replay_report_path(original: &Path, stamp: String) -> PathBuf {
    let stem = original
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "report".to_string());
    original.with_file_name(format!("{}_Replay_{}.csv", stem, stamp))
}

fn confirm(question: &str) -> Result<bool> {
    print!("   {} [y/N] ", question);
    std::io::stdout().flush()?;
    let mut answer = String::new();
    std::io::stdin().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_scan_arguments() {
        let cli = Cli::try_parse_from([
            "mailsweep",
            "scan",
            "--backend",
            "ews",
            "--target",
            "meeting",
            "--subject",
            "Standup",
            "--start-date",
            "2024/03/01",
            "--end-date",
            "20240331",
            "--scope",
            "series",
            "-m",
            "a@x.com",
        ])
        .unwrap();

        let Commands::Scan(args) = cli.command else {
            panic!("expected scan");
        };
        assert_eq!(args.backend, BackendKind::Ews);
        assert_eq!(args.action, ActionMode::ReportOnly);

        let criteria = args.criteria().unwrap();
        assert_eq!(criteria.start_date, NaiveDate::from_ymd_opt(2024, 3, 1));
        assert_eq!(criteria.end_date, NaiveDate::from_ymd_opt(2024, 3, 31));
        assert_eq!(criteria.meeting_scope, MeetingScope::SeriesMaster);
        assert!(criteria.expands_recurrences());
    }

    #[test]
    fn test_bad_date_is_rejected() {
        let cli = Cli::try_parse_from(["mailsweep", "scan", "--start-date", "March 1st"]).unwrap();
        let Commands::Scan(args) = cli.command else {
            panic!("expected scan");
        };
        assert!(args.criteria().is_err());
    }

    #[test]
    fn test_replay_arguments() {
        let cli = Cli::try_parse_from([
            "mailsweep",
            "replay",
            "Graph_Email_Report_20240506_070809.csv",
            "--status",
            "skipped",
            "--action",
            "permanent-delete",
            "-y",
        ])
        .unwrap();
        let Commands::Replay(args) = cli.command else {
            panic!("expected replay");
        };
        assert!(args.yes);
        assert_eq!(args.action, ActionMode::PermanentDelete);
        assert_eq!(args.selection().status.as_deref(), Some("skipped"));

        let path = replay_report_path(&args.report, "20240507_100000".into());
        assert_eq!(
            path,
            PathBuf::from("Graph_Email_Report_20240506_070809_Replay_20240507_100000.csv")
        );
    }

    #[test]
    fn test_missing_credentials_fail_before_network() {
        let dir = tempfile::tempdir().unwrap();
        let handler = CliHandler::new(Some(dir.path().to_path_buf())).unwrap();
        let credentials = CredentialArgs {
            ews_username: Some("svc@x.com".into()),
            ews_server: Some("mail.x.com".into()),
            ..CredentialArgs::default()
        };
        std::env::remove_var(ENV_EWS_PASSWORD);
        std::env::remove_var(ENV_EWS_TOKEN);
        let error = handler
            .backend(BackendKind::Ews, &credentials, FolderScope::default(), ReportLocale::English)
            .err()
            .unwrap();
        assert!(error.to_string().contains(ENV_EWS_PASSWORD));
    }
}
