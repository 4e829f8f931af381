use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;
use wipe_certify::config::{AppConfig, LoggingConfig};
use wipe_certify::crypto::{save_certificate, CertificateIssuer};
use wipe_certify::executor::WipeExecutor;
use wipe_certify::health::{GateDecision, HealthEvaluator, HealthReport};
use wipe_certify::progress::ProgressUpdate;
use wipe_certify::simulation::{SimulatedHealthProbe, SimulatedOverwriter};
use wipe_certify::stats::{search_certificates, DashboardStats};
use wipe_certify::store::{Query, RecordStore, SortSpec};
use wipe_certify::verification::{
    DocumentRef, JsonDocumentExtractor, VerificationEngine, VerificationOutcome,
};
use wipe_certify::*;

#[derive(Parser)]
#[command(name = "wipe-certify")]
#[command(about = "Secure wipe workflow with health gating and verifiable certificates")]
#[command(version = "1.0.0")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Configuration file (TOML)
    #[arg(long, global = true, env = "WIPE_CERTIFY_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// List the available wipe algorithms
    Algorithms,

    /// Run a complete wipe session and issue a certificate
    Wipe {
        /// Session name
        #[arg(short, long)]
        name: String,

        /// What to wipe (folder, full_disk)
        #[arg(short = 't', long, default_value = "full_disk")]
        wipe_type: String,

        /// Target path (e.g., /dev/sda or /home/user/old)
        target: String,

        /// Platform of the target (windows, linux, mac, android)
        #[arg(short, long)]
        platform: String,

        /// Wipe algorithm id (see `algorithms`)
        #[arg(short, long, default_value = "dod_3_pass")]
        method: String,

        /// Organization named on the certificate
        #[arg(short, long)]
        organization: Option<String>,

        /// Force the simulated health score (0-100)
        #[arg(long, value_parser = clap::value_parser!(u8).range(0..=100))]
        health_score: Option<u8>,

        /// Seed the simulated capabilities for reproducible runs
        #[arg(long)]
        seed: Option<u64>,

        /// Retries for a failed or stalled step
        #[arg(long, default_value = "2")]
        retries: u32,

        /// Write the issued certificate to this file
        #[arg(long)]
        cert_output: Option<PathBuf>,

        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// Verify a certificate by id or from an exported document
    Verify {
        /// Certificate id (CERT-YYYYMMDD-XXXXXXXXXX)
        #[arg(long, required_unless_present = "document", conflicts_with = "document")]
        id: Option<String>,

        /// Exported certificate document (.json)
        #[arg(long)]
        document: Option<PathBuf>,

        /// Print the full result as JSON
        #[arg(long)]
        json: bool,
    },

    /// List wipe sessions
    Sessions {
        /// Sort field, prefix with '-' for descending
        #[arg(long, default_value = "-created_date")]
        sort: String,

        /// Only sessions with this status
        #[arg(long)]
        status: Option<String>,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// List issued certificates
    Certificates {
        /// Case-insensitive search over id, organization and target
        #[arg(short, long)]
        search: Option<String>,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show aggregate statistics
    Stats {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Export a certificate to a JSON file
    Export {
        /// Certificate id
        certificate_id: String,

        /// Output path
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load(cli.config.as_deref())?;
    let _log_guard = init_logging(&config.logging, cli.debug)?;

    let store = config.open_store()?;

    match cli.command {
        Commands::Algorithms => {
            list_algorithms();
        }

        Commands::Wipe {
            name,
            wipe_type,
            target,
            platform,
            method,
            organization,
            health_score,
            seed,
            retries,
            cert_output,
            yes,
        } => {
            let form = SessionForm {
                session_name: name,
                wipe_type,
                target_path: target,
                platform,
                organization,
            };
            let options = WipeOptions {
                method,
                health_score,
                seed,
                retries,
                cert_output,
                yes,
            };
            run_wipe(&config, store, form, options).await?;
        }

        Commands::Verify { id, document, json } => {
            let mut engine = VerificationEngine::new(store, Arc::new(JsonDocumentExtractor))
                .with_extraction_timeout(config.extraction_timeout());
            if config.has_signing_key() {
                engine = engine.with_signing_key(config.signing_key()?);
            }

            let outcome = match (id, document) {
                (Some(id), _) => engine.verify_by_id(&id)?,
                (None, Some(path)) => {
                    let document = DocumentRef::from_path(path)?;
                    engine.verify_document(&document).await?
                }
                (None, None) => bail!("Either --id or --document is required"),
            };

            if json {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            } else {
                print_verification(&outcome);
            }
            if !outcome.valid {
                std::process::exit(1);
            }
        }

        Commands::Sessions { sort, status, json } => {
            let sort: SortSpec = sort.parse()?;
            let mut sessions = match status {
                Some(status) => {
                    let status: SessionStatus = status.parse()?;
                    store.filter_sessions(&Query::eq("status", status.as_str()))?
                }
                None => store.list_sessions(&SortSpec::unsorted())?,
            };
            sort.apply(&mut sessions)?;

            if json {
                println!("{}", serde_json::to_string_pretty(&sessions)?);
            } else {
                print_sessions(&sessions);
            }
        }

        Commands::Certificates { search, json } => {
            let certificates = store.list_certificates(&SortSpec::newest_first())?;
            let matches = search_certificates(&certificates, search.as_deref().unwrap_or(""));

            if json {
                println!("{}", serde_json::to_string_pretty(&matches)?);
            } else {
                print_certificates(&matches);
            }
        }

        Commands::Stats { json } => {
            let stats = DashboardStats::load(store.as_ref())?;
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                print_stats(&stats);
            }
        }

        Commands::Export {
            certificate_id,
            output,
        } => {
            let certificate = store
                .find_certificate(&certificate_id)?
                .with_context(|| format!("Certificate {} not found", certificate_id))?;
            save_certificate(&certificate, &output)?;
            println!(
                "{} Certificate {} exported to {}",
                "✓".green(),
                certificate.certificate_id.bold(),
                output.display()
            );
        }
    }

    Ok(())
}

// ==================== LOGGING ====================

/// Install the global subscriber. The returned guard flushes the log file
/// on drop and must live until exit.
fn init_logging(logging: &LoggingConfig, debug: bool) -> Result<Option<WorkerGuard>> {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level))
    };

    let (writer, guard) = match &logging.file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let file_name = path
                .file_name()
                .with_context(|| format!("Invalid log file path: {}", path.display()))?;
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory {}", dir.display()))?;

            let appender = tracing_appender::rolling::never(dir, file_name);
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            (BoxMakeWriter::new(non_blocking), Some(guard))
        }
        None => (BoxMakeWriter::new(io::stderr), None),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(logging.file.is_none())
        .with_target(false);

    let installed = if logging.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| anyhow::anyhow!("Failed to install logger: {}", e))?;

    Ok(guard)
}

// ==================== WIPE ====================

struct WipeOptions {
    method: String,
    health_score: Option<u8>,
    seed: Option<u64>,
    retries: u32,
    cert_output: Option<PathBuf>,
    yes: bool,
}

enum WipeRun {
    Certified(Box<Certificate>),
    GateAborted(HealthReport),
    Declined,
    Abandoned(Operation),
}

fn build_workflow(
    config: &AppConfig,
    store: Arc<dyn RecordStore>,
    options: &WipeOptions,
) -> Result<WipeWorkflow> {
    let mut probe = match options.seed {
        Some(seed) => SimulatedHealthProbe::with_seed(seed),
        None => SimulatedHealthProbe::new(),
    };
    if let Some(score) = options.health_score {
        probe = probe.with_score(score);
    }
    let overwriter = match options.seed {
        Some(seed) => SimulatedOverwriter::with_seed(seed),
        None => SimulatedOverwriter::new(),
    };

    let evaluator = HealthEvaluator::new(Arc::new(probe), config.health_stall_timeout());
    let executor = WipeExecutor::new(Arc::new(overwriter), config.wipe_stall_timeout());
    let issuer = CertificateIssuer::new(config.signing_key()?);

    Ok(WipeWorkflow::new(
        store,
        Arc::new(evaluator),
        Arc::new(executor),
        Arc::new(issuer),
    ))
}

async fn run_wipe(
    config: &AppConfig,
    store: Arc<dyn RecordStore>,
    form: SessionForm,
    options: WipeOptions,
) -> Result<()> {
    let mut workflow = build_workflow(config, store, &options)?;

    let renderer = spawn_progress_renderer(workflow.subscribe_progress());

    let cancel = workflow.cancel_handle();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\n\n{} Interrupt received! Abandoning session...", "🛑".red());
            cancel.cancel();
        }
    });

    let start = Instant::now();
    let result = drive_workflow(&mut workflow, &form, &options).await;
    let session = workflow.session().cloned();

    // Closing the progress channel ends the renderer
    interrupt.abort();
    drop(workflow);
    let _ = renderer.await;

    let run = result?;
    match run {
        WipeRun::Certified(certificate) => {
            println!(
                "\n{} Wipe completed in {}",
                "✅".green(),
                humantime::format_duration(Duration::from_secs(start.elapsed().as_secs()))
            );
            if let Some(session) = &session {
                print_session_summary(session);
            }
            print_certificate(&certificate);

            if let Some(path) = &options.cert_output {
                save_certificate(&certificate, path)?;
                println!("   Certificate saved to: {}", path.display());
            }
        }
        WipeRun::GateAborted(report) => {
            println!(
                "\n{} Health check failed: score {} is below the required {}",
                "❌".red(),
                report.health_score.to_string().red().bold(),
                wipe_certify::health::HEALTH_GATE_THRESHOLD
            );
            println!("   {}", report.recommendation);
            println!("   The session has been aborted and no data was wiped.");
            std::process::exit(1);
        }
        WipeRun::Declined => {
            println!("{}", "Wipe cancelled. The session has been aborted.".yellow());
        }
        WipeRun::Abandoned(operation) => {
            println!(
                "{}",
                format!("Session abandoned during {}.", operation).yellow()
            );
            std::process::exit(130);
        }
    }

    Ok(())
}

async fn drive_workflow(
    workflow: &mut WipeWorkflow,
    form: &SessionForm,
    options: &WipeOptions,
) -> Result<WipeRun> {
    let session = workflow.configure(form.clone())?;
    println!(
        "{} Session {} created for {}",
        "→".cyan(),
        session.id.bold(),
        session.target_path
    );

    let method = workflow.select_algorithm(&options.method)?;
    println!(
        "{} Algorithm: {} ({} passes)",
        "→".cyan(),
        method.label().bold(),
        method.passes()
    );

    println!("\n🔍 Analyzing disk health...");
    let mut attempt = 0;
    let decision = loop {
        match workflow.run_health_check().await {
            Ok(decision) => break decision,
            Err(WorkflowError::Cancelled(operation)) => return Ok(WipeRun::Abandoned(operation)),
            Err(e) if e.is_retryable() && attempt < options.retries => {
                attempt += 1;
                eprintln!("{} {} (retry {}/{})", "⚠".yellow(), e, attempt, options.retries);
            }
            Err(e) => return Err(e.into()),
        }
    };

    let report = workflow
        .health_report()
        .cloned()
        .context("Health check finished without a report")?;
    print_health_report(&report);

    if decision == GateDecision::Abort {
        return Ok(WipeRun::GateAborted(report));
    }

    if !options.yes && !confirm_wipe_prompt(form, method)? {
        workflow.abandon()?;
        return Ok(WipeRun::Declined);
    }

    println!("\n🧹 Wiping {}...", form.target_path);
    let mut attempt = 0;
    let certificate = loop {
        match workflow.confirm_wipe().await {
            Ok(certificate) => break certificate,
            Err(WorkflowError::Cancelled(operation)) => return Ok(WipeRun::Abandoned(operation)),
            Err(e) if e.is_retryable() && attempt < options.retries => {
                attempt += 1;
                eprintln!("{} {} (retry {}/{})", "⚠".yellow(), e, attempt, options.retries);
            }
            Err(e) => return Err(e.into()),
        }
    };

    Ok(WipeRun::Certified(Box::new(certificate)))
}

fn confirm_wipe_prompt(form: &SessionForm, method: WipeMethod) -> Result<bool> {
    println!(
        "\n{} This will permanently destroy all data on {}",
        "⚠️  WARNING:".red().bold(),
        form.target_path.bold()
    );
    println!("   Method: {}", method.label());
    print!("\nType 'WIPE' to confirm: ");
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim() == "WIPE")
}

/// Draw one progress bar per capability run published on the channel
fn spawn_progress_renderer(mut updates: watch::Receiver<ProgressUpdate>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut current: Option<(u64, ProgressBar)> = None;

        loop {
            let update = *updates.borrow_and_update();
            if let Some(operation) = update.operation {
                let is_new_run = current.as_ref().map(|(run, _)| *run) != Some(update.run);
                if is_new_run {
                    if let Some((_, bar)) = current.take() {
                        if !bar.is_finished() {
                            bar.abandon();
                        }
                    }
                    current = Some((update.run, new_progress_bar(operation)));
                }

                if let Some((_, bar)) = &current {
                    bar.set_position(u64::from(update.percent));
                    if update.is_complete() && !bar.is_finished() {
                        bar.finish();
                    }
                }
            }

            if updates.changed().await.is_err() {
                break;
            }
        }

        if let Some((_, bar)) = current {
            if !bar.is_finished() {
                bar.abandon();
            }
        }
    })
}

fn new_progress_bar(operation: Operation) -> ProgressBar {
    let bar = ProgressBar::new(100);
    let style = ProgressStyle::with_template(
        "{prefix:>14.bold} [{elapsed_precise}] [{wide_bar:.green/white}] {pos:>3}%",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("█▓░");
    bar.set_style(style);
    bar.set_prefix(operation.to_string());
    bar.enable_steady_tick(Duration::from_millis(120));
    bar
}

// ==================== OUTPUT ====================

fn list_algorithms() {
    println!("\n{}", "Available wipe algorithms".bold());
    println!("{}", "=".repeat(72));
    println!(
        "{:<18} {:<26} {:>6}  {}",
        "ID", "Name", "Passes", "Description"
    );
    println!("{}", "-".repeat(72));
    for method in WipeMethod::CATALOG {
        println!(
            "{:<18} {:<26} {:>6}  {}",
            method.as_str().cyan(),
            method.label(),
            method.passes(),
            method.description()
        );
    }
    println!();
}

fn health_color(score: u8) -> ColoredString {
    let text = format!("{}/100", score);
    if score >= 85 {
        text.green()
    } else if score >= wipe_certify::health::HEALTH_GATE_THRESHOLD {
        text.yellow()
    } else {
        text.red()
    }
}

fn print_health_report(report: &HealthReport) {
    println!("\n{}", "Disk Health".bold());
    println!("   Score:        {}", health_color(report.health_score).bold());
    println!("   Bad sectors:  {}", report.bad_sectors);
    println!("   Temperature:  {}°C", report.temperature);
    println!("   Read errors:  {}", report.read_errors);
    println!("   Write errors: {}", report.write_errors);
    println!("   {}", report.recommendation.italic());
}

fn print_session_summary(session: &WipeSession) {
    println!("   Session:  {} ({})", session.session_name, session.id);
    if let Some(size_gb) = session.size_gb {
        println!("   Wiped:    {} GB", size_gb);
    }
    if let Some(minutes) = session.duration_minutes {
        println!(
            "   Duration: {} (reported)",
            humantime::format_duration(Duration::from_secs(minutes * 60))
        );
    }
}

fn print_certificate(certificate: &Certificate) {
    println!("\n{}", "📜 Certificate of Data Sanitization".bold());
    println!("{}", "=".repeat(60));
    println!("   ID:           {}", certificate.certificate_id.green().bold());
    println!("   Organization: {}", certificate.organization);
    println!("   Target:       {}", certificate.target_description);
    println!("   Standard:     {}", certificate.wipe_standard.label());
    println!(
        "   Compliance:   {}",
        certificate.compliance_standards.join(", ")
    );
    println!("   Issued:       {}", certificate.created_date.to_rfc3339());
    println!("   Expires:      {}", certificate.expiry_date.to_rfc3339());
    println!("   Hash:         {}", certificate.verification_hash.dimmed());
}

fn print_verification(outcome: &VerificationOutcome) {
    if outcome.valid {
        println!("{} {}", "✅".green(), outcome.message.green().bold());
    } else {
        println!("{} {}", "❌".red(), outcome.message.red().bold());
    }

    if let Some(hash_verified) = outcome.hash_verified {
        let status = if hash_verified {
            "match".green()
        } else {
            "MISMATCH".red().bold()
        };
        println!("   Verification hash: {}", status);
    }
    if let Some(digest) = &outcome.document_sha256 {
        println!("   Document SHA-256:  {}", digest.dimmed());
    }
    if let Some(certificate) = &outcome.certificate {
        print_certificate(certificate);
    }
    match (&outcome.certificate, &outcome.session) {
        (_, Some(session)) => {
            println!("\n{}", "Wipe session".bold());
            print_session_summary(session);
        }
        (Some(_), None) => {
            println!(
                "\n{}",
                "   The wipe session for this certificate is no longer on record.".yellow()
            );
        }
        (None, None) => {}
    }
}

fn status_color(status: SessionStatus) -> ColoredString {
    match status {
        SessionStatus::Completed => status.as_str().green(),
        SessionStatus::Aborted => status.as_str().red(),
        SessionStatus::Pending => status.as_str().white(),
        SessionStatus::HealthCheck | SessionStatus::Wiping => status.as_str().yellow(),
    }
}

fn print_sessions(sessions: &[WipeSession]) {
    if sessions.is_empty() {
        println!("No wipe sessions recorded.");
        return;
    }

    println!(
        "\n{:<37} {:<20} {:<9} {:<9} {:<12} {:>6}  {}",
        "ID", "Name", "Type", "Platform", "Status", "Health", "Created"
    );
    println!("{}", "-".repeat(120));
    for session in sessions {
        println!(
            "{:<37} {:<20} {:<9} {:<9} {:<12} {:>6}  {}",
            session.id,
            truncate_string(&session.session_name, 20),
            session.wipe_type.as_str(),
            session.platform.as_str(),
            status_color(session.status),
            session
                .health_score
                .map(|s| s.to_string())
                .unwrap_or_else(|| "-".to_string()),
            session.created_date.format("%Y-%m-%d %H:%M")
        );
    }
    println!("\n{} session(s)", sessions.len());
}

fn print_certificates(certificates: &[&Certificate]) {
    if certificates.is_empty() {
        println!("No certificates found.");
        return;
    }

    println!(
        "\n{:<26} {:<24} {:<30} {}",
        "Certificate", "Organization", "Target", "Issued"
    );
    println!("{}", "-".repeat(100));
    for certificate in certificates {
        println!(
            "{:<26} {:<24} {:<30} {}",
            certificate.certificate_id.green(),
            truncate_string(&certificate.organization, 24),
            truncate_string(&certificate.target_description, 30),
            certificate.created_date.format("%Y-%m-%d")
        );
    }
    println!("\n{} certificate(s)", certificates.len());
}

fn print_stats(stats: &DashboardStats) {
    println!("\n{}", "Wipe Statistics".bold());
    println!("{}", "=".repeat(40));
    println!("   Total sessions:     {}", stats.total_sessions);
    println!("   Completed:          {}", stats.completed_sessions);
    println!("   Active:             {}", stats.active_sessions);
    println!("   Certificates:       {}", stats.total_certificates);
    println!("   Data wiped:         {} GB", stats.total_data_wiped_gb);
    println!("   Avg. health score:  {}", stats.average_health_score);

    if !stats.sessions_by_platform.is_empty() {
        println!("\n{}", "Sessions by platform".bold());
        for (platform, count) in &stats.sessions_by_platform {
            println!("   {:<10} {}", platform.as_str(), count);
        }
    }
    if !stats.data_wiped_by_month.is_empty() {
        println!("\n{}", "Data wiped by month".bold());
        for (month, gb) in &stats.data_wiped_by_month {
            println!("   {}    {} GB", month, gb);
        }
    }
}

fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
