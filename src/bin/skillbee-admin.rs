use clap::{Parser, Subcommand};
use skillbee::prelude::*;
use skillbee::review::QueueEntry;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[clap(name = "skillbee-admin", version)]
#[clap(about = "Review SkillBee tasker verifications", long_about = None)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,

    /// Admin account email
    #[clap(long, env = "SKILLBEE_ADMIN_EMAIL")]
    email: String,

    /// Admin account password
    #[clap(long, env = "SKILLBEE_ADMIN_PASSWORD", hide_env_values = true)]
    password: String,

    /// Output debug logs to stderr
    #[clap(long)]
    debug: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List submissions
    List {
        /// pending, approved, rejected or all
        #[clap(long, default_value = "pending")]
        status: QueueFilter,
    },
    /// Show submission counts per status
    Counts,
    /// Show one submission with document links
    Show { user_id: String },
    /// Approve a pending submission
    Approve { user_id: String },
    /// Reject a pending submission
    Reject {
        user_id: String,
        /// Shown to the tasker
        #[clap(long)]
        reason: String,
    },
    /// Copy a submission's status onto the user's profile
    Resync { user_id: String },
}

fn print_entry(entry: &QueueEntry) {
    let s = &entry.submission;
    println!(
        "{}  {:<9}  {:<24}  {}",
        s.user_id,
        s.status,
        entry.applicant_name(),
        s.service_category
    );
}

fn report_sync(profile_synced: bool, user_id: &str) {
    if !profile_synced {
        eprintln!(
            "warning: profile status not updated; run `skillbee-admin resync {}`",
            user_id
        );
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.debug { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let app = SkillBee::from_env()?;
    app.init().await;
    app.session().sign_in(&cli.email, &cli.password).await?;
    match app.session().profile() {
        Some(profile) if profile.role == Role::Admin => {}
        _ => return Err(Error::forbidden("this account is not an admin")),
    }

    match cli.command {
        Commands::List { status } => {
            let entries = app.review_queue().list(status).await?;
            if entries.is_empty() {
                println!("No {} applications found.", status);
            }
            for entry in &entries {
                print_entry(entry);
            }
        }
        Commands::Counts => {
            let counts = app.review_queue().counts().await?;
            println!(
                "pending {}  approved {}  rejected {}  total {}",
                counts.pending,
                counts.approved,
                counts.rejected,
                counts.total()
            );
        }
        Commands::Show { user_id } => {
            let entry = app.review_queue().load(&user_id).await?;
            print_entry(&entry);
            if let Some(reason) = &entry.submission.rejection_reason {
                println!("rejection reason: {}", reason);
            }
            for kind in DocumentKind::ALL {
                match entry.documents.get(kind) {
                    Some(url) => println!("{:<15} {}", kind.label(), url),
                    None => println!("{:<15} -", kind.label()),
                }
            }
        }
        Commands::Approve { user_id } => {
            let report = app
                .review_verification(&user_id, ReviewDecision::Approve)
                .await?;
            println!("{} {}", user_id, report.status);
            report_sync(report.profile_synced, &user_id);
        }
        Commands::Reject { user_id, reason } => {
            let report = app
                .review_verification(&user_id, ReviewDecision::reject(&reason))
                .await?;
            println!("{} {}", user_id, report.status);
            report_sync(report.profile_synced, &user_id);
        }
        Commands::Resync { user_id } => {
            let status = app.verification().resync_profile(&user_id).await?;
            println!("{} {}", user_id, status);
        }
    }

    if let Err(e) = app.session().sign_out().await {
        tracing::debug!(error = %e, "sign out failed");
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
