use std::env;
use std::process;

use anyhow::{bail, Context, Result};

use peerfund::{
    campaigns::load_campaign,
    config::AppConfig,
    db,
    progress::compute_progress,
};

const USAGE: &str = "Usage: maintenance migrate | maintenance progress <campaign-id>";

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    peerfund::init_tracing();

    let mut args = env::args().skip(1);
    match args.next().as_deref() {
        Some("migrate") => migrate()?,
        Some("progress") => {
            let campaign_id = args.next().context(USAGE)?;
            progress_report(&campaign_id).await?;
        }
        Some(cmd) => {
            eprintln!("Unknown command: {cmd}\n{USAGE}");
            process::exit(1);
        }
        None => {
            eprintln!("{USAGE}");
            process::exit(1);
        }
    }

    Ok(())
}

fn database_url(config: &AppConfig) -> Result<&str> {
    match config.database_url.as_deref() {
        Some(url) => Ok(url),
        None => bail!("DATABASE_URL must be set for maintenance commands"),
    }
}

fn migrate() -> Result<()> {
    let config = AppConfig::from_env()?;
    tracing::info!(
        component = "maintenance",
        database_url = %config.redacted_database_url(),
        "running migrations"
    );
    let pool = db::init_pool(database_url(&config)?)?;
    db::run_migrations(&pool)?;
    println!("Migrations applied.");
    Ok(())
}

async fn progress_report(campaign_id: &str) -> Result<()> {
    let config = AppConfig::from_env()?;
    database_url(&config)?;
    let store = {
        let config = config.clone();
        tokio::task::spawn_blocking(move || db::open_store(&config)).await??
    };

    let campaign = load_campaign(store.as_ref(), campaign_id).await?;
    let progress = compute_progress(store.as_ref(), &campaign).await?;

    println!(
        "{}: {} donors across {} participants ({}% of goal)",
        campaign.name, progress.total_donors, progress.participant_count, progress.overall_percent
    );
    for participant in &progress.per_participant {
        let flag = if participant.load_failed { " (unavailable)" } else { "" };
        println!(
            "  {} {}: {} donors, {}/{} messages sent{flag}",
            participant.first_name,
            participant.last_name,
            participant.donor_count,
            participant.messages_sent,
            participant.total_message_count,
        );
    }
    Ok(())
}
