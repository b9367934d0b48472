use clap::Parser;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use folioscan_core::crm::salesforce::SalesforceClient;
use folioscan_core::vision::gemini::GeminiClient;

/// Connectivity probe for the portfolio-scan backend: attempts the
/// external connections the API makes at startup and reports the outcome.
#[derive(Debug, Parser)]
#[command(name = "folioscan_probe")]
struct Args {
    /// Also check the vision-engine configuration.
    #[arg(long)]
    vision: bool,

    /// Skip the Salesforce connection attempt.
    #[arg(long)]
    skip_crm: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = folioscan_core::config::Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let args = Args::parse();
    let mut failed = false;

    if !args.skip_crm {
        failed |= !probe_salesforce(&settings).await;
    }

    if args.vision {
        failed |= !probe_vision(&settings);
    }

    if failed {
        std::process::exit(1);
    }
    Ok(())
}

async fn probe_salesforce(settings: &folioscan_core::config::Settings) -> bool {
    println!("salesforce: connecting...");

    let client = match SalesforceClient::connect(settings).await {
        Ok(client) => client,
        Err(err) => {
            let err = err.context("Salesforce connection failed");
            sentry_anyhow::capture_anyhow(&err);
            println!("salesforce: FAILED ({err:#})");
            return false;
        }
    };

    let status = client.test_connection().await;
    if status.connected {
        println!("salesforce: CONNECTED");
        println!("  username:        {}", client.username());
        println!("  instance_url:    {}", client.instance_url());
        if let Some(connection_type) = &status.connection_type {
            println!("  connection_type: {connection_type}");
        }
        if let Some(user_count) = status.user_count {
            println!("  users in org:    {user_count}");
        }
        true
    } else {
        let error = status.error.as_deref().unwrap_or("unknown error");
        println!("salesforce: FAILED ({error})");
        false
    }
}

fn probe_vision(settings: &folioscan_core::config::Settings) -> bool {
    match GeminiClient::from_settings(settings) {
        Ok(_) => {
            println!("vision: configuration OK (GOOGLE_API_KEY present, client built)");
            true
        }
        Err(err) => {
            println!("vision: FAILED ({err:#})");
            false
        }
    }
}

fn init_sentry(settings: &folioscan_core::config::Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}
