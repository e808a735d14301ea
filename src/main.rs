//! Curator - virtual contract addresses and verified share rewards
//!
//! Runs the share verification sweeper against the configured store.

use clap::Parser;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

use curator::{
    config::Args,
    db::{MemoryStore, MongoClient, MongoStore, ShareStore, VcaStore},
    share::{spawn_verification_sweep, ShareTracker, ShareVerifier},
    vca::{VcaRegistry, VcaService},
};

/// Store handles behind their trait objects
struct Stores {
    vcas: Arc<dyn VcaStore>,
    shares: Arc<dyn ShareStore>,
}

impl Stores {
    fn from_backend<S>(store: Arc<S>) -> Self
    where
        S: VcaStore + ShareStore + 'static,
    {
        Self {
            vcas: store.clone(),
            shares: store,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    // Initialize tracing/logging
    let log_level = args.log_level.clone();
    let fmt_layer = if args.log_json {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("curator={},info", log_level).into()),
        )
        .with(fmt_layer)
        .init();

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    info!("======================================");
    info!("  Curator - VCA registry and share verifier");
    info!("======================================");
    info!("Mode: {}", if args.dev_mode { "DEVELOPMENT" } else { "PRODUCTION" });
    info!("MongoDB: {} (db: {})", args.mongodb_uri, args.mongodb_db);
    info!("Public base URL: {}", args.public_base_url);
    info!("Share points: {}", args.share_points);
    info!(
        "Fallback: {} after {}h",
        if args.policy.fallback_enabled { "enabled" } else { "disabled" },
        args.policy.fallback_after_hours
    );
    if args.sweep_once {
        info!("Sweep: once");
    } else {
        info!("Sweep: every {}s", args.sweep_interval_secs);
    }
    info!("======================================");

    // Connect to MongoDB (in-memory fallback in dev mode)
    let stores = match connect_mongo(&args).await {
        Ok(store) => {
            info!("MongoDB connected successfully");
            Stores::from_backend(Arc::new(store))
        }
        Err(e) => {
            if args.dev_mode {
                warn!("MongoDB connection failed (dev mode, using in-memory store): {}", e);
                Stores::from_backend(Arc::new(MemoryStore::new()))
            } else {
                error!("MongoDB connection failed: {}", e);
                std::process::exit(1);
            }
        }
    };

    let vcas = VcaService::new(VcaRegistry::new(stores.vcas.clone(), args.address_codec()));
    let tracker = ShareTracker::new(
        stores.shares.clone(),
        args.verification_policy(),
        &args.public_base_url,
    );
    let verifier = Arc::new(ShareVerifier::new(
        stores.shares.clone(),
        tracker,
        vcas,
        args.share_points,
    ));

    if args.sweep_once {
        let report = verifier.verify_pending_shares().await?;
        info!(
            "Sweep finished: {} examined, {} verified, {} awarded, {} flagged, {} errors",
            report.examined, report.verified, report.awarded, report.flagged_for_review, report.errors
        );
        let stats = verifier.verification_stats().await?;
        info!(
            "Shares: {} total, {} verified ({:.1}%), {} awaiting manual review",
            stats.total,
            stats.verified,
            stats.verification_rate * 100.0,
            stats.manual_review
        );
        return Ok(());
    }

    let sweep = spawn_verification_sweep(verifier, args.sweep_interval());
    info!("Verification sweep started");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");
    sweep.abort();

    Ok(())
}

async fn connect_mongo(args: &Args) -> anyhow::Result<MongoStore> {
    let client = MongoClient::new(&args.mongodb_uri, &args.mongodb_db).await?;
    Ok(MongoStore::new(&client).await?)
}
