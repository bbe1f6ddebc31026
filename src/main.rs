//! `reportwire` binary: finalize or inspect runs recorded in a shared slot.

mod cli;

use std::{
    process::ExitCode,
    sync::{Arc, Mutex},
    time::Duration,
};

use clap::Parser;
use cli::{Cli, Command, Target};
use reportwire::{
    backend::{HttpApi, QueuedBackend},
    config::ReporterConfig,
    delivery::DeliveryClient,
    finalize::{Fallback, FinalizationGuard},
    lifecycle::{LifecycleCoordinator, LifecycleOptions, run_url},
    model::CallerStatus,
    slot::{FileRunSlot, RunSlot},
};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    // Applications embedding the library should install their own subscriber.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Command::Finalize(target) => finalize(&target),
        Command::Url(target) => url(&target),
    };
    match result {
        Ok(code) => code,
        Err(err) => {
            eprintln!("reportwire: {err}");
            ExitCode::from(2)
        }
    }
}

fn finalize(target: &Target) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let mut config = ReporterConfig::new(
        &target.endpoint,
        &target.project,
        target.api_key.clone().unwrap_or_default(),
    );
    config.verify_tls = !target.insecure;
    config.finalize.shared_slot = Some(target.slot.clone());
    let settings = config.validate()?;

    let api = HttpApi::new(&settings)?;
    let backend = QueuedBackend::builder(Arc::new(api.clone()))
        .settings(&settings)
        .spawn()?;
    let delivery = DeliveryClient::new(Arc::new(backend), settings.retry);
    let coordinator = LifecycleCoordinator::new(LifecycleOptions::from(&settings), delivery)
        .with_slot(Arc::new(FileRunSlot::new(&target.slot)));
    let guard = FinalizationGuard::new(Arc::new(Mutex::new(coordinator)), Arc::new(api))
        .delays(Duration::ZERO, Duration::ZERO);

    let status = target
        .status
        .as_deref()
        .map(|status| CallerStatus::from(status).to_item_status());
    let report = guard.finalize(status);
    let Some(run) = report.run_id else {
        println!("no run recorded in {}", target.slot.display());
        return Ok(ExitCode::SUCCESS);
    };
    if report.fallback == Fallback::Failed {
        eprintln!("run {run} could not be finished; the remote report may be incomplete");
        return Ok(ExitCode::FAILURE);
    }
    println!("finished run {run}");
    Ok(ExitCode::SUCCESS)
}

fn url(target: &Target) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let Some(run) = FileRunSlot::new(&target.slot).load()? else {
        println!("no run recorded in {}", target.slot.display());
        return Ok(ExitCode::FAILURE);
    };
    println!("{run}");
    println!("{}", run_url(&target.endpoint, &target.project, &run));
    Ok(ExitCode::SUCCESS)
}
