//! Probe command - ask a port whether MongoDB is serving it.

use anyhow::Result;
use mongorun_core::adapters::prober::{READINESS_CONNECT_TIMEOUT, READINESS_READ_TIMEOUT};
use mongorun_core::{ConfigStore, PortProber, ProbeOutcome, WireProber};
use serde::Serialize;

#[derive(Serialize)]
struct ProbeReport<'a> {
    host: &'a str,
    port: u16,
    #[serde(flatten)]
    outcome: &'a ProbeOutcome,
}

pub async fn run(store: &ConfigStore, host: Option<String>, port: Option<u16>, json: bool) -> Result<()> {
    let config = super::load_config(store).await?;
    let host = host.unwrap_or(config.host);
    let port = port.unwrap_or(config.port);

    let probe_host = host.clone();
    let outcome = tokio::task::spawn_blocking(move || {
        WireProber::new().probe(
            &probe_host,
            port,
            READINESS_CONNECT_TIMEOUT,
            READINESS_READ_TIMEOUT,
        )
    })
    .await?;

    if json {
        let report = ProbeReport {
            host: &host,
            port,
            outcome: &outcome,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("{}:{} {}", host, port, outcome);
    Ok(())
}
