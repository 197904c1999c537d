use std::sync::Arc;
use anyhow::{Context, Result};
use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use shared::types::{HostRecord, InstanceRecord, ServiceRecord, ServiceType};
use crate::api;
use crate::inventory::{HostQuery, Inventory, InventoryHandle};
use crate::probe::{self, HostMetrics, HostProbe, SystemInfo};
use crate::render;
use crate::OutputFormat;

#[derive(Serialize)]
struct SummaryRow<'a> {
    host: &'a str,
    #[serde(flatten)]
    system: &'a SystemInfo,
    zone: Option<&'a str>,
    service_codes: Vec<&'static str>,
}

#[derive(Serialize)]
struct HostView<'a> {
    #[serde(flatten)]
    host: &'a HostRecord,
    metrics: &'a HostMetrics,
}

#[derive(Serialize)]
struct ServiceView<'a> {
    host: &'a str,
    #[serde(flatten)]
    service: &'a ServiceRecord,
}

#[derive(Serialize)]
struct InstanceView<'a> {
    node: &'a str,
    partition: Option<&'a str>,
    #[serde(flatten)]
    instance: &'a InstanceRecord,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn snapshot(inventory: &InventoryHandle) -> Result<Arc<Inventory>> {
    inventory.inventory().await.context("Failed to discover hosts")
}

pub async fn summary(
    inventory: &InventoryHandle,
    host_probe: &dyn HostProbe,
    concurrency: usize,
    format: OutputFormat,
) -> Result<()> {
    let (snapshot, controller) = inventory
        .inventory_with_controller()
        .await
        .context("Failed to discover hosts")?;

    let targets = snapshot.hosts().map(|h| snapshot.target(h)).collect();
    let infos = probe::collect_system_info(host_probe, targets, concurrency).await;

    match format {
        OutputFormat::Table => {
            let codes = controller.service_codes();
            println!(
                "Cloud controller: {} ({})",
                controller.address,
                if codes.is_empty() { "-".to_string() } else { codes.join(" ") }
            );
            println!("{}", render::summary_table(snapshot.hosts(), &infos));
        }
        OutputFormat::Json => {
            let unknown = SystemInfo::default();
            let rows: Vec<SummaryRow<'_>> = snapshot
                .hosts()
                .map(|h| SummaryRow {
                    host: &h.address,
                    system: infos.get(&h.address).unwrap_or(&unknown),
                    zone: h.zone(),
                    service_codes: h.service_codes(),
                })
                .collect();
            print_json(&rows)?;
        }
    }
    Ok(())
}

pub async fn hosts(
    inventory: &InventoryHandle,
    host_probe: &dyn HostProbe,
    query: &HostQuery,
    columns: usize,
    concurrency: usize,
    format: OutputFormat,
) -> Result<()> {
    let snapshot = snapshot(inventory).await?;
    let hosts = snapshot.select(query)?;
    if hosts.is_empty() {
        tracing::info!("No hosts matched {:?}", query);
    }

    let targets = hosts.iter().map(|h| snapshot.target(h)).collect();
    let metrics = probe::collect_metrics(host_probe, targets, concurrency).await;

    match format {
        OutputFormat::Table => println!("{}", render::hosts_table(hosts, &metrics, columns)),
        OutputFormat::Json => {
            let unavailable = HostMetrics::default();
            let views: Vec<HostView<'_>> = hosts
                .into_iter()
                .map(|host| HostView {
                    host,
                    metrics: metrics.get(&host.address).unwrap_or(&unavailable),
                })
                .collect();
            print_json(&views)?;
        }
    }
    Ok(())
}

pub async fn services(inventory: &InventoryHandle, format: OutputFormat) -> Result<()> {
    let snapshot = snapshot(inventory).await?;

    match format {
        OutputFormat::Table => println!("{}", render::services_table(snapshot.hosts())),
        OutputFormat::Json => {
            let views: Vec<ServiceView<'_>> = snapshot
                .hosts()
                .flat_map(|h| h.services.iter().map(move |service| ServiceView { host: &h.address, service }))
                .collect();
            print_json(&views)?;
        }
    }
    Ok(())
}

pub async fn instances(
    inventory: &InventoryHandle,
    partition: Option<&str>,
    format: OutputFormat,
) -> Result<()> {
    let snapshot = snapshot(inventory).await?;
    let nodes = match partition {
        Some(p) => snapshot.node_controllers_in(p),
        None => snapshot.by_service_type(ServiceType::NodeController),
    };

    match format {
        OutputFormat::Table => println!("{}", render::instances_table(nodes)),
        OutputFormat::Json => {
            let views: Vec<InstanceView<'_>> = nodes
                .into_iter()
                .flat_map(|h| {
                    h.services_of(ServiceType::NodeController).flat_map(move |service| {
                        service.instances.iter().map(move |instance| InstanceView {
                            node: &h.address,
                            partition: service.partition.as_deref(),
                            instance,
                        })
                    })
                })
                .collect();
            print_json(&views)?;
        }
    }
    Ok(())
}

pub async fn serve(
    inventory: InventoryHandle,
    hash_rx: watch::Receiver<Option<String>>,
    listen: &str,
) -> Result<()> {
    let app = api::routes::router(api::routes::AppState { inventory, hash_rx });

    // Bind HTTP server
    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .with_context(|| format!("Failed to bind to {}", listen))?;

    tracing::info!("API listening on {}", listen);

    // Run server with graceful shutdown
    let cancel = CancellationToken::new();
    let server_cancel = cancel.clone();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async move { server_cancel.cancelled().await })
            .await
        {
            tracing::error!("Server error: {}", e);
        }
    });

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutdown signal received");
    cancel.cancel();
    let _ = server_handle.await;

    tracing::info!("Shutdown complete");
    Ok(())
}
