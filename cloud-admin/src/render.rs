//! Table rendering for inventory views

use std::collections::BTreeMap;
use comfy_table::{presets, Cell, Color, Table};
use shared::protocol::NONE_FIELD;
use shared::types::{HostRecord, InstanceRecord, ServiceRecord};
use crate::probe::{HostMetrics, SystemInfo};

const SUMMARY_HEADER: [&str; 6] = ["# HOST", "DISTRO", "VER", "ARCH", "ZONE", "SERVICE CODES"];
const SERVICE_HEADER: [&str; 5] = ["TYPE", "NAME", "STATE", "ZONE", "URI"];

const INSTANCE_ID_WIDTH: usize = 10;
const INSTANCE_STATE_WIDTH: usize = 15;
const INSTANCE_TYPE_WIDTH: usize = 13;
const INSTANCE_DEVICE_WIDTH: usize = 16;

/// One line per host: host, distro, version, arch, zone, service codes.
pub fn summary_line(host: &HostRecord, info: &SystemInfo) -> String {
    let codes = host.service_codes();
    let codes = if codes.is_empty() { NONE_FIELD.to_string() } else { codes.join(" ") };
    format!(
        "{} {} {} {} {} {}",
        host.address,
        info.distro,
        info.version,
        info.arch,
        host.zone().unwrap_or(NONE_FIELD),
        codes
    )
}

pub fn summary_table<'a>(
    hosts: impl IntoIterator<Item = &'a HostRecord>,
    infos: &BTreeMap<String, SystemInfo>,
) -> Table {
    let mut table = Table::new();
    table.load_preset(presets::NOTHING);
    table.set_header(SUMMARY_HEADER.to_vec());

    let unknown = SystemInfo::default();
    for host in hosts {
        let info = infos.get(&host.address).unwrap_or(&unknown);
        let line = summary_line(host, info);
        let fields: Vec<&str> = line.split_whitespace().collect();
        let (fixed, codes) = fields.split_at(fields.len().min(5));
        let mut row: Vec<String> = fixed.iter().map(|f| f.to_string()).collect();
        row.push(codes.join(" "));
        table.add_row(row);
    }

    table
}

fn state_color(state: &str) -> Color {
    match state.to_uppercase().as_str() {
        "ENABLED" => Color::Green,
        "DISABLED" | "STOPPED" | "NOTREADY" | "INITIALIZED" | "LOADED" => Color::Yellow,
        "BROKEN" => Color::Red,
        _ => Color::DarkGrey,
    }
}

/// Type, name, state, zone and URI for a service and each of its children
fn service_rows(service: &ServiceRecord) -> Vec<[String; 5]> {
    let zone = service.partition.clone().unwrap_or_else(|| NONE_FIELD.to_string());
    let mut rows = vec![[
        service.service_type.wire_name().to_string(),
        service.name.clone(),
        service.state.clone(),
        zone.clone(),
        service.uri.clone().unwrap_or_else(|| NONE_FIELD.to_string()),
    ]];
    for child in &service.child_services {
        rows.push([
            format!(" {}", child.kind),
            child.name.clone(),
            child.state.clone(),
            zone.clone(),
            NONE_FIELD.to_string(),
        ]);
    }
    rows
}

/// Every service in the inventory, children included
pub fn services_table<'a>(hosts: impl IntoIterator<Item = &'a HostRecord>) -> Table {
    let mut table = Table::new();
    table.set_header(SERVICE_HEADER.to_vec());

    for service in hosts.into_iter().flat_map(|h| h.services.iter()) {
        for [kind, name, state, zone, uri] in service_rows(service) {
            let color = state_color(&state);
            table.add_row(vec![
                Cell::new(kind),
                Cell::new(name),
                Cell::new(state).fg(color),
                Cell::new(zone),
                Cell::new(uri),
            ]);
        }
    }

    table
}

/// Fixed-width instance line shown under a node controller
pub fn instance_line(instance: &InstanceRecord) -> String {
    format!(
        "{:<id$}{:<st$}{:<ty$}{:<dev$}",
        instance.id,
        format!("({}),", instance.state),
        format!("{},", instance.instance_type),
        instance.root_device_type,
        id = INSTANCE_ID_WIDTH,
        st = INSTANCE_STATE_WIDTH,
        ty = INSTANCE_TYPE_WIDTH,
        dev = INSTANCE_DEVICE_WIDTH,
    )
    .trim()
    .to_string()
}

fn machine_block(host: &HostRecord, metrics: &HostMetrics) -> String {
    let mem = &metrics.memory;
    let mut lines = vec![
        host.address.clone(),
        String::new(),
        "Mem:".to_string(),
        format!(" Used: {} {:.2}%", mem.used, mem.percent_of_total(mem.used)),
        format!(" Free: {} {:.2}%", mem.free, mem.percent_of_total(mem.free)),
        format!(" Swap: {} {:.2}%", mem.swap_used, mem.percent_of_total(mem.swap_used)),
        "CPU:".to_string(),
    ];
    lines.extend(metrics.cpus.iter().map(|(cpu, used)| format!(" #{}: {:.1}%", cpu, used)));
    lines.join("\n")
}

fn services_block(host: &HostRecord, columns: usize) -> String {
    let columns = columns.clamp(1, SERVICE_HEADER.len());
    let mut inner = Table::new();
    inner.load_preset(presets::NOTHING);
    inner.set_header(SERVICE_HEADER[..columns].to_vec());
    for service in &host.services {
        for row in service_rows(service) {
            inner.add_row(row[..columns].to_vec());
        }
    }

    let mut block = inner.to_string();
    let instances: Vec<&InstanceRecord> = host.instances().collect();
    if !instances.is_empty() {
        block.push_str("\n\nINSTANCES\n");
        let lines: Vec<String> = instances.into_iter().map(instance_line).collect();
        block.push_str(&lines.join("\n"));
    }
    block
}

/// Machine column (address plus memory and CPU usage) beside its services
/// and, for node controllers, their instances.
pub fn hosts_table<'a>(
    hosts: impl IntoIterator<Item = &'a HostRecord>,
    metrics: &BTreeMap<String, HostMetrics>,
    columns: usize,
) -> Table {
    let mut table = Table::new();
    table.set_header(vec!["MACHINE", "SERVICES"]);

    let unavailable = HostMetrics::default();
    for host in hosts {
        let host_metrics = metrics.get(&host.address).unwrap_or(&unavailable);
        table.add_row(vec![
            Cell::new(machine_block(host, host_metrics)),
            Cell::new(services_block(host, columns)),
        ]);
    }

    table
}

/// One row per instance with the node and zone it runs in
pub fn instances_table<'a>(hosts: impl IntoIterator<Item = &'a HostRecord>) -> Table {
    let mut table = Table::new();
    table.set_header(vec!["INSTANCE", "STATE", "TYPE", "ROOT DEVICE", "NODE", "ZONE"]);

    for host in hosts {
        for service in host.services_of(shared::types::ServiceType::NodeController) {
            for instance in &service.instances {
                table.add_row(vec![
                    instance.id.clone(),
                    instance.state.to_string(),
                    instance.instance_type.clone(),
                    instance.root_device_type.clone(),
                    host.address.clone(),
                    service.partition.clone().unwrap_or_else(|| NONE_FIELD.to_string()),
                ]);
            }
        }
    }

    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::types::{ChildService, InstanceState, ServiceType};
    use crate::probe::MemoryStats;

    fn instance(id: &str) -> InstanceRecord {
        InstanceRecord {
            id: id.to_string(),
            state: InstanceState::Running,
            instance_type: "m1.small".to_string(),
            root_device_type: "ebs".to_string(),
        }
    }

    fn frontend() -> HostRecord {
        let mut ufs = ServiceRecord::new(ServiceType::UserApi, "ufs-1").with_state("ENABLED");
        ufs.child_services.push(ChildService {
            kind: "compute".to_string(),
            name: "compute-1".to_string(),
            state: "ENABLED".to_string(),
        });
        HostRecord::new("10.1.1.1", vec![
            ServiceRecord::new(ServiceType::CloudController, "eucalyptus").with_state("ENABLED"),
            ufs,
        ])
    }

    fn node() -> HostRecord {
        HostRecord::new("10.1.1.4", vec![
            ServiceRecord::new(ServiceType::NodeController, "nc-4")
                .with_partition("one")
                .with_state("ENABLED")
                .with_instance(instance("i-1234abcd")),
        ])
    }

    fn centos() -> SystemInfo {
        SystemInfo {
            distro: "centos".to_string(),
            version: "7".to_string(),
            arch: "x86_64".to_string(),
        }
    }

    #[test]
    fn test_summary_line_field_order() {
        assert_eq!(summary_line(&frontend(), &centos()), "10.1.1.1 centos 7 x86_64 - CLC UFS");
        assert_eq!(summary_line(&node(), &SystemInfo::default()), "10.1.1.4 - - - one NC");
    }

    #[test]
    fn test_summary_table_rows() {
        let hosts = vec![frontend(), node()];
        let infos = BTreeMap::from([("10.1.1.1".to_string(), centos())]);
        let rendered = summary_table(&hosts, &infos).to_string();

        assert!(rendered.contains("SERVICE CODES"));
        assert!(rendered.contains("CLC UFS"));
        assert!(rendered.contains("10.1.1.4"));
    }

    #[test]
    fn test_instance_line_widths() {
        assert_eq!(
            instance_line(&instance("i-1234abcd")),
            "i-1234abcd(running),     m1.small,    ebs"
        );
    }

    #[test]
    fn test_services_table_includes_children() {
        let hosts = vec![frontend()];
        let rendered = services_table(&hosts).to_string();

        assert!(rendered.contains("user-api"));
        assert!(rendered.contains("compute-1"));
    }

    #[test]
    fn test_machine_block_zero_memory() {
        let block = machine_block(&node(), &HostMetrics::default());
        assert!(block.contains(" Used: 0 0.00%"));
        assert!(block.contains("CPU:"));
    }

    #[test]
    fn test_hosts_table_shows_metrics_and_instances() {
        let hosts = vec![node()];
        let metrics = BTreeMap::from([(
            "10.1.1.4".to_string(),
            HostMetrics {
                memory: MemoryStats { total: 1000, free: 250, used: 750, swap_used: 0 },
                cpus: BTreeMap::from([(0, 50.0), (1, 5.0)]),
            },
        )]);
        let rendered = hosts_table(&hosts, &metrics, 4).to_string();

        assert!(rendered.contains("75.00%"));
        assert!(rendered.contains("#1: 5.0%"));
        assert!(rendered.contains("INSTANCES"));
        assert!(rendered.contains("i-1234abcd"));
        assert!(!rendered.contains("URI"), "column limit applies to the service block");
    }

    #[test]
    fn test_instances_table() {
        let hosts = vec![frontend(), node()];
        let rendered = instances_table(&hosts).to_string();

        assert!(rendered.contains("i-1234abcd"));
        assert!(rendered.contains("10.1.1.4"));
        assert!(!rendered.contains("10.1.1.1"));
    }
}
