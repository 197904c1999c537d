use std::collections::BTreeMap;
use shared::protocol::{NONE_FIELD, RECORD_INSTANCE, RECORD_NODE, RECORD_SERVICE};
use shared::types::{ChildService, InstanceRecord, InstanceState, ServiceRecord, ServiceType};

/// Host address -> services, in discovery order
pub type MachineMappings = BTreeMap<String, Vec<ServiceRecord>>;

fn optional(field: &str) -> Option<String> {
    (field != NONE_FIELD && !field.is_empty()).then(|| field.to_string())
}

/// Extract the host part of a service URI such as
/// `http://10.1.1.1:8773/services/Eucalyptus`.
pub fn uri_host(uri: &str) -> Option<&str> {
    let rest = uri.split_once("://").map_or(uri, |(_, rest)| rest);
    let authority = rest.split('/').next()?;
    let authority = authority.rsplit_once('@').map_or(authority, |(_, a)| a);

    let host = if let Some(bracketed) = authority.strip_prefix('[') {
        bracketed.split(']').next()?
    } else {
        authority.split(':').next()?
    };

    (!host.is_empty()).then_some(host)
}

/// Parse `SERVICE <type> <partition> <name> <state> [uri]` records.
///
/// Services without a URI are attributed to `default_host`. Types outside
/// the known roles become child services of a user-api on the same host.
pub fn parse_services(output: &str, default_host: &str) -> MachineMappings {
    let mut mappings = MachineMappings::new();
    let mut orphans: Vec<(String, ChildService)> = Vec::new();

    for line in output.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.first() != Some(&RECORD_SERVICE) || fields.len() < 5 {
            continue;
        }

        let (kind, partition, name, state) = (fields[1], fields[2], fields[3], fields[4]);
        let uri = fields.get(5).and_then(|u| optional(u));
        let host = uri
            .as_deref()
            .and_then(uri_host)
            .unwrap_or(default_host)
            .to_string();

        match ServiceType::from_wire(kind) {
            Some(service_type) => {
                mappings.entry(host).or_default().push(ServiceRecord {
                    service_type,
                    name: name.to_string(),
                    partition: optional(partition),
                    state: state.to_string(),
                    uri,
                    child_services: Vec::new(),
                    instances: Vec::new(),
                });
            }
            None => orphans.push((host, ChildService {
                kind: kind.to_string(),
                name: name.to_string(),
                state: state.to_string(),
            })),
        }
    }

    for (host, child) in orphans {
        let parent = mappings
            .get_mut(&host)
            .and_then(|services| services.iter_mut().find(|s| s.service_type == ServiceType::UserApi));

        match parent {
            Some(parent) => parent.child_services.push(child),
            None => tracing::debug!("Dropping {} service {} on {}: no user-api on host", child.kind, child.name, host),
        }
    }

    mappings
}

/// Merge `NODE <partition> <address> <state>` records, each followed by its
/// `INSTANCE <id> <state> <type> <root-device-type>` records, into `mappings`.
pub fn merge_nodes(mappings: &mut MachineMappings, output: &str) {
    let mut current: Option<String> = None;

    for line in output.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        match fields.first().copied() {
            Some(tag) if tag == RECORD_NODE && fields.len() >= 3 => {
                let (partition, address) = (fields[1], fields[2]);
                let state = fields.get(3).copied().unwrap_or_default();
                let services = mappings.entry(address.to_string()).or_default();

                let exists = services.iter().any(|s| s.service_type == ServiceType::NodeController);
                if !exists {
                    let mut service = ServiceRecord::new(ServiceType::NodeController, address)
                        .with_state(state);
                    service.partition = optional(partition);
                    services.push(service);
                }
                current = Some(address.to_string());
            }
            Some(tag) if tag == RECORD_INSTANCE && fields.len() >= 2 => {
                let Some(address) = &current else {
                    tracing::debug!("Instance record before any node record: {}", line.trim());
                    continue;
                };
                let instance = InstanceRecord {
                    id: fields[1].to_string(),
                    state: InstanceState::parse(fields.get(2).copied().unwrap_or_default()),
                    instance_type: fields.get(3).copied().unwrap_or(NONE_FIELD).to_string(),
                    root_device_type: fields.get(4).copied().unwrap_or(NONE_FIELD).to_string(),
                };
                if let Some(service) = mappings
                    .get_mut(address)
                    .and_then(|services| services.iter_mut().find(|s| s.service_type == ServiceType::NodeController))
                {
                    service.instances.push(instance);
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SERVICES: &str = "\
SERVICE\teucalyptus\t-\teucalyptus\tENABLED\thttp://10.1.1.1:8773/services/Eucalyptus
SERVICE\tuser-api\t-\tufs-1\tENABLED\thttp://10.1.1.1:8773/services/User-API
SERVICE\tcompute\t-\tcompute-1\tENABLED\thttp://10.1.1.1:8773/services/compute
SERVICE\tcluster\tone\tone-cc-1\tENABLED\thttp://10.1.1.2:8774/axis2/services/EucalyptusCC
SERVICE\tstorage\tone\tone-sc-1\tENABLED\thttp://10.1.1.2:8773/services/Storage
SERVICE\twalrusbackend\t-\twalrus-1\tENABLED\thttp://10.1.1.3:8773/services/Walrus
SERVICE\timaging\t-\timaging-1\tENABLED\thttp://10.1.1.9:8773/services/Imaging

garbage line
";

    const NODES: &str = "\
NODE\tone\t10.1.1.4\tENABLED
INSTANCE\ti-1234abcd\trunning\tm1.small\tebs
INSTANCE\ti-5678abcd\tpending\tc1.medium\tinstance-store
NODE\tone\t10.1.1.5\tENABLED
";

    #[test]
    fn test_uri_host() {
        assert_eq!(uri_host("http://10.1.1.1:8773/services/Eucalyptus"), Some("10.1.1.1"));
        assert_eq!(uri_host("https://clc.example.com/services"), Some("clc.example.com"));
        assert_eq!(uri_host("http://[fd00::1]:8773/"), Some("fd00::1"));
        assert_eq!(uri_host("10.1.1.7"), Some("10.1.1.7"));
        assert_eq!(uri_host("http://"), None);
    }

    #[test]
    fn test_parse_services_groups_by_host() {
        let mappings = parse_services(SERVICES, "10.1.1.1");

        let keys: Vec<&str> = mappings.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["10.1.1.1", "10.1.1.2", "10.1.1.3"]);

        let clc = &mappings["10.1.1.1"];
        assert_eq!(clc.len(), 2);
        assert_eq!(clc[0].service_type, ServiceType::CloudController);
        assert_eq!(clc[0].partition, None);

        let ufs = &clc[1];
        assert_eq!(ufs.service_type, ServiceType::UserApi);
        assert_eq!(ufs.child_services.len(), 1);
        assert_eq!(ufs.child_services[0].kind, "compute");

        let cluster = &mappings["10.1.1.2"];
        assert_eq!(cluster[0].partition.as_deref(), Some("one"));
        assert_eq!(cluster[1].service_type, ServiceType::StorageController);
    }

    #[test]
    fn test_service_without_uri_uses_default_host() {
        let mappings = parse_services("SERVICE cluster two two-cc ENABLED\n", "10.9.9.9");
        assert_eq!(mappings["10.9.9.9"][0].service_type, ServiceType::ClusterController);
        assert_eq!(mappings["10.9.9.9"][0].uri, None);
    }

    #[test]
    fn test_merge_nodes_attaches_instances() {
        let mut mappings = parse_services(SERVICES, "10.1.1.1");
        merge_nodes(&mut mappings, NODES);

        let nc = &mappings["10.1.1.4"][0];
        assert_eq!(nc.service_type, ServiceType::NodeController);
        assert_eq!(nc.partition.as_deref(), Some("one"));
        assert_eq!(nc.instances.len(), 2);
        assert_eq!(nc.instances[0].id, "i-1234abcd");
        assert_eq!(nc.instances[1].state, InstanceState::Pending);
        assert_eq!(nc.instances[1].root_device_type, "instance-store");

        assert!(mappings["10.1.1.5"][0].instances.is_empty());
    }

    #[test]
    fn test_merge_nodes_reuses_listed_node_service() {
        let mut mappings = parse_services(
            "SERVICE node one nc-4 ENABLED http://10.1.1.4:8775/axis2/services/EucalyptusNC\n",
            "10.1.1.1",
        );
        merge_nodes(&mut mappings, NODES);

        let services = &mappings["10.1.1.4"];
        assert_eq!(services.len(), 1);
        assert_eq!(services[0].name, "nc-4");
        assert_eq!(services[0].instances.len(), 2);
    }

    #[test]
    fn test_orphan_instance_ignored() {
        let mut mappings = MachineMappings::new();
        merge_nodes(&mut mappings, "INSTANCE i-1 running m1.small ebs\n");
        assert!(mappings.is_empty());
    }
}
