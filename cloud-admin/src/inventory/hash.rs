use serde::Serialize;
use sha2::{Sha256, Digest};
use shared::types::{HostRecord, ServiceRecord};

/// Stable view of a host. `discovered_at` changes on every population but
/// does not represent a topology change, so it is left out.
#[derive(Serialize)]
struct HashView<'a> {
    address: &'a str,
    services: &'a [ServiceRecord],
}

/// SHA-256 over the stable fields of every host.
/// Hosts are sorted by address so input order does not matter.
pub fn compute_hash<'a>(hosts: impl IntoIterator<Item = &'a HostRecord>) -> String {
    let mut views: Vec<HashView<'_>> = hosts
        .into_iter()
        .map(|h| HashView {
            address: &h.address,
            services: &h.services,
        })
        .collect();
    views.sort_by(|a, b| a.address.cmp(b.address));

    let json = serde_json::to_string(&views)
        .expect("Failed to serialize hosts for hashing");

    let hash = Sha256::digest(json.as_bytes());
    hex::encode(hash)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use shared::types::ServiceType;

    fn test_host(address: &str) -> HostRecord {
        HostRecord::new(address, vec![
            ServiceRecord::new(ServiceType::NodeController, "nc").with_partition("one"),
        ])
    }

    #[test]
    fn test_hash_deterministic() {
        let host1 = test_host("10.0.0.1");
        let host2 = test_host("10.0.0.2");

        let hash1 = compute_hash([&host1, &host2]);
        let hash2 = compute_hash([&host2, &host1]);

        assert_eq!(hash1, hash2, "Hash should be same regardless of input order");
    }

    #[test]
    fn test_hash_changes_on_modification() {
        let host1 = test_host("10.0.0.1");
        let mut host2 = test_host("10.0.0.1");

        let hash1 = compute_hash([&host1]);

        host2.services[0].partition = Some("two".to_string());
        let hash2 = compute_hash([&host2]);

        assert_ne!(hash1, hash2, "Hash should change when a service moves partition");
    }

    #[test]
    fn test_hash_stable_across_timestamp_changes() {
        let host1 = test_host("10.0.0.1");
        let mut host2 = test_host("10.0.0.1");
        host2.discovered_at = Utc::now() + chrono::Duration::seconds(60);

        assert_eq!(compute_hash([&host1]), compute_hash([&host2]));
    }
}
