//! Threat scenario catalog.
//!
//! A scenario is a named bundle of simulated threat signals that feeds the
//! Perception stage when scanners run in simulation mode, plus the expected
//! outcome used by the targeted-test surface. The catalog is static; unknown
//! names fail at startup with the list of valid ones.

use serde::{Deserialize, Serialize};

use crate::error::ScenarioError;
use crate::severity::{AttackType, Severity};

/// One piece of simulated telemetry, attributed to the sensor that would
/// have produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreatSignal {
    /// Sensor name: `falco`, `osquery`, `trivy`, `nmap`, `metrics`.
    pub source: String,
    pub kind: String,
    pub description: String,
    pub affected_systems: Vec<String>,
    pub indicators: Vec<String>,
}

impl ThreatSignal {
    fn new(
        source: &str,
        kind: &str,
        description: &str,
        affected: &[&str],
        indicators: &[&str],
    ) -> Self {
        Self {
            source: source.to_string(),
            kind: kind.to_string(),
            description: description.to_string(),
            affected_systems: affected.iter().map(ToString::to_string).collect(),
            indicators: indicators.iter().map(ToString::to_string).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreatScenario {
    pub name: String,
    pub description: String,
    pub signals: Vec<ThreatSignal>,
    pub expected_severity: Severity,
    pub expected_attack_type: AttackType,
    pub expected_actions: Vec<String>,
}

impl ThreatScenario {
    /// Systems named by any signal, deduplicated in first-seen order.
    pub fn affected_systems(&self) -> Vec<String> {
        let mut systems = Vec::new();
        for signal in &self.signals {
            for system in &signal.affected_systems {
                if !systems.contains(system) {
                    systems.push(system.clone());
                }
            }
        }
        systems
    }

    /// Signals attributed to one sensor.
    pub fn signals_from(&self, source: &str) -> Vec<&ThreatSignal> {
        self.signals.iter().filter(|s| s.source == source).collect()
    }
}

pub const SCENARIO_NAMES: [&str; 5] = [
    "ransomware",
    "data_exfiltration",
    "container_escape",
    "credential_theft",
    "cryptomining",
];

pub fn all_scenarios() -> Vec<ThreatScenario> {
    SCENARIO_NAMES
        .iter()
        .map(|name| lookup(name).expect("builtin scenario"))
        .collect()
}

pub fn lookup(name: &str) -> Result<ThreatScenario, ScenarioError> {
    match name.trim().to_ascii_lowercase().as_str() {
        "ransomware" => Ok(ransomware()),
        "data_exfiltration" => Ok(data_exfiltration()),
        "container_escape" => Ok(container_escape()),
        "credential_theft" => Ok(credential_theft()),
        "cryptomining" => Ok(cryptomining()),
        other => Err(ScenarioError::Unknown {
            name: other.to_string(),
            available: SCENARIO_NAMES.join(", "),
        }),
    }
}

fn ransomware() -> ThreatScenario {
    ThreatScenario {
        name: "ransomware".into(),
        description: "Mass file encryption burst with shadow copy deletion".into(),
        signals: vec![
            ThreatSignal::new(
                "falco",
                "mass_file_encryption",
                "Process encrypted 4,812 files under /srv/share in 90 seconds",
                &["file-01"],
                &["cryptolocker.bin", ".locked extension"],
            ),
            ThreatSignal::new(
                "falco",
                "shadow_copy_deletion",
                "vssadmin delete shadows /all observed on file-01",
                &["file-01"],
                &["vssadmin", "delete shadows"],
            ),
            ThreatSignal::new(
                "metrics",
                "disk_io_spike",
                "Sustained write throughput 40x baseline on file-01",
                &["file-01"],
                &["disk_write_bytes"],
            ),
        ],
        expected_severity: Severity::Critical,
        expected_attack_type: AttackType::Ransomware,
        expected_actions: vec![
            "isolate_system".into(),
            "disable_credentials".into(),
            "rollback_changes".into(),
        ],
    }
}

fn data_exfiltration() -> ThreatScenario {
    ThreatScenario {
        name: "data_exfiltration".into(),
        description: "Large outbound data transfer to an unrecognized endpoint".into(),
        signals: vec![
            ThreatSignal::new(
                "falco",
                "egress_spike",
                "18 GiB upload spike from db-01 to 185.220.101.4:443 over 20 minutes",
                &["db-01"],
                &["185.220.101.4", "rclone"],
            ),
            ThreatSignal::new(
                "osquery",
                "staging_archive",
                "tar archive of /var/lib/postgresql written to /tmp by postgres user",
                &["db-01"],
                &["/tmp/.cache.tar.gz"],
            ),
        ],
        expected_severity: Severity::Critical,
        expected_attack_type: AttackType::DataExfiltration,
        expected_actions: vec![
            "block_network_traffic".into(),
            "disable_credentials".into(),
        ],
    }
}

fn container_escape() -> ThreatScenario {
    ThreatScenario {
        name: "container_escape".into(),
        description: "Privileged container mounting the host filesystem".into(),
        signals: vec![
            ThreatSignal::new(
                "falco",
                "container_escape_attempt",
                "Privileged container escape via host mount of / detected on node-03",
                &["node-03"],
                &["privileged container", "host mount", "nsenter"],
            ),
            ThreatSignal::new(
                "osquery",
                "suspicious_process",
                "nsenter --target 1 spawned inside container web-frontend",
                &["node-03"],
                &["nsenter --target 1"],
            ),
        ],
        expected_severity: Severity::Critical,
        expected_attack_type: AttackType::ContainerEscape,
        expected_actions: vec!["isolate_system".into(), "terminate_process".into()],
    }
}

fn credential_theft() -> ThreatScenario {
    ThreatScenario {
        name: "credential_theft".into(),
        description: "Credential dumping followed by reuse from a new location".into(),
        signals: vec![
            ThreatSignal::new(
                "falco",
                "credential_dump",
                "Secret dump of /etc/shadow and cloud credential files on bastion-01",
                &["bastion-01"],
                &["/etc/shadow", "credentials.json"],
            ),
            ThreatSignal::new(
                "osquery",
                "token_theft",
                "Service account token read by non-service process on bastion-01",
                &["bastion-01", "auth-01"],
                &["token theft"],
            ),
        ],
        expected_severity: Severity::High,
        expected_attack_type: AttackType::CredentialTheft,
        expected_actions: vec![
            "rotate_credentials".into(),
            "disable_credentials".into(),
        ],
    }
}

fn cryptomining() -> ThreatScenario {
    ThreatScenario {
        name: "cryptomining".into(),
        description: "Unauthorized miner pinning CPU on a worker node".into(),
        signals: vec![
            ThreatSignal::new(
                "falco",
                "miner_process",
                "xmrig process connected to stratum+tcp pool from worker-07",
                &["worker-07"],
                &["xmrig", "stratum+tcp://pool.minexmr.com"],
            ),
            ThreatSignal::new(
                "metrics",
                "cpu_saturation",
                "CPU pinned at 98% for 45 minutes on worker-07",
                &["worker-07"],
                &["cpu_percent"],
            ),
        ],
        expected_severity: Severity::Medium,
        expected_attack_type: AttackType::Cryptomining,
        expected_actions: vec![
            "terminate_process".into(),
            "block_network_traffic".into(),
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_five_names_resolve() {
        for name in SCENARIO_NAMES {
            let scenario = lookup(name).unwrap();
            assert_eq!(scenario.name, name);
            assert!(!scenario.signals.is_empty(), "{name} has no signals");
            assert!(!scenario.expected_actions.is_empty());
        }
        assert_eq!(all_scenarios().len(), 5);
    }

    #[test]
    fn lookup_is_case_and_whitespace_tolerant() {
        assert_eq!(lookup(" Ransomware ").unwrap().name, "ransomware");
    }

    #[test]
    fn unknown_name_lists_available() {
        let err = lookup("wormhole").unwrap_err();
        let message = err.to_string();
        assert!(message.contains("wormhole"));
        assert!(message.contains("ransomware"));
        assert!(message.contains("cryptomining"));
    }

    #[test]
    fn affected_systems_deduplicate() {
        let scenario = lookup("credential_theft").unwrap();
        let systems = scenario.affected_systems();
        assert_eq!(systems, vec!["bastion-01".to_string(), "auth-01".to_string()]);
    }

    #[test]
    fn signals_filter_by_source() {
        let scenario = lookup("cryptomining").unwrap();
        assert_eq!(scenario.signals_from("falco").len(), 1);
        assert_eq!(scenario.signals_from("metrics").len(), 1);
        assert!(scenario.signals_from("trivy").is_empty());
    }

    #[test]
    fn expected_classification_matches_signal_text() {
        for scenario in all_scenarios() {
            let classified = AttackType::classify(
                scenario
                    .signals
                    .iter()
                    .flat_map(|s| [s.kind.as_str(), s.description.as_str()]),
            );
            assert_eq!(
                classified, scenario.expected_attack_type,
                "classifier disagrees for {}",
                scenario.name
            );
        }
    }
}
