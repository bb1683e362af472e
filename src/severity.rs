use serde::{Deserialize, Serialize};
use strum::Display;

/// Severity scale shared by findings, verdicts, and remediation gating.
///
/// Ordering is ascending so `max()` picks the worst finding.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Numeric weight used when aggregating findings into a single score.
    pub fn weight(self) -> u32 {
        match self {
            Self::Critical => 100,
            Self::High => 75,
            Self::Medium => 50,
            Self::Low => 25,
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "critical" => Some(Self::Critical),
            "high" => Some(Self::High),
            "medium" => Some(Self::Medium),
            "low" => Some(Self::Low),
            _ => None,
        }
    }
}

/// Attack taxonomy the adjudicator classifies a run into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AttackType {
    Ransomware,
    DataExfiltration,
    ContainerEscape,
    PrivilegeEscalation,
    UnauthorizedAccess,
    CredentialTheft,
    Cryptomining,
    LateralMovement,
    SuspiciousProcess,
    ConfigurationChange,
}

impl AttackType {
    pub const ALL: [Self; 10] = [
        Self::Ransomware,
        Self::DataExfiltration,
        Self::ContainerEscape,
        Self::PrivilegeEscalation,
        Self::UnauthorizedAccess,
        Self::CredentialTheft,
        Self::Cryptomining,
        Self::LateralMovement,
        Self::SuspiciousProcess,
        Self::ConfigurationChange,
    ];

    /// Baseline severity assigned when no finding outweighs it.
    pub fn default_severity(self) -> Severity {
        match self {
            Self::Ransomware | Self::DataExfiltration | Self::ContainerEscape => Severity::Critical,
            Self::PrivilegeEscalation | Self::UnauthorizedAccess | Self::CredentialTheft => {
                Severity::High
            }
            Self::Cryptomining | Self::LateralMovement | Self::SuspiciousProcess => {
                Severity::Medium
            }
            Self::ConfigurationChange => Severity::Low,
        }
    }

    /// Keywords matched against signal kinds and descriptions during
    /// classification. The first attack type (in `ALL` order) with a hit
    /// wins, so more severe types are listed first.
    pub fn keywords(self) -> &'static [&'static str] {
        match self {
            Self::Ransomware => &["ransom", "encrypt", "mass_file", "shadow copy"],
            Self::DataExfiltration => &["exfil", "egress", "data transfer", "upload spike"],
            Self::ContainerEscape => &["container escape", "privileged container", "host mount"],
            Self::PrivilegeEscalation => &["privilege", "sudo", "setuid", "escalat"],
            Self::UnauthorizedAccess => &["unauthorized", "brute force", "failed login"],
            Self::CredentialTheft => &["credential", "mimikatz", "token theft", "secret dump"],
            Self::Cryptomining => &["mining", "miner", "xmrig", "stratum"],
            Self::LateralMovement => &["lateral", "pivot", "smb spread", "internal scan"],
            Self::SuspiciousProcess => &["suspicious process", "reverse shell", "nc -e", "bash -i"],
            Self::ConfigurationChange => &["config", "configuration", "policy change"],
        }
    }

    /// Classify free text by keyword hit, worst matching type first.
    /// Falls back to `SuspiciousProcess` when nothing matches.
    pub fn classify<'a>(texts: impl Iterator<Item = &'a str>) -> Self {
        let haystack = texts
            .map(str::to_ascii_lowercase)
            .collect::<Vec<_>>()
            .join(" ");
        for attack in Self::ALL {
            if attack.keywords().iter().any(|kw| haystack.contains(kw)) {
                return attack;
            }
        }
        Self::SuspiciousProcess
    }
}
