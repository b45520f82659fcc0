//! Configuration types.
//!
//! Everything is read from `ORDER_DESK_*` environment variables. A value
//! that fails to parse is logged and replaced by its default.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::error::ConfigError;
use crate::pipeline::types::PriorityTier;

/// Response windows per priority tier, in hours.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlaPolicy {
    pub critical_hours: u32,
    pub oem_hours: u32,
    pub normal_hours: u32,
    pub low_hours: u32,
    /// Ship-by window granted to an expedite request.
    pub expedite_window_hours: u32,
}

impl Default for SlaPolicy {
    fn default() -> Self {
        Self {
            critical_hours: 2,
            oem_hours: 4,
            normal_hours: 12,
            low_hours: 24,
            expedite_window_hours: 24,
        }
    }
}

impl SlaPolicy {
    pub fn hours_for(&self, tier: PriorityTier) -> u32 {
        match tier {
            PriorityTier::Critical => self.critical_hours,
            PriorityTier::Oem => self.oem_hours,
            PriorityTier::Normal => self.normal_hours,
            PriorityTier::Low => self.low_hours,
        }
    }

    /// Windows must be non-zero and must not shrink as priority drops.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let tiers = [
            ("critical_hours", self.critical_hours),
            ("oem_hours", self.oem_hours),
            ("normal_hours", self.normal_hours),
            ("low_hours", self.low_hours),
            ("expedite_window_hours", self.expedite_window_hours),
        ];
        if let Some((key, _)) = tiers.iter().find(|(_, h)| *h == 0) {
            return Err(ConfigError::InvalidValue {
                key: (*key).to_string(),
                message: "must be greater than zero".into(),
            });
        }
        for pair in tiers[..4].windows(2) {
            if pair[0].1 > pair[1].1 {
                return Err(ConfigError::InvalidValue {
                    key: pair[1].0.to_string(),
                    message: format!("{} is shorter than {} ({})", pair[1].1, pair[0].0, pair[0].1),
                });
            }
        }
        Ok(())
    }
}

/// Full desk configuration.
#[derive(Debug, Clone)]
pub struct DeskConfig {
    pub port: u16,
    pub sla: SlaPolicy,
    /// Promised ship-by for non-expedited orders, counted from confirmation.
    pub lead_time_days: u32,
    pub oem_domains: Vec<String>,
    pub supplier_domains: Vec<String>,
    /// Customer domains the desk already deals with (OEM domains are added).
    pub known_domains: Vec<String>,
    pub scan_interval: Duration,
    /// Directory for the daily-rolling log file. Console only when unset.
    pub log_dir: Option<PathBuf>,
}

impl Default for DeskConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            sla: SlaPolicy::default(),
            lead_time_days: 7,
            oem_domains: Vec::new(),
            supplier_domains: Vec::new(),
            known_domains: Vec::new(),
            scan_interval: Duration::from_secs(60),
            log_dir: None,
        }
    }
}

impl DeskConfig {
    /// Build config from environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from any key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let sla = SlaPolicy {
            critical_hours: parse_or(&lookup, "ORDER_DESK_SLA_CRITICAL_HOURS", defaults.sla.critical_hours),
            oem_hours: parse_or(&lookup, "ORDER_DESK_SLA_OEM_HOURS", defaults.sla.oem_hours),
            normal_hours: parse_or(&lookup, "ORDER_DESK_SLA_NORMAL_HOURS", defaults.sla.normal_hours),
            low_hours: parse_or(&lookup, "ORDER_DESK_SLA_LOW_HOURS", defaults.sla.low_hours),
            expedite_window_hours: parse_or(
                &lookup,
                "ORDER_DESK_EXPEDITE_WINDOW_HOURS",
                defaults.sla.expedite_window_hours,
            ),
        };
        let sla = match sla.validate() {
            Ok(()) => sla,
            Err(e) => {
                warn!(error = %e, "Invalid SLA policy, using defaults");
                SlaPolicy::default()
            }
        };

        let lead_time_days = match parse_or(&lookup, "ORDER_DESK_LEAD_TIME_DAYS", defaults.lead_time_days) {
            0 => {
                warn!("ORDER_DESK_LEAD_TIME_DAYS must be positive, using default");
                defaults.lead_time_days
            }
            days => days,
        };

        let scan_secs: u64 = match parse_or(&lookup, "ORDER_DESK_SCAN_INTERVAL_SECS", 60) {
            0 => {
                warn!("ORDER_DESK_SCAN_INTERVAL_SECS must be positive, using default");
                60
            }
            secs => secs,
        };

        let oem_domains = domain_list(&lookup, "ORDER_DESK_OEM_DOMAINS");
        let mut known_domains = domain_list(&lookup, "ORDER_DESK_KNOWN_DOMAINS");
        for domain in &oem_domains {
            if !known_domains.contains(domain) {
                known_domains.push(domain.clone());
            }
        }

        Self {
            port: parse_or(&lookup, "ORDER_DESK_PORT", defaults.port),
            sla,
            lead_time_days,
            oem_domains,
            supplier_domains: domain_list(&lookup, "ORDER_DESK_SUPPLIER_DOMAINS"),
            known_domains,
            scan_interval: Duration::from_secs(scan_secs),
            log_dir: lookup("ORDER_DESK_LOG_DIR")
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from),
        }
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: FromStr + Copy,
{
    match lookup(key) {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(key, value = %raw, "Invalid configuration value, using default");
            default
        }),
    }
}

/// Comma-separated, lowercased, blanks dropped.
fn domain_list(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Vec<String> {
    lookup(key)
        .unwrap_or_default()
        .split(',')
        .map(|s| s.trim().trim_start_matches('@').to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}
