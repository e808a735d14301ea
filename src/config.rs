//! Configuration for Curator
//!
//! CLI arguments and environment variable handling using clap.

use clap::Parser;
use chrono::Duration;

use crate::share::{heuristics, VerificationPolicy};
use crate::vca::AddressCodec;

/// Longest accepted age window (ten years)
pub const MAX_WINDOW_HOURS: i64 = 87_600;

/// Longest accepted behavior span (one year)
pub const MAX_SPAN_SECS: i64 = 31_536_000;

/// Longest accepted pause between sweeps (one week)
pub const MAX_SWEEP_INTERVAL_SECS: u64 = 604_800;

/// Curator - virtual contract addresses and verified share rewards
#[derive(Parser, Debug, Clone)]
#[command(name = "curator")]
#[command(about = "Virtual contract address registry and share verification sweeper")]
pub struct Args {
    /// Enable development mode (falls back to an in-memory store)
    #[arg(long, env = "DEV_MODE", default_value = "false")]
    pub dev_mode: bool,

    /// MongoDB connection URI
    #[arg(long, env = "MONGODB_URI", default_value = "mongodb://localhost:27017")]
    pub mongodb_uri: String,

    /// MongoDB database name
    #[arg(long, env = "MONGODB_DB", default_value = "curator")]
    pub mongodb_db: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, env = "LOG_JSON", default_value = "false")]
    pub log_json: bool,

    /// Namespace mixed into every derived address
    #[arg(long, env = "ADDRESS_NAMESPACE", default_value = "curator-vca-v1")]
    pub address_namespace: String,

    /// Nonces tried per slug before address allocation gives up
    #[arg(long, env = "ADDRESS_MAX_ATTEMPTS", default_value = "1024")]
    pub address_max_attempts: u32,

    /// Base URL share links point at
    /// (e.g., "https://curator.example")
    #[arg(long, env = "PUBLIC_BASE_URL", default_value = "http://localhost:4200")]
    pub public_base_url: String,

    /// Points credited per verified share
    #[arg(long, env = "SHARE_POINTS", default_value = "10")]
    pub share_points: u64,

    /// Seconds between verification sweeps
    #[arg(long, env = "SWEEP_INTERVAL_SECS", default_value = "300")]
    pub sweep_interval_secs: u64,

    /// Run one sweep and exit
    #[arg(long, env = "SWEEP_ONCE", default_value = "false")]
    pub sweep_once: bool,

    /// Verification policy
    #[command(flatten)]
    pub policy: PolicyArgs,
}

/// Verification heuristic thresholds
#[derive(Parser, Debug, Clone)]
pub struct PolicyArgs {
    /// Verify stale shares leniently instead of flagging them for review
    #[arg(long, env = "FALLBACK_ENABLED", default_value = "false")]
    pub fallback_enabled: bool,

    /// Share age in hours after which the fallback applies
    #[arg(long, env = "FALLBACK_AFTER_HOURS", default_value = "24")]
    pub fallback_after_hours: i64,

    /// Minimum share age in hours for the time-based signal
    #[arg(long, env = "TIME_BASED_MIN_AGE_HOURS", default_value = "6")]
    pub time_based_min_age_hours: i64,

    /// Minimum non-self visits for the behavior signal
    #[arg(long, env = "BEHAVIOR_MIN_VISITS", default_value = "3")]
    pub behavior_min_visits: usize,

    /// Minimum distinct visitors for the behavior signal
    #[arg(long, env = "BEHAVIOR_MIN_DISTINCT_VISITORS", default_value = "2")]
    pub behavior_min_distinct_visitors: usize,

    /// Minimum seconds between first and last visit for the behavior signal
    #[arg(long, env = "BEHAVIOR_MIN_SPAN_SECS", default_value = "60")]
    pub behavior_min_span_secs: i64,

    /// Highest tolerated share of self visits (0.0 - 1.0)
    #[arg(long, env = "BEHAVIOR_MAX_SELF_RATIO", default_value = "0.5")]
    pub behavior_max_self_ratio: f64,
}

impl Args {
    /// Address codec configured from the namespace and attempt bound
    pub fn address_codec(&self) -> AddressCodec {
        AddressCodec::new(self.address_namespace.clone(), self.address_max_attempts)
    }

    /// Policy from the configured thresholds, clamped into the accepted ranges
    pub fn verification_policy(&self) -> VerificationPolicy {
        let p = &self.policy;
        let hours = |h: i64| Duration::hours(h.clamp(0, MAX_WINDOW_HOURS));
        VerificationPolicy {
            time_based_min_age: hours(p.time_based_min_age_hours),
            fallback_after: hours(p.fallback_after_hours),
            fallback_enabled: p.fallback_enabled,
            behavior_min_visits: p.behavior_min_visits,
            behavior_min_distinct_visitors: p.behavior_min_distinct_visitors,
            behavior_min_span: Duration::seconds(p.behavior_min_span_secs.clamp(0, MAX_SPAN_SECS)),
            behavior_max_self_ratio: p.behavior_max_self_ratio.clamp(0.0, 1.0),
        }
    }

    pub fn sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.sweep_interval_secs.clamp(1, MAX_SWEEP_INTERVAL_SECS))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.address_namespace.trim().is_empty() {
            return Err("ADDRESS_NAMESPACE must not be empty".to_string());
        }
        if self.address_max_attempts == 0 {
            return Err("ADDRESS_MAX_ATTEMPTS must be at least 1".to_string());
        }
        if heuristics::url_host(&self.public_base_url).is_none() {
            return Err("PUBLIC_BASE_URL must be an http(s) URL".to_string());
        }
        if self.share_points == 0 {
            return Err("SHARE_POINTS must be positive".to_string());
        }
        if self.sweep_interval_secs == 0 || self.sweep_interval_secs > MAX_SWEEP_INTERVAL_SECS {
            return Err(format!(
                "SWEEP_INTERVAL_SECS must be between 1 and {}",
                MAX_SWEEP_INTERVAL_SECS
            ));
        }

        let p = &self.policy;
        if p.time_based_min_age_hours < 0 || p.fallback_after_hours < 0 || p.behavior_min_span_secs < 0 {
            return Err("Verification windows must not be negative".to_string());
        }
        if p.time_based_min_age_hours > MAX_WINDOW_HOURS || p.fallback_after_hours > MAX_WINDOW_HOURS {
            return Err(format!("Verification windows must not exceed {} hours", MAX_WINDOW_HOURS));
        }
        if p.behavior_min_span_secs > MAX_SPAN_SECS {
            return Err(format!("BEHAVIOR_MIN_SPAN_SECS must not exceed {}", MAX_SPAN_SECS));
        }
        if p.fallback_after_hours < p.time_based_min_age_hours {
            return Err(
                "FALLBACK_AFTER_HOURS must be at least TIME_BASED_MIN_AGE_HOURS".to_string(),
            );
        }
        // NaN fails the range check too
        if !(0.0..=1.0).contains(&p.behavior_max_self_ratio) {
            return Err("BEHAVIOR_MAX_SELF_RATIO must be between 0 and 1".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &[&str]) -> Args {
        let mut argv = vec!["curator"];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_defaults_match_policy_defaults() {
        let args = parse(&[]);
        assert!(args.validate().is_ok());
        assert_eq!(args.verification_policy(), VerificationPolicy::default());
        assert_eq!(args.address_codec().max_attempts(), 1024);
    }

    #[test]
    fn test_policy_overrides() {
        let args = parse(&["--fallback-enabled", "--fallback-after-hours", "48"]);
        let policy = args.verification_policy();
        assert!(policy.fallback_enabled);
        assert_eq!(policy.fallback_after, Duration::hours(48));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let args = parse(&["--public-base-url", "ftp://example.org"]);
        assert!(args.validate().is_err());

        let args = parse(&["--behavior-max-self-ratio", "1.5"]);
        assert!(args.validate().is_err());

        let args = parse(&["--fallback-after-hours", "2"]);
        assert!(args.validate().is_err());

        let args = parse(&["--address-max-attempts", "0"]);
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_oversized_windows_rejected_without_panicking() {
        let huge = i64::MAX.to_string();
        for flag in [
            "--fallback-after-hours",
            "--time-based-min-age-hours",
            "--behavior-min-span-secs",
        ] {
            let args = parse(&[flag, &huge]);
            assert!(args.validate().is_err(), "{} accepted", flag);
            // Still builds a policy rather than overflowing
            let _ = args.verification_policy();
        }

        let args = parse(&[
            "--time-based-min-age-hours",
            &huge,
            "--fallback-after-hours",
            &huge,
        ]);
        assert!(args.validate().is_err());
        let policy = args.verification_policy();
        assert_eq!(policy.fallback_after, Duration::hours(MAX_WINDOW_HOURS));

        let args = parse(&["--sweep-interval-secs", &u64::MAX.to_string()]);
        assert!(args.validate().is_err());
        assert_eq!(
            args.sweep_interval(),
            std::time::Duration::from_secs(MAX_SWEEP_INTERVAL_SECS)
        );

        let args = parse(&["--fallback-after-hours", &MAX_WINDOW_HOURS.to_string()]);
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_nan_self_ratio_rejected() {
        let args = parse(&["--behavior-max-self-ratio", "NaN"]);
        assert!(args.validate().is_err());
    }

}
