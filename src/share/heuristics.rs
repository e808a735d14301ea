//! Share verification heuristics
//!
//! Pure decision procedure over a share record and the current time. The
//! signals are tried in a fixed order and the first one that fires wins:
//!
//! 1. referral tracking
//! 2. time based
//! 3. behavior
//! 4. fallback (or manual review when fallback is disabled)
//!
//! Manual verification bypasses this module entirely.

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use url::Url;

use crate::db::schemas::{ShareDoc, VerificationMethod, VisitMetadata};

/// Thresholds for the automatic heuristics
#[derive(Debug, Clone, PartialEq)]
pub struct VerificationPolicy {
    /// Minimum share age before the time-based signal applies
    pub time_based_min_age: Duration,
    /// Age after which a share with no corroborating visits hits the fallback
    pub fallback_after: Duration,
    /// Verify stale shares leniently instead of flagging them for review
    pub fallback_enabled: bool,
    /// Minimum non-self visits for the behavior signal
    pub behavior_min_visits: usize,
    /// Minimum distinct visitor signatures for the behavior signal
    pub behavior_min_distinct_visitors: usize,
    /// Minimum time between first and last visit for the behavior signal
    pub behavior_min_span: Duration,
    /// Highest tolerated share of self visits among all visits
    pub behavior_max_self_ratio: f64,
}

impl Default for VerificationPolicy {
    fn default() -> Self {
        Self {
            time_based_min_age: Duration::hours(6),
            fallback_after: Duration::hours(24),
            fallback_enabled: false,
            behavior_min_visits: 3,
            behavior_min_distinct_visitors: 2,
            behavior_min_span: Duration::seconds(60),
            behavior_max_self_ratio: 0.5,
        }
    }
}

/// Outcome of assessing one share
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Assessment {
    /// Already verified; nothing to decide
    AlreadyVerified,
    /// A signal fired
    Verify(VerificationMethod),
    /// Stale with no signal and fallback disabled
    ManualReview,
    /// Keep waiting
    Pending,
}

/// Visit counters the heuristics are computed from
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VisitSummary {
    pub total: usize,
    pub self_visits: usize,
    /// Non-self visits carrying `ref` equal to the sharer
    pub referral_hits: usize,
    /// Non-self visits with an external http(s) referrer
    pub external_referrals: usize,
    pub distinct_visitors: usize,
    pub first_external: Option<DateTime<Utc>>,
    pub last_external: Option<DateTime<Utc>>,
}

impl VisitSummary {
    /// Visits that do not come from the sharer
    pub fn external(&self) -> usize {
        self.total - self.self_visits
    }

    pub fn self_ratio(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.self_visits as f64 / self.total as f64
        }
    }

    pub fn external_span(&self) -> Duration {
        match (self.first_external, self.last_external) {
            (Some(first), Some(last)) => last - first,
            _ => Duration::zero(),
        }
    }
}

/// Summarize the visits recorded on a share
///
/// `own_host` is the host the share links point at; referrers from it are
/// not external.
pub fn summarize(share: &ShareDoc, own_host: Option<&str>) -> VisitSummary {
    let mut summary = VisitSummary::default();
    let mut visitors = HashSet::new();

    for (timestamp, visit) in share.visits() {
        summary.total += 1;
        if is_self_visit(share, visit) {
            summary.self_visits += 1;
            continue;
        }

        visitors.insert(visit.visitor_signature());

        if visit.ref_user_id.as_deref() == Some(share.user_id.as_str()) {
            summary.referral_hits += 1;
        }
        if is_external_referrer(visit.referrer.as_deref(), own_host) {
            summary.external_referrals += 1;
        }

        let at = timestamp.to_chrono();
        summary.first_external = Some(summary.first_external.map_or(at, |f| f.min(at)));
        summary.last_external = Some(summary.last_external.map_or(at, |l| l.max(at)));
    }

    summary.distinct_visitors = visitors.len();
    summary
}

/// The sharer clicking their own link
fn is_self_visit(share: &ShareDoc, visit: &VisitMetadata) -> bool {
    visit.visitor_id.as_deref() == Some(share.user_id.as_str())
}

/// Host of an http(s) URL, lower-cased by the URL parser
pub fn url_host(raw: &str) -> Option<String> {
    let url = Url::parse(raw.trim()).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    url.host_str().map(str::to_string)
}

fn is_external_referrer(referrer: Option<&str>, own_host: Option<&str>) -> bool {
    let Some(host) = referrer.and_then(url_host) else {
        return false;
    };
    match own_host {
        Some(own) => !host.eq_ignore_ascii_case(own),
        None => true,
    }
}

/// Run the heuristic chain against a share
pub fn assess(
    share: &ShareDoc,
    now: DateTime<Utc>,
    policy: &VerificationPolicy,
    own_host: Option<&str>,
) -> Assessment {
    if share.verified {
        return Assessment::AlreadyVerified;
    }

    let summary = summarize(share, own_host);
    let age = now - share.created_at.to_chrono();

    if summary.referral_hits > 0 {
        return Assessment::Verify(VerificationMethod::ReferralTracking);
    }

    let self_majority = summary.self_visits > summary.external();
    if age >= policy.time_based_min_age && summary.external_referrals > 0 && !self_majority {
        return Assessment::Verify(VerificationMethod::TimeBased);
    }

    if summary.external() >= policy.behavior_min_visits
        && summary.distinct_visitors >= policy.behavior_min_distinct_visitors
        && summary.external_span() >= policy.behavior_min_span
        && summary.self_ratio() <= policy.behavior_max_self_ratio
    {
        return Assessment::Verify(VerificationMethod::Behavior);
    }

    if age > policy.fallback_after && summary.external() == 0 {
        return if policy.fallback_enabled {
            Assessment::Verify(VerificationMethod::Fallback)
        } else if share.manual_review {
            Assessment::Pending
        } else {
            Assessment::ManualReview
        };
    }

    Assessment::Pending
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schemas::{ShareEvent, ShareEventKind};
    use bson::DateTime as BsonDateTime;

    fn share_aged(hours: i64) -> ShareDoc {
        let mut share = ShareDoc::new(
            "share_1_ab".into(),
            "u1".into(),
            "p1".into(),
            "https://curator.example/projects/p1?share=share_1_ab&ref=u1".into(),
        );
        share.created_at = BsonDateTime::from_chrono(Utc::now() - Duration::hours(hours));
        share
    }

    fn visit(share: &mut ShareDoc, offset_secs: i64, meta: VisitMetadata) {
        let at = share.created_at.to_chrono() + Duration::seconds(offset_secs);
        share
            .events
            .push(ShareEvent::at(BsonDateTime::from_chrono(at), ShareEventKind::Visit(meta)));
    }

    fn meta(visitor: Option<&str>, referrer: Option<&str>, r#ref: Option<&str>) -> VisitMetadata {
        VisitMetadata {
            ref_user_id: r#ref.map(String::from),
            referrer: referrer.map(String::from),
            user_agent: Some("Mozilla/5.0".into()),
            visitor_id: visitor.map(String::from),
            ..Default::default()
        }
    }

    const HOST: Option<&str> = Some("curator.example");

    #[test]
    fn test_referral_wins_immediately() {
        let mut share = share_aged(0);
        visit(&mut share, 1, meta(Some("v2"), None, Some("u1")));
        assert_eq!(
            assess(&share, Utc::now(), &VerificationPolicy::default(), HOST),
            Assessment::Verify(VerificationMethod::ReferralTracking)
        );
    }

    #[test]
    fn test_self_referral_does_not_count() {
        let mut share = share_aged(0);
        visit(&mut share, 1, meta(Some("u1"), None, Some("u1")));
        assert_eq!(
            assess(&share, Utc::now(), &VerificationPolicy::default(), HOST),
            Assessment::Pending
        );
    }

    #[test]
    fn test_time_based_needs_age_and_external_referrer() {
        let policy = VerificationPolicy::default();

        let mut young = share_aged(1);
        visit(&mut young, 5, meta(None, Some("https://twitter.com/x/status/1"), None));
        assert_eq!(assess(&young, Utc::now(), &policy, HOST), Assessment::Pending);

        let mut old = share_aged(7);
        visit(&mut old, 5, meta(None, Some("https://twitter.com/x/status/1"), None));
        assert_eq!(
            assess(&old, Utc::now(), &policy, HOST),
            Assessment::Verify(VerificationMethod::TimeBased)
        );

        let mut internal = share_aged(7);
        visit(&mut internal, 5, meta(None, Some("https://curator.example/feed"), None));
        assert_eq!(assess(&internal, Utc::now(), &policy, HOST), Assessment::Pending);
    }

    #[test]
    fn test_behavior_pattern() {
        let policy = VerificationPolicy::default();
        let mut share = share_aged(1);
        visit(&mut share, 0, meta(Some("a"), None, None));
        visit(&mut share, 40, meta(Some("b"), None, None));
        visit(&mut share, 90, meta(Some("c"), None, None));
        assert_eq!(
            assess(&share, Utc::now(), &policy, HOST),
            Assessment::Verify(VerificationMethod::Behavior)
        );

        // Same visitor hammering the link is not organic
        let mut burst = share_aged(1);
        for i in 0..5 {
            visit(&mut burst, i * 30, meta(Some("a"), None, None));
        }
        assert_eq!(assess(&burst, Utc::now(), &policy, HOST), Assessment::Pending);
    }

    #[test]
    fn test_fallback_policy() {
        let share = share_aged(30);
        let lenient = VerificationPolicy {
            fallback_enabled: true,
            ..Default::default()
        };
        assert_eq!(
            assess(&share, Utc::now(), &lenient, HOST),
            Assessment::Verify(VerificationMethod::Fallback)
        );

        let strict = VerificationPolicy::default();
        assert_eq!(assess(&share, Utc::now(), &strict, HOST), Assessment::ManualReview);

        let mut flagged = share.clone();
        flagged.manual_review = true;
        assert_eq!(assess(&flagged, Utc::now(), &strict, HOST), Assessment::Pending);
    }

    #[test]
    fn test_verified_share_short_circuits() {
        let mut share = share_aged(30);
        share.verified = true;
        assert_eq!(
            assess(&share, Utc::now(), &VerificationPolicy::default(), HOST),
            Assessment::AlreadyVerified
        );
    }

    #[test]
    fn test_url_host() {
        assert_eq!(url_host("https://twitter.com/x").as_deref(), Some("twitter.com"));
        assert_eq!(url_host("http://user@host.io:8080/p?q").as_deref(), Some("host.io"));
        assert_eq!(url_host("HTTPS://T.co/abc").as_deref(), Some("t.co"));
        assert_eq!(
            url_host("https://[2001:db8::1]:8443/x").as_deref(),
            Some("[2001:db8::1]")
        );
        assert_eq!(url_host("ftp://host.io"), None);
        assert_eq!(url_host("https://"), None);
        assert_eq!(url_host("not a url"), None);
    }

    #[test]
    fn test_upper_case_referrer_counts_as_external() {
        let mut share = share_aged(7);
        visit(&mut share, 30, meta(Some("v2"), Some("HTTPS://T.co/abc"), None));
        assert_eq!(
            assess(&share, Utc::now(), &VerificationPolicy::default(), HOST),
            Assessment::Verify(VerificationMethod::TimeBased)
        );

        // Own host in any case stays internal
        let mut share = share_aged(7);
        visit(&mut share, 30, meta(Some("v2"), Some("HTTPS://Curator.Example/p"), None));
        assert_eq!(
            assess(&share, Utc::now(), &VerificationPolicy::default(), HOST),
            Assessment::Pending
        );
    }
}
