//! Freshness and reliability scoring for ingested documents.

use chrono::{DateTime, Utc};

const RELIABILITY_MIN: f64 = 0.2;
const RELIABILITY_MAX: f64 = 0.95;

/// Exponential decay of a publication timestamp: `exp(-age_hours / half_life)`.
///
/// An unparseable or missing timestamp is treated as brand new (score 1.0)
/// rather than stale; staleness decisions fall to review sweeps instead.
pub fn freshness_score(published_at: &str, half_life_hours: f64) -> f64 {
    freshness_score_at(published_at, half_life_hours, Utc::now())
}

/// [`freshness_score`] against an explicit clock.
pub fn freshness_score_at(published_at: &str, half_life_hours: f64, now: DateTime<Utc>) -> f64 {
    let age_hours = DateTime::parse_from_rfc3339(published_at)
        .map(|ts| (now - ts.with_timezone(&Utc)).num_seconds() as f64 / 3600.0)
        .unwrap_or(0.0);
    let half_life = if half_life_hours > 0.0 {
        half_life_hours
    } else {
        72.0
    };
    (-age_hours / half_life).exp()
}

/// Source reputation in [0.2, 0.95] from tag hints and the source host.
///
/// Baseline 0.7; curated material (policy, official, runbook tags) rates
/// higher, conversational material (chat, thread, message) lower, and
/// .gov / .edu hosts floor the score upward.
pub fn reliability_score(source_url: &str, tags: &[String]) -> f64 {
    let mut score = 0.7;
    let lower: Vec<String> = tags.iter().map(|t| t.to_lowercase()).collect();
    if lower.iter().any(|t| matches!(t.as_str(), "policy" | "official" | "runbook")) {
        score = 0.85;
    }
    if lower.iter().any(|t| matches!(t.as_str(), "chat" | "thread" | "message")) {
        score = 0.6;
    }
    if let Some(host) = host_of(source_url) {
        if host.ends_with(".gov") {
            score = f64::max(score, 0.9);
        }
        if host.ends_with(".edu") {
            score = f64::max(score, 0.85);
        }
    }
    score.clamp(RELIABILITY_MIN, RELIABILITY_MAX)
}

/// Lowercased hostname of a URL, `None` when there is no scheme://host part.
fn host_of(url: &str) -> Option<String> {
    let rest = url.split_once("://")?.1;
    let authority = rest.split(['/', '?', '#']).next()?;
    let host = authority.rsplit('@').next()?.split(':').next()?;
    if host.is_empty() {
        None
    } else {
        Some(host.to_lowercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn clock() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_freshness_half_life() {
        // Exactly one half-life old.
        let published = "2024-02-09T12:00:00Z"; // 720 hours earlier
        let score = freshness_score_at(published, 720.0, clock());
        assert!((score - (-1.0f64).exp()).abs() < 1e-9);

        let fresh = freshness_score_at("2024-03-10T12:00:00Z", 720.0, clock());
        assert!((fresh - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_freshness_unparseable_is_new() {
        assert!((freshness_score_at("", 720.0, clock()) - 1.0).abs() < 1e-9);
        assert!((freshness_score_at("last tuesday", 720.0, clock()) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_freshness_zero_half_life_uses_default() {
        let published = "2024-03-07T12:00:00Z"; // 72 hours earlier
        let score = freshness_score_at(published, 0.0, clock());
        assert!((score - (-1.0f64).exp()).abs() < 1e-9);
    }

    #[test]
    fn test_reliability_tiers() {
        let none: &[String] = &[];
        assert!((reliability_score("https://example.com/a", none) - 0.7).abs() < 1e-9);
        assert!(
            (reliability_score("https://example.com/a", &["policy".to_string()]) - 0.85).abs()
                < 1e-9
        );
        assert!(
            (reliability_score("https://example.com/a", &["chat".to_string()]) - 0.6).abs() < 1e-9
        );
        assert!((reliability_score("https://data.census.gov/x", none) - 0.9).abs() < 1e-9);
        // A .gov host outranks the chat penalty.
        assert!(
            (reliability_score("https://data.census.gov/x", &["chat".to_string()]) - 0.9).abs()
                < 1e-9
        );
    }

    #[test]
    fn test_host_parsing() {
        assert_eq!(host_of("https://Example.GOV/path"), Some("example.gov".to_string()));
        assert_eq!(host_of("https://u:p@host.edu:8443/x"), Some("host.edu".to_string()));
        assert_eq!(host_of("not a url"), None);
        assert_eq!(host_of(""), None);
    }
}
