//! Freshness decisions for cached organisation, repository and package facts.
//!
//! Nothing in here performs I/O. The scanner looks records up in the store and
//! asks the policy whether they can be trusted or must be fetched again.

use crate::types::{ExplorationRecord, RepositoryRecord, ResolvedPackage};
use chrono::{DateTime, Duration, Utc};

/// Default refresh window in hours.
pub const DEFAULT_REFRESH_HOURS: i64 = 24;
/// Longest accepted refresh window, ten years.
pub const MAX_REFRESH_HOURS: i64 = 24 * 365 * 10;

/// Decides when cached facts must be re-verified.
#[derive(Debug, Clone, Copy)]
pub struct FreshnessPolicy {
    window: Duration,
}

impl Default for FreshnessPolicy {
    fn default() -> Self {
        Self::from_hours(DEFAULT_REFRESH_HOURS)
    }
}

impl FreshnessPolicy {
    pub fn new(window: Duration) -> Self {
        Self { window }
    }

    /// Window of `hours`, clamped to `0..=MAX_REFRESH_HOURS`.
    pub fn from_hours(hours: i64) -> Self {
        Self::new(Duration::hours(hours.clamp(0, MAX_REFRESH_HOURS)))
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Whether a fact observed at `updated_at` is still inside the window.
    pub fn is_fresh(&self, updated_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(updated_at) < self.window
    }

    /// Whether an organisation's repository list must be fetched again.
    ///
    /// An organisation last seen with no repositories is only listed again
    /// when forced.
    pub fn should_refetch_org(&self, record: Option<&ExplorationRecord>, force: bool) -> bool {
        match record {
            _ if force => true,
            None => true,
            Some(r) => !self.is_fresh(r.updated_at, Utc::now()) && r.repo_count > 0,
        }
    }

    /// Whether a repository's metadata must be fetched again.
    pub fn should_refetch_repo(&self, record: Option<&RepositoryRecord>, force: bool) -> bool {
        match record {
            _ if force => true,
            None => true,
            Some(r) => !self.is_fresh(r.updated_at, Utc::now()),
        }
    }

    /// Whether an already linked package must be resolved again.
    pub fn should_re_resolve(&self, record: Option<&ResolvedPackage>, force: bool) -> bool {
        match record {
            _ if force => true,
            None => true,
            Some(p) => !self.is_fresh(p.updated_at, Utc::now()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Ecosystem, PackageIdentity, RepositoryInfo};

    fn exploration(hours_ago: i64, repo_count: usize) -> ExplorationRecord {
        ExplorationRecord {
            name: "acme".to_string(),
            repo_count,
            updated_at: Utc::now() - Duration::hours(hours_ago),
        }
    }

    #[test]
    fn test_is_fresh_is_monotonic() {
        let policy = FreshnessPolicy::from_hours(6);
        let now = Utc::now();
        assert!(policy.is_fresh(now, now));
        assert!(policy.is_fresh(now - Duration::hours(3), now));
        assert!(policy.is_fresh(now - Duration::minutes(359), now));
        assert!(!policy.is_fresh(now - Duration::hours(6), now));
        assert!(!policy.is_fresh(now - Duration::days(30), now));
    }

    #[test]
    fn test_window_is_clamped() {
        assert_eq!(
            FreshnessPolicy::from_hours(i64::MAX).window(),
            Duration::hours(MAX_REFRESH_HOURS)
        );
        assert_eq!(FreshnessPolicy::from_hours(-5).window(), Duration::zero());
    }

    #[test]
    fn test_org_refetch_rules() {
        let policy = FreshnessPolicy::from_hours(24);
        assert!(policy.should_refetch_org(None, false));
        assert!(!policy.should_refetch_org(Some(&exploration(1, 12)), false));
        assert!(policy.should_refetch_org(Some(&exploration(48, 12)), false));
        assert!(policy.should_refetch_org(Some(&exploration(1, 12)), true));
    }

    #[test]
    fn test_empty_org_is_not_refetched_without_force() {
        let policy = FreshnessPolicy::from_hours(24);
        assert!(!policy.should_refetch_org(Some(&exploration(480, 0)), false));
        assert!(policy.should_refetch_org(Some(&exploration(480, 0)), true));
    }

    #[test]
    fn test_repo_and_package_rules() {
        let policy = FreshnessPolicy::from_hours(6);
        let repo = RepositoryRecord {
            repository: RepositoryInfo {
                id: 1,
                full_name: "acme/web".to_string(),
                language: None,
                star_count: 0,
            },
            updated_at: Utc::now() - Duration::hours(7),
        };
        assert!(policy.should_refetch_repo(Some(&repo), false));
        assert!(policy.should_refetch_repo(None, false));

        let mut package = ResolvedPackage::unresolved(
            PackageIdentity::new("leftpad", Ecosystem::PyPi),
            Ecosystem::PyPi,
        );
        package.updated_at = Utc::now() - Duration::hours(3);
        assert!(!policy.should_re_resolve(Some(&package), false));
        assert!(policy.should_re_resolve(Some(&package), true));
        assert!(policy.should_re_resolve(None, false));
    }
}
