//! Expiry policies and the evaluator that applies them to stored records.
//!
//! The evaluator is the only place that decides whether a record is expired,
//! and the only place that removes records as a side effect of reading them.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::debug;

use super::{CacheKey, CacheValue, StoredRecord};
use crate::error::{CacheError, Result};
use crate::storage::StorageSession;
use crate::utils::{format_duration, parse_duration};

/// Lifetime granted to a record by a policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    /// Never expires.
    Eternal,
    /// Expires this long after the triggering action. Zero expires at once.
    After(Duration),
}

/// Per-action lifetimes. `None` leaves the record's current deadline alone.
pub trait ExpiryRules: Send + Sync {
    fn for_creation(&self) -> Option<Expiry>;

    fn for_access(&self) -> Option<Expiry>;

    fn for_update(&self) -> Option<Expiry>;
}

/// Built-in expiry policies.
#[derive(Clone, Default)]
pub enum ExpiryPolicy {
    /// Records never expire.
    #[default]
    Eternal,
    /// Fixed lifetime from creation.
    Created(Duration),
    /// Lifetime restarts on creation and on every read.
    Accessed(Duration),
    /// Lifetime restarts on creation and on every update.
    Modified(Duration),
    /// Lifetime restarts on creation, read and update.
    Touched(Duration),
    /// Caller-supplied rules.
    Custom(Arc<dyn ExpiryRules>),
}

impl ExpiryPolicy {
    /// The lifetime this policy assigns for `action`.
    pub fn expiry_for(&self, action: Action) -> Option<Expiry> {
        match action {
            Action::Check => None,
            Action::Create => self.for_creation(),
            Action::Access => self.for_access(),
            Action::Update => self.for_update(),
        }
    }
}

impl ExpiryRules for ExpiryPolicy {
    fn for_creation(&self) -> Option<Expiry> {
        match self {
            Self::Eternal => Some(Expiry::Eternal),
            Self::Created(d) | Self::Accessed(d) | Self::Modified(d) | Self::Touched(d) => {
                Some(Expiry::After(*d))
            }
            Self::Custom(rules) => rules.for_creation(),
        }
    }

    fn for_access(&self) -> Option<Expiry> {
        match self {
            Self::Accessed(d) | Self::Touched(d) => Some(Expiry::After(*d)),
            Self::Custom(rules) => rules.for_access(),
            _ => None,
        }
    }

    fn for_update(&self) -> Option<Expiry> {
        match self {
            Self::Modified(d) | Self::Touched(d) => Some(Expiry::After(*d)),
            Self::Custom(rules) => rules.for_update(),
            _ => None,
        }
    }
}

impl fmt::Display for ExpiryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Eternal => f.write_str("eternal"),
            Self::Created(d) => write!(f, "created:{}", format_duration(*d)),
            Self::Accessed(d) => write!(f, "accessed:{}", format_duration(*d)),
            Self::Modified(d) => write!(f, "modified:{}", format_duration(*d)),
            Self::Touched(d) => write!(f, "touched:{}", format_duration(*d)),
            Self::Custom(_) => f.write_str("custom"),
        }
    }
}

impl fmt::Debug for ExpiryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ExpiryPolicy({})", self)
    }
}

impl FromStr for ExpiryPolicy {
    type Err = CacheError;

    /// Parse `eternal` or `<kind>:<duration>` where kind is one of
    /// `created`, `accessed`, `modified`, `touched`.
    fn from_str(input: &str) -> Result<Self> {
        let input = input.trim();
        if input.eq_ignore_ascii_case("eternal") {
            return Ok(Self::Eternal);
        }

        let (kind, raw) = input.split_once(':').ok_or_else(|| {
            CacheError::config(format!(
                "expiry policy \"{}\" must be \"eternal\" or <kind>:<duration>",
                input
            ))
        })?;
        let duration = parse_duration(raw).ok_or_else(|| {
            CacheError::config(format!("invalid duration \"{}\" in expiry policy", raw))
        })?;

        match kind.trim().to_ascii_lowercase().as_str() {
            "created" => Ok(Self::Created(duration)),
            "accessed" => Ok(Self::Accessed(duration)),
            "modified" => Ok(Self::Modified(duration)),
            "touched" => Ok(Self::Touched(duration)),
            other => Err(CacheError::config(format!(
                "unknown expiry policy kind \"{}\"",
                other
            ))),
        }
    }
}

/// What the caller is about to do with a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Existence check only; never moves the deadline.
    Check,
    Create,
    Access,
    Update,
}

/// Outcome of evaluating a record.
#[derive(Debug, Clone, PartialEq)]
pub enum Evaluation<K, V> {
    /// Record is live; its deadline reflects the action.
    Live(StoredRecord<K, V>),
    /// Record was expired and has been removed from storage.
    Expired(StoredRecord<K, V>),
    /// There was no record.
    Absent,
}

impl<K, V> Evaluation<K, V> {
    pub fn into_live(self) -> Option<StoredRecord<K, V>> {
        match self {
            Self::Live(record) => Some(record),
            _ => None,
        }
    }

    pub fn is_live(&self) -> bool {
        matches!(self, Self::Live(_))
    }
}

/// Applies an [`ExpiryPolicy`] to the records of one session.
pub struct PolicyEvaluator<K, V>
where
    K: CacheKey,
    V: CacheValue,
{
    session: Arc<dyn StorageSession<K, V>>,
    policy: ExpiryPolicy,
}

impl<K, V> Clone for PolicyEvaluator<K, V>
where
    K: CacheKey,
    V: CacheValue,
{
    fn clone(&self) -> Self {
        Self {
            session: Arc::clone(&self.session),
            policy: self.policy.clone(),
        }
    }
}

impl<K, V> PolicyEvaluator<K, V>
where
    K: CacheKey,
    V: CacheValue,
{
    pub fn new(session: Arc<dyn StorageSession<K, V>>, policy: ExpiryPolicy) -> Self {
        Self { session, policy }
    }

    pub fn policy(&self) -> &ExpiryPolicy {
        &self.policy
    }

    /// Evaluate `record` for `action`.
    ///
    /// Expired records are removed from the session before returning
    /// [`Evaluation::Expired`]. A new deadline for a live record is persisted
    /// through the session's expiry update, which ignores records that are
    /// not stored yet.
    pub async fn evaluate(
        &self,
        record: Option<StoredRecord<K, V>>,
        action: Action,
    ) -> Result<Evaluation<K, V>> {
        let Some(mut record) = record else {
            return Ok(Evaluation::Absent);
        };

        let now = Utc::now();
        if record.is_expired_at(now) {
            return self.expire(record).await;
        }

        let Some(expiry) = self.policy.expiry_for(action) else {
            return Ok(Evaluation::Live(record));
        };

        match expiry {
            Expiry::Eternal => record.expires_at = None,
            Expiry::After(duration) if duration.is_zero() => return self.expire(record).await,
            Expiry::After(duration) => {
                // Deadlines past the representable range are treated as eternal.
                record.expires_at = chrono::Duration::from_std(duration)
                    .ok()
                    .and_then(|delta| now.checked_add_signed(delta));
                if record.is_expired_at(now) {
                    return self.expire(record).await;
                }
            }
        }

        self.session.update_expiry(&record).await?;
        Ok(Evaluation::Live(record))
    }

    async fn expire(&self, record: StoredRecord<K, V>) -> Result<Evaluation<K, V>> {
        self.session.remove(&record.key).await?;
        debug!("Expired record {:?}", record.key);
        Ok(Evaluation::Expired(record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::EntryFactory;
    use crate::storage::{CacheStorage, MemoryStorage};

    async fn evaluator(policy: ExpiryPolicy) -> PolicyEvaluator<String, u32> {
        let storage = MemoryStorage::new("expiry");
        let session = storage.open_session::<String, u32>("e").await.unwrap();
        PolicyEvaluator::new(session, policy)
    }

    #[test]
    fn test_parse_policies() {
        assert!(matches!("eternal".parse::<ExpiryPolicy>(), Ok(ExpiryPolicy::Eternal)));
        assert!(matches!(
            "accessed:500ms".parse::<ExpiryPolicy>(),
            Ok(ExpiryPolicy::Accessed(d)) if d == Duration::from_millis(500)
        ));
        assert!(matches!(
            "Touched:1h".parse::<ExpiryPolicy>(),
            Ok(ExpiryPolicy::Touched(d)) if d == Duration::from_secs(3600)
        ));
        assert!("created".parse::<ExpiryPolicy>().is_err());
        assert!("sometimes:1s".parse::<ExpiryPolicy>().is_err());
        assert!("created:soon".parse::<ExpiryPolicy>().is_err());
    }

    #[test]
    fn test_display_parses_back() {
        let policy = ExpiryPolicy::Modified(Duration::from_secs(90));
        assert_eq!(policy.to_string(), "modified:90s");
        let parsed: ExpiryPolicy = policy.to_string().parse().unwrap();
        assert_eq!(parsed.for_update(), Some(Expiry::After(Duration::from_secs(90))));
    }

    #[test]
    fn test_policy_actions() {
        let d = Duration::from_secs(1);
        assert_eq!(ExpiryPolicy::Eternal.for_creation(), Some(Expiry::Eternal));
        assert_eq!(ExpiryPolicy::Eternal.for_access(), None);
        assert_eq!(ExpiryPolicy::Created(d).for_access(), None);
        assert_eq!(ExpiryPolicy::Accessed(d).for_access(), Some(Expiry::After(d)));
        assert_eq!(ExpiryPolicy::Accessed(d).for_update(), None);
        assert_eq!(ExpiryPolicy::Modified(d).for_update(), Some(Expiry::After(d)));
        assert_eq!(ExpiryPolicy::Touched(d).for_access(), Some(Expiry::After(d)));
        assert_eq!(ExpiryPolicy::Touched(d).expiry_for(Action::Check), None);
    }

    #[tokio::test]
    async fn test_absent_record() {
        let evaluator = evaluator(ExpiryPolicy::Eternal).await;
        let outcome = evaluator.evaluate(None, Action::Access).await.unwrap();
        assert_eq!(outcome, Evaluation::Absent);
    }

    #[tokio::test]
    async fn test_zero_creation_expiry_expires() {
        let evaluator = evaluator(ExpiryPolicy::Created(Duration::ZERO)).await;
        let record = EntryFactory::new().create("a".to_string(), 1, None);
        let outcome = evaluator.evaluate(Some(record), Action::Create).await.unwrap();
        assert!(matches!(outcome, Evaluation::Expired(_)));
    }

    #[tokio::test]
    async fn test_check_removes_expired_record() {
        let evaluator = evaluator(ExpiryPolicy::Eternal).await;
        let mut record = EntryFactory::new().create("a".to_string(), 1, None);
        evaluator.session.put(&record).await.unwrap();

        record.expires_at = Some(Utc::now() - chrono::Duration::milliseconds(1));
        let outcome = evaluator.evaluate(Some(record), Action::Check).await.unwrap();
        assert!(matches!(outcome, Evaluation::Expired(_)));
        assert!(!evaluator.session.contains_key(&"a".to_string()).await.unwrap());
    }

    #[tokio::test]
    async fn test_access_moves_deadline_and_persists() {
        let evaluator = evaluator(ExpiryPolicy::Accessed(Duration::from_secs(60))).await;
        let record = EntryFactory::new().create("a".to_string(), 1, None);
        evaluator.session.put(&record).await.unwrap();

        let before = Utc::now();
        let live = evaluator
            .evaluate(Some(record), Action::Access)
            .await
            .unwrap()
            .into_live()
            .unwrap();
        let deadline = live.expires_at.unwrap();
        assert!(deadline > before + chrono::Duration::seconds(59));

        let stored = evaluator.session.get(&"a".to_string()).await.unwrap().unwrap();
        assert_eq!(stored.expires_at, Some(deadline));
    }

    #[tokio::test]
    async fn test_no_change_keeps_deadline() {
        let evaluator = evaluator(ExpiryPolicy::Created(Duration::from_secs(60))).await;
        let mut record = EntryFactory::new().create("a".to_string(), 1, None);
        let deadline = Utc::now() + chrono::Duration::seconds(5);
        record.expires_at = Some(deadline);

        let live = evaluator
            .evaluate(Some(record), Action::Access)
            .await
            .unwrap()
            .into_live()
            .unwrap();
        assert_eq!(live.expires_at, Some(deadline));
    }

    #[tokio::test]
    async fn test_eternal_clears_deadline() {
        let evaluator = evaluator(ExpiryPolicy::Eternal).await;
        let mut record = EntryFactory::new().create("a".to_string(), 1, None);
        record.expires_at = Some(Utc::now() + chrono::Duration::seconds(5));

        let live = evaluator
            .evaluate(Some(record), Action::Create)
            .await
            .unwrap()
            .into_live()
            .unwrap();
        assert_eq!(live.expires_at, None);
    }
}
