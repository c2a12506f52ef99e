//! One-Time Code Engine.
//!
//! A 6-digit CSPRNG code, stored only as its SHA-256 hash, rate-limited per
//! factor: 5 failed attempts return `InvalidCode`, the 6th onward returns
//! `AttemptsExceeded` without even checking the code. Every verify call
//! first sweeps expired codes for the factor so expiry never depends on a
//! background job.

use chrono::{DateTime, Utc};
use rand::RngCore;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::constants::{DEFAULT_OTC_ATTEMPT_LIMIT, DEFAULT_OTC_ATTEMPT_WINDOW, OTC_MAX};
use crate::error::{AuthError, Result};
use crate::state::{AttemptType, AuthenticationAttempt, OneTimeCode, RecordHeader};

/// Storage and rate-limit bookkeeping for one-time codes, independent of the
/// transport (Postgres, in-memory) backing it.
#[async_trait::async_trait]
pub trait OtcStore: Send + Sync {
    /// Persist a newly generated code for `factor_id`, expiring at `expires_at`.
    async fn insert(&self, factor_id: Uuid, code_hash: [u8; 32], expires_at: DateTime<Utc>) -> Result<OneTimeCode>;

    /// All outstanding one-time codes for `factor_id`, most recent first.
    async fn list_for_factor(&self, factor_id: Uuid) -> Result<Vec<OneTimeCode>>;

    /// Delete a one-time code by id (used both to clear expired codes and to
    /// consume a matched one).
    async fn delete(&self, id: Uuid) -> Result<()>;

    /// Count of failed attempts for `factor_id` within the rate-limit window.
    async fn failed_attempt_count(&self, factor_id: Uuid, since: DateTime<Utc>) -> Result<u32>;

    /// Append an attempt record.
    async fn record_attempt(&self, attempt: AuthenticationAttempt) -> Result<()>;
}

/// Generate a new 6-digit code for `factor_id`, returning the plaintext code
/// to deliver and the stored record (which carries only the hash).
///
/// # Errors
/// Propagates whatever the backing [`OtcStore`] returns.
pub async fn generate(store: &dyn OtcStore, factor_id: Uuid, now: DateTime<Utc>, ttl: chrono::Duration) -> Result<(String, OneTimeCode)> {
    let mut rng = rand::thread_rng();
    let code = rng.next_u32() % (OTC_MAX + 1);
    let code_str = format!("{code:06}");
    let code_hash = hash_code(&code_str);
    let record = store.insert(factor_id, code_hash, now + ttl).await?;
    Ok((code_str, record))
}

fn hash_code(code: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(code.as_bytes());
    hasher.finalize().into()
}

/// Verify `code` against the outstanding one-time codes for `factor_id`.
///
/// 1. Load all outstanding codes for the factor.
/// 2. Delete any that have expired.
/// 3. If the failed-attempt count within the rate-limit window is at or
///    above the limit, fail closed with [`AuthError::AttemptsExceeded`]
///    without even hashing `code`.
/// 4. Otherwise hash `code` and look for a match among the surviving codes.
///    On match: delete it (one-shot use) and record a successful attempt.
///    On no match: record a failed attempt and return
///    [`AuthError::InvalidCode`].
///
/// # Errors
/// Returns [`AuthError::AttemptsExceeded`] once the rate limit is hit, or
/// [`AuthError::InvalidCode`] when no surviving code matches.
pub async fn verify(store: &dyn OtcStore, factor_id: Uuid, code: &str, now: DateTime<Utc>) -> Result<()> {
    let outstanding = store.list_for_factor(factor_id).await?;
    let mut live = Vec::with_capacity(outstanding.len());
    for otc in outstanding {
        if otc.expires_at <= now {
            store.delete(otc.header.id).await?;
        } else {
            live.push(otc);
        }
    }

    let window_start = now - chrono::Duration::from_std(DEFAULT_OTC_ATTEMPT_WINDOW).unwrap_or_default();
    let failures = store.failed_attempt_count(factor_id, window_start).await?;
    if failures >= DEFAULT_OTC_ATTEMPT_LIMIT {
        return Err(AuthError::AttemptsExceeded);
    }

    let given_hash = hash_code(code);
    let matched = live.iter().find(|otc| constant_time_eq::constant_time_eq(&otc.code_hash, &given_hash));

    match matched {
        Some(otc) => {
            store.delete(otc.header.id).await?;
            store
                .record_attempt(AuthenticationAttempt {
                    header: RecordHeader::new(now),
                    factor_id,
                    attempt_type: AttemptType::OneTimeCode,
                    successful: true,
                })
                .await?;
            Ok(())
        }
        None => {
            store
                .record_attempt(AuthenticationAttempt {
                    header: RecordHeader::new(now),
                    factor_id,
                    attempt_type: AttemptType::OneTimeCode,
                    successful: false,
                })
                .await?;
            Err(AuthError::InvalidCode)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemoryOtcStore {
        codes: Mutex<Vec<OneTimeCode>>,
        attempts: Mutex<Vec<AuthenticationAttempt>>,
    }

    #[async_trait::async_trait]
    impl OtcStore for MemoryOtcStore {
        async fn insert(&self, factor_id: Uuid, code_hash: [u8; 32], expires_at: DateTime<Utc>) -> Result<OneTimeCode> {
            let record = OneTimeCode {
                header: RecordHeader::new(Utc::now()),
                factor_id,
                code_hash,
                expires_at,
            };
            self.codes.lock().unwrap().push(record.clone());
            Ok(record)
        }

        async fn list_for_factor(&self, factor_id: Uuid) -> Result<Vec<OneTimeCode>> {
            Ok(self
                .codes
                .lock()
                .unwrap()
                .iter()
                .filter(|c| c.factor_id == factor_id)
                .cloned()
                .collect())
        }

        async fn delete(&self, id: Uuid) -> Result<()> {
            self.codes.lock().unwrap().retain(|c| c.header.id != id);
            Ok(())
        }

        async fn failed_attempt_count(&self, factor_id: Uuid, since: DateTime<Utc>) -> Result<u32> {
            Ok(self
                .attempts
                .lock()
                .unwrap()
                .iter()
                .filter(|a| a.factor_id == factor_id && !a.successful && a.header.created_at >= since)
                .count() as u32)
        }

        async fn record_attempt(&self, attempt: AuthenticationAttempt) -> Result<()> {
            self.attempts.lock().unwrap().push(attempt);
            Ok(())
        }
    }

    #[tokio::test]
    async fn generate_then_verify_succeeds() {
        let store = MemoryOtcStore::default();
        let factor_id = Uuid::new_v4();
        let now = Utc::now();
        let (code, _) = generate(&store, factor_id, now, chrono::Duration::minutes(10)).await.unwrap();
        verify(&store, factor_id, &code, now).await.unwrap();
        assert!(store.codes.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn wrong_code_is_invalid() {
        let store = MemoryOtcStore::default();
        let factor_id = Uuid::new_v4();
        let now = Utc::now();
        generate(&store, factor_id, now, chrono::Duration::minutes(10)).await.unwrap();
        let err = verify(&store, factor_id, "000000", now).await.unwrap_err();
        assert_eq!(err, AuthError::InvalidCode);
    }

    #[tokio::test]
    async fn expired_code_is_swept_and_rejected() {
        let store = MemoryOtcStore::default();
        let factor_id = Uuid::new_v4();
        let now = Utc::now();
        let (code, _) = generate(&store, factor_id, now - chrono::Duration::minutes(20), chrono::Duration::minutes(10))
            .await
            .unwrap();
        let err = verify(&store, factor_id, &code, now).await.unwrap_err();
        assert_eq!(err, AuthError::InvalidCode);
        assert!(store.codes.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn s3_rate_limit_exceeded_after_five_failures() {
        let store = MemoryOtcStore::default();
        let factor_id = Uuid::new_v4();
        let now = Utc::now();
        generate(&store, factor_id, now, chrono::Duration::minutes(10)).await.unwrap();
        for _ in 0..DEFAULT_OTC_ATTEMPT_LIMIT {
            let err = verify(&store, factor_id, "000000", now).await.unwrap_err();
            assert_eq!(err, AuthError::InvalidCode);
        }
        let err = verify(&store, factor_id, "000000", now).await.unwrap_err();
        assert_eq!(err, AuthError::AttemptsExceeded);
    }
}
