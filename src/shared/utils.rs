use crate::shared::config::DatabaseConfig;
use crate::shared::errors::AppError;
use diesel::r2d2::{ConnectionManager, Pool};
use diesel::PgConnection;
use log::warn;
use rand::Rng;
use std::time::Duration;

pub type DbPool = Pool<ConnectionManager<PgConnection>>;

pub fn create_conn(cfg: &DatabaseConfig) -> Result<DbPool, diesel::r2d2::PoolError> {
    let manager = ConnectionManager::<PgConnection>::new(cfg.url.clone());
    Pool::builder()
        .max_size(cfg.max_connections)
        .build(manager)
}

/// Bounded retry for transient store errors. Non-transient errors surface
/// immediately; transient ones get `attempts` tries with doubling, jittered
/// backoff, then the last error surfaces.
pub fn with_retry<T, F>(op: &str, attempts: u32, mut f: F) -> Result<T, AppError>
where
    F: FnMut() -> Result<T, AppError>,
{
    // A zero budget still means one try.
    let attempts = attempts.max(1);
    let mut delay = Duration::from_millis(50);
    for attempt in 1..=attempts {
        match f() {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < attempts => {
                let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..25));
                warn!("{op}: transient failure (attempt {attempt}/{attempts}): {err}");
                std::thread::sleep(delay + jitter);
                delay *= 2;
            }
            Err(err) => return Err(err),
        }
    }
    unreachable!("retry loop returns on the last attempt")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn returns_first_success() {
        let calls = Cell::new(0u32);
        let out = with_retry("op", 3, || {
            calls.set(calls.get() + 1);
            Ok::<_, AppError>(42)
        })
        .unwrap();
        assert_eq!(out, 42);
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn retries_transient_then_succeeds() {
        let calls = Cell::new(0u32);
        let out = with_retry("op", 3, || {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(AppError::TransientStore("flaky".into()))
            } else {
                Ok(7)
            }
        })
        .unwrap();
        assert_eq!(out, 7);
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn non_transient_fails_fast() {
        let calls = Cell::new(0u32);
        let err = with_retry("op", 5, || {
            calls.set(calls.get() + 1);
            Err::<(), _>(AppError::Validation("bad".into()))
        })
        .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn zero_budget_still_tries_once() {
        let calls = Cell::new(0u32);
        let out = with_retry("op", 0, || {
            calls.set(calls.get() + 1);
            Ok::<_, AppError>(1)
        })
        .unwrap();
        assert_eq!(out, 1);
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn transient_surfaces_after_budget() {
        let calls = Cell::new(0u32);
        let err = with_retry("op", 2, || {
            calls.set(calls.get() + 1);
            Err::<(), _>(AppError::TransientStore("down".into()))
        })
        .unwrap_err();
        assert!(matches!(err, AppError::TransientStore(_)));
        assert_eq!(calls.get(), 2);
    }
}
