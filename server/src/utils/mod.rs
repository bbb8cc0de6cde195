use std::sync::atomic::{AtomicI64, Ordering};

use axum::{
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use once_cell::sync::Lazy;
use rand::{distr::Alphanumeric, rng, Rng};
use serde::Serialize;

pub mod auth;
pub mod sse;

#[derive(Debug, Serialize)]
pub struct HttpResult<T> {
    pub code: usize,
    pub data: T,
}

impl<T> HttpResult<T> {
    pub fn new(data: T) -> HttpResult<T> {
        HttpResult { code: 0, data }
    }
}

impl<T> IntoResponse for HttpResult<T>
where
    T: Serialize,
{
    fn into_response(self) -> Response {
        Json(self).into_response()
    }
}

pub fn random_alphanumeric(len: usize) -> String {
    rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

// Millisecond timestamp shifted over a 12-bit sequence; monotonic within the
// process even when the clock stalls or steps backwards.
pub struct IdGenerator {
    last: AtomicI64,
}

impl IdGenerator {
    pub fn generate_id(&self) -> i64 {
        let candidate = Utc::now().timestamp_millis() << 12;
        loop {
            let prev = self.last.load(Ordering::Relaxed);
            let next = if candidate > prev { candidate } else { prev + 1 };
            if self
                .last
                .compare_exchange(prev, next, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                return next;
            }
        }
    }
}

pub static ID_GENERATOR: Lazy<IdGenerator> = Lazy::new(|| IdGenerator {
    last: AtomicI64::new(0),
});

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_ids_are_unique_and_increasing() {
        let mut seen = HashSet::new();
        let mut prev = 0;
        for _ in 0..10_000 {
            let id = ID_GENERATOR.generate_id();
            assert!(id > prev);
            assert!(seen.insert(id));
            prev = id;
        }
    }
}
