//! Shared fixtures for unit tests.

use rusqlite::Connection;

pub const TEST_DIM: usize = 16;

/// Fully migrated in-memory connection.
pub fn test_conn() -> Connection {
    crate::db::open_memory_database().unwrap()
}

/// Unit vector along one axis.
pub fn axis(i: usize) -> Vec<f32> {
    let mut v = vec![0.0f32; TEST_DIM];
    v[i % TEST_DIM] = 1.0;
    v
}

/// Normalized blend of two axes; `weight` goes to `a`.
pub fn blend(a: usize, b: usize, weight: f32) -> Vec<f32> {
    let mut v = vec![0.0f32; TEST_DIM];
    v[a % TEST_DIM] += weight;
    v[b % TEST_DIM] += 1.0 - weight;
    crate::embedding::l2_normalize(&v)
}
