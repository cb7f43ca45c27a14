#![allow(dead_code, unused_imports)]

pub mod test_database;
pub mod test_server;

pub use test_database::TestDatabase;
pub use test_server::{ADMIN_EMAIL, API_KEY, Fixture, GUEST_EMAIL, JWT_SECRET, OBS_KEY, TestServer, id_of};

/// Macro to wrap test bodies with a timeout so a stuck request fails the test
#[macro_export]
macro_rules! timeout_test {
    ($duration:expr, $body:expr) => {
        tokio::time::timeout($duration, $body)
            .await
            .map_err(|_| anyhow::anyhow!("Test timed out after {:?}", $duration))?
    };
}
