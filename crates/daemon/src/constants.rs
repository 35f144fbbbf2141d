use std::time::Duration;

/// Config-table key holding the reconciler's block cursor.
pub const LAST_PROCESSED_BLOCK_KEY: &str = "LAST_PROCESSED_BLOCK";

pub const EVENT_AGREEMENT_CREATED: &str = "AgreementCreated";
pub const EVENT_AGREEMENT_CLOSED: &str = "AgreementClosed";

/// Poll cadence for resources that are not yet running.
pub const RESOURCE_POLL_INTERVAL: Duration = Duration::from_secs(5);

pub const DATA_DIR: &str = "data";
pub const DETAILS_DIR: &str = "data/details";

/// Candidate OpenAPI documents served by `GET /spec`, probed in order.
pub const SPEC_FILES: [&str; 4] = ["spec.yaml", "spec.json", "oas.yaml", "oas.json"];

pub const EXIT_OK: i32 = 0;
pub const EXIT_TERMINATED: i32 = 1;
pub const EXIT_FORCED: i32 = 255;
