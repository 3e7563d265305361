pub mod filters;
pub mod math;
pub mod types;

/// Wall-clock timestamp as fractional unix seconds, the stamp format every
/// bus message carries.
pub fn now_ts() -> f64 {
    time::OffsetDateTime::now_utc().unix_timestamp_nanos() as f64 / 1e9
}
