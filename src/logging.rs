use env_logger::{Builder, Env};

pub const LOG_ENV: &str = "OVER9K_LOG";
const DEFAULT_FILTER: &str = "info";

/// Install the process-wide logger. Safe to call more than once; later calls
/// are ignored.
pub fn init() {
  let mut builder = Builder::from_env(Env::default().filter_or(LOG_ENV, DEFAULT_FILTER));
  builder.format_timestamp_millis();
  if builder.try_init().is_err() {
    log::debug!("logger already installed");
  }
}
