mod config;
mod daemon;

pub use config::{
  BrokerSection, CacheSection, LimitsSection, LoggingSection, PostgresSection, ServerConfig,
  ServerSection,
};
pub use daemon::Daemon;
