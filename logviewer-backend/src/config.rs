use clap::ValueEnum;
use std::fmt::{Debug, Formatter};
use tracing_config_helper::LogFormat;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StorageKind {
    Postgres,
    /// Nothing survives a restart, for demos and local testing
    Memory,
}

#[derive(Debug, clap::Parser)]
pub struct LaunchConfig {
    #[clap(flatten)]
    pub db: DbConfig,
    #[clap(long, env, default_value_t = 8080)]
    pub api_listen_port: u16,
    #[clap(long, env, value_enum, default_value_t = StorageKind::Postgres)]
    pub storage: StorageKind,
    #[clap(long, env, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,
}

#[derive(clap::Parser)]
pub struct DbConfig {
    /// Required when storage is postgres
    #[clap(long = "database-url", env = "DATABASE_URL")]
    pub url: Option<String>,
    #[clap(long, env, default_value_t = 10)]
    pub max_db_connections: u16,
}

fn redacted(url: &str) -> String {
    url.chars()
        .rev()
        .take(15)
        .collect::<String>()
        .chars()
        .rev()
        .collect::<String>()
}

impl Debug for DbConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbConfig")
            .field("max_db_connections", &self.max_db_connections)
            .field("url", &self.url.as_deref().map(redacted))
            .finish()
    }
}
