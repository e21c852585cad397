use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use sketchroom_server::connection::DEFAULT_OUTBOUND_CAPACITY;
use sketchroom_server::relay::DEFAULT_COMMAND_CAPACITY;
use sketchroom_server::storage::S3StoreConfig;
use sketchroom_server::{serve, AppState, ServerConfig, StorageConfig};
use tracing::info;

#[derive(Parser)]
#[command(author, version, about)]
struct Args {
    #[arg(long, env = "SKETCHROOM_HOST", default_value = "0.0.0.0")]
    host: std::net::IpAddr,
    #[arg(long, env = "PORT", default_value_t = 3000)]
    port: u16,
    #[arg(long, env = "SKETCHROOM_SNAPSHOT_DIR")]
    snapshot_dir: Option<PathBuf>,
    #[arg(long, env = "SKETCHROOM_OUTBOUND_CAPACITY", default_value_t = DEFAULT_OUTBOUND_CAPACITY)]
    outbound_capacity: usize,
    #[arg(long, env = "SKETCHROOM_RELAY_CAPACITY", default_value_t = DEFAULT_COMMAND_CAPACITY)]
    relay_capacity: usize,
    #[arg(long, env = "SKETCHROOM_CSRF_TOKEN")]
    csrf_token: Option<String>,
    #[arg(long, env = "SKETCHROOM_S3_BUCKET")]
    s3_bucket: Option<String>,
    #[arg(long, env = "SKETCHROOM_S3_PREFIX")]
    s3_prefix: Option<String>,
    #[arg(long, env = "SKETCHROOM_S3_REGION")]
    s3_region: Option<String>,
    #[arg(long, env = "SKETCHROOM_S3_ENDPOINT")]
    s3_endpoint: Option<String>,
    #[arg(long, env = "SKETCHROOM_S3_FORCE_PATH_STYLE")]
    s3_force_path_style: bool,
    #[arg(long, env = "SKETCHROOM_S3_ACCESS_KEY_ID")]
    s3_access_key_id: Option<String>,
    #[arg(long, env = "SKETCHROOM_S3_SECRET_ACCESS_KEY", hide_env_values = true)]
    s3_secret_access_key: Option<String>,
}

impl Args {
    fn into_config(self) -> ServerConfig {
        let storage = match self.s3_bucket {
            Some(bucket) => {
                let mut s3 = S3StoreConfig::new(bucket);
                s3.prefix = self.s3_prefix;
                s3.region = self.s3_region;
                s3.endpoint_url = self.s3_endpoint;
                s3.force_path_style = self.s3_force_path_style;
                s3.access_key_id = self.s3_access_key_id;
                s3.secret_access_key = self.s3_secret_access_key;
                StorageConfig::S3(s3)
            }
            None => StorageConfig::File {
                snapshot_dir: self.snapshot_dir.unwrap_or_else(|| {
                    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../snapshots")
                }),
            },
        };
        ServerConfig {
            addr: SocketAddr::new(self.host, self.port),
            storage,
            outbound_capacity: self.outbound_capacity,
            relay_capacity: self.relay_capacity,
            csrf_token: self.csrf_token,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sketchroom_server=info,tower_http=info".into()),
        )
        .init();

    let config = Args::parse().into_config();
    let state = AppState::from_config(&config)
        .await
        .context("failed to open snapshot store")?;

    let listener = tokio::net::TcpListener::bind(config.addr)
        .await
        .with_context(|| format!("failed to bind {}", config.addr))?;
    info!(addr = %config.addr, "whiteboard relay listening");
    serve(listener, state).await.context("server crashed")?;
    Ok(())
}
