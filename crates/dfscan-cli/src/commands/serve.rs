//! Serve command - expose the frame classifier over HTTP.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use dfscan_adapters::{router, serve, HttpConfig};
use tokio::net::TcpListener;
use tracing::info;

use super::ModelArgs;
use crate::config::AppConfig;

/// Default listen address, where the browser clients post.
pub const DEFAULT_BIND: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 8000);

/// Arguments for the serve command.
#[derive(Args, Clone, Default)]
pub struct ServeArgs {
    #[command(flatten)]
    pub models: ModelArgs,

    /// Address to listen on
    #[arg(long, value_name = "ADDR", env = "DFSCAN_BIND")]
    pub bind: Option<SocketAddr>,

    /// Origin allowed to call the API from a browser
    #[arg(long, value_name = "ORIGIN")]
    pub allowed_origin: Option<String>,

    /// Largest accepted upload, in bytes
    #[arg(
        long,
        value_name = "BYTES",
        value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..)
    )]
    pub max_upload_bytes: Option<usize>,
}

impl ServeArgs {
    /// Apply configuration file values, respecting CLI precedence.
    pub fn with_config(mut args: Self, config: &AppConfig) -> Self {
        args.models = ModelArgs::with_config(args.models, config);
        args.bind = args.bind.or_else(|| {
            config
                .server
                .bind
                .as_deref()
                .and_then(|s| s.parse().ok())
        });
        if args.allowed_origin.is_none() {
            args.allowed_origin.clone_from(&config.server.allowed_origin);
        }
        args.max_upload_bytes = args
            .max_upload_bytes
            .or_else(|| config.server.max_upload_bytes.filter(|&n| n > 0));
        args
    }

    fn bind(&self) -> SocketAddr {
        self.bind.unwrap_or(DEFAULT_BIND)
    }

    fn http_config(&self) -> HttpConfig {
        let defaults = HttpConfig::default();
        HttpConfig {
            allowed_origin: self
                .allowed_origin
                .clone()
                .unwrap_or(defaults.allowed_origin),
            max_upload_bytes: self
                .max_upload_bytes
                .unwrap_or(defaults.max_upload_bytes),
        }
    }
}

/// Run the serve command.
///
/// The model pool is fully loaded before the listener is bound; a weight set
/// that fails to load stops the process without serving.
///
/// Expects `args` to have been processed through `with_config()` first.
pub fn run(args: &ServeArgs) -> Result<()> {
    let analyzer = Arc::new(args.models.build_analyzer()?);
    let http = args.http_config();
    let app = router(analyzer, &http)?;
    info!(
        origin = %http.allowed_origin,
        max_upload_bytes = http.max_upload_bytes,
        "Router ready"
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;

    let addr = args.bind();
    runtime.block_on(async move {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind {addr}"))?;
        serve(listener, app).await
    })
}
