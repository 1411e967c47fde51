use crate::api::{create_router, AppState};
use crate::objects::ObjectStore;
use chrono::Duration;
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::net::TcpListener;
use tracing::{info, warn};

/// Reference cloud store: grants short-lived transfer targets and keeps the
/// objects on local disk.
pub struct RemoteServer {
    listener: TcpListener,
    state: AppState,
}

impl RemoteServer {
    pub async fn bind(
        addr: SocketAddr,
        data_dir: PathBuf,
        access_token: Option<String>,
    ) -> anyhow::Result<Self> {
        let objects = ObjectStore::open(data_dir)?;
        if access_token.is_none() {
            warn!("No access token configured, transfer targets are issued to anyone");
        }
        let listener = TcpListener::bind(addr).await?;

        Ok(Self {
            listener,
            state: AppState::new(objects, access_token),
        })
    }

    pub fn with_grant_ttl(mut self, ttl: Duration) -> Self {
        self.state = self.state.with_grant_ttl(ttl);
        self
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub async fn serve(self) -> anyhow::Result<()> {
        let app = create_router(self.state.clone());

        info!("Server listening on {}", self.local_addr()?);
        info!("Objects stored under {:?}", self.state.objects.root());

        axum::serve(self.listener, app).await?;

        Ok(())
    }
}
