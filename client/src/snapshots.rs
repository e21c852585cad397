//! Client for the snapshot store's HTTP API.

use reqwest::{RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use sketchroom_shared::{Snapshot, SnapshotBody, SnapshotCreated};
use tracing::{debug, info};

use crate::error::SnapshotError;
use crate::surface::Raster;

pub const CSRF_HEADER: &str = "x-csrf-token";

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

/// Request/response calls against `/snapshots`. Nothing is retried.
#[derive(Clone, Debug)]
pub struct SnapshotGateway {
    http: reqwest::Client,
    base_url: String,
    csrf_token: Option<String>,
}

impl SnapshotGateway {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    pub fn with_client(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            csrf_token: None,
        }
    }

    pub fn with_csrf_token(mut self, token: impl Into<String>) -> Self {
        self.csrf_token = Some(token.into());
        self
    }

    pub async fn create(&self, name: &str, raster: &Raster) -> Result<String, SnapshotError> {
        let token = self.token()?;
        let body = SnapshotBody {
            name: name.to_string(),
            image: raster.encode(),
        };
        let response = self
            .http
            .post(self.url(None))
            .header(CSRF_HEADER, token)
            .json(&body)
            .send()
            .await?;
        let created: SnapshotCreated = check(response, None).await?.json().await?;
        info!(id = %created.id, name, "snapshot saved");
        Ok(created.id)
    }

    pub async fn update(&self, id: &str, name: &str, raster: &Raster) -> Result<(), SnapshotError> {
        let token = self.token()?;
        let body = SnapshotBody {
            name: name.to_string(),
            image: raster.encode(),
        };
        let request = self.http.put(self.url(Some(id))).header(CSRF_HEADER, token);
        send(request.json(&body), id).await?;
        info!(id, name, "snapshot updated");
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<Snapshot, SnapshotError> {
        let response = send(self.http.get(self.url(Some(id))), id).await?;
        Ok(response.json().await?)
    }

    /// Fetches a snapshot and decodes its image for [`crate::Whiteboard::load`].
    pub async fn get_raster(&self, id: &str) -> Result<Raster, SnapshotError> {
        let snapshot = self.get(id).await?;
        Ok(Raster::decode(&snapshot.image)?)
    }

    pub async fn list(&self) -> Result<Vec<Snapshot>, SnapshotError> {
        let response = self.http.get(self.url(None)).send().await?;
        Ok(check(response, None).await?.json().await?)
    }

    pub async fn delete(&self, id: &str) -> Result<(), SnapshotError> {
        let token = self.token()?;
        let request = self.http.delete(self.url(Some(id))).header(CSRF_HEADER, token);
        send(request, id).await?;
        info!(id, "snapshot deleted");
        Ok(())
    }

    fn token(&self) -> Result<&str, SnapshotError> {
        self.csrf_token
            .as_deref()
            .filter(|token| !token.is_empty())
            .ok_or(SnapshotError::MissingToken)
    }

    fn url(&self, id: Option<&str>) -> String {
        match id {
            Some(id) => format!("{}/snapshots/{id}", self.base_url),
            None => format!("{}/snapshots", self.base_url),
        }
    }
}

async fn send(request: RequestBuilder, id: &str) -> Result<Response, SnapshotError> {
    let response = request.send().await?;
    check(response, Some(id)).await
}

async fn check(response: Response, id: Option<&str>) -> Result<Response, SnapshotError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if let (StatusCode::NOT_FOUND, Some(id)) = (status, id) {
        return Err(SnapshotError::NotFound(id.to_string()));
    }
    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&text)
        .map(|body| body.error)
        .unwrap_or(text);
    debug!(status = status.as_u16(), %message, "snapshot request rejected");
    Err(SnapshotError::Persistence {
        status: status.as_u16(),
        message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mutating_calls_need_a_token_before_any_io() {
        // Nothing listens on this port; a missing token must fail first.
        let gateway = SnapshotGateway::new("http://127.0.0.1:9/");
        let raster = Raster::blank(1, 1);
        assert!(matches!(
            gateway.create("sketch1", &raster).await,
            Err(SnapshotError::MissingToken)
        ));
        assert!(matches!(
            gateway.update("id", "sketch1", &raster).await,
            Err(SnapshotError::MissingToken)
        ));
        assert!(matches!(
            gateway.delete("id").await,
            Err(SnapshotError::MissingToken)
        ));
        let empty = gateway.with_csrf_token("");
        assert!(matches!(
            empty.delete("id").await,
            Err(SnapshotError::MissingToken)
        ));
    }

    #[test]
    fn urls_ignore_trailing_slash() {
        let gateway = SnapshotGateway::new("http://localhost:3000/");
        assert_eq!(gateway.url(None), "http://localhost:3000/snapshots");
        assert_eq!(
            gateway.url(Some("abc")),
            "http://localhost:3000/snapshots/abc"
        );
    }
}
