//! Narrow interfaces to the external REST collaborators, plus the
//! reqwest-backed implementations and null stand-ins for wiring without a
//! configured backend.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use shared::{
    domain::{AgreementDecision, AgreementId, UserId},
    error::CollaboratorError,
    protocol::{Agreement, ChatMessage, NewAgreement},
};

/// One-shot fetch of the historical timeline for a peer pair. The server
/// makes no ordering promise; the caller merges through the same ordering
/// policy as live traffic.
#[async_trait]
pub trait HistoryService: Send + Sync {
    async fn load_history(
        &self,
        sender_id: &UserId,
        receiver_id: &UserId,
    ) -> Result<Vec<ChatMessage>, CollaboratorError>;
}

/// Stores an image payload and returns the URL to embed in the message.
#[async_trait]
pub trait ImageStore: Send + Sync {
    async fn upload(&self, filename: &str, bytes: Vec<u8>) -> Result<String, CollaboratorError>;
}

#[async_trait]
pub trait AgreementService: Send + Sync {
    async fn create(&self, request: &NewAgreement) -> Result<Agreement, CollaboratorError>;
    async fn update_status(
        &self,
        agreement_id: AgreementId,
        decision: AgreementDecision,
    ) -> Result<Agreement, CollaboratorError>;
}

pub struct MissingHistoryService;

#[async_trait]
impl HistoryService for MissingHistoryService {
    async fn load_history(
        &self,
        _sender_id: &UserId,
        _receiver_id: &UserId,
    ) -> Result<Vec<ChatMessage>, CollaboratorError> {
        Err(CollaboratorError::Unavailable {
            service: "history service",
        })
    }
}

pub struct MissingImageStore;

#[async_trait]
impl ImageStore for MissingImageStore {
    async fn upload(&self, _filename: &str, _bytes: Vec<u8>) -> Result<String, CollaboratorError> {
        Err(CollaboratorError::Unavailable {
            service: "image store",
        })
    }
}

pub struct MissingAgreementService;

#[async_trait]
impl AgreementService for MissingAgreementService {
    async fn create(&self, _request: &NewAgreement) -> Result<Agreement, CollaboratorError> {
        Err(CollaboratorError::Unavailable {
            service: "agreement service",
        })
    }

    async fn update_status(
        &self,
        _agreement_id: AgreementId,
        _decision: AgreementDecision,
    ) -> Result<Agreement, CollaboratorError> {
        Err(CollaboratorError::Unavailable {
            service: "agreement service",
        })
    }
}

fn http_error(service: &'static str, err: reqwest::Error) -> CollaboratorError {
    CollaboratorError::Http {
        service,
        reason: err.to_string(),
    }
}

async fn check_status(
    service: &'static str,
    response: reqwest::Response,
) -> Result<reqwest::Response, CollaboratorError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    if status == StatusCode::CONFLICT {
        return Err(CollaboratorError::DuplicatePendingAgreement);
    }
    Err(CollaboratorError::Status {
        service,
        status: status.as_u16(),
        message,
    })
}

pub struct RestHistoryService {
    http: Client,
    base_url: String,
}

impl RestHistoryService {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl HistoryService for RestHistoryService {
    async fn load_history(
        &self,
        sender_id: &UserId,
        receiver_id: &UserId,
    ) -> Result<Vec<ChatMessage>, CollaboratorError> {
        const SERVICE: &str = "history service";
        let response = self
            .http
            .get(format!(
                "{}/api/messages/{}/{}",
                self.base_url, sender_id, receiver_id
            ))
            .send()
            .await
            .map_err(|err| http_error(SERVICE, err))?;
        check_status(SERVICE, response)
            .await?
            .json()
            .await
            .map_err(|err| http_error(SERVICE, err))
    }
}

#[derive(Debug, Deserialize)]
struct ImageUploadResponse {
    url: String,
}

pub struct RestImageStore {
    http: Client,
    base_url: String,
}

impl RestImageStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl ImageStore for RestImageStore {
    async fn upload(&self, filename: &str, bytes: Vec<u8>) -> Result<String, CollaboratorError> {
        const SERVICE: &str = "image store";
        let response = self
            .http
            .post(format!("{}/api/images", self.base_url))
            .query(&[("filename", filename)])
            .body(bytes)
            .send()
            .await
            .map_err(|err| http_error(SERVICE, err))?;
        let body: ImageUploadResponse = check_status(SERVICE, response)
            .await?
            .json()
            .await
            .map_err(|err| http_error(SERVICE, err))?;
        Ok(body.url)
    }
}

pub struct RestAgreementService {
    http: Client,
    base_url: String,
}

impl RestAgreementService {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl AgreementService for RestAgreementService {
    async fn create(&self, request: &NewAgreement) -> Result<Agreement, CollaboratorError> {
        const SERVICE: &str = "agreement service";
        let response = self
            .http
            .post(format!("{}/api/agreements", self.base_url))
            .json(request)
            .send()
            .await
            .map_err(|err| http_error(SERVICE, err))?;
        check_status(SERVICE, response)
            .await?
            .json()
            .await
            .map_err(|err| http_error(SERVICE, err))
    }

    async fn update_status(
        &self,
        agreement_id: AgreementId,
        decision: AgreementDecision,
    ) -> Result<Agreement, CollaboratorError> {
        const SERVICE: &str = "agreement service";
        let response = self
            .http
            .put(format!(
                "{}/api/agreements/{}/status",
                self.base_url, agreement_id
            ))
            .json(&decision)
            .send()
            .await
            .map_err(|err| http_error(SERVICE, err))?;
        check_status(SERVICE, response)
            .await?
            .json()
            .await
            .map_err(|err| http_error(SERVICE, err))
    }
}
