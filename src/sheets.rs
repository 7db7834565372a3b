//! Appending expense rows to a Google Sheets worksheet.
//!
//! Authentication uses a service-account key (the JSON blob from
//! `GCP_SERVICE_ACCOUNT_JSON`) exchanged for a bearer token by `yup-oauth2`.
//! The spreadsheet is found by title through the Drive API unless an id is
//! configured, then the row goes through `values:append`.
//!
//! Appends are not idempotent: calling [`SheetAppender::append_row`] twice
//! writes two rows.

use crate::config::SheetConfig;
use crate::error::SheetError;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use tokio::sync::OnceCell;
use tracing::{debug, info};
use yup_oauth2::authenticator::DefaultAuthenticator;

const SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/spreadsheets",
    "https://www.googleapis.com/auth/drive.readonly",
];
const SHEETS_URL: &str = "https://sheets.googleapis.com/v4/spreadsheets";
const DRIVE_FILES_URL: &str = "https://www.googleapis.com/drive/v3/files";

/// Where a row landed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendedRow {
    pub spreadsheet_id: String,
    /// A1 range reported by the API, e.g. `Gastos!A12:E12`.
    pub updated_range: Option<String>,
}

/// Destination for saved expense rows.
#[async_trait]
pub trait SheetAppender: Send + Sync {
    /// Append one row of scalar cells, in column order.
    async fn append_row(&self, row: &[Value]) -> Result<AppendedRow, SheetError>;
}

/// Produces bearer tokens for the Sheets and Drive APIs.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn access_token(&self) -> Result<String, String>;
}

/// [`TokenSource`] for a service-account key.
///
/// The authenticator is built on first use and kept; it caches and refreshes
/// tokens itself.
pub struct ServiceAccountTokens {
    key: yup_oauth2::ServiceAccountKey,
    auth: OnceCell<DefaultAuthenticator>,
}

impl ServiceAccountTokens {
    pub fn new(key: yup_oauth2::ServiceAccountKey) -> Self {
        Self {
            key,
            auth: OnceCell::new(),
        }
    }

    async fn authenticator(&self) -> Result<&DefaultAuthenticator, String> {
        self.auth
            .get_or_try_init(|| async {
                debug!("Building service-account authenticator");
                yup_oauth2::ServiceAccountAuthenticator::builder(self.key.clone())
                    .build()
                    .await
                    .map_err(|e| e.to_string())
            })
            .await
    }
}

#[async_trait]
impl TokenSource for ServiceAccountTokens {
    async fn access_token(&self) -> Result<String, String> {
        let token = self
            .authenticator()
            .await?
            .token(SCOPES)
            .await
            .map_err(|e| e.to_string())?;
        token
            .token()
            .map(str::to_string)
            .ok_or_else(|| "token endpoint returned no access token".to_string())
    }
}

#[derive(Deserialize)]
struct ServiceAccountIdentity {
    client_email: String,
}

/// [`SheetAppender`] for the Google Sheets v4 REST API.
pub struct GoogleSheetsAppender {
    client: reqwest::Client,
    tokens: Arc<dyn TokenSource>,
    client_email: String,
    spreadsheet_name: String,
    worksheet: String,
    spreadsheet_id: Mutex<Option<String>>,
    sheets_url: String,
    drive_url: String,
}

impl GoogleSheetsAppender {
    /// Validate the credential and prepare the client. No network access.
    pub fn new(config: &SheetConfig) -> Result<Self, SheetError> {
        let key = yup_oauth2::parse_service_account_key(config.credentials_json.as_bytes())
            .map_err(|e| SheetError::InvalidCredentials(e.to_string()))?;
        let identity: ServiceAccountIdentity = serde_json::from_str(&config.credentials_json)
            .map_err(|e| SheetError::InvalidCredentials(e.to_string()))?;

        Ok(Self {
            client: reqwest::Client::new(),
            tokens: Arc::new(ServiceAccountTokens::new(key)),
            client_email: identity.client_email,
            spreadsheet_name: config.spreadsheet_name.clone(),
            worksheet: config.worksheet.clone(),
            spreadsheet_id: Mutex::new(config.spreadsheet_id.clone()),
            sheets_url: SHEETS_URL.to_string(),
            drive_url: DRIVE_FILES_URL.to_string(),
        })
    }

    /// Replace the service-account token exchange.
    pub fn with_token_source(mut self, tokens: Arc<dyn TokenSource>) -> Self {
        self.tokens = tokens;
        self
    }

    /// Point at different Sheets and Drive endpoints (proxies, tests).
    pub fn with_endpoints(mut self, sheets_url: impl Into<String>, drive_url: impl Into<String>) -> Self {
        self.sheets_url = sheets_url.into();
        self.drive_url = drive_url.into();
        self
    }

    /// Service-account address the spreadsheet must be shared with.
    pub fn client_email(&self) -> &str {
        &self.client_email
    }

    fn auth_error(&self, detail: impl Into<String>) -> SheetError {
        SheetError::Auth {
            client_email: self.client_email.clone(),
            detail: detail.into(),
        }
    }

    async fn access_token(&self) -> Result<String, SheetError> {
        self.tokens
            .access_token()
            .await
            .map_err(|e| self.auth_error(e))
    }

    fn cached_id(&self) -> Option<String> {
        self.spreadsheet_id.lock().ok().and_then(|g| g.clone())
    }

    async fn spreadsheet_id(&self, token: &str) -> Result<String, SheetError> {
        if let Some(id) = self.cached_id() {
            return Ok(id);
        }

        debug!("Looking up spreadsheet '{}' in Drive", self.spreadsheet_name);
        let response = self
            .client
            .get(&self.drive_url)
            .bearer_auth(token)
            .query(&[
                ("q", drive_query(&self.spreadsheet_name).as_str()),
                ("fields", "files(id,name)"),
                ("pageSize", "10"),
                ("supportsAllDrives", "true"),
                ("includeItemsFromAllDrives", "true"),
            ])
            .send()
            .await
            .map_err(|e| SheetError::AppendFailed(e.without_url().to_string()))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            let body = response.text().await.unwrap_or_default();
            return Err(self.auth_error(format!("Drive lookup HTTP {status}: {}", snippet(&body))));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SheetError::AppendFailed(format!(
                "Drive lookup HTTP {status}: {}",
                snippet(&body)
            )));
        }

        let listing: DriveFileList = response
            .json()
            .await
            .map_err(|e| SheetError::AppendFailed(format!("unexpected Drive response: {e}")))?;

        let id = listing
            .files
            .into_iter()
            .next()
            .map(|f| f.id)
            .ok_or_else(|| SheetError::SpreadsheetNotFound {
                name: self.spreadsheet_name.clone(),
                client_email: self.client_email.clone(),
            })?;

        if let Ok(mut guard) = self.spreadsheet_id.lock() {
            *guard = Some(id.clone());
        }
        Ok(id)
    }
}

#[derive(Deserialize)]
struct DriveFileList {
    #[serde(default)]
    files: Vec<DriveFile>,
}

#[derive(Deserialize)]
struct DriveFile {
    id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AppendResponse {
    updates: Option<AppendUpdates>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AppendUpdates {
    updated_range: Option<String>,
}

#[async_trait]
impl SheetAppender for GoogleSheetsAppender {
    async fn append_row(&self, row: &[Value]) -> Result<AppendedRow, SheetError> {
        let token = self.access_token().await?;
        let spreadsheet_id = self.spreadsheet_id(&token).await?;

        let url = format!(
            "{}/{}/values/{}:append",
            self.sheets_url,
            urlencoding::encode(&spreadsheet_id),
            urlencoding::encode(&worksheet_range(&self.worksheet)),
        );
        let body = json!({ "majorDimension": "ROWS", "values": [row] });

        let response = self
            .client
            .post(&url)
            .bearer_auth(&token)
            .query(&[("valueInputOption", "USER_ENTERED"), ("insertDataOption", "INSERT_ROWS")])
            .json(&body)
            .send()
            .await
            .map_err(|e| SheetError::AppendFailed(e.without_url().to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(classify_append_error(
                status,
                &text,
                &spreadsheet_id,
                &self.worksheet,
                &self.client_email,
            ));
        }

        let parsed: AppendResponse = response
            .json()
            .await
            .map_err(|e| SheetError::AppendFailed(format!("unexpected append response: {e}")))?;
        let updated_range = parsed.updates.and_then(|u| u.updated_range);

        info!(
            spreadsheet = %spreadsheet_id,
            range = updated_range.as_deref().unwrap_or("?"),
            "Appended expense row"
        );
        Ok(AppendedRow {
            spreadsheet_id,
            updated_range,
        })
    }
}

/// `'Sheet name'!A1`, with embedded quotes doubled.
fn worksheet_range(worksheet: &str) -> String {
    format!("'{}'!A1", worksheet.replace('\'', "''"))
}

fn drive_query(name: &str) -> String {
    let escaped = name.replace('\\', "\\\\").replace('\'', "\\'");
    format!(
        "name = '{escaped}' and mimeType = 'application/vnd.google-apps.spreadsheet' and trashed = false"
    )
}

fn snippet(body: &str) -> String {
    body.chars().take(200).collect()
}

fn classify_append_error(
    status: StatusCode,
    body: &str,
    spreadsheet_id: &str,
    worksheet: &str,
    client_email: &str,
) -> SheetError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => SheetError::Auth {
            client_email: client_email.to_string(),
            detail: format!("HTTP {status}: {}", snippet(body)),
        },
        StatusCode::NOT_FOUND => SheetError::SpreadsheetNotFound {
            name: spreadsheet_id.to_string(),
            client_email: client_email.to_string(),
        },
        StatusCode::BAD_REQUEST if body.contains("Unable to parse range") => {
            SheetError::WorksheetNotFound {
                spreadsheet_id: spreadsheet_id.to_string(),
                worksheet: worksheet.to_string(),
            }
        }
        _ => SheetError::AppendFailed(format!("HTTP {status}: {}", snippet(body))),
    }
}
