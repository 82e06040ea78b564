//! REST client for the chat endpoints.
//!
//! All endpoints live under `{api_url}/api/v1/chat/` and answer with the
//! envelope `{"success": bool, "message"?: string, "data"?: ...}`.

use std::time::Duration;

use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use url::Url;

use aether_proto::message::{Message, RoomId, UserId, UserRef};
use aether_proto::room::RoomSummary;

use super::{ApiError, ChatApi, HistoryPage, UserPage};
use crate::session::Credential;

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

const CHAT_PREFIX: &str = "api/v1/chat/";

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    message: Option<String>,
    data: Option<T>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateChat<'a> {
    user_id: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UpdateChat<'a> {
    chat_id: &'a str,
    chat_name: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DeleteChat<'a> {
    chat_id: &'a str,
}

/// [`ChatApi`] over HTTP.
#[derive(Debug, Clone)]
pub struct HttpChatApi {
    client: reqwest::Client,
    base: Url,
}

impl HttpChatApi {
    /// Build a client for the server at `api_url`, authenticating every
    /// request with `credential`.
    ///
    /// # Errors
    ///
    /// Fails when the credential is not a valid header value or the HTTP
    /// client cannot be built.
    pub fn new(api_url: &Url, credential: &Credential, timeout: Duration) -> Result<Self, ApiError> {
        let mut bearer = HeaderValue::from_str(&format!("Bearer {}", credential.as_str()))
            .map_err(|_| ApiError::Rejected("credential is not a valid header".into()))?;
        bearer.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, bearer);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            base: chat_base(api_url)?,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        Ok(self.base.join(path)?)
    }

    async fn read<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ApiError> {
        let status = response.status().as_u16();
        let body = response.text().await?;
        decode_envelope::<T>(status, &body)?
            .ok_or_else(|| ApiError::Decode("response has no data".into()))
    }
}

/// `{api_url}/api/v1/chat/`, whether or not `api_url` ends with a slash.
fn chat_base(api_url: &Url) -> Result<Url, ApiError> {
    let mut root = api_url.clone();
    if !root.path().ends_with('/') {
        let path = format!("{}/", root.path());
        root.set_path(&path);
    }
    Ok(root.join(CHAT_PREFIX)?)
}

/// Check the HTTP status and the envelope, returning the `data` member.
fn decode_envelope<T: DeserializeOwned>(status: u16, body: &str) -> Result<Option<T>, ApiError> {
    if status == 404 {
        return Err(ApiError::NotFound(body.to_string()));
    }
    if !(200..300).contains(&status) {
        let rejection = serde_json::from_str::<Envelope<serde_json::Value>>(body)
            .ok()
            .and_then(|e| e.message);
        return Err(match rejection {
            Some(message) if status == 400 || status == 403 => ApiError::Rejected(message),
            _ => ApiError::Status {
                status,
                body: body.to_string(),
            },
        });
    }
    let envelope: Envelope<T> =
        serde_json::from_str(body).map_err(|e| ApiError::Decode(e.to_string()))?;
    if envelope.success == Some(false) {
        return Err(ApiError::Rejected(
            envelope.message.unwrap_or_else(|| "request failed".into()),
        ));
    }
    Ok(envelope.data)
}

fn has_more(len: usize, limit: u32) -> bool {
    limit > 0 && u32::try_from(len).is_ok_and(|n| n >= limit)
}

impl ChatApi for HttpChatApi {
    async fn fetch_history(
        &self,
        room: &RoomId,
        page: u32,
        limit: u32,
    ) -> Result<HistoryPage, ApiError> {
        let url = self.endpoint(&format!("messages/{room}"))?;
        tracing::debug!(room_id = %room, page, limit, "fetching history");
        let response = self
            .client
            .get(url)
            .query(&[("page", page), ("limit", limit)])
            .send()
            .await?;
        let messages: Vec<Message> = Self::read(response).await?;
        Ok(HistoryPage {
            has_more: has_more(messages.len(), limit),
            messages,
        })
    }

    async fn fetch_rooms(&self) -> Result<Vec<RoomSummary>, ApiError> {
        let response = self.client.get(self.endpoint("get-chats")?).send().await?;
        Self::read(response).await
    }

    async fn create_room(&self, user: &UserId) -> Result<RoomSummary, ApiError> {
        let response = self
            .client
            .post(self.endpoint("create-chat")?)
            .json(&CreateChat {
                user_id: user.as_str(),
            })
            .send()
            .await?;
        Self::read(response).await
    }

    async fn rename_room(&self, room: &RoomId, name: &str) -> Result<RoomSummary, ApiError> {
        let response = self
            .client
            .post(self.endpoint("update-chat")?)
            .json(&UpdateChat {
                chat_id: room.as_str(),
                chat_name: name,
            })
            .send()
            .await?;
        Self::read(response).await
    }

    async fn delete_room(&self, room: &RoomId) -> Result<(), ApiError> {
        let response = self
            .client
            .post(self.endpoint("delete-chat")?)
            .json(&DeleteChat {
                chat_id: room.as_str(),
            })
            .send()
            .await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        decode_envelope::<serde_json::Value>(status, &body).map(|_| ())
    }

    async fn search_users(&self, query: &str, page: u32, limit: u32) -> Result<UserPage, ApiError> {
        let response = self
            .client
            .get(self.endpoint("list-users")?)
            .query(&[
                ("search", query.to_string()),
                ("page", page.to_string()),
                ("limit", limit.to_string()),
            ])
            .send()
            .await?;
        let users: Vec<UserRef> = Self::read(response).await?;
        Ok(UserPage {
            has_more: has_more(users.len(), limit),
            users,
        })
    }
}
