//! Read-only client for a Firestore-style REST document API.
//!
//! Documents arrive with typed values (`{"stringValue": "x"}`,
//! `{"mapValue": {"fields": {..}}}`, ...); they are flattened to plain JSON
//! before mapping.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use recap_protocol::{CollectionRef, DocumentStorePort, RetrievalError, StoredDocument};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, instrument, warn};

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    documents: Vec<RestDocument>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RestDocument {
    name: String,
    #[serde(default)]
    fields: Map<String, Value>,
    #[serde(default)]
    update_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct RestDocumentStore {
    client: Client,
    base_url: String,
    bearer_token: Option<String>,
}

impl RestDocumentStore {
    /// `base_url` is the documents root, e.g.
    /// `https://firestore.googleapis.com/v1/projects/<p>/databases/(default)/documents`.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, RetrievalError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| RetrievalError::Unavailable(error.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            bearer_token: None,
        })
    }

    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }
}

#[async_trait]
impl DocumentStorePort for RestDocumentStore {
    #[instrument(skip(self), fields(collection = %collection))]
    async fn list_recent(
        &self,
        collection: &CollectionRef,
        limit: usize,
    ) -> Result<Vec<StoredDocument>, RetrievalError> {
        let url = format!("{}/{}", self.base_url, collection.as_str());
        let mut request = self
            .client
            .get(&url)
            .query(&[("pageSize", limit.to_string())]);
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|error| RetrievalError::Unavailable(error.to_string()))?;

        let status = response.status();
        if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
            let body = response.text().await.unwrap_or_default();
            warn!(%status, "document store refused credentials");
            return Err(RetrievalError::PermissionDenied(format!("HTTP {status}: {body}")));
        }
        if status == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RetrievalError::Unavailable(format!("HTTP {status}: {body}")));
        }

        let listed: ListResponse = response.json().await.map_err(|error| RetrievalError::Malformed {
            id: collection.to_string(),
            message: error.to_string(),
        })?;

        let documents: Vec<StoredDocument> = listed
            .documents
            .into_iter()
            .take(limit)
            .map(|doc| {
                let id = doc.name.rsplit('/').next().unwrap_or_default().to_owned();
                StoredDocument {
                    path: collection.document_path(&id),
                    id,
                    fields: decode_fields(&doc.fields),
                    updated_at: doc.update_time,
                }
            })
            .collect();
        debug!(count = documents.len(), "documents listed");
        Ok(documents)
    }
}

pub fn decode_fields(fields: &Map<String, Value>) -> Map<String, Value> {
    fields
        .iter()
        .map(|(key, value)| (key.clone(), decode_value(value)))
        .collect()
}

/// Flattens one typed value. Unknown wrappers pass through untouched.
pub fn decode_value(value: &Value) -> Value {
    let Some(typed) = value.as_object() else {
        return value.clone();
    };
    let Some((tag, inner)) = typed.iter().next().filter(|_| typed.len() == 1) else {
        return value.clone();
    };
    match tag.as_str() {
        "stringValue" | "timestampValue" | "referenceValue" | "bytesValue" => inner.clone(),
        "booleanValue" | "doubleValue" => inner.clone(),
        "integerValue" => match inner {
            Value::String(raw) => raw
                .parse::<i64>()
                .map(Value::from)
                .unwrap_or_else(|_| inner.clone()),
            other => other.clone(),
        },
        "nullValue" => Value::Null,
        "arrayValue" => Value::Array(
            inner
                .get("values")
                .and_then(Value::as_array)
                .map(|values| values.iter().map(decode_value).collect())
                .unwrap_or_default(),
        ),
        "mapValue" => Value::Object(
            inner
                .get("fields")
                .and_then(Value::as_object)
                .map(decode_fields)
                .unwrap_or_default(),
        ),
        "geoPointValue" => inner.clone(),
        _ => value.clone(),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use recap_protocol::{CollectionRef, DocumentStorePort, RetrievalError};
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::{RestDocumentStore, decode_value};

    fn collection() -> CollectionRef {
        CollectionRef::from_template(CollectionRef::DEFAULT_TEMPLATE, "diligent4")
    }

    #[test]
    fn decodes_nested_typed_values() {
        let decoded = decode_value(&json!({
            "mapValue": { "fields": {
                "title": { "stringValue": "Release prep" },
                "duration": { "integerValue": "420" },
                "score": { "doubleValue": 0.88 },
                "published": { "booleanValue": true },
                "archived": { "nullValue": null },
                "steps": { "arrayValue": { "values": [
                    { "mapValue": { "fields": { "action": { "stringValue": "Tag build" } } } }
                ] } },
                "empty": { "arrayValue": {} }
            } }
        }));
        assert_eq!(
            decoded,
            json!({
                "title": "Release prep",
                "duration": 420,
                "score": 0.88,
                "published": true,
                "archived": null,
                "steps": [{ "action": "Tag build" }],
                "empty": []
            })
        );
    }

    #[tokio::test]
    async fn lists_and_decodes_documents() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(
                "/organizations/diligent4/published/meta/workflows_versions",
            ))
            .and(query_param("pageSize", "5"))
            .and(header("authorization", "Bearer secret-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "documents": [{
                    "name": "projects/p/databases/(default)/documents/organizations/diligent4/published/meta/workflows_versions/wf_91",
                    "fields": { "title": { "stringValue": "Budget review" } },
                    "updateTime": "2025-08-20T10:00:00Z"
                }]
            })))
            .mount(&server)
            .await;

        let store = RestDocumentStore::new(server.uri(), Duration::from_secs(2))
            .unwrap()
            .with_bearer_token("secret-token");
        let docs = store.list_recent(&collection(), 5).await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].id, "wf_91");
        assert_eq!(docs[0].fields["title"], "Budget review");
        assert!(docs[0].updated_at.is_some());
    }

    #[tokio::test]
    async fn forbidden_is_permission_denied() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403).set_body_string("missing IAM role"))
            .mount(&server)
            .await;

        let store = RestDocumentStore::new(server.uri(), Duration::from_secs(2)).unwrap();
        let err = store.list_recent(&collection(), 5).await.unwrap_err();
        assert!(matches!(err, RetrievalError::PermissionDenied(_)));
    }

    #[tokio::test]
    async fn empty_collection_has_no_documents() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .mount(&server)
            .await;

        let store = RestDocumentStore::new(server.uri(), Duration::from_secs(2)).unwrap();
        assert!(store.list_recent(&collection(), 5).await.unwrap().is_empty());
    }
}
