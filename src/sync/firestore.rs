use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value, json};

use crate::storage::config::RemoteConfig;
use crate::sync::remote::{Collection, RemoteDocument, RemoteError, RemoteStore, SnapshotListener, Subscription};

/// Fields stored as Firestore timestamps rather than plain strings.
const TIMESTAMP_FIELDS: &[&str] = &["date", "recurrenceEndDate"];

/// REST client for a Firestore-compatible document store.
///
/// Firestore's REST surface has no push channel, so subscriptions poll the
/// owner-scoped query and emit a snapshot whenever the result set changes.
#[derive(Clone)]
pub struct FirestoreStore {
    base_url: String,
    project_id: String,
    id_token: Option<String>,
    poll_interval: Duration,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct FirestoreDocument {
    name: String,
    #[serde(default)]
    fields: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct RunQueryItem {
    document: Option<FirestoreDocument>,
}

impl FirestoreStore {
    pub fn new(project_id: String) -> Self {
        Self {
            base_url: "https://firestore.googleapis.com/v1".to_string(),
            project_id,
            id_token: None,
            poll_interval: Duration::from_secs(10),
            client: reqwest::Client::new(),
        }
    }

    pub fn from_config(config: &RemoteConfig) -> Self {
        let store = Self::new(config.project_id.clone())
            .with_base_url(config.base_url.clone())
            .with_poll_interval(Duration::from_secs(config.poll_interval_seconds.max(1)));
        match &config.id_token {
            Some(token) => store.with_id_token(token.clone()),
            None => store,
        }
    }

    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }

    pub fn with_id_token(mut self, id_token: String) -> Self {
        self.id_token = Some(id_token);
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    fn documents_url(&self) -> String {
        format!("{}/projects/{}/databases/(default)/documents", self.base_url, self.project_id)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.id_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Fetches every document in `collection` whose `ownerId` equals `owner_id`, ordered by id.
    pub async fn query_owned(&self, collection: Collection, owner_id: &str) -> Result<Vec<RemoteDocument>, RemoteError> {
        let url = format!("{}:runQuery", self.documents_url());
        let query = json!({
            "structuredQuery": {
                "from": [{ "collectionId": collection.name() }],
                "where": {
                    "fieldFilter": {
                        "field": { "fieldPath": "ownerId" },
                        "op": "EQUAL",
                        "value": { "stringValue": owner_id },
                    }
                }
            }
        });

        let response = self.authorize(self.client.post(&url)).json(&query).send().await?;
        let response = check_status(response, collection.name()).await?;

        let items: Vec<RunQueryItem> = response.json().await?;
        let mut documents: Vec<RemoteDocument> = items
            .into_iter()
            .filter_map(|item| item.document)
            .map(from_firestore_document)
            .collect();
        documents.sort_by(|a, b| a.id.cmp(&b.id));

        tracing::debug!("Queried {} {} documents for {}", documents.len(), collection, owner_id);
        Ok(documents)
    }
}

#[async_trait]
impl RemoteStore for FirestoreStore {
    fn subscribe(
        &self,
        collection: Collection,
        owner_id: &str,
        listener: SnapshotListener,
    ) -> Result<Subscription, RemoteError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| RemoteError::Unavailable(format!("No async runtime for polling: {}", e)))?;
        let store = self.clone();
        let owner_id = owner_id.to_string();

        let task = runtime.spawn(async move {
            let mut ticker = tokio::time::interval(store.poll_interval);
            let mut last: Option<Vec<RemoteDocument>> = None;
            loop {
                ticker.tick().await;
                match store.query_owned(collection, &owner_id).await {
                    Ok(documents) => {
                        if last.as_ref() != Some(&documents) {
                            listener(Ok(documents.clone()));
                            last = Some(documents);
                        }
                    }
                    Err(e) => {
                        tracing::error!("Polling {} for {} failed: {}", collection, owner_id, e);
                        listener(Err(e));
                        break;
                    }
                }
            }
        });

        Ok(Subscription::new(move || task.abort()))
    }

    async fn insert(&self, collection: Collection, fields: Map<String, Value>) -> Result<String, RemoteError> {
        let url = format!("{}/{}", self.documents_url(), collection.name());
        tracing::info!("Creating {} document", collection);

        let response = self
            .authorize(self.client.post(&url))
            .json(&json!({ "fields": to_firestore_fields(&fields) }))
            .send()
            .await?;
        let response = check_status(response, collection.name()).await?;

        let created: FirestoreDocument = response.json().await?;
        let id = document_id(&created.name)
            .ok_or_else(|| RemoteError::ParseError(format!("Invalid document name: {}", created.name)))?;
        tracing::info!("Created {} document {}", collection, id);
        Ok(id)
    }

    async fn replace(&self, collection: Collection, id: &str, fields: Map<String, Value>) -> Result<(), RemoteError> {
        let url = format!("{}/{}/{}", self.documents_url(), collection.name(), id);
        tracing::info!("Replacing {} document {}", collection, id);

        let response = self
            .authorize(self.client.patch(&url))
            .json(&json!({ "fields": to_firestore_fields(&fields) }))
            .send()
            .await?;
        check_status(response, id).await?;
        Ok(())
    }

    async fn delete(&self, collection: Collection, id: &str) -> Result<(), RemoteError> {
        let url = format!("{}/{}/{}", self.documents_url(), collection.name(), id);
        tracing::info!("Deleting {} document {}", collection, id);

        let response = self.authorize(self.client.delete(&url)).send().await?;
        check_status(response, id).await?;
        Ok(())
    }
}

async fn check_status(response: reqwest::Response, subject: &str) -> Result<reqwest::Response, RemoteError> {
    let status = response.status();

    if status == 401 || status == 403 {
        tracing::error!("Authentication failed for {}", subject);
        return Err(RemoteError::AuthenticationFailed);
    }

    if status == 404 {
        return Err(RemoteError::NotFound(subject.to_string()));
    }

    if status == 429 {
        tracing::warn!("Rate limit exceeded");
        return Err(RemoteError::RateLimited);
    }

    if !status.is_success() {
        let body = response.text().await?;
        tracing::error!("Request for {} failed. Status: {}, Body: {}", subject, status, body);
        return Err(RemoteError::RequestError(format!("Status {}: {}", status, body)));
    }

    Ok(response)
}

fn document_id(name: &str) -> Option<String> {
    name.rsplit('/').next().filter(|id| !id.is_empty()).map(str::to_string)
}

fn from_firestore_document(document: FirestoreDocument) -> RemoteDocument {
    let id = document_id(&document.name).unwrap_or(document.name);
    let fields = document
        .fields
        .iter()
        .map(|(key, value)| (key.clone(), from_firestore_value(value)))
        .collect();
    RemoteDocument::new(id, fields)
}

fn from_firestore_value(value: &Value) -> Value {
    let Some(typed) = value.as_object() else {
        return Value::Null;
    };

    if let Some(integer) = typed.get("integerValue") {
        // Firestore sends 64-bit integers as strings.
        return integer
            .as_str()
            .and_then(|raw| raw.parse::<i64>().ok())
            .map(Value::from)
            .unwrap_or_else(|| integer.clone());
    }
    if let Some(map) = typed.get("mapValue") {
        let fields = map
            .get("fields")
            .and_then(Value::as_object)
            .map(|fields| {
                fields
                    .iter()
                    .map(|(key, value)| (key.clone(), from_firestore_value(value)))
                    .collect()
            })
            .unwrap_or_default();
        return Value::Object(fields);
    }
    if let Some(array) = typed.get("arrayValue") {
        let values = array
            .get("values")
            .and_then(Value::as_array)
            .map(|values| values.iter().map(from_firestore_value).collect())
            .unwrap_or_default();
        return Value::Array(values);
    }

    ["stringValue", "booleanValue", "doubleValue", "timestampValue"]
        .iter()
        .find_map(|kind| typed.get(*kind).cloned())
        .unwrap_or(Value::Null)
}

fn to_firestore_fields(fields: &Map<String, Value>) -> Map<String, Value> {
    fields
        .iter()
        .map(|(key, value)| (key.clone(), to_firestore_value(key, value)))
        .collect()
}

fn to_firestore_value(key: &str, value: &Value) -> Value {
    match value {
        Value::Null => json!({ "nullValue": null }),
        Value::Bool(flag) => json!({ "booleanValue": flag }),
        Value::Number(number) if number.is_i64() || number.is_u64() => {
            json!({ "integerValue": number.to_string() })
        }
        Value::Number(number) => json!({ "doubleValue": number }),
        Value::String(text) if TIMESTAMP_FIELDS.contains(&key) => json!({ "timestampValue": text }),
        Value::String(text) => json!({ "stringValue": text }),
        Value::Array(values) => json!({
            "arrayValue": { "values": values.iter().map(|value| to_firestore_value(key, value)).collect::<Vec<_>>() }
        }),
        Value::Object(fields) => json!({ "mapValue": { "fields": to_firestore_fields(fields) } }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use pretty_assertions::assert_eq;
    use tokio::sync::mpsc;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const DOCUMENTS: &str = "/projects/demo/databases/(default)/documents";

    fn store_for(server: &MockServer) -> FirestoreStore {
        FirestoreStore::new("demo".to_string())
            .with_base_url(server.uri())
            .with_poll_interval(Duration::from_millis(20))
    }

    fn person_fields() -> Map<String, Value> {
        json!({
            "name": "Ada",
            "color": { "red": 0.5, "green": 0.0, "blue": 1.0, "alpha": 1.0 },
            "isParent": true,
            "ownerId": "owner-1",
        })
        .as_object()
        .cloned()
        .unwrap()
    }

    fn firestore_person(id: &str) -> Value {
        json!({
            "name": format!("projects/demo/databases/(default)/documents/people/{}", id),
            "fields": {
                "name": { "stringValue": "Ada" },
                "color": { "mapValue": { "fields": {
                    "red": { "doubleValue": 0.5 },
                    "green": { "integerValue": "0" },
                    "blue": { "doubleValue": 1.0 },
                    "alpha": { "doubleValue": 1.0 },
                } } },
                "isParent": { "booleanValue": true },
                "ownerId": { "stringValue": "owner-1" },
            }
        })
    }

    #[test]
    fn encodes_typed_values() {
        let mut fields = person_fields();
        fields.insert("date".to_string(), json!("2025-01-07T08:00:00Z"));
        fields.insert("dayOfWeek".to_string(), json!(3));

        let typed = to_firestore_fields(&fields);

        assert_eq!(typed["name"], json!({ "stringValue": "Ada" }));
        assert_eq!(typed["isParent"], json!({ "booleanValue": true }));
        assert_eq!(typed["dayOfWeek"], json!({ "integerValue": "3" }));
        assert_eq!(typed["date"], json!({ "timestampValue": "2025-01-07T08:00:00Z" }));
        assert_eq!(typed["color"]["mapValue"]["fields"]["red"], json!({ "doubleValue": 0.5 }));
    }

    #[test]
    fn decodes_typed_values() {
        let document: FirestoreDocument = serde_json::from_value(firestore_person("p1")).unwrap();

        let decoded = from_firestore_document(document);

        assert_eq!(decoded.id, "p1");
        assert_eq!(decoded.fields["name"], json!("Ada"));
        assert_eq!(decoded.fields["color"]["green"], json!(0));
        assert_eq!(decoded.fields["isParent"], json!(true));
    }

    #[tokio::test]
    async fn insert_returns_id_from_document_name() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(format!("{}/people", DOCUMENTS)))
            .and(body_partial_json(json!({ "fields": { "name": { "stringValue": "Ada" } } })))
            .respond_with(ResponseTemplate::new(200).set_body_json(firestore_person("abc123")))
            .mount(&server)
            .await;

        let id = store_for(&server).insert(Collection::People, person_fields()).await.unwrap();

        assert_eq!(id, "abc123");
    }

    #[tokio::test]
    async fn replace_sends_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path(format!("{}/people/p1", DOCUMENTS)))
            .and(header("authorization", "Bearer secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(firestore_person("p1")))
            .expect(1)
            .mount(&server)
            .await;

        let store = store_for(&server).with_id_token("secret".to_string());

        store.replace(Collection::People, "p1", person_fields()).await.unwrap();
    }

    #[tokio::test]
    async fn unauthorized_delete_is_authentication_failure() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path(format!("{}/events/e1", DOCUMENTS)))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let result = store_for(&server).delete(Collection::Events, "e1").await;

        assert!(matches!(result, Err(RemoteError::AuthenticationFailed)));
    }

    #[tokio::test]
    async fn query_filters_by_owner_and_skips_empty_results() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(format!("{}:runQuery", DOCUMENTS)))
            .and(body_partial_json(json!({ "structuredQuery": { "where": { "fieldFilter": {
                "value": { "stringValue": "owner-1" }
            } } } })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "document": firestore_person("p2"), "readTime": "2025-01-07T08:00:00Z" },
                { "document": firestore_person("p1"), "readTime": "2025-01-07T08:00:00Z" },
                { "readTime": "2025-01-07T08:00:00Z" },
            ])))
            .mount(&server)
            .await;

        let documents = store_for(&server).query_owned(Collection::People, "owner-1").await.unwrap();

        let ids: Vec<_> = documents.iter().map(|document| document.id.as_str()).collect();
        assert_eq!(ids, vec!["p1", "p2"]);
    }

    #[tokio::test]
    async fn polling_subscription_delivers_snapshot_then_stops_after_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(format!("{}:runQuery", DOCUMENTS)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{ "document": firestore_person("p1") }])))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(format!("{}:runQuery", DOCUMENTS)))
            .respond_with(ResponseTemplate::new(500).set_body_string("backend down"))
            .mount(&server)
            .await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let listener: SnapshotListener = Arc::new(move |result| {
            let _ = tx.send(result.map(|documents| documents.len()));
        });
        let _subscription = store_for(&server).subscribe(Collection::People, "owner-1", listener).unwrap();

        let first = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.unwrap();
        let second = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.unwrap();
        let after_error = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.unwrap();

        assert_eq!(first.unwrap().unwrap(), 1);
        assert!(matches!(second, Some(Err(RemoteError::RequestError(_)))));
        assert!(after_error.is_none());
    }
}
