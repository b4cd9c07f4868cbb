use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::{net::TcpListener, sync::RwLock};
use tracing::{debug, info};
use uuid::Uuid;

pub const AUTH_TOKEN_HEADER: &str = "Auth-Token";

type Rejection = (StatusCode, &'static str);

#[derive(Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

#[derive(Default)]
struct Store {
    users: HashMap<String, String>,
    tokens: HashSet<String>,
    collections: HashMap<String, BTreeMap<String, Value>>,
}

/// Shared server state. Clones share the same store.
#[derive(Clone, Default)]
pub struct AppState {
    store: Arc<RwLock<Store>>,
    require_auth: bool,
}

impl AppState {
    /// State whose collections reject requests without a valid token.
    pub fn with_auth() -> Self {
        Self {
            require_auth: true,
            ..Self::default()
        }
    }

    pub async fn add_user(&self, username: &str, password: &str) {
        self.store
            .write()
            .await
            .users
            .insert(username.to_string(), password.to_string());
    }

    /// Invalidates every issued token, as a server-side session expiry would.
    pub async fn revoke_tokens(&self) {
        self.store.write().await.tokens.clear();
    }

    pub async fn active_tokens(&self) -> usize {
        self.store.read().await.tokens.len()
    }

    async fn authorize(&self, headers: &HeaderMap) -> Result<(), Rejection> {
        if !self.require_auth {
            return Ok(());
        }
        let token = headers
            .get(AUTH_TOKEN_HEADER)
            .and_then(|value| value.to_str().ok());
        match token {
            Some(token) if self.store.read().await.tokens.contains(token) => Ok(()),
            _ => Err((StatusCode::UNAUTHORIZED, "unauthorized")),
        }
    }

    async fn issue_token(&self) -> String {
        let token = Uuid::new_v4().to_string();
        self.store.write().await.tokens.insert(token.clone());
        token
    }
}

/// Router with open collections.
pub fn app() -> Router {
    router(AppState::default())
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/auth/login", post(login))
        .route("/auth/logout", post(logout))
        .route("/auth/enroll", post(enroll))
        .route("/{collection}", get(list_records).post(create_record))
        .route(
            "/{collection}/{id}",
            get(get_record).put(update_record).delete(delete_record),
        )
        .with_state(state)
}

pub async fn serve(listener: TcpListener, state: AppState) -> Result<(), std::io::Error> {
    axum::serve(listener, router(state)).await
}

async fn login(
    State(state): State<AppState>,
    Json(input): Json<Credentials>,
) -> Result<([(&'static str, String); 1], Json<Value>), Rejection> {
    let known = state.store.read().await.users.get(&input.username) == Some(&input.password);
    if !known {
        return Err((StatusCode::UNAUTHORIZED, "invalid credentials"));
    }
    let token = state.issue_token().await;
    info!(username = %input.username, "login");
    Ok(([(AUTH_TOKEN_HEADER, token)], Json(json!({ "username": input.username }))))
}

async fn logout(State(state): State<AppState>, headers: HeaderMap) -> StatusCode {
    let token = headers
        .get(AUTH_TOKEN_HEADER)
        .and_then(|value| value.to_str().ok());
    let removed = match token {
        Some(token) => state.store.write().await.tokens.remove(token),
        None => false,
    };
    if removed {
        StatusCode::OK
    } else {
        StatusCode::UNAUTHORIZED
    }
}

async fn enroll(
    State(state): State<AppState>,
    Json(mut input): Json<Value>,
) -> Result<([(&'static str, String); 1], Json<Value>), Rejection> {
    let (Some(username), Some(password)) = (
        input.get("username").and_then(Value::as_str).map(str::to_string),
        input.get("password").and_then(Value::as_str).map(str::to_string),
    ) else {
        return Err((StatusCode::BAD_REQUEST, "username and password required"));
    };
    {
        let mut store = state.store.write().await;
        if store.users.contains_key(&username) {
            return Err((StatusCode::CONFLICT, "user exists"));
        }
        store.users.insert(username.clone(), password);
    }
    let token = state.issue_token().await;
    if let Some(fields) = input.as_object_mut() {
        fields.remove("password");
    }
    info!(%username, "enroll");
    Ok(([(AUTH_TOKEN_HEADER, token)], Json(input)))
}

async fn list_records(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(collection): Path<String>,
    Query(mut params): Query<HashMap<String, String>>,
) -> Result<Json<Vec<Value>>, Rejection> {
    state.authorize(&headers).await?;
    let offset = parse_bound(params.remove("offset"))?.unwrap_or(0);
    let limit = parse_bound(params.remove("limit"))?.unwrap_or(usize::MAX);

    let store = state.store.read().await;
    let records = store
        .collections
        .get(&collection)
        .map(|records| {
            records
                .values()
                .filter(|record| matches_all(record, &params))
                .skip(offset)
                .take(limit)
                .cloned()
                .collect()
        })
        .unwrap_or_default();
    Ok(Json(records))
}

async fn create_record(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(collection): Path<String>,
    Json(mut record): Json<Value>,
) -> Result<(StatusCode, Json<Value>), Rejection> {
    state.authorize(&headers).await?;
    let Some(fields) = record.as_object_mut() else {
        return Err((StatusCode::UNPROCESSABLE_ENTITY, "record must be an object"));
    };
    let id = match fields.get("id") {
        Some(Value::String(id)) if !id.is_empty() => id.clone(),
        _ => Uuid::new_v4().to_string(),
    };
    fields.insert("id".to_string(), Value::String(id.clone()));

    debug!(%collection, %id, "create");
    state
        .store
        .write()
        .await
        .collections
        .entry(collection)
        .or_default()
        .insert(id, record.clone());
    Ok((StatusCode::CREATED, Json(record)))
}

async fn get_record(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((collection, id)): Path<(String, String)>,
) -> Result<Json<Value>, Rejection> {
    state.authorize(&headers).await?;
    let store = state.store.read().await;
    store
        .collections
        .get(&collection)
        .and_then(|records| records.get(&id))
        .cloned()
        .map(Json)
        .ok_or((StatusCode::NOT_FOUND, "not found"))
}

async fn update_record(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((collection, id)): Path<(String, String)>,
    Json(mut record): Json<Value>,
) -> Result<Json<Value>, Rejection> {
    state.authorize(&headers).await?;
    let Some(fields) = record.as_object_mut() else {
        return Err((StatusCode::UNPROCESSABLE_ENTITY, "record must be an object"));
    };
    fields.insert("id".to_string(), Value::String(id.clone()));

    let mut store = state.store.write().await;
    let existing = store
        .collections
        .get_mut(&collection)
        .and_then(|records| records.get_mut(&id))
        .ok_or((StatusCode::NOT_FOUND, "not found"))?;
    *existing = record.clone();
    Ok(Json(record))
}

async fn delete_record(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((collection, id)): Path<(String, String)>,
) -> Result<StatusCode, Rejection> {
    state.authorize(&headers).await?;
    let mut store = state.store.write().await;
    store
        .collections
        .get_mut(&collection)
        .and_then(|records| records.remove(&id))
        .map(|_| StatusCode::NO_CONTENT)
        .ok_or((StatusCode::NOT_FOUND, "not found"))
}

fn parse_bound(raw: Option<String>) -> Result<Option<usize>, Rejection> {
    raw.map(|value| value.parse())
        .transpose()
        .map_err(|_| (StatusCode::BAD_REQUEST, "limit and offset must be numbers"))
}

fn matches_all(record: &Value, params: &HashMap<String, String>) -> bool {
    params.iter().all(|(field, expected)| match record.get(field) {
        Some(Value::String(actual)) => actual == expected,
        Some(other) => other.to_string() == *expected,
        None => false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credentials_require_both_fields() {
        let input: Credentials =
            serde_json::from_str(r#"{"username":"john","password":"123"}"#).unwrap();
        assert_eq!(input.username, "john");
        assert!(serde_json::from_str::<Credentials>(r#"{"username":"john"}"#).is_err());
    }

    #[test]
    fn filter_matches_strings_and_scalars() {
        let record = json!({ "id": "1", "title": "milk", "done": true, "rank": 3 });
        let mut params = HashMap::new();
        params.insert("title".to_string(), "milk".to_string());
        params.insert("done".to_string(), "true".to_string());
        params.insert("rank".to_string(), "3".to_string());
        assert!(matches_all(&record, &params));

        params.insert("missing".to_string(), "x".to_string());
        assert!(!matches_all(&record, &params));
    }

    #[test]
    fn empty_filter_matches_everything() {
        assert!(matches_all(&json!({}), &HashMap::new()));
    }

    #[test]
    fn bounds_must_be_numeric() {
        assert_eq!(parse_bound(Some("5".to_string())).unwrap(), Some(5));
        assert_eq!(parse_bound(None).unwrap(), None);
        assert!(parse_bound(Some("five".to_string())).is_err());
    }

    #[tokio::test]
    async fn open_state_authorizes_without_token() {
        let state = AppState::default();
        assert!(state.authorize(&HeaderMap::new()).await.is_ok());
    }

    #[tokio::test]
    async fn guarded_state_checks_tokens() {
        let state = AppState::with_auth();
        assert!(state.authorize(&HeaderMap::new()).await.is_err());

        let token = state.issue_token().await;
        let mut headers = HeaderMap::new();
        headers.insert(AUTH_TOKEN_HEADER, token.parse().unwrap());
        assert!(state.authorize(&headers).await.is_ok());

        state.revoke_tokens().await;
        assert!(state.authorize(&headers).await.is_err());
    }
}
