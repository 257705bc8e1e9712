//! ==============================================================================
//! routes.rs - http handlers
//! ==============================================================================
//!
//! sensor api:
//!     POST /api/sensor_data   store a reading, push it to live viewers
//!     GET  /api/sensor_data   readings from the query window as json
//!     GET  /ws                websocket feed of `sensorData` events
//!
//! accounts:
//!     POST /signup            multipart profile + optional profilePhoto
//!     POST /login             form login
//!     GET  /logout            end the session
//!     POST /api/updateUser    multipart profile update (session required)
//!
//! ==============================================================================

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        FromRequest, Multipart, Request, State,
    },
    http::header::CONTENT_TYPE,
    response::{IntoResponse, Redirect, Response},
    Form, Json,
};
use axum_extra::extract::cookie::CookieJar;
use chrono::Utc;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::domain::{Reading, SensorSubmission};
use crate::error::AppError;
use crate::hub::BroadcastHub;
use crate::ingest::ingest;
use crate::query::recent;
use crate::session::{removal_cookie, session_cookie, CurrentUser, SessionUser};
use crate::state::AppState;
use crate::users::{validate_username, NewUser, ProfileUpdate};

pub const PHOTO_FIELD: &str = "profilePhoto";
const UPLOADS_PREFIX: &str = "/uploads/";

// ==============================================================================
// sensor api
// ==============================================================================

/// a sensor payload sent either as json or as an urlencoded form
///
/// form values arrive as strings and are stored as strings.
pub struct Submission(pub SensorSubmission);

#[axum::async_trait]
impl<S: Send + Sync> FromRequest<S> for Submission {
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let urlencoded = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|mime| mime.starts_with("application/x-www-form-urlencoded"));

        if urlencoded {
            let Form(submission) = Form::<SensorSubmission>::from_request(req, state)
                .await
                .map_err(IntoResponse::into_response)?;
            Ok(Self(submission))
        } else {
            let Json(submission) = Json::<SensorSubmission>::from_request(req, state)
                .await
                .map_err(IntoResponse::into_response)?;
            Ok(Self(submission))
        }
    }
}

pub async fn post_sensor_data(
    State(state): State<AppState>,
    Submission(submission): Submission,
) -> Result<&'static str, AppError> {
    ingest(
        state.store.clone(),
        state.hub.clone(),
        submission,
        state.config.logging.show_sensor_data,
    )
    .await
    .map_err(AppError::SensorWrite)?;

    Ok("Data received and stored")
}

pub async fn get_sensor_data(
    State(state): State<AppState>,
    current: CurrentUser,
) -> Result<Json<Vec<Reading>>, AppError> {
    if state.config.query.require_session && current.user.is_none() {
        return Err(AppError::Unauthorized);
    }

    let readings = recent(state.store.clone(), Utc::now(), state.config.query.window())
        .await
        .map_err(AppError::SensorRead)?;

    Ok(Json(readings))
}

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let hub = state.hub.clone();
    let send_timeout = state.config.broadcast.send_timeout();
    ws.on_upgrade(move |socket| stream_readings(socket, hub, send_timeout))
}

/// forward hub events to one viewer until either side goes away
async fn stream_readings(mut socket: WebSocket, hub: BroadcastHub, send_timeout: Duration) {
    let mut subscription = hub.subscribe();
    let id = subscription.id();
    info!(subscriber = id, "[WS] viewer connected");

    loop {
        tokio::select! {
            event = subscription.recv() => {
                let Some(event) = event else { break };
                let text = match serde_json::to_string(&*event) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(subscriber = id, error = %e, "[WS] failed to encode event");
                        continue;
                    }
                };
                match tokio::time::timeout(send_timeout, socket.send(Message::Text(text))).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        debug!(subscriber = id, error = %e, "[WS] send failed");
                        break;
                    }
                    Err(_) => {
                        warn!(subscriber = id, "[WS] send timed out, dropping viewer");
                        break;
                    }
                }
            }
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    debug!(subscriber = id, error = %e, "[WS] receive failed");
                    break;
                }
                Some(Ok(_)) => {}
            },
        }
    }

    drop(subscription);
    info!(subscriber = id, "[WS] viewer disconnected");
}

// ==============================================================================
// accounts
// ==============================================================================

#[derive(Deserialize)]
pub struct LoginForm {
    username: String,
    password: String,
}

pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    Form(form): Form<LoginForm>,
) -> Result<Response, AppError> {
    let users = state.users.clone();
    let LoginForm { username, password } = form;
    let record = tokio::task::spawn_blocking(move || users.verify(&username, &password))
        .await??
        .ok_or(AppError::InvalidCredentials)?;

    info!(username = %record.username, "user signed in");
    Ok(start_session(&state, jar, SessionUser::from(&record)))
}

pub async fn signup(
    State(state): State<AppState>,
    jar: CookieJar,
    multipart: Multipart,
) -> Result<Response, AppError> {
    let mut form = ProfileForm::read(multipart).await?;
    let username = form.take("username").unwrap_or_default();
    validate_username(&username)?;

    let password = form.take("password").unwrap_or_default();
    if password.is_empty() {
        return Err(AppError::MalformedPayload("password is required".into()));
    }

    let picture = match form.photo.take() {
        Some(photo) => Some(save_photo(&state.config.storage.uploads_dir, photo).await?),
        None => None,
    };

    let new_user = NewUser {
        first_name: form.take("firstname").unwrap_or_default(),
        last_name: form.take("lastname").unwrap_or_default(),
        username,
        email: form.take("email").unwrap_or_default(),
        password,
        profile_picture: picture.clone(),
    };

    let users = state.users.clone();
    let created = tokio::task::spawn_blocking(move || users.create(new_user)).await?;
    let record = match created {
        Ok(record) => record,
        Err(e) => {
            if let Some(picture) = picture {
                remove_photo(&state.config.storage.uploads_dir, &picture).await;
            }
            return Err(e.into());
        }
    };

    info!(username = %record.username, "user signed up");
    Ok(start_session(&state, jar, SessionUser::from(&record)))
}

pub async fn logout(State(state): State<AppState>, current: CurrentUser, jar: CookieJar) -> Response {
    if let Some(token) = current.token.as_deref() {
        if let Some(user) = state.sessions.destroy(token) {
            info!(username = %user.username, "user signed out");
        }
    }

    let jar = jar.remove(removal_cookie(&state.config.session.cookie_name));
    (jar, Redirect::to("/")).into_response()
}

pub async fn update_user(
    State(state): State<AppState>,
    current: CurrentUser,
    multipart: Multipart,
) -> Result<&'static str, AppError> {
    let (Some(token), Some(user)) = (current.token, current.user) else {
        return Err(AppError::Unauthorized);
    };

    let mut form = ProfileForm::read(multipart).await?;
    let uploads_dir = state.config.storage.uploads_dir.clone();
    let picture = match form.photo.take() {
        Some(photo) => Some(save_photo(&uploads_dir, photo).await?),
        None => None,
    };

    let update = ProfileUpdate {
        first_name: form.take("firstname"),
        last_name: form.take("lastname"),
        password: form.take("password"),
        profile_picture: picture.clone(),
    };

    let users = state.users.clone();
    let username = user.username.clone();
    let updated = tokio::task::spawn_blocking(move || users.update(&username, update)).await?;
    let (record, replaced) = match updated {
        Ok(result) => result,
        Err(e) => {
            if let Some(picture) = picture {
                remove_photo(&uploads_dir, &picture).await;
            }
            return Err(e.into());
        }
    };

    if let Some(old) = replaced {
        remove_photo(&uploads_dir, &old).await;
    }
    state.sessions.refresh(&token, SessionUser::from(&record));

    info!(username = %record.username, "user profile updated");
    Ok("User updated successfully")
}

fn start_session(state: &AppState, jar: CookieJar, user: SessionUser) -> Response {
    let token = state.sessions.create(user);
    debug!(sessions = state.sessions.held(), "session started");
    let cookie = session_cookie(
        &state.config.session.cookie_name,
        token,
        state.config.session.secure_cookie,
    );
    (jar.add(cookie), Redirect::to("/dashboard")).into_response()
}

// ==============================================================================
// multipart profile forms and photo files
// ==============================================================================

struct UploadedPhoto {
    file_name: Option<String>,
    bytes: Bytes,
}

#[derive(Default)]
struct ProfileForm {
    fields: HashMap<String, String>,
    photo: Option<UploadedPhoto>,
}

impl ProfileForm {
    async fn read(mut multipart: Multipart) -> Result<Self, AppError> {
        let mut form = Self::default();

        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| AppError::MalformedPayload(e.to_string()))?
        {
            let name = field.name().unwrap_or_default().to_string();
            if name == PHOTO_FIELD {
                let file_name = field.file_name().map(str::to_string);
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::MalformedPayload(e.to_string()))?;
                // browsers send an empty part when no file was picked
                if !bytes.is_empty() {
                    form.photo = Some(UploadedPhoto { file_name, bytes });
                }
            } else {
                let value = field
                    .text()
                    .await
                    .map_err(|e| AppError::MalformedPayload(e.to_string()))?;
                form.fields.insert(name, value);
            }
        }

        Ok(form)
    }

    fn take(&mut self, name: &str) -> Option<String> {
        self.fields.remove(name)
    }
}

fn upload_file_name(original: Option<&str>) -> String {
    let extension = original
        .and_then(|name| Path::new(name).extension())
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|ext| format!(".{ext}"))
        .unwrap_or_default();

    format!(
        "{PHOTO_FIELD}-{}-{}{extension}",
        Utc::now().timestamp_millis(),
        uuid::Uuid::new_v4().simple()
    )
}

/// write the photo into `uploads_dir`, returning its public path
async fn save_photo(uploads_dir: &Path, photo: UploadedPhoto) -> Result<String, AppError> {
    let name = upload_file_name(photo.file_name.as_deref());
    tokio::fs::write(uploads_dir.join(&name), &photo.bytes)
        .await
        .map_err(|e| AppError::Internal(Box::new(e)))?;

    Ok(format!("{UPLOADS_PREFIX}{name}"))
}

fn stored_photo_path(uploads_dir: &Path, public_path: &str) -> Option<PathBuf> {
    let name = public_path.strip_prefix(UPLOADS_PREFIX)?;
    let plain = !name.is_empty() && !name.contains(['/', '\\']) && name != "." && name != "..";
    plain.then(|| uploads_dir.join(name))
}

async fn remove_photo(uploads_dir: &Path, public_path: &str) {
    let Some(path) = stored_photo_path(uploads_dir, public_path) else {
        return;
    };
    match tokio::fs::remove_file(&path).await {
        Ok(()) => debug!(path = %path.display(), "old profile photo removed"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "failed to remove profile photo"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_names_keep_a_plain_extension() {
        let name = upload_file_name(Some("me.PNG"));
        assert!(name.starts_with("profilePhoto-"));
        assert!(name.ends_with(".PNG"));

        assert!(!upload_file_name(Some("noext")).contains('.'));
        assert!(!upload_file_name(Some("evil.p/ng")).contains('/'));
        assert_ne!(upload_file_name(None), upload_file_name(None));
    }

    #[test]
    fn only_plain_upload_paths_are_removable() {
        let dir = Path::new("/srv/uploads");
        assert_eq!(
            stored_photo_path(dir, "/uploads/a.png"),
            Some(PathBuf::from("/srv/uploads/a.png"))
        );
        assert_eq!(stored_photo_path(dir, "/uploads/../data/x"), None);
        assert_eq!(stored_photo_path(dir, "/elsewhere/a.png"), None);
        assert_eq!(stored_photo_path(dir, "/uploads/"), None);
    }
}
