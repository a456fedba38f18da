use std::collections::HashSet;

use chrono::{TimeDelta, Utc};
use log::{debug, info, warn};
use rspotify::{Credentials, OAuth, Token, model::TrackId, prelude::*};
use url::{Url, form_urlencoded};

use crate::clients::errors::{Error, Result};

/// Web authorization endpoint used when the Spotify app is not the one handling consent.
pub const DEFAULT_AUTHORIZE_ENDPOINT: &str = "https://accounts.spotify.com/authorize";

/// The native Spotify remote-control SDK, as seen by the session.
///
/// Hosts implement this over the vendor SDK; the session only needs the
/// install-and-authorize entry point, the store redirect and the place where
/// the SDK keeps its connection token.
pub trait RemoteSdk {
    /// Runs the combined install check, authorization and auto-play.
    /// Returns `false` when the Spotify app is not installed.
    fn authorize_and_play(&mut self, play_uri: &str) -> bool;

    fn open_store_listing(&mut self, url: &Url);

    fn set_access_token(&mut self, token: &str);
}

/// Connection lifecycle reported by the SDK delegate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Established,
    Failed(Option<String>),
    Disconnected(Option<String>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthPhase {
    Unauthenticated,
    AwaitingCallback,
    Authenticated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorizeOutcome {
    /// Spotify app opened for user consent
    AwaitingCallback,
    /// Spotify app missing, user sent to the store listing
    RedirectedToStore,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackOutcome {
    Authenticated,
    TokenReplaced,
    Rejected(String),
}

/// Settings for the authorization handshake.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub credentials: Credentials,
    pub oauth: OAuth,
    pub redirect_url: Url,
    pub play_uri: TrackId<'static>,
    pub store_url: Url,
    pub authorize_endpoint: Url,
}

/// Parameters carried by an authorization callback URL.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CallbackParams {
    pub access_token: Option<String>,
    pub token_type: Option<String>,
    pub expires_in: Option<i64>,
    pub scope: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

impl CallbackParams {
    /// Collects parameters from the query string, then the fragment.
    /// A key present in both takes the fragment's value.
    pub fn from_url(url: &Url) -> Self {
        let mut params = CallbackParams::default();
        for (key, value) in url.query_pairs() {
            params.set(&key, value.into_owned());
        }
        if let Some(fragment) = url.fragment() {
            for (key, value) in form_urlencoded::parse(fragment.as_bytes()) {
                params.set(&key, value.into_owned());
            }
        }
        params
    }

    fn set(&mut self, key: &str, value: String) {
        if value.is_empty() {
            return;
        }
        match key {
            "access_token" => self.access_token = Some(value),
            "token_type" => self.token_type = Some(value),
            "expires_in" => match value.parse() {
                Ok(secs) => self.expires_in = Some(secs),
                Err(e) => debug!("Ignoring non-numeric expires_in {value:?}: {e}"),
            },
            "scope" => self.scope = Some(value),
            "state" => self.state = Some(value),
            "error" => self.error = Some(value),
            "error_description" => self.error_description = Some(value),
            _ => debug!("Ignoring unknown callback parameter {key:?}"),
        }
    }

    fn into_token(self, access_token: String) -> Token {
        // zero, negative or unrepresentable lifetimes are treated as no expiry
        let lifetime = self
            .expires_in
            .filter(|secs| *secs > 0)
            .and_then(TimeDelta::try_seconds)
            .and_then(|delta| Utc::now().checked_add_signed(delta).map(|at| (delta, at)));
        if lifetime.is_none()
            && let Some(secs) = self.expires_in
        {
            debug!("Ignoring unusable expires_in {secs}, token has no known expiry");
        }
        let (expires_in, expires_at) = match lifetime {
            Some((delta, at)) => (delta, Some(at)),
            None => (TimeDelta::zero(), None),
        };
        let scopes: HashSet<String> = self
            .scope
            .as_deref()
            .unwrap_or_default()
            .split_whitespace()
            .map(str::to_owned)
            .collect();

        Token {
            access_token,
            expires_in,
            expires_at,
            scopes,
            ..Default::default()
        }
    }
}

// `Token::is_expired` counts a token without `expires_at` as expired
fn has_expired(token: &Token) -> bool {
    token.expires_at.is_some() && token.is_expired()
}

/// Owns the authorization lifecycle with the Spotify SDK.
pub struct SessionManager<S: RemoteSdk> {
    sdk: S,
    config: SessionConfig,
    phase: AuthPhase,
    token: Option<Token>,
    issued_state: Option<String>,
    connected: bool,
}

impl<S: RemoteSdk> SessionManager<S> {
    pub fn new(sdk: S, config: SessionConfig) -> Self {
        SessionManager {
            sdk,
            config,
            phase: AuthPhase::Unauthenticated,
            token: None,
            issued_state: None,
            connected: false,
        }
    }

    pub fn phase(&self) -> AuthPhase {
        self.phase
    }

    pub fn sdk(&self) -> &S {
        &self.sdk
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn is_authenticated(&self) -> bool {
        self.phase == AuthPhase::Authenticated && self.access_token().is_some()
    }

    /// The bearer token, unless the session is unauthenticated or the token expired.
    pub fn access_token(&self) -> Option<&str> {
        let token = self.token.as_ref()?;
        if has_expired(token) {
            debug!("Access token expired at {:?}", token.expires_at);
            return None;
        }
        Some(token.access_token.as_str())
    }

    /// Starts the Spotify app authorization, playing the configured track on success.
    pub fn authorize(&mut self) -> AuthorizeOutcome {
        let play_uri = self.config.play_uri.uri();
        debug!("Requesting Spotify authorization with auto-play of {play_uri}");
        if self.sdk.authorize_and_play(&play_uri) {
            info!("Spotify is installed. Opening the app for authorization...");
            if self.phase == AuthPhase::Unauthenticated {
                self.phase = AuthPhase::AwaitingCallback;
            }
            AuthorizeOutcome::AwaitingCallback
        } else {
            info!("Spotify is not installed on the device. Redirecting to the store...");
            self.sdk.open_store_listing(&self.config.store_url);
            if self.token.is_none() {
                self.phase = AuthPhase::Unauthenticated;
            }
            AuthorizeOutcome::RedirectedToStore
        }
    }

    /// Builds the web authorization URL (implicit grant) for hosts without the Spotify app.
    pub fn authorize_url(&mut self) -> Url {
        let mut scopes: Vec<&str> = self.config.oauth.scopes.iter().map(String::as_str).collect();
        scopes.sort_unstable();

        let mut url = self.config.authorize_endpoint.clone();
        url.query_pairs_mut()
            .append_pair("client_id", &self.config.credentials.id)
            .append_pair("response_type", "token")
            .append_pair("redirect_uri", self.config.redirect_url.as_str())
            .append_pair("scope", &scopes.join(" "))
            .append_pair("state", &self.config.oauth.state);

        self.issued_state = Some(self.config.oauth.state.clone());
        if self.phase == AuthPhase::Unauthenticated {
            self.phase = AuthPhase::AwaitingCallback;
        }
        debug!("Built Spotify authorization URL");
        url
    }

    /// Handles the callback URL delivered by the OS once authorization completes.
    pub fn handle_open_url(&mut self, raw_url: &str) -> Result<CallbackOutcome> {
        let url = Url::parse(raw_url)
            .map_err(|e| Error::InvalidCallback(format!("{raw_url}: {e}")))?;
        let redirect = &self.config.redirect_url;
        if url.scheme() != redirect.scheme() || url.host_str() != redirect.host_str() {
            return Err(Error::InvalidCallback(format!(
                "{raw_url} does not match redirect URI {redirect}"
            )));
        }

        let params = CallbackParams::from_url(&url);
        if let (Some(expected), Some(actual)) = (&self.issued_state, &params.state)
            && expected != actual
        {
            warn!("Callback state mismatch, ignoring callback");
            return Err(Error::StateMismatch {
                expected: expected.clone(),
                actual: actual.clone(),
            });
        }

        if let Some(access_token) = params.access_token.clone() {
            let token = params.into_token(access_token);
            if has_expired(&token) {
                return Err(Error::InvalidCallback(format!(
                    "access token expires at {:?}, too soon to use",
                    token.expires_at
                )));
            }
            self.sdk.set_access_token(&token.access_token);
            let replaced = self.token.replace(token).is_some();
            self.phase = AuthPhase::Authenticated;
            self.issued_state = None;
            if replaced {
                info!("Access token replaced");
                Ok(CallbackOutcome::TokenReplaced)
            } else {
                info!("Access token received, session authenticated");
                Ok(CallbackOutcome::Authenticated)
            }
        } else if let Some(description) = params.error_description.or(params.error) {
            warn!("Authentication error: {description}");
            if self.phase == AuthPhase::AwaitingCallback {
                self.phase = AuthPhase::Unauthenticated;
            }
            Ok(CallbackOutcome::Rejected(description))
        } else {
            Err(Error::InvalidCallback(format!(
                "{raw_url} carries neither an access token nor an error"
            )))
        }
    }

    pub fn on_connection_event(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Established => {
                info!("Connection to Spotify established.");
                self.connected = true;
            }
            ConnectionEvent::Failed(reason) => {
                warn!(
                    "Connection failed: {}",
                    reason.as_deref().unwrap_or("unknown error")
                );
                self.connected = false;
            }
            ConnectionEvent::Disconnected(reason) => {
                match reason {
                    Some(reason) => warn!("Disconnected: {reason}"),
                    None => info!("Disconnected from Spotify"),
                }
                self.connected = false;
            }
        }
    }

    /// Drops the token and returns to the unauthenticated state.
    pub fn sign_out(&mut self) {
        if self.token.take().is_some() {
            info!("Signed out of Spotify");
        }
        self.phase = AuthPhase::Unauthenticated;
        self.issued_state = None;
        self.connected = false;
    }
}
