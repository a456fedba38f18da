use std::env::VarError;

use futures::future::{AbortHandle, Abortable};
use log::{debug, info, warn};
use rspotify::{Credentials, OAuth, model::TrackId, scopes};
use tokio::sync::mpsc;
use url::Url;

use crate::clients::{
    entities::{ScreenPoint, TrackResult},
    errors::{Error, Result},
    map::{LocationEvent, MapConfig, MapCoordinator, MapProjection, MapSurface},
    session::{
        AuthorizeOutcome, ConnectionEvent, DEFAULT_AUTHORIZE_ENDPOINT, RemoteSdk, SessionConfig,
        SessionManager,
    },
    spotify::{DEFAULT_API_BASE, DEFAULT_SEARCH_LIMIT, SearchClient},
};

/// Redirect URI registered for the app.
pub const DEFAULT_REDIRECT_URI: &str = "musichive://callback";
/// Track started in the Spotify app once authorization succeeds.
pub const DEFAULT_PLAY_URI: &str = "spotify:track:69bp2EbF7Q2rqc5N3ylezZ";
/// Spotify listing in the App Store.
pub const DEFAULT_STORE_URL: &str =
    "https://apps.apple.com/se/app/spotify-musik-och-poddar/id324684580";

// Configuration shared by the session, the search client and the map
#[derive(Debug, Clone)]
pub struct Config {
    pub session: SessionConfig,
    pub api_base: String,
    pub search_limit: u32,
    pub map: MapConfig,
}

impl Config {
    /// Builds the configuration from environment variables.
    pub fn try_default() -> Result<Self> {
        ConfigBuilder::new().build()
    }

    pub fn search_client(&self) -> Result<SearchClient> {
        SearchClient::builder()
            .api_base(self.api_base.clone())
            .limit(self.search_limit)
            .build()
    }
}

#[derive(Default)]
pub struct ConfigBuilder {
    client_id: Option<String>,
    redirect_uri: Option<String>,
    play_uri: Option<String>,
    store_url: Option<String>,
    api_base: Option<String>,
    search_limit: Option<u32>,
    map: Option<MapConfig>,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn client_id(mut self, id: impl Into<String>) -> Self {
        self.client_id = Some(id.into());
        self
    }

    #[must_use]
    pub fn redirect_uri(mut self, uri: impl Into<String>) -> Self {
        self.redirect_uri = Some(uri.into());
        self
    }

    #[must_use]
    pub fn play_uri(mut self, uri: impl Into<String>) -> Self {
        self.play_uri = Some(uri.into());
        self
    }

    #[must_use]
    pub fn store_url(mut self, url: impl Into<String>) -> Self {
        self.store_url = Some(url.into());
        self
    }

    #[must_use]
    pub fn api_base(mut self, url: impl Into<String>) -> Self {
        self.api_base = Some(url.into());
        self
    }

    #[must_use]
    pub fn search_limit(mut self, limit: u32) -> Self {
        self.search_limit = Some(limit);
        self
    }

    #[must_use]
    pub fn map(mut self, map: MapConfig) -> Self {
        self.map = Some(map);
        self
    }

    /// Fills unset values from the environment, then from the app defaults.
    pub fn build(self) -> Result<Config> {
        let credentials = match self.client_id {
            Some(id) => Credentials::new_pkce(&id),
            None => Credentials::from_env().ok_or_else(|| {
                Error::ConfigurationError(
                    "Missing Spotify client id. Set RSPOTIFY_CLIENT_ID or pass --client-id.".into(),
                )
            })?,
        };
        if credentials.id.is_empty() {
            return Err(Error::ConfigurationError("Spotify client id is empty".into()));
        }

        let redirect_uri = match self.redirect_uri {
            Some(uri) => uri,
            None => env_opt("MUSICHIVE_REDIRECT_URI")?
                .unwrap_or_else(|| DEFAULT_REDIRECT_URI.to_owned()),
        };
        let redirect_url = Url::parse(&redirect_uri)?;

        let play_uri = match self.play_uri {
            Some(uri) => uri,
            None => env_opt("MUSICHIVE_PLAY_URI")?.unwrap_or_else(|| DEFAULT_PLAY_URI.to_owned()),
        };
        let play_uri = TrackId::from_uri(&play_uri)?.into_static();

        let store_url = Url::parse(self.store_url.as_deref().unwrap_or(DEFAULT_STORE_URL))?;
        let api_base = match self.api_base {
            Some(base) => base,
            None => env_opt("MUSICHIVE_API_BASE")?.unwrap_or_else(|| DEFAULT_API_BASE.to_owned()),
        };

        let oauth = OAuth {
            redirect_uri,
            scopes: scopes!("app-remote-control", "user-read-private"),
            ..Default::default()
        };

        Ok(Config {
            session: SessionConfig {
                credentials,
                oauth,
                redirect_url,
                play_uri,
                store_url,
                authorize_endpoint: Url::parse(DEFAULT_AUTHORIZE_ENDPOINT)?,
            },
            api_base,
            search_limit: self.search_limit.unwrap_or(DEFAULT_SEARCH_LIMIT),
            map: self.map.unwrap_or_default(),
        })
    }
}

fn env_opt(key: &str) -> Result<Option<String>> {
    non_empty(std::env::var(key))
}

// unset and empty variables fall back to defaults, non-UTF-8 values are errors
fn non_empty(value: std::result::Result<String, VarError>) -> Result<Option<String>> {
    match value {
        Ok(v) if !v.is_empty() => Ok(Some(v)),
        Ok(_) | Err(VarError::NotPresent) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Everything that can happen to the app, delivered through one channel.
#[derive(Debug)]
pub enum AppEvent {
    AuthorizeRequested,
    CallbackUrl(String),
    Connection(ConnectionEvent),
    SearchSubmitted(String),
    SearchFinished {
        generation: u64,
        result: Result<Vec<TrackResult>>,
    },
    TrackSelected(usize),
    Location(LocationEvent),
    LongPress(ScreenPoint),
    SignOut,
    Shutdown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    pub generation: u64,
    pub query: String,
    pub token: String,
}

/// Work the reducer asks the runtime to perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    Search(SearchRequest),
}

/// Search results as the UI shows them.
///
/// Each submitted query bumps `generation`; completions for older
/// generations are discarded so a slow response cannot overwrite a newer one.
#[derive(Debug, Default)]
pub struct SearchState {
    generation: u64,
    query: String,
    in_flight: bool,
    results: Vec<TrackResult>,
    error: Option<String>,
    selected: Option<usize>,
}

impl SearchState {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn is_loading(&self) -> bool {
        self.in_flight
    }

    pub fn results(&self) -> &[TrackResult] {
        &self.results
    }

    /// Last failure, as plain text for the UI.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn selected(&self) -> Option<&TrackResult> {
        self.selected.and_then(|i| self.results.get(i))
    }

    /// Starts a new search and returns its generation.
    pub fn begin(&mut self, query: &str) -> u64 {
        self.generation += 1;
        self.query = query.to_owned();
        self.in_flight = true;
        self.error = None;
        self.generation
    }

    /// Applies a finished search. Returns `false` for a superseded generation.
    pub fn complete(&mut self, generation: u64, result: Result<Vec<TrackResult>>) -> bool {
        if generation != self.generation {
            debug!(
                "Dropping stale search results (generation {generation}, current {})",
                self.generation
            );
            return false;
        }
        self.in_flight = false;
        match result {
            Ok(tracks) => {
                info!("Search for {:?} returned {} tracks", self.query, tracks.len());
                for (i, track) in tracks.iter().enumerate() {
                    info!("  [{i}] {track}");
                }
                self.results = tracks;
                self.selected = None;
                self.error = None;
            }
            Err(e) => {
                warn!("Search for {:?} failed: {e}", self.query);
                self.error = Some(e.to_string());
            }
        }
        true
    }

    /// Fails the current search without a request, e.g. when no token is available.
    fn fail(&mut self, err: &Error) {
        warn!("Search for {:?} failed: {err}", self.query);
        self.in_flight = false;
        self.error = Some(err.to_string());
    }

    pub fn select(&mut self, index: usize) -> Option<&TrackResult> {
        if index < self.results.len() {
            self.selected = Some(index);
        } else {
            debug!("Ignoring selection {index}, only {} results", self.results.len());
        }
        self.selected()
    }
}

/// Application state driven by a single-threaded reducer.
pub struct AppState<S: RemoteSdk> {
    pub session: SessionManager<S>,
    pub search: SearchState,
    pub map: MapCoordinator,
}

impl<S: RemoteSdk> AppState<S> {
    pub fn new(
        sdk: S,
        projection: impl MapProjection + Send + 'static,
        config: &Config,
    ) -> Self {
        AppState {
            session: SessionManager::new(sdk, config.session.clone()),
            search: SearchState::default(),
            map: MapCoordinator::new(projection, config.map),
        }
    }

    /// Applies one event. Returns the side effect the runtime must run, if any.
    pub fn reduce(&mut self, event: AppEvent) -> Option<Effect> {
        match event {
            AppEvent::AuthorizeRequested => {
                if self.session.authorize() == AuthorizeOutcome::RedirectedToStore {
                    debug!("Authorization deferred until Spotify is installed");
                }
                None
            }
            AppEvent::CallbackUrl(url) => {
                match self.session.handle_open_url(&url) {
                    Ok(outcome) => debug!("Callback handled: {outcome:?}"),
                    Err(e) => warn!("Ignoring callback: {e}"),
                }
                None
            }
            AppEvent::Connection(event) => {
                self.session.on_connection_event(event);
                None
            }
            AppEvent::SearchSubmitted(query) => {
                let generation = self.search.begin(&query);
                if query.trim().is_empty() {
                    self.search.fail(&Error::EmptyQuery);
                    return None;
                }
                match self.session.access_token() {
                    Some(token) => Some(Effect::Search(SearchRequest {
                        generation,
                        query,
                        token: token.to_owned(),
                    })),
                    None => {
                        self.search.fail(&Error::MissingToken);
                        None
                    }
                }
            }
            AppEvent::SearchFinished { generation, result } => {
                self.search.complete(generation, result);
                None
            }
            AppEvent::TrackSelected(index) => {
                if let Some(track) = self.search.select(index) {
                    info!("Selected {track}");
                }
                None
            }
            AppEvent::Location(event) => {
                self.map.on_location_event(event);
                None
            }
            AppEvent::LongPress(point) => {
                self.map.on_long_press(point, self.search.selected());
                None
            }
            AppEvent::SignOut => {
                self.session.sign_out();
                None
            }
            AppEvent::Shutdown => None,
        }
    }
}

/// Owns the app state and processes events one at a time.
pub struct Runtime<S: RemoteSdk, M: MapSurface> {
    state: AppState<S>,
    client: SearchClient,
    surface: M,
    tx: mpsc::UnboundedSender<AppEvent>,
    rx: mpsc::UnboundedReceiver<AppEvent>,
    in_flight: Option<AbortHandle>,
}

impl<S: RemoteSdk, M: MapSurface> Runtime<S, M> {
    pub fn new(state: AppState<S>, client: SearchClient, surface: M) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Runtime {
            state,
            client,
            surface,
            tx,
            rx,
            in_flight: None,
        }
    }

    /// A sender for feeding events from UI, SDK, location or gesture callbacks.
    pub fn sender(&self) -> mpsc::UnboundedSender<AppEvent> {
        self.tx.clone()
    }

    /// Processes events until `Shutdown` is received, then returns the final state.
    pub async fn run(mut self) -> (AppState<S>, M) {
        info!("Starting MusicHive runtime ...");
        if self.state.map.needs_permission_request() {
            debug!("Location permission not determined yet");
        }
        self.state.map.render(&mut self.surface);

        // `self.tx` keeps the channel open, so recv only ends on Shutdown
        while let Some(event) = self.rx.recv().await {
            if matches!(event, AppEvent::Shutdown) {
                break;
            }
            if let Some(effect) = self.state.reduce(event) {
                self.execute(effect);
            }
            self.state.map.render(&mut self.surface);
        }

        if let Some(handle) = self.in_flight.take() {
            handle.abort();
        }
        info!("MusicHive runtime stopped");
        (self.state, self.surface)
    }

    fn execute(&mut self, effect: Effect) {
        match effect {
            Effect::Search(request) => {
                if let Some(previous) = self.in_flight.take() {
                    debug!("Cancelling superseded search");
                    previous.abort();
                }
                let (handle, registration) = AbortHandle::new_pair();
                self.in_flight = Some(handle);

                let client = self.client.clone();
                let tx = self.tx.clone();
                let search = async move {
                    let result = client
                        .search_tracks(&request.query, Some(&request.token))
                        .await;
                    // receiver gone means the runtime stopped
                    let _ = tx.send(AppEvent::SearchFinished {
                        generation: request.generation,
                        result,
                    });
                };
                tokio::spawn(Abortable::new(search, registration));
            }
        }
    }
}
