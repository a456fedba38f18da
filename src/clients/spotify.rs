use std::time::Duration;

use log::debug;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Deserializer};
use url::Url;

use crate::clients::{
    entities::TrackResult,
    errors::{Error, Result},
};

/// Base URL of the Spotify Web API.
pub const DEFAULT_API_BASE: &str = "https://api.spotify.com/v1";
/// Number of tracks requested per search.
pub const DEFAULT_SEARCH_LIMIT: u32 = 10;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Deserialize, Debug)]
struct SearchResponse {
    tracks: TrackPage,
}

#[derive(Deserialize, Debug)]
struct TrackPage {
    items: Vec<ApiTrack>,
}

#[derive(Deserialize, Debug)]
struct ApiTrack {
    name: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    artists: Vec<ApiArtist>,
    album: Option<ApiAlbum>,
}

#[derive(Deserialize, Debug)]
struct ApiArtist {
    name: String,
}

#[derive(Deserialize, Debug)]
struct ApiAlbum {
    #[serde(default, deserialize_with = "null_as_empty")]
    images: Vec<ApiImage>,
}

#[derive(Deserialize, Debug)]
struct ApiImage {
    url: String,
}

// The Web API sends `null` for some empty lists
fn null_as_empty<'de, D, T>(deserializer: D) -> std::result::Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Deserialize, Debug)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Deserialize, Debug)]
struct ApiErrorDetail {
    message: String,
}

impl From<ApiTrack> for TrackResult {
    fn from(t: ApiTrack) -> TrackResult {
        let artist = t
            .artists
            .into_iter()
            .map(|a| a.name)
            .collect::<Vec<_>>()
            .join(", ");
        // Spotify lists album images largest first
        let image_url = t
            .album
            .into_iter()
            .flat_map(|album| album.images)
            .find_map(|image| match Url::parse(&image.url) {
                Ok(url) => Some(url),
                Err(e) => {
                    debug!("Skipping invalid image URL {:?}: {e}", image.url);
                    None
                }
            });

        TrackResult {
            name: t.name,
            artist,
            image_url,
        }
    }
}

/// Parses a Spotify search response body into track results, keeping response order.
pub fn parse_search_response(body: &str) -> Result<Vec<TrackResult>> {
    let response: SearchResponse = serde_json::from_str(body)?;
    Ok(response
        .tracks
        .items
        .into_iter()
        .map(TrackResult::from)
        .collect())
}

/// Client for the Spotify Web API track search.
#[derive(Debug, Clone)]
pub struct SearchClient {
    client: Client,
    api_base: String,
    limit: u32,
}

impl SearchClient {
    pub fn new() -> Result<Self> {
        Self::builder().build()
    }

    pub fn builder() -> SearchClientBuilder {
        SearchClientBuilder::default()
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    /// Searches tracks matching `query` using the given bearer token.
    pub async fn search_tracks(&self, query: &str, token: Option<&str>) -> Result<Vec<TrackResult>> {
        let token = token.filter(|t| !t.is_empty()).ok_or(Error::MissingToken)?;
        let query = query.trim();
        if query.is_empty() {
            return Err(Error::EmptyQuery);
        }

        let mut url = Url::parse(&format!("{}/search", self.api_base))?;
        url.query_pairs_mut()
            .append_pair("q", query)
            .append_pair("type", "track")
            .append_pair("limit", &self.limit.to_string());

        debug!("Searching Spotify tracks for {query:?}");
        let response = self.client.get(url).bearer_auth(token).send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(api_error(status, &body));
        }

        let tracks = parse_search_response(&body)?;
        debug!("Found {} tracks for {query:?}", tracks.len());
        Ok(tracks)
    }
}

fn api_error(status: StatusCode, body: &str) -> Error {
    let message = serde_json::from_str::<ApiErrorBody>(body)
        .map(|b| b.error.message)
        .unwrap_or_else(|_| {
            status
                .canonical_reason()
                .unwrap_or("unexpected response")
                .to_owned()
        });
    Error::Api {
        status: status.as_u16(),
        message,
    }
}

pub struct SearchClientBuilder {
    client: Option<Client>,
    api_base: String,
    limit: u32,
    timeout: Duration,
    user_agent: Option<String>,
}

impl Default for SearchClientBuilder {
    fn default() -> Self {
        SearchClientBuilder {
            client: None,
            api_base: DEFAULT_API_BASE.to_owned(),
            limit: DEFAULT_SEARCH_LIMIT,
            timeout: DEFAULT_TIMEOUT,
            user_agent: None,
        }
    }
}

impl SearchClientBuilder {
    /// Use an existing reqwest client; timeout and user agent are then ignored.
    #[must_use]
    pub fn client(mut self, client: Client) -> Self {
        self.client = Some(client);
        self
    }

    #[must_use]
    pub fn api_base(mut self, url: impl Into<String>) -> Self {
        self.api_base = url.into().trim_end_matches('/').to_owned();
        self
    }

    #[must_use]
    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn build(self) -> Result<SearchClient> {
        if !(1..=50).contains(&self.limit) {
            return Err(Error::ConfigurationError(format!(
                "Search limit must be between 1 and 50, got {}",
                self.limit
            )));
        }
        Url::parse(&self.api_base)?;

        let client = match self.client {
            Some(c) => c,
            None => {
                let mut builder = Client::builder().timeout(self.timeout);
                if let Some(user_agent) = self.user_agent {
                    builder = builder.user_agent(user_agent);
                }
                builder.build()?
            }
        };

        Ok(SearchClient {
            client,
            api_base: self.api_base,
            limit: self.limit,
        })
    }
}
