use clap::{Args, Parser, Subcommand};
use log::{info, warn};
use musichive::{
    app::{AppEvent, AppState, Config, ConfigBuilder, Runtime},
    clients::{
        SearchClient, SessionManager,
        entities::{Annotation, Coordinate, ScreenPoint},
        errors::Result,
        map::{LocationAuthorization, LocationEvent, MapSurface, Region, Viewport},
        session::{CallbackOutcome, RemoteSdk},
    },
};
use tokio::io::{AsyncBufReadExt, BufReader};
use url::Url;

#[derive(Parser)]
#[command(name = "musichive")]
#[command(version, about = "Authorize with Spotify, search tracks and pin them on a map", long_about = None)]
struct Cli {
    #[command(flatten)]
    settings: Settings,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct Settings {
    /// Spotify client id (defaults to RSPOTIFY_CLIENT_ID)
    #[arg(long, global = true)]
    client_id: Option<String>,

    /// Redirect URI registered for the app
    #[arg(long, global = true)]
    redirect_uri: Option<String>,

    /// Spotify Web API base URL
    #[arg(long, global = true)]
    api_base: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the web authorization URL
    AuthorizeUrl,
    /// Parse an authorization callback URL
    Callback { url: String },
    /// Search tracks with an existing access token
    Search {
        query: String,
        #[arg(long, env = "SPOTIFY_ACCESS_TOKEN", hide_env_values = true)]
        token: String,
    },
    /// Interactive session reading commands from stdin
    Run {
        /// Behave as if the Spotify app is installed
        #[arg(long)]
        app_installed: bool,
        /// Map view width in points
        #[arg(long, default_value_t = 390.0)]
        width: f64,
        /// Map view height in points
        #[arg(long, default_value_t = 844.0)]
        height: f64,
    },
}

/// Stand-in for the Spotify app on a terminal.
struct ConsoleSdk {
    installed: bool,
}

impl RemoteSdk for ConsoleSdk {
    fn authorize_and_play(&mut self, play_uri: &str) -> bool {
        if self.installed {
            println!("Open Spotify to authorize; it will start playing {play_uri}");
        }
        self.installed
    }

    fn open_store_listing(&mut self, url: &Url) {
        println!("Spotify is not installed, get it at {url}");
    }

    fn set_access_token(&mut self, _token: &str) {
        info!("Spotify connection token updated");
    }
}

struct ConsoleSurface;

impl MapSurface for ConsoleSurface {
    fn set_region(&mut self, region: &Region) {
        println!(
            "map centered on {} (span {:.3} x {:.3})",
            region.center, region.span.latitude_delta, region.span.longitude_delta
        );
    }

    fn add_annotations(&mut self, annotations: &[Annotation]) {
        for pin in annotations {
            match &pin.subtitle {
                Some(subtitle) => println!("pin {} - {subtitle} at {}", pin.title, pin.coordinate),
                None => println!("pin {} at {}", pin.title, pin.coordinate),
            }
        }
    }

    fn remove_all_annotations(&mut self) {
        println!("map cleared");
    }
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    let settings = cli.settings;

    match cli.command {
        Commands::AuthorizeUrl => {
            let config = build_config(settings)?;
            let mut session = SessionManager::new(ConsoleSdk { installed: false }, config.session);
            println!("{}", session.authorize_url());
        }
        Commands::Callback { url } => {
            let config = build_config(settings)?;
            let mut session = SessionManager::new(ConsoleSdk { installed: false }, config.session);
            match session.handle_open_url(&url)? {
                CallbackOutcome::Authenticated | CallbackOutcome::TokenReplaced => {
                    println!("{}", session.access_token().unwrap_or_default());
                }
                CallbackOutcome::Rejected(reason) => println!("Authorization failed: {reason}"),
            }
        }
        Commands::Search { query, token } => {
            // searching only needs a token, not the app registration
            let mut builder = SearchClient::builder();
            if let Some(base) = settings.api_base {
                builder = builder.api_base(base);
            }
            let tracks = builder.build()?.search_tracks(&query, Some(&token)).await?;
            for (i, track) in tracks.iter().enumerate() {
                println!("[{i}] {track}");
            }
        }
        Commands::Run {
            app_installed,
            width,
            height,
        } => {
            let config = build_config(settings)?;
            interactive(&config, app_installed, Viewport::new(width, height)).await?;
        }
    }
    Ok(())
}

fn build_config(settings: Settings) -> Result<Config> {
    let mut builder = ConfigBuilder::new();
    if let Some(id) = settings.client_id {
        builder = builder.client_id(id);
    }
    if let Some(uri) = settings.redirect_uri {
        builder = builder.redirect_uri(uri);
    }
    if let Some(base) = settings.api_base {
        builder = builder.api_base(base);
    }
    builder.build()
}

async fn interactive(config: &Config, app_installed: bool, viewport: Viewport) -> Result<()> {
    let mut state = AppState::new(
        ConsoleSdk {
            installed: app_installed,
        },
        viewport,
        config,
    );
    if !app_installed {
        println!("Authorize in a browser: {}", state.session.authorize_url());
    }
    // a terminal has no location permission prompt
    state.map.on_location_event(LocationEvent::AuthorizationChanged(
        LocationAuthorization::Authorized,
    ));

    let runtime = Runtime::new(state, config.search_client()?, ConsoleSurface);
    let tx = runtime.sender();
    println!(
        "commands: authorize | callback <url> | search <query> | select <n> | locate <lat> <lon> | press <x> <y> | signout | quit"
    );

    let input = tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    warn!("Failed to read input: {e}");
                    break;
                }
            };
            match parse_command(&line) {
                Ok(Some(AppEvent::Shutdown)) => break,
                Ok(Some(event)) => {
                    if tx.send(event).is_err() {
                        return;
                    }
                }
                Ok(None) => {}
                Err(e) => println!("{e}"),
            }
        }
        let _ = tx.send(AppEvent::Shutdown);
    });

    let (state, _) = runtime.run().await;
    input.abort();
    info!(
        "Session ended with {} pins, authenticated: {}",
        state.map.annotations().len(),
        state.session.is_authenticated()
    );
    Ok(())
}

// Console input errors are usage messages, not crate errors
fn parse_command(line: &str) -> std::result::Result<Option<AppEvent>, String> {
    let line = line.trim();
    let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
    let rest = rest.trim();
    let event = match command {
        "" => return Ok(None),
        "authorize" => AppEvent::AuthorizeRequested,
        "callback" => AppEvent::CallbackUrl(rest.to_owned()),
        "search" => AppEvent::SearchSubmitted(rest.to_owned()),
        "select" => AppEvent::TrackSelected(parse_number(rest)?),
        "locate" => {
            let (lat, lon) = parse_pair(rest)?;
            AppEvent::Location(LocationEvent::Updated(vec![Coordinate::new(lat, lon)]))
        }
        "press" => {
            let (x, y) = parse_pair(rest)?;
            AppEvent::LongPress(ScreenPoint::new(x, y))
        }
        "signout" => AppEvent::SignOut,
        "quit" | "exit" => AppEvent::Shutdown,
        other => return Err(format!("Unknown command {other:?}")),
    };
    Ok(Some(event))
}

fn parse_number<T: std::str::FromStr>(s: &str) -> std::result::Result<T, String> {
    s.parse().map_err(|_| format!("Expected a number, got {s:?}"))
}

fn parse_pair(s: &str) -> std::result::Result<(f64, f64), String> {
    let mut parts = s.split_whitespace();
    match (parts.next(), parts.next(), parts.next()) {
        (Some(a), Some(b), None) => Ok((parse_number(a)?, parse_number(b)?)),
        _ => Err(format!("Expected two numbers, got {s:?}")),
    }
}
