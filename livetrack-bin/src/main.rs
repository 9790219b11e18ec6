use clap::Parser;
use livetrack_core::{
    Config, OrderBoard, OrderBoardFeed, OrderTracker, RawConfig, RealtimeChannel, Server,
    api::OrdersApi,
    config::{DEFAULT_API_URL, DEFAULT_PORT, DEFAULT_SOCKET_URL},
    map::MapRenderer,
    models::{events::Room, order::Order},
    state::AppState,
    tracking::SessionState,
};
use std::sync::{Arc, Mutex};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about = "Follow a storefront order's courier live")]
struct Cli {
    /// Socket.IO server base url
    #[arg(long, env = "LIVETRACK_SOCKET_URL", default_value = DEFAULT_SOCKET_URL)]
    socket_url: String,

    /// REST API base url
    #[arg(long, env = "LIVETRACK_API_URL", default_value = DEFAULT_API_URL)]
    api_url: String,

    /// Bearer token sent to both the API and the realtime channel
    #[arg(long, env = "LIVETRACK_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Joins this user's room for personal notifications
    #[arg(long, env = "LIVETRACK_USER_ID")]
    user_id: Option<String>,

    /// Load the seller's orders and join the admin room
    #[arg(long, env = "LIVETRACK_SELLER")]
    seller: bool,

    #[arg(long, env = "LIVETRACK_SHOPPER_LAT", allow_negative_numbers = true)]
    shopper_lat: Option<f64>,

    #[arg(long, env = "LIVETRACK_SHOPPER_LNG", allow_negative_numbers = true)]
    shopper_lng: Option<f64>,

    /// Behave as if location permission was declined
    #[arg(long, env = "LIVETRACK_DENY_LOCATION")]
    deny_location: bool,

    /// Start tracking this order right away
    #[arg(long, env = "LIVETRACK_ORDER_ID")]
    order_id: Option<String>,

    /// Port of the local view server
    #[arg(long, env = "LIVETRACK_PORT", default_value_t = DEFAULT_PORT)]
    port: u16,

    /// No map surface; the map view reports itself unavailable
    #[arg(long, env = "LIVETRACK_HEADLESS")]
    headless: bool,

    /// Give up on the realtime channel after this many reconnects
    #[arg(long, env = "LIVETRACK_RECONNECT_ATTEMPTS")]
    reconnect_attempts: Option<u32>,

    #[arg(long, env = "LIVETRACK_CONNECT_TIMEOUT_SECS", default_value_t = 10)]
    connect_timeout_secs: u64,

    #[arg(long, env = "LIVETRACK_HTTP_TIMEOUT_SECS", default_value_t = 10)]
    http_timeout_secs: u64,
}

impl From<Cli> for RawConfig {
    fn from(cli: Cli) -> Self {
        Self {
            socket_url: cli.socket_url,
            api_url: cli.api_url,
            token: cli.token,
            user_id: cli.user_id,
            seller: cli.seller,
            shopper_lat: cli.shopper_lat,
            shopper_lng: cli.shopper_lng,
            deny_location: cli.deny_location,
            order_id: cli.order_id,
            port: cli.port,
            headless: cli.headless,
            reconnect_attempts: cli.reconnect_attempts,
            connect_timeout_secs: cli.connect_timeout_secs,
            http_timeout_secs: cli.http_timeout_secs,
        }
    }
}

fn init_logging() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // A missing .env file is fine.
    let _ = dotenvy::dotenv();
    init_logging();

    let config = match Config::try_from(RawConfig::from(Cli::parse())) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            return Err(e.into());
        }
    };
    info!(
        socket = %config.socket_endpoint,
        api = %config.api_url,
        port = config.port,
        "starting livetrack"
    );

    let channel = RealtimeChannel::init(config.connector(), config.channel_options());
    if let Err(e) = channel.connect().await {
        warn!(error = %e, "live updates unavailable for now");
    }

    if let Some(user_id) = &config.user_id {
        join(&channel, Room::User(user_id.clone()));
    }
    if config.seller {
        join(&channel, Room::Admin);
    }

    let api = config.orders_api()?;
    let board = Arc::new(Mutex::new(OrderBoard::new(
        load_orders(&api, config.seller).await,
    )));
    let _feed = OrderBoardFeed::attach(&channel, board.clone());

    let renderer = config.renderer();
    let mut tracker = OrderTracker::new(channel.clone(), Arc::new(config.geolocation()));
    log_courier_moves(&tracker, renderer.clone());
    if let Some(order_id) = &config.order_id {
        let order = board
            .lock()
            .ok()
            .and_then(|board| board.find(order_id).cloned());
        auto_track(&mut tracker, order_id, order).await;
    }

    let state = Arc::new(AppState::new(channel.clone(), board, tracker, renderer));
    let served = Server::new(state, config.port).run(shutdown_signal()).await;

    channel.shutdown().await;
    if let Err(e) = &served {
        error!(error = %e, "view server failed");
    }
    served
}

fn join(channel: &RealtimeChannel, room: Room) {
    if let Err(e) = channel.join_room(room.clone()) {
        warn!(%room, error = %e, "could not join room");
    }
}

async fn load_orders(api: &OrdersApi, seller: bool) -> Vec<Order> {
    let orders = if seller {
        api.seller_orders().await
    } else {
        api.my_orders().await
    };
    orders.unwrap_or_else(|e| {
        warn!(error = %e, "could not load orders; starting with an empty list");
        Vec::new()
    })
}

async fn auto_track(tracker: &mut OrderTracker, order_id: &str, order: Option<Order>) {
    let Some(order) = order else {
        warn!(%order_id, "order to track is not in the order list");
        return;
    };
    if let Err(e) = tracker.track(&order).await {
        error!(%order_id, error = %e, "cannot track order");
    }
}

fn log_courier_moves(tracker: &OrderTracker, renderer: MapRenderer) {
    let mut updates = tracker.subscribe();
    tokio::spawn(async move {
        while updates.changed().await.is_ok() {
            let state = updates.borrow_and_update().clone();
            if let SessionState::Active {
                shopper,
                courier: Some(fix),
                ..
            } = &state
            {
                info!(view = %renderer.render(Some(*shopper), Some(fix)), "courier moved");
            }
        }
    });
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "cannot listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}
