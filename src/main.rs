mod auth;
mod chat;
mod error;
mod messages;
mod poll;
mod registry;
mod session;
mod tally;

mod server;

use chrono::Utc;
use log::info;
use warp::Filter;

use server::Server;

const DEFAULT_PORT: u16 = 3001;

#[tokio::main]
async fn main() {
    env_logger::init();

    let port = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse::<u16>().ok())
        .unwrap_or(DEFAULT_PORT);

    let server = Server::new();
    server.start_heartbeat();

    let ws_server = server.clone();
    let ws_route = warp::path("ws")
        .and(warp::ws())
        .map(move |ws: warp::ws::Ws| {
            let server = ws_server.clone();
            ws.on_upgrade(move |socket| {
                let server = server.clone();
                async move {
                    server.handle_connection(socket).await;
                }
            })
        });

    let health_server = server.clone();
    let health_route = warp::path!("api" / "health").and(warp::get()).then(move || {
        let server = health_server.clone();
        async move {
            let status = server.status().await;
            warp::reply::json(&serde_json::json!({
                "status": "OK",
                "timestamp": Utc::now(),
                "connectedParticipants": status.connected_participants,
                "activePoll": status.active_poll,
            }))
        }
    });

    let routes = ws_route
        .or(health_route)
        .with(warp::cors().allow_any_origin());

    info!("Poll session server starting on port {port}...");
    warp::serve(routes).run(([0, 0, 0, 0], port)).await;
}
