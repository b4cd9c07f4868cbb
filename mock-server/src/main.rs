use mock_server::AppState;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), std::io::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let port = std::env::var("PORT").unwrap_or_else(|_| "3000".to_string());
    let require_auth = std::env::var("REQUIRE_AUTH")
        .map(|value| matches!(value.as_str(), "1" | "true"))
        .unwrap_or(false);
    let state = if require_auth {
        AppState::with_auth()
    } else {
        AppState::default()
    };

    let addr = format!("127.0.0.1:{port}");
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(%addr, require_auth, "listening");
    mock_server::serve(listener, state).await
}
