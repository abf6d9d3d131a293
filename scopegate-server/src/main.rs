mod api;
mod config;
mod errors;
mod gateway;
mod headers;
mod openapi;
mod state;
#[cfg(test)]
mod test_utils;

use crate::state::AppState;
use axum::Router;
use log::{error, info, warn};
use std::net::SocketAddr;
use utoipa::OpenApi;
use utoipa_axum::router::OpenApiRouter;
use utoipa_scalar::{Scalar, Servable};

#[tokio::main]
async fn main() {
    // Initialize logging
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));

    // Load configuration
    let settings = match config::Settings::load() {
        Ok(settings) => settings,
        Err(e) => {
            error!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    // Initialize application state
    let state = match AppState::new(settings.clone()).await {
        Ok(state) => state,
        Err(e) => {
            error!("Failed to initialize application state: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = bootstrap_trusted_client(&state).await {
        error!("Failed to bootstrap trusted client: {}", e);
        std::process::exit(1);
    }

    #[cfg(unix)]
    spawn_sites_reload(&state);

    let app = create_app(state).await;

    // Build server address
    let addr = SocketAddr::from(([0, 0, 0, 0], settings.port));

    // Start server
    let server = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    // Start the server and wait for it to finish
    info!("Server running on {}, press Ctrl+C to stop", addr);
    let serve = axum::serve(server, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;
    if let Err(e) = serve {
        error!("Server error: {}", e);
        std::process::exit(1);
    }

    info!("Server shutdown complete");
}

/// Create a new application instance with a given state
pub async fn create_app(state: AppState) -> Router {
    // Create OpenAPI documentation
    let (openapi_router, api_doc) =
        OpenApiRouter::with_openapi(openapi::ApiDoc::openapi()).split_for_parts();

    // Create base router with routes
    Router::new()
        .merge(api::router(&state))
        .merge(openapi_router)
        .merge(Scalar::with_url("/scalar", api_doc.clone()))
        .with_state(state)
}

/// Creates or refreshes the configured trusted owner client. A generated
/// secret is printed once, it cannot be recovered later.
async fn bootstrap_trusted_client(state: &AppState) -> Result<(), errors::ApiError> {
    let trusted = &state.settings.trusted_client;
    let (client, generated) = state
        .authority
        .clients
        .ensure_trusted(
            &trusted.name,
            trusted.secret.as_deref(),
            trusted.get_scopes(),
        )
        .await?;

    info!(
        "Trusted client {} ({}) holds scopes {:?}",
        client.name,
        client.id,
        client.scope_names()
    );
    if let Some(secret) = generated {
        println!("Trusted client id: {}", client.id);
        println!("Trusted client secret: {}", secret);
        warn!("Generated a secret for the trusted client, set SCOPEGATE_TRUSTED_CLIENT_SECRET to keep it stable");
    }
    Ok(())
}

/// Re-reads the sites file on SIGHUP. A broken file leaves the current table in place.
#[cfg(unix)]
fn spawn_sites_reload(state: &AppState) {
    use tokio::signal::unix::{signal, SignalKind};

    let Some(path) = state.settings.gateway.sites_file.clone() else {
        return;
    };
    let sites = state.sites.clone();
    let mut hangup = match signal(SignalKind::hangup()) {
        Ok(hangup) => hangup,
        Err(e) => {
            warn!("Failed to install SIGHUP handler, sites reload disabled: {}", e);
            return;
        }
    };

    tokio::spawn(async move {
        while hangup.recv().await.is_some() {
            info!("Received SIGHUP, reloading sites from {}", path.display());
            if let Err(e) = sites.reload(&path) {
                error!("Failed to reload sites, keeping the current table: {}", e);
            }
        }
    });
}

// Simple signal handler that works on all platforms
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received SIGTERM, shutting down");
        }
    }
}
