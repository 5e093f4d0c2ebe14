//! Basic example using the SQLite session store

use salvo::prelude::*;
use salvo_db_session::{
    spawn_cleanup_task, Expiry, SessionConfig, SessionDepotExt, SessionHandler, SqliteStore,
};
use std::time::Duration;

#[handler]
async fn index(depot: &mut Depot) -> String {
    let session = match depot.require_session() {
        Ok(session) => session,
        Err(e) => return format!("Session error: {}", e),
    };

    // Get current view count
    let views: i64 = session.get("views").await.ok().flatten().unwrap_or(0);

    // Increment view count
    if let Err(e) = session.set("views", views + 1).await {
        return format!("Session error: {}", e);
    }

    format!(
        "Hello! You have viewed this page {} time(s).\nSession key: {}",
        views + 1,
        session.session_key().unwrap_or_else(|| "(assigned on save)".to_string())
    )
}

#[handler]
async fn get_user(depot: &mut Depot) -> String {
    let session = match depot.require_session() {
        Ok(session) => session,
        Err(e) => return format!("Session error: {}", e),
    };

    match session.get::<String>("user").await {
        Ok(Some(user)) => format!("Logged in as: {}", user),
        Ok(None) => "Not logged in".to_string(),
        Err(e) => format!("Session error: {}", e),
    }
}

#[handler]
async fn set_user(req: &mut Request, depot: &mut Depot) -> String {
    let session = depot.session_mut().expect("Session not found");

    // Get username from query parameter
    let username = req.query::<String>("name").unwrap_or_else(|| "anonymous".to_string());

    // New identity, new key
    if let Err(e) = session.cycle_key().await {
        return format!("Session error: {}", e);
    }
    if let Err(e) = session.set("user", &username).await {
        return format!("Session error: {}", e);
    }

    format!("User set to: {}", username)
}

#[handler]
async fn remember_until_close(depot: &mut Depot) -> &'static str {
    let session = depot.session_mut().expect("Session not found");

    match session.set_expiry(Some(Expiry::BROWSER_CLOSE)).await {
        Ok(()) => "Session now ends when the browser closes",
        Err(_) => "Session error",
    }
}

#[handler]
async fn logout(depot: &mut Depot) -> &'static str {
    let session = depot.session_mut().expect("Session not found");

    // Delete the stored session and the cookie
    match session.flush().await {
        Ok(()) => "Logged out successfully",
        Err(_) => "Session error",
    }
}

#[tokio::main]
async fn main() {
    // Set up logging
    tracing_subscriber::fmt::init();

    // Open the session database
    let store = SqliteStore::connect("sqlite://sessions.db")
        .await
        .expect("Failed to open session database");
    store.migrate().await.expect("Failed to create session table");

    // Configure session
    let config = SessionConfig::new("your-super-secret-key-change-in-production")
        .with_cookie_age(3600); // 1 hour

    // Create session handler
    let session_handler = SessionHandler::new(store, config).expect("Invalid session config");

    // Sweep expired rows every ten minutes
    let cleanup = spawn_cleanup_task(session_handler.store().clone(), Duration::from_secs(600));

    // Build router
    let router = Router::new()
        .hoop(session_handler)
        .get(index)
        .push(Router::with_path("user").get(get_user))
        .push(Router::with_path("login").get(set_user))
        .push(Router::with_path("close").get(remember_until_close))
        .push(Router::with_path("logout").get(logout));

    // Start server
    let acceptor = TcpListener::new("127.0.0.1:5800").bind().await;
    println!("Server running at http://127.0.0.1:5800");
    println!("Try these endpoints:");
    println!("  GET /           - View counter");
    println!("  GET /user       - Get current user");
    println!("  GET /login?name=alice - Set user (rotates the session key)");
    println!("  GET /close      - Expire session at browser close");
    println!("  GET /logout     - Flush session");

    Server::new(acceptor).serve(router).await;
    cleanup.shutdown().await;
}
