//! Demo service: a `users` state served over HTTP and kept in SQLite.
//!
//! ```text
//! GET    /users         list users
//! POST   /users         append the JSON body as a user
//! DELETE /user/<name>   drop every user with that name
//! ```

use clap::Parser;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

use livestate::{
    config::ServeConfig,
    declare_persistent,
    dispatch::{EndpointRegistry, server::serve},
    observable::root::StateRoot,
    runtime::events::{EventBroadcaster, StateEvent},
    types::PathSegment,
    value::{Record, Value},
};

fn initial_state() -> Value {
    let user = |name: &str| Value::mapping([("name", name)]);
    Value::Record(Record::new(
        "State",
        [
            ("users", Value::sequence([user("Alice"), user("Bob")])),
            ("banned_user", user("Charlie")),
        ],
    ))
}

fn user_name(user: &Value) -> Option<&str> {
    user.child(&PathSegment::from("name")).and_then(Value::as_str)
}

fn endpoints(state: &StateRoot) -> EndpointRegistry {
    let mut endpoints = EndpointRegistry::new();

    let root = state.clone();
    endpoints.get("/users", move |_req| {
        Ok(root.node().child("users")?.snapshot()?)
    });

    let root = state.clone();
    endpoints.post("/users", move |req| {
        let users = root.node().child("users")?;
        users.push(req.into_body()?)?;
        Ok(users.snapshot()?)
    });

    let root = state.clone();
    endpoints.delete("/user/<name>", move |req| {
        let name = req.param("name")?;
        let users = root.node().child("users")?;
        users.retain(|user| user_name(user) != Some(name))?;
        Ok(users.snapshot()?)
    });

    endpoints
}

fn log_events(state: &StateRoot) {
    let mut events = EventBroadcaster::attach(state, 64).subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(StateEvent::Changed { revision, diff }) => {
                    tracing::info!(revision, changes = diff.len(), "state changed");
                    for change in diff.iter() {
                        tracing::debug!(revision, %change);
                    }
                }
                Ok(StateEvent::Snapshot { .. }) => {}
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event log fell behind");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = ServeConfig::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_filter)),
        )
        .init();

    let state = declare_persistent(initial_state(), config.open_store()?)?;
    tracing::info!(state = %state.snapshot(), "initial state");
    log_events(&state);

    let table = endpoints(&state).build()?;
    serve(config.bind, table).await?;
    Ok(())
}
