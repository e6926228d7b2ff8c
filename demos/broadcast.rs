use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use promobot_core::{
    AdmissionController,
    Broadcaster,
    DispatchQueue,
    InMemoryUserStore,
    MessageSender,
    SendError,
    Settings,
    SystemClock,
    UserId,
    UserProfile,
    UserStore,
};
use tracing_subscriber::EnvFilter;

/// Prints instead of talking to the Bot API.
struct StdoutSender;

#[async_trait]
impl MessageSender for StdoutSender {
    async fn send(&self, recipient: UserId, text: &str) -> Result<(), SendError> {
        println!("-> {recipient}: {text}");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = Settings::from_env();
    let store = Arc::new(InMemoryUserStore::new());
    for (id, name) in [(1, "ayse"), (2, "john"), (3, "mehmet")] {
        store
            .upsert_user(&UserProfile::new(UserId(id)).with_username(name), Utc::now())
            .await?;
    }

    let admission = AdmissionController::new(store.clone(), Arc::new(SystemClock));
    let decision = admission
        .submit(UserId(1), "+905550000001", settings.bonus_cooldown_minutes)
        .await?;
    println!("bonus request from 1: {decision:?}");

    let queue = DispatchQueue::new(settings.dispatch.clone(), Arc::new(StdoutSender));
    let broadcaster = Broadcaster::new(queue, store, settings.broadcast.clone());
    let report = broadcaster.broadcast("New weekend promotion is live!").await?;
    println!("{}", serde_json::to_string(&report)?);

    Ok(())
}
