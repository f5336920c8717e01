//! Commands that run a session store against the hosted backend.

use tokio_util::sync::CancellationToken;

use apotheca_storefront::SessionStore;
use apotheca_storefront::error::AppError;

/// Print the current identity and profile.
#[allow(clippy::print_stdout)]
pub async fn whoami(json: bool) -> Result<(), AppError> {
    let (config, client) = super::connect()?;
    let store = SessionStore::new(client, config.session);

    store.initialize();
    let state = store.settled().await;
    store.teardown().await;

    if json {
        let report = serde_json::json!({
            "signed_in": state.is_signed_in(),
            "identity_id": state.identity.as_ref().map(|i| i.id),
            "email": state.identity.as_ref().and_then(|i| i.email.clone()),
            "expires_at": state.session.as_ref().map(|s| s.expires_at.to_rfc3339()),
            "profile": state.profile,
        });
        println!("{report:#}");
    } else {
        super::print_state(&state);
    }
    Ok(())
}

/// Print every state change until Ctrl+C.
#[allow(clippy::print_stdout)]
pub async fn watch() -> Result<(), AppError> {
    let (config, client) = super::connect()?;
    let refresh_shutdown = CancellationToken::new();
    let refresh = config
        .backend
        .auto_refresh
        .then(|| client.spawn_auto_refresh(refresh_shutdown.clone()));

    let store = SessionStore::new(client, config.session);
    let mut changes = store.subscribe();
    store.initialize();
    println!("{}", super::summarize(&changes.borrow_and_update()));

    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    tracing::warn!(error = %e, "Failed to listen for Ctrl+C");
                }
                break;
            }
            changed = changes.changed() => {
                if changed.is_err() {
                    break;
                }
                let line = super::summarize(&changes.borrow_and_update());
                println!("{line}");
            }
        }
    }

    tracing::info!("Shutdown signal received, stopping");
    store.teardown().await;
    refresh_shutdown.cancel();
    if let Some(handle) = refresh
        && let Err(e) = handle.await
    {
        tracing::warn!(error = %e, "Auto-refresh task ended abnormally");
    }
    Ok(())
}
