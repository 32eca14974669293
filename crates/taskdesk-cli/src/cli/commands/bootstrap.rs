//! Google sign-in bootstrap handler.

use anyhow::Result;
use taskdesk_core::bootstrap::ClientIdBootstrap;

use super::App;

pub async fn client_id(app: &App) -> Result<()> {
    let bootstrap = ClientIdBootstrap::new(
        app.auth.clone(),
        &app.config.bootstrap,
        app.auth.registry().clone(),
    );

    let mut progress = bootstrap.retrier().subscribe();
    let reporter = tokio::spawn(async move {
        while progress.changed().await.is_ok() {
            let current = *progress.borrow_and_update();
            if current.is_retrying() {
                eprintln!("Google client id: {current}");
            }
        }
    });

    let result = bootstrap.client_id().await;
    reporter.abort();

    println!("{}", result?);
    Ok(())
}
