//! Registration verification handlers, driven through `OtpFlow`.

use anyhow::{Result, bail};
use taskdesk_core::api::PendingRegistration;
use taskdesk_core::otp::{CODE_LENGTH, NavigationIntent, OtpFlow, OtpPhase, sanitize_code};

use super::App;

pub async fn verify(app: &App, registration: PendingRegistration, code: &str) -> Result<()> {
    let flow = OtpFlow::new(
        app.auth.clone(),
        app.store().clone(),
        registration,
        app.config.otp_resend_secs,
    );

    flow.input(code).await;
    if sanitize_code(code).len() < CODE_LENGTH {
        flow.submit().await;
    }
    let snapshot = flow.snapshot();
    flow.close();

    match (snapshot.phase, snapshot.intent) {
        (OtpPhase::Verified, Some(NavigationIntent::Dashboard)) => {
            let name = app
                .store()
                .current_user()
                .map_or_else(|| snapshot.email.clone(), |u| u.display_name().to_string());
            println!("Account verified. Logged in as {name}");
            Ok(())
        }
        (OtpPhase::Verified, Some(NavigationIntent::Login { message })) => {
            println!("{message}");
            Ok(())
        }
        _ => bail!(
            "{}",
            snapshot
                .error
                .unwrap_or_else(|| "Verification failed".to_string())
        ),
    }
}

pub async fn resend(app: &App, email: &str, username: &str) -> Result<()> {
    let registration = PendingRegistration {
        full_name: String::new(),
        username: username.trim().to_string(),
        email: email.trim().to_string(),
        password: String::new(),
    };
    let flow = OtpFlow::new(
        app.auth.clone(),
        app.store().clone(),
        registration,
        app.config.otp_resend_secs,
    );

    flow.resend().await;
    let snapshot = flow.snapshot();
    flow.close();

    if let Some(error) = snapshot.error {
        bail!("{error}");
    }
    if let Some(notice) = snapshot.notice {
        println!("{notice}");
    }
    println!(
        "You can request another code in {} seconds.",
        snapshot.countdown_secs
    );
    Ok(())
}
