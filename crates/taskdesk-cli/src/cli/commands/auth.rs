//! Account command handlers: sign-in, sign-out, password reset, settings.

use anyhow::{Result, bail};
use taskdesk_core::api::PendingRegistration;
use taskdesk_types::{NotificationSettings, UserProfile};

use super::App;

pub fn registration(
    full_name: String,
    username: String,
    email: String,
    password: String,
) -> PendingRegistration {
    PendingRegistration {
        full_name: full_name.trim().to_string(),
        username: username.trim().to_string(),
        email: email.trim().to_string(),
        password,
    }
}

fn print_user(user: &UserProfile) {
    println!("{} <{}>", user.display_name(), user.email);
    println!("username: {}", user.username);
    if let Some(enabled) = user.notify_email {
        println!("email notifications: {}", on_off(enabled));
    }
    if let Some(enabled) = user.notify_in_app {
        println!("in-app notifications: {}", on_off(enabled));
    }
}

fn on_off(enabled: bool) -> &'static str {
    if enabled { "on" } else { "off" }
}

pub async fn login(app: &App, identifier: &str, password: &str) -> Result<()> {
    let user = app.auth.login(identifier, password).await?;
    println!("Logged in as {}", user.display_name());
    Ok(())
}

pub async fn logout(app: &App) -> Result<()> {
    if !app.store().is_authenticated() {
        println!("Not logged in");
        return Ok(());
    }
    app.auth.logout().await;
    println!("Logged out");
    Ok(())
}

pub async fn whoami(app: &App, remote: bool) -> Result<()> {
    let Some(local) = app.store().current_user() else {
        bail!("Not logged in. Run `taskdesk login` first.");
    };

    let user = if remote {
        app.auth.profile().await?
    } else {
        local
    };
    print_user(&user);
    Ok(())
}

pub async fn register(app: &App, registration: &PendingRegistration) -> Result<()> {
    let response = app.auth.register(registration).await?;
    let email = response.email.as_deref().unwrap_or(&registration.email);
    match response.msg.as_deref() {
        Some(msg) if !msg.trim().is_empty() => println!("{msg}"),
        _ => println!("Verification code sent to {email}"),
    }
    println!("Run `taskdesk verify-otp` with the same details and the emailed code.");
    Ok(())
}

pub async fn forgot_password(app: &App, email: &str) -> Result<()> {
    let message = app.auth.forgot_password(email.trim()).await?;
    println!("{message}");
    Ok(())
}

pub async fn reset_password(app: &App, token: &str, new_password: &str) -> Result<()> {
    app.auth.verify_reset_token(token).await?;
    let message = app.auth.reset_password(token, new_password).await?;
    println!("{message}");
    Ok(())
}

pub async fn settings(
    app: &App,
    notify_email: Option<bool>,
    notify_in_app: Option<bool>,
) -> Result<()> {
    let settings = NotificationSettings {
        notify_email,
        notify_in_app,
    };
    if settings.is_empty() {
        bail!("Nothing to update. Pass --notify-email and/or --notify-in-app.");
    }

    let message = app.auth.update_settings(settings).await?;
    println!("{message}");
    if let Some(user) = app.store().current_user() {
        print_user(&user);
    }
    Ok(())
}
