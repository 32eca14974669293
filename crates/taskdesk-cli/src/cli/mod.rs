//! CLI entry and dispatch.

use anyhow::{Context, Result};
use clap::Parser;
use taskdesk_core::{config, logging};

mod commands;

#[derive(Parser)]
#[command(name = "taskdesk")]
#[command(version = "0.1")]
#[command(about = "Taskdesk command-line client")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    #[command(flatten)]
    Session(SessionCommands),

    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

/// Commands that talk to the API with the stored session.
#[derive(clap::Subcommand)]
enum SessionCommands {
    /// Sign in with a username or email
    Login {
        /// Username or email address
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },

    /// Sign out and forget the stored session
    Logout,

    /// Show the signed-in user
    Whoami {
        /// Fetch the profile from the server instead of the local session
        #[arg(long)]
        remote: bool,
    },

    /// Start a registration; a verification code is emailed
    Register {
        #[arg(long)]
        full_name: String,
        #[arg(long)]
        username: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },

    /// Confirm a registration with the emailed code
    VerifyOtp {
        #[arg(long)]
        email: String,
        #[arg(long)]
        username: String,
        #[arg(long)]
        full_name: String,
        #[arg(long)]
        password: String,
        /// The 6-digit code from the email
        #[arg(long)]
        code: String,
    },

    /// Request a new verification code
    ResendOtp {
        #[arg(long)]
        email: String,
        #[arg(long)]
        username: String,
    },

    /// Email a password reset link
    ForgotPassword {
        #[arg(long)]
        email: String,
    },

    /// Set a new password with a reset token
    ResetPassword {
        #[arg(long)]
        token: String,
        #[arg(long)]
        new_password: String,
    },

    /// Update notification preferences
    Settings {
        #[arg(long, value_name = "BOOL", action = clap::ArgAction::Set)]
        notify_email: Option<bool>,
        #[arg(long, value_name = "BOOL", action = clap::ArgAction::Set)]
        notify_in_app: Option<bool>,
    },

    /// Search the user directory
    Search {
        #[arg(value_name = "QUERY")]
        query: String,
    },

    /// Print the Google sign-in client id
    ClientId,
}

#[derive(clap::Subcommand)]
enum ConfigCommands {
    /// Show the path to the config file
    Path,
    /// Initialize a default config file (if not present)
    Init,
    /// Set the API base URL
    SetUrl {
        #[arg(value_name = "URL")]
        url: String,
    },
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    let _log_guard = logging::init(&config::paths::logs_dir());

    // one cooperative runtime for everything
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("create tokio runtime")?;

    rt.block_on(async move { dispatch(cli).await })
}

async fn dispatch(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Config { command } => match command {
            ConfigCommands::Path => {
                commands::config::path();
                Ok(())
            }
            ConfigCommands::Init => commands::config::init(),
            ConfigCommands::SetUrl { url } => commands::config::set_url(&url),
        },
        Commands::Session(command) => {
            let config = config::Config::load().context("load config")?;
            let app = commands::App::new(config)?;
            dispatch_session(&app, command).await
        }
    }
}

async fn dispatch_session(app: &commands::App, command: SessionCommands) -> Result<()> {
    match command {
        SessionCommands::Login { email, password } => {
            commands::auth::login(app, &email, &password).await
        }
        SessionCommands::Logout => commands::auth::logout(app).await,
        SessionCommands::Whoami { remote } => commands::auth::whoami(app, remote).await,
        SessionCommands::Register {
            full_name,
            username,
            email,
            password,
        } => {
            let registration = commands::auth::registration(full_name, username, email, password);
            commands::auth::register(app, &registration).await
        }
        SessionCommands::VerifyOtp {
            email,
            username,
            full_name,
            password,
            code,
        } => {
            let registration = commands::auth::registration(full_name, username, email, password);
            commands::otp::verify(app, registration, &code).await
        }
        SessionCommands::ResendOtp { email, username } => {
            commands::otp::resend(app, &email, &username).await
        }
        SessionCommands::ForgotPassword { email } => {
            commands::auth::forgot_password(app, &email).await
        }
        SessionCommands::ResetPassword {
            token,
            new_password,
        } => commands::auth::reset_password(app, &token, &new_password).await,
        SessionCommands::Settings {
            notify_email,
            notify_in_app,
        } => commands::auth::settings(app, notify_email, notify_in_app).await,
        SessionCommands::Search { query } => commands::search::run(app, &query).await,
        SessionCommands::ClientId => commands::bootstrap::client_id(app).await,
    }
}
