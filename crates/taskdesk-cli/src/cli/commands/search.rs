//! User search handler.

use anyhow::{Context, Result, bail};
use taskdesk_core::search::{DebouncedSearch, SearchState};

use super::App;

pub async fn run(app: &App, query: &str) -> Result<()> {
    if query.trim().is_empty() {
        bail!("Search query must not be empty");
    }

    let search = DebouncedSearch::new(app.auth.clone(), app.config.search_debounce());
    search.on_query_change(query);
    let mut results = search.subscribe();

    let state = results
        .wait_for(SearchState::is_settled)
        .await
        .context("search stopped before completing")?
        .clone();

    match state {
        SearchState::Ready { users, .. } if users.is_empty() => {
            println!("No users found");
            Ok(())
        }
        SearchState::Ready { users, .. } => {
            for user in users {
                match user.full_name.as_deref() {
                    Some(name) if !name.trim().is_empty() => {
                        println!("{}\t{} <{}>\t{name}", user.id, user.username, user.email);
                    }
                    _ => println!("{}\t{} <{}>", user.id, user.username, user.email),
                }
            }
            Ok(())
        }
        SearchState::Failed { message, .. } => bail!("{message}"),
        SearchState::Idle | SearchState::Pending { .. } | SearchState::Loading { .. } => Ok(()),
    }
}
