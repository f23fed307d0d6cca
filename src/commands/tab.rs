use anyhow::Result;
use clap::Subcommand;

use crate::commands::utils;
use crate::daemon::{DaemonRequest, DaemonResponse};

#[derive(Subcommand)]
pub enum TabCommands {
    /// List all active tabs
    List,

    /// Close a specific tab
    Close {
        /// Tab name
        name: String,
    },

    /// Close all tabs
    CloseAll,
}

pub async fn handle_tab(command: TabCommands) -> Result<()> {
    utils::require_daemon()?;

    match command {
        TabCommands::List => match utils::send(DaemonRequest::ListTabs)? {
            DaemonResponse::TabList(tabs) if tabs.is_empty() => println!("No active tabs"),
            DaemonResponse::TabList(tabs) => {
                println!("Active tabs:");
                for tab in tabs {
                    println!(
                        "  {} - {} (idle {}s)",
                        tab.name,
                        tab.url.as_deref().unwrap_or("(no URL)"),
                        tab.last_used_seconds
                    );
                }
            }
            other => return Err(utils::unexpected(other)),
        },
        TabCommands::Close { name } => match utils::send(DaemonRequest::CloseTab { name })? {
            DaemonResponse::Success(msg) => println!("{}", msg),
            other => return Err(utils::unexpected(other)),
        },
        TabCommands::CloseAll => match utils::send(DaemonRequest::ListTabs)? {
            DaemonResponse::TabList(tabs) => {
                let count = tabs.len();
                for tab in tabs {
                    utils::send(DaemonRequest::CloseTab { name: tab.name })?;
                }
                println!("Closed {} tab(s)", count);
            }
            other => return Err(utils::unexpected(other)),
        },
    }
    Ok(())
}
