use anyhow::Result;
use clap::Subcommand;

use crate::config::Config;
use crate::daemon::{Daemon, DaemonClient, DaemonRequest, DaemonResponse};
use crate::webdriver::BrowserType;

#[derive(Subcommand)]
pub enum DaemonCommands {
    /// Run the daemon (in foreground)
    Run {
        /// Browser type to use (firefox or chrome); defaults to the config file
        #[arg(long)]
        browser: Option<BrowserType>,

        /// WebDriver endpoint, e.g. http://localhost:9515
        #[arg(long)]
        webdriver_url: Option<String>,

        /// Show the browser window
        #[arg(long)]
        headed: bool,
    },

    /// Start the daemon in the background
    Start {
        /// Browser type to use (firefox or chrome)
        #[arg(long)]
        browser: Option<BrowserType>,
    },

    /// Stop the daemon
    Stop,

    /// Check daemon status
    Status,
}

pub async fn handle_daemon(command: DaemonCommands) -> Result<()> {
    match command {
        DaemonCommands::Run {
            browser,
            webdriver_url,
            headed,
        } => {
            if Daemon::is_running() {
                println!("Daemon is already running");
                return Ok(());
            }

            let mut config = Config::load_default()?;
            if let Some(browser) = browser {
                config.webdriver.browser = browser;
            }
            if webdriver_url.is_some() {
                config.webdriver.url = webdriver_url;
            }
            if headed {
                config.webdriver.headless = false;
            }

            println!("Starting daemon with browser: {}...", config.webdriver.browser);
            let mut daemon = Daemon::new(config)?;
            daemon.start().await?;
        }
        DaemonCommands::Start { browser } => {
            if Daemon::is_running() {
                println!("Daemon is already running");
            } else {
                println!("Starting daemon in background...");
                spawn_background(browser)?;
            }
        }
        DaemonCommands::Stop => {
            if DaemonClient::is_daemon_running() {
                match DaemonClient::send_request(DaemonRequest::Shutdown) {
                    Ok(_) => println!("Daemon stopped"),
                    Err(e) => println!("Failed to stop daemon: {}", e),
                }
            } else {
                println!("Daemon is not running");
            }
        }
        DaemonCommands::Status => {
            if !DaemonClient::is_daemon_running() {
                println!("Daemon is not running");
                return Ok(());
            }
            match DaemonClient::ping().await {
                Ok(latency) => {
                    println!("Daemon is running ({} ms)", latency.as_millis());

                    if let Ok(DaemonResponse::TabList(tabs)) =
                        DaemonClient::send_request(DaemonRequest::ListTabs)
                        && !tabs.is_empty()
                    {
                        println!("\nActive tabs:");
                        for tab in tabs {
                            println!(
                                "  {} - {}",
                                tab.name,
                                tab.url.as_deref().unwrap_or("(no URL)")
                            );
                        }
                    }
                }
                Err(e) => println!("Daemon is not responding properly: {}", e),
            }
        }
    }
    Ok(())
}

fn wait_until_running() -> bool {
    for i in 0..10 {
        std::thread::sleep(std::time::Duration::from_millis(500));
        if Daemon::is_running() {
            return true;
        }
        // Browser startup makes the first check the slowest
        if i == 0 {
            std::thread::sleep(std::time::Duration::from_millis(1500));
        }
    }
    false
}

fn daemon_args(browser: Option<BrowserType>) -> Vec<String> {
    let mut args = vec!["daemon".to_string(), "run".to_string()];
    if let Some(browser) = browser {
        args.push("--browser".to_string());
        args.push(browser.to_string());
    }
    args
}

#[cfg(unix)]
fn spawn_background(browser: Option<BrowserType>) -> Result<()> {
    use nix::unistd::{ForkResult, fork, setsid};
    use std::os::unix::io::AsRawFd;
    use std::os::unix::process::CommandExt;

    let log_dir = dirs::cache_dir().unwrap_or_else(std::env::temp_dir);
    let log_file = log_dir.join("retrace-daemon.log");

    match unsafe { fork() } {
        Ok(ForkResult::Parent { .. }) => {
            if wait_until_running() {
                println!("Daemon started successfully");
                println!("Log file: {}", log_file.display());
            } else {
                eprintln!(
                    "Failed to start daemon. Check log file: {}",
                    log_file.display()
                );
            }
        }
        Ok(ForkResult::Child) => {
            let _ = setsid();

            let log_fd = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&log_file)?;
            let log_fd = log_fd.as_raw_fd();
            nix::unistd::dup2(log_fd, 1)?;
            nix::unistd::dup2(log_fd, 2)?;
            nix::unistd::close(0)?;

            // exec a fresh process rather than carry the forked Tokio runtime
            let exe_path = std::env::current_exe()?;
            let _ = std::process::Command::new(exe_path)
                .args(daemon_args(browser))
                .exec();

            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("Fork failed: {}", e);
        }
    }
    Ok(())
}

#[cfg(not(unix))]
fn spawn_background(browser: Option<BrowserType>) -> Result<()> {
    use std::process::Command;

    let log_dir = dirs::cache_dir().unwrap_or_else(std::env::temp_dir);
    let log_file = log_dir.join("retrace-daemon.log");
    let exe_path = std::env::current_exe()?;

    let child = Command::new(&exe_path)
        .args(daemon_args(browser))
        .stdin(std::process::Stdio::null())
        .stdout(std::fs::File::create(&log_file)?)
        .stderr(std::fs::File::create(&log_file)?)
        .spawn()?;
    std::mem::forget(child);

    if wait_until_running() {
        println!("Daemon started successfully");
        println!("Log file: {}", log_file.display());
    } else {
        eprintln!(
            "Failed to start daemon. Check log file: {}",
            log_file.display()
        );
    }
    Ok(())
}
