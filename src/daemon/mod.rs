mod coordinator;

pub use coordinator::{Coordinator, TestInfo};

use anyhow::{Context, Result};
use interprocess::local_socket::{
    GenericFilePath, Listener, ListenerOptions, Name, Stream, ToFsName,
    traits::{ListenerExt, Stream as StreamTrait},
};
use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::{Config, data_dir};
use crate::errors::ReplayError;
use crate::execution::ExecutionState;
use crate::replay::ReplayEvent;
use crate::step::{Step, StepSequence};
use crate::store::{FileStore, Settings};
use crate::tab_manager::{BrowserLauncher, TabInfo};
use crate::webdriver::Browser;

/// How often active recordings are drained
const RECORDING_POLL_INTERVAL: Duration = Duration::from_millis(250);
const RECONNECT_DELAY: Duration = Duration::from_millis(200);

/// Liveness checks give up after this long
pub const PING_TIMEOUT: Duration = Duration::from_secs(2);

/// Daemon that runs in the background and owns the browser tabs
pub struct Daemon {
    coordinator: Arc<Coordinator<Browser>>,
}

/// Messages that can be sent to the daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DaemonRequest {
    // Recording
    StartRecording {
        test_name: String,
        tab: String,
        url: Option<String>,
    },
    StopRecording {
        tab: String,
    },
    CaptureScreenshot {
        tab: String,
    },

    // Replay
    ReplayTest {
        test_name: String,
        tab: String,
        execution_id: Option<String>,
    },
    ResumeTest {
        state: Box<ExecutionState>,
    },
    ForceStopTest {
        execution_id: String,
    },
    ForceReset,
    CaptureFullPageScreenshot {
        tab: String,
    },
    Events {
        execution_id: String,
    },

    // Test library and settings
    ListTests,
    GetTest {
        name: String,
    },
    SaveTest {
        test: Box<StepSequence>,
    },
    DeleteTest {
        name: String,
    },
    GetSettings,
    UpdateSettings {
        recording_delay: Option<u64>,
        replay_delay: Option<u64>,
    },

    // Tab management
    ListTabs,
    CloseTab {
        name: String,
    },

    // Daemon control
    Ping,
    Shutdown,
}

/// Responses from the daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DaemonResponse {
    Success(String),
    Error {
        kind: String,
        message: String,
        exit_code: i32,
    },
    Started {
        execution_id: String,
    },
    Recorded(Box<StepSequence>),
    StepCaptured(Box<Step>),
    Screenshot(String),
    Events(Vec<ReplayEvent>),
    TestList(Vec<TestInfo>),
    Test(Option<Box<StepSequence>>),
    Settings(Settings),
    TabList(Vec<TabInfo>),
    Pong,
}

impl DaemonResponse {
    fn from_error(err: anyhow::Error) -> Self {
        let err = ReplayError::from(err);
        DaemonResponse::Error {
            kind: err.kind().to_string(),
            message: err.to_string(),
            exit_code: err.exit_code(),
        }
    }

    fn from_result<T>(result: Result<T>, ok: impl FnOnce(T) -> DaemonResponse) -> Self {
        match result {
            Ok(value) => ok(value),
            Err(e) => Self::from_error(e),
        }
    }
}

impl Daemon {
    pub fn new(config: Config) -> Result<Self> {
        let store = Arc::new(FileStore::open_default()?);
        let launcher = Arc::new(BrowserLauncher::new(config.webdriver.clone()));
        Ok(Self {
            coordinator: Arc::new(Coordinator::new(store, config, launcher)),
        })
    }

    fn get_socket_path() -> Result<PathBuf> {
        let runtime_dir = dirs::runtime_dir()
            .or_else(dirs::cache_dir)
            .or_else(|| data_dir().ok())
            .unwrap_or_else(std::env::temp_dir);

        Ok(runtime_dir.join("retrace-daemon.sock"))
    }

    fn get_socket_name() -> Result<Name<'static>> {
        let socket_path = Self::get_socket_path()?;
        let path_string = socket_path
            .to_str()
            .ok_or_else(|| anyhow::anyhow!("Socket path is not valid UTF-8"))?
            .to_owned();
        // Leaked for the 'static lifetime a Name needs
        let path_str: &'static str = Box::leak(path_string.into_boxed_str());
        Ok(path_str.to_fs_name::<GenericFilePath>()?)
    }

    pub fn is_running() -> bool {
        if let Ok(name) = Self::get_socket_name() {
            // Just check if we can connect - don't send data to avoid EOF errors
            Stream::connect(name).is_ok()
        } else {
            false
        }
    }

    pub async fn start(&mut self) -> Result<()> {
        if Self::is_running() {
            anyhow::bail!("Daemon is already running");
        }

        // Remove old socket file if it exists
        let socket_path = Self::get_socket_path()?;
        if socket_path.exists() {
            std::fs::remove_file(&socket_path)?;
        }

        let name = Self::get_socket_name()?;
        let listener = ListenerOptions::new().name(name).create_sync()?;
        info!("Daemon listening on {:?}", socket_path);

        let coordinator = Arc::clone(&self.coordinator);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(RECORDING_POLL_INTERVAL).await;
                coordinator.poll_recordings().await;
            }
        });

        let coordinator = Arc::clone(&self.coordinator);
        let runtime = tokio::runtime::Handle::current();
        tokio::task::spawn_blocking(move || Self::run_server(listener, coordinator, runtime))
            .await
            .context("Daemon accept loop panicked")?
    }

    fn run_server(
        listener: Listener,
        coordinator: Arc<Coordinator<Browser>>,
        runtime: tokio::runtime::Handle,
    ) -> Result<()> {
        for stream in listener.incoming() {
            match stream {
                Ok(stream) => {
                    let coordinator = Arc::clone(&coordinator);
                    runtime.spawn(async move {
                        if let Err(e) = Self::handle_client(stream, coordinator).await {
                            error!("Error handling client: {}", e);
                        }
                    });
                }
                Err(e) => {
                    error!("Error accepting connection: {}", e);
                }
            }
        }
        Ok(())
    }

    async fn handle_client(mut stream: Stream, coordinator: Arc<Coordinator<Browser>>) -> Result<()> {
        let mut reader = BufReader::new(&mut stream);
        let mut request_line = String::new();
        let bytes_read = reader.read_line(&mut request_line)?;

        // A bare connect is a liveness check from `is_running`
        if bytes_read == 0 || request_line.trim().is_empty() {
            return Ok(());
        }

        let request: DaemonRequest = serde_json::from_str(request_line.trim_end())?;
        debug!("Received request: {:?}", request);

        if matches!(request, DaemonRequest::Shutdown) {
            info!("Daemon shutting down");
            let closed = coordinator.shutdown().await;
            debug!("Closed {} tabs", closed);

            Self::write_response(
                &mut stream,
                &DaemonResponse::Success("Daemon shutting down".to_string()),
            )?;

            if let Ok(socket_path) = Self::get_socket_path() {
                let _ = std::fs::remove_file(&socket_path);
            }

            // Give client time to receive the response
            tokio::time::sleep(Duration::from_millis(100)).await;
            std::process::exit(0);
        }

        let response = Self::dispatch(&coordinator, request).await;
        Self::write_response(&mut stream, &response)
    }

    async fn dispatch(coordinator: &Arc<Coordinator<Browser>>, request: DaemonRequest) -> DaemonResponse {
        match request {
            DaemonRequest::StartRecording {
                test_name,
                tab,
                url,
            } => DaemonResponse::from_result(
                coordinator
                    .start_recording(&test_name, &tab, url.as_deref())
                    .await,
                |()| DaemonResponse::Success(format!("Recording '{}' in tab '{}'", test_name, tab)),
            ),
            DaemonRequest::StopRecording { tab } => DaemonResponse::from_result(
                coordinator.stop_recording(&tab).await,
                |test| DaemonResponse::Recorded(Box::new(test)),
            ),
            DaemonRequest::CaptureScreenshot { tab } => DaemonResponse::from_result(
                coordinator.capture_screenshot(&tab).await,
                |step| DaemonResponse::StepCaptured(Box::new(step)),
            ),
            DaemonRequest::ReplayTest {
                test_name,
                tab,
                execution_id,
            } => DaemonResponse::from_result(
                coordinator.replay_test(&test_name, &tab, execution_id).await,
                |execution_id| DaemonResponse::Started { execution_id },
            ),
            DaemonRequest::ResumeTest { state } => DaemonResponse::from_result(
                coordinator.resume_test(*state).await,
                |execution_id| DaemonResponse::Started { execution_id },
            ),
            DaemonRequest::ForceStopTest { execution_id } => {
                if coordinator.force_stop(&execution_id) {
                    DaemonResponse::Success(format!("Stop requested for {}", execution_id))
                } else {
                    DaemonResponse::Error {
                        kind: "NotRunningError".to_string(),
                        message: format!("Execution {} is not running", execution_id),
                        exit_code: 1,
                    }
                }
            }
            DaemonRequest::ForceReset => DaemonResponse::from_result(coordinator.force_reset(), |n| {
                DaemonResponse::Success(format!("Reset {} executions", n))
            }),
            DaemonRequest::CaptureFullPageScreenshot { tab } => DaemonResponse::from_result(
                coordinator.capture_full_page(&tab).await,
                DaemonResponse::Screenshot,
            ),
            DaemonRequest::Events { execution_id } => {
                DaemonResponse::Events(coordinator.events(&execution_id))
            }
            DaemonRequest::ListTests => {
                DaemonResponse::from_result(coordinator.list_tests(), DaemonResponse::TestList)
            }
            DaemonRequest::GetTest { name } => {
                DaemonResponse::from_result(coordinator.get_test(&name), |test| {
                    DaemonResponse::Test(test.map(Box::new))
                })
            }
            DaemonRequest::SaveTest { test } => {
                let name = test.name.clone();
                DaemonResponse::from_result(coordinator.save_test(*test), |()| {
                    DaemonResponse::Success(format!("Saved test '{}'", name))
                })
            }
            DaemonRequest::DeleteTest { name } => match coordinator.delete_test(&name) {
                Ok(true) => DaemonResponse::Success(format!("Deleted test '{}'", name)),
                Ok(false) => DaemonResponse::Error {
                    kind: "Error".to_string(),
                    message: format!("Test '{}' not found", name),
                    exit_code: 1,
                },
                Err(e) => DaemonResponse::from_error(e),
            },
            DaemonRequest::GetSettings => {
                DaemonResponse::from_result(coordinator.settings(), DaemonResponse::Settings)
            }
            DaemonRequest::UpdateSettings {
                recording_delay,
                replay_delay,
            } => DaemonResponse::from_result(
                coordinator.update_settings(recording_delay, replay_delay),
                DaemonResponse::Settings,
            ),
            DaemonRequest::ListTabs => DaemonResponse::TabList(coordinator.list_tabs().await),
            DaemonRequest::CloseTab { name } => {
                if coordinator.close_tab(&name).await {
                    DaemonResponse::Success(format!("Tab '{}' closed", name))
                } else {
                    DaemonResponse::Error {
                        kind: "Error".to_string(),
                        message: format!("Tab '{}' not found", name),
                        exit_code: 1,
                    }
                }
            }
            DaemonRequest::Ping => DaemonResponse::Pong,
            DaemonRequest::Shutdown => DaemonResponse::Success("Daemon shutting down".to_string()),
        }
    }

    fn write_response(stream: &mut Stream, response: &DaemonResponse) -> Result<()> {
        let response_json = serde_json::to_string(response)?;
        stream.write_all(response_json.as_bytes())?;
        stream.write_all(b"\n")?;
        stream.flush()?;
        Ok(())
    }
}

/// Client for communicating with the daemon
pub struct DaemonClient;

impl DaemonClient {
    /// Send a request, reconnecting once if the daemon cannot be reached
    pub fn send_request(request: DaemonRequest) -> Result<DaemonResponse> {
        Self::round_trip(Self::connect, |stream| Self::exchange(stream, &request))
    }

    /// Only a failed connect is retried. Once the request line may have
    /// reached the daemon, sending it again could run it twice.
    fn round_trip<S>(
        mut connect: impl FnMut() -> Result<S>,
        exchange: impl FnOnce(S) -> Result<DaemonResponse>,
    ) -> Result<DaemonResponse> {
        let stream = match connect() {
            Ok(stream) => stream,
            Err(first) => {
                warn!("Daemon connection failed, reconnecting: {}", first);
                std::thread::sleep(RECONNECT_DELAY);
                connect().map_err(|e| {
                    ReplayError::Transport(format!(
                        "{:#}. Restart the daemon and retry (retrace daemon start)",
                        e
                    ))
                })?
            }
        };

        exchange(stream).map_err(|e| match e.downcast::<ReplayError>() {
            Ok(replay_err) => replay_err.into(),
            Err(e) => ReplayError::Transport(format!("{:#}", e)).into(),
        })
    }

    /// Round-trip a ping within [`PING_TIMEOUT`]
    pub async fn ping() -> Result<Duration> {
        let started = std::time::Instant::now();
        let response = tokio::time::timeout(
            PING_TIMEOUT,
            tokio::task::spawn_blocking(|| Self::exchange(Self::connect()?, &DaemonRequest::Ping)),
        )
        .await
        .map_err(|_| ReplayError::Timeout(format!("Daemon did not answer within {:?}", PING_TIMEOUT)))???;

        match response {
            DaemonResponse::Pong => Ok(started.elapsed()),
            other => anyhow::bail!("Unexpected ping response: {:?}", other),
        }
    }

    fn connect() -> Result<Stream> {
        let name = Daemon::get_socket_name()?;
        Stream::connect(name).context("Failed to connect to daemon. Is it running?")
    }

    fn exchange(mut stream: Stream, request: &DaemonRequest) -> Result<DaemonResponse> {
        let request_json = serde_json::to_string(request)?;
        stream.write_all(request_json.as_bytes())?;
        stream.write_all(b"\n")?;
        stream.flush()?;

        let mut reader = BufReader::new(stream);
        let mut response_line = String::new();
        match reader.read_line(&mut response_line)? {
            0 => anyhow::bail!("Daemon closed connection without sending response"),
            _ if response_line.trim().is_empty() => {
                anyhow::bail!("Received empty response from daemon")
            }
            _ => serde_json::from_str(&response_line)
                .with_context(|| format!("Failed to parse daemon response: {}", response_line)),
        }
    }

    pub fn is_daemon_running() -> bool {
        Daemon::is_running()
    }
}
