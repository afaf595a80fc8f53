pub mod config;
pub mod database;
pub mod decoder;
pub mod drainer;
pub mod mtgsyncd;
pub mod source;
pub mod store;
mod threadmessages;

pub const VERSION: &str = "0.1.0";

use crate::{
    config::{Config, ConfigError},
    database::{actions::setup_db, DatabaseError},
    decoder::{JsonDecoder, TransactionDecoder},
    drainer::{
        drainer_loop,
        stream::{CollectibleStream, DrainStream, FungibleStream},
        DrainerContext, DrainerError, RetryPolicy,
    },
    mtgsyncd::MtgSyncD,
    source::{JsonRpcSource, OutputsSource, SourceError},
    store::{SqliteStore, Store},
    threadmessages::{DrainerSender, DrainerThread},
};

use std::{
    error, fmt, io, panic, process,
    sync::{mpsc, Arc},
    thread,
    time::Duration,
};

use daemonize_simple::Daemonize;

// A panic in any thread should stop the main thread, and print the panic.
fn setup_panic_hook() {
    panic::set_hook(Box::new(move |panic_info| {
        let file = panic_info
            .location()
            .map(|l| l.file())
            .unwrap_or_else(|| "'unknown'");
        let line = panic_info
            .location()
            .map(|l| l.line().to_string())
            .unwrap_or_else(|| "'unknown'".to_string());

        let bt = backtrace::Backtrace::new();
        let info = panic_info
            .payload()
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| panic_info.payload().downcast_ref::<String>().cloned());
        log::error!(
            "panic occurred at line {} of file {}: {:?}\n{:?}",
            line,
            file,
            info,
            bt
        );

        process::exit(1);
    }));
}

#[derive(Debug)]
pub enum StartupError {
    Config(ConfigError),
    Io(io::Error),
    Db(DatabaseError),
    Source(SourceError),
    Daemonize(String),
}

impl fmt::Display for StartupError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Config(e) => write!(f, "{}", e),
            Self::Io(e) => write!(f, "{}", e),
            Self::Db(e) => write!(f, "Database error when starting mtgsyncd: '{}'", e),
            Self::Source(e) => write!(f, "Network service error when starting mtgsyncd: '{}'", e),
            Self::Daemonize(e) => write!(f, "Error daemonizing: '{}'", e),
        }
    }
}

impl error::Error for StartupError {}

impl From<ConfigError> for StartupError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

impl From<io::Error> for StartupError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<DatabaseError> for StartupError {
    fn from(e: DatabaseError) -> Self {
        Self::Db(e)
    }
}

impl From<SourceError> for StartupError {
    fn from(e: SourceError) -> Self {
        Self::Source(e)
    }
}

struct DrainerHandle {
    name: &'static str,
    conn: DrainerSender,
    thread: thread::JoinHandle<()>,
}

// Start a drainer thread. Its unrecoverable error, if any, is reported on `fatal_tx`.
fn spawn_drainer<S: DrainStream>(
    stream: S,
    ctx: DrainerContext,
    poll_interval: Duration,
    fatal_tx: mpsc::Sender<DrainerError>,
) -> Result<DrainerHandle, io::Error> {
    let name = stream.name();
    let (tx, rx) = mpsc::channel();
    let thread = thread::Builder::new()
        .name(format!("drainer ({})", name))
        .spawn(move || {
            if let Err(e) = drainer_loop(rx, stream, ctx, poll_interval) {
                // If the main thread is gone, there is no one to tell anyways.
                let _ = fatal_tx.send(e);
            }
        })?;

    Ok(DrainerHandle {
        name,
        conn: tx.into(),
        thread,
    })
}

pub struct DaemonHandle {
    drainers: Vec<DrainerHandle>,
    fatal_rx: mpsc::Receiver<DrainerError>,
}

impl DaemonHandle {
    /// This starts the sync daemon. Call `wait` to wait for it to stop on error, or `shutdown`
    /// to stop it.
    ///
    /// **Note**: we internally use threads, and set a panic hook. A downstream application must
    /// not overwrite this panic hook.
    pub fn start(config: Config) -> Result<Self, StartupError> {
        setup_panic_hook();

        let mtgsyncd = MtgSyncD::from_config(config)?;
        log::info!("Using data directory {:?}", mtgsyncd.data_dir);

        // First and foremost
        log::info!("Setting up database");
        setup_db(&mtgsyncd)?;

        log::info!("Setting up the network service client");
        let source = JsonRpcSource::new(&mtgsyncd.network_config)?;

        // NOTE: it's safe to daemonize now, as we don't carry any open DB connection
        // https://www.sqlite.org/howtocorrupt.html#_carrying_an_open_database_connection_across_a_fork_
        if mtgsyncd.daemon {
            log::info!("Daemonizing");
            let log_file = mtgsyncd.log_file();
            let daemon = Daemonize {
                pid_file: Some(mtgsyncd.pid_file()),
                stdout_file: Some(log_file.clone()),
                stderr_file: Some(log_file),
                chdir: Some(mtgsyncd.data_dir.clone()),
                append: true,
                ..Daemonize::default()
            };
            daemon
                .doit()
                .map_err(|e| StartupError::Daemonize(e.to_string()))?;
        }

        let handle = Self::start_drainers(
            &mtgsyncd,
            Arc::new(SqliteStore::new(mtgsyncd.db_file())),
            Arc::new(source),
            Arc::new(JsonDecoder),
        )?;
        log::info!(
            "mtgsyncd started for a {}-of-{} group",
            mtgsyncd.group.threshold,
            mtgsyncd.group.members.len()
        );

        Ok(handle)
    }

    /// Start one drainer thread per stream, using these collaborators.
    pub fn start_drainers(
        mtgsyncd: &MtgSyncD,
        store: Arc<dyn Store>,
        source: Arc<dyn OutputsSource>,
        decoder: Arc<dyn TransactionDecoder>,
    ) -> Result<Self, StartupError> {
        let drainer_config = &mtgsyncd.drainer_config;
        let ctx = DrainerContext {
            store,
            source,
            decoder,
            group: mtgsyncd.group.clone(),
            batch: drainer_config.batch,
            retry: RetryPolicy {
                interval: drainer_config.retry_interval,
            },
        };
        let (fatal_tx, fatal_rx) = mpsc::channel();

        let mut drainers = vec![spawn_drainer(
            FungibleStream,
            ctx.clone(),
            drainer_config.poll_interval,
            fatal_tx.clone(),
        )?];
        if drainer_config.collectibles {
            drainers.push(spawn_drainer(
                CollectibleStream,
                ctx,
                drainer_config.poll_interval,
                fatal_tx,
            )?);
        }

        Ok(Self { drainers, fatal_rx })
    }

    // NOTE: this moves out the data as it should not be reused after shutdown
    /// Shut down the sync daemon.
    pub fn shutdown(self) {
        for drainer in self.drainers.iter() {
            drainer.conn.shutdown();
        }
        for drainer in self.drainers {
            if drainer.thread.join().is_err() {
                log::error!("Drainer thread for {} panicked", drainer.name);
            }
        }
    }

    /// Block until a drainer hits an unrecoverable error, in which case the other ones are shut
    /// down and the error is returned. Returns `Ok` if all drainers exited cleanly.
    pub fn wait(self) -> Result<(), DrainerError> {
        match self.fatal_rx.recv() {
            Ok(e) => {
                log::error!("Stopping after an unrecoverable error: '{}'", e);
                self.shutdown();
                Err(e)
            }
            // All the senders are gone: every drainer exited without error
            Err(mpsc::RecvError) => {
                self.shutdown();
                Ok(())
            }
        }
    }
}
