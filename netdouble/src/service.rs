use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use netdouble_log::{LogDeleterTask, LoggerGuard};
use netdouble_task::{ChildTask, ShutdownHandle, ShutdownSignal};
use tokio::runtime::{self, Runtime};

use crate::NetDoubleLog;
use crate::collector::TelemetryCollectorTask;
use crate::config::ConfHandle;
use crate::fixture::FixtureStore;
use crate::responder::SnmpResponderTask;

#[allow(clippy::large_enum_variant)] // `Running` variant is bigger than `Stopped` but we don't care
enum ServiceState {
    Stopped,
    Running {
        shutdown_handle: ShutdownHandle,
        runtime: Runtime,
    },
}

pub struct NetDoubleService {
    conf_handle: ConfHandle,
    state: ServiceState,
    _logger_guard: LoggerGuard,
}

impl NetDoubleService {
    pub fn load(conf_handle: ConfHandle) -> anyhow::Result<Self> {
        let conf = conf_handle.get_conf();

        let logger_guard = netdouble_log::init::<NetDoubleLog>(
            &conf.log_file,
            conf.verbosity_profile.to_log_filter(),
            conf.debug.log_directives.as_deref(),
        )
        .context("failed to setup logger")?;

        info!(version = env!("CARGO_PKG_VERSION"));

        let conf_file = conf_handle.get_conf_file();
        trace!(?conf_file);

        if !conf.debug.is_default() {
            warn!(
                ?conf.debug,
                "**DEBUG OPTIONS ARE ENABLED, PLEASE DO NOT USE IN PRODUCTION**",
            );
        }

        Ok(NetDoubleService {
            conf_handle,
            state: ServiceState::Stopped,
            _logger_guard: logger_guard,
        })
    }

    pub fn start(&mut self) -> anyhow::Result<()> {
        let runtime = runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .expect("failed to create runtime");

        let conf_handle = self.conf_handle.clone();

        // spawn_tasks needs to be run in the runtime in order to bind the sockets.
        let tasks = runtime.block_on(spawn_tasks(conf_handle))?;

        trace!("Tasks created");

        let mut join_all = futures::future::select_all(tasks.inner.into_iter().map(|child| Box::pin(child.join())));

        runtime.spawn(async {
            loop {
                let (result, _, rest) = join_all.await;

                match result {
                    Ok(Ok(())) => trace!("A task terminated gracefully"),
                    Ok(Err(error)) => error!(error = format!("{error:#}"), "A task failed"),
                    Err(error) => error!(%error, "Something went very wrong with a task"),
                }

                if rest.is_empty() {
                    break;
                } else {
                    join_all = futures::future::select_all(rest);
                }
            }
        });

        self.state = ServiceState::Running {
            shutdown_handle: tasks.shutdown_handle,
            runtime,
        };

        Ok(())
    }

    pub fn stop(&mut self) {
        match std::mem::replace(&mut self.state, ServiceState::Stopped) {
            ServiceState::Stopped => {
                info!("Attempted to stop the service, but it's already stopped");
            }
            ServiceState::Running {
                shutdown_handle,
                runtime,
            } => {
                info!("Stopping service");

                // Send the shutdown signal to all tasks
                shutdown_handle.signal();

                runtime.block_on(async {
                    tokio::select! {
                        _ = shutdown_handle.all_closed() => {
                            debug!("All tasks are terminated");
                        }
                        _ = tokio::time::sleep(Duration::from_secs(10)) => {
                            warn!("Terminate forcefully the lingering tasks");
                        }
                    }
                });

                // Wait for 1 more second before forcefully shutting down the runtime
                runtime.shutdown_timeout(Duration::from_secs(1));

                self.state = ServiceState::Stopped;
            }
        }
    }
}

struct Tasks {
    inner: Vec<ChildTask<anyhow::Result<()>>>,
    shutdown_handle: ShutdownHandle,
    shutdown_signal: ShutdownSignal,
}

impl Tasks {
    fn new() -> Self {
        let (shutdown_handle, shutdown_signal) = ShutdownHandle::new();

        Self {
            inner: Vec::new(),
            shutdown_handle,
            shutdown_signal,
        }
    }

    fn register<T>(&mut self, task: T)
    where
        T: netdouble_task::Task<Output = anyhow::Result<()>> + 'static,
    {
        let child = netdouble_task::spawn_task(task, self.shutdown_signal.clone());
        self.inner.push(child);
    }
}

async fn spawn_tasks(conf_handle: ConfHandle) -> anyhow::Result<Tasks> {
    let conf = conf_handle.get_conf();

    let fixtures = Arc::new(FixtureStore::builtin());

    let mut tasks = Tasks::new();

    tasks.register(LogDeleterTask::<NetDoubleLog>::new(conf.log_file.clone()));

    // Bind both listeners before spawning anything: a bind failure must abort
    // start-up without leaving the sibling half-started.
    let responder = SnmpResponderTask::init_and_bind(conf.snmp.bind_addr, conf.snmp.community.clone(), fixtures)
        .await
        .context("failed to initialize the SNMP responder")?;
    let collector = TelemetryCollectorTask::init_and_bind(conf.telemetry.bind_addr, conf.telemetry.metrics_path.clone())
        .context("failed to initialize the telemetry collector")?;

    tasks.register(responder);
    tasks.register(collector);

    Ok(tasks)
}
