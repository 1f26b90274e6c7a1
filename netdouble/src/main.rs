#[macro_use]
extern crate tracing;

use anyhow::Context;
use netdouble::config::ConfHandle;
use netdouble::service::NetDoubleService;
use tap::prelude::*;

enum CliAction {
    ShowHelp,
    Run,
    ConfigInitOnly,
}

fn main() -> anyhow::Result<()> {
    let mut args = std::env::args();

    let executable = args.next().context("executable name is missing from the environment")?;

    let action = match args.next().as_deref() {
        Some("--config-init-only") => CliAction::ConfigInitOnly,
        None => CliAction::Run,
        Some(_) => CliAction::ShowHelp,
    };

    match action {
        CliAction::ShowHelp => {
            println!(
                r#"HELP:

    Run:
        "{executable}"

    Initialize configuration only (will not override existing configuration):
        "{executable}" --config-init-only
"#
            )
        }
        CliAction::ConfigInitOnly => {
            let conf_file = netdouble::config::load_conf_file_or_generate_new()?;
            let conf_file_json =
                serde_json::to_string_pretty(&conf_file).context("couldn't represent config file as JSON")?;
            println!("{conf_file_json}");
        }
        CliAction::Run => {
            let conf_handle = ConfHandle::init().context("unable to initialize configuration")?;
            let mut service = NetDoubleService::load(conf_handle).context("service loading failed")?;

            service
                .start()
                .tap_err(|error| error!(error = format!("{error:#}"), "Failed to start"))?;

            // Waiting for some stop signal (CTRL-C…)
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_io()
                .build()
                .context("failed to build the async runtime")?;
            rt.block_on(build_signals_fut())?;

            service.stop();
        }
    }

    Ok(())
}

#[cfg(unix)]
async fn build_signals_fut() -> anyhow::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate_signal = signal(SignalKind::terminate()).context("failed to create terminate signal stream")?;
    let mut quit_signal = signal(SignalKind::quit()).context("failed to create quit signal stream failed")?;
    let mut interrupt_signal =
        signal(SignalKind::interrupt()).context("failed to create interrupt signal stream failed")?;

    futures::future::select_all(vec![
        Box::pin(terminate_signal.recv()),
        Box::pin(quit_signal.recv()),
        Box::pin(interrupt_signal.recv()),
    ])
    .await;

    Ok(())
}

#[cfg(not(unix))]
async fn build_signals_fut() -> anyhow::Result<()> {
    tokio::signal::ctrl_c().await.context("CTRL_C signal failed")
}
