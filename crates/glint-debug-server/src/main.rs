//! main.rs — entry point for the `glint-debug-server` binary.
//!
//! Parses argv, loads a script into the reference VM, attaches the
//! debugger controller, and runs the VM to completion over whichever
//! transport was selected.
//!
//! Usage:
//!   $ glint-debug-server -p 4711 script.demo -- foo bar
//!   $ glint-debug-server script.demo          (stdio framing)

mod script;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::{Arc, Mutex};

use clap::Parser;
use color_eyre::eyre::{eyre, Result, WrapErr};
use log::info;

use glint_debug_server::{build_controller, teardown, StdioTransport, TcpTransport, Transport};
use glint_vm::{DemoVm, VmContract};

#[derive(Debug, Parser)]
#[command(
    name = "glint-debug-server",
    version,
    about = "Source-level debugger server for the reference VM",
    long_about = None
)]
struct Opt {
    /// TCP port to listen on. Omit to use `lrdb_stream_message:`-framed stdio.
    #[arg(short = 'p', long)]
    port: Option<u16>,

    /// Script to debug.
    script: PathBuf,

    /// Arguments forwarded to the script, after `--`.
    #[arg(last = true)]
    args: Vec<String>,
}

fn main() -> ExitCode {
    let opt = match Opt::try_parse() {
        Ok(opt) => opt,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::from(1);
        },
    };

    match run(opt) {
        Ok(()) => ExitCode::from(0),
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(2)
        },
    }
}

fn run(opt: Opt) -> Result<()> {
    color_eyre::install()?;
    env_logger::init();

    let source = std::fs::read_to_string(&opt.script)
        .wrap_err_with(|| format!("failed to read {}", opt.script.display()))?;
    let source_path = opt.script.to_string_lossy().into_owned();
    let program = script::parse_program(&source, &source_path).map_err(|e| eyre!("{e}"))?;

    let mut vm = DemoVm::new(program)
        .with_args(opt.args)
        .with_output(Box::new(|line: &str| println!("{line}")));

    match opt.port {
        Some(port) => {
            let transport = TcpTransport::bind(port).wrap_err("failed to bind TCP transport")?;
            info!("listening on 127.0.0.1:{port}");
            drive(&mut vm, transport);
        },
        None => {
            info!("using stdio framing");
            drive(&mut vm, StdioTransport::default());
        },
    }

    Ok(())
}

fn drive<T: Transport + 'static>(vm: &mut DemoVm, transport: T) {
    let transport = Arc::new(Mutex::new(transport));
    let controller = build_controller(transport.clone());
    vm.install_hook(controller);
    vm.run();
    teardown(&transport);
}
