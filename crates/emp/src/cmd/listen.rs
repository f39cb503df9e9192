use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Duration;

use emp_client::{CommandTable, EmpContext, InboundCommand, RecoveryCallback};

use crate::cmd::ListenArgs;
use crate::exit::{emp_error, CliError, CliResult, SUCCESS};
use crate::output::{print_exchange, Exchange, OutputFormat};

const POLL_INTERVAL: Duration = Duration::from_millis(200);

pub fn run(args: ListenArgs, format: OutputFormat) -> CliResult<i32> {
    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let (inbound_tx, inbound_rx) = mpsc::channel::<InboundCommand>();
    let status = args.status;
    let mut commands = CommandTable::new();
    for &command in &args.commands {
        let inbound_tx = inbound_tx.clone();
        commands = commands.on(command, move |cmd| {
            let _ = inbound_tx.send(cmd);
            status
        });
    }
    drop(inbound_tx);

    let context = EmpContext::new(args.addr.config());
    let recovered: RecoveryCallback = Arc::new(|| tracing::info!("reconnected to agent"));
    let client = context
        .init(commands, Some(recovered))
        .map_err(|err| emp_error("connect failed", err))?;
    tracing::info!(commands = ?args.commands, %status, "listening for agent commands");

    let mut printed = 0usize;
    while running.load(Ordering::SeqCst) {
        let cmd = match inbound_rx.recv_timeout(POLL_INTERVAL) {
            Ok(cmd) => cmd,
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        };

        let exchange = Exchange::new(
            "inbound",
            cmd.command,
            Some(cmd.request_id),
            status,
            &cmd.payload,
        );
        print_exchange(&exchange, &cmd.payload, format);
        printed = printed.saturating_add(1);

        if let Some(count) = args.count {
            if printed >= count {
                break;
            }
        }
    }

    // Handlers queue the command before their status goes out.
    client.wait_for_handlers(None);
    client
        .teardown()
        .map_err(|err| emp_error("teardown failed", err))?;
    Ok(SUCCESS)
}

pub(crate) fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| {
        CliError::new(
            crate::exit::INTERNAL,
            format!("signal handler setup failed: {err}"),
        )
    })
}
