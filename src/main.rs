use std::process::ExitCode;

use qbo_invoicer::{
    config::Config,
    error::Error,
    workflows::{create_invoices, send_invoices},
};

const USAGE: &str = "\
Usage: qbo-invoicer <--send-invoices | --create-invoices>

  --send-invoices    Email today's invoices to customers and send the summary
  --create-invoices  Create invoices for the billing period from tracked usage
  -h, --help         Show this message";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Workflow {
    SendInvoices,
    CreateInvoices,
}

impl Workflow {
    fn title(self) -> &'static str {
        match self {
            Workflow::SendInvoices => "Send Invoices",
            Workflow::CreateInvoices => "Create Invoices",
        }
    }
}

enum Command {
    Run(Workflow),
    Help,
}

fn parse_args(args: impl IntoIterator<Item = String>) -> Result<Command, String> {
    let mut selected = None;
    for arg in args {
        let workflow = match arg.as_str() {
            "-h" | "--help" => return Ok(Command::Help),
            "--send-invoices" => Workflow::SendInvoices,
            "--create-invoices" => Workflow::CreateInvoices,
            other => return Err(format!("unknown argument '{other}'")),
        };
        if selected.replace(workflow).is_some_and(|previous| previous != workflow) {
            return Err("choose only one of --send-invoices or --create-invoices".into());
        }
    }
    selected
        .map(Command::Run)
        .ok_or_else(|| "no workflow selected".into())
}

async fn run(workflow: Workflow) -> Result<bool, Error> {
    let config = Config::from_env()?;
    match workflow {
        Workflow::SendInvoices => send_invoices::run(&config).await,
        Workflow::CreateInvoices => create_invoices::run(&config).await,
    }
}

fn log_chain(error: &dyn std::error::Error) {
    log::error!("{error}");
    let mut source = error.source();
    while let Some(cause) = source {
        log::error!("  caused by: {cause}");
        source = cause.source();
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let workflow = match parse_args(std::env::args().skip(1)) {
        Ok(Command::Run(workflow)) => workflow,
        Ok(Command::Help) => {
            println!("{USAGE}");
            return ExitCode::SUCCESS;
        }
        Err(message) => {
            log::error!("{message}");
            eprintln!("{USAGE}");
            return ExitCode::FAILURE;
        }
    };

    log::info!("{}", "=".repeat(60));
    log::info!("Starting: {}", workflow.title());
    log::info!("{}", "=".repeat(60));

    let succeeded = match run(workflow).await {
        Ok(succeeded) => succeeded,
        Err(e) => {
            log_chain(&e);
            false
        }
    };

    log::info!("{}", "=".repeat(60));
    if succeeded {
        log::info!("{} COMPLETED SUCCESSFULLY", workflow.title());
        log::info!("{}", "=".repeat(60));
        ExitCode::SUCCESS
    } else {
        log::error!("{} FAILED - Check logs for details", workflow.title());
        log::info!("{}", "=".repeat(60));
        ExitCode::FAILURE
    }
}
