pub mod commands;

use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "verifly",
    about = "Verifly operator CLI",
    long_about = "Inspect configuration, evaluate loan eligibility, and run a scripted verification session.",
    after_help = "Examples:\n  verifly config\n  verifly eligibility --income 3000 --expenses 1500 --amount 50000 --term 60\n  verifly walkthrough --fail-upload"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Inspect effective configuration values with source attribution")]
    Config,
    #[command(about = "Compute debt ratio, monthly payment and eligible amount as JSON")]
    Eligibility {
        #[arg(long, help = "Declared monthly income")]
        income: Decimal,
        #[arg(long, help = "Declared monthly expenses")]
        expenses: Decimal,
        #[arg(long, help = "Requested loan amount")]
        amount: Decimal,
        #[arg(long, help = "Loan term in months")]
        term: u32,
    },
    #[command(about = "Run a scripted verification session against in-memory collaborators")]
    Walkthrough {
        #[arg(long, help = "Make the second bank statement upload fail")]
        fail_upload: bool,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Eligibility { income, expenses, amount, term } => {
            commands::eligibility::run(income, expenses, amount, term)
        }
        Command::Walkthrough { fail_upload } => commands::walkthrough::run(fail_upload),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
