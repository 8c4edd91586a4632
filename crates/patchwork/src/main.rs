//! Reads an issue report from standard input and prints a patch for it.
//!
//! Only the patch goes to standard output. Progress, logs and errors are
//! written to standard error.

#[macro_use]
extern crate tracing;

use std::env;
use std::io::IsTerminal as _;
use std::pin::pin;
use std::process::ExitCode;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;
use patchwork::IssueSolverBuilder;
use patchwork::core::{
    CancellationToken, ContractPolicy, RunConfig, RunError, RunEvent,
    to_single_line,
};
use patchwork_openai_model::{OpenAIConfigBuilder, OpenAIProvider};
use tokio::io::{self, AsyncReadExt};
use tokio::select;
use tokio::signal;
use tokio::sync::mpsc;

const BAR_CHAR: &str = "▎";

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let Ok(api_key) = env::var("OPENAI_API_KEY") else {
        eprintln!("OPENAI_API_KEY environment variable is not set");
        return ExitCode::FAILURE;
    };
    let mut openai = OpenAIConfigBuilder::with_api_key(api_key);
    if let Ok(base_url) = env::var("OPENAI_BASE_URL") {
        openai = openai.with_base_url(base_url);
    }
    if let Ok(model) = env::var("OPENAI_MODEL") {
        openai = openai.with_model(model);
    }

    let mut config = RunConfig::default();
    if let Ok(max_hops) = env::var("PATCHWORK_MAX_HOPS") {
        let Ok(max_hops) = max_hops.parse() else {
            eprintln!("PATCHWORK_MAX_HOPS must be a number, got {max_hops:?}");
            return ExitCode::FAILURE;
        };
        config = config.with_max_hops(max_hops);
    }
    if env_flag("PATCHWORK_REPROMPT") {
        config = config.with_contract_policy(ContractPolicy::Reprompt);
    }
    let one_line = env_flag("PATCHWORK_ONE_LINE");

    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let solver =
        IssueSolverBuilder::with_model_provider(OpenAIProvider::new(openai.build()))
            .with_config(config)
            .on_event(move |event| {
                event_tx.send(event.clone()).ok();
            })
            .build();
    let solver = match solver {
        Ok(solver) => solver,
        Err(err) => {
            eprintln!("{} {err}", "invalid agent graph:".bright_red().bold());
            return ExitCode::FAILURE;
        }
    };

    if std::io::stdin().is_terminal() {
        eprintln!("Paste an issue report, then press Ctrl-D:");
    }
    let Some(issue) = read_issue().await else {
        return ExitCode::FAILURE;
    };
    if issue.trim().is_empty() {
        eprintln!("the issue report is empty");
        return ExitCode::FAILURE;
    }

    let progress_bar = ProgressBar::new_spinner();
    progress_bar.set_style(
        ProgressStyle::with_template("{spinner} {wide_msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"),
    );
    progress_bar.enable_steady_tick(Duration::from_millis(100));

    let cancel = CancellationToken::new();
    let mut run = pin!(solver.solve_with_cancellation(&issue, cancel.clone()));
    let result = loop {
        select! {
            result = &mut run => break result,
            Some(event) = event_rx.recv() => {
                render_event(&progress_bar, &event);
            }
            _ = signal::ctrl_c(), if !cancel.is_cancelled() => {
                progress_bar.set_message("Cancelling...");
                cancel.cancel();
            }
        }
    };
    progress_bar.finish_and_clear();

    match result {
        Ok(result) => {
            if let Some(usage) = &result.usage {
                eprintln!(
                    "{}",
                    format!(
                        "{} requests, {} prompt + {} completion tokens",
                        usage.requests,
                        usage.total.prompt_tokens,
                        usage.total.completion_tokens
                    )
                    .dimmed()
                );
            }
            if one_line {
                println!("{}", to_single_line(&result.output));
            } else {
                print!("{}", result.output);
                if !result.output.ends_with('\n') {
                    println!();
                }
            }
            ExitCode::SUCCESS
        }
        Err(RunError::Cancelled) => {
            eprintln!("cancelled");
            ExitCode::from(130)
        }
        Err(err) => {
            eprintln!("{} {err}", "error:".bright_red().bold());
            if let RunError::ContractViolation(violation) = &err {
                eprintln!("{BAR_CHAR}{}", to_single_line(violation.text()));
            }
            ExitCode::FAILURE
        }
    }
}

fn render_event(progress_bar: &ProgressBar, event: &RunEvent) {
    match event {
        RunEvent::AgentStarted { agent } => {
            progress_bar.set_message(format!("🤔 {agent} is working..."));
        }
        RunEvent::ToolStarted { .. } => {
            progress_bar.set_message("🔎 Looking for info...");
        }
        RunEvent::Handoff { from, to } => {
            progress_bar.println(format!(
                "{}{} → {}",
                BAR_CHAR.bright_cyan(),
                from,
                to.bright_white()
            ));
        }
        RunEvent::Reprompted { agent } => {
            progress_bar.println(format!(
                "{}⚠️  {agent} did not return a patch, asking again",
                BAR_CHAR.bright_yellow()
            ));
        }
        RunEvent::ToolFinished { .. } | RunEvent::Completed { .. } => {}
    }
}

async fn read_issue() -> Option<String> {
    let mut issue = String::new();
    match io::stdin().read_to_string(&mut issue).await {
        Ok(_) => Some(issue),
        Err(err) => {
            error!("error reading input: {err}");
            None
        }
    }
}

#[inline]
fn env_flag(name: &str) -> bool {
    matches!(
        env::var(name).as_deref(),
        Ok("1" | "true" | "yes" | "on")
    )
}
