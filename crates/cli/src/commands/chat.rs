//! `convoke chat`: Interactive or single-message mode.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use convoke::{Outcome, Session};
use convoke_core::context::CallContext;
use convoke_core::message::Message;
use convoke_security::AuditLogger;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{Mutex, Notify};

const SYSTEM_PROMPT: &str = "You are a careful assistant working inside a project directory. \
Use the file tools to inspect files before changing them. Paths are relative to the working directory.";

pub async fn run(config_path: &Path, message: Option<String>, max_steps: usize, thinking: bool) -> anyhow::Result<()> {
    let config = super::load_config(config_path)?;
    let adapter = convoke_providers::build_adapter(&config).context("Failed to set up the model backend")?;

    let access = convoke::file_access(&config.file_access, Arc::new(AuditLogger::tracing()))?;
    let registry = convoke::registry(&access);

    let mut session = Session::new(adapter, registry)
        .with_system(SYSTEM_PROMPT)
        .with_max_steps(max_steps)
        .with_thinking(thinking || config.enable_thinking);

    let interrupts = Arc::new(Interrupts::default());
    let listener = {
        let interrupts = Arc::clone(&interrupts);
        tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                interrupts.interrupt().await;
            }
        })
    };

    let result = match message {
        Some(msg) => turn(&mut session, &interrupts, msg).await,
        None => interactive(&mut session, &interrupts, &config.model, access.policy().working_dir()).await,
    };
    listener.abort();
    result
}

/// Routes Ctrl-C for the whole session: it cancels the running turn, or asks
/// the prompt loop to quit when no turn is running.
#[derive(Debug, Default)]
struct Interrupts {
    running: Mutex<Option<CallContext>>,
    quit: Notify,
}

impl Interrupts {
    async fn interrupt(&self) {
        match self.running.lock().await.as_ref() {
            Some(ctx) => ctx.cancel(),
            None => self.quit.notify_one(),
        }
    }

    async fn begin(&self) -> CallContext {
        let ctx = CallContext::new();
        *self.running.lock().await = Some(ctx.clone());
        ctx
    }

    async fn end(&self) {
        self.running.lock().await.take();
    }
}

async fn interactive(
    session: &mut Session,
    interrupts: &Interrupts,
    model: &str,
    sandbox: &Path,
) -> anyhow::Result<()> {
    println!();
    println!("  Provider:  {}", session.adapter_name());
    println!("  Model:     {model}");
    println!("  Sandbox:   {}", sandbox.display());
    println!();
    println!("  Type your message and press Enter. Ctrl+C cancels a running turn");
    println!("  and quits at the prompt, as do 'exit' and end of input.");
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("  You > ");
        std::io::stdout().flush()?;
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = interrupts.quit.notified() => None,
        };
        let Some(line) = line else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "exit" || line == "quit" {
            break;
        }
        if let Err(e) = turn(session, interrupts, line.to_string()).await {
            eprintln!("  [Error] {e:#}");
        }
    }

    println!();
    Ok(())
}

/// Run one user message to completion, printing tool activity and the answer.
async fn turn(session: &mut Session, interrupts: &Interrupts, input: String) -> anyhow::Result<()> {
    let ctx = interrupts.begin().await;
    let start = session.history().len();
    let outcome = session.send(&ctx, input).await;
    interrupts.end().await;

    for message in &session.history()[start..] {
        match message {
            Message::ToolCall(call) => {
                let args = serde_json::Value::Object(call.arguments.clone());
                println!("  [tool] {} {args}", call.tool_name);
            }
            Message::ToolResult(result) if result.is_error() => {
                println!("  [tool error] {}", result.error.as_deref().unwrap_or_default());
            }
            _ => {}
        }
    }

    match outcome {
        Ok(Outcome::Answer(answer)) => {
            if let Some(thinking) = &answer.thinking {
                for line in thinking.lines() {
                    println!("  (thinking) {line}");
                }
            }
            for line in answer.content.lines() {
                println!("  Assistant > {line}");
            }
            println!();
            Ok(())
        }
        Ok(Outcome::StepLimit { steps }) => {
            println!("  [stopped after {steps} steps without an answer]");
            Ok(())
        }
        Err(e) if ctx.is_cancelled() => {
            println!("  [cancelled]");
            tracing::debug!(error = %e, "Turn cancelled");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}
