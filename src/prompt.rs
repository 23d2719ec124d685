use anyhow::{Context, Result, bail};
use dialoguer::Confirm;
use std::io::{self, IsTerminal};

/// Asks a yes/no question on the terminal. The default answer is no.
///
/// With `--assumeyes` the question is not shown at all. Without a terminal
/// on stdin there is nobody to answer, so this fails instead of blocking.
pub fn ask_yes_no(question: &str, assume_yes: bool) -> Result<bool> {
    ask(question, assume_yes, io::stdin().is_terminal())
}

fn ask(question: &str, assume_yes: bool, interactive: bool) -> Result<bool> {
    if assume_yes {
        return Ok(true);
    }

    if !interactive {
        bail!("{question}: not a terminal; re-run with --assumeyes to answer yes");
    }

    Confirm::new()
        .with_prompt(question)
        .default(false)
        .interact()
        .context("Failed to read the answer")
}
