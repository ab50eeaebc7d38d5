//! Translate `ScanOptions` into the scanner's argument vector.

use crate::error::ScanError;
use crate::model::ScanOptions;

const REDACTED: &str = "***";

/// Build the argument vector (without the program name) for one scan.
///
/// Extra arguments are appended last so they can override the built-in flags.
pub fn build_argv(opts: &ScanOptions) -> Result<Vec<String>, ScanError> {
    let target = opts.target.trim();
    if target.is_empty() {
        return Err(ScanError::Validation);
    }

    // Tokenize before touching the output so a failure never yields a partial argv.
    let extra = split_extra_args(&opts.extra_args)?;

    let mut argv = vec!["--url".to_string(), target.to_string()];

    let enumerate: Vec<&str> = [
        (opts.enumerate_users, "u"),
        (opts.enumerate_plugins, "p"),
        (opts.enumerate_themes, "t"),
    ]
    .into_iter()
    .filter_map(|(on, letter)| on.then_some(letter))
    .collect();
    if !enumerate.is_empty() {
        argv.push("--enumerate".into());
        argv.push(enumerate.join(","));
    }

    let flags = [
        (opts.random_user_agent, "--random-user-agent"),
        (opts.verbose, "--verbose"),
        (opts.ignore_main_redirect, "--ignore-main-redirect"),
        (opts.no_update, "--no-update"),
        (opts.ignore_tls_errors, "--disable-tls-checks"),
        (opts.force, "--force"),
    ];
    argv.extend(
        flags
            .into_iter()
            .filter(|(on, _)| *on)
            .map(|(_, flag)| flag.to_string()),
    );

    if opts.plain_output {
        argv.push("--format".into());
        argv.push("cli-no-colour".into());
    }

    if let Some(token) = opts.api_token.as_deref().map(str::trim) {
        if !token.is_empty() {
            argv.push("--api-token".into());
            argv.push(token.to_string());
        }
    }

    argv.extend(extra);
    Ok(argv)
}

fn split_extra_args(extra: &str) -> Result<Vec<String>, ScanError> {
    let extra = extra.trim();
    if extra.is_empty() {
        return Ok(Vec::new());
    }
    shlex::split(extra).ok_or_else(|| ScanError::ExtraArgs(extra.to_string()))
}

/// Render a shell-like command line for display, hiding the API token value.
pub fn render_command(program: &str, argv: &[String]) -> String {
    let mut parts = Vec::with_capacity(argv.len() + 1);
    parts.push(quote(program));
    parts.extend(redacted_parts(argv));
    parts.join(" ")
}

/// Extra-arguments string with any `--api-token` value replaced, for storage.
///
/// A string that cannot be tokenized is dropped entirely since the token could be anywhere in it.
pub fn redact_extra_args(extra: &str) -> String {
    match split_extra_args(extra) {
        Ok(tokens) => redacted_parts(&tokens).join(" "),
        Err(_) => REDACTED.to_string(),
    }
}

/// Shell-quoted arguments with token values masked.
fn redacted_parts(argv: &[String]) -> Vec<String> {
    let mut parts = Vec::with_capacity(argv.len());
    let mut hide_next = false;
    for arg in argv {
        if hide_next {
            parts.push(REDACTED.to_string());
            hide_next = false;
            continue;
        }
        if arg == "--api-token" {
            hide_next = true;
        } else if arg.starts_with("--api-token=") {
            parts.push(format!("--api-token={REDACTED}"));
            continue;
        }
        parts.push(quote(arg));
    }
    parts
}

fn quote(arg: &str) -> String {
    shlex::try_quote(arg)
        .map(|q| q.into_owned())
        .unwrap_or_else(|_| arg.to_string())
}
