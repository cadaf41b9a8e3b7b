//! `sciteco` - the CLI front-end for the SciTECO execution engine.
//!
//! Three modes of operation (spec.md §6):
//!
//! - `--eval macro`: evaluate the given string as a batch command line,
//!   then exit.
//! - `-m file` / `--mung file`: load `file`'s contents as a macro and run
//!   it; any remaining positional arguments are appended to the unnamed
//!   buffer as lines before the macro runs.
//! - neither: an interactive `crossterm` raw-mode key loop feeding one
//!   keystroke at a time to [`sciteco_engine::cmdline`].
//!
//! `--no-profile` skips loading `$SCITECOCONFIG/.teco_ini` (or
//! `~/.teco_ini`) before any of the above.

mod config;

use clap::Parser;
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    execute,
    terminal::disable_raw_mode,
    terminal::enable_raw_mode,
};
use sciteco_core::{Error, ErrorKind, MemDocument, Result};
use sciteco_engine::{cmdline, commands, Machine};
use std::io::{self, Write};
use std::panic;
use std::path::PathBuf;

/// An interactive implementation of the TECO command language.
#[derive(Parser, Debug)]
#[command(name = "sciteco", version, about)]
struct Args {
    /// Evaluate this macro, then exit.
    #[arg(long)]
    eval: Option<String>,

    /// Execute this file as a macro (a "mung"); remaining positional
    /// arguments become lines appended to the unnamed buffer.
    #[arg(short = 'm', long = "mung")]
    mung: Option<PathBuf>,

    /// Skip loading `$SCITECOCONFIG/.teco_ini` at startup.
    #[arg(long)]
    no_profile: bool,

    /// Positional arguments: the mung file when `-m`/`--mung` was not
    /// given explicitly, otherwise macro arguments appended as lines.
    rest: Vec<String>,
}

fn main() {
    let args = Args::parse();
    let code = match run(args) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{e}");
            1
        }
    };
    std::process::exit(code);
}

fn run(args: Args) -> Result<i32> {
    let mut m = Machine::new(MemDocument::new(), !is_batch(&args));

    if !args.no_profile {
        config::load_profile(&mut m)?;
    }

    if let Some(macro_text) = &args.eval {
        return run_batch(&mut m, macro_text);
    }

    if let Some(file) = mung_file(&args) {
        let text = std::fs::read_to_string(&file)
            .map_err(|e| Error::new(ErrorKind::Io(format!("{}: {e}", file.display()))))?;
        for line in mung_args(&args) {
            append_line(&mut m, &line);
        }
        return run_batch(&mut m, skip_shebang(&text));
    }

    run_interactive(&mut m)
}

fn is_batch(args: &Args) -> bool {
    args.eval.is_some() || mung_file(args).is_some()
}

fn mung_file(args: &Args) -> Option<PathBuf> {
    args.mung.clone().or_else(|| args.rest.first().map(PathBuf::from))
}

fn mung_args(args: &Args) -> Vec<String> {
    if args.mung.is_some() {
        args.rest.clone()
    } else {
        args.rest.iter().skip(1).cloned().collect()
    }
}

fn skip_shebang(text: &str) -> &str {
    if let Some(rest) = text.strip_prefix("#!") {
        match rest.find('\n') {
            Some(i) => &rest[i + 1..],
            None => "",
        }
    } else {
        text
    }
}

fn append_line(m: &mut Machine, line: &str) {
    let pos = m.doc().length();
    let inserted = m.doc_mut().insert(pos, line);
    m.doc_mut().insert(pos + inserted, "\n");
}

/// Feed an entire macro through the command-line controller as one batch
/// command line, then report the exit code spec.md §6 defines: the
/// argument of `EX$$`/`^C^C` if either ran, else `0`.
fn run_batch(m: &mut Machine, macro_text: &str) -> Result<i32> {
    for c in macro_text.chars() {
        match cmdline::type_char(m, c) {
            Ok(cmdline::Fed::Continued) => {}
            Ok(cmdline::Fed::Done) => break,
            Err(e) => {
                if let Some(code) = quit_code(&e) {
                    return finish_batch(m, code);
                }
                return Err(e);
            }
        }
    }
    if let Err(e) = commands::advance(m) {
        if let Some(code) = quit_code(&e) {
            return finish_batch(m, code);
        }
        if e.kind != ErrorKind::Return {
            return Err(e);
        }
    }
    commands::finish_pending_lookahead(m)?;
    finish_batch(m, m.exit_requested.unwrap_or(0))
}

fn finish_batch(m: &mut Machine, code: sciteco_core::Int) -> Result<i32> {
    if let Some(text) = m.take_message() {
        if m.take_message_newline() {
            println!("{text}");
        } else {
            print!("{text}");
            let _ = io::stdout().flush();
        }
    }
    Ok(code as i32)
}

/// `^C^C`/`EX$$` (`ErrorKind::Quit`) is not a failure -- spec.md §6 "Exit
/// code" defines it as the normal way a batch command line ends early.
fn quit_code(e: &Error) -> Option<sciteco_core::Int> {
    match e.kind {
        ErrorKind::Quit(code) => Some(code),
        _ => None,
    }
}

fn run_interactive(m: &mut Machine) -> Result<i32> {
    let original_hook = panic::take_hook();
    panic::set_hook(Box::new(move |info| {
        let _ = disable_raw_mode();
        original_hook(info);
    }));

    enable_raw_mode().map_err(|e| Error::new(ErrorKind::Io(e.to_string())))?;
    let code = interactive_loop(m);
    let _ = disable_raw_mode();
    code
}

fn interactive_loop(m: &mut Machine) -> Result<i32> {
    let mut stdout = io::stdout();
    loop {
        if let Some(text) = m.take_message() {
            let trailer = if m.take_message_newline() { "\r\n" } else { "" };
            let _ = execute!(stdout, crossterm::style::Print(format!("\r\n{text}{trailer}")));
            let _ = stdout.flush();
        }

        if !event::poll(std::time::Duration::from_millis(100))
            .map_err(|e| Error::new(ErrorKind::Io(e.to_string())))?
        {
            continue;
        }
        let ev = event::read().map_err(|e| Error::new(ErrorKind::Io(e.to_string())))?;
        let Event::Key(key) = ev else { continue };
        if key.kind != KeyEventKind::Press {
            continue;
        }

        if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
            m.interrupted.store(true, std::sync::atomic::Ordering::SeqCst);
            continue;
        }

        let fed = match key.code {
            KeyCode::Backspace => {
                cmdline::rubout(m);
                Ok(false)
            }
            KeyCode::Enter => feed_and_check_done(m, '\r'),
            KeyCode::Esc => feed_and_check_done(m, '\u{1b}'),
            KeyCode::Char(c) => feed_and_check_done(m, c),
            _ => Ok(false),
        };
        if fed? {
            return Ok(m.exit_requested.unwrap_or(0) as i32);
        }
    }
}

/// Feed one character; returns `true` once the command line has finished
/// (macro return at top level, or `^C^C`/`EX$$` requested an exit).
/// Ordinary errors are reported as a message rather than propagated --
/// spec.md §7 "the controller rubs out the offending character"; the
/// rubout itself already happened inside [`cmdline::type_char`].
fn feed_and_check_done(m: &mut Machine, c: char) -> Result<bool> {
    match cmdline::type_char(m, c) {
        Ok(cmdline::Fed::Continued) => Ok(false),
        Ok(cmdline::Fed::Done) => Ok(true),
        Err(e) => match e.kind {
            ErrorKind::Quit(code) => {
                m.exit_requested = Some(code);
                Ok(true)
            }
            _ => {
                m.push_message(format!("{e}"));
                Ok(false)
            }
        },
    }
}
