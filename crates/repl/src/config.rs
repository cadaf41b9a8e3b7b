//! Start-up profile loading (spec.md §6).
//!
//! On start-up SciTECO runs `$SCITECOCONFIG/.teco_ini` as an ordinary macro
//! before handing control to the command line, or `~/.teco_ini` if that
//! variable is unset -- grounded in `original_source/src/main.cpp`'s
//! profile-loading order and `crates/compiler/src/config.rs`'s plain
//! struct-with-defaults style. `--no-profile` skips this entirely.

use sciteco_core::{ErrorKind, Result};
use sciteco_engine::machine::{Machine, MacroFrame};

/// Run the user's profile macro, if one exists, as a nested frame so it
/// leaves the top-level command line untouched once it returns.
pub fn load_profile(m: &mut Machine) -> Result<()> {
    let Some(path) = profile_path() else {
        return Ok(());
    };
    let Ok(text) = std::fs::read_to_string(&path) else {
        // No profile installed is the common case, not an error.
        return Ok(());
    };

    m.qregs.push_local_frame();
    m.macros.push(MacroFrame {
        text: text.chars().collect(),
        pc: 0,
        goto_table: Default::default(),
        loop_stack: Default::default(),
        owns_locals: true,
        description: format!("file \"{}\"", path.display()),
    });

    match sciteco_engine::commands::advance(m) {
        Ok(()) => Ok(()),
        Err(e) if e.kind == ErrorKind::Return => Ok(()),
        Err(e) => Err(e),
    }
}

fn profile_path() -> Option<std::path::PathBuf> {
    if let Some(dir) = std::env::var_os("SCITECOCONFIG") {
        return Some(std::path::PathBuf::from(dir).join(".teco_ini"));
    }
    home::home_dir().map(|h| h.join(".teco_ini"))
}
