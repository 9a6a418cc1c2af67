//! Interactive read-eval-print loop: read a line, interpret it, repeat.
//!
//! One [`Engine`] is reused across the whole session so `var`/`fun`/`class`
//! declarations from earlier lines stay visible to later ones, matching the
//! reference driver's "one VM instance for the REPL's lifetime" contract.
//! Line editing and a persisted history file are `rustyline`'s job; a
//! missing or unwritable history file is never fatal to the session.

use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use crate::engine::Engine;

const PROMPT: &str = "> ";

pub fn run() {
    let mut editor = DefaultEditor::new().expect("failed to initialize line editor");
    let history_path = history_path();
    if let Some(path) = &history_path {
        let _ = editor.load_history(path);
    }

    let mut engine = Engine::new();
    loop {
        match editor.readline(PROMPT) {
            Ok(line) => {
                let _ = editor.add_history_entry(line.as_str());
                let _ = engine.run(&line);
            }
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => break,
            Err(err) => {
                eprintln!("Readline error: {err}");
                break;
            }
        }
    }

    if let Some(path) = &history_path {
        let _ = editor.save_history(path);
    }
}

/// `~/.config/lox/history` on platforms `home` knows about; `None` disables
/// history persistence without disabling the REPL itself.
fn history_path() -> Option<std::path::PathBuf> {
    let mut dir = home::home_dir()?;
    dir.push(".config");
    dir.push("lox");
    std::fs::create_dir_all(&dir).ok()?;
    dir.push("history");
    Some(dir)
}
