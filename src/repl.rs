// File: src/repl.rs
//
// Interactive REPL for Kestrel. Buffers input until brackets balance so
// multi-line declarations work, keeps history, and runs everything in a
// single persistent VM so globals survive between inputs.

use colored::Colorize;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use crate::vm::Vm;

pub struct Repl {
    vm: Vm,
    editor: DefaultEditor,
}

impl Repl {
    pub fn new() -> Result<Repl, Box<dyn std::error::Error>> {
        let editor = DefaultEditor::new()?;
        Ok(Repl { vm: Vm::new(), editor })
    }

    fn show_banner(&self) {
        println!(
            "{} {}",
            "kestrel".bright_cyan().bold(),
            format!("v{} — interactive shell", env!("CARGO_PKG_VERSION")).bright_cyan()
        );
        println!("  {} for commands, {} to leave", ":help".bright_yellow(), ":quit".bright_yellow());
        println!();
    }

    pub fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.show_banner();

        let mut buffer = String::new();

        loop {
            let prompt = if buffer.is_empty() {
                format!("{} ", "kes>".bright_green())
            } else {
                format!("{} ", "...>".bright_blue())
            };

            match self.editor.readline(&prompt) {
                Ok(line) => {
                    let _ = self.editor.add_history_entry(line.as_str());

                    if buffer.is_empty() && line.trim_start().starts_with(':') {
                        if !self.handle_command(line.trim()) {
                            break;
                        }
                        continue;
                    }

                    buffer.push_str(&line);
                    buffer.push('\n');

                    if input_is_complete(&buffer) {
                        self.vm.interpret(&buffer);
                        buffer.clear();
                    }
                }
                Err(ReadlineError::Interrupted) => {
                    println!("{}", "^C".bright_yellow());
                    buffer.clear();
                }
                Err(ReadlineError::Eof) => break,
                Err(error) => {
                    eprintln!("{} {}", "Error:".bright_red(), error);
                    break;
                }
            }
        }

        Ok(())
    }

    /// Returns false when the REPL should exit.
    fn handle_command(&mut self, command: &str) -> bool {
        match command {
            ":help" | ":h" => {
                println!("  {:<10} show this help", ":help");
                println!("  {:<10} discard pending multi-line input", ":clear");
                println!("  {:<10} leave the shell", ":quit");
                true
            }
            ":clear" => true,
            ":quit" | ":q" | ":exit" => false,
            _ => {
                println!("Unknown command '{}'; try {}.", command, ":help".bright_yellow());
                true
            }
        }
    }
}

/// A crude balance check: input is complete once parens, brackets and
/// braces all close. String contents are skipped so braces in literals
/// do not confuse the count.
fn input_is_complete(source: &str) -> bool {
    let mut depth: i64 = 0;
    let mut in_string = false;
    let mut escaped = false;

    for c in source.chars() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }

        match c {
            '"' => in_string = true,
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth -= 1,
            _ => {}
        }
    }

    depth <= 0 && !in_string
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn balanced_input_is_complete() {
        assert!(input_is_complete("print 1 + 2;\n"));
        assert!(input_is_complete("fun f() { return 1; }\n"));
        assert!(!input_is_complete("fun f() {\n"));
        assert!(!input_is_complete("var xs = [1, 2,\n"));
    }

    #[test]
    fn strings_do_not_affect_balance() {
        assert!(input_is_complete("print \"{\";\n"));
        assert!(!input_is_complete("print \"unterminated\n"));
    }
}
