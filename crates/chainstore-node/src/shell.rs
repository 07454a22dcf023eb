//! Interactive operator shell with command completion and history.

use rustyline::completion::{Completer, Pair};
use rustyline::error::ReadlineError;
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::history::DefaultHistory;
use rustyline::validate::Validator;
use rustyline::{Editor, Helper};

use crate::NodeSupervisor;

/// Help text for the shell.
const HELP_TEXT: &str = r#"
Commands:
    Local-store-ps <number of processes>
    Create-chain
    List-chain
    Clear
    Remove-head
    Restore-head
    Write-operation <"name,price"> <timeout>
    Read-operation <name>
    List-books
    Data-status <process id>
    Help
    Exit
"#;

/// Command names for tab completion.
const COMMANDS: &[&str] = &[
    "Local-store-ps",
    "Create-chain",
    "List-chain",
    "Clear",
    "Remove-head",
    "Restore-head",
    "Write-operation",
    "Read-operation",
    "List-books",
    "Data-status",
    "Help",
    "Exit",
];

/// A parsed operator command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    LocalStorePs(usize),
    CreateChain,
    ListChain,
    Clear,
    RemoveHead,
    RestoreHead,
    WriteOperation {
        key: String,
        value: f64,
        delay_secs: u32,
    },
    ReadOperation(String),
    ListBooks,
    DataStatus(String),
    Help,
    Exit,
}

/// Why a line did not parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    Empty,
    UnknownCommand,
    InvalidArguments,
}

impl Command {
    /// Parses one input line: whitespace-separated command and arguments.
    pub fn parse(line: &str) -> Result<Self, ParseError> {
        let mut tokens = line.split_whitespace();
        let command = tokens.next().ok_or(ParseError::Empty)?;
        let args: Vec<&str> = tokens.collect();

        let arity = |expected: usize| {
            if args.len() == expected {
                Ok(())
            } else {
                Err(ParseError::InvalidArguments)
            }
        };

        match command {
            "Local-store-ps" => {
                arity(1)?;
                let count = args[0].parse().map_err(|_| ParseError::InvalidArguments)?;
                Ok(Command::LocalStorePs(count))
            }
            "Create-chain" => arity(0).map(|()| Command::CreateChain),
            "List-chain" => arity(0).map(|()| Command::ListChain),
            "Clear" => arity(0).map(|()| Command::Clear),
            "Remove-head" => arity(0).map(|()| Command::RemoveHead),
            "Restore-head" => arity(0).map(|()| Command::RestoreHead),
            "Write-operation" => {
                arity(2)?;
                let book = args[0].trim_matches('"');
                let (key, price) = book.split_once(',').ok_or(ParseError::InvalidArguments)?;
                let value = price.parse().map_err(|_| ParseError::InvalidArguments)?;
                let delay_secs = args[1].parse().map_err(|_| ParseError::InvalidArguments)?;
                Ok(Command::WriteOperation {
                    key: key.to_string(),
                    value,
                    delay_secs,
                })
            }
            "Read-operation" => {
                arity(1)?;
                Ok(Command::ReadOperation(args[0].to_string()))
            }
            "List-books" => arity(0).map(|()| Command::ListBooks),
            "Data-status" => {
                arity(1)?;
                Ok(Command::DataStatus(args[0].to_string()))
            }
            "Help" => arity(0).map(|()| Command::Help),
            "Exit" => arity(0).map(|()| Command::Exit),
            _ => Err(ParseError::UnknownCommand),
        }
    }
}

/// Rustyline helper completing command names at the start of the line.
struct CommandHelper;

impl Completer for CommandHelper {
    type Candidate = Pair;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        _ctx: &rustyline::Context<'_>,
    ) -> rustyline::Result<(usize, Vec<Pair>)> {
        // Only the first word is a command.
        if line[..pos].contains(char::is_whitespace) {
            return Ok((pos, vec![]));
        }

        let prefix = &line[..pos];
        let candidates = COMMANDS
            .iter()
            .filter(|cmd| cmd.starts_with(prefix))
            .map(|cmd| Pair {
                display: (*cmd).to_string(),
                replacement: (*cmd).to_string(),
            })
            .collect();
        Ok((0, candidates))
    }
}

impl Hinter for CommandHelper {
    type Hint = String;
}

impl Highlighter for CommandHelper {}
impl Validator for CommandHelper {}
impl Helper for CommandHelper {}

/// Prints the command summary.
pub fn print_help() {
    println!("{HELP_TEXT}");
}

/// Runs the interactive shell until `Exit` or end of input.
pub fn run(supervisor: &mut NodeSupervisor) -> anyhow::Result<()> {
    print_help();

    let mut editor: Editor<CommandHelper, DefaultHistory> = Editor::new()?;
    editor.set_helper(Some(CommandHelper));

    loop {
        match editor.readline("> ") {
            Ok(line) => {
                if line.trim().is_empty() {
                    continue;
                }
                let _ = editor.add_history_entry(line.as_str());

                match Command::parse(&line) {
                    Ok(Command::Exit) => break,
                    Ok(command) => execute(supervisor, command),
                    Err(ParseError::Empty) => {}
                    Err(ParseError::UnknownCommand) => println!("Invalid command."),
                    Err(ParseError::InvalidArguments) => {
                        println!("Invalid arguments to the command.");
                    }
                }
            }
            Err(ReadlineError::Interrupted | ReadlineError::Eof) => break,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

fn execute(supervisor: &mut NodeSupervisor, command: Command) {
    let outcome = match command {
        Command::LocalStorePs(count) => supervisor.local_store_ps(count),
        Command::CreateChain => supervisor.create_chain().map(|_| ()),
        Command::ListChain => match supervisor.list_chain() {
            Ok(listing) => {
                println!("{listing}");
                Ok(())
            }
            Err(e) => Err(e),
        },
        Command::Clear => supervisor.clear(),
        Command::RemoveHead => supervisor.remove_head(),
        Command::RestoreHead => supervisor.restore_head(),
        Command::WriteOperation {
            key,
            value,
            delay_secs,
        } => supervisor.write(&key, value, delay_secs),
        Command::ReadOperation(key) => match supervisor.read(&key) {
            Ok((value, true)) => {
                println!("{key} = {value}");
                Ok(())
            }
            Ok((_, false)) => {
                println!("{key} not found");
                Ok(())
            }
            Err(e) => Err(e),
        },
        Command::ListBooks => match supervisor.list_books() {
            Ok(books) => {
                for (key, value) in books {
                    println!("{key}: {value}");
                }
                Ok(())
            }
            Err(e) => Err(e),
        },
        Command::DataStatus(process_id) => match supervisor.data_status(&process_id) {
            Ok(status) => {
                for (key, tag) in status {
                    println!("{key}: {tag}");
                }
                Ok(())
            }
            Err(e) => Err(e),
        },
        Command::Help => {
            print_help();
            Ok(())
        }
        Command::Exit => unreachable!("Exit is handled by the loop"),
    };

    if let Err(e) = outcome {
        println!("{e}");
    }
}
