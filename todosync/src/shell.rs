//! Line-oriented front end: command parsing and board rendering.
//!
//! Task positions are shown and entered 1-based; they are converted to
//! list indices here so nothing downstream sees the offset.

use std::fmt::Write as _;

use todosync_proto::task::{Category, TaskId, UnknownCategory};

use crate::sync::BoardView;
use crate::tasks::{DragLocation, DragResult, TaskAction, TaskBoard};

/// Usage summary printed by `help`.
pub const HELP: &str = "\
commands:
  add [category] <text>             add a task (default: last used category)
  use <category>                    set the default category
  rm <category> <n>                 delete task n
  done <category> <n>               toggle task n completed
  move <category> <n> <category> <n>
                                    move task n to position n of a list
  clear                             delete every task (asks first)
  list                              show all tasks
  signin <email>                    start syncing as <email>
  signout                           stop syncing
  quit                              exit
categories: non-urgent, school, club/work";

/// A parsed shell command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Create a task.
    Add {
        /// Explicit category, if the first word named one.
        category: Option<Category>,
        /// Task text.
        text: String,
    },
    /// Change the default category.
    Use(Category),
    /// Delete the task at a position.
    Remove(DragLocation),
    /// Toggle the task at a position.
    Done(DragLocation),
    /// Drag a task from one position to another.
    Move {
        /// Where the task is now.
        from: DragLocation,
        /// Where it should end up.
        to: DragLocation,
    },
    /// Delete everything, after confirmation.
    Clear,
    /// Print the board.
    List,
    /// Sign in.
    SignIn(String),
    /// Sign out.
    SignOut,
    /// Print usage.
    Help,
    /// Exit.
    Quit,
}

/// Reasons a line could not be turned into an action.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ShellError {
    /// The first word is not a command.
    #[error("unknown command {0:?} (try `help`)")]
    UnknownCommand(String),

    /// A required argument is absent.
    #[error("missing {0}")]
    MissingArgument(&'static str),

    /// A category name was not recognised.
    #[error(transparent)]
    Category(#[from] UnknownCategory),

    /// A position is not a positive number.
    #[error("invalid position {0:?}, expected a number starting at 1")]
    BadPosition(String),

    /// No task sits at the given position.
    #[error("no task #{position} in {category}")]
    NoSuchTask {
        /// The list.
        category: Category,
        /// 1-based position.
        position: usize,
    },
}

/// Parses one input line. Blank lines yield `Ok(None)`.
///
/// # Errors
///
/// Returns [`ShellError`] describing what is wrong with the line.
pub fn parse(line: &str) -> Result<Option<Command>, ShellError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (word, rest) = line
        .split_once(char::is_whitespace)
        .map_or((line, ""), |(w, r)| (w, r.trim()));
    let mut args = rest.split_whitespace();

    let command = match word.to_ascii_lowercase().as_str() {
        "add" | "a" => parse_add(rest)?,
        "use" => Command::Use(required(args.next(), "category")?.parse()?),
        "rm" | "del" | "delete" => Command::Remove(location(&mut args)?),
        "done" | "toggle" => Command::Done(location(&mut args)?),
        "move" | "mv" => Command::Move {
            from: location(&mut args)?,
            to: location(&mut args)?,
        },
        "clear" => Command::Clear,
        "list" | "ls" => Command::List,
        "signin" | "login" => Command::SignIn(required(args.next(), "email")?.to_string()),
        "signout" | "logout" => Command::SignOut,
        "help" | "?" => Command::Help,
        "quit" | "exit" | "q" => Command::Quit,
        other => return Err(ShellError::UnknownCommand(other.to_string())),
    };
    Ok(Some(command))
}

fn parse_add(rest: &str) -> Result<Command, ShellError> {
    if let Some((first, text)) = rest.split_once(char::is_whitespace)
        && let Ok(category) = first.parse::<Category>()
    {
        return Ok(Command::Add {
            category: Some(category),
            text: text.trim().to_string(),
        });
    }
    Ok(Command::Add {
        category: None,
        text: rest.to_string(),
    })
}

fn required<'a>(arg: Option<&'a str>, what: &'static str) -> Result<&'a str, ShellError> {
    arg.ok_or(ShellError::MissingArgument(what))
}

fn location<'a>(args: &mut impl Iterator<Item = &'a str>) -> Result<DragLocation, ShellError> {
    let category = required(args.next(), "category")?.parse()?;
    let raw = required(args.next(), "position")?;
    let position: usize = raw
        .parse()
        .ok()
        .filter(|n| *n > 0)
        .ok_or_else(|| ShellError::BadPosition(raw.to_string()))?;
    Ok(DragLocation::new(category, position - 1))
}

fn task_at(board: &TaskBoard, at: DragLocation) -> Result<TaskId, ShellError> {
    board
        .tasks(at.category)
        .get(at.index)
        .map(|task| task.id.clone())
        .ok_or(ShellError::NoSuchTask {
            category: at.category,
            position: at.index + 1,
        })
}

impl Command {
    /// Turns a task command into the board action it stands for.
    ///
    /// Returns `Ok(None)` for commands that are not task actions
    /// (`use`, `list`, `signin`, ...).
    ///
    /// # Errors
    ///
    /// Returns [`ShellError::NoSuchTask`] when `rm` or `done` names an
    /// empty position.
    pub fn to_action(&self, board: &TaskBoard) -> Result<Option<TaskAction>, ShellError> {
        let action = match self {
            Self::Add { category, text } => TaskAction::Create {
                text: text.clone(),
                category: *category,
            },
            Self::Remove(at) => TaskAction::Delete {
                category: at.category,
                id: task_at(board, *at)?,
            },
            Self::Done(at) => TaskAction::Toggle {
                id: task_at(board, *at)?,
            },
            Self::Move { from, to } => TaskAction::Drag(DragResult::new(*from, *to)),
            Self::Clear => TaskAction::ClearAll,
            _ => return Ok(None),
        };
        Ok(Some(action))
    }
}

/// Renders the board, the sync error banner and the default category.
#[must_use]
pub fn render(view: BoardView<'_>, selected: Category, sync_error: Option<&str>) -> String {
    let mut out = String::new();
    if let Some(error) = sync_error {
        let _ = writeln!(out, "! sync error: {error}");
    }
    let BoardView::Ready(snapshot) = view else {
        out.push_str("Syncing…\n");
        return out;
    };
    for category in Category::ALL {
        let marker = if category == selected { " *" } else { "" };
        let _ = writeln!(out, "== {category}{marker} ==");
        let tasks = snapshot.tasks(category);
        if tasks.is_empty() {
            out.push_str("  No Tasks\n");
        }
        for (n, task) in tasks.iter().enumerate() {
            let check = if task.completed { 'x' } else { ' ' };
            let _ = writeln!(out, "  {}. [{check}] {}", n + 1, task.text);
        }
    }
    out
}

/// Returns `true` if `answer` confirms a destructive action.
#[must_use]
pub fn is_confirmation(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}
