mod conditional;
mod exit;
mod extract;
mod foreach;
mod input;
mod loop_break;
mod print;
mod read_file;
mod send;
mod set;
mod update_column;
mod wait;
mod while_loop;
mod write_file;

pub use conditional::IfCommand;
pub use exit::ExitCommand;
pub use extract::ExtractCommand;
pub use foreach::ForeachCommand;
pub use input::InputCommand;
pub use loop_break::BreakCommand;
pub use print::PrintCommand;
pub use read_file::ReadFileCommand;
pub use send::SendCommand;
pub use set::SetCommand;
pub use update_column::UpdateColumnCommand;
pub use wait::WaitCommand;
pub use while_loop::WhileCommand;
pub use write_file::WriteFileCommand;

/// `${name}` or `name` → `name`.
pub(crate) fn variable_name(token: &str) -> &str {
    let token = token.trim();
    token
        .strip_prefix("${")
        .and_then(|t| t.strip_suffix('}'))
        .map(str::trim)
        .unwrap_or(token)
}
