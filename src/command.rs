//! MPD commands: a single verb plus ordered parameters, or a batch of
//! those rendered as a `command_list`.
//!
//! Rendering rules (section 6): verb, then space-separated quoted
//! parameters, then `\n`. A batch is `command_list_begin\n` + each
//! command's rendered form, concatenated, + `command_list_end\n`.

use std::fmt;

/// A single command parameter.
///
/// Strings are escaped and double-quoted; integers are rendered as plain
/// decimal; booleans are rendered as the quoted strings `"0"`/`"1"`, the
/// form MPD itself expects for boolean-valued arguments (e.g. `random 1`
/// is also accepted unquoted, but quoting is always safe).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Param {
    Str(String),
    Int(i64),
    Bool(bool),
}

impl Param {
    fn render_into(&self, buf: &mut String) {
        match self {
            Param::Str(s) => {
                buf.push('"');
                for c in s.chars() {
                    if c == '\\' || c == '"' {
                        buf.push('\\');
                    }
                    buf.push(c);
                }
                buf.push('"');
            }
            Param::Int(i) => {
                buf.push_str(&i.to_string());
            }
            Param::Bool(b) => {
                buf.push_str(if *b { "\"1\"" } else { "\"0\"" });
            }
        }
    }
}

impl From<&str> for Param {
    fn from(s: &str) -> Self {
        Param::Str(s.to_owned())
    }
}

impl From<String> for Param {
    fn from(s: String) -> Self {
        Param::Str(s)
    }
}

impl From<i64> for Param {
    fn from(i: i64) -> Self {
        Param::Int(i)
    }
}

impl From<bool> for Param {
    fn from(b: bool) -> Self {
        Param::Bool(b)
    }
}

/// The closed set of verbs this crate knows how to render (section 6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Play,
    Pause,
    Stop,
    Previous,
    Next,
    PlaylistInfo,
    Status,
    LsInfo,
    Idle,
    Ping,
    EnableOutput,
    DisableOutput,
    Outputs,
    Clear,
    Delete,
    Move,
    Shuffle,
    Add,
    AddId,
    PlayId,
    Seek,
    ListAll,
    ListAllInfo,
    Update,
    ListPlaylists,
    ListPlaylistInfo,
    Random,
    Repeat,
    Single,
    Consume,
    Load,
    Rm,
    Save,
    Rename,
    Password,
}

impl CommandKind {
    pub fn as_str(self) -> &'static str {
        use CommandKind::*;
        match self {
            Play => "play",
            Pause => "pause",
            Stop => "stop",
            Previous => "previous",
            Next => "next",
            PlaylistInfo => "playlistinfo",
            Status => "status",
            LsInfo => "lsinfo",
            Idle => "idle",
            Ping => "ping",
            EnableOutput => "enableoutput",
            DisableOutput => "disableoutput",
            Outputs => "outputs",
            Clear => "clear",
            Delete => "delete",
            Move => "move",
            Shuffle => "shuffle",
            Add => "add",
            AddId => "addid",
            PlayId => "playid",
            Seek => "seek",
            ListAll => "listall",
            ListAllInfo => "listallinfo",
            Update => "update",
            ListPlaylists => "listplaylists",
            ListPlaylistInfo => "listplaylistinfo",
            Random => "random",
            Repeat => "repeat",
            Single => "single",
            Consume => "consume",
            Load => "load",
            Rm => "rm",
            Save => "save",
            Rename => "rename",
            Password => "password",
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single MPD command: a verb plus its ordered parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    kind: CommandKind,
    params: Vec<Param>,
}

impl Command {
    /// A command with no parameters.
    pub fn new(kind: CommandKind) -> Command {
        Command {
            kind,
            params: Vec::new(),
        }
    }

    /// Append a parameter, builder-style.
    pub fn arg(mut self, param: impl Into<Param>) -> Command {
        self.params.push(param.into());
        self
    }

    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    /// Render this command's wire form, terminated by `\n`.
    pub fn render(&self) -> String {
        if self.params.is_empty() {
            return format!("{}\n", self.kind.as_str());
        }
        let mut out = String::from(self.kind.as_str());
        for param in &self.params {
            out.push(' ');
            param.render_into(&mut out);
        }
        out.push('\n');
        out
    }
}

/// An ordered batch of single commands, rendered as one MPD command list.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandList {
    commands: Vec<Command>,
}

impl CommandList {
    pub fn new() -> CommandList {
        CommandList::default()
    }

    pub fn push(&mut self, command: Command) {
        self.commands.push(command);
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Split `commands` into batches of at most `cap` commands each,
    /// preserving order (section 4.3: "split the user's sequence of
    /// single commands into batches of at most M commands each").
    pub fn chunks(commands: Vec<Command>, cap: usize) -> Vec<CommandList> {
        assert!(cap > 0, "batch cap must be non-zero");
        commands
            .chunks(cap)
            .map(|chunk| CommandList {
                commands: chunk.to_vec(),
            })
            .collect()
    }

    /// Render this batch's wire form: `command_list_begin\n` + each
    /// command's rendered form + `command_list_end\n`.
    pub fn render(&self) -> String {
        let mut out = String::from("command_list_begin\n");
        for command in &self.commands {
            out.push_str(&command.render());
        }
        out.push_str("command_list_end\n");
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_command_with_no_params() {
        assert_eq!(Command::new(CommandKind::Status).render(), "status\n");
    }

    #[test]
    fn renders_quoted_string_param() {
        let cmd = Command::new(CommandKind::Add).arg("foo/bar.mp3");
        assert_eq!(cmd.render(), "add \"foo/bar.mp3\"\n");
    }

    #[test]
    fn escapes_backslash_and_quote() {
        let cmd = Command::new(CommandKind::Add).arg("a\"b\\c");
        assert_eq!(cmd.render(), "add \"a\\\"b\\\\c\"\n");
    }

    #[test]
    fn renders_int_param_unquoted() {
        let cmd = Command::new(CommandKind::Seek).arg(1i64).arg(42i64);
        assert_eq!(cmd.render(), "seek 1 42\n");
    }

    #[test]
    fn renders_bool_param_quoted() {
        let cmd = Command::new(CommandKind::Random).arg(true);
        assert_eq!(cmd.render(), "random \"1\"\n");
        let cmd = Command::new(CommandKind::Random).arg(false);
        assert_eq!(cmd.render(), "random \"0\"\n");
    }

    #[test]
    fn splits_into_batches_of_cap() {
        let commands: Vec<_> = (0..6)
            .map(|i| Command::new(CommandKind::Add).arg(i as i64))
            .collect();
        let batches = CommandList::chunks(commands, 2);
        assert_eq!(batches.len(), 3);
        for batch in &batches {
            assert_eq!(batch.len(), 2);
        }
    }

    #[test]
    fn renders_batch_frame() {
        let mut list = CommandList::new();
        list.push(Command::new(CommandKind::Play));
        list.push(Command::new(CommandKind::Status));
        assert_eq!(
            list.render(),
            "command_list_begin\nplay\nstatus\ncommand_list_end\n"
        );
    }
}
