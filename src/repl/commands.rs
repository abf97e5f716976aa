//! Slash command parsing.

pub const DEFAULT_LOG_LIMIT: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Exit,
    Help,
    Status,
    /// `/runner [kind]`
    Runner(Option<String>),
    Reset,
    Compact,
    /// `/config [agent provider [model]]`
    Config(Vec<String>),
    Provider(Option<String>),
    Model(Option<String>),
    Models,
    Remember(String),
    Memory,
    Log(usize),
    Stats,
    /// Write a session summary to the project directory.
    Summarize,
    /// A command that was recognized but given bad arguments.
    Invalid(String),
    Unknown(String),
    /// Anything that is not a command goes to the coordinator.
    Message(String),
}

impl Command {
    pub fn parse(line: &str) -> Command {
        let line = line.trim();
        if line.eq_ignore_ascii_case("exit") || line.eq_ignore_ascii_case("quit") {
            return Command::Exit;
        }
        if !line.starts_with('/') {
            return Command::Message(line.to_string());
        }

        let (name, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
        let rest = rest.trim();
        let arg = (!rest.is_empty()).then(|| rest.to_string());

        match name.to_ascii_lowercase().as_str() {
            "/exit" | "/quit" | "/q" => Command::Exit,
            "/help" | "/h" | "/?" => Command::Help,
            "/status" => Command::Status,
            "/runner" => Command::Runner(arg),
            "/reset" => Command::Reset,
            "/compact" => Command::Compact,
            "/config" => Command::Config(rest.split_whitespace().map(str::to_string).collect()),
            "/provider" => Command::Provider(arg),
            "/model" => Command::Model(arg),
            "/models" => Command::Models,
            "/remember" => match arg {
                Some(note) => Command::Remember(note),
                None => Command::Invalid("Usage: /remember <note>".into()),
            },
            "/memory" => Command::Memory,
            "/log" => match arg {
                None => Command::Log(DEFAULT_LOG_LIMIT),
                Some(n) => match n.parse::<usize>() {
                    Ok(n) if n > 0 => Command::Log(n),
                    _ => Command::Invalid(format!("Invalid count: {n}. Usage: /log [n]")),
                },
            },
            "/stats" => Command::Stats,
            "/summarize" => Command::Summarize,
            _ => Command::Unknown(name.to_string()),
        }
    }
}
