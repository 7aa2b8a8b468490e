/// A parsed protocol line.
///
/// Lines are split on `|` into at most three fields, so a payload may itself
/// contain the delimiter. The command token is case-insensitive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Publish { topic: String, payload: String },
    Subscribe { topic: String },
    Reset { topic: String },
}

impl Command {
    pub const DELIMITER: char = '|';

    /// Parse one line. Returns `None` for anything that is not a well-formed
    /// command; such lines are meant to be skipped.
    pub fn parse(line: &str) -> Option<Self> {
        let mut fields = line.splitn(3, Self::DELIMITER);
        let name = fields.next()?;
        let topic = fields.next()?.to_string();
        let rest = fields.next();

        match name.trim().to_ascii_lowercase().as_str() {
            "pub" => rest.map(|payload| Command::Publish {
                topic,
                payload: payload.to_string(),
            }),
            "sub" => Some(Command::Subscribe { topic }),
            "reset" => Some(Command::Reset { topic }),
            _ => None,
        }
    }

    pub fn topic(&self) -> &str {
        match self {
            Command::Publish { topic, .. } | Command::Subscribe { topic } | Command::Reset { topic } => {
                topic
            }
        }
    }

    /// Encode without the trailing newline.
    pub fn to_line(&self) -> String {
        match self {
            Command::Publish { topic, payload } => format!("pub|{topic}|{payload}"),
            Command::Subscribe { topic } => format!("sub|{topic}"),
            Command::Reset { topic } => format!("reset|{topic}"),
        }
    }
}
