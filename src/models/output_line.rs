//! Output Line Model
//!
//! Items travelling through a command's result hand-off: remote output
//! lines followed by exactly one terminal marker.

/// One item of a command's result stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputLine {
    /// A line of remote output, without its line terminator
    Line(String),
    /// No more output for this command
    Sentinel,
    /// The shell channel closed while the command was in flight
    Closed {
        /// Exit status reported by the remote side, if any
        exit_status: Option<u32>,
    },
}

impl OutputLine {
    /// Whether this item ends the result stream
    pub fn is_terminal(&self) -> bool {
        !matches!(self, OutputLine::Line(_))
    }

    /// Text of a regular output line
    pub fn text(&self) -> Option<&str> {
        match self {
            OutputLine::Line(text) => Some(text),
            _ => None,
        }
    }
}
