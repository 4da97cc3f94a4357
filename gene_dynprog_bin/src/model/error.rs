use std::fmt::{self, Debug, Display};

pub enum Error {
    OutOfOrder(&'static str, &'static str),
    MismatchedDimensions(&'static str, usize, usize),
    StateOutOfRange(&'static str, usize, usize),
    InconsistentOrf(usize, usize),
    UnsupportedNBest(usize, usize),
    InvalidValue(String),
    DuplicateValue(String),
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::OutOfOrder(call, required) => write!(
                f,
                "Out Of Order: {} requires {} to be completed first",
                call, required
            ),
            Error::MismatchedDimensions(what, found, expected) => write!(
                f,
                "Mismatched Dimensions for {}: Found {}, expected {}",
                what, found, expected
            ),
            Error::StateOutOfRange(what, state, num_states) => write!(
                f,
                "State Out Of Range in {}: Found {}, expected < {}",
                what, state, num_states
            ),
            Error::InconsistentOrf(from, to) => write!(
                f,
                "Inconsistent ORF phases on transition {} -> {}: both or neither state must declare a phase",
                from, to
            ),
            Error::UnsupportedNBest(requested, cap) => write!(
                f,
                "Unsupported nbest: Found {}, expected 1..={}",
                requested, cap
            ),
            Error::InvalidValue(msg) => write!(f, "Invalid Value: {}", msg),
            Error::DuplicateValue(msg) => write!(f, "Duplicate Value: {}", msg),
        }
    }
}

impl Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        Display::fmt(self, f)
    }
}

impl std::error::Error for Error {}

impl From<&str> for Error {
    fn from(msg: &str) -> Self {
        Self::InvalidValue(msg.to_string())
    }
}

impl From<String> for Error {
    fn from(msg: String) -> Self {
        Self::InvalidValue(msg)
    }
}
