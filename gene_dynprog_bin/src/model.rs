pub mod content;
pub mod error;
pub mod genestr;
pub mod plif;
pub mod transitions;

pub use content::{ContentModel, TilingTrack, NUM_WORD_CLASSES};
pub use error::Error;
pub use genestr::GeneString;
pub use plif::{PenaltyFunction, Plif, PlifArray, PlifTransform};
pub use transitions::{Transition, TransitionEdge, TransitionTable};

pub type Result<T> = std::result::Result<T, Error>;
