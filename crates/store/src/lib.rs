mod error;
mod json;
mod record;
mod writer;

pub use error::{Result, StoreError};
pub use json::{JsonResultsStore, ResultsBackend};
pub use record::{
    CellKey, CellRecord, CellStatus, ProjectResults, ResultUpdate, SummaryRecord, SummaryScope,
};
pub use writer::{spawn_writer, ResultWriter};
