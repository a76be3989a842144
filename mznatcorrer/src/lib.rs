mod args;
mod driver;
mod ingest;
mod write;

pub use args::{IsotopeColumn, IsotopeColumnParseError, OutputColumn};
pub use driver::{MZNatCorrer, MZNatCorrerError};
pub use ingest::{CellGrid, ColumnLayout};
pub use write::{append_results, write_json, UNOBSERVED_INTENSITY, UNOBSERVED_NOTE};
