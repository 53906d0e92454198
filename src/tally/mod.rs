//! Hourly sales tally: the aggregate, the PLU registry, and the stateful
//! handlers that fold classified journal lines into them.

pub mod aggregate;
pub mod context;

pub use aggregate::{csv_header, HourlyAggregate, PluRegistry};
pub use context::{EventKind, ParserState, TallyContext};
