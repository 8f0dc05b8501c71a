//! Multiplexed amplicon demultiplexing.
//!
//! An [`NgsLibrary`] holds markers (primer pairs), each with a table of
//! PCRs keyed by their sample tags. Once compiled, reads are matched against
//! the primers and tags to recover the amplicon and the sample it belongs to.

mod library;
pub use library::*;

mod extract;
pub use extract::*;

mod multi;

mod tag_list;
pub use tag_list::*;
