//! Workers that process reads.

mod retain_op;
pub use retain_op::*;

mod for_each_op;
pub use for_each_op::*;

mod demultiplex_op;
pub use demultiplex_op::*;

mod pe_align_op;
pub use pe_align_op::*;

mod split_op;
pub use split_op::*;
