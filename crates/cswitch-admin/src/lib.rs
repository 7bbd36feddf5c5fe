mod router;

pub use router::{AdminState, router};
