mod category;
mod reconcile;

pub use category::*;
pub use reconcile::*;
